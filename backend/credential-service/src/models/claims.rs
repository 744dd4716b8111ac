use crate::error::{AuthError, Result};
use serde::{Deserialize, Serialize};

pub const ACCESS_TOKEN_TYPE: &str = "access";

/// JWT claims carried by an access token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject (user id)
    pub sub: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// JWT ID, unique per issued token
    pub jti: String,
    pub token_type: String,
}

impl AccessClaims {
    /// Numeric user id from `sub`; zero and non-numeric subjects are rejected.
    pub fn user_id(&self) -> Result<i64> {
        match self.sub.parse::<i64>() {
            Ok(id) if id != 0 => Ok(id),
            _ => Err(AuthError::InvalidToken),
        }
    }
}
