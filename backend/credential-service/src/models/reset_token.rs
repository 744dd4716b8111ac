/// Password-reset credential record
use crate::error::{AuthError, Result};
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Single-use password-reset credential. Only the SHA-256 of the token is
/// stored; the raw value exists in the delivery message alone.
#[derive(Debug, Clone, FromRow)]
pub struct ResetToken {
    pub id: Uuid,
    pub user_id: i64,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ResetToken {
    /// Used wins over expired.
    pub fn ensure_live(&self, now: DateTime<Utc>) -> Result<()> {
        if self.used_at.is_some() {
            Err(AuthError::TokenUsed)
        } else if self.expires_at <= now {
            Err(AuthError::TokenExpired)
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewResetToken {
    pub user_id: i64,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
}

impl NewResetToken {
    pub fn into_record(self, id: Uuid, now: DateTime<Utc>) -> ResetToken {
        ResetToken {
            id,
            user_id: self.user_id,
            token_hash: self.token_hash,
            expires_at: self.expires_at,
            used_at: None,
            created_at: now,
        }
    }
}
