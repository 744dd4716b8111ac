use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AuthError>;

/// Every failure the credential core can report.
///
/// The token and account variants are kept distinct so logs and alerts can tell
/// a replayed refresh token from an expired one; the HTTP boundary collapses
/// them into a single unauthorized response.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Record not found")]
    NotFound,

    #[error("Email already exists")]
    EmailAlreadyExists,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    TokenExpired,

    #[error("Token already used")]
    TokenUsed,

    #[error("Token revoked")]
    TokenRevoked,

    #[error("Token blacklisted")]
    TokenBlacklisted,

    #[error("Account locked")]
    AccountLocked,

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Transient {store} failure: {message}")]
    Transient {
        store: &'static str,
        message: String,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AuthError {
    pub fn transient(store: &'static str, err: impl std::fmt::Display) -> Self {
        AuthError::Transient {
            store,
            message: err.to_string(),
        }
    }

    /// I/O or timeout against a backing store. The outcome of the attempted
    /// operation is unknown, so only idempotent reads are safe to retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, AuthError::Transient { .. })
    }

    /// Errors that must reach the client as a plain "unauthorized".
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            AuthError::InvalidCredentials
                | AuthError::NotFound
                | AuthError::InvalidToken
                | AuthError::TokenExpired
                | AuthError::TokenUsed
                | AuthError::TokenRevoked
                | AuthError::TokenBlacklisted
                | AuthError::AccountLocked
        )
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            e if e.is_unauthorized() => {
                tracing::info!(reason = %e, "Request rejected as unauthorized");
                (
                    StatusCode::UNAUTHORIZED,
                    "Invalid credentials or token".to_string(),
                )
            }
            AuthError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "Too many requests".to_string(),
            ),
            AuthError::EmailAlreadyExists => (
                StatusCode::CONFLICT,
                "Email already registered".to_string(),
            ),
            AuthError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AuthError::Transient { store, message } => {
                tracing::error!(store = %store, error = %message, "Backing store unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Service temporarily unavailable".to_string(),
                )
            }
            _ => {
                tracing::error!(error = %self, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

impl From<sqlx::Error> for AuthError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AuthError::NotFound,
            other => {
                tracing::error!("Database error: {}", other);
                AuthError::transient("postgres", other)
            }
        }
    }
}

impl From<redis::RedisError> for AuthError {
    fn from(err: redis::RedisError) -> Self {
        tracing::error!("Redis error: {}", err);
        AuthError::transient("redis", err)
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            _ => AuthError::InvalidToken,
        }
    }
}
