/// Password-reset credentials: issuance, validation, single-use consumption
///
/// The raw token goes to the `ResetNotifier` and nowhere else; the store only
/// sees its SHA-256. Issuing a credential discards any unused one the user
/// still holds.
use crate::db::ResetTokenStore;
use crate::error::{AuthError, Result};
use crate::models::{NewResetToken, User};
use crate::services::token_lifecycle::generate_token;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Out-of-band delivery of a freshly issued reset token.
#[async_trait]
pub trait ResetNotifier: Send + Sync {
    async fn send_reset(&self, user: &User, token: &str, expires_at: DateTime<Utc>)
        -> Result<()>;
}

/// Records that a reset was issued without exposing the token. Stands in
/// where no delivery channel is wired.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

#[async_trait]
impl ResetNotifier for TracingNotifier {
    async fn send_reset(
        &self,
        user: &User,
        _token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        tracing::info!(
            user_id = user.id,
            expires_at = %expires_at,
            "Password reset issued, no delivery channel configured"
        );
        Ok(())
    }
}

#[derive(Clone)]
pub struct PasswordReset {
    store: Arc<dyn ResetTokenStore>,
    notifier: Arc<dyn ResetNotifier>,
    lifetime: Duration,
}

impl PasswordReset {
    pub fn new(
        store: Arc<dyn ResetTokenStore>,
        notifier: Arc<dyn ResetNotifier>,
        lifetime: Duration,
    ) -> Self {
        Self {
            store,
            notifier,
            lifetime,
        }
    }

    /// Issue a credential for `user` and hand it to the notifier. A delivery
    /// failure is logged, not returned, so callers respond the same way
    /// whether or not the identity exists.
    pub async fn issue(&self, user: &User) -> Result<()> {
        let token = generate_token()?;
        let record = self
            .store
            .replace(NewResetToken {
                user_id: user.id,
                token_hash: hash_reset_token(&token),
                expires_at: Utc::now() + self.lifetime,
            })
            .await?;

        if let Err(e) = self
            .notifier
            .send_reset(user, &token, record.expires_at)
            .await
        {
            tracing::error!(user_id = user.id, error = %e, "Password reset delivery failed");
        }
        Ok(())
    }

    /// Owner of a live credential, without consuming it.
    pub async fn validate(&self, token: &str) -> Result<i64> {
        if token.is_empty() {
            return Err(AuthError::InvalidToken);
        }

        let record = self
            .store
            .find_by_hash(&hash_reset_token(token))
            .await?
            .ok_or(AuthError::InvalidToken)?;
        record.ensure_live(Utc::now())?;
        Ok(record.user_id)
    }

    /// Spend a live credential and return its owner. A second use fails with
    /// `TokenUsed`.
    pub async fn consume(&self, token: &str) -> Result<i64> {
        if token.is_empty() {
            return Err(AuthError::InvalidToken);
        }

        let record = self
            .store
            .consume(&hash_reset_token(token), Utc::now())
            .await?;
        Ok(record.user_id)
    }

    pub async fn cleanup_expired(&self) -> Result<u64> {
        let deleted = self.store.delete_expired(Utc::now()).await?;
        tracing::info!(deleted, "Password reset cleanup completed");
        Ok(deleted)
    }
}

/// Storage key for a reset token: hex SHA-256.
pub fn hash_reset_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}
