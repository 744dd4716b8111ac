/// Refresh-token lifecycle: issuance, single-use rotation, revocation, sweep
use crate::db::TokenStore;
use crate::error::{AuthError, Result};
use crate::models::{NewRefreshToken, RefreshToken};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{Duration, Utc};
use rand::{rngs::OsRng, RngCore};
use std::collections::HashSet;
use std::sync::Arc;

/// Random bytes per refresh token (256 bits).
const TOKEN_BYTES: usize = 32;

/// Successor produced by a rotation.
#[derive(Debug, Clone)]
pub struct RotatedToken {
    /// Opaque string handed to the client.
    pub token: String,
    pub record: RefreshToken,
}

#[derive(Clone)]
pub struct TokenLifecycle {
    store: Arc<dyn TokenStore>,
    refresh_lifetime: Duration,
}

impl TokenLifecycle {
    pub fn new(store: Arc<dyn TokenStore>, refresh_lifetime: Duration) -> Self {
        Self {
            store,
            refresh_lifetime,
        }
    }

    /// Persist a new live refresh token for `user_id` and return its string.
    pub async fn issue(&self, user_id: i64, device_info: &str, ip_address: &str) -> Result<String> {
        let token = generate_token()?;
        let record = self
            .store
            .create(NewRefreshToken {
                user_id,
                token: token.clone(),
                expires_at: Utc::now() + self.refresh_lifetime,
                previous_id: None,
                device_info: device_info.to_string(),
                ip_address: ip_address.to_string(),
            })
            .await?;

        tracing::debug!(user_id, token_id = %record.id, "Refresh token issued");
        Ok(token)
    }

    /// Exchange a live refresh token for its successor.
    ///
    /// Empty `device_info` / `ip_address` inherit the predecessor's values.
    /// Exactly one of any number of concurrent rotations of the same token
    /// succeeds; the rest fail with `TokenUsed`.
    pub async fn rotate(
        &self,
        current: &str,
        device_info: &str,
        ip_address: &str,
    ) -> Result<RotatedToken> {
        let now = Utc::now();
        let record = self
            .store
            .find_by_token(current)
            .await?
            .ok_or(AuthError::InvalidToken)?;

        if let Err(e) = record.ensure_live(now) {
            if matches!(e, AuthError::TokenUsed) {
                warn_reuse(&record);
            }
            return Err(e);
        }

        let token = generate_token()?;
        let successor = NewRefreshToken {
            user_id: record.user_id,
            token: token.clone(),
            expires_at: now + self.refresh_lifetime,
            previous_id: Some(record.id),
            device_info: inherit(device_info, &record.device_info),
            ip_address: inherit(ip_address, &record.ip_address),
        };

        match self.store.rotate(record.id, successor, now).await {
            Ok(next) => {
                tracing::info!(
                    user_id = record.user_id,
                    previous_id = %record.id,
                    token_id = %next.id,
                    "Refresh token rotated"
                );
                Ok(RotatedToken { token, record: next })
            }
            Err(AuthError::TokenUsed) => {
                warn_reuse(&record);
                Err(AuthError::TokenUsed)
            }
            Err(e) => Err(e),
        }
    }

    /// Revoke one token. Revoking twice keeps the first timestamp.
    pub async fn revoke(&self, token: &str) -> Result<()> {
        self.store.revoke(token, Utc::now()).await
    }

    pub async fn revoke_all(&self, user_id: i64) -> Result<u64> {
        let revoked = self.store.revoke_all_for_user(user_id, Utc::now()).await?;
        tracing::info!(user_id, revoked, "Revoked all refresh tokens for user");
        Ok(revoked)
    }

    /// Delete expired and used records. Driven by the binary's sweep task.
    pub async fn cleanup_expired(&self) -> Result<u64> {
        let deleted = self.store.delete_expired(Utc::now()).await?;
        tracing::info!(deleted, "Refresh token cleanup completed");
        Ok(deleted)
    }

    /// The chain ending at `token`, newest first, as far back as records
    /// survive the cleanup sweep.
    pub async fn session_history(&self, token: &str) -> Result<Vec<RefreshToken>> {
        let mut record = self
            .store
            .find_by_token(token)
            .await?
            .ok_or(AuthError::InvalidToken)?;

        let mut seen = HashSet::new();
        let mut chain = Vec::new();
        loop {
            if !seen.insert(record.id) {
                return Err(AuthError::Internal(format!(
                    "refresh token chain loops at {}",
                    record.id
                )));
            }

            let previous_id = record.previous_id;
            chain.push(record);

            let Some(previous_id) = previous_id else {
                break;
            };
            match self.store.find_by_id(previous_id).await? {
                Some(previous) => record = previous,
                None => break,
            }
        }

        Ok(chain)
    }
}

/// 256 bits from the OS CSPRNG, URL-safe base64 without padding.
pub fn generate_token() -> Result<String> {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| AuthError::Internal(format!("OS random source failed: {e}")))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

fn inherit(supplied: &str, previous: &str) -> String {
    if supplied.is_empty() {
        previous.to_string()
    } else {
        supplied.to_string()
    }
}

/// A used token presented again is either a lost race or a stolen token.
fn warn_reuse(record: &RefreshToken) {
    tracing::warn!(
        user_id = record.user_id,
        token_id = %record.id,
        "Refresh token reuse detected"
    );
}
