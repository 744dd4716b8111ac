//! Access-token issuance, validation and blacklisting.
//!
//! Tokens are self-contained JWTs. Revocation before natural expiry goes
//! through a blacklist in the fast store, keyed by the SHA-256 of the raw
//! token and expiring at the same instant the token does, so the blacklist
//! never outgrows the set of tokens that could still validate.

use crate::config::JwtSettings;
use crate::error::{AuthError, Result};
use crate::fast_store::FastStore;
use crate::models::claims::{AccessClaims, ACCESS_TOKEN_TYPE};
use anyhow::{anyhow, bail};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use sha2::{Digest, Sha256};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const BLACKLIST_PREFIX: &str = "revoked:token:";

/// A freshly signed access token.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    /// Lifetime in seconds, as reported to clients.
    pub expires_in: i64,
}

#[async_trait]
pub trait AccessTokenAuthority: Send + Sync {
    fn issue(&self, user_id: i64) -> Result<IssuedToken>;

    /// Signature, then blacklist, then claims. Any failure is definitive
    /// except a fast-store error, which surfaces as `Transient`.
    async fn validate(&self, token: &str) -> Result<AccessClaims>;

    /// Blacklist a correctly signed token until its own expiry. Tokens that
    /// are already past `exp` need no entry.
    async fn blacklist(&self, token: &str) -> Result<()>;
}

pub struct JwtAuthority {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    algorithm: Algorithm,
    expiry: Duration,
    store: Arc<dyn FastStore>,
}

impl JwtAuthority {
    /// Build from settings: RS256 from PEM keys, or an HMAC algorithm from the
    /// shared secret.
    pub fn from_settings(settings: &JwtSettings, store: Arc<dyn FastStore>) -> anyhow::Result<Self> {
        let algorithm = Algorithm::from_str(&settings.algorithm)
            .map_err(|e| anyhow!("Unsupported JWT_ALGORITHM {}: {e}", settings.algorithm))?;

        let (encoding_key, decoding_key) = match algorithm {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => (
                EncodingKey::from_secret(settings.signing_key.as_bytes()),
                DecodingKey::from_secret(settings.signing_key.as_bytes()),
            ),
            Algorithm::RS256 => {
                let public_pem = settings
                    .validation_key
                    .as_deref()
                    .ok_or_else(|| anyhow!("RS256 requires a public key"))?;
                (
                    EncodingKey::from_rsa_pem(settings.signing_key.as_bytes())
                        .map_err(|e| anyhow!("Failed to parse RSA private key: {e}"))?,
                    DecodingKey::from_rsa_pem(public_pem.as_bytes())
                        .map_err(|e| anyhow!("Failed to parse RSA public key: {e}"))?,
                )
            }
            other => bail!("Unsupported JWT algorithm {other:?}"),
        };

        Ok(Self {
            encoding_key,
            decoding_key,
            algorithm,
            expiry: settings.expiry(),
            store,
        })
    }

    /// HS256 authority over a shared secret.
    pub fn with_secret(secret: &str, expiry: Duration, store: Arc<dyn FastStore>) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            algorithm: Algorithm::HS256,
            expiry,
            store,
        }
    }

    /// Verify the signature and decode the claims without judging them.
    fn decode_verified(&self, token: &str) -> Result<AccessClaims> {
        let mut validation = Validation::new(self.algorithm);
        // Time checks happen in `check_claims` so the boundary is exactly exp.
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let data = decode::<AccessClaims>(token, &self.decoding_key, &validation)?;
        Ok(data.claims)
    }

    fn check_claims(claims: &AccessClaims, now: i64) -> Result<()> {
        if claims.exp <= now {
            return Err(AuthError::TokenExpired);
        }
        if claims.iat > now {
            return Err(AuthError::InvalidToken);
        }
        if claims.token_type != ACCESS_TOKEN_TYPE {
            return Err(AuthError::InvalidToken);
        }
        claims.user_id()?;
        Ok(())
    }
}

#[async_trait]
impl AccessTokenAuthority for JwtAuthority {
    fn issue(&self, user_id: i64) -> Result<IssuedToken> {
        if user_id == 0 {
            return Err(AuthError::Validation("user id must be non-zero".to_string()));
        }

        let now = Utc::now().timestamp();
        let expires_in = self.expiry.as_secs() as i64;
        let claims = AccessClaims {
            sub: user_id.to_string(),
            iat: now,
            exp: now + expires_in,
            jti: Uuid::new_v4().to_string(),
            token_type: ACCESS_TOKEN_TYPE.to_string(),
        };

        let token = encode(&Header::new(self.algorithm), &claims, &self.encoding_key)
            .map_err(|e| AuthError::Internal(format!("Failed to sign access token: {e}")))?;

        let expires_at = Utc
            .timestamp_opt(claims.exp, 0)
            .single()
            .ok_or_else(|| AuthError::Internal("access token expiry out of range".to_string()))?;

        Ok(IssuedToken {
            token,
            expires_at,
            expires_in,
        })
    }

    async fn validate(&self, token: &str) -> Result<AccessClaims> {
        let claims = self.decode_verified(token)?;

        if self.store.exists(&blacklist_key(token)).await? {
            return Err(AuthError::TokenBlacklisted);
        }

        Self::check_claims(&claims, Utc::now().timestamp())?;
        Ok(claims)
    }

    async fn blacklist(&self, token: &str) -> Result<()> {
        let claims = self.decode_verified(token)?;

        let remaining_ms = claims.exp.saturating_mul(1000) - Utc::now().timestamp_millis();
        if remaining_ms <= 0 {
            tracing::debug!(jti = %claims.jti, "Token already expired, no blacklist entry needed");
            return Ok(());
        }

        self.store
            .set_flag(&blacklist_key(token), Duration::from_millis(remaining_ms as u64))
            .await?;

        tracing::info!(
            jti = %claims.jti,
            ttl_ms = remaining_ms,
            "Access token blacklisted"
        );
        Ok(())
    }
}

/// Fast-store key for a blacklisted token. The raw token never becomes a key.
pub(crate) fn blacklist_key(token: &str) -> String {
    format!("{BLACKLIST_PREFIX}{}", hex::encode(Sha256::digest(token.as_bytes())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fast_store::MemoryFastStore;

    const SECRET: &str = "unit-test-secret";

    fn authority(expiry: Duration) -> (JwtAuthority, Arc<MemoryFastStore>) {
        let store = Arc::new(MemoryFastStore::new());
        (JwtAuthority::with_secret(SECRET, expiry, store.clone()), store)
    }

    fn sign(claims: &AccessClaims, secret: &str) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn claims_for(sub: &str, iat: i64, exp: i64) -> AccessClaims {
        AccessClaims {
            sub: sub.to_string(),
            iat,
            exp,
            jti: Uuid::new_v4().to_string(),
            token_type: ACCESS_TOKEN_TYPE.to_string(),
        }
    }

    #[tokio::test]
    async fn test_issue_and_validate() {
        let (authority, _) = authority(Duration::from_secs(3600));

        let issued = authority.issue(42).unwrap();
        assert_eq!(issued.expires_in, 3600);

        let claims = authority.validate(&issued.token).await.unwrap();
        assert_eq!(claims.user_id().unwrap(), 42);
        assert_eq!(claims.token_type, "access");
    }

    #[tokio::test]
    async fn test_tokens_in_same_second_differ() {
        let (authority, _) = authority(Duration::from_secs(3600));
        let a = authority.issue(1).unwrap();
        let b = authority.issue(1).unwrap();
        assert_ne!(a.token, b.token);
    }

    #[tokio::test]
    async fn test_foreign_signature_rejected() {
        let (authority, _) = authority(Duration::from_secs(3600));
        let now = Utc::now().timestamp();
        let forged = sign(&claims_for("1", now, now + 60), "other-secret");

        assert!(matches!(
            authority.validate(&forged).await,
            Err(AuthError::InvalidToken)
        ));
        assert!(matches!(
            authority.blacklist(&forged).await,
            Err(AuthError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn test_claim_checks() {
        let (authority, _) = authority(Duration::from_secs(3600));
        let now = Utc::now().timestamp();

        let expired = sign(&claims_for("1", now - 120, now - 60), SECRET);
        assert!(matches!(
            authority.validate(&expired).await,
            Err(AuthError::TokenExpired)
        ));

        let future = sign(&claims_for("1", now + 600, now + 1200), SECRET);
        assert!(matches!(
            authority.validate(&future).await,
            Err(AuthError::InvalidToken)
        ));

        let anonymous = sign(&claims_for("0", now, now + 60), SECRET);
        assert!(matches!(
            authority.validate(&anonymous).await,
            Err(AuthError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn test_blacklist_expires_with_token() {
        let (authority, store) = authority(Duration::from_secs(2));
        let issued = authority.issue(7).unwrap();

        authority.blacklist(&issued.token).await.unwrap();
        assert!(matches!(
            authority.validate(&issued.token).await,
            Err(AuthError::TokenBlacklisted)
        ));

        tokio::time::sleep(Duration::from_millis(2_200)).await;

        assert!(!store.exists(&blacklist_key(&issued.token)).await.unwrap());
        assert!(matches!(
            authority.validate(&issued.token).await,
            Err(AuthError::TokenExpired)
        ));
    }

    #[tokio::test]
    async fn test_blacklisting_expired_token_is_noop() {
        let (authority, store) = authority(Duration::from_secs(3600));
        let now = Utc::now().timestamp();
        let expired = sign(&claims_for("3", now - 120, now - 60), SECRET);

        authority.blacklist(&expired).await.unwrap();
        assert!(!store.exists(&blacklist_key(&expired)).await.unwrap());
    }

    #[test]
    fn test_blacklist_key_hides_token() {
        let key = blacklist_key("raw.jwt.value");
        assert!(key.starts_with("revoked:token:"));
        assert!(!key.contains("raw.jwt.value"));
        assert_eq!(key.len(), "revoked:token:".len() + 64);
    }

    #[test]
    fn test_unknown_algorithm_rejected() {
        let settings = JwtSettings {
            signing_key: "secret".to_string(),
            validation_key: None,
            algorithm: "none".to_string(),
            expiry_seconds: 60,
        };
        assert!(JwtAuthority::from_settings(&settings, Arc::new(MemoryFastStore::new())).is_err());
    }
}
