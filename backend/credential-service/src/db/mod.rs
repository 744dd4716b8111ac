//! Relational stores for identities and refresh tokens.
//!
//! Both stores are capability traits so the service logic can run against
//! Postgres in production and the in-memory implementations in tests.

pub mod memory;
pub mod refresh_tokens;
pub mod reset_tokens;
pub mod users;

pub use memory::{MemoryCredentialStore, MemoryResetTokenStore, MemoryTokenStore};
pub use refresh_tokens::PgTokenStore;
pub use reset_tokens::PgResetTokenStore;
pub use users::PgCredentialStore;

use crate::error::{AuthError, Result};
use crate::models::{NewRefreshToken, NewResetToken, NewUser, RefreshToken, ResetToken, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use uuid::Uuid;

/// Identity lookups and writes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Find a live (not soft-deleted) identity by email, matched exactly.
    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Find a live identity by id.
    async fn find_by_id(&self, id: i64) -> Result<Option<User>>;

    /// Insert a new identity and return its id. A duplicate email fails with
    /// `EmailAlreadyExists`.
    async fn create(&self, user: NewUser) -> Result<i64>;

    /// Persist profile and password-hash changes.
    async fn update(&self, user: &User) -> Result<()>;
}

/// Refresh-token persistence.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn create(&self, token: NewRefreshToken) -> Result<RefreshToken>;

    async fn find_by_token(&self, token: &str) -> Result<Option<RefreshToken>>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<RefreshToken>>;

    /// Mark `current_id` used and insert `successor` in one transaction.
    ///
    /// The update is conditional on the record still being live at `now`; if
    /// another caller rotated it first this fails with `TokenUsed` (or the
    /// revoked/expired kind) and nothing is written.
    async fn rotate(
        &self,
        current_id: Uuid,
        successor: NewRefreshToken,
        now: DateTime<Utc>,
    ) -> Result<RefreshToken>;

    /// Stamp `revoked_at` if it is not already set. `NotFound` if no record
    /// carries this token.
    async fn revoke(&self, token: &str, at: DateTime<Utc>) -> Result<()>;

    /// Revoke every unrevoked record of a user, returning how many changed.
    async fn revoke_all_for_user(&self, user_id: i64, at: DateTime<Utc>) -> Result<u64>;

    /// Delete records that are expired or already used.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

/// Password-reset credential persistence, keyed by token hash.
#[async_trait]
pub trait ResetTokenStore: Send + Sync {
    /// Insert a credential, discarding any unused one the user already holds,
    /// in one transaction.
    async fn replace(&self, token: NewResetToken) -> Result<ResetToken>;

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<ResetToken>>;

    /// Stamp `used_at` if the credential is still live at `now` and return
    /// it. Exactly one of any number of concurrent calls succeeds; the rest
    /// fail with `TokenUsed`. `InvalidToken` if no record matches.
    async fn consume(&self, token_hash: &str, now: DateTime<Utc>) -> Result<ResetToken>;

    /// Delete credentials that are expired or already used.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

/// Bound a database operation; an elapsed timeout is transient, never a miss.
pub(crate) async fn timed<F, T>(limit: Duration, op: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, op).await {
        Ok(result) => result,
        Err(_) => Err(AuthError::transient("postgres", "statement timed out")),
    }
}
