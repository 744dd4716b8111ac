/// Account lockout after repeated failed logins
///
/// Failures are counted per identity under `failed_attempts:{identity}` with a
/// rolling expiry; reaching the threshold sets `account_locked:{identity}` for
/// the lock duration. Increment and lock run as one atomic store step.
use crate::config::LockoutSettings;
use crate::error::{AuthError, Result};
use crate::fast_store::{FailurePolicy, FailureTally, FastStore};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutConfig {
    pub max_attempts: u32,
    pub lock_duration: Duration,
    pub attempt_expiry: Duration,
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            lock_duration: Duration::from_secs(15 * 60),
            attempt_expiry: Duration::from_secs(60 * 60),
        }
    }
}

impl From<&LockoutSettings> for LockoutConfig {
    fn from(settings: &LockoutSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            lock_duration: Duration::from_secs(settings.lock_duration_secs),
            attempt_expiry: Duration::from_secs(settings.attempt_expiry_secs),
        }
    }
}

/// Outcome of a counted failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptOutcome {
    pub attempts: u32,
    pub remaining: u32,
    /// This failure reached the threshold and locked the account.
    pub locked_now: bool,
}

#[derive(Clone)]
pub struct AccountLockout {
    store: Arc<dyn FastStore>,
    config: LockoutConfig,
}

impl AccountLockout {
    pub fn new(store: Arc<dyn FastStore>, config: LockoutConfig) -> Self {
        Self { store, config }
    }

    fn attempts_key(identity: &str) -> String {
        format!("failed_attempts:{identity}")
    }

    fn lock_key(identity: &str) -> String {
        format!("account_locked:{identity}")
    }

    /// Count one failed login. Fails with `AccountLocked` without counting when
    /// the identity is already locked.
    pub async fn record_failed_attempt(&self, identity: &str) -> Result<AttemptOutcome> {
        let policy = FailurePolicy {
            threshold: self.config.max_attempts,
            counter_ttl: self.config.attempt_expiry,
            lock_ttl: self.config.lock_duration,
        };

        let tally = self
            .store
            .record_failure(&Self::attempts_key(identity), &Self::lock_key(identity), policy)
            .await?;

        match tally {
            FailureTally::Blocked => Err(AuthError::AccountLocked),
            FailureTally::Counted(attempts) => Ok(AttemptOutcome {
                attempts,
                remaining: self.config.max_attempts.saturating_sub(attempts),
                locked_now: false,
            }),
            FailureTally::Tripped(attempts) => {
                tracing::warn!(
                    identity = %identity,
                    attempts,
                    lock_secs = self.config.lock_duration.as_secs(),
                    "Account locked after repeated failed logins"
                );
                Ok(AttemptOutcome {
                    attempts,
                    remaining: 0,
                    locked_now: true,
                })
            }
        }
    }

    pub async fn is_locked(&self, identity: &str) -> Result<bool> {
        self.store.exists(&Self::lock_key(identity)).await
    }

    /// Clear both the counter and the lock, e.g. after a successful login.
    pub async fn reset_attempts(&self, identity: &str) -> Result<()> {
        self.store
            .delete_many(&[Self::attempts_key(identity), Self::lock_key(identity)])
            .await
    }

    pub async fn remaining_attempts(&self, identity: &str) -> Result<u32> {
        let attempts = self.store.counter(&Self::attempts_key(identity)).await?;
        Ok(match attempts {
            Some(n) => self.config.max_attempts.saturating_sub(n),
            None => self.config.max_attempts,
        })
    }
}
