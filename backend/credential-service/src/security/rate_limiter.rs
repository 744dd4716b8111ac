/// Sliding-window rate limiting
///
/// Each key owns a sorted set of attempt timestamps in the fast store. The
/// prune, count and insert happen in one scripted step, so concurrent callers
/// can never admit more than `max_attempts` inside any window.
use crate::error::{AuthError, Result};
use crate::fast_store::FastStore;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub max_attempts: u32,
    pub window: Duration,
}

impl RateLimitConfig {
    pub fn new(max_attempts: u32, window: Duration) -> Self {
        Self {
            max_attempts,
            window,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new(100, Duration::from_secs(60))
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn FastStore>,
    scope: String,
    config: RateLimitConfig,
}

impl RateLimiter {
    /// `scope` separates limiters sharing one store, e.g. one per route.
    pub fn new(store: Arc<dyn FastStore>, scope: impl Into<String>, config: RateLimitConfig) -> Self {
        Self {
            store,
            scope: scope.into(),
            config,
        }
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    fn key(&self, key: &str) -> String {
        format!("rate_limit:{}:{}", self.scope, key)
    }

    /// Record an attempt for `key` if the window has room.
    ///
    /// Denied attempts are not recorded, so a client hammering a closed window
    /// regains access as soon as its oldest admitted attempt ages out.
    pub async fn allow(&self, key: &str) -> Result<bool> {
        self.store
            .admit_in_window(
                &self.key(key),
                Utc::now().timestamp_millis(),
                self.config.window,
                self.config.max_attempts,
            )
            .await
    }

    pub async fn reset(&self, key: &str) -> Result<()> {
        self.store.delete(&self.key(key)).await
    }
}

/// What a route does when the fast store cannot answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreFailurePolicy {
    /// Admit the request and log the outage.
    FailOpen,
    /// Refuse the request with the transient error.
    FailClosed,
}

/// A limiter bound to a route together with its outage policy.
#[derive(Clone)]
pub struct RoutePolicy {
    pub limiter: RateLimiter,
    pub on_store_error: StoreFailurePolicy,
}

impl RoutePolicy {
    pub fn new(limiter: RateLimiter, on_store_error: StoreFailurePolicy) -> Self {
        Self {
            limiter,
            on_store_error,
        }
    }

    /// `Ok(())` when the request may proceed, `RateLimited` when the window is
    /// full, and the store error itself only under `FailClosed`.
    pub async fn admit(&self, key: &str) -> Result<()> {
        match self.limiter.allow(key).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                tracing::warn!(scope = %self.limiter.scope, key = %key, "Rate limit exceeded");
                Err(AuthError::RateLimited)
            }
            Err(e) if e.is_transient() && self.on_store_error == StoreFailurePolicy::FailOpen => {
                tracing::warn!(
                    scope = %self.limiter.scope,
                    error = %e,
                    "Rate limiter unavailable, admitting request"
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
