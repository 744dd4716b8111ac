//! Shared fast state: lockout counters, rate-limit windows and the access-token
//! blacklist.
//!
//! All state lives in the store with per-key TTLs; nothing is cached in
//! process, so every service instance sees the same counters.

pub mod memory;
pub mod redis_store;

pub use memory::MemoryFastStore;
pub use redis_store::RedisFastStore;

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Parameters of one guarded failure increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailurePolicy {
    /// Count at which the lock flag is set.
    pub threshold: u32,
    /// Rolling expiry of the counter, refreshed on every increment.
    pub counter_ttl: Duration,
    /// Expiry of the lock flag.
    pub lock_ttl: Duration,
}

/// Result of a guarded failure increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureTally {
    /// The lock flag was already present; nothing was incremented.
    Blocked,
    /// Counter incremented to this value, still below the threshold.
    Counted(u32),
    /// Counter reached the threshold and this call set the lock flag.
    Tripped(u32),
}

#[async_trait]
pub trait FastStore: Send + Sync {
    /// Atomically: if `lock_key` exists return `Blocked`; otherwise increment
    /// `counter_key`, refresh its TTL, and set `lock_key` (only if absent) once
    /// the count reaches the threshold.
    async fn record_failure(
        &self,
        counter_key: &str,
        lock_key: &str,
        policy: FailurePolicy,
    ) -> Result<FailureTally>;

    /// Current counter value, `None` when the key is absent or expired.
    async fn counter(&self, key: &str) -> Result<Option<u32>>;

    /// Atomic sliding-window admission: prune entries at or before
    /// `now_ms - window`, deny if `max` remain, otherwise record `now_ms` under a
    /// unique member and refresh the key TTL to `window`.
    async fn admit_in_window(
        &self,
        key: &str,
        now_ms: i64,
        window: Duration,
        max: u32,
    ) -> Result<bool>;

    /// Set a marker key that expires after `ttl`.
    async fn set_flag(&self, key: &str, ttl: Duration) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Delete several keys in one pipelined round trip.
    async fn delete_many(&self, keys: &[String]) -> Result<()>;
}

/// Millisecond TTL for store commands; sub-millisecond remainders round up so
/// a key is never written without an expiry.
pub(crate) fn ttl_millis(ttl: Duration) -> u64 {
    let ms = ttl.as_millis();
    if ms == 0 {
        1
    } else {
        ms.min(u64::MAX as u128) as u64
    }
}
