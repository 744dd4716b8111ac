//! In-memory fast store with TTL semantics matching Redis.
//!
//! Expired keys are treated as absent on every read and dropped lazily, the
//! same observable behaviour as Redis key expiry.

use super::{FailurePolicy, FailureTally, FastStore};
use crate::error::{AuthError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
enum Value {
    Counter(u32),
    Flag,
    Window(Vec<i64>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Instant,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

#[derive(Default)]
pub struct MemoryFastStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryFastStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the map and drop any expired key before the caller looks at it.
    fn live_entries(&self, key: &str) -> Result<MutexGuard<'_, HashMap<String, Entry>>> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| AuthError::Internal("in-memory store lock poisoned".to_string()))?;

        let now = Instant::now();
        if entries.get(key).is_some_and(|e| e.is_expired(now)) {
            entries.remove(key);
        }
        Ok(entries)
    }
}

#[async_trait]
impl FastStore for MemoryFastStore {
    async fn record_failure(
        &self,
        counter_key: &str,
        lock_key: &str,
        policy: FailurePolicy,
    ) -> Result<FailureTally> {
        let mut entries = self.live_entries(counter_key)?;
        let now = Instant::now();

        if entries.get(lock_key).is_some_and(|e| !e.is_expired(now)) {
            return Ok(FailureTally::Blocked);
        }

        let attempts = match entries.get(counter_key).map(|e| &e.value) {
            Some(Value::Counter(n)) => n.saturating_add(1),
            _ => 1,
        };
        entries.insert(
            counter_key.to_string(),
            Entry {
                value: Value::Counter(attempts),
                expires_at: now + policy.counter_ttl,
            },
        );

        if attempts >= policy.threshold {
            entries.insert(
                lock_key.to_string(),
                Entry {
                    value: Value::Flag,
                    expires_at: now + policy.lock_ttl,
                },
            );
            return Ok(FailureTally::Tripped(attempts));
        }

        Ok(FailureTally::Counted(attempts))
    }

    async fn counter(&self, key: &str) -> Result<Option<u32>> {
        let entries = self.live_entries(key)?;
        match entries.get(key).map(|e| &e.value) {
            Some(Value::Counter(n)) => Ok(Some(*n)),
            Some(_) => Err(AuthError::Internal(format!("key {key} is not a counter"))),
            None => Ok(None),
        }
    }

    async fn admit_in_window(
        &self,
        key: &str,
        now_ms: i64,
        window: Duration,
        max: u32,
    ) -> Result<bool> {
        let mut entries = self.live_entries(key)?;
        let cutoff = now_ms - window.as_millis() as i64;

        let (mut stamps, expires_at) = match entries.remove(key) {
            Some(Entry {
                value: Value::Window(stamps),
                expires_at,
            }) => (stamps, Some(expires_at)),
            _ => (Vec::new(), None),
        };
        stamps.retain(|&stamp| stamp > cutoff);

        let admitted = stamps.len() < max as usize;
        if admitted {
            stamps.push(now_ms);
        }

        // Only accepted attempts refresh the expiry; a denial keeps the old one.
        let expires_at = if admitted {
            Some(Instant::now() + window)
        } else {
            expires_at
        };
        if let Some(expires_at) = expires_at.filter(|_| !stamps.is_empty()) {
            entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Window(stamps),
                    expires_at,
                },
            );
        }

        Ok(admitted)
    }

    async fn set_flag(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut entries = self.live_entries(key)?;
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Flag,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let entries = self.live_entries(key)?;
        Ok(entries.contains_key(key))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self.live_entries(key)?;
        entries.remove(key);
        Ok(())
    }

    async fn delete_many(&self, keys: &[String]) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| AuthError::Internal("in-memory store lock poisoned".to_string()))?;
        for key in keys {
            entries.remove(key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> FailurePolicy {
        FailurePolicy {
            threshold: 3,
            counter_ttl: Duration::from_secs(60),
            lock_ttl: Duration::from_secs(60),
        }
    }

    #[tokio::test]
    async fn test_record_failure_trips_once() {
        let store = MemoryFastStore::new();

        assert_eq!(
            store.record_failure("c", "l", policy()).await.unwrap(),
            FailureTally::Counted(1)
        );
        assert_eq!(
            store.record_failure("c", "l", policy()).await.unwrap(),
            FailureTally::Counted(2)
        );
        assert_eq!(
            store.record_failure("c", "l", policy()).await.unwrap(),
            FailureTally::Tripped(3)
        );
        assert_eq!(
            store.record_failure("c", "l", policy()).await.unwrap(),
            FailureTally::Blocked
        );
        assert_eq!(store.counter("c").await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn test_flag_expires() {
        let store = MemoryFastStore::new();
        store
            .set_flag("flag", Duration::from_millis(30))
            .await
            .unwrap();
        assert!(store.exists("flag").await.unwrap());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!store.exists("flag").await.unwrap());
    }

    #[tokio::test]
    async fn test_window_denies_without_recording() {
        let store = MemoryFastStore::new();
        let window = Duration::from_secs(10);

        assert!(store.admit_in_window("w", 1_000, window, 2).await.unwrap());
        assert!(store.admit_in_window("w", 1_000, window, 2).await.unwrap());
        assert!(!store.admit_in_window("w", 1_001, window, 2).await.unwrap());

        // Both stamps fall out of the window ten seconds later.
        assert!(store.admit_in_window("w", 11_000, window, 2).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_many_clears_all_keys() {
        let store = MemoryFastStore::new();
        store.set_flag("a", Duration::from_secs(5)).await.unwrap();
        store.set_flag("b", Duration::from_secs(5)).await.unwrap();

        store
            .delete_many(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();

        assert!(!store.exists("a").await.unwrap());
        assert!(!store.exists("b").await.unwrap());
    }
}
