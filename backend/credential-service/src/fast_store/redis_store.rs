/// Redis-backed fast store
///
/// The two compound operations (guarded failure increment and sliding-window
/// admission) run as Lua scripts so the check and the write are one atomic
/// step on the server. Every command goes through `run_with_timeout`; an
/// elapsed timeout surfaces as a transient error.
use super::{ttl_millis, FailurePolicy, FailureTally, FastStore};
use crate::error::{AuthError, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use redis::Script;
use redis_utils::{run_with_timeout, SharedConnectionManager};
use std::time::Duration;

/// KEYS[1] counter, KEYS[2] lock flag.
/// ARGV[1] counter ttl ms, ARGV[2] threshold, ARGV[3] lock ttl ms.
/// Returns {0, 0} when already locked, {1, n} when counted, {2, n} when this
/// call set the lock.
static RECORD_FAILURE_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        if redis.call('EXISTS', KEYS[2]) == 1 then
            return {0, 0}
        end

        local attempts = redis.call('INCR', KEYS[1])
        redis.call('PEXPIRE', KEYS[1], ARGV[1])

        if attempts >= tonumber(ARGV[2]) then
            if redis.call('SET', KEYS[2], '1', 'PX', ARGV[3], 'NX') then
                return {2, attempts}
            end
            return {0, 0}
        end

        return {1, attempts}
        "#,
    )
});

/// KEYS[1] window set.
/// ARGV[1] cutoff score, ARGV[2] now ms, ARGV[3] max, ARGV[4] window ms,
/// ARGV[5] nonce keeping same-millisecond members distinct.
static SLIDING_WINDOW_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])

        local count = redis.call('ZCARD', KEYS[1])
        if count >= tonumber(ARGV[3]) then
            return 0
        end

        redis.call('ZADD', KEYS[1], ARGV[2], ARGV[2] .. ':' .. ARGV[5])
        redis.call('PEXPIRE', KEYS[1], ARGV[4])

        return 1
        "#,
    )
});

#[derive(Clone)]
pub struct RedisFastStore {
    redis: SharedConnectionManager,
}

impl RedisFastStore {
    pub fn new(redis: SharedConnectionManager) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl FastStore for RedisFastStore {
    async fn record_failure(
        &self,
        counter_key: &str,
        lock_key: &str,
        policy: FailurePolicy,
    ) -> Result<FailureTally> {
        let mut redis_conn = self.redis.lock().await.clone();

        let (status, attempts): (i64, i64) = run_with_timeout(
            RECORD_FAILURE_SCRIPT
                .key(counter_key)
                .key(lock_key)
                .arg(ttl_millis(policy.counter_ttl))
                .arg(policy.threshold)
                .arg(ttl_millis(policy.lock_ttl))
                .invoke_async(&mut redis_conn),
        )
        .await?;

        let attempts = u32::try_from(attempts).unwrap_or(u32::MAX);
        match status {
            0 => Ok(FailureTally::Blocked),
            1 => Ok(FailureTally::Counted(attempts)),
            2 => Ok(FailureTally::Tripped(attempts)),
            other => Err(AuthError::Internal(format!(
                "unexpected lockout script status {other}"
            ))),
        }
    }

    async fn counter(&self, key: &str) -> Result<Option<u32>> {
        let mut redis_conn = self.redis.lock().await.clone();

        let value: Option<i64> =
            run_with_timeout(redis::cmd("GET").arg(key).query_async(&mut redis_conn)).await?;

        Ok(value.map(|v| u32::try_from(v.max(0)).unwrap_or(u32::MAX)))
    }

    async fn admit_in_window(
        &self,
        key: &str,
        now_ms: i64,
        window: Duration,
        max: u32,
    ) -> Result<bool> {
        let window_ms = ttl_millis(window);
        let cutoff = now_ms - window_ms as i64;
        let nonce: u64 = rand::random();

        let mut redis_conn = self.redis.lock().await.clone();
        let admitted: i64 = run_with_timeout(
            SLIDING_WINDOW_SCRIPT
                .key(key)
                .arg(cutoff)
                .arg(now_ms)
                .arg(max)
                .arg(window_ms)
                .arg(nonce)
                .invoke_async(&mut redis_conn),
        )
        .await?;

        Ok(admitted == 1)
    }

    async fn set_flag(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut redis_conn = self.redis.lock().await.clone();

        run_with_timeout(
            redis::cmd("SET")
                .arg(key)
                .arg("1")
                .arg("PX")
                .arg(ttl_millis(ttl))
                .query_async::<_, ()>(&mut redis_conn),
        )
        .await?;

        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut redis_conn = self.redis.lock().await.clone();

        let exists: bool =
            run_with_timeout(redis::cmd("EXISTS").arg(key).query_async(&mut redis_conn)).await?;

        Ok(exists)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut redis_conn = self.redis.lock().await.clone();

        run_with_timeout(
            redis::cmd("DEL")
                .arg(key)
                .query_async::<_, ()>(&mut redis_conn),
        )
        .await?;

        Ok(())
    }

    async fn delete_many(&self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        for key in keys {
            pipe.cmd("DEL").arg(key).ignore();
        }

        let mut redis_conn = self.redis.lock().await.clone();
        run_with_timeout(pipe.query_async::<_, ()>(&mut redis_conn)).await?;

        Ok(())
    }
}
