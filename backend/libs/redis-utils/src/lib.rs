use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use redis::aio::ConnectionManager;
use redis::{Client, RedisError};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{timeout, Duration};
use tracing::info;

/// Shared Redis connection manager guarded by a Tokio mutex.
///
/// Callers clone the manager out of the guard before issuing commands so the
/// mutex is never held across network I/O.
pub type SharedConnectionManager = Arc<Mutex<ConnectionManager>>;

const DEFAULT_REDIS_COMMAND_TIMEOUT_MS: u64 = 3_000;
const MIN_REDIS_COMMAND_TIMEOUT_MS: u64 = 500;

/// Redis connection pool backed by a single multiplexed connection manager.
pub struct RedisPool {
    manager: SharedConnectionManager,
}

impl RedisPool {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url).context("failed to parse REDIS_URL connection string")?;
        let connection_manager = ConnectionManager::new(client)
            .await
            .context("failed to initialize Redis connection manager")?;

        let pool = Self {
            manager: Arc::new(Mutex::new(connection_manager)),
        };
        pool.ping().await.context("Redis did not answer PING")?;

        info!("Redis connection manager initialized");
        Ok(pool)
    }

    pub fn manager(&self) -> SharedConnectionManager {
        self.manager.clone()
    }

    pub async fn ping(&self) -> Result<(), RedisError> {
        let mut conn = self.manager.lock().await.clone();
        run_with_timeout(redis::cmd("PING").query_async::<_, String>(&mut conn))
            .await
            .map(|_| ())
    }
}

/// Per-command timeout, read once from `REDIS_COMMAND_TIMEOUT_MS`.
pub fn redis_command_timeout() -> Duration {
    static TIMEOUT: OnceCell<Duration> = OnceCell::new();
    *TIMEOUT.get_or_init(|| {
        let ms = std::env::var("REDIS_COMMAND_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_REDIS_COMMAND_TIMEOUT_MS)
            .max(MIN_REDIS_COMMAND_TIMEOUT_MS);
        Duration::from_millis(ms)
    })
}

/// Run a Redis future under the process-wide command timeout.
pub async fn run_with_timeout<F, T>(future: F) -> Result<T, RedisError>
where
    F: Future<Output = Result<T, RedisError>>,
{
    with_timeout(redis_command_timeout(), future).await
}

/// Run a Redis future under an explicit timeout.
///
/// An elapsed timeout is reported as an `IoError` so callers treat it like any
/// other transport failure rather than as an empty reply.
pub async fn with_timeout<F, T>(duration: Duration, future: F) -> Result<T, RedisError>
where
    F: Future<Output = Result<T, RedisError>>,
{
    match timeout(duration, future).await {
        Ok(res) => res,
        Err(_) => Err(RedisError::from((
            redis::ErrorKind::IoError,
            "redis command timed out",
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_timeout_passes_through_result() {
        let result = with_timeout(Duration::from_secs(1), async { Ok::<_, RedisError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_with_timeout_elapsed_is_io_error() {
        let result = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok::<_, RedisError>(())
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind(), redis::ErrorKind::IoError);
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_command_timeout_has_floor() {
        assert!(redis_command_timeout() >= Duration::from_millis(MIN_REDIS_COMMAND_TIMEOUT_MS));
    }
}
