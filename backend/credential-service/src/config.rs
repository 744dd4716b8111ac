//! Configuration management for the credential service
//!
//! Loads settings from:
//! 1. Environment variables
//! 2. .env file (local development builds only)
//!
//! # Example
//!
//! ```no_run
//! use credential_service::config::Settings;
//!
//! fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     println!("listening on {}:{}", settings.server.host, settings.server.port);
//!     Ok(())
//! }
//! ```

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub redis: RedisSettings,
    pub jwt: JwtSettings,
    pub refresh: RefreshSettings,
    pub password_reset: PasswordResetSettings,
    pub lockout: LockoutSettings,
    pub rate_limit: RateLimitSettings,
    pub server: ServerSettings,
}

impl Settings {
    pub fn load() -> Result<Self> {
        // Load .env file in development
        if cfg!(debug_assertions) {
            dotenvy::dotenv().ok();
            info!("Loaded .env file for development");
        }

        Ok(Settings {
            database: DatabaseSettings::from_env()?,
            redis: RedisSettings::from_env()?,
            jwt: JwtSettings::from_env()?,
            refresh: RefreshSettings::from_env()?,
            password_reset: PasswordResetSettings::from_env()?,
            lockout: LockoutSettings::from_env()?,
            rate_limit: RateLimitSettings::from_env()?,
            server: ServerSettings::from_env()?,
        })
    }
}

/// Read `name`, falling back to `default` when unset, and parse it.
fn env_or<T>(name: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .with_context(|| format!("Invalid {name}"))
}

/// Database connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
    /// Seconds to wait for a pooled connection.
    pub acquire_timeout: u64,
    /// Per-statement bound in milliseconds.
    pub statement_timeout_ms: u64,
}

impl DatabaseSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            max_connections: env_or("DATABASE_MAX_CONNECTIONS", "20")?,
            acquire_timeout: env_or("DATABASE_ACQUIRE_TIMEOUT", "10")?,
            statement_timeout_ms: env_or("DATABASE_STATEMENT_TIMEOUT_MS", "5000")?,
        })
    }

    pub fn statement_timeout(&self) -> Duration {
        Duration::from_millis(self.statement_timeout_ms)
    }
}

/// Redis settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisSettings {
    pub url: String,
}

impl RedisSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            url: env::var("REDIS_URL").context("REDIS_URL must be set")?,
        })
    }
}

/// JWT signing settings
///
/// With `JWT_PRIVATE_KEY` set the service signs RS256 with PEM keys;
/// otherwise `JWT_SECRET` drives an HMAC algorithm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtSettings {
    #[serde(skip_serializing)]
    pub signing_key: String,
    #[serde(skip_serializing)]
    pub validation_key: Option<String>,
    pub algorithm: String,
    pub expiry_seconds: u64,
}

impl JwtSettings {
    fn from_env() -> Result<Self> {
        let expiry_seconds = env_or("JWT_EXPIRY_SECONDS", "86400")?;

        if let Ok(private_pem) = env::var("JWT_PRIVATE_KEY") {
            let public_pem = env::var("JWT_PUBLIC_KEY")
                .context("JWT_PUBLIC_KEY must be set together with JWT_PRIVATE_KEY")?;

            return Ok(Self {
                signing_key: private_pem,
                validation_key: Some(public_pem),
                algorithm: "RS256".to_string(),
                expiry_seconds,
            });
        }

        let signing_key = env::var("JWT_SECRET")
            .context("JWT_SECRET must be set when no PEM keys are configured")?;
        if signing_key.is_empty() {
            bail!("JWT_SECRET must not be empty");
        }

        Ok(Self {
            signing_key,
            validation_key: None,
            algorithm: env::var("JWT_ALGORITHM").unwrap_or_else(|_| "HS256".to_string()),
            expiry_seconds,
        })
    }

    pub fn expiry(&self) -> Duration {
        Duration::from_secs(self.expiry_seconds)
    }
}

/// Upper bound on the refresh-token lifetime (ten years).
const MAX_REFRESH_TTL_DAYS: i64 = 3650;

/// Refresh-token lifetime and cleanup cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshSettings {
    pub ttl_days: i64,
    pub cleanup_interval_secs: u64,
}

impl RefreshSettings {
    fn from_env() -> Result<Self> {
        let ttl_days: i64 = env_or("REFRESH_TOKEN_TTL_DAYS", "30")?;
        if !(1..=MAX_REFRESH_TTL_DAYS).contains(&ttl_days) {
            bail!("REFRESH_TOKEN_TTL_DAYS must be between 1 and {MAX_REFRESH_TTL_DAYS}");
        }

        Ok(Self {
            ttl_days,
            cleanup_interval_secs: env_or("REFRESH_CLEANUP_INTERVAL_SECS", "86400")?,
        })
    }

    pub fn lifetime(&self) -> chrono::Duration {
        chrono::Duration::days(self.ttl_days.clamp(1, MAX_REFRESH_TTL_DAYS))
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }
}

/// Upper bound on the password-reset credential lifetime (one week).
const MAX_RESET_TTL_SECS: i64 = 7 * 24 * 60 * 60;

/// Password-reset credential lifetime
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordResetSettings {
    pub ttl_secs: i64,
}

impl PasswordResetSettings {
    fn from_env() -> Result<Self> {
        let ttl_secs: i64 = env_or("PASSWORD_RESET_TTL_SECS", "86400")?;
        if !(60..=MAX_RESET_TTL_SECS).contains(&ttl_secs) {
            bail!("PASSWORD_RESET_TTL_SECS must be between 60 and {MAX_RESET_TTL_SECS}");
        }

        Ok(Self { ttl_secs })
    }

    pub fn lifetime(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.ttl_secs.clamp(60, MAX_RESET_TTL_SECS))
    }
}

/// Account lockout thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockoutSettings {
    pub max_attempts: u32,
    pub lock_duration_secs: u64,
    pub attempt_expiry_secs: u64,
}

impl LockoutSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            max_attempts: env_or("LOCKOUT_MAX_ATTEMPTS", "5")?,
            lock_duration_secs: env_or("LOCKOUT_DURATION_SECS", "900")?,
            attempt_expiry_secs: env_or("LOCKOUT_ATTEMPT_EXPIRY_SECS", "3600")?,
        })
    }
}

/// Per-route rate limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    pub login_max: u32,
    pub login_window_secs: u64,
    pub default_max: u32,
    pub default_window_secs: u64,
}

impl RateLimitSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            login_max: env_or("RATE_LIMIT_LOGIN_MAX", "10")?,
            login_window_secs: env_or("RATE_LIMIT_LOGIN_WINDOW_SECS", "60")?,
            default_max: env_or("RATE_LIMIT_DEFAULT_MAX", "100")?,
            default_window_secs: env_or("RATE_LIMIT_DEFAULT_WINDOW_SECS", "60")?,
        })
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            login_max: 10,
            login_window_secs: 60,
            default_max: 100,
            default_window_secs: 60,
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Reverse proxies in front of the service that append to
    /// `X-Forwarded-For`. Zero ignores forwarding headers entirely.
    pub trusted_proxy_hops: usize,
}

impl ServerSettings {
    fn from_env() -> Result<Self> {
        Ok(Self {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_or("SERVER_PORT", "8080")?,
            trusted_proxy_hops: env_or("TRUSTED_PROXY_HOPS", "0")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "DATABASE_URL",
        "REDIS_URL",
        "JWT_SECRET",
        "JWT_PRIVATE_KEY",
        "JWT_PUBLIC_KEY",
        "JWT_ALGORITHM",
        "JWT_EXPIRY_SECONDS",
        "REFRESH_TOKEN_TTL_DAYS",
        "PASSWORD_RESET_TTL_SECS",
        "TRUSTED_PROXY_HOPS",
        "LOCKOUT_MAX_ATTEMPTS",
        "SERVER_PORT",
    ];

    fn clear_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    fn set_required() {
        env::set_var("DATABASE_URL", "postgres://localhost/credentials");
        env::set_var("REDIS_URL", "redis://localhost:6379");
        env::set_var("JWT_SECRET", "test-secret");
    }

    #[test]
    #[serial]
    fn test_defaults_apply() {
        clear_env();
        set_required();

        let settings = Settings::load().unwrap();
        assert_eq!(settings.jwt.algorithm, "HS256");
        assert_eq!(settings.jwt.expiry_seconds, 86_400);
        assert_eq!(settings.refresh.ttl_days, 30);
        assert_eq!(settings.lockout.max_attempts, 5);
        assert_eq!(settings.lockout.lock_duration_secs, 900);
        assert_eq!(settings.rate_limit.login_max, 10);
        assert_eq!(settings.database.statement_timeout(), Duration::from_secs(5));
        assert_eq!(settings.password_reset.lifetime(), chrono::Duration::hours(24));
        assert_eq!(settings.server.trusted_proxy_hops, 0);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_pem_keys_select_rs256() {
        clear_env();
        set_required();
        env::set_var("JWT_PRIVATE_KEY", "private-pem");
        env::set_var("JWT_PUBLIC_KEY", "public-pem");

        let settings = Settings::load().unwrap();
        assert_eq!(settings.jwt.algorithm, "RS256");
        assert_eq!(settings.jwt.validation_key.as_deref(), Some("public-pem"));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_missing_secret_fails() {
        clear_env();
        env::set_var("DATABASE_URL", "postgres://localhost/credentials");
        env::set_var("REDIS_URL", "redis://localhost:6379");

        assert!(Settings::load().is_err());

        clear_env();
    }

    #[test]
    #[serial]
    fn test_oversized_refresh_ttl_is_rejected() {
        clear_env();
        set_required();
        env::set_var("REFRESH_TOKEN_TTL_DAYS", "9223372036854775807");

        let err = Settings::load().unwrap_err();
        assert!(err.to_string().contains("REFRESH_TOKEN_TTL_DAYS"));

        env::set_var("REFRESH_TOKEN_TTL_DAYS", "0");
        assert!(Settings::load().is_err());

        env::set_var("REFRESH_TOKEN_TTL_DAYS", "3650");
        let settings = Settings::load().unwrap();
        assert_eq!(settings.refresh.lifetime(), chrono::Duration::days(3650));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_number_is_reported() {
        clear_env();
        set_required();
        env::set_var("SERVER_PORT", "not-a-port");

        let err = Settings::load().unwrap_err();
        assert!(err.to_string().contains("SERVER_PORT"));

        clear_env();
    }
}
