/// Credential Service - Main entry point
use anyhow::{Context, Result};
use redis_utils::RedisPool;
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info};

use credential_service::{
    build_router,
    config::Settings,
    db::{PgCredentialStore, PgResetTokenStore, PgTokenStore},
    fast_store::{FastStore, RedisFastStore},
    security::{AccountLockout, JwtAuthority, LockoutConfig},
    services::{CredentialService, PasswordReset, RoutePolicies, TokenLifecycle, TracingNotifier},
    telemetry, AppState,
};

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();

    let settings = Settings::load().context("Failed to load configuration")?;
    info!(
        "Starting credential service on {}:{}",
        settings.server.host, settings.server.port
    );

    // Initialize database connection pool
    let db_pool = PgPoolOptions::new()
        .max_connections(settings.database.max_connections)
        .acquire_timeout(Duration::from_secs(settings.database.acquire_timeout))
        .connect(&settings.database.url)
        .await
        .context("Failed to connect to PostgreSQL")?;
    info!(
        "Database pool initialized with {} max connections",
        settings.database.max_connections
    );

    // Initialize Redis connection
    let redis_pool = RedisPool::connect(&settings.redis.url)
        .await
        .context("Failed to connect to Redis")?;
    info!("Redis connection manager initialized");

    let statement_timeout = settings.database.statement_timeout();
    let users = Arc::new(PgCredentialStore::new(db_pool.clone(), statement_timeout));
    let token_store = Arc::new(PgTokenStore::new(db_pool.clone(), statement_timeout));
    let reset_store = Arc::new(PgResetTokenStore::new(db_pool, statement_timeout));
    let fast: Arc<dyn FastStore> = Arc::new(RedisFastStore::new(redis_pool.manager()));

    let access = JwtAuthority::from_settings(&settings.jwt, fast.clone())
        .context("Failed to initialize JWT keys")?;
    info!(algorithm = %settings.jwt.algorithm, "JWT authority initialized");

    let tokens = TokenLifecycle::new(token_store, settings.refresh.lifetime());
    let resets = PasswordReset::new(
        reset_store,
        Arc::new(TracingNotifier),
        settings.password_reset.lifetime(),
    );
    let service = Arc::new(CredentialService::new(
        users,
        tokens.clone(),
        resets.clone(),
        Arc::new(access),
        AccountLockout::new(fast.clone(), LockoutConfig::from(&settings.lockout)),
        RoutePolicies::from_settings(fast, &settings.rate_limit),
    ));

    let cleanup = spawn_cleanup(tokens, resets, settings.refresh.cleanup_interval());

    let app = build_router(AppState {
        service,
        trusted_proxy_hops: settings.server.trusted_proxy_hops,
    });
    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("HTTP server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("HTTP server error")?;

    cleanup.abort();
    info!("Credential service stopped");
    Ok(())
}

/// Periodic sweep of expired and used refresh and reset tokens. A failed
/// sweep is logged and retried on the next tick.
fn spawn_cleanup(
    tokens: TokenLifecycle,
    resets: PasswordReset,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            if let Err(e) = tokens.cleanup_expired().await {
                error!(error = %e, "Refresh token cleanup failed");
            }
            if let Err(e) = resets.cleanup_expired().await {
                error!(error = %e, "Password reset cleanup failed");
            }
        }
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
