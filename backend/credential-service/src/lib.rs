/// Credential Service Library
///
/// Issues, rotates, revokes and validates session credentials and protects
/// the login path from abuse.
///
/// ## Modules
///
/// - `config`: Service configuration
/// - `db`: Identity and refresh-token stores (Postgres and in-memory)
/// - `error`: Error taxonomy and HTTP mapping
/// - `fast_store`: Lockout counters, rate-limit windows and the blacklist
/// - `http`: axum routes and handlers
/// - `models`: Data models
/// - `security`: Password hashing, access tokens, lockout, rate limiting
/// - `services`: Refresh-token lifecycle and the credential service
/// - `telemetry`: Tracing subscriber setup
pub mod config;
pub mod db;
pub mod error;
pub mod fast_store;
pub mod http;
pub mod models;
pub mod security;
pub mod services;
pub mod telemetry;

// Re-export commonly used types
pub use error::{AuthError, Result};
pub use http::{build_router, AppState};
pub use services::{ClientContext, CredentialService, TokenLifecycle, TokenPair};
