/// HTTP boundary for the credential service
///
/// Handlers translate requests into service calls and let `AuthError`'s
/// `IntoResponse` pick the status. Caller address and device descriptor are
/// resolved here and passed down as opaque strings.
mod handlers;

pub use handlers::{
    client_context, ChangePasswordRequest, ConfirmResetRequest, LoginRequest, LogoutAllResponse,
    LogoutRequest, MessageResponse, PasswordResetRequest, RefreshRequest, RegisterRequest,
    RegisterResponse, ResetTokenRequest,
};

use crate::services::CredentialService;
use axum::{
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Shared HTTP server state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<CredentialService>,
    /// Proxies trusted to append to `X-Forwarded-For`.
    pub trusted_proxy_hops: usize,
}

/// Build the HTTP router with all auth endpoints
pub fn build_router(state: AppState) -> Router {
    let auth = Router::new()
        .route("/register", post(handlers::register))
        .route("/login", post(handlers::login))
        .route("/refresh", post(handlers::refresh))
        .route("/logout", post(handlers::logout))
        .route("/logout-all", post(handlers::logout_all))
        .route("/change-password", post(handlers::change_password))
        .route("/password-reset/request", post(handlers::request_password_reset))
        .route("/password-reset/validate", post(handlers::validate_reset_token))
        .route("/password-reset/confirm", post(handlers::confirm_password_reset));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1/auth", auth)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
