/// Authentication handlers
use super::AppState;
use crate::error::{AuthError, Result};
use crate::services::{ClientContext, TokenPair};
use axum::{
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub user_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct LogoutRequest {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct PasswordResetRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetTokenRequest {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmResetRequest {
    pub token: String,
    pub new_password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

const RESET_REQUESTED: &str = "If the address is registered, a reset link has been sent";

#[derive(Debug, Serialize, Deserialize)]
pub struct LogoutAllResponse {
    pub revoked_sessions: u64,
}

pub async fn register(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>)> {
    let ctx = client_context(&headers, connect_info, state.trusted_proxy_hops);
    let user_id = state
        .service
        .register(
            &payload.email,
            &payload.password,
            &payload.first_name,
            &payload.last_name,
            &ctx,
        )
        .await?;

    Ok((StatusCode::CREATED, Json(RegisterResponse { user_id })))
}

pub async fn login(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<TokenPair>> {
    let ctx = client_context(&headers, connect_info, state.trusted_proxy_hops);
    let pair = state
        .service
        .login(&payload.email, &payload.password, &ctx)
        .await?;

    Ok(Json(pair))
}

pub async fn refresh(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<TokenPair>> {
    let ctx = client_context(&headers, connect_info, state.trusted_proxy_hops);
    let pair = state.service.refresh(&payload.refresh_token, &ctx).await?;

    Ok(Json(pair))
}

/// The body is optional; without a refresh token only the access token is
/// revoked.
pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Option<Json<LogoutRequest>>,
) -> Result<StatusCode> {
    let access_token = bearer_token(&headers)?;
    let Json(payload) = payload.unwrap_or_default();

    state
        .service
        .logout(access_token, payload.refresh_token.as_deref())
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn logout_all(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<LogoutAllResponse>> {
    let access_token = bearer_token(&headers)?;
    let revoked_sessions = state.service.logout_everywhere(access_token).await?;

    Ok(Json(LogoutAllResponse { revoked_sessions }))
}

pub async fn change_password(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<StatusCode> {
    let access_token = bearer_token(&headers)?;
    state
        .service
        .change_password(access_token, &payload.current_password, &payload.new_password)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Always 202 with the same body, known email or not.
pub async fn request_password_reset(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(payload): Json<PasswordResetRequest>,
) -> Result<(StatusCode, Json<MessageResponse>)> {
    let ctx = client_context(&headers, connect_info, state.trusted_proxy_hops);
    state
        .service
        .request_password_reset(&payload.email, &ctx)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(MessageResponse {
            message: RESET_REQUESTED.to_string(),
        }),
    ))
}

pub async fn validate_reset_token(
    State(state): State<AppState>,
    Json(payload): Json<ResetTokenRequest>,
) -> Result<StatusCode> {
    state.service.validate_reset_token(&payload.token).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn confirm_password_reset(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(payload): Json<ConfirmResetRequest>,
) -> Result<StatusCode> {
    let ctx = client_context(&headers, connect_info, state.trusted_proxy_hops);
    state
        .service
        .reset_password(&payload.token, &payload.new_password, &ctx)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

fn bearer_token(headers: &HeaderMap) -> Result<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(AuthError::InvalidToken)
}

/// Caller address and device descriptor.
///
/// Forwarding headers are only honoured behind `trusted_proxy_hops` known
/// proxies; otherwise the socket peer is the address, whatever the client
/// claims.
pub fn client_context(
    headers: &HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    trusted_proxy_hops: usize,
) -> ClientContext {
    let ip_address = forwarded_client(headers, trusted_proxy_hops)
        .or_else(|| connect_info.map(|ConnectInfo(addr)| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string());

    let device_info = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    ClientContext::new(ip_address, device_info)
}

/// Each trusted proxy appends the address it received the request from, so
/// the client sits `hops` entries from the right of `X-Forwarded-For`.
/// Entries further left were written by the caller and are ignored.
fn forwarded_client(headers: &HeaderMap, hops: usize) -> Option<String> {
    if hops == 0 {
        return None;
    }

    let chain: Vec<&str> = headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|s| s.split(','))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    if chain.is_empty() {
        return headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from);
    }

    let index = chain.len().saturating_sub(hops);
    Some(chain[index].to_string())
}
