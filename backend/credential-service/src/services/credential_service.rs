/// Credential service: registration, login, refresh, logout and password reset
///
/// Composes the stores, the access-token authority, the lockout guard and the
/// per-route rate limits. Every error kind is passed through unchanged; the
/// HTTP boundary decides what the client gets to see.
use crate::config::RateLimitSettings;
use crate::db::CredentialStore;
use crate::error::{AuthError, Result};
use crate::fast_store::FastStore;
use crate::models::{NewUser, User};
use crate::security::password::{hash_password, reject_unknown_identity, verify_password};
use crate::security::{
    AccessTokenAuthority, AccountLockout, RateLimitConfig, RateLimiter, RoutePolicy,
    StoreFailurePolicy,
};
use crate::services::password_reset::PasswordReset;
use crate::services::token_lifecycle::TokenLifecycle;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Caller metadata supplied by the boundary; opaque to the core.
#[derive(Debug, Clone, Default)]
pub struct ClientContext {
    pub ip_address: String,
    pub device_info: String,
}

impl ClientContext {
    pub fn new(ip_address: impl Into<String>, device_info: impl Into<String>) -> Self {
        Self {
            ip_address: ip_address.into(),
            device_info: device_info.into(),
        }
    }
}

/// Token pair returned by login and refresh
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

/// Rate limits for each public operation.
#[derive(Clone)]
pub struct RoutePolicies {
    pub login: RoutePolicy,
    pub register: RoutePolicy,
    pub refresh: RoutePolicy,
    /// Shared by requesting and confirming a reset.
    pub password_reset: RoutePolicy,
}

impl RoutePolicies {
    /// Login and password reset fail closed when the limiter is unreachable;
    /// registration and refresh fail open.
    pub fn from_settings(store: Arc<dyn FastStore>, settings: &RateLimitSettings) -> Self {
        let login = RateLimitConfig::new(
            settings.login_max,
            Duration::from_secs(settings.login_window_secs),
        );
        let default = RateLimitConfig::new(
            settings.default_max,
            Duration::from_secs(settings.default_window_secs),
        );

        Self {
            login: RoutePolicy::new(
                RateLimiter::new(store.clone(), "login", login),
                StoreFailurePolicy::FailClosed,
            ),
            register: RoutePolicy::new(
                RateLimiter::new(store.clone(), "register", default),
                StoreFailurePolicy::FailOpen,
            ),
            refresh: RoutePolicy::new(
                RateLimiter::new(store.clone(), "refresh", default),
                StoreFailurePolicy::FailOpen,
            ),
            password_reset: RoutePolicy::new(
                RateLimiter::new(store, "password_reset", default),
                StoreFailurePolicy::FailClosed,
            ),
        }
    }
}

pub struct CredentialService {
    users: Arc<dyn CredentialStore>,
    tokens: TokenLifecycle,
    resets: PasswordReset,
    access: Arc<dyn AccessTokenAuthority>,
    lockout: AccountLockout,
    limits: RoutePolicies,
}

impl CredentialService {
    pub fn new(
        users: Arc<dyn CredentialStore>,
        tokens: TokenLifecycle,
        resets: PasswordReset,
        access: Arc<dyn AccessTokenAuthority>,
        lockout: AccountLockout,
        limits: RoutePolicies,
    ) -> Self {
        Self {
            users,
            tokens,
            resets,
            access,
            lockout,
            limits,
        }
    }

    pub fn tokens(&self) -> &TokenLifecycle {
        &self.tokens
    }

    pub fn lockout(&self) -> &AccountLockout {
        &self.lockout
    }

    pub fn resets(&self) -> &PasswordReset {
        &self.resets
    }

    /// Create an identity and return its id.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        first_name: &str,
        last_name: &str,
        ctx: &ClientContext,
    ) -> Result<i64> {
        self.limits.register.admit(&ctx.ip_address).await?;

        if email.trim().is_empty() {
            return Err(AuthError::Validation("email is required".to_string()));
        }
        if password.is_empty() {
            return Err(AuthError::Validation("password is required".to_string()));
        }

        let password_hash = hash_password(password)?;
        let user_id = self
            .users
            .create(NewUser {
                email: email.to_string(),
                password_hash,
                first_name: first_name.to_string(),
                last_name: last_name.to_string(),
            })
            .await?;

        tracing::info!(user_id, "User registered");
        Ok(user_id)
    }

    /// Authenticate with email and password.
    ///
    /// Unknown emails are indistinguishable from wrong passwords: both burn a
    /// hash verification and both count against the lockout.
    pub async fn login(&self, email: &str, password: &str, ctx: &ClientContext) -> Result<TokenPair> {
        self.limits.login.admit(&ctx.ip_address).await?;

        if self.lockout.is_locked(email).await? {
            tracing::info!(ip = %ctx.ip_address, "Login refused for locked account");
            return Err(AuthError::AccountLocked);
        }

        let user = match self.users.find_by_email(email).await? {
            Some(user) => user,
            None => {
                let err = reject_unknown_identity(password);
                self.count_failure(email).await?;
                return Err(err);
            }
        };

        match verify_password(password, &user.password_hash) {
            Ok(()) => {}
            Err(AuthError::InvalidCredentials) => {
                self.count_failure(email).await?;
                return Err(AuthError::InvalidCredentials);
            }
            Err(e) => return Err(e),
        }

        self.lockout.reset_attempts(email).await?;

        let pair = self.issue_pair(user.id, ctx).await?;
        tracing::info!(user_id = user.id, ip = %ctx.ip_address, "User logged in");
        Ok(pair)
    }

    /// Exchange a refresh token for a new pair.
    pub async fn refresh(&self, refresh_token: &str, ctx: &ClientContext) -> Result<TokenPair> {
        self.limits.refresh.admit(&ctx.ip_address).await?;

        let rotated = self
            .tokens
            .rotate(refresh_token, &ctx.device_info, &ctx.ip_address)
            .await?;
        let user_id = rotated.record.user_id;

        if self.users.find_by_id(user_id).await?.is_none() {
            tracing::warn!(user_id, "Refresh for missing or deleted user, revoking sessions");
            self.tokens.revoke_all(user_id).await?;
            return Err(AuthError::InvalidToken);
        }

        let access = self.access.issue(user_id)?;
        Ok(TokenPair {
            access_token: access.token,
            refresh_token: rotated.token,
            token_type: "Bearer".to_string(),
            expires_in: access.expires_in,
        })
    }

    /// Blacklist the access token and revoke the refresh token if one is
    /// given. An unknown refresh token does not fail the logout.
    pub async fn logout(&self, access_token: &str, refresh_token: Option<&str>) -> Result<()> {
        let claims = self.access.validate(access_token).await?;
        self.access.blacklist(access_token).await?;

        if let Some(refresh_token) = refresh_token {
            match self.tokens.revoke(refresh_token).await {
                Ok(()) | Err(AuthError::NotFound) => {}
                Err(e) => return Err(e),
            }
        }

        tracing::info!(user_id = %claims.sub, "User logged out");
        Ok(())
    }

    /// Blacklist the presented access token and revoke every refresh token of
    /// its owner.
    pub async fn logout_everywhere(&self, access_token: &str) -> Result<u64> {
        let claims = self.access.validate(access_token).await?;
        let user_id = claims.user_id()?;

        self.access.blacklist(access_token).await?;
        self.tokens.revoke_all(user_id).await
    }

    /// Replace the password and end every existing session.
    pub async fn change_password(
        &self,
        access_token: &str,
        current_password: &str,
        new_password: &str,
    ) -> Result<()> {
        let mut user = self.authenticate(access_token).await?;
        verify_password(current_password, &user.password_hash)?;

        if new_password.is_empty() {
            return Err(AuthError::Validation("password is required".to_string()));
        }

        user.password_hash = hash_password(new_password)?;
        self.users.update(&user).await?;

        self.access.blacklist(access_token).await?;
        self.tokens.revoke_all(user.id).await?;

        tracing::info!(user_id = user.id, "Password changed, sessions revoked");
        Ok(())
    }

    /// Start a password reset. Succeeds identically whether or not the email
    /// belongs to a live identity; only a known one gets a credential.
    pub async fn request_password_reset(&self, email: &str, ctx: &ClientContext) -> Result<()> {
        self.limits.password_reset.admit(&ctx.ip_address).await?;

        match self.users.find_by_email(email).await? {
            Some(user) => {
                self.resets.issue(&user).await?;
                tracing::info!(
                    user_id = user.id,
                    ip = %ctx.ip_address,
                    "Password reset requested"
                );
            }
            None => {
                tracing::debug!(
                    ip = %ctx.ip_address,
                    "Password reset requested for unknown identity"
                );
            }
        }
        Ok(())
    }

    /// Check a reset credential without spending it.
    pub async fn validate_reset_token(&self, token: &str) -> Result<()> {
        let user_id = self.resets.validate(token).await?;
        match self.users.find_by_id(user_id).await? {
            Some(_) => Ok(()),
            None => Err(AuthError::InvalidToken),
        }
    }

    /// Spend a reset credential, replace the password and end every session.
    /// Pending lockout state for the identity is cleared.
    pub async fn reset_password(
        &self,
        token: &str,
        new_password: &str,
        ctx: &ClientContext,
    ) -> Result<()> {
        self.limits.password_reset.admit(&ctx.ip_address).await?;

        if new_password.is_empty() {
            return Err(AuthError::Validation("password is required".to_string()));
        }

        let user_id = self.resets.consume(token).await?;
        let mut user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::InvalidToken)?;

        user.password_hash = hash_password(new_password)?;
        self.users.update(&user).await?;

        let revoked = self.tokens.revoke_all(user.id).await?;
        self.lockout.reset_attempts(&user.email).await?;

        tracing::info!(user_id = user.id, revoked, "Password reset, sessions revoked");
        Ok(())
    }

    /// Resolve a bearer token to its live identity.
    pub async fn authenticate(&self, access_token: &str) -> Result<User> {
        let claims = self.access.validate(access_token).await?;
        self.users
            .find_by_id(claims.user_id()?)
            .await?
            .ok_or(AuthError::InvalidToken)
    }

    async fn issue_pair(&self, user_id: i64, ctx: &ClientContext) -> Result<TokenPair> {
        let access = self.access.issue(user_id)?;
        let refresh_token = self
            .tokens
            .issue(user_id, &ctx.device_info, &ctx.ip_address)
            .await?;

        Ok(TokenPair {
            access_token: access.token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: access.expires_in,
        })
    }

    /// Count a failed login. A lock tripped by a concurrent attempt surfaces
    /// as `AccountLocked`.
    async fn count_failure(&self, email: &str) -> Result<()> {
        let outcome = self.lockout.record_failed_attempt(email).await?;
        tracing::debug!(
            attempts = outcome.attempts,
            remaining = outcome.remaining,
            "Failed login recorded"
        );
        Ok(())
    }
}
