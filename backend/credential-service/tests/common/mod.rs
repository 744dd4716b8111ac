use async_trait::async_trait;
use chrono::{DateTime, Utc};
use credential_service::config::RateLimitSettings;
use credential_service::db::{MemoryCredentialStore, MemoryResetTokenStore, MemoryTokenStore};
use credential_service::fast_store::MemoryFastStore;
use credential_service::models::User;
use credential_service::security::{AccountLockout, JwtAuthority, LockoutConfig};
use credential_service::services::{
    CredentialService, PasswordReset, ResetNotifier, RoutePolicies, TokenLifecycle,
};
use credential_service::ClientContext;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const JWT_SECRET: &str = "integration-test-secret";

/// Captures reset tokens in place of a mail channel.
#[derive(Default)]
pub struct Outbox {
    sent: Mutex<Vec<(String, String)>>,
}

#[allow(dead_code)]
impl Outbox {
    /// Most recent token sent to `email`.
    pub fn token_for(&self, email: &str) -> Option<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(to, _)| to == email)
            .map(|(_, token)| token.clone())
    }

    pub fn len(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl ResetNotifier for Outbox {
    async fn send_reset(
        &self,
        user: &User,
        token: &str,
        _expires_at: DateTime<Utc>,
    ) -> credential_service::Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((user.email.clone(), token.to_string()));
        Ok(())
    }
}

/// Service wired to in-memory stores, with handles to the stores for
/// inspection.
#[allow(dead_code)]
pub struct Harness {
    pub service: Arc<CredentialService>,
    pub users: Arc<MemoryCredentialStore>,
    pub tokens: Arc<MemoryTokenStore>,
    pub resets: Arc<MemoryResetTokenStore>,
    pub outbox: Arc<Outbox>,
    pub fast: Arc<MemoryFastStore>,
}

#[allow(dead_code)]
pub fn harness() -> Harness {
    harness_with(Duration::from_secs(3600), RateLimitSettings::default())
}

pub fn harness_with(access_expiry: Duration, limits: RateLimitSettings) -> Harness {
    let users = Arc::new(MemoryCredentialStore::new());
    let tokens = Arc::new(MemoryTokenStore::new());
    let resets = Arc::new(MemoryResetTokenStore::new());
    let outbox = Arc::new(Outbox::default());
    let fast = Arc::new(MemoryFastStore::new());

    let service = CredentialService::new(
        users.clone(),
        TokenLifecycle::new(tokens.clone(), chrono::Duration::days(30)),
        PasswordReset::new(resets.clone(), outbox.clone(), chrono::Duration::hours(24)),
        Arc::new(JwtAuthority::with_secret(JWT_SECRET, access_expiry, fast.clone())),
        AccountLockout::new(fast.clone(), LockoutConfig::default()),
        RoutePolicies::from_settings(fast.clone(), &limits),
    );

    Harness {
        service: Arc::new(service),
        users,
        tokens,
        resets,
        outbox,
        fast,
    }
}

#[allow(dead_code)]
pub fn client() -> ClientContext {
    ClientContext::new("203.0.113.10", "integration-test/1.0")
}
