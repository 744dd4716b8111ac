//! In-memory credential and token stores.
//!
//! Single-process stand-ins for Postgres with the same atomicity guarantees:
//! every operation runs under one mutex acquisition and never awaits while
//! holding it. Used by the test suites and for local runs without a database.

use super::{CredentialStore, ResetTokenStore, TokenStore};
use crate::error::{AuthError, Result};
use crate::models::{NewRefreshToken, NewResetToken, NewUser, RefreshToken, ResetToken, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| AuthError::Internal("in-memory store lock poisoned".to_string()))
}

#[derive(Default)]
struct UserTable {
    next_id: i64,
    rows: HashMap<i64, User>,
}

#[derive(Default)]
pub struct MemoryCredentialStore {
    table: Mutex<UserTable>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let table = lock(&self.table)?;
        Ok(table
            .rows
            .values()
            .find(|u| u.email == email && !u.is_deleted())
            .cloned())
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<User>> {
        let table = lock(&self.table)?;
        Ok(table.rows.get(&id).filter(|u| !u.is_deleted()).cloned())
    }

    async fn create(&self, user: NewUser) -> Result<i64> {
        let mut table = lock(&self.table)?;
        if table.rows.values().any(|u| u.email == user.email) {
            return Err(AuthError::EmailAlreadyExists);
        }

        table.next_id += 1;
        let id = table.next_id;
        let now = Utc::now();
        table.rows.insert(
            id,
            User {
                id,
                email: user.email,
                password_hash: user.password_hash,
                first_name: user.first_name,
                last_name: user.last_name,
                created_at: now,
                updated_at: now,
                deleted_at: None,
            },
        );
        Ok(id)
    }

    async fn update(&self, user: &User) -> Result<()> {
        let mut table = lock(&self.table)?;
        if table
            .rows
            .values()
            .any(|u| u.id != user.id && u.email == user.email)
        {
            return Err(AuthError::EmailAlreadyExists);
        }

        let row = table.rows.get_mut(&user.id).ok_or(AuthError::NotFound)?;
        *row = User {
            updated_at: Utc::now(),
            ..user.clone()
        };
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryTokenStore {
    rows: Mutex<HashMap<Uuid, RefreshToken>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records, live or not.
    pub fn len(&self) -> usize {
        self.rows.lock().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(rows: &mut HashMap<Uuid, RefreshToken>, token: NewRefreshToken) -> Result<RefreshToken> {
        if rows.values().any(|r| r.token == token.token) {
            return Err(AuthError::Internal("duplicate refresh token".to_string()));
        }
        if let Some(previous_id) = token.previous_id {
            match rows.get(&previous_id) {
                Some(prev) if prev.user_id == token.user_id => {}
                _ => return Err(AuthError::InvalidToken),
            }
        }

        let record = token.into_record(Uuid::new_v4(), Utc::now());
        rows.insert(record.id, record.clone());
        Ok(record)
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn create(&self, token: NewRefreshToken) -> Result<RefreshToken> {
        let mut rows = lock(&self.rows)?;
        Self::insert(&mut rows, token)
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<RefreshToken>> {
        let rows = lock(&self.rows)?;
        Ok(rows.values().find(|r| r.token == token).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<RefreshToken>> {
        let rows = lock(&self.rows)?;
        Ok(rows.get(&id).cloned())
    }

    async fn rotate(
        &self,
        current_id: Uuid,
        successor: NewRefreshToken,
        now: DateTime<Utc>,
    ) -> Result<RefreshToken> {
        let mut rows = lock(&self.rows)?;

        let current = rows.get(&current_id).ok_or(AuthError::InvalidToken)?;
        current.ensure_live(now)?;

        let record = Self::insert(&mut rows, successor)?;
        if let Some(current) = rows.get_mut(&current_id) {
            current.used = true;
            current.updated_at = now;
        }
        Ok(record)
    }

    async fn revoke(&self, token: &str, at: DateTime<Utc>) -> Result<()> {
        let mut rows = lock(&self.rows)?;
        let record = rows
            .values_mut()
            .find(|r| r.token == token)
            .ok_or(AuthError::NotFound)?;

        if record.revoked_at.is_none() {
            record.revoked_at = Some(at);
            record.updated_at = at;
        }
        Ok(())
    }

    async fn revoke_all_for_user(&self, user_id: i64, at: DateTime<Utc>) -> Result<u64> {
        let mut rows = lock(&self.rows)?;
        let mut revoked = 0;
        for record in rows
            .values_mut()
            .filter(|r| r.user_id == user_id && r.revoked_at.is_none())
        {
            record.revoked_at = Some(at);
            record.updated_at = at;
            revoked += 1;
        }
        Ok(revoked)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut rows = lock(&self.rows)?;
        let before = rows.len();
        rows.retain(|_, r| !(r.expires_at < now || r.used));

        // Mirrors ON DELETE SET NULL on previous_id.
        let remaining: Vec<Uuid> = rows.keys().copied().collect();
        for record in rows.values_mut() {
            if let Some(prev) = record.previous_id {
                if !remaining.contains(&prev) {
                    record.previous_id = None;
                }
            }
        }

        Ok((before - rows.len()) as u64)
    }
}

#[derive(Default)]
pub struct MemoryResetTokenStore {
    rows: Mutex<HashMap<Uuid, ResetToken>>,
}

impl MemoryResetTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResetTokenStore for MemoryResetTokenStore {
    async fn replace(&self, token: NewResetToken) -> Result<ResetToken> {
        let mut rows = lock(&self.rows)?;
        if rows.values().any(|r| r.token_hash == token.token_hash) {
            return Err(AuthError::Internal("duplicate reset token".to_string()));
        }

        rows.retain(|_, r| r.user_id != token.user_id || r.used_at.is_some());
        let record = token.into_record(Uuid::new_v4(), Utc::now());
        rows.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<ResetToken>> {
        let rows = lock(&self.rows)?;
        Ok(rows.values().find(|r| r.token_hash == token_hash).cloned())
    }

    async fn consume(&self, token_hash: &str, now: DateTime<Utc>) -> Result<ResetToken> {
        let mut rows = lock(&self.rows)?;
        let record = rows
            .values_mut()
            .find(|r| r.token_hash == token_hash)
            .ok_or(AuthError::InvalidToken)?;

        record.ensure_live(now)?;
        record.used_at = Some(now);
        Ok(record.clone())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut rows = lock(&self.rows)?;
        let before = rows.len();
        rows.retain(|_, r| !(r.expires_at < now || r.used_at.is_some()));
        Ok((before - rows.len()) as u64)
    }
}
