/// Refresh-token record
use crate::error::{AuthError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One link in a session's refresh-token chain.
///
/// Records are append-only: rotation marks a record `used` and inserts its
/// successor pointing back through `previous_id`; revocation stamps
/// `revoked_at`. Nothing else mutates a record.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RefreshToken {
    pub id: Uuid,
    pub user_id: i64,
    #[serde(skip_serializing)]
    pub token: String,
    pub used: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub previous_id: Option<Uuid>,
    pub device_info: String,
    pub ip_address: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RefreshToken {
    /// A token is live iff it is unused, unrevoked and unexpired.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        !self.used && self.revoked_at.is_none() && self.expires_at > now
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    /// Classify why a record cannot be exchanged.
    ///
    /// Revocation wins over reuse, reuse over expiry: a revoked chain should be
    /// reported as revoked even if the caller replays an old link.
    pub fn ensure_live(&self, now: DateTime<Utc>) -> Result<()> {
        if self.is_revoked() {
            Err(AuthError::TokenRevoked)
        } else if self.used {
            Err(AuthError::TokenUsed)
        } else if self.is_expired(now) {
            Err(AuthError::TokenExpired)
        } else {
            Ok(())
        }
    }
}

/// Insert payload for a refresh-token record.
#[derive(Debug, Clone)]
pub struct NewRefreshToken {
    pub user_id: i64,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub previous_id: Option<Uuid>,
    pub device_info: String,
    pub ip_address: String,
}

impl NewRefreshToken {
    /// Materialise the record the way the database would on insert.
    pub fn into_record(self, id: Uuid, now: DateTime<Utc>) -> RefreshToken {
        RefreshToken {
            id,
            user_id: self.user_id,
            token: self.token,
            used: false,
            revoked_at: None,
            expires_at: self.expires_at,
            previous_id: self.previous_id,
            device_info: self.device_info,
            ip_address: self.ip_address,
            created_at: now,
            updated_at: now,
        }
    }
}
