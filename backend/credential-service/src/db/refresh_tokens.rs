/// Refresh-token database operations
use super::{timed, TokenStore};
use crate::error::{AuthError, Result};
use crate::models::{NewRefreshToken, RefreshToken};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use std::time::Duration;
use uuid::Uuid;

const TOKEN_COLUMNS: &str = "id, user_id, token, used, revoked_at, expires_at, previous_id, \
                             device_info, ip_address, created_at, updated_at";

pub struct PgTokenStore {
    pool: PgPool,
    statement_timeout: Duration,
}

impl PgTokenStore {
    pub fn new(pool: PgPool, statement_timeout: Duration) -> Self {
        Self {
            pool,
            statement_timeout,
        }
    }

    async fn insert(
        tx: &mut Transaction<'_, Postgres>,
        token: &NewRefreshToken,
        now: DateTime<Utc>,
    ) -> Result<RefreshToken> {
        let query = format!(
            r#"
            INSERT INTO refresh_tokens (id, user_id, token, used, expires_at, previous_id,
                                        device_info, ip_address, created_at, updated_at)
            VALUES ($1, $2, $3, false, $4, $5, $6, $7, $8, $8)
            RETURNING {TOKEN_COLUMNS}
            "#
        );

        let record = sqlx::query_as::<_, RefreshToken>(&query)
            .bind(Uuid::new_v4())
            .bind(token.user_id)
            .bind(&token.token)
            .bind(token.expires_at)
            .bind(token.previous_id)
            .bind(&token.device_info)
            .bind(&token.ip_address)
            .bind(now)
            .fetch_one(&mut **tx)
            .await?;

        Ok(record)
    }
}

#[async_trait]
impl TokenStore for PgTokenStore {
    async fn create(&self, token: NewRefreshToken) -> Result<RefreshToken> {
        timed(self.statement_timeout, async {
            let mut tx = self.pool.begin().await?;
            let record = Self::insert(&mut tx, &token, Utc::now()).await?;
            tx.commit().await?;
            Ok(record)
        })
        .await
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<RefreshToken>> {
        let query = format!("SELECT {TOKEN_COLUMNS} FROM refresh_tokens WHERE token = $1");

        timed(self.statement_timeout, async {
            let record = sqlx::query_as::<_, RefreshToken>(&query)
                .bind(token)
                .fetch_optional(&self.pool)
                .await?;
            Ok(record)
        })
        .await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<RefreshToken>> {
        let query = format!("SELECT {TOKEN_COLUMNS} FROM refresh_tokens WHERE id = $1");

        timed(self.statement_timeout, async {
            let record = sqlx::query_as::<_, RefreshToken>(&query)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(record)
        })
        .await
    }

    async fn rotate(
        &self,
        current_id: Uuid,
        successor: NewRefreshToken,
        now: DateTime<Utc>,
    ) -> Result<RefreshToken> {
        timed(self.statement_timeout, async {
            let mut tx = self.pool.begin().await?;

            // Guarded by the live predicate: of two concurrent rotations only the
            // first to take the row lock sees used = false.
            let marked = sqlx::query(
                r#"
                UPDATE refresh_tokens
                SET used = true, updated_at = $1
                WHERE id = $2
                  AND used = false
                  AND revoked_at IS NULL
                  AND expires_at > $1
                "#,
            )
            .bind(now)
            .bind(current_id)
            .execute(&mut *tx)
            .await?;

            if marked.rows_affected() == 0 {
                let query = format!("SELECT {TOKEN_COLUMNS} FROM refresh_tokens WHERE id = $1");
                let current = sqlx::query_as::<_, RefreshToken>(&query)
                    .bind(current_id)
                    .fetch_optional(&mut *tx)
                    .await?;
                tx.rollback().await?;

                return match current {
                    None => Err(AuthError::InvalidToken),
                    Some(record) => match record.ensure_live(now) {
                        Err(e) => Err(e),
                        Ok(()) => Err(AuthError::TokenUsed),
                    },
                };
            }

            let record = Self::insert(&mut tx, &successor, now).await?;
            tx.commit().await?;
            Ok(record)
        })
        .await
    }

    async fn revoke(&self, token: &str, at: DateTime<Utc>) -> Result<()> {
        timed(self.statement_timeout, async {
            let result = sqlx::query(
                r#"
                UPDATE refresh_tokens
                SET revoked_at = COALESCE(revoked_at, $1),
                    updated_at = CASE WHEN revoked_at IS NULL THEN $1 ELSE updated_at END
                WHERE token = $2
                "#,
            )
            .bind(at)
            .bind(token)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(AuthError::NotFound);
            }
            Ok(())
        })
        .await
    }

    async fn revoke_all_for_user(&self, user_id: i64, at: DateTime<Utc>) -> Result<u64> {
        timed(self.statement_timeout, async {
            let result = sqlx::query(
                r#"
                UPDATE refresh_tokens
                SET revoked_at = $1, updated_at = $1
                WHERE user_id = $2 AND revoked_at IS NULL
                "#,
            )
            .bind(at)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

            Ok(result.rows_affected())
        })
        .await
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        timed(self.statement_timeout, async {
            let result = sqlx::query(
                r#"
                DELETE FROM refresh_tokens
                WHERE expires_at < $1 OR used = true
                "#,
            )
            .bind(now)
            .execute(&self.pool)
            .await?;

            Ok(result.rows_affected())
        })
        .await
    }
}
