/// Password-reset credential database operations
use super::{timed, ResetTokenStore};
use crate::error::{AuthError, Result};
use crate::models::{NewResetToken, ResetToken};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

const RESET_COLUMNS: &str = "id, user_id, token_hash, expires_at, used_at, created_at";

pub struct PgResetTokenStore {
    pool: PgPool,
    statement_timeout: Duration,
}

impl PgResetTokenStore {
    pub fn new(pool: PgPool, statement_timeout: Duration) -> Self {
        Self {
            pool,
            statement_timeout,
        }
    }
}

#[async_trait]
impl ResetTokenStore for PgResetTokenStore {
    async fn replace(&self, token: NewResetToken) -> Result<ResetToken> {
        timed(self.statement_timeout, async {
            let mut tx = self.pool.begin().await?;

            sqlx::query("DELETE FROM password_reset_tokens WHERE user_id = $1 AND used_at IS NULL")
                .bind(token.user_id)
                .execute(&mut *tx)
                .await?;

            let query = format!(
                r#"
                INSERT INTO password_reset_tokens (id, user_id, token_hash, expires_at, created_at)
                VALUES ($1, $2, $3, $4, NOW())
                RETURNING {RESET_COLUMNS}
                "#
            );
            let record = sqlx::query_as::<_, ResetToken>(&query)
                .bind(Uuid::new_v4())
                .bind(token.user_id)
                .bind(&token.token_hash)
                .bind(token.expires_at)
                .fetch_one(&mut *tx)
                .await?;

            tx.commit().await?;
            Ok(record)
        })
        .await
    }

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<ResetToken>> {
        let query =
            format!("SELECT {RESET_COLUMNS} FROM password_reset_tokens WHERE token_hash = $1");

        timed(self.statement_timeout, async {
            let record = sqlx::query_as::<_, ResetToken>(&query)
                .bind(token_hash)
                .fetch_optional(&self.pool)
                .await?;
            Ok(record)
        })
        .await
    }

    async fn consume(&self, token_hash: &str, now: DateTime<Utc>) -> Result<ResetToken> {
        let update = format!(
            r#"
            UPDATE password_reset_tokens
            SET used_at = $1
            WHERE token_hash = $2
              AND used_at IS NULL
              AND expires_at > $1
            RETURNING {RESET_COLUMNS}
            "#
        );

        timed(self.statement_timeout, async {
            let consumed = sqlx::query_as::<_, ResetToken>(&update)
                .bind(now)
                .bind(token_hash)
                .fetch_optional(&self.pool)
                .await?;

            if let Some(record) = consumed {
                return Ok(record);
            }

            let query =
                format!("SELECT {RESET_COLUMNS} FROM password_reset_tokens WHERE token_hash = $1");
            let current = sqlx::query_as::<_, ResetToken>(&query)
                .bind(token_hash)
                .fetch_optional(&self.pool)
                .await?;

            match current {
                None => Err(AuthError::InvalidToken),
                Some(record) => match record.ensure_live(now) {
                    Err(e) => Err(e),
                    Ok(()) => Err(AuthError::TokenUsed),
                },
            }
        })
        .await
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        timed(self.statement_timeout, async {
            let result = sqlx::query(
                r#"
                DELETE FROM password_reset_tokens
                WHERE expires_at < $1 OR used_at IS NOT NULL
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
