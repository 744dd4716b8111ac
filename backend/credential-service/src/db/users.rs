/// User database operations
use super::{timed, CredentialStore};
use crate::error::{AuthError, Result};
use crate::models::{NewUser, User};
use async_trait::async_trait;
use sqlx::PgPool;
use std::time::Duration;

const USER_COLUMNS: &str =
    "id, email, password_hash, first_name, last_name, created_at, updated_at, deleted_at";

pub struct PgCredentialStore {
    pool: PgPool,
    statement_timeout: Duration,
}

impl PgCredentialStore {
    pub fn new(pool: PgPool, statement_timeout: Duration) -> Self {
        Self {
            pool,
            statement_timeout,
        }
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let query = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1 AND deleted_at IS NULL"
        );

        timed(self.statement_timeout, async {
            let user = sqlx::query_as::<_, User>(&query)
                .bind(email)
                .fetch_optional(&self.pool)
                .await?;
            Ok(user)
        })
        .await
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<User>> {
        let query =
            format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1 AND deleted_at IS NULL");

        timed(self.statement_timeout, async {
            let user = sqlx::query_as::<_, User>(&query)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(user)
        })
        .await
    }

    async fn create(&self, user: NewUser) -> Result<i64> {
        timed(self.statement_timeout, async {
            let inserted = sqlx::query_scalar::<_, i64>(
                r#"
                INSERT INTO users (email, password_hash, first_name, last_name, created_at, updated_at)
                VALUES ($1, $2, $3, $4, NOW(), NOW())
                RETURNING id
                "#,
            )
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.first_name)
            .bind(&user.last_name)
            .fetch_one(&self.pool)
            .await;

            match inserted {
                Ok(id) => Ok(id),
                Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                    Err(AuthError::EmailAlreadyExists)
                }
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn update(&self, user: &User) -> Result<()> {
        timed(self.statement_timeout, async {
            let result = sqlx::query(
                r#"
                UPDATE users
                SET email = $1,
                    password_hash = $2,
                    first_name = $3,
                    last_name = $4,
                    deleted_at = $5,
                    updated_at = NOW()
                WHERE id = $6
                "#,
            )
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.first_name)
            .bind(&user.last_name)
            .bind(user.deleted_at)
            .bind(user.id)
            .execute(&self.pool)
            .await;

            match result {
                Ok(done) if done.rows_affected() == 0 => Err(AuthError::NotFound),
                Ok(_) => Ok(()),
                Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                    Err(AuthError::EmailAlreadyExists)
                }
                Err(e) => Err(e.into()),
            }
        })
        .await
    }
}
