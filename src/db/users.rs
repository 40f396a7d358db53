//! Minimal user identity - just enough to own pins and alerts.

use sqlx::SqlitePool;

use crate::db::models::UserRow;
use crate::error::Result;
use crate::types::now_ms;

#[derive(Clone)]
pub struct SqliteUsers {
    pool: SqlitePool,
}

impl SqliteUsers {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a user, or return the existing row when the email is taken.
    pub async fn create(&self, email: &str) -> Result<UserRow> {
        if let Some(existing) = self.by_email(email).await? {
            return Ok(existing);
        }

        let created_at = now_ms();
        let result = sqlx::query("INSERT INTO users (email, created_at) VALUES (?, ?)")
            .bind(email)
            .bind(created_at)
            .execute(&self.pool)
            .await?;

        Ok(UserRow {
            id: result.last_insert_rowid(),
            email: email.to_string(),
            created_at,
        })
    }

    pub async fn get(&self, user_id: i64) -> Result<Option<UserRow>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, email, created_at FROM users WHERE id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn by_email(&self, email: &str) -> Result<Option<UserRow>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, email, created_at FROM users WHERE email = ?",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}
