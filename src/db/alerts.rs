//! Alert persistence backed by the `alerts` table.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::db::models::AlertRow;
use crate::error::Result;
use crate::types::{Alert, NewAlert};
use crate::worker::AlertStore;

#[derive(Clone)]
pub struct SqliteAlerts {
    pool: SqlitePool,
}

impl SqliteAlerts {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Alerts for a user, newest first.
    pub async fn alerts_for_user(
        &self,
        user_id: i64,
        unread_only: bool,
        limit: i64,
    ) -> Result<Vec<Alert>> {
        let rows = if unread_only {
            sqlx::query_as::<_, AlertRow>(
                r#"
                SELECT id, user_id, market_id, ts, change_pct, threshold, market_title, insight_text, seen
                FROM alerts
                WHERE user_id = ? AND seen = 0
                ORDER BY ts DESC
                LIMIT ?
                "#,
            )
            .bind(user_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query_as::<_, AlertRow>(
                r#"
                SELECT id, user_id, market_id, ts, change_pct, threshold, market_title, insight_text, seen
                FROM alerts
                WHERE user_id = ?
                ORDER BY ts DESC
                LIMIT ?
                "#,
            )
            .bind(user_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
        };

        Ok(rows.into_iter().map(Alert::from).collect())
    }

    pub async fn unread_count(&self, user_id: i64) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM alerts WHERE user_id = ? AND seen = 0",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Flip `seen` to true. Idempotent - marking twice leaves the same end
    /// state. Returns false when the alert does not exist.
    pub async fn mark_seen(&self, alert_id: i64) -> Result<bool> {
        let result = sqlx::query("UPDATE alerts SET seen = 1 WHERE id = ?")
            .bind(alert_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl AlertStore for SqliteAlerts {
    async fn append_alert(&self, alert: &NewAlert) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO alerts (user_id, market_id, ts, change_pct, threshold, market_title, insight_text, seen)
            VALUES (?, ?, ?, ?, ?, ?, ?, 0)
            "#,
        )
        .bind(alert.user_id)
        .bind(&alert.market_id)
        .bind(alert.ts)
        .bind(alert.change_pct)
        .bind(alert.threshold)
        .bind(&alert.market_title)
        .bind(&alert.insight_text)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }
}
