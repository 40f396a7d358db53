//! Append-only snapshot time series backed by the `market_history` table.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::db::models::HistoryRow;
use crate::error::Result;
use crate::types::Snapshot;
use crate::worker::HistoryStore;

#[derive(Clone)]
pub struct SqliteHistory {
    pool: SqlitePool,
}

impl SqliteHistory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Ascending-by-time history for a market since `since_ts`, for the
    /// market-detail endpoint and sparklines.
    pub async fn history_range(&self, market_id: &str, since_ts: i64) -> Result<Vec<Snapshot>> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            r#"
            SELECT market_id, ts, implied_prob, price, volume, market_title
            FROM market_history
            WHERE market_id = ? AND ts >= ?
            ORDER BY ts ASC
            "#,
        )
        .bind(market_id)
        .bind(since_ts)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Snapshot::from).collect())
    }
}

#[async_trait]
impl HistoryStore for SqliteHistory {
    async fn append_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO market_history (market_id, ts, implied_prob, price, volume, market_title)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&snapshot.market_id)
        .bind(snapshot.ts)
        .bind(snapshot.implied_prob)
        .bind(snapshot.price)
        .bind(snapshot.volume)
        .bind(&snapshot.market_title)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn earliest_snapshot_since(
        &self,
        market_id: &str,
        since_ts: i64,
    ) -> Result<Option<Snapshot>> {
        let row = sqlx::query_as::<_, HistoryRow>(
            r#"
            SELECT market_id, ts, implied_prob, price, volume, market_title
            FROM market_history
            WHERE market_id = ? AND ts >= ?
            ORDER BY ts ASC
            LIMIT 1
            "#,
        )
        .bind(market_id)
        .bind(since_ts)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Snapshot::from))
    }

    async fn latest_snapshot(&self, market_id: &str) -> Result<Option<Snapshot>> {
        let row = sqlx::query_as::<_, HistoryRow>(
            r#"
            SELECT market_id, ts, implied_prob, price, volume, market_title
            FROM market_history
            WHERE market_id = ?
            ORDER BY ts DESC
            LIMIT 1
            "#,
        )
        .bind(market_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Snapshot::from))
    }
}
