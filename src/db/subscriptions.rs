//! Pinned-market registry backed by the `pinned_markets` table.
//!
//! The worker reads this through the `SubscriptionRegistry` seam; the API
//! layer writes pins. A pin stores the concrete market id the worker polls
//! plus, for event pins, the group metadata kept for display.

use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::info;

use crate::db::models::PinnedMarketRow;
use crate::error::Result;
use crate::types::{now_ms, PinTarget, Subscription};
use crate::worker::SubscriptionRegistry;

#[derive(Debug, PartialEq, Eq)]
pub enum PinOutcome {
    Created,
    /// The pin already existed; stored group metadata was refreshed.
    AlreadyPinned,
}

#[derive(Clone)]
pub struct SqliteSubscriptions {
    pool: SqlitePool,
}

impl SqliteSubscriptions {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Pin a resolved market for a user. Re-pinning is not an error: the
    /// existing row keeps its `pinned_at` but has its group metadata
    /// resynced, since event titles can change upstream between pins.
    pub async fn pin(&self, user_id: i64, target: &PinTarget) -> Result<PinOutcome> {
        let existing = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM pinned_markets WHERE user_id = ? AND market_id = ?",
        )
        .bind(user_id)
        .bind(&target.market_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(id) = existing {
            sqlx::query(
                "UPDATE pinned_markets SET is_group_event = ?, group_id = ?, group_title = ? WHERE id = ?",
            )
            .bind(target.is_group_event)
            .bind(&target.group_id)
            .bind(&target.group_title)
            .bind(id)
            .execute(&self.pool)
            .await?;
            return Ok(PinOutcome::AlreadyPinned);
        }

        sqlx::query(
            r#"
            INSERT INTO pinned_markets (user_id, market_id, pinned_at, is_group_event, group_id, group_title)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(user_id)
        .bind(&target.market_id)
        .bind(now_ms())
        .bind(target.is_group_event)
        .bind(&target.group_id)
        .bind(&target.group_title)
        .execute(&self.pool)
        .await?;

        info!(user_id, market_id = %target.market_id, "market pinned");
        Ok(PinOutcome::Created)
    }

    /// Remove a pin. Returns false when no such pin existed.
    pub async fn unpin(&self, user_id: i64, market_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM pinned_markets WHERE user_id = ? AND market_id = ?",
        )
        .bind(user_id)
        .bind(market_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// All pins for a user, newest first.
    pub async fn pins_for_user(&self, user_id: i64) -> Result<Vec<Subscription>> {
        let rows = sqlx::query_as::<_, PinnedMarketRow>(
            r#"
            SELECT id, user_id, market_id, pinned_at, is_group_event, group_id, group_title
            FROM pinned_markets
            WHERE user_id = ?
            ORDER BY pinned_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Subscription::from).collect())
    }
}

#[async_trait]
impl SubscriptionRegistry for SqliteSubscriptions {
    async fn distinct_subscribed_market_ids(&self) -> Result<Vec<String>> {
        let ids = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT market_id FROM pinned_markets ORDER BY market_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn subscribers_of(&self, market_id: &str) -> Result<Vec<i64>> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT user_id FROM pinned_markets WHERE market_id = ? ORDER BY user_id",
        )
        .bind(market_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }
}
