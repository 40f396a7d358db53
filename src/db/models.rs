//! Database row types used by sqlx for typed queries.

use crate::types::{Alert, Snapshot, Subscription};

#[derive(Debug, sqlx::FromRow)]
pub struct UserRow {
    pub id: i64,
    pub email: String,
    pub created_at: i64,
}

#[derive(Debug, sqlx::FromRow)]
pub struct PinnedMarketRow {
    pub id: i64,
    pub user_id: i64,
    pub market_id: String,
    pub pinned_at: i64,
    pub is_group_event: bool,
    pub group_id: Option<String>,
    pub group_title: Option<String>,
}

impl From<PinnedMarketRow> for Subscription {
    fn from(r: PinnedMarketRow) -> Self {
        Subscription {
            id: r.id,
            user_id: r.user_id,
            market_id: r.market_id,
            pinned_at: r.pinned_at,
            is_group_event: r.is_group_event,
            group_id: r.group_id,
            group_title: r.group_title,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct HistoryRow {
    pub market_id: String,
    pub ts: i64,
    pub implied_prob: f64,
    pub price: f64,
    pub volume: f64,
    pub market_title: Option<String>,
}

impl From<HistoryRow> for Snapshot {
    fn from(r: HistoryRow) -> Self {
        Snapshot {
            market_id: r.market_id,
            ts: r.ts,
            implied_prob: r.implied_prob,
            price: r.price,
            volume: r.volume,
            market_title: r.market_title,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct AlertRow {
    pub id: i64,
    pub user_id: i64,
    pub market_id: String,
    pub ts: i64,
    pub change_pct: f64,
    pub threshold: f64,
    pub market_title: Option<String>,
    pub insight_text: Option<String>,
    pub seen: bool,
}

impl From<AlertRow> for Alert {
    fn from(r: AlertRow) -> Self {
        Alert {
            id: r.id,
            user_id: r.user_id,
            market_id: r.market_id,
            ts: r.ts,
            change_pct: r.change_pct,
            threshold: r.threshold,
            market_title: r.market_title,
            insight_text: r.insight_text,
            seen: r.seen,
        }
    }
}
