use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current Unix epoch milliseconds.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// One timestamped reading of a market. Immutable once written to history;
/// the polling worker is the only producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub market_id: String,
    /// Unix epoch milliseconds.
    pub ts: i64,
    /// Implied probability of the primary (Yes) outcome, 0–100.
    pub implied_prob: f64,
    /// Last trade price of the primary outcome, 0–1.
    pub price: f64,
    /// 24h traded volume in USD.
    pub volume: f64,
    pub market_title: Option<String>,
}

// ---------------------------------------------------------------------------
// Subscription (a pinned market)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct Subscription {
    pub id: i64,
    pub user_id: i64,
    /// Concrete market id polled by the worker. For an event pin this is the
    /// representative child market, never the event id itself.
    pub market_id: String,
    pub pinned_at: i64,
    pub is_group_event: bool,
    pub group_id: Option<String>,
    pub group_title: Option<String>,
}

/// What a human-entered identifier (market id, event id, or URL slug)
/// resolved to at pin time.
#[derive(Debug, Clone, PartialEq)]
pub struct PinTarget {
    pub market_id: String,
    pub is_group_event: bool,
    pub group_id: Option<String>,
    pub group_title: Option<String>,
}

// ---------------------------------------------------------------------------
// Alert
// ---------------------------------------------------------------------------

/// A per-user notification row. `seen` is the only mutable field.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub id: i64,
    pub user_id: i64,
    pub market_id: String,
    pub ts: i64,
    /// Signed probability change that triggered the alert.
    pub change_pct: f64,
    /// Threshold configured at generation time - never retroactively updated.
    pub threshold: f64,
    pub market_title: Option<String>,
    pub insight_text: Option<String>,
    pub seen: bool,
}

/// Alert fields owned by the worker; the store assigns id and `seen = false`.
#[derive(Debug, Clone)]
pub struct NewAlert {
    pub user_id: i64,
    pub market_id: String,
    pub ts: i64,
    pub change_pct: f64,
    pub threshold: f64,
    pub market_title: Option<String>,
    pub insight_text: Option<String>,
}
