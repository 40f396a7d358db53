//! HTTP surface: pins, market detail, events, alerts.
//!
//! Request bodies use the camelCase field names the browser extension sends;
//! responses are snake_case.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::{get, patch, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::DEFAULT_HISTORY_HOURS;
use crate::db::alerts::SqliteAlerts;
use crate::db::history::SqliteHistory;
use crate::db::subscriptions::{PinOutcome, SqliteSubscriptions};
use crate::db::users::SqliteUsers;
use crate::error::AppError;
use crate::polymarket::{EventDetail, PolymarketClient};
use crate::types::{now_ms, Alert, Snapshot};
use crate::worker::{HistoryStore, PollingWorker};

#[derive(Clone)]
pub struct ApiState {
    pub users: SqliteUsers,
    pub subscriptions: SqliteSubscriptions,
    pub history: SqliteHistory,
    pub alerts: SqliteAlerts,
    pub polymarket: Arc<PolymarketClient>,
    pub worker: Arc<PollingWorker>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/users", post(create_user))
        .route("/api/pin", post(pin_market).delete(unpin_market))
        .route("/api/pinned", get(get_pinned_markets))
        .route("/api/market/:market_id", get(get_market_detail))
        .route("/api/event/:event_id", get(get_event_detail))
        .route("/api/alerts", get(get_alerts))
        .route("/api/alerts/:alert_id/mark-seen", patch(mark_alert_seen))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
}

#[derive(Serialize)]
pub struct UserResponse {
    pub id: i64,
    pub email: String,
    pub created_at: i64,
}

#[derive(Deserialize)]
pub struct PinRequest {
    #[serde(rename = "userId")]
    pub user_id: i64,
    #[serde(rename = "marketId")]
    pub market_id: String,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub status: String,
    pub message: Option<String>,
}

impl StatusResponse {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            status: "ok".to_string(),
            message: Some(message.into()),
        }
    }
}

#[derive(Deserialize)]
pub struct UserIdQuery {
    #[serde(rename = "userId")]
    pub user_id: i64,
}

#[derive(Serialize)]
pub struct PinnedMarketItem {
    pub id: i64,
    pub user_id: i64,
    pub market_id: String,
    pub pinned_at: i64,
    pub is_group_event: bool,
    pub group_id: Option<String>,
    pub group_title: Option<String>,
    pub latest_prob: Option<f64>,
    pub latest_price: Option<f64>,
    pub latest_volume: Option<f64>,
    pub market_title: Option<String>,
    /// Trailing history for sparklines and client-side change display.
    pub history: Vec<Snapshot>,
}

#[derive(Serialize)]
pub struct PinnedMarketsResponse {
    pub items: Vec<PinnedMarketItem>,
    pub total: usize,
}

#[derive(Deserialize)]
pub struct MarketDetailQuery {
    pub hours: Option<i64>,
}

#[derive(Serialize)]
pub struct MarketDetail {
    pub market_id: String,
    pub latest: Option<Snapshot>,
    pub history: Vec<Snapshot>,
    pub data_points: usize,
}

#[derive(Deserialize)]
pub struct AlertsQuery {
    #[serde(rename = "userId")]
    pub user_id: i64,
    #[serde(default)]
    pub unread_only: bool,
    pub limit: Option<i64>,
}

#[derive(Serialize)]
pub struct AlertsListResponse {
    pub alerts: Vec<Alert>,
    pub total: usize,
    pub unread_count: i64,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy" }))
}

async fn create_user(
    State(state): State<ApiState>,
    Json(req): Json<CreateUserRequest>,
) -> Result<Json<UserResponse>, AppError> {
    let user = state.users.create(&req.email).await?;
    Ok(Json(UserResponse {
        id: user.id,
        email: user.email,
        created_at: user.created_at,
    }))
}

/// Pin a market (or an event, which resolves to one representative child
/// market) and eagerly seed the user's first alert so the feed is never
/// empty while waiting for the next poll cycle.
async fn pin_market(
    State(state): State<ApiState>,
    Json(req): Json<PinRequest>,
) -> Result<Json<StatusResponse>, AppError> {
    require_user(&state, req.user_id).await?;

    let target = state.polymarket.resolve_pin_target(&req.market_id).await?;
    let outcome = state.subscriptions.pin(req.user_id, &target).await?;

    if outcome == PinOutcome::AlreadyPinned {
        return Ok(Json(StatusResponse::ok("Market already pinned")));
    }

    // Best-effort: a data-source hiccup must not fail the pin itself.
    if let Err(e) = state.worker.seed_first_alert(req.user_id, &target.market_id).await {
        warn!(market_id = %target.market_id, "first alert seed failed: {e}");
    }

    Ok(Json(StatusResponse::ok(format!(
        "Market {} pinned successfully",
        target.market_id
    ))))
}

async fn unpin_market(
    State(state): State<ApiState>,
    Json(req): Json<PinRequest>,
) -> Result<Json<StatusResponse>, AppError> {
    let removed = state.subscriptions.unpin(req.user_id, &req.market_id).await?;
    if !removed {
        return Err(AppError::NotFound("Pinned market not found".to_string()));
    }
    Ok(Json(StatusResponse::ok(format!(
        "Market {} unpinned successfully",
        req.market_id
    ))))
}

async fn get_pinned_markets(
    State(state): State<ApiState>,
    Query(params): Query<UserIdQuery>,
) -> Result<Json<PinnedMarketsResponse>, AppError> {
    require_user(&state, params.user_id).await?;

    let since = now_ms() - DEFAULT_HISTORY_HOURS * 3_600_000;
    let pins = state.subscriptions.pins_for_user(params.user_id).await?;

    let mut items = Vec::with_capacity(pins.len());
    for pin in pins {
        let latest = state.history.latest_snapshot(&pin.market_id).await?;
        let history = state.history.history_range(&pin.market_id, since).await?;
        items.push(PinnedMarketItem {
            id: pin.id,
            user_id: pin.user_id,
            market_id: pin.market_id,
            pinned_at: pin.pinned_at,
            is_group_event: pin.is_group_event,
            group_id: pin.group_id,
            group_title: pin.group_title,
            latest_prob: latest.as_ref().map(|s| s.implied_prob),
            latest_price: latest.as_ref().map(|s| s.price),
            latest_volume: latest.as_ref().map(|s| s.volume),
            market_title: latest.and_then(|s| s.market_title),
            history,
        });
    }

    let total = items.len();
    Ok(Json(PinnedMarketsResponse { items, total }))
}

async fn get_market_detail(
    State(state): State<ApiState>,
    Path(market_id): Path<String>,
    Query(params): Query<MarketDetailQuery>,
) -> Result<Json<MarketDetail>, AppError> {
    let hours = params.hours.unwrap_or(DEFAULT_HISTORY_HOURS);
    let since = now_ms() - hours * 3_600_000;

    let latest = state.history.latest_snapshot(&market_id).await?;
    let history = state.history.history_range(&market_id, since).await?;
    let data_points = history.len();

    Ok(Json(MarketDetail {
        market_id,
        latest,
        history,
        data_points,
    }))
}

async fn get_event_detail(
    State(state): State<ApiState>,
    Path(event_id): Path<String>,
) -> Result<Json<EventDetail>, AppError> {
    match state.polymarket.event_detail(&event_id).await? {
        Some(detail) => Ok(Json(detail)),
        None => Err(AppError::NotFound(format!("Event {event_id} not found"))),
    }
}

async fn get_alerts(
    State(state): State<ApiState>,
    Query(params): Query<AlertsQuery>,
) -> Result<Json<AlertsListResponse>, AppError> {
    require_user(&state, params.user_id).await?;

    let limit = params.limit.unwrap_or(50);
    let alerts = state
        .alerts
        .alerts_for_user(params.user_id, params.unread_only, limit)
        .await?;
    let unread_count = state.alerts.unread_count(params.user_id).await?;

    let total = alerts.len();
    Ok(Json(AlertsListResponse {
        alerts,
        total,
        unread_count,
    }))
}

async fn mark_alert_seen(
    State(state): State<ApiState>,
    Path(alert_id): Path<i64>,
) -> Result<Json<StatusResponse>, AppError> {
    if !state.alerts.mark_seen(alert_id).await? {
        return Err(AppError::NotFound("Alert not found".to_string()));
    }
    Ok(Json(StatusResponse::ok(format!(
        "Alert {alert_id} marked as seen"
    ))))
}

async fn require_user(state: &ApiState, user_id: i64) -> Result<(), AppError> {
    if state.users.get(user_id).await?.is_none() {
        return Err(AppError::NotFound("User not found".to_string()));
    }
    Ok(())
}
