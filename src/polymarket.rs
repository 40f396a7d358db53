//! Polymarket Gamma/CLOB REST client.
//!
//! Gamma serves market and event metadata; CLOB serves trade price history.
//! A snapshot combines the two: metadata from `/markets/{id}` plus the most
//! recent trade price for the market's first outcome token (typically "Yes"),
//! falling back to Gamma's `lastTradePrice` when CLOB has nothing.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{Config, HTTP_TIMEOUT_SECS};
use crate::error::{AppError, Result};
use crate::types::{now_ms, PinTarget, Snapshot};
use crate::worker::MarketDataSource;

pub struct PolymarketClient {
    http: reqwest::Client,
    gamma_url: String,
    clob_url: String,
}

/// Event detail returned by the API's event endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct EventDetail {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub end_date: Option<String>,
    pub market_count: usize,
    pub markets: Vec<EventMarket>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventMarket {
    pub id: String,
    pub question: String,
    pub group_item_title: Option<String>,
    pub active: bool,
    pub closed: bool,
}

impl PolymarketClient {
    pub fn new(cfg: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            http,
            gamma_url: cfg.gamma_api_url.clone(),
            clob_url: cfg.clob_api_url.clone(),
        })
    }

    /// Raw market object from Gamma. `Ok(None)` on 404.
    async fn get_market(&self, market_id: &str) -> Result<Option<serde_json::Value>> {
        let url = format!("{}/markets/{}", self.gamma_url, market_id);
        let resp = self.http.get(&url).send().await?;

        match resp.status() {
            s if s.is_success() => Ok(Some(resp.json().await?)),
            reqwest::StatusCode::NOT_FOUND => Ok(None),
            s => Err(AppError::Upstream(format!(
                "GAMMA /markets/{market_id} returned {s}"
            ))),
        }
    }

    /// Most recent trade price for a CLOB token, if any history exists.
    async fn last_trade_price(&self, token_id: &str) -> Result<Option<f64>> {
        let url = format!(
            "{}/prices-history?market={}&interval=max&fidelity=1",
            self.clob_url, token_id
        );
        let resp = self.http.get(&url).send().await?;
        if !resp.status().is_success() {
            return Ok(None);
        }
        let body: serde_json::Value = resp.json().await?;
        Ok(last_price_from_history(&body))
    }

    /// Full point-in-time snapshot for a market. `Ok(None)` when the market
    /// does not exist; network failures surface as `Err`.
    pub async fn market_snapshot(&self, market_id: &str) -> Result<Option<Snapshot>> {
        let Some(market) = self.get_market(market_id).await? else {
            debug!(market_id, "market not found on Gamma");
            return Ok(None);
        };

        // CLOB price is preferred but optional - a Gamma-only snapshot is
        // still a valid reading.
        let clob_price = match first_clob_token(&market) {
            Some(token_id) => match self.last_trade_price(&token_id).await {
                Ok(p) => p,
                Err(e) => {
                    warn!(market_id, "CLOB price lookup failed: {e}");
                    None
                }
            },
            None => None,
        };

        Ok(Some(snapshot_from_market(market_id, &market, clob_price, now_ms())))
    }

    /// Look up an event by slug, numeric id, or the direct endpoint.
    /// Human-entered identifiers usually arrive as URL slugs, so that form
    /// is tried first.
    pub async fn resolve_event(&self, id_or_slug: &str) -> Result<Option<serde_json::Value>> {
        for params in [("slug", id_or_slug), ("id", id_or_slug)] {
            let url = format!("{}/events", self.gamma_url);
            let resp = self.http.get(&url).query(&[params]).send().await?;
            if resp.status().is_success() {
                let body: serde_json::Value = resp.json().await?;
                if let Some(first) = body.as_array().and_then(|a| a.first()) {
                    return Ok(Some(first.clone()));
                }
            }
        }

        let url = format!("{}/events/{}", self.gamma_url, id_or_slug);
        let resp = self.http.get(&url).send().await?;
        if resp.status().is_success() {
            return Ok(Some(resp.json().await?));
        }

        Ok(None)
    }

    /// Event detail for the API surface. `Ok(None)` when nothing matches.
    pub async fn event_detail(&self, id_or_slug: &str) -> Result<Option<EventDetail>> {
        Ok(self.resolve_event(id_or_slug).await?.as_ref().map(parse_event_detail))
    }

    /// Resolve a human-entered identifier to the concrete market the worker
    /// will poll. An event resolves to one representative child market with
    /// the group metadata carried along; anything else is taken as a plain
    /// market id.
    pub async fn resolve_pin_target(&self, id_or_slug: &str) -> Result<PinTarget> {
        if let Some(event) = self.resolve_event(id_or_slug).await? {
            if let Some(target) = pin_target_from_event(&event) {
                return Ok(target);
            }
            warn!(id_or_slug, "event has no usable child markets, pinning as market id");
        }

        Ok(PinTarget {
            market_id: id_or_slug.to_string(),
            is_group_event: false,
            group_id: None,
            group_title: None,
        })
    }
}

#[async_trait]
impl MarketDataSource for PolymarketClient {
    async fn fetch_snapshot(&self, market_id: &str) -> Result<Option<Snapshot>> {
        self.market_snapshot(market_id).await
    }
}

// ---------------------------------------------------------------------------
// JSON parsing helpers - pure, tested without network
// ---------------------------------------------------------------------------

/// Gamma encodes some numeric fields as JSON strings. Accept either form.
fn value_as_f64(v: &serde_json::Value) -> Option<f64> {
    v.as_f64().or_else(|| v.as_str().and_then(|s| s.parse().ok()))
}

/// First CLOB token id. `clobTokenIds` arrives either as a JSON array or as
/// a JSON-encoded string of an array.
pub fn first_clob_token(market: &serde_json::Value) -> Option<String> {
    let ids = market.get("clobTokenIds")?;
    if let Some(arr) = ids.as_array() {
        return arr.first()?.as_str().map(str::to_string);
    }
    let parsed: serde_json::Value = serde_json::from_str(ids.as_str()?).ok()?;
    parsed.as_array()?.first()?.as_str().map(str::to_string)
}

/// Last point of a CLOB `/prices-history` response.
pub fn last_price_from_history(body: &serde_json::Value) -> Option<f64> {
    body.get("history")?
        .as_array()?
        .last()?
        .get("p")
        .and_then(value_as_f64)
}

/// Build a snapshot from a Gamma market object and an optional CLOB price.
/// Price preference: CLOB trade price, then Gamma `lastTradePrice` if
/// positive, then 0.5 when no price data exists at all.
pub fn snapshot_from_market(
    market_id: &str,
    market: &serde_json::Value,
    clob_price: Option<f64>,
    ts: i64,
) -> Snapshot {
    let price = clob_price
        .or_else(|| {
            market
                .get("lastTradePrice")
                .and_then(value_as_f64)
                .filter(|p| *p > 0.0)
        })
        .unwrap_or(0.5);

    let volume = market
        .get("volume24hrClob")
        .and_then(value_as_f64)
        .unwrap_or(0.0);

    Snapshot {
        market_id: market_id.to_string(),
        ts,
        implied_prob: price * 100.0,
        price,
        volume,
        market_title: market
            .get("question")
            .and_then(|q| q.as_str())
            .map(str::to_string),
    }
}

pub fn parse_event_detail(event: &serde_json::Value) -> EventDetail {
    let markets: Vec<EventMarket> = event
        .get("markets")
        .and_then(|m| m.as_array())
        .map(|arr| arr.iter().filter_map(parse_event_market).collect())
        .unwrap_or_default();

    EventDetail {
        id: event
            .get("id")
            .map(|v| match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .unwrap_or_default(),
        title: event
            .get("title")
            .and_then(|t| t.as_str())
            .unwrap_or_default()
            .to_string(),
        description: event
            .get("description")
            .and_then(|d| d.as_str())
            .map(str::to_string),
        end_date: event
            .get("endDate")
            .and_then(|d| d.as_str())
            .map(str::to_string),
        market_count: markets.len(),
        markets,
    }
}

fn parse_event_market(v: &serde_json::Value) -> Option<EventMarket> {
    Some(EventMarket {
        id: v.get("id")?.as_str()?.to_string(),
        question: v
            .get("question")
            .and_then(|q| q.as_str())
            .unwrap_or_default()
            .to_string(),
        group_item_title: v
            .get("groupItemTitle")
            .and_then(|t| t.as_str())
            .map(str::to_string),
        active: v.get("active").and_then(|a| a.as_bool()).unwrap_or(false),
        closed: v.get("closed").and_then(|c| c.as_bool()).unwrap_or(false),
    })
}

/// Representative child selection: the first active, non-closed child market.
/// Falls back to the first child when none qualify (an all-closed event is
/// still pinnable - it just won't move).
pub fn pin_target_from_event(event: &serde_json::Value) -> Option<PinTarget> {
    let detail = parse_event_detail(event);
    let child = detail
        .markets
        .iter()
        .find(|m| m.active && !m.closed)
        .or_else(|| detail.markets.first())?;

    Some(PinTarget {
        market_id: child.id.clone(),
        is_group_event: true,
        group_id: Some(detail.id.clone()),
        group_title: Some(detail.title.clone()),
    })
}
