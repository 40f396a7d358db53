//! AI commentary for alerts via the Anthropic Messages API.
//!
//! Strictly best-effort: no API key means the client is disabled, and every
//! failure path degrades to `None`. An alert is never blocked on commentary.

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use crate::config::{Config, ANTHROPIC_API_URL, INSIGHT_MAX_TOKENS};
use crate::types::Snapshot;
use crate::worker::InsightGenerator;

const SYSTEM_PROMPT: &str = "You are an analyst for prediction markets. Be concise and neutral.";

pub struct InsightClient {
    http: reqwest::Client,
    api_key: Option<String>,
    model: String,
    api_url: String,
}

impl InsightClient {
    pub fn new(cfg: &Config) -> Self {
        if cfg.anthropic_api_key.is_none() {
            warn!("ANTHROPIC_API_KEY not set - insight generation disabled");
        }
        Self {
            http: reqwest::Client::new(),
            api_key: cfg.anthropic_api_key.clone(),
            model: cfg.insight_model.clone(),
            api_url: ANTHROPIC_API_URL.to_string(),
        }
    }

    async fn generate(&self, prompt: &str) -> Option<String> {
        let api_key = self.api_key.as_ref()?;

        let body = json!({
            "model": self.model,
            "max_tokens": INSIGHT_MAX_TOKENS,
            "system": SYSTEM_PROMPT,
            "messages": [ { "role": "user", "content": prompt } ],
        });

        let resp = match self
            .http
            .post(&self.api_url)
            .header("x-api-key", api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!("insight request failed: {e}");
                return None;
            }
        };

        if !resp.status().is_success() {
            warn!("insight API returned {}", resp.status());
            return None;
        }

        let payload: serde_json::Value = match resp.json().await {
            Ok(v) => v,
            Err(e) => {
                warn!("insight response parse failed: {e}");
                return None;
            }
        };

        let text = extract_text(&payload);
        if text.is_none() {
            warn!("insight API returned empty content");
        }
        text
    }
}

#[async_trait]
impl InsightGenerator for InsightClient {
    async fn generate_commentary(
        &self,
        title: &str,
        old: &Snapshot,
        new: &Snapshot,
        window_minutes: i64,
    ) -> Option<String> {
        let prompt = build_prompt(title, old, new, window_minutes);
        let text = self.generate(&prompt).await;
        if text.is_some() {
            info!(market = short_title(title), "generated insight");
        }
        text
    }
}

/// Title clipped to 50 chars for log lines, cut on a char boundary.
fn short_title(title: &str) -> &str {
    match title.char_indices().nth(50) {
        Some((idx, _)) => &title[..idx],
        None => title,
    }
}

/// First text block of an Anthropic Messages response.
fn extract_text(payload: &serde_json::Value) -> Option<String> {
    payload
        .get("content")?
        .as_array()?
        .first()?
        .get("text")?
        .as_str()
        .map(str::to_string)
}

fn build_prompt(title: &str, old: &Snapshot, new: &Snapshot, window_minutes: i64) -> String {
    let delta = new.implied_prob - old.implied_prob;
    let volume_text = if old.volume > 0.0 {
        format!("\nVolume change: {:+.2}", new.volume - old.volume)
    } else {
        String::new()
    };

    format!(
        "Market: \"{title}\"\n\
         Time window: last {window_minutes} minutes\n\
         Implied probability: {:.1}% -> {:.1}% (change {delta:+.1}%){volume_text}\n\n\
         In 3-5 sentences: explain plausible drivers of the move, 2 risks to watch, \
         and a neutral note (not financial advice).",
        old.implied_prob, new.implied_prob,
    )
}
