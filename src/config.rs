use crate::error::{AppError, Result};

pub const GAMMA_API_URL: &str = "https://gamma-api.polymarket.com";
pub const CLOB_API_URL: &str = "https://clob.polymarket.com";
pub const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";

/// Cooldown after a loop-level worker fault before the next attempt (seconds).
/// Distinct from the normal poll interval - a crashing cycle must not spin.
pub const WORKER_FAULT_COOLDOWN_SECS: u64 = 60;

/// Outbound HTTP timeout for Gamma/CLOB calls (seconds).
pub const HTTP_TIMEOUT_SECS: u64 = 30;

/// Max tokens requested from the insight model per commentary.
pub const INSIGHT_MAX_TOKENS: u32 = 300;

/// Default hours of history returned by the market detail endpoint.
pub const DEFAULT_HISTORY_HOURS: i64 = 24;

#[derive(Debug, Clone)]
pub struct Config {
    pub gamma_api_url: String,
    pub clob_api_url: String,
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    /// How often the worker polls all pinned markets (POLL_INTERVAL_SEC).
    pub poll_interval_secs: u64,
    /// Absolute probability change that triggers an alert (ALERT_THRESHOLD_PCT).
    pub alert_threshold_pct: f64,
    /// Trailing window the baseline is taken from (COMPARISON_WINDOW_MIN).
    pub comparison_window_min: i64,
    /// Anthropic API key; insights are disabled when unset.
    pub anthropic_api_key: Option<String>,
    pub insight_model: String,
    /// Set ENABLE_WORKER=false to run the API without the polling loop.
    pub enable_worker: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            gamma_api_url: std::env::var("GAMMA_API_URL")
                .unwrap_or_else(|_| GAMMA_API_URL.to_string()),
            clob_api_url: std::env::var("CLOB_API_URL")
                .unwrap_or_else(|_| CLOB_API_URL.to_string()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "watcher.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            poll_interval_secs: std::env::var("POLL_INTERVAL_SEC")
                .unwrap_or_else(|_| "300".to_string())
                .parse::<u64>()
                .unwrap_or(300),
            alert_threshold_pct: std::env::var("ALERT_THRESHOLD_PCT")
                .unwrap_or_else(|_| "10.0".to_string())
                .parse::<f64>()
                .unwrap_or(10.0),
            comparison_window_min: std::env::var("COMPARISON_WINDOW_MIN")
                .unwrap_or_else(|_| "60".to_string())
                .parse::<i64>()
                .unwrap_or(60),
            anthropic_api_key: std::env::var("ANTHROPIC_API_KEY").ok().filter(|k| !k.is_empty()),
            insight_model: std::env::var("INSIGHT_MODEL")
                .unwrap_or_else(|_| "claude-3-haiku-20240307".to_string()),
            enable_worker: std::env::var("ENABLE_WORKER")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
        })
    }
}
