mod api;
mod config;
mod db;
mod error;
mod insight;
mod polymarket;
mod types;
mod worker;

use std::sync::Arc;

use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::routes::{router, ApiState};
use crate::config::Config;
use crate::db::alerts::SqliteAlerts;
use crate::db::history::SqliteHistory;
use crate::db::subscriptions::SqliteSubscriptions;
use crate::db::users::SqliteUsers;
use crate::error::Result;
use crate::insight::InsightClient;
use crate::polymarket::PolymarketClient;
use crate::worker::PollingWorker;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let options = SqliteConnectOptions::new()
        .filename(&cfg.db_path)
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(options).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database ready at {}", cfg.db_path);

    // --- Collaborators, constructed once for the application lifetime ---
    let polymarket = Arc::new(PolymarketClient::new(&cfg)?);
    let insights = Arc::new(InsightClient::new(&cfg));
    let users = SqliteUsers::new(pool.clone());
    let history = SqliteHistory::new(pool.clone());
    let subscriptions = SqliteSubscriptions::new(pool.clone());
    let alerts = SqliteAlerts::new(pool.clone());

    let engine = Arc::new(PollingWorker::new(
        &cfg,
        polymarket.clone(),
        insights,
        Arc::new(history.clone()),
        Arc::new(subscriptions.clone()),
        Arc::new(alerts.clone()),
    ));

    // --- Polling worker with a cooperative stop signal ---
    let (stop_tx, stop_rx) = watch::channel(false);
    if cfg.enable_worker {
        tokio::spawn(Arc::clone(&engine).run(stop_rx));
    } else {
        warn!("ENABLE_WORKER=false - polling loop disabled, API only");
    }

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = stop_tx.send(true);
        }
    });

    // --- HTTP API server ---
    let api_state = ApiState {
        users,
        subscriptions,
        history,
        alerts,
        polymarket,
        worker: engine,
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
