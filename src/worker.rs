//! Polling & alert engine.
//!
//! A single background loop snapshots every pinned market on a fixed
//! interval, appends each reading to the history time series, compares it
//! against the earliest reading inside the trailing comparison window, and
//! fans one alert out to every subscriber when the move crosses threshold.
//!
//! The worker holds no state of its own beyond configuration - history and
//! alerts live behind the injected stores, which are the single source of
//! truth across cycles. Per-market failures are caught and logged so one bad
//! market never stops the rest of the cycle.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::{Config, WORKER_FAULT_COOLDOWN_SECS};
use crate::error::Result;
use crate::types::{now_ms, NewAlert, Snapshot};

// ---------------------------------------------------------------------------
// Collaborator seams
// ---------------------------------------------------------------------------

/// Point-in-time market state. `Ok(None)` means the market does not exist
/// upstream; transport failures are `Err`.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn fetch_snapshot(&self, market_id: &str) -> Result<Option<Snapshot>>;
}

/// Best-effort commentary on a move. Never errors - unavailable is `None`.
#[async_trait]
pub trait InsightGenerator: Send + Sync {
    async fn generate_commentary(
        &self,
        title: &str,
        old: &Snapshot,
        new: &Snapshot,
        window_minutes: i64,
    ) -> Option<String>;
}

/// Append-only snapshot time series, ordered by timestamp within a market.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn append_snapshot(&self, snapshot: &Snapshot) -> Result<()>;
    /// Earliest snapshot for the market with `ts >= since_ts`.
    async fn earliest_snapshot_since(
        &self,
        market_id: &str,
        since_ts: i64,
    ) -> Result<Option<Snapshot>>;
    async fn latest_snapshot(&self, market_id: &str) -> Result<Option<Snapshot>>;
}

/// Who is pinned to what. The worker only reads subscriptions.
#[async_trait]
pub trait SubscriptionRegistry: Send + Sync {
    async fn distinct_subscribed_market_ids(&self) -> Result<Vec<String>>;
    async fn subscribers_of(&self, market_id: &str) -> Result<Vec<i64>>;
}

#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn append_alert(&self, alert: &NewAlert) -> Result<i64>;
}

// ---------------------------------------------------------------------------
// PollingWorker
// ---------------------------------------------------------------------------

pub struct PollingWorker {
    poll_interval: Duration,
    alert_threshold_pct: f64,
    window_minutes: i64,
    source: Arc<dyn MarketDataSource>,
    insights: Arc<dyn InsightGenerator>,
    history: Arc<dyn HistoryStore>,
    subscriptions: Arc<dyn SubscriptionRegistry>,
    alerts: Arc<dyn AlertStore>,
}

impl PollingWorker {
    pub fn new(
        cfg: &Config,
        source: Arc<dyn MarketDataSource>,
        insights: Arc<dyn InsightGenerator>,
        history: Arc<dyn HistoryStore>,
        subscriptions: Arc<dyn SubscriptionRegistry>,
        alerts: Arc<dyn AlertStore>,
    ) -> Self {
        info!(
            interval_secs = cfg.poll_interval_secs,
            threshold_pct = cfg.alert_threshold_pct,
            window_min = cfg.comparison_window_min,
            "polling worker configured"
        );
        Self {
            poll_interval: Duration::from_secs(cfg.poll_interval_secs),
            alert_threshold_pct: cfg.alert_threshold_pct,
            window_minutes: cfg.comparison_window_min,
            source,
            insights,
            history,
            subscriptions,
            alerts,
        }
    }

    /// Long-lived polling loop. One cycle is ever in flight: the loop awaits
    /// full cycle completion before sleeping. A cycle-level fault logs and
    /// backs off a fixed cooldown instead of the normal interval; the stop
    /// signal is checked between cycles.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("starting market polling worker");

        loop {
            let sleep_for = match self.run_cycle().await {
                Ok(_) => self.poll_interval,
                Err(e) => {
                    error!("polling cycle failed: {e}");
                    Duration::from_secs(WORKER_FAULT_COOLDOWN_SECS)
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("polling worker stopping");
                        return;
                    }
                }
            }
        }
    }

    /// One full pass over all pinned markets. Each market is attempted at
    /// most once; a market nobody pins is never polled. Best-effort batch -
    /// per-market failures are logged and the cycle continues. Returns the
    /// number of markets that did not produce a snapshot this pass.
    pub async fn run_cycle(&self) -> Result<usize> {
        let market_ids = self.subscriptions.distinct_subscribed_market_ids().await?;

        if market_ids.is_empty() {
            info!("no pinned markets to poll");
            return Ok(0);
        }

        let total = market_ids.len();
        let mut failed = 0usize;
        for market_id in &market_ids {
            match self.poll_one(market_id).await {
                Ok(true) => {}
                // upstream had nothing for this market; already logged
                Ok(false) => failed += 1,
                Err(e) => {
                    warn!(market_id = %market_id, "poll failed: {e}");
                    failed += 1;
                }
            }
        }

        info!(total, failed, "polling cycle complete");
        Ok(failed)
    }

    /// Poll one market: fetch, persist, evaluate. Nothing is written when
    /// the fetch comes back empty - a partial snapshot never reaches history.
    /// Returns false in that case so the cycle summary counts it.
    async fn poll_one(&self, market_id: &str) -> Result<bool> {
        let Some(snapshot) = self.source.fetch_snapshot(market_id).await? else {
            warn!(market_id, "no snapshot available this cycle");
            return Ok(false);
        };

        // Unconditional append - the time series grows even when no alert
        // results, which is what later cycles compare against.
        self.history.append_snapshot(&snapshot).await?;
        debug!(
            market_id,
            prob = snapshot.implied_prob,
            volume = snapshot.volume,
            "stored snapshot"
        );

        self.detect_and_alert(&snapshot).await?;
        Ok(true)
    }

    /// Compare the current reading against the earliest snapshot inside the
    /// trailing window and fan out alerts when the move crosses threshold.
    ///
    /// The earliest in-window point (rather than the strictly previous poll)
    /// keeps the comparison stable under irregular polling cadence and
    /// captures the full magnitude of a move across the window.
    async fn detect_and_alert(&self, current: &Snapshot) -> Result<()> {
        let since = current.ts - self.window_minutes * 60_000;
        let Some(baseline) = self
            .history
            .earliest_snapshot_since(&current.market_id, since)
            .await?
        else {
            debug!(market_id = %current.market_id, "no baseline in window");
            return Ok(());
        };

        let change_pct = current.implied_prob - baseline.implied_prob;
        if change_pct.abs() < self.alert_threshold_pct {
            return Ok(());
        }

        info!(
            market_id = %current.market_id,
            old_prob = baseline.implied_prob,
            new_prob = current.implied_prob,
            change_pct,
            "alert threshold crossed"
        );

        // One alert per subscriber - `seen` state is per-user, so alerts are
        // per-user artifacts. A failed write for one user must not block the
        // rest of the fanout.
        let user_ids = self.subscriptions.subscribers_of(&current.market_id).await?;
        for user_id in user_ids {
            if let Err(e) = self.create_alert(user_id, &baseline, current).await {
                warn!(user_id, market_id = %current.market_id, "alert write failed: {e}");
            }
        }

        Ok(())
    }

    /// Write one alert row for one user. Commentary is advisory: generator
    /// failure or absence degrades the alert's content, never its creation.
    async fn create_alert(&self, user_id: i64, baseline: &Snapshot, current: &Snapshot) -> Result<()> {
        let title = current
            .market_title
            .clone()
            .or_else(|| baseline.market_title.clone());

        let insight_text = self
            .insights
            .generate_commentary(
                title.as_deref().unwrap_or("Unknown Market"),
                baseline,
                current,
                self.window_minutes,
            )
            .await;

        let change_pct = current.implied_prob - baseline.implied_prob;
        let alert = NewAlert {
            user_id,
            market_id: current.market_id.clone(),
            ts: now_ms().max(current.ts),
            change_pct,
            threshold: self.alert_threshold_pct,
            market_title: title,
            insight_text,
        };

        self.alerts.append_alert(&alert).await?;
        info!(user_id, market_id = %current.market_id, change_pct, "created alert");
        Ok(())
    }

    /// Eager first alert for a fresh pin, so every new subscription gets an
    /// immediate feed entry without waiting for the next cycle. Baseline is
    /// the most recent existing history point, or the current snapshot
    /// itself (change 0) when the market has no history at all.
    pub async fn seed_first_alert(&self, user_id: i64, market_id: &str) -> Result<()> {
        let Some(current) = self.source.fetch_snapshot(market_id).await? else {
            warn!(market_id, "pin-time snapshot unavailable, skipping first alert");
            return Ok(());
        };

        // Baseline lookup must happen before the append, or the fresh
        // snapshot would become its own baseline for markets with history.
        let baseline = self
            .history
            .latest_snapshot(market_id)
            .await?
            .unwrap_or_else(|| current.clone());

        self.history.append_snapshot(&current).await?;
        self.create_alert(user_id, &baseline, &current).await
    }
}

// ---------------------------------------------------------------------------
// Tests - in-memory fakes for every collaborator
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn snap(market_id: &str, ts: i64, prob: f64) -> Snapshot {
        Snapshot {
            market_id: market_id.to_string(),
            ts,
            implied_prob: prob,
            price: prob / 100.0,
            volume: 1000.0,
            market_title: Some("Test Market".to_string()),
        }
    }

    /// Serves canned snapshots (stamped with the current time) and records
    /// every fetch. A market id mapped to `None` simulates upstream
    /// not-found; an id in `fail` simulates a transport error.
    #[derive(Default)]
    struct FakeSource {
        snapshots: HashMap<String, Option<f64>>,
        fail: Vec<String>,
        fetched: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MarketDataSource for FakeSource {
        async fn fetch_snapshot(&self, market_id: &str) -> Result<Option<Snapshot>> {
            self.fetched.lock().unwrap().push(market_id.to_string());
            if self.fail.iter().any(|m| m == market_id) {
                return Err(AppError::Upstream("connection reset".to_string()));
            }
            Ok(self
                .snapshots
                .get(market_id)
                .and_then(|p| *p)
                .map(|prob| snap(market_id, now_ms(), prob)))
        }
    }

    #[derive(Default)]
    struct MemHistory {
        rows: Mutex<Vec<Snapshot>>,
    }

    impl MemHistory {
        fn with_rows(rows: Vec<Snapshot>) -> Self {
            Self { rows: Mutex::new(rows) }
        }

        fn count_for(&self, market_id: &str) -> usize {
            self.rows
                .lock()
                .unwrap()
                .iter()
                .filter(|s| s.market_id == market_id)
                .count()
        }
    }

    #[async_trait]
    impl HistoryStore for MemHistory {
        async fn append_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
            self.rows.lock().unwrap().push(snapshot.clone());
            Ok(())
        }

        async fn earliest_snapshot_since(
            &self,
            market_id: &str,
            since_ts: i64,
        ) -> Result<Option<Snapshot>> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|s| s.market_id == market_id && s.ts >= since_ts)
                .min_by_key(|s| s.ts)
                .cloned())
        }

        async fn latest_snapshot(&self, market_id: &str) -> Result<Option<Snapshot>> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|s| s.market_id == market_id)
                .max_by_key(|s| s.ts)
                .cloned())
        }
    }

    #[derive(Default)]
    struct MemSubscriptions {
        by_market: HashMap<String, Vec<i64>>,
    }

    #[async_trait]
    impl SubscriptionRegistry for MemSubscriptions {
        async fn distinct_subscribed_market_ids(&self) -> Result<Vec<String>> {
            let mut ids: Vec<String> = self.by_market.keys().cloned().collect();
            ids.sort();
            Ok(ids)
        }

        async fn subscribers_of(&self, market_id: &str) -> Result<Vec<i64>> {
            Ok(self.by_market.get(market_id).cloned().unwrap_or_default())
        }
    }

    #[derive(Default)]
    struct MemAlerts {
        rows: Mutex<Vec<NewAlert>>,
    }

    #[async_trait]
    impl AlertStore for MemAlerts {
        async fn append_alert(&self, alert: &NewAlert) -> Result<i64> {
            let mut rows = self.rows.lock().unwrap();
            rows.push(alert.clone());
            Ok(rows.len() as i64)
        }
    }

    /// Insight generator that always produces the same commentary.
    struct CannedInsight(Option<String>);

    #[async_trait]
    impl InsightGenerator for CannedInsight {
        async fn generate_commentary(
            &self,
            _title: &str,
            _old: &Snapshot,
            _new: &Snapshot,
            _window_minutes: i64,
        ) -> Option<String> {
            self.0.clone()
        }
    }

    struct Fixture {
        source: Arc<FakeSource>,
        history: Arc<MemHistory>,
        alerts: Arc<MemAlerts>,
        worker: PollingWorker,
    }

    fn fixture(
        source: FakeSource,
        history: MemHistory,
        subs: MemSubscriptions,
        insight: Option<String>,
    ) -> Fixture {
        let cfg = test_config();
        let source = Arc::new(source);
        let history = Arc::new(history);
        let alerts = Arc::new(MemAlerts::default());
        let worker = PollingWorker::new(
            &cfg,
            source.clone(),
            Arc::new(CannedInsight(insight)),
            history.clone(),
            Arc::new(subs),
            alerts.clone(),
        );
        Fixture { source, history, alerts, worker }
    }

    fn test_config() -> Config {
        Config {
            gamma_api_url: String::new(),
            clob_api_url: String::new(),
            log_level: "info".to_string(),
            db_path: String::new(),
            api_port: 0,
            poll_interval_secs: 300,
            alert_threshold_pct: 10.0,
            comparison_window_min: 60,
            anthropic_api_key: None,
            insight_model: String::new(),
            enable_worker: true,
        }
    }

    fn mins_ago(minutes: i64) -> i64 {
        now_ms() - minutes * 60_000
    }

    #[tokio::test]
    async fn below_threshold_creates_no_alerts() {
        // 48.0 -> 55.0 with threshold 10.0: change 7.0, no alert.
        let f = fixture(
            FakeSource {
                snapshots: HashMap::from([("m1".to_string(), Some(55.0))]),
                ..Default::default()
            },
            MemHistory::with_rows(vec![snap("m1", mins_ago(30), 48.0)]),
            MemSubscriptions {
                by_market: HashMap::from([("m1".to_string(), vec![1])]),
            },
            None,
        );

        f.worker.run_cycle().await.unwrap();

        assert!(f.alerts.rows.lock().unwrap().is_empty());
        // The snapshot is still appended - history grows regardless.
        assert_eq!(f.history.count_for("m1"), 2);
    }

    #[tokio::test]
    async fn threshold_crossing_fans_out_to_every_subscriber() {
        // 40.0 -> 55.0 with threshold 10.0: change +15.0, three subscribers.
        let f = fixture(
            FakeSource {
                snapshots: HashMap::from([("m1".to_string(), Some(55.0))]),
                ..Default::default()
            },
            MemHistory::with_rows(vec![snap("m1", mins_ago(30), 40.0)]),
            MemSubscriptions {
                by_market: HashMap::from([("m1".to_string(), vec![1, 2, 3])]),
            },
            Some("Volume spiked on news.".to_string()),
        );

        f.worker.run_cycle().await.unwrap();

        let alerts = f.alerts.rows.lock().unwrap();
        assert_eq!(alerts.len(), 3);
        let mut user_ids: Vec<i64> = alerts.iter().map(|a| a.user_id).collect();
        user_ids.sort();
        assert_eq!(user_ids, vec![1, 2, 3]);
        for alert in alerts.iter() {
            assert_eq!(alert.change_pct, 15.0);
            assert_eq!(alert.threshold, 10.0);
            assert_eq!(alert.market_id, "m1");
            assert_eq!(alert.insight_text.as_deref(), Some("Volume spiked on news."));
        }
    }

    #[tokio::test]
    async fn no_baseline_in_window_means_no_alert() {
        // Only history is 2 hours old - outside the 60-minute window. An
        // extreme current probability still must not alert.
        let f = fixture(
            FakeSource {
                snapshots: HashMap::from([("m1".to_string(), Some(99.0))]),
                ..Default::default()
            },
            MemHistory::with_rows(vec![snap("m1", mins_ago(120), 5.0)]),
            MemSubscriptions {
                by_market: HashMap::from([("m1".to_string(), vec![1])]),
            },
            None,
        );

        f.worker.run_cycle().await.unwrap();

        // The fresh snapshot is its own earliest-in-window point, so the
        // delta is zero. Snapshot written, zero alerts.
        assert!(f.alerts.rows.lock().unwrap().is_empty());
        assert_eq!(f.history.count_for("m1"), 2);
    }

    #[tokio::test]
    async fn brand_new_market_history_starts_without_alert() {
        let f = fixture(
            FakeSource {
                snapshots: HashMap::from([("m1".to_string(), Some(97.0))]),
                ..Default::default()
            },
            MemHistory::default(),
            MemSubscriptions {
                by_market: HashMap::from([("m1".to_string(), vec![1])]),
            },
            None,
        );

        f.worker.run_cycle().await.unwrap();

        assert!(f.alerts.rows.lock().unwrap().is_empty());
        assert_eq!(f.history.count_for("m1"), 1);
    }

    #[tokio::test]
    async fn baseline_is_earliest_point_in_window() {
        // Two in-window points: 30.0 at T-50min and 52.0 at T-10min. Against
        // the earliest the move is +25 (alert); against the latest it would
        // be +3 (no alert).
        let f = fixture(
            FakeSource {
                snapshots: HashMap::from([("m1".to_string(), Some(55.0))]),
                ..Default::default()
            },
            MemHistory::with_rows(vec![
                snap("m1", mins_ago(50), 30.0),
                snap("m1", mins_ago(10), 52.0),
            ]),
            MemSubscriptions {
                by_market: HashMap::from([("m1".to_string(), vec![7])]),
            },
            None,
        );

        f.worker.run_cycle().await.unwrap();

        let alerts = f.alerts.rows.lock().unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].change_pct, 25.0);
    }

    #[tokio::test]
    async fn unpinned_markets_are_never_fetched() {
        let f = fixture(
            FakeSource {
                snapshots: HashMap::from([
                    ("pinned".to_string(), Some(50.0)),
                    ("ignored".to_string(), Some(50.0)),
                ]),
                ..Default::default()
            },
            MemHistory::default(),
            MemSubscriptions {
                by_market: HashMap::from([("pinned".to_string(), vec![1])]),
            },
            None,
        );

        f.worker.run_cycle().await.unwrap();

        assert_eq!(*f.source.fetched.lock().unwrap(), vec!["pinned".to_string()]);
        assert_eq!(f.history.count_for("ignored"), 0);
    }

    #[tokio::test]
    async fn one_failing_market_does_not_abort_the_cycle() {
        // Three pinned markets: m1 ok, m2 not found upstream, m3 errors.
        let f = fixture(
            FakeSource {
                snapshots: HashMap::from([
                    ("m1".to_string(), Some(55.0)),
                    ("m2".to_string(), None),
                ]),
                fail: vec!["m3".to_string()],
                ..Default::default()
            },
            MemHistory::with_rows(vec![
                snap("m1", mins_ago(30), 40.0),
                snap("m3", mins_ago(30), 40.0),
            ]),
            MemSubscriptions {
                by_market: HashMap::from([
                    ("m1".to_string(), vec![1]),
                    ("m2".to_string(), vec![1]),
                    ("m3".to_string(), vec![1]),
                ]),
            },
            None,
        );

        let failed = f.worker.run_cycle().await.unwrap();

        // m1 polled and alerted; m2/m3 produced neither snapshot nor alert,
        // and both count against the cycle.
        assert_eq!(failed, 2);
        assert_eq!(f.history.count_for("m1"), 2);
        assert_eq!(f.history.count_for("m2"), 0);
        assert_eq!(f.history.count_for("m3"), 1); // only the seeded row
        let alerts = f.alerts.rows.lock().unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].market_id, "m1");
    }

    #[tokio::test]
    async fn insight_failure_degrades_commentary_not_the_alert() {
        let f = fixture(
            FakeSource {
                snapshots: HashMap::from([("m1".to_string(), Some(55.0))]),
                ..Default::default()
            },
            MemHistory::with_rows(vec![snap("m1", mins_ago(30), 40.0)]),
            MemSubscriptions {
                by_market: HashMap::from([("m1".to_string(), vec![1])]),
            },
            None, // generator unavailable
        );

        f.worker.run_cycle().await.unwrap();

        let alerts = f.alerts.rows.lock().unwrap();
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].insight_text.is_none());
        assert_eq!(alerts[0].change_pct, 15.0);
    }

    #[tokio::test]
    async fn seed_first_alert_on_empty_history_has_zero_change() {
        let f = fixture(
            FakeSource {
                snapshots: HashMap::from([("m1".to_string(), Some(72.0))]),
                ..Default::default()
            },
            MemHistory::default(),
            MemSubscriptions::default(),
            None,
        );

        f.worker.seed_first_alert(9, "m1").await.unwrap();

        let alerts = f.alerts.rows.lock().unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].user_id, 9);
        assert_eq!(alerts[0].change_pct, 0.0);
        assert_eq!(f.history.count_for("m1"), 1);
    }

    #[tokio::test]
    async fn seed_first_alert_uses_latest_history_as_baseline() {
        let f = fixture(
            FakeSource {
                snapshots: HashMap::from([("m1".to_string(), Some(55.0))]),
                ..Default::default()
            },
            MemHistory::with_rows(vec![
                snap("m1", mins_ago(90), 20.0),
                snap("m1", mins_ago(5), 40.0),
            ]),
            MemSubscriptions::default(),
            None,
        );

        f.worker.seed_first_alert(4, "m1").await.unwrap();

        let alerts = f.alerts.rows.lock().unwrap();
        assert_eq!(alerts.len(), 1);
        // Latest point (40.0) is the baseline, not the window-earliest.
        assert_eq!(alerts[0].change_pct, 15.0);
        assert_eq!(f.history.count_for("m1"), 3);
    }

    #[tokio::test]
    async fn seed_first_alert_skips_quietly_when_market_missing() {
        let f = fixture(
            FakeSource::default(),
            MemHistory::default(),
            MemSubscriptions::default(),
            None,
        );

        f.worker.seed_first_alert(1, "ghost").await.unwrap();

        assert!(f.alerts.rows.lock().unwrap().is_empty());
        assert_eq!(f.history.count_for("ghost"), 0);
    }

    #[tokio::test]
    async fn stop_signal_ends_the_loop() {
        let f = fixture(
            FakeSource::default(),
            MemHistory::default(),
            MemSubscriptions::default(),
            None,
        );
        let (stop_tx, stop_rx) = watch::channel(false);

        let handle = tokio::spawn(Arc::new(f.worker).run(stop_rx));
        stop_tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("worker did not stop")
            .unwrap();
    }
}
