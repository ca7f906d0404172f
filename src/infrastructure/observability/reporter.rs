//! Push-based metrics reporter for the alert engine.
//!
//! Periodically outputs metrics as structured JSON to stdout. No HTTP
//! server, no incoming connections — only outbound data, same shape as
//! `rustrade::infrastructure::observability::reporter`.

use crate::infrastructure::observability::metrics::Metrics;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Engine-side counters the reporter snapshots each tick. Updated by the
/// application layer (lease coordinator, alert cache refresh) the same way
/// `rustrade`'s reporter reads a shared `Portfolio`.
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    pub lease_owned: bool,
    pub active_price_alerts: usize,
    pub active_complex_alerts: usize,
    pub fired_total: u64,
}

#[derive(Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: String,
    pub uptime_seconds: u64,
    pub version: String,
    pub lease_owned: bool,
    pub active_price_alerts: usize,
    pub active_complex_alerts: usize,
    pub fired_total: u64,
}

/// Push-based metrics reporter. Outputs metrics as structured JSON logs on
/// a configurable interval.
pub struct MetricsReporter {
    stats: Arc<RwLock<EngineStats>>,
    metrics: Metrics,
    start_time: Instant,
    interval: Duration,
}

impl MetricsReporter {
    pub fn new(stats: Arc<RwLock<EngineStats>>, metrics: Metrics, interval_seconds: u64) -> Self {
        Self {
            stats,
            metrics,
            start_time: Instant::now(),
            interval: Duration::from_secs(interval_seconds),
        }
    }

    pub async fn run(self) {
        info!(
            "MetricsReporter: starting push-based metrics (interval: {:?})",
            self.interval
        );

        loop {
            tokio::time::sleep(self.interval).await;

            match self.collect_snapshot().await {
                Ok(snapshot) => match serde_json::to_string(&snapshot) {
                    Ok(json) => {
                        println!("METRICS_JSON:{json}");
                        info!(
                            scope = "alertEngine",
                            lease_owned = snapshot.lease_owned,
                            active_price_alerts = snapshot.active_price_alerts,
                            active_complex_alerts = snapshot.active_complex_alerts,
                            "metrics tick"
                        );
                    }
                    Err(e) => warn!("failed to serialize metrics snapshot: {e}"),
                },
                Err(e) => warn!("failed to collect metrics snapshot: {e}"),
            }
        }
    }

    async fn collect_snapshot(&self) -> anyhow::Result<MetricsSnapshot> {
        let stats = self.stats.read().await;
        let uptime = self.start_time.elapsed().as_secs();

        self.metrics
            .lease_owned
            .set(if stats.lease_owned { 1.0 } else { 0.0 });
        self.metrics.uptime_seconds.set(uptime as f64);

        Ok(MetricsSnapshot {
            timestamp: chrono::Utc::now().to_rfc3339(),
            uptime_seconds: uptime,
            version: env!("CARGO_PKG_VERSION").to_string(),
            lease_owned: stats.lease_owned,
            active_price_alerts: stats.active_price_alerts,
            active_complex_alerts: stats.active_complex_alerts,
            fired_total: stats.fired_total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn collects_snapshot_from_shared_stats() {
        let stats = Arc::new(RwLock::new(EngineStats {
            lease_owned: true,
            active_price_alerts: 3,
            active_complex_alerts: 1,
            fired_total: 7,
        }));
        let metrics = Metrics::new().expect("failed to create metrics");
        let reporter = MetricsReporter::new(stats, metrics, 60);

        let snapshot = reporter
            .collect_snapshot()
            .await
            .expect("failed to collect snapshot");

        assert!(snapshot.lease_owned);
        assert_eq!(snapshot.active_price_alerts, 3);
        assert_eq!(snapshot.fired_total, 7);
    }

    #[test]
    fn snapshot_serializes() {
        let snapshot = MetricsSnapshot {
            timestamp: "2026-07-28T00:00:00Z".to_string(),
            uptime_seconds: 120,
            version: "0.1.0".to_string(),
            lease_owned: true,
            active_price_alerts: 2,
            active_complex_alerts: 0,
            fired_total: 5,
        };
        let json = serde_json::to_string(&snapshot).expect("failed to serialize");
        assert!(json.contains("lease_owned"));
    }
}
