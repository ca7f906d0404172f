//! Prometheus metrics definitions for the alert engine.
//!
//! All metrics use the `alert_engine_` prefix and are read-only.

use prometheus::{
    core::{AtomicF64, GenericGauge},
    CounterVec, Gauge, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Prometheus metrics for the alert engine.
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    /// 1 if this instance currently owns the evaluation lease, 0 otherwise.
    pub lease_owned: GenericGauge<AtomicF64>,
    /// Fired alerts by type ("price"/"complex").
    pub alerts_fired_total: CounterVec,
    /// Adapter call errors by exchange id.
    pub adapter_errors_total: CounterVec,
    /// Complex-alert evaluations skipped due to cooldown (§4.D).
    pub cooldown_skips_total: CounterVec,
    /// Ring buffer samples dropped for retention/capacity reasons (§4.C).
    pub ring_buffer_drops_total: CounterVec,
    /// Fan-in mailbox messages dropped under backpressure (§4.B).
    pub fanin_mailbox_drops_total: CounterVec,
    /// Uptime in seconds.
    pub uptime_seconds: GenericGauge<AtomicF64>,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let lease_owned = Gauge::with_opts(Opts::new(
            "alert_engine_lease_owned",
            "1 if this instance owns the evaluation lease",
        ))?;
        registry.register(Box::new(lease_owned.clone()))?;

        let alerts_fired_total = CounterVec::new(
            Opts::new("alert_engine_alerts_fired_total", "Total alerts fired by type"),
            &["alert_type"],
        )?;
        registry.register(Box::new(alerts_fired_total.clone()))?;

        let adapter_errors_total = CounterVec::new(
            Opts::new(
                "alert_engine_adapter_errors_total",
                "Total exchange adapter call errors",
            ),
            &["exchange"],
        )?;
        registry.register(Box::new(adapter_errors_total.clone()))?;

        let cooldown_skips_total = CounterVec::new(
            Opts::new(
                "alert_engine_cooldown_skips_total",
                "Complex alert evaluations skipped due to cooldown",
            ),
            &["alert_id"],
        )?;
        registry.register(Box::new(cooldown_skips_total.clone()))?;

        let ring_buffer_drops_total = CounterVec::new(
            Opts::new(
                "alert_engine_ring_buffer_drops_total",
                "Ring buffer samples dropped",
            ),
            &["symbol"],
        )?;
        registry.register(Box::new(ring_buffer_drops_total.clone()))?;

        let fanin_mailbox_drops_total = CounterVec::new(
            Opts::new(
                "alert_engine_fanin_mailbox_drops_total",
                "Fan-in mailbox messages dropped under backpressure",
            ),
            &["exchange_market"],
        )?;
        registry.register(Box::new(fanin_mailbox_drops_total.clone()))?;

        let uptime_seconds = Gauge::with_opts(Opts::new(
            "alert_engine_uptime_seconds",
            "Engine uptime in seconds",
        ))?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            lease_owned,
            alerts_fired_total,
            adapter_errors_total,
            cooldown_skips_total,
            ring_buffer_drops_total,
            fanin_mailbox_drops_total,
            uptime_seconds,
        })
    }

    /// Render all metrics in Prometheus text format.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder
            .encode_to_string(&metric_families)
            .unwrap_or_default()
    }

    pub fn inc_alerts_fired(&self, alert_type: &str) {
        self.alerts_fired_total.with_label_values(&[alert_type]).inc();
    }

    pub fn inc_adapter_errors(&self, exchange: &str) {
        self.adapter_errors_total.with_label_values(&[exchange]).inc();
    }

    pub fn inc_cooldown_skips(&self, alert_id: &str) {
        self.cooldown_skips_total.with_label_values(&[alert_id]).inc();
    }

    pub fn inc_ring_buffer_drops(&self, symbol: &str) {
        self.ring_buffer_drops_total.with_label_values(&[symbol]).inc();
    }

    pub fn inc_fanin_mailbox_drops(&self, exchange_market: &str) {
        self.fanin_mailbox_drops_total
            .with_label_values(&[exchange_market])
            .inc();
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("failed to create default Metrics")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_render_contains_prefix() {
        let metrics = Metrics::new().expect("failed to create metrics");
        assert!(metrics.render().contains("alert_engine_"));
    }

    #[test]
    fn alerts_fired_counter_increments() {
        let metrics = Metrics::new().expect("failed to create metrics");
        metrics.inc_alerts_fired("price");
        metrics.inc_alerts_fired("price");
        let output = metrics.render();
        assert!(output.contains("alert_engine_alerts_fired_total"));
    }

    #[test]
    fn lease_owned_gauge_updates() {
        let metrics = Metrics::new().expect("failed to create metrics");
        metrics.lease_owned.set(1.0);
        assert!(metrics.render().contains("alert_engine_lease_owned 1"));
    }
}
