//! Low-frequency historical crossing recovery (§4.H): catches price-alert
//! crossings the Fast Loop missed during an outage, a cold start, or lease
//! flapping, by inspecting authoritative closed candles.

use crate::application::trigger_sink::TriggerSink;
use crate::domain::events::{PricePayload, TriggerHeader, TriggerPayload};
use crate::domain::ports::AdapterRegistry;
use crate::domain::repositories::AlertRepository;
use crate::domain::symbol::normalize;
use crate::domain::types::{Alert, Condition, Kline};
use crate::infrastructure::observability::Metrics;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const KLINES_SWEEP_INTERVAL_SECS: u64 = 120;
pub const KLINES_LOOKBACK_SECS: i64 = 24 * 60 * 60;
/// Grace period before the first sweep, letting adapters warm their active-
/// symbol caches first (§4.H).
pub const KLINES_INITIAL_DELAY_SECS: u64 = 30;
const KLINES_INTERVAL: &str = "1m";
const MAX_CANDLES_PER_ALERT: usize = 1_500;

pub struct KlinesSweep {
    alerts: Arc<dyn AlertRepository>,
    adapters: AdapterRegistry,
    trigger_sink: Arc<TriggerSink>,
    lookback_secs: i64,
    interval: Duration,
    initial_delay: Duration,
    metrics: Option<Arc<Metrics>>,
}

impl KlinesSweep {
    pub fn new(
        alerts: Arc<dyn AlertRepository>,
        adapters: AdapterRegistry,
        trigger_sink: Arc<TriggerSink>,
        lookback_secs: i64,
        interval_secs: u64,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        Self {
            alerts,
            adapters,
            trigger_sink,
            lookback_secs,
            interval: Duration::from_secs(interval_secs),
            initial_delay: Duration::from_secs(KLINES_INITIAL_DELAY_SECS),
            metrics,
        }
    }

    pub async fn run(self: Arc<Self>) {
        tokio::time::sleep(self.initial_delay).await;

        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            info!(scope = "alertEngine", "klines.sweep.start");
            if let Err(err) = self.sweep_once().await {
                error!(scope = "alertEngine", "klines.sweep.error: {err}");
            } else {
                info!(scope = "alertEngine", "klines.sweep.done");
            }
        }
    }

    pub async fn sweep_once(&self) -> anyhow::Result<()> {
        let alerts = self.alerts.find_active_price_alerts().await?;
        let now = chrono::Utc::now();

        for alert in alerts.iter().filter(|a| a.is_evaluable_price_alert()) {
            self.sweep_alert(alert, now).await;
        }

        Ok(())
    }

    async fn sweep_alert(&self, alert: &Alert, now: chrono::DateTime<chrono::Utc>) {
        let Some(raw_symbol) = alert.first_symbol() else {
            return;
        };
        let Some(target) = alert.target_value else {
            return;
        };
        let Some(adapter) = self.adapters.get(&alert.exchange) else {
            return;
        };
        let canonical = normalize(raw_symbol);

        let lookback_start = now - chrono::Duration::seconds(self.lookback_secs);
        let since = alert.created_at.max(lookback_start);
        let span_secs = (now - since).num_seconds().max(60);
        let limit = ((span_secs / 60) as usize + 1).min(MAX_CANDLES_PER_ALERT);

        let klines = match adapter
            .fetch_klines(&canonical, alert.market, KLINES_INTERVAL, limit, None)
            .await
        {
            Ok(klines) => klines,
            Err(err) => {
                warn!(alert_id = %alert.id, "klines_sweep: fetch_klines failed: {err}");
                if let Some(metrics) = &self.metrics {
                    metrics.inc_adapter_errors(&alert.exchange);
                }
                return;
            }
        };

        let relevant: Vec<&Kline> = klines
            .iter()
            .filter(|k| k.open_time >= since.timestamp())
            .collect();

        if !crossing_exists(&relevant, target) {
            return;
        }

        let resolved_condition = if let Some(initial) = alert.initial_price {
            if initial > target {
                Condition::Below
            } else {
                Condition::Above
            }
        } else {
            alert.condition.unwrap_or(Condition::Above)
        };

        let current_price = relevant.last().map(|k| k.close).unwrap_or(target);

        let payload = TriggerPayload::Price(PricePayload {
            header: TriggerHeader {
                alert_id: alert.id.clone(),
                user_id: alert.user_id.clone(),
                name: alert.name.clone(),
                description: alert.description.clone(),
                triggered: true,
                triggered_at: chrono::Utc::now(),
            },
            symbol: canonical.clone(),
            current_price,
            target_value: target,
            condition: resolved_condition,
        });

        if self.trigger_sink.fire(payload).await {
            debug!(alert_id = %alert.id, "klines_sweep: recovered missed crossing");
        }
    }
}

/// A crossing exists when some candle's `[low, high]` interval contains the
/// target, or the target lies strictly between two consecutive closes
/// (§4.H).
fn crossing_exists(klines: &[&Kline], target: f64) -> bool {
    if klines.iter().any(|k| k.low <= target && target <= k.high) {
        return true;
    }

    klines
        .windows(2)
        .any(|pair| (pair[0].close - target) * (pair[1].close - target) < 0.0)
}
