//! Per-tick complex alert evaluation (§4.E). Firing is dispatched to a
//! background task so the event pipeline never blocks on persistence or
//! notification (§9 "Async control flow").

use crate::application::complex_cache::{in_scope, CachedComplexAlert, ComplexAlertCache};
use crate::application::lease_coordinator::ShutdownGate;
use crate::application::ring_buffer::RingBufferStore;
use crate::application::trigger_sink::TriggerSink;
use crate::domain::events::{ComplexPayload, TriggerHeader, TriggerPayload};
use crate::domain::symbol::normalize;
use crate::domain::types::{Market, MarketTick, WindowStats};
use crate::infrastructure::observability::Metrics;
use chrono::TimeZone;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

pub const COOLDOWN_SECS: i64 = 30;

/// `alertId -> (symbol -> last-fire ts ms)`, written only by the
/// lease-holding worker (§5) so reads/writes never need an extra mutex
/// beyond the map's own lock.
type LastTriggerMap = HashMap<String, HashMap<String, i64>>;

pub struct TickEvaluator {
    ring_buffer: Arc<RingBufferStore>,
    cache: Arc<ComplexAlertCache>,
    trigger_sink: Arc<TriggerSink>,
    last_trigger: RwLock<LastTriggerMap>,
    cooldown_ms: i64,
    metrics: Option<Arc<Metrics>>,
    /// Gates the background `fire` task spawned per firing symbol (§5): no
    /// new fire task starts once shutdown is signalled, so the coordinator
    /// can wait for the ones already in flight before releasing the lease.
    shutdown_gate: Option<Arc<ShutdownGate>>,
}

impl TickEvaluator {
    pub fn new(
        ring_buffer: Arc<RingBufferStore>,
        cache: Arc<ComplexAlertCache>,
        trigger_sink: Arc<TriggerSink>,
        cooldown_secs: i64,
        metrics: Option<Arc<Metrics>>,
        shutdown_gate: Option<Arc<ShutdownGate>>,
    ) -> Self {
        Self {
            ring_buffer,
            cache,
            trigger_sink,
            last_trigger: RwLock::new(HashMap::new()),
            cooldown_ms: cooldown_secs * 1000,
            metrics,
            shutdown_gate,
        }
    }

    async fn can_emit(&self, alert_id: &str, symbol: &str, now_ms: i64) -> bool {
        let map = self.last_trigger.read().await;
        match map.get(alert_id).and_then(|m| m.get(symbol)) {
            Some(&last) => now_ms - last >= self.cooldown_ms,
            None => true,
        }
    }

    async fn mark_trigger(&self, alert_id: &str, symbol: &str, now_ms: i64) {
        let mut map = self.last_trigger.write().await;
        map.entry(alert_id.to_string())
            .or_default()
            .insert(symbol.to_string(), now_ms);
    }

    /// Step 1-3 of §4.E: scope, cooldown, window stats, and the span
    /// threshold check for every symbol this tick touched. Firing (step 4)
    /// is spawned as a background task.
    pub async fn handle_tick(self: &Arc<Self>, tick: &MarketTick) {
        if !self
            .cache
            .is_active_exchange_market(&tick.exchange, tick.market)
            .await
        {
            return;
        }

        let retention_sec = self.cache.required_retention_sec().await;
        self.ring_buffer
            .append(&tick.exchange, tick.market, &tick.prices, tick.ts, retention_sec)
            .await;

        for raw_symbol in tick.prices.keys().cloned().collect::<Vec<_>>() {
            let canonical = normalize(&raw_symbol);
            self.evaluate_symbol(tick, &canonical).await;
        }
    }

    /// Scope, cooldown, window stats, and the span threshold check for one
    /// already-canonical symbol against every cached alert for this tick's
    /// `(exchange, market)`. Shared by the tick path (§4.E) and the
    /// Safety-Net Sweeper (§4.F), which calls this without a fresh append.
    pub async fn evaluate_symbol(self: &Arc<Self>, tick: &MarketTick, canonical_symbol: &str) {
        let alerts = self.cache.alerts_for(&tick.exchange, tick.market).await;

        for alert in &alerts {
            if !in_scope(alert, canonical_symbol) {
                continue;
            }

            if !self.can_emit(&alert.alert_id, canonical_symbol, tick.ts).await {
                if let Some(metrics) = &self.metrics {
                    metrics.inc_cooldown_skips(&alert.alert_id);
                }
                continue;
            }

            let Some(stats) = self
                .ring_buffer
                .window_stats(
                    &tick.exchange,
                    alert.market,
                    canonical_symbol,
                    tick.ts,
                    alert.timeframe_sec,
                )
                .await
            else {
                continue;
            };

            if stats.min <= 0.0 {
                continue;
            }
            let span_pct = (stats.max - stats.min) / stats.min * 100.0;
            if span_pct < alert.threshold {
                continue;
            }

            if let Some(gate) = &self.shutdown_gate {
                if !gate.begin_cycle() {
                    debug!(alert_id = %alert.alert_id, "tick_evaluator: shutting down, skipping new fire task");
                    continue;
                }
            }

            let evaluator = Arc::clone(self);
            let alert = alert.clone();
            let symbol = canonical_symbol.to_string();
            let now_ms = tick.ts;
            let gate = self.shutdown_gate.clone();
            tokio::spawn(async move {
                evaluator.fire(alert, symbol, stats, now_ms).await;
                if let Some(gate) = gate {
                    gate.end_cycle();
                }
            });
        }
    }

    pub fn cache_ref(&self) -> &Arc<ComplexAlertCache> {
        &self.cache
    }

    pub fn ring_buffer_ref(&self) -> &Arc<RingBufferStore> {
        &self.ring_buffer
    }

    /// §4.E step 4: re-check cooldown (another path may have fired first
    /// while this task waited to be scheduled), mark the trigger, and hand
    /// the payload to the Trigger Sink.
    async fn fire(self: Arc<Self>, alert: CachedComplexAlert, symbol: String, stats: WindowStats, now_ms: i64) {
        if !self.can_emit(&alert.alert_id, &symbol, now_ms).await {
            return;
        }
        self.mark_trigger(&alert.alert_id, &symbol, now_ms).await;

        let (baseline_price, current_price) = if stats.current >= stats.oldest {
            (stats.min, stats.max)
        } else {
            (stats.max, stats.min)
        };
        let pct_change = (stats.current - stats.oldest) / stats.oldest * 100.0;

        let triggered_at = chrono::Utc
            .timestamp_millis_opt(now_ms)
            .single()
            .unwrap_or_else(chrono::Utc::now);

        let payload = TriggerPayload::Complex(ComplexPayload {
            header: TriggerHeader {
                alert_id: alert.alert_id.clone(),
                user_id: alert.user_id.clone(),
                name: alert.name.clone(),
                description: alert.description.clone(),
                triggered: true,
                triggered_at,
            },
            symbol,
            pct_change,
            baseline_price,
            current_price,
            window_seconds: alert.timeframe_sec,
        });

        if !self.trigger_sink.fire(payload).await {
            warn!(alert_id = %alert.alert_id, "tick_evaluator: trigger sink did not commit fire");
        } else {
            debug!(alert_id = %alert.alert_id, "tick_evaluator: fired complex alert");
        }
    }

    pub async fn active_market(&self, exchange: &str, market: Market) -> bool {
        self.cache.is_active_exchange_market(exchange, market).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::repositories::{AlertRepository, UserDirectory};
    use crate::domain::types::{Alert, AlertCondition, AlertForMode, AlertType, NotificationOptions};
    use crate::infrastructure::{RealtimeSink, TelegramMessenger};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::Mutex;

    struct StaticRepo(Mutex<Vec<Alert>>);

    #[async_trait]
    impl AlertRepository for StaticRepo {
        async fn find_active(&self) -> Result<Vec<Alert>> {
            Ok(self.0.lock().await.clone())
        }
        async fn find_active_price_alerts(&self) -> Result<Vec<Alert>> {
            Ok(vec![])
        }
        async fn find_active_complex_alerts(&self) -> Result<Vec<Alert>> {
            Ok(self.0.lock().await.clone())
        }
        async fn find_by_id(&self, id: &str) -> Result<Option<Alert>> {
            Ok(self.0.lock().await.iter().find(|a| a.id == id).cloned())
        }
        async fn delete(&self, _id: &str) -> Result<bool> {
            Ok(true)
        }
        async fn mark_triggered(&self, _id: &str, _triggered_at: chrono::DateTime<chrono::Utc>) -> Result<()> {
            Ok(())
        }
        async fn upsert(&self, _alert: &Alert) -> Result<()> {
            Ok(())
        }
    }

    struct NoChatId;

    #[async_trait]
    impl UserDirectory for NoChatId {
        async fn telegram_chat_id(&self, _user_id: &str) -> Result<Option<String>> {
            Ok(None)
        }
    }

    fn complex_alert() -> Alert {
        Alert {
            id: "a1".to_string(),
            user_id: "u1".to_string(),
            name: "5pct".to_string(),
            description: None,
            alert_type: AlertType::Complex,
            exchange: "binance".to_string(),
            market: Market::Futures,
            symbols: vec!["BTCUSDT".to_string()],
            target_value: None,
            condition: None,
            initial_price: None,
            conditions: Some(vec![AlertCondition {
                kind: "pct_change".to_string(),
                value: 5.0,
                timeframe: "5m".to_string(),
            }]),
            notification_options: Some(NotificationOptions {
                alert_for_mode: Some(AlertForMode::All),
            }),
            is_active: true,
            triggered: false,
            triggered_at: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    fn prices(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(s, p)| (s.to_string(), *p)).collect()
    }

    #[tokio::test]
    async fn fires_when_span_crosses_threshold() {
        let repo = Arc::new(StaticRepo(Mutex::new(vec![complex_alert()])));
        let cache = Arc::new(ComplexAlertCache::new(repo.clone()));
        cache.refresh().await.unwrap();

        let ring_buffer = Arc::new(RingBufferStore::new(None));
        let trigger_sink = Arc::new(TriggerSink::new(
            repo,
            Arc::new(NoChatId),
            RealtimeSink::new(),
            Arc::new(TelegramMessenger::new("dummy".to_string())),
            None,
        ));

        let evaluator = Arc::new(TickEvaluator::new(
            ring_buffer.clone(),
            cache,
            trigger_sink,
            COOLDOWN_SECS,
            None,
            None,
        ));

        ring_buffer
            .append("binance", Market::Futures, &prices(&[("BTCUSDT", 60_000.0)]), 0, 600)
            .await;

        let tick = MarketTick {
            exchange: "binance".to_string(),
            market: Market::Futures,
            prices: prices(&[("BTCUSDT", 63_100.0)]),
            ts: 300_000,
        };
        evaluator.handle_tick(&tick).await;

        // Firing is spawned on a background task; give it a chance to run.
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn skips_ticks_for_inactive_exchange_market() {
        let repo = Arc::new(StaticRepo(Mutex::new(vec![])));
        let cache = Arc::new(ComplexAlertCache::new(repo.clone()));
        cache.refresh().await.unwrap();

        let ring_buffer = Arc::new(RingBufferStore::new(None));
        let trigger_sink = Arc::new(TriggerSink::new(
            repo,
            Arc::new(NoChatId),
            RealtimeSink::new(),
            Arc::new(TelegramMessenger::new("dummy".to_string())),
            None,
        ));
        let evaluator = Arc::new(TickEvaluator::new(
            ring_buffer.clone(),
            cache,
            trigger_sink,
            COOLDOWN_SECS,
            None,
            None,
        ));

        let tick = MarketTick {
            exchange: "binance".to_string(),
            market: Market::Futures,
            prices: prices(&[("BTCUSDT", 100.0)]),
            ts: 0,
        };
        evaluator.handle_tick(&tick).await;

        assert!(ring_buffer.tracked_symbols("binance", Market::Futures).await.is_empty());
    }
}
