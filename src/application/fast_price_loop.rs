//! Sub-second price-alert loop (§4.G): touch/cross detection against the
//! previous observed price, with the legacy `condition` fallback for
//! pre-`initialPrice` alerts (§9 open question, resolved as written).

use crate::application::trigger_sink::TriggerSink;
use crate::domain::events::{PricePayload, TriggerHeader, TriggerPayload};
use crate::domain::ports::{AdapterRegistry, PriceLookupOptions};
use crate::domain::repositories::AlertRepository;
use crate::domain::symbol::normalize;
use crate::domain::types::{Alert, Condition, Market};
use crate::infrastructure::observability::Metrics;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, warn};

pub const FAST_PRICE_INTERVAL_MS_DEFAULT: u64 = 300;
pub const FAST_PRICE_INTERVAL_MS_FLOOR: u64 = 150;
/// Per-group cap on the "fresh per-symbol" lookup pass, to avoid hammering
/// an exchange's per-symbol endpoint for large watchlists (§4.G step 2).
const FRESH_LOOKUP_CAP: usize = 30;

pub struct FastPriceLoop {
    alerts: Arc<dyn AlertRepository>,
    adapters: AdapterRegistry,
    trigger_sink: Arc<TriggerSink>,
    observed: RwLock<HashMap<String, f64>>,
    metrics: Option<Arc<Metrics>>,
    interval: Duration,
    running: AtomicBool,
}

impl FastPriceLoop {
    pub fn new(
        alerts: Arc<dyn AlertRepository>,
        adapters: AdapterRegistry,
        trigger_sink: Arc<TriggerSink>,
        interval_ms: u64,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        let interval_ms = interval_ms.max(FAST_PRICE_INTERVAL_MS_FLOOR);
        Self {
            alerts,
            adapters,
            trigger_sink,
            observed: RwLock::new(HashMap::new()),
            metrics,
            interval: Duration::from_millis(interval_ms),
            running: AtomicBool::new(false),
        }
    }

    /// Long-running loop; spawn via `tokio::spawn(loop_.run())`. Non-
    /// reentrant per §5: a cycle still in flight when the next tick fires
    /// is skipped and counted, rather than overlapping with itself.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;

            if self.running.swap(true, Ordering::SeqCst) {
                warn!("fast_price_loop: previous cycle still running, skipping tick");
                continue;
            }
            if let Err(err) = self.run_once().await {
                error!("fast_price_loop: cycle failed: {err}");
            }
            self.running.store(false, Ordering::SeqCst);
        }
    }

    pub async fn run_once(&self) -> anyhow::Result<()> {
        let alerts: Vec<Alert> = self
            .alerts
            .find_active_price_alerts()
            .await?
            .into_iter()
            .filter(|a| a.is_evaluable_price_alert() && !a.symbols.is_empty())
            .collect();

        if alerts.is_empty() {
            return Ok(());
        }

        let mut groups: HashMap<(String, Market), Vec<&Alert>> = HashMap::new();
        for alert in &alerts {
            groups
                .entry((alert.exchange.clone(), alert.market))
                .or_default()
                .push(alert);
        }

        for ((exchange, market), group_alerts) in groups {
            let Some(adapter) = self.adapters.get(&exchange) else {
                warn!(%exchange, "fast_price_loop: no adapter registered, skipping group");
                continue;
            };

            let symbols: Vec<String> = group_alerts
                .iter()
                .filter_map(|a| a.first_symbol())
                .map(normalize)
                .collect::<HashSet<_>>()
                .into_iter()
                .collect();

            let mut prices = match adapter
                .get_last_prices_by_symbols(&symbols, market, PriceLookupOptions::default())
                .await
            {
                Ok(prices) => prices,
                Err(err) => {
                    warn!(%exchange, "fast_price_loop: bulk price fetch failed: {err}");
                    if let Some(metrics) = &self.metrics {
                        metrics.inc_adapter_errors(&exchange);
                    }
                    continue;
                }
            };

            for chunk in symbols.iter().take(FRESH_LOOKUP_CAP) {
                if let Ok(fresh) = adapter
                    .get_last_prices_by_symbols(
                        std::slice::from_ref(chunk),
                        market,
                        PriceLookupOptions::default(),
                    )
                    .await
                {
                    prices.extend(fresh);
                }
            }

            for alert in group_alerts {
                self.evaluate_alert(alert, &prices).await;
            }
        }

        Ok(())
    }

    async fn evaluate_alert(&self, alert: &Alert, prices: &HashMap<String, f64>) {
        let Some(raw_symbol) = alert.first_symbol() else {
            return;
        };
        let canonical = normalize(raw_symbol);

        let Some(&current) = prices.get(&canonical) else {
            debug!(alert_id = %alert.id, symbol = %canonical, "fast_price_loop: no price for symbol, skipping");
            return;
        };

        let Some(target) = alert.target_value else {
            return;
        };

        let previous = {
            let observed = self.observed.read().await;
            observed.get(&alert.id).copied()
        }
        .or(alert.initial_price);

        let tolerance = (target.abs() * 1e-4).max(1e-8);

        let touched = (current - target).abs() <= tolerance;
        let crossed = previous.is_some_and(|p| (p - target) * (current - target) < 0.0);
        let legacy_fallback = previous.is_none()
            && alert.initial_price.is_none()
            && alert
                .condition
                .map(|c| match c {
                    Condition::Above => current >= target - tolerance,
                    Condition::Below => current <= target + tolerance,
                })
                .unwrap_or(false);

        if touched || crossed || legacy_fallback {
            let resolved_condition = resolve_direction(alert, target);
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
                current_price: current,
                target_value: target,
                condition: resolved_condition,
            });

            if self.trigger_sink.fire(payload).await {
                self.observed.write().await.remove(&alert.id);
            }
        } else {
            self.observed.write().await.insert(alert.id.clone(), current);
        }
    }
}

/// Resolves the fired direction from `initialPrice` vs `target`, falling
/// back to the legacy `condition` hint (§4.G).
fn resolve_direction(alert: &Alert, target: f64) -> Condition {
    if let Some(initial) = alert.initial_price {
        if initial > target {
            Condition::Below
        } else {
            Condition::Above
        }
    } else {
        alert.condition.unwrap_or(Condition::Above)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::ExchangePriceAdapter;
    use crate::domain::repositories::UserDirectory;
    use crate::domain::types::{AlertType, Kline};
    use crate::infrastructure::{RealtimeSink, TelegramMessenger};
    use anyhow::Result;
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    struct StaticPriceAdapter {
        price: RwLock<f64>,
    }

    #[async_trait]
    impl ExchangePriceAdapter for StaticPriceAdapter {
        fn exchange_id(&self) -> &str {
            "binance"
        }

        async fn get_last_prices_by_symbols(
            &self,
            symbols: &[String],
            _market: Market,
            _options: PriceLookupOptions,
        ) -> Result<HashMap<String, f64>> {
            let price = *self.price.read().await;
            Ok(symbols.iter().map(|s| (s.clone(), price)).collect())
        }

        async fn fetch_active_symbols(&self, _market: Market) -> Result<Vec<String>> {
            Ok(vec!["BTCUSDT".to_string()])
        }

        async fn fetch_klines(
            &self,
            _symbol: &str,
            _market: Market,
            _interval: &str,
            _limit: usize,
            _before: Option<i64>,
        ) -> Result<Vec<Kline>> {
            Ok(vec![])
        }
    }

    struct InMemoryAlerts(Mutex<Vec<Alert>>);

    #[async_trait]
    impl AlertRepository for InMemoryAlerts {
        async fn find_active(&self) -> Result<Vec<Alert>> {
            Ok(self.0.lock().await.clone())
        }
        async fn find_active_price_alerts(&self) -> Result<Vec<Alert>> {
            Ok(self.0.lock().await.clone())
        }
        async fn find_active_complex_alerts(&self) -> Result<Vec<Alert>> {
            Ok(vec![])
        }
        async fn find_by_id(&self, id: &str) -> Result<Option<Alert>> {
            Ok(self.0.lock().await.iter().find(|a| a.id == id).cloned())
        }
        async fn delete(&self, id: &str) -> Result<bool> {
            let mut alerts = self.0.lock().await;
            let before = alerts.len();
            alerts.retain(|a| a.id != id);
            Ok(alerts.len() < before)
        }
        async fn mark_triggered(
            &self,
            _id: &str,
            _triggered_at: chrono::DateTime<chrono::Utc>,
        ) -> Result<()> {
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

    fn price_alert(initial_price: Option<f64>, target: f64) -> Alert {
        Alert {
            id: "a1".to_string(),
            user_id: "u1".to_string(),
            name: "BTC touch".to_string(),
            description: None,
            alert_type: AlertType::Price,
            exchange: "binance".to_string(),
            market: Market::Spot,
            symbols: vec!["BTCUSDT".to_string()],
            target_value: Some(target),
            condition: None,
            initial_price,
            conditions: None,
            notification_options: None,
            is_active: true,
            triggered: false,
            triggered_at: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    fn fast_loop(
        alerts: Arc<InMemoryAlerts>,
        adapter: Arc<StaticPriceAdapter>,
    ) -> FastPriceLoop {
        let mut registry: AdapterRegistry = HashMap::new();
        registry.insert("binance".to_string(), adapter);
        let trigger_sink = Arc::new(TriggerSink::new(
            alerts.clone(),
            Arc::new(NoChatId),
            RealtimeSink::new(),
            Arc::new(TelegramMessenger::new("dummy".to_string())),
            None,
        ));
        FastPriceLoop::new(alerts, registry, trigger_sink, 300, None)
    }

    #[tokio::test]
    async fn touch_below_fires_and_deletes_alert() {
        let alerts = Arc::new(InMemoryAlerts(Mutex::new(vec![price_alert(
            Some(52_000.0),
            50_000.0,
        )])));
        let adapter = Arc::new(StaticPriceAdapter {
            price: RwLock::new(50_001.0),
        });
        let loop_ = fast_loop(alerts.clone(), adapter);

        loop_.run_once().await.unwrap();

        assert!(alerts.0.lock().await.is_empty());
    }

    #[tokio::test]
    async fn fast_cross_between_samples_fires() {
        let alerts = Arc::new(InMemoryAlerts(Mutex::new(vec![price_alert(
            Some(95.0),
            100.0,
        )])));
        let adapter = Arc::new(StaticPriceAdapter {
            price: RwLock::new(98.0),
        });
        let loop_ = fast_loop(alerts.clone(), adapter.clone());

        // First cycle observes 98 (no touch, no cross yet since no previous).
        loop_.run_once().await.unwrap();
        assert_eq!(alerts.0.lock().await.len(), 1);

        *adapter.price.write().await = 110.0;
        loop_.run_once().await.unwrap();

        assert!(alerts.0.lock().await.is_empty());
    }

    #[tokio::test]
    async fn far_from_target_leaves_alert_active_and_remembers_price() {
        let alerts = Arc::new(InMemoryAlerts(Mutex::new(vec![price_alert(
            Some(10_000.0),
            50_000.0,
        )])));
        let adapter = Arc::new(StaticPriceAdapter {
            price: RwLock::new(20_000.0),
        });
        let loop_ = fast_loop(alerts.clone(), adapter);

        loop_.run_once().await.unwrap();

        assert_eq!(alerts.0.lock().await.len(), 1);
        assert_eq!(
            loop_.observed.read().await.get("a1").copied(),
            Some(20_000.0)
        );
    }
}
