//! Periodic safety-net sweep over every tracked symbol (§4.F): catches
//! crossings missed by the tick path because the window boundary advanced
//! with no new tick. Same scope/cooldown/window/fire logic as the Tick
//! Evaluator — this is a second caller into the same `fire` path.

use crate::application::complex_cache::in_scope;
use crate::application::tick_evaluator::TickEvaluator;
use crate::domain::types::MarketTick;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

pub const SWEEP_INTERVAL_SECS: u64 = 10;

pub struct SafetyNetSweeper {
    evaluator: Arc<TickEvaluator>,
    interval: Duration,
}

impl SafetyNetSweeper {
    pub fn new(evaluator: Arc<TickEvaluator>, interval_secs: u64) -> Self {
        Self {
            evaluator,
            interval: Duration::from_secs(interval_secs),
        }
    }

    /// Long-running loop; spawn via `tokio::spawn(sweeper.run())`.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            if let Err(err) = self.sweep_once().await {
                error!("safety_net_sweeper: sweep failed: {err}");
            }
        }
    }

    pub async fn sweep_once(&self) -> anyhow::Result<()> {
        let cache = self.evaluator.cache_ref();
        let pairs = cache.distinct_exchange_markets().await;
        let now_ms = chrono::Utc::now().timestamp_millis();

        for (exchange, market) in pairs {
            let alerts = cache.alerts_for(&exchange, market).await;
            if alerts.is_empty() {
                continue;
            }

            let symbols = self
                .evaluator
                .ring_buffer_ref()
                .tracked_symbols(&exchange, market)
                .await;

            for symbol in symbols {
                if !alerts.iter().any(|a| in_scope(a, &symbol)) {
                    continue;
                }

                let tick = MarketTick {
                    exchange: exchange.clone(),
                    market,
                    prices: std::collections::HashMap::new(),
                    ts: now_ms,
                };
                // Re-evaluate this one symbol through the same scope/cooldown/
                // window/fire path as a tick, without re-appending a price
                // (there is no new sample — only the window boundary moved).
                self.evaluator.evaluate_symbol(&tick, &symbol).await;
            }
        }

        debug!("safety_net_sweeper: sweep complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::complex_cache::ComplexAlertCache;
    use crate::application::ring_buffer::RingBufferStore;
    use crate::application::tick_evaluator::{TickEvaluator, COOLDOWN_SECS};
    use crate::application::trigger_sink::TriggerSink;
    use crate::domain::repositories::{AlertRepository, UserDirectory};
    use crate::domain::types::{
        Alert, AlertCondition, AlertForMode, AlertType, Market, NotificationOptions,
    };
    use crate::infrastructure::{RealtimeSink, TelegramMessenger};
    use anyhow::Result;
    use async_trait::async_trait;
    use std::collections::HashMap;
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

    #[tokio::test]
    async fn sweep_skips_exchange_markets_with_no_cached_alerts() {
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
            ring_buffer,
            cache,
            trigger_sink,
            COOLDOWN_SECS,
            None,
            None,
        ));
        let sweeper = SafetyNetSweeper::new(evaluator, SWEEP_INTERVAL_SECS);

        sweeper.sweep_once().await.unwrap();
    }

    #[tokio::test]
    async fn sweep_scans_symbols_tracked_but_not_in_last_tick() {
        let repo = Arc::new(StaticRepo(Mutex::new(vec![complex_alert()])));
        let cache = Arc::new(ComplexAlertCache::new(repo.clone()));
        cache.refresh().await.unwrap();

        let ring_buffer = Arc::new(RingBufferStore::new(None));
        ring_buffer
            .append(
                "binance",
                Market::Futures,
                &HashMap::from([("BTCUSDT".to_string(), 60_000.0)]),
                0,
                600,
            )
            .await;
        ring_buffer
            .append(
                "binance",
                Market::Futures,
                &HashMap::from([("BTCUSDT".to_string(), 63_100.0)]),
                300_000,
                600,
            )
            .await;

        let trigger_sink = Arc::new(TriggerSink::new(
            repo,
            Arc::new(NoChatId),
            RealtimeSink::new(),
            Arc::new(TelegramMessenger::new("dummy".to_string())),
            None,
        ));
        let evaluator = Arc::new(TickEvaluator::new(
            ring_buffer,
            cache,
            trigger_sink,
            COOLDOWN_SECS,
            None,
            None,
        ));
        let sweeper = SafetyNetSweeper::new(evaluator, SWEEP_INTERVAL_SECS);

        sweeper.sweep_once().await.unwrap();
    }
}
