//! In-memory snapshot of active complex alerts (§4.D), refreshed on a
//! timer and on CRUD events.

use crate::domain::errors::EngineError;
use crate::domain::repositories::AlertRepository;
use crate::domain::symbol::normalize;
use crate::domain::types::{AlertForMode, Market};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};

pub const COMPLEX_CACHE_REFRESH_SECS: u64 = 30;
/// Floor applied to the retention handed to the ring buffer so a complex
/// alert's window always has somewhere to look, even below 1m (§4.E step 2).
pub const COMPLEX_HISTORY_LOOKBACK_FLOOR_SECS: i64 = 65;

#[derive(Debug, Clone)]
pub struct CachedComplexAlert {
    pub alert_id: String,
    pub user_id: String,
    pub name: String,
    pub description: Option<String>,
    pub exchange: String,
    pub market: Market,
    pub symbol_set: HashSet<String>,
    pub threshold: f64,
    pub timeframe_sec: i64,
    pub alert_for_mode: AlertForMode,
}

#[derive(Default)]
struct CacheState {
    alerts: Vec<CachedComplexAlert>,
    active_exchange_markets: HashSet<String>,
}

/// Refreshed periodically and via `refresh()` from the CRUD layer; reads
/// are lock-free snapshots (a cloned `Vec`) so the Tick Evaluator never
/// blocks a refresh in progress.
pub struct ComplexAlertCache {
    repo: Arc<dyn AlertRepository>,
    state: RwLock<CacheState>,
}

impl ComplexAlertCache {
    pub fn new(repo: Arc<dyn AlertRepository>) -> Self {
        Self {
            repo,
            state: RwLock::new(CacheState::default()),
        }
    }

    pub async fn refresh(&self) -> anyhow::Result<()> {
        let alerts = self.repo.find_active_complex_alerts().await?;

        let mut cached = Vec::with_capacity(alerts.len());
        let mut active_exchange_markets = HashSet::new();

        for alert in alerts {
            let Some(condition) = alert.conditions.as_ref().and_then(|c| c.first()) else {
                let err = EngineError::InvalidAlertData {
                    alert_id: alert.id.clone(),
                    reason: "missing conditions[0]".to_string(),
                };
                error!("complex_cache.refresh: {err}, skipping");
                continue;
            };

            let Ok(timeframe) = crate::domain::types::Timeframe::parse(&condition.timeframe)
            else {
                let err = EngineError::InvalidAlertData {
                    alert_id: alert.id.clone(),
                    reason: format!("unknown timeframe {}", condition.timeframe),
                };
                error!("complex_cache.refresh: {err}, skipping");
                continue;
            };

            let symbol_set: HashSet<String> =
                alert.symbols.iter().map(|s| normalize(s)).collect();

            let alert_for_mode = alert
                .notification_options
                .as_ref()
                .and_then(|o| o.alert_for_mode)
                .unwrap_or(AlertForMode::All);

            active_exchange_markets.insert(alert.exchange_market_key());

            cached.push(CachedComplexAlert {
                alert_id: alert.id,
                user_id: alert.user_id,
                name: alert.name,
                description: alert.description,
                exchange: alert.exchange,
                market: alert.market,
                symbol_set,
                threshold: condition.value.abs(),
                timeframe_sec: timeframe.as_secs(),
                alert_for_mode,
            });
        }

        let mut state = self.state.write().await;
        state.alerts = cached;
        state.active_exchange_markets = active_exchange_markets;

        info!("complex.cache.refresh alerts={}", state.alerts.len());
        Ok(())
    }

    pub async fn is_active_exchange_market(&self, exchange: &str, market: Market) -> bool {
        self.state
            .read()
            .await
            .active_exchange_markets
            .contains(&format!("{exchange}|{market}"))
    }

    /// Distinct `(exchange, market)` pairs with at least one cached alert,
    /// used by the Safety-Net Sweeper to know where to look (§4.F).
    pub async fn distinct_exchange_markets(&self) -> Vec<(String, Market)> {
        let state = self.state.read().await;
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for alert in &state.alerts {
            let key = (alert.exchange.clone(), alert.market);
            if seen.insert(key.clone()) {
                out.push(key);
            }
        }
        out
    }

    pub async fn alerts_for(&self, exchange: &str, market: Market) -> Vec<CachedComplexAlert> {
        self.state
            .read()
            .await
            .alerts
            .iter()
            .filter(|a| a.exchange == exchange && a.market == market)
            .cloned()
            .collect()
    }

    /// Longest configured timeframe plus a small buffer, floored at
    /// `COMPLEX_HISTORY_LOOKBACK_FLOOR_SECS` (§4.E step 2).
    pub async fn required_retention_sec(&self) -> i64 {
        let state = self.state.read().await;
        let longest = state
            .alerts
            .iter()
            .map(|a| a.timeframe_sec)
            .max()
            .unwrap_or(0);
        (longest + 5).max(COMPLEX_HISTORY_LOOKBACK_FLOOR_SECS)
    }

    /// Equal caches after repeated no-op refreshes (§8 invariant 7):
    /// callers snapshot `alerts_for` before/after and compare.
    pub async fn snapshot(&self) -> Vec<CachedComplexAlert> {
        self.state.read().await.alerts.clone()
    }
}

/// Scope check of §4.E step 3: whitelist mode requires membership
/// (tolerating the `.P` alias), `all` mode requires a USDT pair.
pub fn in_scope(alert: &CachedComplexAlert, canonical_symbol: &str) -> bool {
    match alert.alert_for_mode {
        AlertForMode::Whitelist => alert
            .symbol_set
            .iter()
            .any(|s| crate::domain::symbol::symbols_equivalent(s, canonical_symbol)),
        AlertForMode::All => crate::domain::symbol::is_usdt_pair(canonical_symbol),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::repositories::AlertRepository;
    use crate::domain::types::{Alert, AlertCondition, AlertType, NotificationOptions};
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::Utc;
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
            _triggered_at: chrono::DateTime<Utc>,
        ) -> Result<()> {
            Ok(())
        }
        async fn upsert(&self, _alert: &Alert) -> Result<()> {
            Ok(())
        }
    }

    fn complex_alert(mode: AlertForMode) -> Alert {
        Alert {
            id: "a1".to_string(),
            user_id: "u1".to_string(),
            name: "5% move".to_string(),
            description: None,
            alert_type: AlertType::Complex,
            exchange: "binance".to_string(),
            market: Market::Futures,
            symbols: vec!["ETHUSDT".to_string()],
            target_value: None,
            condition: None,
            initial_price: None,
            conditions: Some(vec![AlertCondition {
                kind: "pct_change".to_string(),
                value: 5.0,
                timeframe: "5m".to_string(),
            }]),
            notification_options: Some(NotificationOptions {
                alert_for_mode: Some(mode),
            }),
            is_active: true,
            triggered: false,
            triggered_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn refresh_populates_active_exchange_markets() {
        let repo = Arc::new(StaticRepo(Mutex::new(vec![complex_alert(AlertForMode::All)])));
        let cache = ComplexAlertCache::new(repo);
        cache.refresh().await.unwrap();

        assert!(cache.is_active_exchange_market("binance", Market::Futures).await);
        assert!(!cache.is_active_exchange_market("binance", Market::Spot).await);
    }

    #[tokio::test]
    async fn whitelist_scope_rejects_unmatched_symbol() {
        let repo = Arc::new(StaticRepo(Mutex::new(vec![complex_alert(
            AlertForMode::Whitelist,
        )])));
        let cache = ComplexAlertCache::new(repo);
        cache.refresh().await.unwrap();

        let alerts = cache.alerts_for("binance", Market::Futures).await;
        let alert = &alerts[0];
        assert!(in_scope(alert, "ETHUSDT"));
        assert!(!in_scope(alert, "BTCUSDT"));
    }

    #[tokio::test]
    async fn all_scope_requires_usdt_pair() {
        let repo = Arc::new(StaticRepo(Mutex::new(vec![complex_alert(AlertForMode::All)])));
        let cache = ComplexAlertCache::new(repo);
        cache.refresh().await.unwrap();

        let alerts = cache.alerts_for("binance", Market::Futures).await;
        let alert = &alerts[0];
        assert!(in_scope(alert, "BTCUSDT"));
        assert!(!in_scope(alert, "BTCEUR"));
    }

    #[tokio::test]
    async fn idempotent_refresh_produces_equal_snapshot() {
        let repo = Arc::new(StaticRepo(Mutex::new(vec![complex_alert(AlertForMode::All)])));
        let cache = ComplexAlertCache::new(repo);
        cache.refresh().await.unwrap();
        let first = cache.snapshot().await;
        cache.refresh().await.unwrap();
        let second = cache.snapshot().await;

        assert_eq!(first.len(), second.len());
        assert_eq!(first[0].alert_id, second[0].alert_id);
        assert_eq!(first[0].threshold, second[0].threshold);
    }
}
