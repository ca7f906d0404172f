//! Multi-exchange price fan-in (§4.B): one producer task per active
//! `(exchange, market)`, broadcast out to subscribers with a bounded,
//! drop-oldest mailbox per subscriber. Grounded on the producer/broadcast
//! wiring of `rustrade::infrastructure::binance::websocket`, generalized
//! from one exchange's websocket to N polling adapters.

use crate::domain::ports::ExchangePriceAdapter;
use crate::domain::types::{Market, MarketTick};
use crate::infrastructure::observability::Metrics;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};

const MAILBOX_CAPACITY: usize = 1024;

/// One `(exchange, market)` pair and the adapter/symbol-set a producer
/// task polls for it.
pub struct FanInSource {
    pub adapter: Arc<dyn ExchangePriceAdapter>,
    pub market: Market,
    pub poll_interval: std::time::Duration,
}

/// Multiplexes N adapters into one in-process broadcast stream. `subscribe`
/// returns a fresh bounded receiver; lagging receivers drop the oldest
/// events and a counter increments instead of blocking the producer (§4.B).
pub struct PriceFanIn {
    tx: broadcast::Sender<MarketTick>,
    latest: Arc<RwLock<HashMap<String, MarketTick>>>,
    metrics: Option<Arc<Metrics>>,
}

impl PriceFanIn {
    pub fn new(metrics: Option<Arc<Metrics>>) -> Self {
        let (tx, _) = broadcast::channel(MAILBOX_CAPACITY);
        Self {
            tx,
            latest: Arc::new(RwLock::new(HashMap::new())),
            metrics,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MarketTick> {
        self.tx.subscribe()
    }

    /// Latest snapshot for an `(exchange, market)` pair, used to seed a
    /// newly-subscribed consumer's warm-up state.
    pub async fn get_price_map(&self, exchange: &str, market: Market) -> Option<MarketTick> {
        self.latest
            .read()
            .await
            .get(&format!("{exchange}|{market}"))
            .cloned()
    }

    /// Spawn one long-lived producer task per source. Each tick polls the
    /// adapter for every active symbol on that `(exchange, market)` and
    /// broadcasts the resulting price map; adapter errors are counted and
    /// skipped, never fatal (§7).
    pub fn spawn_producer(self: &Arc<Self>, exchange: String, source: FanInSource) {
        let fanin = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(source.poll_interval);
            loop {
                interval.tick().await;

                let symbols = match source.adapter.fetch_active_symbols(source.market).await {
                    Ok(symbols) => symbols,
                    Err(err) => {
                        warn!(%exchange, market = %source.market, "fanin: fetch_active_symbols failed: {err}");
                        if let Some(metrics) = &fanin.metrics {
                            metrics.inc_adapter_errors(&exchange);
                        }
                        continue;
                    }
                };

                if symbols.is_empty() {
                    continue;
                }

                let prices = match source
                    .adapter
                    .get_last_prices_by_symbols(&symbols, source.market, Default::default())
                    .await
                {
                    Ok(prices) => prices,
                    Err(err) => {
                        warn!(%exchange, market = %source.market, "fanin: get_last_prices_by_symbols failed: {err}");
                        if let Some(metrics) = &fanin.metrics {
                            metrics.inc_adapter_errors(&exchange);
                        }
                        continue;
                    }
                };

                let tick = MarketTick {
                    exchange: exchange.clone(),
                    market: source.market,
                    prices,
                    ts: chrono::Utc::now().timestamp_millis(),
                };

                fanin
                    .latest
                    .write()
                    .await
                    .insert(format!("{exchange}|{}", source.market), tick.clone());

                if fanin.tx.receiver_count() == 0 {
                    continue;
                }

                if let Err(err) = fanin.tx.send(tick) {
                    debug!(%exchange, "fanin: no active subscribers ({err})");
                } else if let Some(metrics) = &fanin.metrics {
                    let _ = metrics; // drop accounting lives on the receiver side (Lagged)
                }
            }
        });
    }
}

/// Drains a broadcast receiver, counting (not failing on) `Lagged` gaps —
/// the bounded-mailbox drop-oldest policy of §4.B expressed on the consumer
/// side, since `tokio::sync::broadcast` itself is the bounded mailbox.
pub async fn recv_tick(
    rx: &mut broadcast::Receiver<MarketTick>,
    exchange_market: &str,
    metrics: Option<&Metrics>,
) -> Option<MarketTick> {
    loop {
        match rx.recv().await {
            Ok(tick) => return Some(tick),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("fanin consumer lagged, dropped {n} ticks for {exchange_market}");
                if let Some(metrics) = metrics {
                    metrics.inc_fanin_mailbox_drops(exchange_market);
                }
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::PriceLookupOptions;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingAdapter {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ExchangePriceAdapter for CountingAdapter {
        fn exchange_id(&self) -> &str {
            "test"
        }

        async fn get_last_prices_by_symbols(
            &self,
            _symbols: &[String],
            _market: Market,
            _options: PriceLookupOptions,
        ) -> Result<HashMap<String, f64>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(prices(&[("BTCUSDT", 100.0)]))
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
        ) -> Result<Vec<crate::domain::types::Kline>> {
            Ok(vec![])
        }
    }

    fn prices(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(s, p)| (s.to_string(), *p)).collect()
    }

    #[tokio::test]
    async fn producer_broadcasts_ticks_to_subscriber() {
        let fanin = Arc::new(PriceFanIn::new(None));
        let mut rx = fanin.subscribe();

        let adapter = Arc::new(CountingAdapter {
            calls: Arc::new(AtomicUsize::new(0)),
        });

        fanin.spawn_producer(
            "test".to_string(),
            FanInSource {
                adapter,
                market: Market::Spot,
                poll_interval: Duration::from_millis(10),
            },
        );

        let tick = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for tick")
            .expect("channel closed");
        assert_eq!(tick.exchange, "test");
        assert_eq!(tick.prices.get("BTCUSDT"), Some(&100.0));
    }
}
