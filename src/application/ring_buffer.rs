//! Per-`(exchange, market, symbol)` bounded price history (§4.C).
//!
//! Sharded by `(exchange, market)` so the Fan-In writer for one pair never
//! contends with a reader touching another pair — same "shard to bound lock
//! contention" idea spec §5 calls for, expressed with nested `RwLock`s the
//! way `rustrade`'s `SpreadCache` guards its own per-symbol state.

use crate::domain::types::{Market, PricePoint, WindowStats};
use crate::infrastructure::observability::Metrics;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

pub const SAMPLE_INTERVAL_MS: i64 = 3_000;
pub const RETENTION_SEC: i64 = 7 * 60;
pub const MAX_POINTS: usize = 180;
pub const MIN_POINTS_IN_WINDOW: usize = 2;
/// Debounce slack so a sample arriving a hair under the interval still
/// counts as "the next slot" rather than updating the previous one.
const DEBOUNCE_EPSILON_MS: i64 = 50;

type Shard = Arc<RwLock<HashMap<String, VecDeque<PricePoint>>>>;

pub struct RingBufferStore {
    shards: RwLock<HashMap<String, Shard>>,
    metrics: Option<Arc<Metrics>>,
}

impl RingBufferStore {
    pub fn new(metrics: Option<Arc<Metrics>>) -> Self {
        Self {
            shards: RwLock::new(HashMap::new()),
            metrics,
        }
    }

    fn shard_key(exchange: &str, market: Market) -> String {
        format!("{exchange}|{market}")
    }

    async fn shard_for(&self, exchange: &str, market: Market) -> Shard {
        let key = Self::shard_key(exchange, market);
        {
            let shards = self.shards.read().await;
            if let Some(shard) = shards.get(&key) {
                return shard.clone();
            }
        }
        let mut shards = self.shards.write().await;
        shards
            .entry(key)
            .or_insert_with(|| Arc::new(RwLock::new(HashMap::new())))
            .clone()
    }

    /// Append every `(symbol, price)` pair with a positive finite price,
    /// debouncing and evicting per §4.C.
    pub async fn append(
        &self,
        exchange: &str,
        market: Market,
        price_map: &HashMap<String, f64>,
        now_ms: i64,
        retention_sec: i64,
    ) {
        let shard = self.shard_for(exchange, market).await;
        let mut buffers = shard.write().await;

        for (symbol, &price) in price_map {
            if !(price.is_finite() && price > 0.0) {
                continue;
            }

            let deque = buffers.entry(symbol.clone()).or_default();

            match deque.back_mut() {
                Some(last) if now_ms - last.ts < SAMPLE_INTERVAL_MS - DEBOUNCE_EPSILON_MS => {
                    // Debounce window: update price in place, ts stays fixed
                    // (§9 open question — this spec keeps ts fixed).
                    last.price = price;
                }
                _ => {
                    deque.push_back(PricePoint { ts: now_ms, price });
                }
            }

            let cutoff = now_ms - retention_sec * 1000;
            while let Some(front) = deque.front() {
                if front.ts < cutoff {
                    deque.pop_front();
                } else {
                    break;
                }
            }

            while deque.len() > MAX_POINTS {
                deque.pop_front();
                if let Some(metrics) = &self.metrics {
                    metrics.inc_ring_buffer_drops(symbol);
                }
            }
        }
    }

    /// §4.C `windowStats`: bridges in a single pre-window point as the
    /// oldest baseline when fewer than `MIN_POINTS_IN_WINDOW` fall inside
    /// the lookback.
    pub async fn window_stats(
        &self,
        exchange: &str,
        market: Market,
        symbol: &str,
        now_ms: i64,
        lookback_sec: i64,
    ) -> Option<WindowStats> {
        let shard = self.shard_for(exchange, market).await;
        let buffers = shard.read().await;
        let deque = buffers.get(symbol)?;
        if deque.is_empty() {
            return None;
        }

        let cutoff = now_ms - lookback_sec * 1000;
        let in_window: Vec<&PricePoint> = deque.iter().filter(|p| p.ts >= cutoff).collect();

        let mut effective: Vec<&PricePoint> = in_window.clone();
        if effective.len() < MIN_POINTS_IN_WINDOW {
            if let Some(bridge) = deque.iter().rev().find(|p| p.ts < cutoff) {
                effective.push(bridge);
            }
        }

        if effective.len() < MIN_POINTS_IN_WINDOW {
            return None;
        }

        let min = effective.iter().map(|p| p.price).fold(f64::MAX, f64::min);
        let max = effective.iter().map(|p| p.price).fold(f64::MIN, f64::max);
        let oldest = effective.iter().min_by_key(|p| p.ts).map(|p| p.price)?;
        let current = deque.back()?.price;

        Some(WindowStats {
            min,
            max,
            oldest,
            current,
            points: effective.len(),
        })
    }

    /// All symbols currently tracked for a given `(exchange, market)`, used
    /// by the Safety-Net Sweeper (§4.F) instead of only tick-observed
    /// symbols.
    pub async fn tracked_symbols(&self, exchange: &str, market: Market) -> Vec<String> {
        let shard = self.shard_for(exchange, market).await;
        let buffers = shard.read().await;
        buffers.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prices(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(s, p)| (s.to_string(), *p)).collect()
    }

    #[tokio::test]
    async fn retention_evicts_old_points() {
        let store = RingBufferStore::new(None);
        store
            .append("binance", Market::Spot, &prices(&[("BTCUSDT", 100.0)]), 0, 60)
            .await;
        store
            .append(
                "binance",
                Market::Spot,
                &prices(&[("BTCUSDT", 110.0)]),
                70_000,
                60,
            )
            .await;

        let shard = store.shard_for("binance", Market::Spot).await;
        let buffers = shard.read().await;
        let deque = buffers.get("BTCUSDT").unwrap();
        assert!(deque.iter().all(|p| p.ts >= 70_000 - 60_000));
    }

    #[tokio::test]
    async fn debounce_updates_price_keeps_ts() {
        let store = RingBufferStore::new(None);
        store
            .append("binance", Market::Spot, &prices(&[("BTCUSDT", 100.0)]), 0, 600)
            .await;
        store
            .append(
                "binance",
                Market::Spot,
                &prices(&[("BTCUSDT", 105.0)]),
                500,
                600,
            )
            .await;

        let shard = store.shard_for("binance", Market::Spot).await;
        let buffers = shard.read().await;
        let deque = buffers.get("BTCUSDT").unwrap();
        assert_eq!(deque.len(), 1);
        assert_eq!(deque.back().unwrap().price, 105.0);
        assert_eq!(deque.back().unwrap().ts, 0);
    }

    #[tokio::test]
    async fn max_points_truncates() {
        let store = RingBufferStore::new(None);
        for i in 0..(MAX_POINTS + 10) {
            let ts = i as i64 * SAMPLE_INTERVAL_MS;
            store
                .append(
                    "binance",
                    Market::Spot,
                    &prices(&[("BTCUSDT", 100.0 + i as f64)]),
                    ts,
                    i64::MAX / 1000,
                )
                .await;
        }

        let shard = store.shard_for("binance", Market::Spot).await;
        let buffers = shard.read().await;
        assert_eq!(buffers.get("BTCUSDT").unwrap().len(), MAX_POINTS);
    }

    #[tokio::test]
    async fn window_stats_bridges_single_prewindow_point() {
        let store = RingBufferStore::new(None);
        store
            .append("binance", Market::Spot, &prices(&[("BTCUSDT", 60_000.0)]), 0, 600)
            .await;
        store
            .append(
                "binance",
                Market::Spot,
                &prices(&[("BTCUSDT", 63_100.0)]),
                300_000,
                600,
            )
            .await;

        let stats = store
            .window_stats("binance", Market::Spot, "BTCUSDT", 300_000, 300)
            .await
            .unwrap();
        assert_eq!(stats.oldest, 60_000.0);
        assert_eq!(stats.current, 63_100.0);
        assert_eq!(stats.points, 2);
    }

    #[tokio::test]
    async fn window_stats_none_with_single_point_and_no_bridge() {
        let store = RingBufferStore::new(None);
        store
            .append("binance", Market::Spot, &prices(&[("BTCUSDT", 60_000.0)]), 0, 600)
            .await;

        let stats = store
            .window_stats("binance", Market::Spot, "BTCUSDT", 0, 300)
            .await;
        assert!(stats.is_none());
    }

    #[tokio::test]
    async fn rejects_non_positive_and_non_finite_prices() {
        let store = RingBufferStore::new(None);
        store
            .append(
                "binance",
                Market::Spot,
                &prices(&[("BTCUSDT", -1.0), ("ETHUSDT", f64::NAN)]),
                0,
                600,
            )
            .await;

        assert!(store.tracked_symbols("binance", Market::Spot).await.is_empty());
    }
}
