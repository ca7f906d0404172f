//! In-memory adapter for tests and single-instance local runs without
//! network access, grounded on `rustrade::infrastructure::mock`'s
//! deterministic-seed price walk.

use crate::domain::ports::{ExchangePriceAdapter, PriceLookupOptions};
use crate::domain::types::{Kline, Market};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::RwLock;

pub struct MockAdapter {
    prices: RwLock<HashMap<String, f64>>,
    active_symbols: Vec<String>,
    tick: AtomicI64,
}

impl MockAdapter {
    pub fn new(active_symbols: Vec<String>) -> Self {
        let mut prices = HashMap::new();
        for symbol in &active_symbols {
            prices.insert(symbol.clone(), Self::base_price(symbol));
        }
        Self {
            prices: RwLock::new(prices),
            active_symbols,
            tick: AtomicI64::new(0),
        }
    }

    fn base_price(symbol: &str) -> f64 {
        if symbol.contains("BTC") {
            96_000.0
        } else if symbol.contains("ETH") {
            3_400.0
        } else {
            150.0
        }
    }

    /// Set a price directly, used by tests to drive specific scenarios.
    pub async fn set_price(&self, symbol: &str, price: f64) {
        self.prices.write().await.insert(symbol.to_string(), price);
    }

    /// Advance every tracked symbol by one small deterministic step, so
    /// repeated polls under test still observe movement without relying on
    /// real randomness.
    pub async fn step(&self) {
        let idx = self.tick.fetch_add(1, Ordering::Relaxed);
        let mut prices = self.prices.write().await;
        for (i, (_, price)) in prices.iter_mut().enumerate() {
            let seed = (idx + i as i64) * 1_103_515_245 + 12_345;
            let random = (((seed / 65_536) % 1000) as f64 / 1000.0) - 0.5;
            *price *= 1.0 + random * 0.002;
        }
    }
}

#[async_trait]
impl ExchangePriceAdapter for MockAdapter {
    fn exchange_id(&self) -> &str {
        "mock"
    }

    async fn get_last_prices_by_symbols(
        &self,
        symbols: &[String],
        _market: Market,
        options: PriceLookupOptions,
    ) -> Result<HashMap<String, f64>> {
        let prices = self.prices.read().await;
        let mut result = HashMap::new();
        for symbol in symbols {
            match prices.get(symbol) {
                Some(price) => {
                    result.insert(symbol.clone(), *price);
                }
                None if options.strict => {
                    anyhow::bail!("mock adapter has no price for {symbol}");
                }
                None => {}
            }
        }
        Ok(result)
    }

    async fn fetch_active_symbols(&self, _market: Market) -> Result<Vec<String>> {
        Ok(self.active_symbols.clone())
    }

    async fn fetch_klines(
        &self,
        symbol: &str,
        _market: Market,
        interval: &str,
        limit: usize,
        before: Option<i64>,
    ) -> Result<Vec<Kline>> {
        let price = self
            .prices
            .read()
            .await
            .get(symbol)
            .copied()
            .unwrap_or_else(|| Self::base_price(symbol));
        let step_secs = crate::domain::types::Timeframe::parse(interval)
            .map(|tf| tf.as_secs())
            .unwrap_or(60);
        let end = before.unwrap_or_else(|| chrono::Utc::now().timestamp());

        Ok((0..limit)
            .map(|i| {
                let open_time = end - (limit - i) as i64 * step_secs;
                Kline {
                    open_time,
                    open: price,
                    high: price,
                    low: price,
                    close: price,
                    volume: 0.0,
                }
            })
            .collect())
    }
}
