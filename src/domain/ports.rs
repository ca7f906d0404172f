//! External capability interfaces (§6). The engine consumes exchanges only
//! through this trait — dispatch to a concrete exchange is a small closed
//! table keyed by exchange id (§9 "dynamic dispatch"), never a conditional
//! chain.

use crate::domain::types::{Kline, Market};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;

/// Options for `get_last_prices_by_symbols` (§6).
#[derive(Debug, Clone, Copy, Default)]
pub struct PriceLookupOptions {
    /// If true, the absence of any requested symbol is an error rather than
    /// a silent omission.
    pub strict: bool,
    /// If true, serve only from the exchange's own cache/poll path, never a
    /// per-symbol live round trip.
    pub exchange_only: bool,
}

/// One exchange's price/kline capability, consumed by the Fan-In (§4.B),
/// the Fast Price Alert Loop (§4.G), and the Klines Sweep (§4.H). A
/// concrete adapter never exposes more than this — order execution, account
/// state, and every other exchange capability are out of scope (§1).
#[async_trait]
pub trait ExchangePriceAdapter: Send + Sync {
    /// Exchange identifier this adapter answers for (e.g. `"binance"`).
    fn exchange_id(&self) -> &str;

    /// Last-known prices for the given symbols. Returns only positive,
    /// finite prices; may be served from a short-lived (≤2s) shared cache.
    async fn get_last_prices_by_symbols(
        &self,
        symbols: &[String],
        market: Market,
        options: PriceLookupOptions,
    ) -> Result<HashMap<String, f64>>;

    /// All symbols currently tradable on this exchange/market, cached for
    /// about an hour by the caller.
    async fn fetch_active_symbols(&self, market: Market) -> Result<Vec<String>>;

    /// Closed candles for `symbol`, ascending by `open_time`, at the given
    /// interval (e.g. `"1m"`), optionally bounded to `limit` candles ending
    /// at `before`.
    async fn fetch_klines(
        &self,
        symbol: &str,
        market: Market,
        interval: &str,
        limit: usize,
        before: Option<i64>,
    ) -> Result<Vec<Kline>>;
}

/// Registry mapping exchange id -> adapter, the dispatch table of §9.
pub type AdapterRegistry = HashMap<String, std::sync::Arc<dyn ExchangePriceAdapter>>;
