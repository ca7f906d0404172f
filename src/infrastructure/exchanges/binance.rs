//! Binance adapter: the three capabilities of `ExchangePriceAdapter`,
//! reduced from `rustrade::infrastructure::binance::market_data`
//! (no order execution, no top-movers scan).

use crate::domain::ports::{ExchangePriceAdapter, PriceLookupOptions};
use crate::domain::symbol::normalize;
use crate::domain::types::{Kline, Market};
use crate::infrastructure::core::circuit_breaker::{CircuitBreaker, CircuitBreakerError};
use crate::infrastructure::core::http_client_factory::{build_url_with_query, HttpClientFactory};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

pub struct BinanceAdapter {
    client: ClientWithMiddleware,
    api_key: String,
    spot_base_url: String,
    futures_base_url: String,
    circuit_breaker: CircuitBreaker,
}

impl BinanceAdapter {
    pub fn new(api_key: String, spot_base_url: String, futures_base_url: String) -> Self {
        Self {
            client: HttpClientFactory::create_client(),
            api_key,
            spot_base_url,
            futures_base_url,
            circuit_breaker: CircuitBreaker::new("BinancePriceAdapter", 5, 3, Duration::from_secs(60)),
        }
    }

    fn base_url(&self, market: Market) -> &str {
        match market {
            Market::Spot => &self.spot_base_url,
            Market::Futures => &self.futures_base_url,
        }
    }

    fn denormalize(symbol: &str) -> String {
        symbol.to_string()
    }

    fn map_circuit_err(e: CircuitBreakerError<anyhow::Error>) -> anyhow::Error {
        match e {
            CircuitBreakerError::Open(msg) => anyhow::anyhow!("Binance circuit breaker open: {msg}"),
            CircuitBreakerError::Inner(inner) => inner,
        }
    }
}

#[async_trait]
impl ExchangePriceAdapter for BinanceAdapter {
    fn exchange_id(&self) -> &str {
        "binance"
    }

    async fn get_last_prices_by_symbols(
        &self,
        symbols: &[String],
        market: Market,
        _options: PriceLookupOptions,
    ) -> Result<HashMap<String, f64>> {
        if symbols.is_empty() {
            return Ok(HashMap::new());
        }

        let base_url = self.base_url(market).to_string();
        let client = self.client.clone();
        let api_key = self.api_key.clone();
        let symbols = symbols.to_vec();

        self.circuit_breaker
            .call(async move {
                let url = format!("{base_url}/api/v3/ticker/price");
                let api_symbols: Vec<String> = symbols.iter().map(|s| Self::denormalize(s)).collect();
                let symbols_json = serde_json::to_string(&api_symbols)?;
                let url_with_query = build_url_with_query(&url, &[("symbols", &symbols_json)]);

                let response = client
                    .get(&url_with_query)
                    .header("X-MBX-APIKEY", &api_key)
                    .send()
                    .await
                    .context("failed to fetch prices from binance")?;

                if !response.status().is_success() {
                    let body = response.text().await.unwrap_or_default();
                    anyhow::bail!("binance ticker price error: {body}");
                }

                #[derive(Debug, Deserialize)]
                struct PriceTicker {
                    symbol: String,
                    price: String,
                }

                let tickers: Vec<PriceTicker> = response
                    .json()
                    .await
                    .context("failed to parse binance prices response")?;

                let mut prices = HashMap::new();
                for t in tickers {
                    let normalized = normalize(&t.symbol);
                    if let Ok(p) = t.price.parse::<f64>() {
                        if p.is_finite() && p > 0.0 {
                            prices.insert(normalized, p);
                        }
                    }
                }

                Ok(prices)
            })
            .await
            .map_err(Self::map_circuit_err)
    }

    async fn fetch_active_symbols(&self, market: Market) -> Result<Vec<String>> {
        let base_url = self.base_url(market).to_string();
        let client = self.client.clone();

        self.circuit_breaker
            .call(async move {
                let url = format!("{base_url}/api/v3/exchangeInfo");
                let response = client
                    .get(&url)
                    .send()
                    .await
                    .context("failed to fetch exchangeInfo from binance")?;

                if !response.status().is_success() {
                    let body = response.text().await.unwrap_or_default();
                    anyhow::bail!("binance exchangeInfo error: {body}");
                }

                #[derive(Debug, Deserialize)]
                struct SymbolInfo {
                    symbol: String,
                    status: String,
                    #[serde(rename = "quoteAsset")]
                    quote_asset: String,
                }

                #[derive(Debug, Deserialize)]
                struct ExchangeInfo {
                    symbols: Vec<SymbolInfo>,
                }

                let info: ExchangeInfo = response
                    .json()
                    .await
                    .context("failed to parse binance exchangeInfo")?;

                let symbols: Vec<String> = info
                    .symbols
                    .into_iter()
                    .filter(|s| s.status == "TRADING" && s.quote_asset == "USDT")
                    .map(|s| normalize(&s.symbol))
                    .collect();

                info!("binance: {} active USDT symbols", symbols.len());
                Ok(symbols)
            })
            .await
            .map_err(Self::map_circuit_err)
    }

    async fn fetch_klines(
        &self,
        symbol: &str,
        market: Market,
        interval: &str,
        limit: usize,
        before: Option<i64>,
    ) -> Result<Vec<Kline>> {
        let base_url = self.base_url(market).to_string();
        let client = self.client.clone();
        let api_key = self.api_key.clone();
        let api_symbol = Self::denormalize(symbol);
        let interval = interval.to_string();

        self.circuit_breaker
            .call(async move {
                let url = format!("{base_url}/api/v3/klines");
                let limit_str = limit.to_string();
                // `before` is seconds (Kline::open_time's unit); binance's
                // `endTime` query param wants milliseconds.
                let before_str = before.map(|b| (b * 1000).to_string());

                let mut params = vec![
                    ("symbol", api_symbol.as_str()),
                    ("interval", interval.as_str()),
                    ("limit", limit_str.as_str()),
                ];
                if let Some(before_str) = before_str.as_deref() {
                    params.push(("endTime", before_str));
                }

                let url_with_query = build_url_with_query(&url, &params);

                let response = client
                    .get(&url_with_query)
                    .header("X-MBX-APIKEY", &api_key)
                    .send()
                    .await
                    .context("failed to fetch klines from binance")?;

                if !response.status().is_success() {
                    let body = response.text().await.unwrap_or_default();
                    anyhow::bail!("binance klines error: {body}");
                }

                let raw: Vec<serde_json::Value> = response
                    .json()
                    .await
                    .context("failed to parse binance klines response")?;

                let klines: Vec<Kline> = raw
                    .into_iter()
                    .filter_map(|k| {
                        let arr = k.as_array()?;
                        if arr.len() < 6 {
                            return None;
                        }
                        Some(Kline {
                            open_time: arr[0].as_i64()? / 1000,
                            open: arr[1].as_str()?.parse().ok()?,
                            high: arr[2].as_str()?.parse().ok()?,
                            low: arr[3].as_str()?.parse().ok()?,
                            close: arr[4].as_str()?.parse().ok()?,
                            volume: arr[5].as_str()?.parse().ok()?,
                        })
                    })
                    .collect();

                if klines.is_empty() {
                    warn!("binance: empty klines response for {}", api_symbol);
                }

                Ok(klines)
            })
            .await
            .map_err(Self::map_circuit_err)
    }
}
