//! Environment-driven configuration (§4.D / SPEC_FULL §D), read the same
//! way `rustrade::config::Config::from_env` does: `env::var(...)
//! .unwrap_or_else(|| default).parse().context(...)`.

use anyhow::{Context, Result};
use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,

    pub binance_api_key: String,
    pub binance_spot_base_url: String,
    pub binance_futures_base_url: String,
    /// Reserved for a future websocket-fed adapter; the current
    /// `BinanceAdapter` is REST-polling only.
    pub binance_ws_url: String,

    pub telegram_bot_token: String,

    /// §4.C
    pub sample_interval_ms: i64,
    pub retention_sec: i64,
    pub max_points: usize,

    /// §4.D
    pub complex_cache_refresh_secs: u64,
    /// §4.E / §4.F
    pub cooldown_secs: i64,
    /// §4.F
    pub sweep_interval_secs: u64,
    /// §4.G (`PRICE_ALERT_POLL_MS`)
    pub fast_price_interval_ms: u64,
    /// §4.H
    pub klines_sweep_interval_secs: u64,
    pub klines_lookback_secs: i64,
    /// §4.I
    pub lease_ttl_secs: i64,
    pub lease_owner_id: String,

    pub metrics_report_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://alert_engine.db".to_string());

        let binance_api_key = env::var("BINANCE_API_KEY").unwrap_or_default();
        let binance_spot_base_url = env::var("BINANCE_BASE_URL")
            .unwrap_or_else(|_| "https://api.binance.com".to_string());
        let binance_futures_base_url = env::var("BINANCE_FUTURES_BASE_URL")
            .unwrap_or_else(|_| "https://fapi.binance.com".to_string());
        let binance_ws_url = env::var("BINANCE_WS_URL")
            .unwrap_or_else(|_| "wss://stream.binance.com:9443".to_string());

        let telegram_bot_token = env::var("TELEGRAM_BOT_TOKEN").unwrap_or_default();

        let sample_interval_ms = env::var("ALERT_ENGINE_SAMPLE_INTERVAL_MS")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<i64>()
            .context("Failed to parse ALERT_ENGINE_SAMPLE_INTERVAL_MS")?;

        let retention_sec = env::var("ALERT_ENGINE_RETENTION_SECS")
            .unwrap_or_else(|_| "420".to_string())
            .parse::<i64>()
            .context("Failed to parse ALERT_ENGINE_RETENTION_SECS")?;

        let max_points = env::var("ALERT_ENGINE_MAX_POINTS")
            .unwrap_or_else(|_| "180".to_string())
            .parse::<usize>()
            .context("Failed to parse ALERT_ENGINE_MAX_POINTS")?;

        let complex_cache_refresh_secs = env::var("ALERT_ENGINE_COMPLEX_CACHE_REFRESH_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse::<u64>()
            .context("Failed to parse ALERT_ENGINE_COMPLEX_CACHE_REFRESH_SECS")?;

        let cooldown_secs = env::var("ALERT_ENGINE_COOLDOWN_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse::<i64>()
            .context("Failed to parse ALERT_ENGINE_COOLDOWN_SECS")?;

        let sweep_interval_secs = env::var("ALERT_ENGINE_SWEEP_INTERVAL_SECS")
            .unwrap_or_else(|_| "10".to_string())
            .parse::<u64>()
            .context("Failed to parse ALERT_ENGINE_SWEEP_INTERVAL_SECS")?;

        let fast_price_interval_ms = env::var("PRICE_ALERT_POLL_MS")
            .unwrap_or_else(|_| "300".to_string())
            .parse::<u64>()
            .context("Failed to parse PRICE_ALERT_POLL_MS")?;

        let klines_sweep_interval_secs = env::var("ALERT_ENGINE_KLINES_SWEEP_INTERVAL_SECS")
            .unwrap_or_else(|_| "120".to_string())
            .parse::<u64>()
            .context("Failed to parse ALERT_ENGINE_KLINES_SWEEP_INTERVAL_SECS")?;

        let klines_lookback_secs = env::var("ALERT_ENGINE_KLINES_LOOKBACK_SECS")
            .unwrap_or_else(|_| "86400".to_string())
            .parse::<i64>()
            .context("Failed to parse ALERT_ENGINE_KLINES_LOOKBACK_SECS")?;

        let lease_ttl_secs = env::var("ALERT_ENGINE_LEASE_TTL_SECS")
            .unwrap_or_else(|_| "15".to_string())
            .parse::<i64>()
            .context("Failed to parse ALERT_ENGINE_LEASE_TTL_SECS")?;

        let lease_owner_id = env::var("ALERT_ENGINE_OWNER_ID")
            .unwrap_or_else(|_| format!("alert-engine-{}", uuid::Uuid::new_v4()));

        let metrics_report_interval_secs = env::var("ALERT_ENGINE_METRICS_REPORT_INTERVAL_SECS")
            .unwrap_or_else(|_| "60".to_string())
            .parse::<u64>()
            .context("Failed to parse ALERT_ENGINE_METRICS_REPORT_INTERVAL_SECS")?;

        Ok(Self {
            database_url,
            binance_api_key,
            binance_spot_base_url,
            binance_futures_base_url,
            binance_ws_url,
            telegram_bot_token,
            sample_interval_ms,
            retention_sec,
            max_points,
            complex_cache_refresh_secs,
            cooldown_secs,
            sweep_interval_secs,
            fast_price_interval_ms,
            klines_sweep_interval_secs,
            klines_lookback_secs,
            lease_ttl_secs,
            lease_owner_id,
            metrics_report_interval_secs,
        })
    }
}
