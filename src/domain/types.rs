//! Core data types for the alert engine — persistent records, price samples,
//! and the in-memory bookkeeping keyed off them. No I/O lives here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertType {
    Price,
    Complex,
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertType::Price => write!(f, "price"),
            AlertType::Complex => write!(f, "complex"),
        }
    }
}

impl std::str::FromStr for AlertType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "price" => Ok(AlertType::Price),
            "complex" => Ok(AlertType::Complex),
            _ => anyhow::bail!("Invalid alert_type: {}. Must be 'price' or 'complex'", s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Market {
    Futures,
    Spot,
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Market::Futures => write!(f, "futures"),
            Market::Spot => write!(f, "spot"),
        }
    }
}

impl std::str::FromStr for Market {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "futures" => Ok(Market::Futures),
            "spot" => Ok(Market::Spot),
            _ => anyhow::bail!("Invalid market: {}. Must be 'futures' or 'spot'", s),
        }
    }
}

/// Legacy direction hint, preserved only for pre-`initial_price` price alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Condition {
    Above,
    Below,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertForMode {
    All,
    Whitelist,
}

/// Bucket width for a complex alert's rolling window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    pub fn as_secs(self) -> i64 {
        match self {
            Timeframe::M1 => 60,
            Timeframe::M5 => 300,
            Timeframe::M15 => 900,
            Timeframe::M30 => 1_800,
            Timeframe::H1 => 3_600,
            Timeframe::H4 => 14_400,
            Timeframe::D1 => 86_400,
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        Ok(match s {
            "1m" => Timeframe::M1,
            "5m" => Timeframe::M5,
            "15m" => Timeframe::M15,
            "30m" => Timeframe::M30,
            "1h" => Timeframe::H1,
            "4h" => Timeframe::H4,
            "1d" => Timeframe::D1,
            other => anyhow::bail!("Unknown timeframe: {}", other),
        })
    }
}

/// One entry of an alert's `conditions` list. Only `conditions[0]` is used
/// by the complex-alert evaluation path (spec §4.D).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertCondition {
    #[serde(rename = "type")]
    pub kind: String, // always "pct_change" for complex alerts today
    pub value: f64,
    pub timeframe: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct NotificationOptions {
    #[serde(default)]
    pub alert_for_mode: Option<AlertForMode>,
}

/// Persistent alert record, owned by the external store and mutated only
/// through the repository trait (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub description: Option<String>,
    pub alert_type: AlertType,
    pub exchange: String,
    pub market: Market,
    pub symbols: Vec<String>,
    pub target_value: Option<f64>,
    pub condition: Option<Condition>,
    pub initial_price: Option<f64>,
    pub conditions: Option<Vec<AlertCondition>>,
    pub notification_options: Option<NotificationOptions>,
    pub is_active: bool,
    pub triggered: bool,
    pub triggered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Alert {
    /// First symbol, the only one a price alert ever evaluates (§3).
    pub fn first_symbol(&self) -> Option<&str> {
        self.symbols.first().map(String::as_str)
    }

    /// Invariant from §3: a price alert with both flags set is dead weight,
    /// never evaluated again.
    pub fn is_evaluable_price_alert(&self) -> bool {
        self.alert_type == AlertType::Price && self.is_active && !self.triggered
    }

    pub fn is_evaluable_complex_alert(&self) -> bool {
        self.alert_type == AlertType::Complex && self.is_active
    }

    pub fn exchange_market_key(&self) -> String {
        format!("{}|{}", self.exchange, self.market)
    }
}

/// One sample in a ring buffer: monotonic-ms timestamp and a positive,
/// finite price.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricePoint {
    pub ts: i64,
    pub price: f64,
}

/// Result of `RingBufferStore::window_stats` (§4.C).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStats {
    pub min: f64,
    pub max: f64,
    pub oldest: f64,
    pub current: f64,
    pub points: usize,
}

/// A single OHLCV candle, chronological and closed, as returned by
/// `fetch_klines` (§6).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Kline {
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// One fan-in tick: the last-known price map for an (exchange, market) pair
/// at a point in time (§4.B). Carries only last-known prices, never deltas.
#[derive(Debug, Clone)]
pub struct MarketTick {
    pub exchange: String,
    pub market: Market,
    pub prices: std::collections::HashMap<String, f64>,
    pub ts: i64,
}
