//! Trigger payloads handed to the Trigger Sink (§4.J, §9 "duck-typed
//! payloads"). Explicit sum-typed variants with a shared header, rather than
//! an untyped map.

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct TriggerHeader {
    pub alert_id: String,
    pub user_id: String,
    pub name: String,
    pub description: Option<String>,
    pub triggered: bool,
    pub triggered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PricePayload {
    pub header: TriggerHeader,
    pub symbol: String,
    pub current_price: f64,
    pub target_value: f64,
    pub condition: crate::domain::types::Condition,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComplexPayload {
    pub header: TriggerHeader,
    pub symbol: String,
    /// Percent change over the window: `(current - oldest) / oldest * 100` (§4.E).
    pub pct_change: f64,
    pub baseline_price: f64,
    pub current_price: f64,
    pub window_seconds: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "alertType", rename_all = "lowercase")]
pub enum TriggerPayload {
    Price(PricePayload),
    Complex(ComplexPayload),
}

impl TriggerPayload {
    pub fn alert_id(&self) -> &str {
        match self {
            TriggerPayload::Price(p) => &p.header.alert_id,
            TriggerPayload::Complex(p) => &p.header.alert_id,
        }
    }

    pub fn user_id(&self) -> &str {
        match self {
            TriggerPayload::Price(p) => &p.header.user_id,
            TriggerPayload::Complex(p) => &p.header.user_id,
        }
    }
}
