//! Lease-local fire action (§4.J): persist, then best-effort realtime push,
//! then best-effort messenger dispatch. Step 1 is the de-dup barrier; steps
//! 2 and 3 never undo it.

use crate::domain::events::TriggerPayload;
use crate::domain::repositories::{AlertRepository, UserDirectory};
use crate::infrastructure::observability::Metrics;
use crate::infrastructure::{RealtimeSink, TelegramMessenger};
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct TriggerSink {
    alerts: Arc<dyn AlertRepository>,
    users: Arc<dyn UserDirectory>,
    realtime: RealtimeSink,
    messenger: Arc<TelegramMessenger>,
    metrics: Option<Arc<Metrics>>,
}

impl TriggerSink {
    pub fn new(
        alerts: Arc<dyn AlertRepository>,
        users: Arc<dyn UserDirectory>,
        realtime: RealtimeSink,
        messenger: Arc<TelegramMessenger>,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        Self {
            alerts,
            users,
            realtime,
            messenger,
            metrics,
        }
    }

    /// Commits the state transition, then emits. Returns `true` iff this
    /// call actually committed the transition (the de-dup barrier) — a
    /// duplicate concurrent fire on an already-deleted price alert returns
    /// `false` and the caller should skip the rest of its own fire path.
    pub async fn fire(&self, payload: TriggerPayload) -> bool {
        let alert_id = payload.alert_id().to_string();
        let user_id = payload.user_id().to_string();

        let committed = match &payload {
            TriggerPayload::Price(_) => match self.alerts.delete(&alert_id).await {
                Ok(deleted) => deleted,
                Err(err) => {
                    error!(alert_id = %alert_id, "trigger_sink: failed to delete price alert: {err}");
                    false
                }
            },
            TriggerPayload::Complex(p) => {
                match self
                    .alerts
                    .mark_triggered(&alert_id, p.header.triggered_at)
                    .await
                {
                    Ok(()) => true,
                    Err(err) => {
                        error!(alert_id = %alert_id, "trigger_sink: failed to mark complex alert triggered: {err}");
                        false
                    }
                }
            }
        };

        if !committed {
            return false;
        }

        let alert_type = match &payload {
            TriggerPayload::Price(_) => "price",
            TriggerPayload::Complex(_) => "complex",
        };
        info!(
            scope = "alertEngine",
            alert_id = %alert_id,
            alert_type,
            "trigger.{}", alert_type
        );
        if let Some(metrics) = &self.metrics {
            metrics.inc_alerts_fired(alert_type);
        }

        self.realtime.publish(payload.clone());

        match self.users.telegram_chat_id(&user_id).await {
            Ok(chat_id) => {
                if let Err(err) = self
                    .messenger
                    .notify(chat_id.as_deref(), &payload)
                    .await
                {
                    warn!(alert_id = %alert_id, "trigger_sink: messenger dispatch failed: {err}");
                }
            }
            Err(err) => {
                warn!(user_id = %user_id, "trigger_sink: failed to resolve telegram chat id: {err}");
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{Alert, AlertType, Condition, Market};
    use crate::domain::events::{PricePayload, TriggerHeader};
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::Utc;
    use tokio::sync::Mutex;

    struct InMemoryAlerts(Mutex<Vec<Alert>>);

    #[async_trait]
    impl AlertRepository for InMemoryAlerts {
        async fn find_active(&self) -> Result<Vec<Alert>> {
            Ok(self.0.lock().await.clone())
        }
        async fn find_active_price_alerts(&self) -> Result<Vec<Alert>> {
            Ok(self.0.lock().await.clone())
        }
        async fn find_active_complex_alerts(&self) -> Result<Vec<Alert>> {
            Ok(vec![])
        }
        async fn find_by_id(&self, id: &str) -> Result<Option<Alert>> {
            Ok(self.0.lock().await.iter().find(|a| a.id == id).cloned())
        }
        async fn delete(&self, id: &str) -> Result<bool> {
            let mut alerts = self.0.lock().await;
            let before = alerts.len();
            alerts.retain(|a| a.id != id);
            Ok(alerts.len() < before)
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

    struct NoChatId;

    #[async_trait]
    impl UserDirectory for NoChatId {
        async fn telegram_chat_id(&self, _user_id: &str) -> Result<Option<String>> {
            Ok(None)
        }
    }

    fn price_alert(id: &str) -> Alert {
        Alert {
            id: id.to_string(),
            user_id: "u1".to_string(),
            name: "BTC touch".to_string(),
            description: None,
            alert_type: AlertType::Price,
            exchange: "binance".to_string(),
            market: Market::Spot,
            symbols: vec!["BTCUSDT".to_string()],
            target_value: Some(50_000.0),
            condition: Some(Condition::Below),
            initial_price: Some(52_000.0),
            conditions: None,
            notification_options: None,
            is_active: true,
            triggered: false,
            triggered_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn price_payload(alert_id: &str) -> TriggerPayload {
        TriggerPayload::Price(PricePayload {
            header: TriggerHeader {
                alert_id: alert_id.to_string(),
                user_id: "u1".to_string(),
                name: "BTC touch".to_string(),
                description: None,
                triggered: true,
                triggered_at: Utc::now(),
            },
            symbol: "BTCUSDT".to_string(),
            current_price: 50_001.0,
            target_value: 50_000.0,
            condition: Condition::Below,
        })
    }

    #[tokio::test]
    async fn fire_deletes_price_alert_and_reports_committed() {
        let alerts = Arc::new(InMemoryAlerts(Mutex::new(vec![price_alert("a1")])));
        let sink = TriggerSink::new(
            alerts.clone(),
            Arc::new(NoChatId),
            RealtimeSink::new(),
            Arc::new(TelegramMessenger::new("dummy".to_string())),
            None,
        );

        let committed = sink.fire(price_payload("a1")).await;
        assert!(committed);
        assert!(alerts.0.lock().await.is_empty());
    }

    #[tokio::test]
    async fn duplicate_fire_on_already_deleted_alert_is_not_committed() {
        let alerts = Arc::new(InMemoryAlerts(Mutex::new(vec![])));
        let sink = TriggerSink::new(
            alerts,
            Arc::new(NoChatId),
            RealtimeSink::new(),
            Arc::new(TelegramMessenger::new("dummy".to_string())),
            None,
        );

        let committed = sink.fire(price_payload("missing")).await;
        assert!(!committed);
    }
}
