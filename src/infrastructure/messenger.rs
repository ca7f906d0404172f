//! Telegram messenger dispatcher: Trigger Sink step 3 (§4.J), a thin
//! `reqwest` client posting to the Bot API's `sendMessage` endpoint, same
//! `reqwest` + `CircuitBreaker` idiom as the Binance adapter.

use crate::domain::events::TriggerPayload;
use crate::infrastructure::core::circuit_breaker::{CircuitBreaker, CircuitBreakerError};
use crate::infrastructure::core::http_client_factory::HttpClientFactory;
use anyhow::{Context, Result};
use reqwest_middleware::ClientWithMiddleware;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

pub struct TelegramMessenger {
    client: ClientWithMiddleware,
    bot_token: String,
    circuit_breaker: CircuitBreaker,
}

impl TelegramMessenger {
    pub fn new(bot_token: String) -> Self {
        Self {
            client: HttpClientFactory::create_client(),
            bot_token,
            circuit_breaker: CircuitBreaker::new("TelegramMessenger", 5, 3, Duration::from_secs(60)),
        }
    }

    /// Send the fired-alert notification to `chat_id`. Skips silently
    /// (logs at `debug`) when the user has no linked chat id, per §4.J —
    /// the caller should only invoke this when `chat_id` is `Some`.
    pub async fn notify(&self, chat_id: Option<&str>, payload: &TriggerPayload) -> Result<()> {
        let Some(chat_id) = chat_id else {
            debug!(
                alert_id = payload.alert_id(),
                "no linked telegram chat id, skipping notification"
            );
            return Ok(());
        };

        let text = format_message(payload);
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let client = self.client.clone();
        let chat_id = chat_id.to_string();

        self.circuit_breaker
            .call(async move {
                #[derive(Serialize)]
                struct SendMessageRequest<'a> {
                    chat_id: &'a str,
                    text: &'a str,
                    parse_mode: &'a str,
                }

                let response = client
                    .post(&url)
                    .json(&SendMessageRequest {
                        chat_id: &chat_id,
                        text: &text,
                        parse_mode: "HTML",
                    })
                    .send()
                    .await
                    .context("failed to reach telegram bot api")?;

                if !response.status().is_success() {
                    let body = response.text().await.unwrap_or_default();
                    anyhow::bail!("telegram sendMessage failed: {body}");
                }

                Ok(())
            })
            .await
            .map_err(|e| match e {
                CircuitBreakerError::Open(msg) => {
                    anyhow::anyhow!("telegram messenger circuit breaker open: {msg}")
                }
                CircuitBreakerError::Inner(inner) => inner,
            })
    }
}

fn format_message(payload: &TriggerPayload) -> String {
    match payload {
        TriggerPayload::Price(p) => format!(
            "<b>{}</b>\n{} {} {} (target {})",
            p.header.name,
            p.symbol,
            if p.current_price >= p.target_value {
                "crossed above"
            } else {
                "crossed below"
            },
            p.current_price,
            p.target_value
        ),
        TriggerPayload::Complex(p) => format!(
            "<b>{}</b>\n{} moved {:.2}% over {}s ({} -> {})",
            p.header.name,
            p.symbol,
            p.pct_change,
            p.window_seconds,
            p.baseline_price,
            p.current_price
        ),
    }
}
