//! Alerting capability.
//!
//! The pipeline only knows the `AlertSink` trait; the `alerting` config
//! block is opaque and interpreted here. Delivery is fire-and-forget:
//! a failed alert is logged and never disturbs the monitoring loop.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{info, warn};

use arb_common::Direction;

/// Events worth pushing beyond the local logs.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlertEvent {
    /// A net-positive window just opened.
    OpportunityOpened {
        pair_id: String,
        market_pair: String,
        direction: Direction,
        net_spread: Decimal,
    },
    /// Third-or-later 429 within the trailing window.
    RepeatedRateLimit {
        occurrence: u32,
        new_interval_seconds: f64,
    },
}

#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn notify(&self, event: &AlertEvent);
}

/// Default sink: alerts become structured log lines.
#[derive(Debug, Default)]
pub struct LogAlerter;

#[async_trait]
impl AlertSink for LogAlerter {
    async fn notify(&self, event: &AlertEvent) {
        match event {
            AlertEvent::OpportunityOpened {
                pair_id,
                market_pair,
                direction,
                net_spread,
            } => info!(
                pair_id = %pair_id,
                market_pair = %market_pair,
                direction = %direction,
                net_spread = %net_spread,
                "⚡ Arbitrage opportunity"
            ),
            AlertEvent::RepeatedRateLimit {
                occurrence,
                new_interval_seconds,
            } => warn!(
                occurrence = occurrence,
                new_interval_seconds = new_interval_seconds,
                "Repeated rate limiting"
            ),
        }
    }
}

/// Telegram sink configured from the opaque `alerting` block.
pub struct TelegramAlerter {
    http: reqwest::Client,
    bot_token: String,
    chat_id: String,
}

impl TelegramAlerter {
    /// Builds a sender when the block carries `enabled: true` and both
    /// credentials; `None` otherwise.
    pub fn from_config(alerting: &serde_json::Value) -> Option<Self> {
        if !alerting.get("enabled").and_then(|v| v.as_bool()).unwrap_or(false) {
            return None;
        }
        let bot_token = alerting.get("telegram_bot_token")?.as_str()?.to_string();
        let chat_id = alerting.get("telegram_chat_id")?.as_str()?.to_string();
        if bot_token.is_empty() || chat_id.is_empty() {
            return None;
        }
        Some(Self {
            http: reqwest::Client::new(),
            bot_token,
            chat_id,
        })
    }

    fn render(event: &AlertEvent) -> String {
        match event {
            AlertEvent::OpportunityOpened {
                pair_id,
                market_pair,
                direction,
                net_spread,
            } => format!(
                "⚡ Arbitrage opportunity!\n{market_pair} ({pair_id})\n{direction} net spread {net_spread}"
            ),
            AlertEvent::RepeatedRateLimit {
                occurrence,
                new_interval_seconds,
            } => format!(
                "⚠️ Rate limited {occurrence} times in 30 min; polling interval now {new_interval_seconds}s"
            ),
        }
    }
}

#[async_trait]
impl AlertSink for TelegramAlerter {
    async fn notify(&self, event: &AlertEvent) {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let body = serde_json::json!({
            "chat_id": self.chat_id,
            "text": Self::render(event),
        });

        match self.http.post(&url).json(&body).send().await {
            Ok(response) if !response.status().is_success() => {
                warn!(status = response.status().as_u16(), "Telegram alert rejected");
            }
            Err(err) => warn!(error = %err, "Telegram alert failed"),
            _ => {}
        }
    }
}

/// Builds the configured sink, falling back to log-only.
pub fn build_alert_sink(alerting: Option<&serde_json::Value>) -> Box<dyn AlertSink> {
    if let Some(block) = alerting {
        if let Some(telegram) = TelegramAlerter::from_config(block) {
            info!("Telegram alerting enabled");
            return Box::new(telegram);
        }
    }
    Box::new(LogAlerter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_telegram_requires_enabled_and_credentials() {
        assert!(TelegramAlerter::from_config(&json!({})).is_none());
        assert!(TelegramAlerter::from_config(&json!({"enabled": false})).is_none());
        assert!(TelegramAlerter::from_config(&json!({
            "enabled": true,
            "telegram_bot_token": "tok"
        }))
        .is_none());

        let sink = TelegramAlerter::from_config(&json!({
            "enabled": true,
            "telegram_bot_token": "tok",
            "telegram_chat_id": "42"
        }));
        assert!(sink.is_some());
    }

    #[test]
    fn test_render_opportunity() {
        let text = TelegramAlerter::render(&AlertEvent::OpportunityOpened {
            pair_id: "T1".to_string(),
            market_pair: "Fed rate cut".to_string(),
            direction: Direction::KalshiToPoly,
            net_spread: dec!(0.03),
        });
        assert!(text.contains("Fed rate cut"));
        assert!(text.contains("K→P"));
        assert!(text.contains("0.03"));
    }

    #[tokio::test]
    async fn test_log_alerter_is_infallible() {
        LogAlerter
            .notify(&AlertEvent::RepeatedRateLimit {
                occurrence: 3,
                new_interval_seconds: 8.0,
            })
            .await;
    }
}
