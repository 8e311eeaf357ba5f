use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{error, warn};

use crate::types::{Position, Trade};

/// Trade event notifications. Every method is fail-safe: failures are
/// logged and swallowed so the trading path is never disrupted.
#[async_trait]
pub trait Alerter: Send + Sync {
    async fn on_strategy_start(&self, strategy_name: &str);
    async fn on_trade_open(&self, position: &Position);
    async fn on_trade_close(&self, trade: &Trade);
    async fn on_error(&self, message: &str);
    async fn send_alert(&self, message: &str, embed: Option<Value>);
}

// Discord embed colors (decimal)
const COLOR_GREEN: u32 = 0x2ECC71;
const COLOR_RED: u32 = 0xE74C3C;
const COLOR_BLUE: u32 = 0x3498DB;

const MAX_RATE_LIMIT_RETRIES: u32 = 3;
const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Sends trade notifications to a Discord channel via webhook.
///
/// A 429 response is retried after the `Retry-After` duration, up to
/// `MAX_RATE_LIMIT_RETRIES` times; everything else is best-effort.
pub struct DiscordAlerter {
    webhook_url: String,
    client: reqwest::Client,
}

impl DiscordAlerter {
    pub fn new(webhook_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            webhook_url,
            client,
        }
    }

    async fn post(&self, payload: Value) {
        for attempt in 0..=MAX_RATE_LIMIT_RETRIES {
            let response = match self.client.post(&self.webhook_url).json(&payload).send().await
            {
                Ok(response) => response,
                Err(e) => {
                    error!("discord webhook request failed: {}", e);
                    return;
                }
            };

            if response.status().as_u16() == 429 {
                let retry_after = parse_retry_after(&response);
                if attempt < MAX_RATE_LIMIT_RETRIES {
                    warn!(
                        "discord rate limited, retrying after {:.1}s (attempt {}/{})",
                        retry_after,
                        attempt + 1,
                        MAX_RATE_LIMIT_RETRIES
                    );
                    tokio::time::sleep(Duration::from_secs_f64(retry_after)).await;
                    continue;
                }
                error!(
                    "discord rate limit exceeded after {} retries, dropping message",
                    MAX_RATE_LIMIT_RETRIES
                );
                return;
            }

            if response.status().is_client_error() || response.status().is_server_error() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                let snippet: String = body.chars().take(200).collect();
                error!("discord webhook returned {}: {}", status, snippet);
            }
            return;
        }
    }

    fn format_pnl(pnl: rust_decimal::Decimal) -> String {
        if pnl >= rust_decimal::Decimal::ZERO {
            format!("+${pnl:.2}")
        } else {
            format!("-${:.2}", pnl.abs())
        }
    }
}

fn parse_retry_after(response: &reqwest::Response) -> f64 {
    response
        .headers()
        .get("Retry-After")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(1.0)
}

#[async_trait]
impl Alerter for DiscordAlerter {
    async fn on_strategy_start(&self, strategy_name: &str) {
        let embed = json!({
            "title": "Strategy Started",
            "description": format!("**{strategy_name}** is now active"),
            "color": COLOR_BLUE,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        self.send_alert("", Some(embed)).await;
    }

    async fn on_trade_open(&self, position: &Position) {
        let side = position.side.as_str().to_uppercase();
        let color = match position.side {
            crate::types::Side::Long => COLOR_GREEN,
            crate::types::Side::Short => COLOR_RED,
        };
        let embed = json!({
            "title": format!("Position Opened: {side}"),
            "color": color,
            "fields": [
                {"name": "Side", "value": side, "inline": true},
                {"name": "Entry Price", "value": format!("${:.2}", position.entry_price), "inline": true},
                {"name": "Size (USD)", "value": format!("${:.2}", position.size_usd), "inline": true},
                {"name": "Stop Loss", "value": format!("${:.2}", position.stop_loss), "inline": true},
                {"name": "Take Profit", "value": format!("${:.2}", position.take_profit), "inline": true},
                {"name": "Position ID", "value": format!("`{}`", position.id), "inline": true},
            ],
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        self.send_alert("", Some(embed)).await;
    }

    async fn on_trade_close(&self, trade: &Trade) {
        let color = if trade.pnl >= rust_decimal::Decimal::ZERO {
            COLOR_GREEN
        } else {
            COLOR_RED
        };
        let reason = match trade.exit_reason {
            crate::types::ExitReason::StopLoss => "Stop Loss",
            crate::types::ExitReason::TakeProfit => "Take Profit",
            crate::types::ExitReason::Signal => "Signal",
        };
        let embed = json!({
            "title": format!("Trade Closed: {reason}"),
            "color": color,
            "fields": [
                {"name": "Side", "value": trade.side.as_str().to_uppercase(), "inline": true},
                {"name": "Entry Price", "value": format!("${:.2}", trade.entry_price), "inline": true},
                {"name": "Exit Price", "value": format!("${:.2}", trade.exit_price), "inline": true},
                {"name": "PnL", "value": format!("{} ({:+.2}%)", Self::format_pnl(trade.pnl), trade.pnl_percent), "inline": true},
                {"name": "Exit Reason", "value": reason, "inline": true},
                {"name": "Trade ID", "value": format!("`{}`", trade.id), "inline": true},
            ],
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        self.send_alert("", Some(embed)).await;
    }

    async fn on_error(&self, message: &str) {
        let embed = json!({
            "title": "Error",
            "description": message,
            "color": COLOR_RED,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        self.send_alert("", Some(embed)).await;
    }

    async fn send_alert(&self, message: &str, embed: Option<Value>) {
        let mut payload = json!({ "content": message });
        if let Some(embed) = embed {
            payload["embeds"] = json!([embed]);
        }
        self.post(payload).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_pnl_formatting() {
        assert_eq!(DiscordAlerter::format_pnl(dec!(100)), "+$100.00");
        assert_eq!(DiscordAlerter::format_pnl(dec!(-50.5)), "-$50.50");
        assert_eq!(DiscordAlerter::format_pnl(dec!(0)), "+$0.00");
    }
}
