//! Telegram operator surface: a trading kill switch flipped by chat
//! commands, plus one-way notifications from the decision loop.
//!
//! The bot starts with trading disabled; the operator enables it with
//! `/on`. The command loop long-polls `getUpdates` and only touches the
//! shared atomic flag and read-only views, never trading state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::exchange::OperatorChannel;
use crate::journal::TradeJournal;

const POLL_TIMEOUT_SECS: u64 = 30;

/// Shared operator channel handle. Cheap to clone.
#[derive(Clone)]
pub struct TelegramChannel {
    inner: Arc<Inner>,
}

struct Inner {
    http: Client,
    token: String,
    chat_id: String,
    enabled: AtomicBool,
}

/// Static facts shown by `/status`.
#[derive(Debug, Clone)]
pub struct StatusInfo {
    pub symbol: String,
    pub interval: String,
    pub testnet: bool,
}

impl TelegramChannel {
    /// Build from `TELEGRAM_TOKEN` / `TELEGRAM_CHAT_ID`. Trading starts
    /// disabled.
    pub fn from_env() -> anyhow::Result<Self> {
        let token = std::env::var("TELEGRAM_TOKEN")
            .map_err(|_| anyhow::anyhow!("TELEGRAM_TOKEN environment variable required"))?;
        let chat_id = std::env::var("TELEGRAM_CHAT_ID").unwrap_or_default();
        let http = Client::builder()
            .timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 10))
            .build()?;
        Ok(Self {
            inner: Arc::new(Inner {
                http,
                token,
                chat_id,
                enabled: AtomicBool::new(false),
            }),
        })
    }

    async fn send(&self, chat_id: &str, text: &str) {
        if chat_id.is_empty() {
            return;
        }
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.inner.token);
        let body = serde_json::json!({ "chat_id": chat_id, "text": text });
        match self.inner.http.post(&url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => warn!("Telegram send failed: {}", resp.status()),
            Err(e) => warn!("Telegram send error: {e}"),
        }
    }

    /// Long-poll for operator commands. Runs for the life of the process.
    pub async fn run_command_loop(self, journal: Arc<TradeJournal>, status: StatusInfo) {
        info!("Telegram command loop started (trading disabled, /on to enable)");
        let mut offset: i64 = 0;
        loop {
            let updates = self.get_updates(offset).await;
            for update in updates {
                offset = offset.max(update.update_id + 1);
                let Some(message) = update.message else {
                    continue;
                };
                let Some(text) = message.text else {
                    continue;
                };
                let chat_id = message.chat.id.to_string();
                if let Some(reply) = self.handle_command(text.trim(), &journal, &status) {
                    self.send(&chat_id, &reply).await;
                }
            }
        }
    }

    fn handle_command(
        &self,
        text: &str,
        journal: &TradeJournal,
        status: &StatusInfo,
    ) -> Option<String> {
        match command_name(text)? {
            "start" => Some(
                "Commands:\n\
                 /on - enable trading\n\
                 /off - disable trading\n\
                 /status - bot status\n\
                 /summary - today's trades"
                    .to_string(),
            ),
            "on" => {
                self.inner.enabled.store(true, Ordering::SeqCst);
                info!("Trading enabled by operator");
                Some("✅ Trading enabled.".to_string())
            }
            "off" => {
                self.inner.enabled.store(false, Ordering::SeqCst);
                info!("Trading disabled by operator");
                Some("⏸ Trading disabled.".to_string())
            }
            "status" => {
                let state = if self.is_trading_enabled() {
                    "active"
                } else {
                    "stopped"
                };
                let mode = if status.testnet { "TESTNET" } else { "LIVE" };
                Some(format!(
                    "Status: {state}\nMode: {mode}\nSymbol: {}\nInterval: {}m",
                    status.symbol, status.interval
                ))
            }
            "summary" => {
                let s = journal.daily_summary();
                if s.trades == 0 {
                    Some("No trades today.".to_string())
                } else {
                    Some(format!(
                        "Trades: {}\nAvg score: {:.2}\nTotal PnL: {:.2} USDT",
                        s.trades, s.avg_score, s.total_pnl
                    ))
                }
            }
            other => {
                debug!("Ignoring unknown command /{other}");
                None
            }
        }
    }

    async fn get_updates(&self, offset: i64) -> Vec<Update> {
        let url = format!("https://api.telegram.org/bot{}/getUpdates", self.inner.token);
        let body = serde_json::json!({
            "offset": offset,
            "timeout": POLL_TIMEOUT_SECS,
            "allowed_updates": ["message"],
        });
        let resp = match self.inner.http.post(&url).json(&body).send().await {
            Ok(resp) => resp,
            Err(e) => {
                warn!("getUpdates error: {e}");
                tokio::time::sleep(Duration::from_secs(5)).await;
                return Vec::new();
            }
        };
        match resp.json::<UpdatesResponse>().await {
            Ok(parsed) if parsed.ok => parsed.result,
            Ok(_) => {
                warn!("getUpdates returned ok=false");
                Vec::new()
            }
            Err(e) => {
                warn!("getUpdates parse error: {e}");
                Vec::new()
            }
        }
    }
}

impl OperatorChannel for TelegramChannel {
    fn is_trading_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    async fn notify(&self, text: &str) {
        let chat_id = self.inner.chat_id.clone();
        self.send(&chat_id, text).await;
    }
}

/// `"/on@my_bot extra"` -> `Some("on")`; non-commands -> `None`.
fn command_name(text: &str) -> Option<&str> {
    let rest = text.strip_prefix('/')?;
    let word = rest.split_whitespace().next()?;
    Some(word.split('@').next().unwrap_or(word))
}

#[derive(Debug, Deserialize)]
struct UpdatesResponse {
    ok: bool,
    #[serde(default)]
    result: Vec<Update>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    chat: Chat,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_name_parsing() {
        assert_eq!(command_name("/on"), Some("on"));
        assert_eq!(command_name("/status@trend_bot"), Some("status"));
        assert_eq!(command_name("/summary please"), Some("summary"));
        assert_eq!(command_name("hello"), None);
        assert_eq!(command_name("/"), None);
    }
}
