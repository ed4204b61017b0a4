//! Outbound notification transports.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use cadence_scheduler::Notifier;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::AgentError;

/// Telegram Bot API root.
pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Sends messages to one Telegram chat.
pub struct TelegramNotifier {
    http: Client,
    api_base: String,
    token: String,
    chat_id: String,
}

impl TelegramNotifier {
    /// Create a notifier. Fails if the token or chat id is missing.
    pub fn new(token: impl Into<String>, chat_id: impl Into<String>) -> Result<Self, AgentError> {
        let token = token.into();
        let chat_id = chat_id.into();
        if token.trim().is_empty() {
            return Err(AgentError::Config("TELEGRAM_BOT_TOKEN is not set".to_string()));
        }
        if chat_id.trim().is_empty() {
            return Err(AgentError::Config("TELEGRAM_CHAT_ID is not set".to_string()));
        }

        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            api_base: TELEGRAM_API_BASE.to_string(),
            token,
            chat_id,
        })
    }

    /// Point at a different API root.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    async fn send_message(&self, text: &str) -> Result<(), AgentError> {
        #[derive(Serialize)]
        struct SendMessage<'a> {
            chat_id: &'a str,
            text: &'a str,
        }

        #[derive(Deserialize)]
        struct Ack {
            ok: bool,
            #[serde(default)]
            description: Option<String>,
        }

        let url = format!(
            "{}/bot{}/sendMessage",
            self.api_base.trim_end_matches('/'),
            self.token
        );

        let response = self
            .http
            .post(&url)
            .json(&SendMessage {
                chat_id: &self.chat_id,
                text,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|e| format!("failed to read response: {e}"));
            return Err(AgentError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let ack: Ack = response.json().await?;
        if !ack.ok {
            return Err(AgentError::Api {
                status: status.as_u16(),
                body: ack.description.unwrap_or_default(),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for TelegramNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramNotifier")
            .field("api_base", &self.api_base)
            .field("chat_id", &self.chat_id)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, message: &str) -> bool {
        match self.send_message(message).await {
            Ok(()) => {
                info!(chat_id = %self.chat_id, "message sent");
                true
            }
            Err(e) => {
                // The URL carries the bot token, so keep it out of the log
                error!(chat_id = %self.chat_id, error = %e.without_url(), "failed to send message");
                false
            }
        }
    }
}

/// Logs messages instead of delivering them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, message: &str) -> bool {
        info!(%message, "notification (no transport configured)");
        true
    }
}
