//! Telegram Bot API client
//!
//! Covers the two surfaces the tracker needs: `sendMessage` for channel
//! broadcasts and replies, and `getUpdates` long-polling for the
//! subscription commands.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::channel::{BroadcastChannel, NotifyError};

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Long-poll duration for getUpdates
const GET_UPDATES_TIMEOUT_SECS: u64 = 30;

/// An update from getUpdates
#[derive(Debug, Clone, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<TelegramMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramMessage {
    pub chat: TelegramChat,
    #[serde(default)]
    pub from: Option<TelegramUser>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    result: Option<T>,
}

/// Telegram Bot API client
#[derive(Clone)]
pub struct TelegramClient {
    client: Client,
    bot_token: String,
    channel_id: String,
}

impl TelegramClient {
    pub fn new(bot_token: String, channel_id: String) -> Self {
        // Client timeout must outlast the getUpdates long poll
        let client = Client::builder()
            .timeout(Duration::from_secs(GET_UPDATES_TIMEOUT_SECS + 10))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            bot_token,
            channel_id,
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", TELEGRAM_API_BASE, self.bot_token, method)
    }

    /// Send an HTML-formatted message to an arbitrary chat
    pub async fn send_to(&self, chat_id: &str, text: &str) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&json!({
                "chat_id": chat_id,
                "text": text,
                "parse_mode": "HTML",
            }))
            .send()
            .await
            .map_err(|e| NotifyError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Api {
                status: status.as_u16(),
                body,
            });
        }

        debug!("[Telegram] Message sent to chat {}", chat_id);
        Ok(())
    }

    /// Long-poll for updates after `offset`
    pub async fn get_updates(&self, offset: i64) -> Result<Vec<TelegramUpdate>, NotifyError> {
        let response = self
            .client
            .get(self.method_url("getUpdates"))
            .query(&[
                ("offset", offset.to_string()),
                ("timeout", GET_UPDATES_TIMEOUT_SECS.to_string()),
            ])
            .send()
            .await
            .map_err(|e| NotifyError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ApiResponse<Vec<TelegramUpdate>> = response
            .json()
            .await
            .map_err(|e| NotifyError::Schema(e.to_string()))?;

        if !parsed.ok {
            return Err(NotifyError::Api {
                status: status.as_u16(),
                body: parsed.description.unwrap_or_default(),
            });
        }

        Ok(parsed.result.unwrap_or_default())
    }
}

#[async_trait]
impl BroadcastChannel for TelegramClient {
    async fn send_message(&self, text: &str) -> Result<(), NotifyError> {
        self.send_to(&self.channel_id, text).await
    }
}

impl std::fmt::Debug for TelegramClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramClient")
            .field("bot_token", &"[REDACTED]")
            .field("channel_id", &self.channel_id)
            .finish()
    }
}
