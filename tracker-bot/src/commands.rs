//! Telegram command handling
//!
//! Long-polls getUpdates and serves the subscription commands:
//! /start, /help, /enable_pushover <key>, /disable_pushover, /status.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use tracker_notify::{TelegramClient, TelegramUpdate};
use tracker_services::SubscriberStore;

/// Minimum plausible length of a Pushover user key
const MIN_PUSH_KEY_LEN: usize = 10;

/// Delay before retrying after a getUpdates failure
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Serves subscriber registration commands over Telegram
pub struct CommandHandler {
    telegram: Arc<TelegramClient>,
    subscribers: Arc<SubscriberStore>,
    account_id: String,
    report_interval: Duration,
    cooldown: Duration,
}

impl CommandHandler {
    pub fn new(
        telegram: Arc<TelegramClient>,
        subscribers: Arc<SubscriberStore>,
        account_id: String,
        report_interval: Duration,
        cooldown: Duration,
    ) -> Self {
        Self {
            telegram,
            subscribers,
            account_id,
            report_interval,
            cooldown,
        }
    }

    /// Long-poll for commands until shutdown
    pub async fn start(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("[Commands] Telegram command polling started");
        let mut offset = 0i64;

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("[Commands] Shutdown requested");
                    break;
                }
                result = self.telegram.get_updates(offset) => match result {
                    Ok(updates) => {
                        for update in updates {
                            offset = offset.max(update.update_id + 1);
                            self.handle_update(update).await;
                        }
                    }
                    Err(e) => {
                        warn!("[Commands] getUpdates failed: {} - retrying in {:?}", e, POLL_RETRY_DELAY);
                        tokio::time::sleep(POLL_RETRY_DELAY).await;
                    }
                }
            }
        }
    }

    async fn handle_update(&self, update: TelegramUpdate) {
        let Some(message) = update.message else { return };
        let Some(text) = message.text.as_deref() else { return };
        let Some(user) = message.from.as_ref() else { return };
        let chat_id = message.chat.id.to_string();

        let mut parts = text.split_whitespace();
        // Commands in groups arrive as /command@botname
        let command = parts
            .next()
            .map(|c| c.split('@').next().unwrap_or(c))
            .unwrap_or("");

        match command {
            "/start" => {
                self.reply(
                    &chat_id,
                    "👋 <b>Lighter Whale Tracker</b>\n\n\
                     I monitor a Lighter DEX whale account and send trade reports to this \
                     channel every few minutes.\n\n\
                     Use /help to see available commands.",
                )
                .await;
            }
            "/help" => {
                self.reply(
                    &chat_id,
                    "<b>Available commands</b>\n\n\
                     /enable_pushover <i>your-pushover-user-key</i>\n\
                     \u{2003}→ Subscribe to instant sell alerts via Pushover.\n\n\
                     /disable_pushover\n\
                     \u{2003}→ Unsubscribe from Pushover alerts.\n\n\
                     /status\n\
                     \u{2003}→ Show bot status and subscriber count.",
                )
                .await;
            }
            "/enable_pushover" => {
                let Some(push_key) = parts.next() else {
                    self.reply(
                        &chat_id,
                        "⚠️ Usage: <code>/enable_pushover your-pushover-user-key</code>",
                    )
                    .await;
                    return;
                };

                if push_key.len() < MIN_PUSH_KEY_LEN {
                    self.reply(
                        &chat_id,
                        "⚠️ That doesn't look like a valid Pushover user key. \
                         Please copy it from your Pushover dashboard.",
                    )
                    .await;
                    return;
                }

                match self.subscribers.upsert(user.id, push_key) {
                    Ok(()) => {
                        info!("[Commands] User {} enabled Pushover", user.id);
                        self.reply(
                            &chat_id,
                            &format!(
                                "✅ You have been subscribed to Pushover sell alerts.\n\
                                 Cooldown between alerts: {} h.",
                                self.cooldown.as_secs() / 3600
                            ),
                        )
                        .await;
                    }
                    Err(e) => {
                        warn!("[Commands] Failed to register user {}: {}", user.id, e);
                        self.reply(&chat_id, "⚠️ Registration failed, please try again later.")
                            .await;
                    }
                }
            }
            "/disable_pushover" => match self.subscribers.delete(user.id) {
                Ok(true) => {
                    info!("[Commands] User {} disabled Pushover", user.id);
                    self.reply(&chat_id, "✅ You have been unsubscribed from Pushover alerts.")
                        .await;
                }
                Ok(false) => {
                    self.reply(
                        &chat_id,
                        "ℹ️ You were not subscribed. Use /enable_pushover to subscribe.",
                    )
                    .await;
                }
                Err(e) => {
                    warn!("[Commands] Failed to unregister user {}: {}", user.id, e);
                    self.reply(&chat_id, "⚠️ Unsubscribe failed, please try again later.")
                        .await;
                }
            },
            "/status" => {
                let count = self.subscribers.count().unwrap_or(0);
                self.reply(
                    &chat_id,
                    &format!(
                        "🤖 <b>Bot status</b>\n\n\
                         Tracked account: <code>{}</code>\n\
                         Report interval: {} min\n\
                         Pushover subscribers: {}",
                        self.account_id,
                        self.report_interval.as_secs() / 60,
                        count
                    ),
                )
                .await;
            }
            _ => {}
        }
    }

    async fn reply(&self, chat_id: &str, text: &str) {
        if let Err(e) = self.telegram.send_to(chat_id, text).await {
            warn!("[Commands] Failed to reply in chat {}: {}", chat_id, e);
        }
    }
}
