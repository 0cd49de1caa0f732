//! Sell notification dispatcher
//!
//! Fans one detected sell out to the broadcast channel (unconditionally; the
//! channel is a single shared audience and is never rate-limited per
//! message) and to every cooldown-eligible Pushover subscriber. A
//! subscriber's cooldown stamp advances only on confirmed delivery, and one
//! subscriber's failure never blocks another's. The channel handles arrive
//! at construction; nothing here reaches for globals.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use tracker_core::NormalizedTrade;
use tracker_notify::{BroadcastChannel, PushSender};

use crate::format::format_usd;
use crate::subscribers::{SubscriberStore, SubscriberStoreError};

/// Configuration for the dispatcher
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Minimum elapsed time between two personal alerts to the same subscriber
    pub cooldown: Duration,
    /// The tracked account, shown in alert bodies
    pub account_id: String,
}

impl DispatcherConfig {
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            cooldown: Duration::from_secs(2 * 3600),
            account_id: account_id.into(),
        }
    }
}

/// Dispatches sell alerts to the broadcast channel and to subscribers
pub struct NotificationDispatcher {
    broadcast: Arc<dyn BroadcastChannel>,
    push: Arc<dyn PushSender>,
    subscribers: Arc<SubscriberStore>,
    config: DispatcherConfig,
}

impl NotificationDispatcher {
    /// Create a new dispatcher with injected channel handles
    pub fn new(
        broadcast: Arc<dyn BroadcastChannel>,
        push: Arc<dyn PushSender>,
        subscribers: Arc<SubscriberStore>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            broadcast,
            push,
            subscribers,
            config,
        }
    }

    /// Fan out one sell trade; returns the number of confirmed personal
    /// deliveries
    pub async fn dispatch_sell(&self, trade: &NormalizedTrade) -> Result<usize, DispatchError> {
        // Broadcast first, unconditionally. Losses are acceptable here;
        // broadcast sends are never retried.
        if let Err(e) = self.broadcast.send_message(&self.broadcast_text(trade)).await {
            warn!("[Dispatcher] Broadcast send failed: {}", e);
        }

        let now = Utc::now().timestamp();
        let eligible = self
            .subscribers
            .list_eligible(self.config.cooldown.as_secs() as i64, now)?;

        if eligible.is_empty() {
            debug!("[Dispatcher] No cooldown-eligible subscribers");
            return Ok(0);
        }

        let (title, body) = self.push_content(trade);
        let mut delivered = 0;

        for subscriber in eligible {
            match self.push.send(&subscriber.push_key, &title, &body).await {
                Ok(true) => {
                    // Stamp only on confirmed delivery; a failed stamp leaves
                    // the subscriber eligible on the next sell, which is the
                    // safe direction.
                    match self.subscribers.mark_notified(subscriber.user_id, now) {
                        Ok(()) => {
                            delivered += 1;
                            info!("[Dispatcher] Alert sent to user {}", subscriber.user_id);
                        }
                        Err(e) => {
                            warn!(
                                "[Dispatcher] Delivered to user {} but failed to stamp cooldown: {}",
                                subscriber.user_id, e
                            );
                        }
                    }
                }
                Ok(false) => {
                    warn!(
                        "[Dispatcher] Delivery unconfirmed for user {}",
                        subscriber.user_id
                    );
                }
                Err(e) => {
                    warn!(
                        "[Dispatcher] Push failed for user {}: {}",
                        subscriber.user_id, e
                    );
                }
            }
        }

        Ok(delivered)
    }

    fn broadcast_text(&self, trade: &NormalizedTrade) -> String {
        format!(
            "🔴 <b>SELL detected</b>\n\
             Market: {}\n\
             Price: {}\n\
             Size: {}\n\
             USD: ${}\n\
             Account: <code>{}</code>",
            trade.market_id,
            trade.price,
            trade.size,
            format_usd(&trade.usd_notional),
            self.config.account_id,
        )
    }

    fn push_content(&self, trade: &NormalizedTrade) -> (String, String) {
        let title = "🐋 Lighter Whale SELL".to_string();
        let body = format!(
            "Market: {}\nPrice: {}\nSize: {}\nUSD: ${}\nAccount: {}",
            trade.market_id,
            trade.price,
            trade.size,
            format_usd(&trade.usd_notional),
            self.config.account_id,
        );
        (title, body)
    }
}

/// Errors that can occur while dispatching
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Subscriber store error: {0}")]
    Store(#[from] SubscriberStoreError),
}
