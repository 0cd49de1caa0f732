//! Notification channel seams

use async_trait::async_trait;
use thiserror::Error;

/// Errors from notification collaborators
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Schema error: {0}")]
    Schema(String),
}

/// The shared broadcast destination (one channel, one audience)
///
/// Send failures are the caller's to log and swallow; broadcast messages are
/// never retried.
#[async_trait]
pub trait BroadcastChannel: Send + Sync {
    async fn send_message(&self, text: &str) -> Result<(), NotifyError>;
}

/// Per-subscriber push delivery
///
/// Returns whether delivery was confirmed by the service; only a confirmed
/// delivery may advance a subscriber's cooldown stamp.
#[async_trait]
pub trait PushSender: Send + Sync {
    async fn send(&self, user_key: &str, title: &str, body: &str) -> Result<bool, NotifyError>;
}
