//! Notification channel clients
//!
//! Two delivery paths: the shared Telegram broadcast channel (unthrottled,
//! fire-and-forget) and per-subscriber Pushover alerts (confirmed delivery,
//! cooldown-gated by the dispatcher). The engine depends only on the
//! [`BroadcastChannel`] and [`PushSender`] seams; concrete clients are
//! injected at construction.

pub mod channel;
pub mod pushover;
pub mod telegram;

pub use channel::{BroadcastChannel, NotifyError, PushSender};
pub use pushover::{PushoverClient, PushoverClientConfig};
pub use telegram::{TelegramChat, TelegramClient, TelegramMessage, TelegramUpdate, TelegramUser};
