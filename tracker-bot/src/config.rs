//! Environment configuration
//!
//! All knobs load from the environment (optionally via a `.env` file).
//! Missing required variables fail startup with a descriptive error; this is
//! the only place configuration problems are allowed to be fatal.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Result};

/// Which trade source variant drives ingestion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMode {
    /// Persistent WebSocket stream + independent report timer
    Stream,
    /// Windowed HTTP polling; one combined tick ingests and summarizes
    Poll,
}

impl FromStr for SourceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stream" | "ws" | "websocket" => Ok(SourceMode::Stream),
            "poll" | "http" => Ok(SourceMode::Poll),
            _ => Err(format!("Unknown trade source: {}", s)),
        }
    }
}

/// Aggregate bot configuration
#[derive(Debug, Clone)]
pub struct BotConfig {
    // Lighter
    pub account_id: i64,
    pub auth_token: String,
    pub ws_url: String,
    pub api_base_url: String,
    pub poll_limit: u32,

    // Telegram
    pub telegram_bot_token: String,
    pub telegram_channel_id: String,

    // Pushover
    pub pushover_app_token: String,

    // Durable state
    pub state_db_path: String,
    pub window_db_path: String,
    pub subscribers_db_path: String,

    // Engine
    pub source_mode: SourceMode,
    pub report_interval: Duration,
    pub poll_interval: Duration,
    pub cooldown: Duration,
    pub retention: Duration,

    // Transport
    pub backoff_floor: Duration,
    pub backoff_ceiling: Duration,
    pub backoff_factor: f64,
    pub max_connection_lifetime: Duration,
    pub max_retries: u32,
    pub request_timeout: Duration,

    // Shutdown
    pub shutdown_grace: Duration,
}

impl BotConfig {
    /// Load configuration from the environment, failing fast on missing
    /// required variables
    pub fn from_env() -> Result<Self> {
        let account_id: i64 = require("LIGHTER_ACCOUNT_ID")?
            .parse()
            .map_err(|_| anyhow!("LIGHTER_ACCOUNT_ID must be an integer account id"))?;

        let report_interval =
            Duration::from_secs(env_or("REPORT_INTERVAL_MINUTES", 5u64) * 60);
        let poll_interval = Duration::from_secs(env_or("POLL_INTERVAL_MINUTES", 5u64) * 60);
        let retention = Duration::from_secs(env_or("TRADE_RETENTION_SECONDS", 360u64));

        // The reporter reads a trailing window the length of its interval;
        // retention shorter than that would purge trades it still needs
        if retention < report_interval {
            return Err(anyhow!(
                "TRADE_RETENTION_SECONDS ({}s) must cover REPORT_INTERVAL_MINUTES ({}s)",
                retention.as_secs(),
                report_interval.as_secs()
            ));
        }

        Ok(Self {
            account_id,
            auth_token: require("LIGHTER_AUTH_TOKEN")?,
            ws_url: env_or_string("LIGHTER_WS_URL", tracker_lighter::websocket::LIGHTER_WS_URL),
            api_base_url: env_or_string("LIGHTER_API_BASE_URL", tracker_lighter::client::LIGHTER_API_BASE),
            poll_limit: env_or("POLL_LIMIT", 500u32),

            telegram_bot_token: require("TELEGRAM_BOT_TOKEN")?,
            telegram_channel_id: require("TELEGRAM_CHANNEL_ID")?,

            pushover_app_token: require("PUSHOVER_APP_TOKEN")?,

            state_db_path: env_or_string("STATE_DB_PATH", "data/state.db"),
            window_db_path: env_or_string("WINDOW_DB_PATH", "data/window.db"),
            subscribers_db_path: env_or_string("SUBSCRIBERS_DB_PATH", "data/subscribers.db"),

            source_mode: env_or("TRADE_SOURCE", SourceMode::Stream),
            report_interval,
            poll_interval,
            cooldown: Duration::from_secs(env_or("SELL_NOTIFY_COOLDOWN_HOURS", 2u64) * 3600),
            retention,

            backoff_floor: Duration::from_secs(env_or("WS_BACKOFF_FLOOR_SECS", 2u64)),
            backoff_ceiling: Duration::from_secs(env_or("WS_BACKOFF_CEILING_SECS", 60u64)),
            backoff_factor: env_or("WS_BACKOFF_FACTOR", 2.0f64),
            max_connection_lifetime: Duration::from_secs(
                env_or("WS_MAX_CONNECTION_AGE_HOURS", 24u64) * 3600,
            ),
            max_retries: env_or("MAX_RETRIES", 3u32),
            request_timeout: Duration::from_secs(env_or("REQUEST_TIMEOUT_SECS", 15u64)),

            shutdown_grace: Duration::from_secs(env_or("SHUTDOWN_GRACE_SECS", 10u64)),
        })
    }
}

/// Return the env-var value or a descriptive error at startup
fn require(name: &str) -> Result<String> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(anyhow!(
            "Required environment variable '{}' is not set. \
             Copy .env.example to .env and fill in all values.",
            name
        )),
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_or_string(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_mode_parses() {
        assert_eq!("stream".parse::<SourceMode>().unwrap(), SourceMode::Stream);
        assert_eq!("POLL".parse::<SourceMode>().unwrap(), SourceMode::Poll);
        assert!("carrier-pigeon".parse::<SourceMode>().is_err());
    }
}
