//! Pushover client for per-subscriber sell alerts
//!
//! Delivery is confirmed only by a 200 response with `status == 1`; the
//! dispatcher stamps a subscriber's cooldown on that confirmation alone.
//! Rate limits honor `Retry-After`; server errors and timeouts retry with
//! capped exponential backoff up to a bounded attempt count, after which the
//! attempt is abandoned for this cycle.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use tracing::warn;

use crate::channel::{NotifyError, PushSender};

const PUSHOVER_API_URL: &str = "https://api.pushover.net/1/messages.json";

const DEFAULT_RETRY_AFTER_SECS: u64 = 2;
const MAX_RETRY_DELAY_SECS: u64 = 10;

/// Configuration for PushoverClient
#[derive(Debug, Clone)]
pub struct PushoverClientConfig {
    pub app_token: String,
    pub request_timeout: Duration,
    pub max_retries: u32,
}

impl PushoverClientConfig {
    pub fn new(app_token: String) -> Self {
        Self {
            app_token,
            request_timeout: Duration::from_secs(10),
            max_retries: 3,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PushoverResponse {
    status: i32,
}

/// Pushover API client
#[derive(Clone)]
pub struct PushoverClient {
    client: Client,
    config: PushoverClientConfig,
}

impl PushoverClient {
    pub fn new(config: PushoverClientConfig) -> Self {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self { client, config }
    }
}

#[async_trait]
impl PushSender for PushoverClient {
    async fn send(&self, user_key: &str, title: &str, body: &str) -> Result<bool, NotifyError> {
        let payload = [
            ("token", self.config.app_token.as_str()),
            ("user", user_key),
            ("title", title),
            ("message", body),
            ("priority", "0"),
        ];

        for attempt in 1..=self.config.max_retries {
            let response = match self
                .client
                .post(PUSHOVER_API_URL)
                .form(&payload)
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) if e.is_timeout() => {
                    let wait = retry_delay(attempt);
                    warn!(
                        "[Pushover] Timeout on attempt {}/{} - retrying in {:?}",
                        attempt, self.config.max_retries, wait
                    );
                    tokio::time::sleep(wait).await;
                    continue;
                }
                Err(e) => return Err(NotifyError::Network(e.to_string())),
            };

            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                let wait = Duration::from_secs(retry_after_secs(&response));
                warn!("[Pushover] Rate limited (429) - retrying in {:?}", wait);
                tokio::time::sleep(wait).await;
                continue;
            }

            if status.is_server_error() {
                let wait = retry_delay(attempt);
                warn!(
                    "[Pushover] Server error {} on attempt {}/{} - retrying in {:?}",
                    status, attempt, self.config.max_retries, wait
                );
                tokio::time::sleep(wait).await;
                continue;
            }

            if !status.is_success() {
                // Bad user key or payload; not retryable, delivery unconfirmed
                let body = response.text().await.unwrap_or_default();
                warn!("[Pushover] API error {}: {}", status, body);
                return Ok(false);
            }

            let parsed: PushoverResponse = response
                .json()
                .await
                .map_err(|e| NotifyError::Schema(e.to_string()))?;
            return Ok(parsed.status == 1);
        }

        warn!(
            "[Pushover] Giving up after {} attempts",
            self.config.max_retries
        );
        Ok(false)
    }
}

impl std::fmt::Debug for PushoverClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushoverClient")
            .field("app_token", &"[REDACTED]")
            .field("max_retries", &self.config.max_retries)
            .finish()
    }
}

fn retry_delay(attempt: u32) -> Duration {
    Duration::from_secs(2u64.saturating_pow(attempt).min(MAX_RETRY_DELAY_SECS))
}

fn retry_after_secs(response: &reqwest::Response) -> u64 {
    response
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
}
