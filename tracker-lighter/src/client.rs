//! Lighter aggregator HTTP client
//!
//! Poll-based trade source: queries a trailing window of the tracked
//! account's trades on a fixed schedule. Rate limits honor the server's
//! `Retry-After`; transient server errors and timeouts retry with capped
//! exponential backoff. A schema failure aborts the fetch with a typed error
//! so the caller can drop the batch without advancing the watermark.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{header, Client, StatusCode};
use tracing::{debug, warn};

use crate::types::{RawPolledTrade, TradesResponse};

/// Default base URL for the aggregator API
pub const LIGHTER_API_BASE: &str = "https://lightalytics.com/api/v1";

/// Default delay when a 429 response carries no Retry-After header
const DEFAULT_RETRY_AFTER_SECS: u64 = 2;

/// Cap on the per-attempt retry delay
const MAX_RETRY_DELAY_SECS: u64 = 10;

/// Configuration for LighterHttpClient
#[derive(Debug, Clone)]
pub struct LighterHttpClientConfig {
    pub base_url: String,
    /// The tracked account
    pub account_id: i64,
    /// Maximum number of trades per request
    pub poll_limit: u32,
    pub request_timeout: Duration,
    pub max_retries: u32,
}

impl LighterHttpClientConfig {
    pub fn new(account_id: i64) -> Self {
        Self {
            base_url: LIGHTER_API_BASE.to_string(),
            account_id,
            poll_limit: 500,
            request_timeout: Duration::from_secs(15),
            max_retries: 3,
        }
    }
}

/// Errors from the poll API
#[derive(Debug, thiserror::Error)]
pub enum LighterApiError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Giving up after {0} attempts")]
    Exhausted(u32),
}

/// Lighter aggregator API client
#[derive(Debug, Clone)]
pub struct LighterHttpClient {
    client: Client,
    config: LighterHttpClientConfig,
}

impl LighterHttpClient {
    /// Create a new client
    pub fn new(config: LighterHttpClientConfig) -> Self {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self { client, config }
    }

    /// Fetch the tracked account's trades in `[from, to]`
    pub async fn fetch_trades(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<RawPolledTrade>, LighterApiError> {
        let url = format!(
            "{}/accounts/{}/trades",
            self.config.base_url, self.config.account_id
        );
        let params = [
            ("limit", self.config.poll_limit.to_string()),
            ("from", from.to_rfc3339_opts(SecondsFormat::Secs, true)),
            ("to", to.to_rfc3339_opts(SecondsFormat::Secs, true)),
        ];

        for attempt in 1..=self.config.max_retries {
            debug!(
                "[Lighter API] Fetching trades {} to {} (attempt {}/{})",
                params[1].1, params[2].1, attempt, self.config.max_retries
            );

            let response = match self.client.get(&url).query(&params).send().await {
                Ok(response) => response,
                Err(e) if e.is_timeout() => {
                    let wait = retry_delay(attempt);
                    warn!(
                        "[Lighter API] Request timeout on attempt {}/{} - retrying in {:?}",
                        attempt, self.config.max_retries, wait
                    );
                    tokio::time::sleep(wait).await;
                    continue;
                }
                Err(e) => return Err(LighterApiError::Network(e.to_string())),
            };

            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                let wait = Duration::from_secs(retry_after_secs(&response));
                warn!(
                    "[Lighter API] Rate limited (429) - retrying in {:?}",
                    wait
                );
                tokio::time::sleep(wait).await;
                continue;
            }

            if status.is_server_error() {
                let wait = retry_delay(attempt);
                warn!(
                    "[Lighter API] Server error {} on attempt {}/{} - retrying in {:?}",
                    status, attempt, self.config.max_retries, wait
                );
                tokio::time::sleep(wait).await;
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(LighterApiError::Api {
                    status: status.as_u16(),
                    body,
                });
            }

            return match response.json::<TradesResponse>().await {
                Ok(parsed) => Ok(parsed.trades),
                Err(e) => Err(LighterApiError::Schema(e.to_string())),
            };
        }

        Err(LighterApiError::Exhausted(self.config.max_retries))
    }
}

/// Capped exponential delay: min(2^attempt, 10) seconds
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
