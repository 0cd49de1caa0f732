//! Poll-based trade monitor
//!
//! One combined tick does everything the stream path splits across tasks:
//! fetch a trailing window, normalize, admit, dispatch sells, post a batch
//! summary, advance the watermark. At most one cycle runs at a time — an
//! overlapping tick is skipped outright via a non-blocking try-acquire, never
//! queued, so backlog stays bounded and watermark writes stay ordered.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use rust_decimal::Decimal;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use tracker_core::{NormalizedTrade, TradeSide};
use tracker_lighter::{LighterApiError, LighterHttpClient, RawPolledTrade};
use tracker_notify::BroadcastChannel;

use crate::dispatcher::{DispatchError, NotificationDispatcher};
use crate::format::format_usd;
use crate::watermark::{WatermarkError, WatermarkTracker};

/// The trade source contract the monitor polls against
#[async_trait]
pub trait TradeFetcher: Send + Sync {
    async fn fetch_trades(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<RawPolledTrade>, LighterApiError>;
}

#[async_trait]
impl TradeFetcher for LighterHttpClient {
    async fn fetch_trades(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<RawPolledTrade>, LighterApiError> {
        LighterHttpClient::fetch_trades(self, from, to).await
    }
}

/// Configuration for the monitor
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// The tracked account
    pub account_id: String,
    /// How often to poll
    pub poll_interval: Duration,
    /// Length of the trailing window each poll queries
    pub poll_window: Duration,
}

impl MonitorConfig {
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            poll_interval: Duration::from_secs(5 * 60),
            poll_window: Duration::from_secs(5 * 60),
        }
    }
}

/// What a single tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorOutcome {
    /// A previous cycle was still running; this tick was skipped entirely
    Skipped,
    /// Nothing new to process (empty fetch, dedup, or dropped batch)
    Idle,
    /// Fresh trades were processed and the watermark advanced
    Processed { admitted: usize, sells: usize },
}

/// Poll-driven monitor combining ingestion and per-batch summary
pub struct TradeMonitor {
    client: Arc<dyn TradeFetcher>,
    watermark: Arc<WatermarkTracker>,
    dispatcher: Arc<NotificationDispatcher>,
    broadcast: Arc<dyn BroadcastChannel>,
    config: MonitorConfig,
    /// Cycle overlap guard; try-acquired at the start of every tick
    cycle_lock: tokio::sync::Mutex<()>,
}

impl TradeMonitor {
    pub fn new(
        client: Arc<dyn TradeFetcher>,
        watermark: Arc<WatermarkTracker>,
        dispatcher: Arc<NotificationDispatcher>,
        broadcast: Arc<dyn BroadcastChannel>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            client,
            watermark,
            dispatcher,
            broadcast,
            config,
            cycle_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Run the poll loop until shutdown
    pub async fn start(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            "[Monitor] Starting with {:?} poll interval",
            self.config.poll_interval
        );

        let mut ticker = interval(self.config.poll_interval);
        // A late tick is dropped, not replayed in a burst
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("[Monitor] Shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    match self.run_once().await {
                        Ok(MonitorOutcome::Processed { admitted, sells }) => {
                            info!("[Monitor] Processed {} new trades ({} sells)", admitted, sells);
                        }
                        Ok(_) => {}
                        Err(e) => warn!("[Monitor] Poll cycle failed: {}", e),
                    }
                }
            }
        }
    }

    /// Run one poll cycle; skips entirely if a previous cycle is in flight
    pub async fn run_once(&self) -> Result<MonitorOutcome, MonitorError> {
        let Ok(_guard) = self.cycle_lock.try_lock() else {
            warn!("[Monitor] Previous poll still running - skipping overlapping tick");
            return Ok(MonitorOutcome::Skipped);
        };

        let now = Utc::now();
        // Align the window end to the minute so consecutive polls tile
        let window_end = now - TimeDelta::seconds(now.timestamp().rem_euclid(60));
        let window_start = window_end
            - TimeDelta::seconds(self.config.poll_window.as_secs() as i64);

        debug!(
            "[Monitor] Polling trades from {} to {}",
            window_start, window_end
        );

        let raw = match self.client.fetch_trades(window_start, window_end).await {
            Ok(raw) => raw,
            Err(LighterApiError::Schema(e)) => {
                // Drop the batch; the watermark stays put and the next tick
                // re-covers this window
                warn!("[Monitor] Invalid API payload - dropping batch: {}", e);
                return Ok(MonitorOutcome::Idle);
            }
            Err(e) => {
                warn!("[Monitor] Fetch failed: {}", e);
                return Ok(MonitorOutcome::Idle);
            }
        };

        if raw.is_empty() {
            return Ok(MonitorOutcome::Idle);
        }

        let received_at = Utc::now();
        let batch: Vec<NormalizedTrade> =
            raw.iter().map(|r| r.normalize(received_at)).collect();

        let fresh = self.watermark.admit(batch);
        if fresh.is_empty() {
            debug!("[Monitor] No new trades after deduplication");
            return Ok(MonitorOutcome::Idle);
        }

        let mut total_buy = Decimal::ZERO;
        let mut total_sell = Decimal::ZERO;
        let mut sells = 0;

        for trade in &fresh {
            match trade.side {
                TradeSide::Buy => total_buy += trade.usd_notional,
                TradeSide::Sell => {
                    total_sell += trade.usd_notional;
                    self.dispatcher.dispatch_sell(trade).await?;
                    sells += 1;
                }
                TradeSide::Unknown => {}
            }
        }

        if total_buy > Decimal::ZERO || total_sell > Decimal::ZERO {
            let summary = format!(
                "Total Buy: ${}, Total Sell: ${}",
                format_usd(&total_buy),
                format_usd(&total_sell)
            );
            if let Err(e) = self.broadcast.send_message(&summary).await {
                warn!("[Monitor] Failed to post batch summary: {}", e);
            }
        }

        // `fresh` is sorted ascending; advance to the newest processed trade
        let latest = fresh.last().map(|t| t.unix_ts()).unwrap_or_default();
        self.watermark.advance(latest)?;

        Ok(MonitorOutcome::Processed {
            admitted: fresh.len(),
            sells,
        })
    }
}

/// Errors from the poll cycle
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("Watermark error: {0}")]
    Watermark(#[from] WatermarkError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}
