//! Stream ingestion pipeline
//!
//! Consumes normalized trade batches from the Lighter stream and drives one
//! cycle per batch: watermark admit → window insert → purge → sell dispatch
//! → watermark advance. Cycles run strictly one at a time (the receiver loop
//! is sequential), and a cycle that fails before the advance leaves the
//! watermark untouched so the batch is re-delivered; the window key keeps
//! the re-delivery from alerting twice.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use tracker_core::NormalizedTrade;
use tracker_lighter::LighterUpdate;

use crate::dispatcher::{DispatchError, NotificationDispatcher};
use crate::trade_window::{TradeWindowError, TradeWindowStore};
use crate::watermark::{WatermarkError, WatermarkTracker};

/// Configuration for the ingestor
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// The tracked account
    pub account_id: String,
    /// Window retention horizon; must cover the reporting interval plus a
    /// tick of slack so purges never race the reporter
    pub retention: Duration,
}

impl IngestConfig {
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            retention: Duration::from_secs(360),
        }
    }
}

/// Result of one ingestion cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    /// Trades that survived the watermark filter
    pub admitted: usize,
    /// Trades newly added to the window
    pub inserted: usize,
    /// Sell alerts dispatched
    pub sells_dispatched: usize,
    /// Window entries removed by the post-insert purge
    pub purged: usize,
}

/// Push-based ingestion pipeline
pub struct TradeIngestor {
    watermark: Arc<WatermarkTracker>,
    window: Arc<TradeWindowStore>,
    dispatcher: Arc<NotificationDispatcher>,
    config: IngestConfig,
}

impl TradeIngestor {
    pub fn new(
        watermark: Arc<WatermarkTracker>,
        window: Arc<TradeWindowStore>,
        dispatcher: Arc<NotificationDispatcher>,
        config: IngestConfig,
    ) -> Self {
        Self {
            watermark,
            window,
            dispatcher,
            config,
        }
    }

    /// Consume stream updates until the channel closes or shutdown
    pub async fn start(
        self: Arc<Self>,
        mut rx: broadcast::Receiver<LighterUpdate>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(
            "[Ingestor] Starting for account {} (retention {:?})",
            self.config.account_id, self.config.retention
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("[Ingestor] Shutdown requested");
                    break;
                }
                update = rx.recv() => match update {
                    Ok(LighterUpdate::TradeBatch { trades }) => {
                        match self.process_batch(trades).await {
                            Ok(summary) if summary.admitted > 0 => {
                                debug!(
                                    "[Ingestor] Processed {} trades ({} sells dispatched, {} purged)",
                                    summary.admitted, summary.sells_dispatched, summary.purged
                                );
                            }
                            Ok(_) => {}
                            Err(e) => {
                                // Watermark untouched; the batch comes back
                                // on the next delivery
                                warn!("[Ingestor] Cycle failed: {}", e);
                            }
                        }
                    }
                    Ok(LighterUpdate::ConnectionState { connected, error }) => {
                        if connected {
                            info!("[Ingestor] Stream connected");
                        } else {
                            warn!("[Ingestor] Stream disconnected: {:?}", error);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("[Ingestor] Update receiver lagged {} messages", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("[Ingestor] Update channel closed");
                        break;
                    }
                }
            }
        }
    }

    /// Run one ingestion cycle over a normalized batch
    pub async fn process_batch(
        &self,
        batch: Vec<NormalizedTrade>,
    ) -> Result<IngestSummary, IngestError> {
        let fresh = self.watermark.admit(batch);
        if fresh.is_empty() {
            return Ok(IngestSummary::default());
        }

        let inserted = self.window.insert_all(&self.config.account_id, &fresh)?;

        // Purge after every insert batch so the window stays bounded even
        // under bursty volume
        let cutoff = Utc::now().timestamp() - self.config.retention.as_secs() as i64;
        let purged = self.window.purge_before(&self.config.account_id, cutoff)?;

        // Only trades the window actually accepted may alert: re-delivered
        // duplicates are filtered here
        let mut sells_dispatched = 0;
        for trade in fresh
            .iter()
            .filter(|t| t.is_sell() && inserted.contains(&t.external_id))
        {
            self.dispatcher.dispatch_sell(trade).await?;
            sells_dispatched += 1;
        }

        // The batch is fully handed downstream; advance the watermark.
        // `fresh` is sorted ascending, so the last entry holds the max.
        let latest = fresh.last().map(|t| t.unix_ts()).unwrap_or_default();
        self.watermark.advance(latest)?;

        Ok(IngestSummary {
            admitted: fresh.len(),
            inserted: inserted.len(),
            sells_dispatched,
            purged,
        })
    }
}

/// Errors from the ingestion cycle
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Watermark error: {0}")]
    Watermark(#[from] WatermarkError),

    #[error("Window error: {0}")]
    Window(#[from] TradeWindowError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}
