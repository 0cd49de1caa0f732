//! Periodic trade report
//!
//! On each timer tick, summarizes buy/sell volume over a trailing window the
//! length of the reporting interval and posts one message to the broadcast
//! channel. An empty window posts nothing. Volumes accumulate in `Decimal`,
//! and the per-market breakdown is ordered ascending by market id so the
//! output is deterministic.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, info, warn};

use tracker_core::{NormalizedTrade, TradeSide};
use tracker_notify::BroadcastChannel;

use crate::format::format_usd;
use crate::trade_window::{TradeWindowError, TradeWindowStore};

/// Configuration for the reporter
#[derive(Debug, Clone)]
pub struct ReporterConfig {
    /// Reporting interval; also the length of the trailing window
    pub interval: Duration,
    /// The tracked account
    pub account_id: String,
}

impl ReporterConfig {
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            interval: Duration::from_secs(5 * 60),
            account_id: account_id.into(),
        }
    }
}

/// Per-market buy/sell volume
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarketVolume {
    pub buy_count: u64,
    pub sell_count: u64,
    pub buy_volume: Decimal,
    pub sell_volume: Decimal,
}

/// Aggregated volume over a report window; derived fresh on every tick,
/// never persisted
#[derive(Debug, Clone, Default)]
pub struct AggregateReport {
    /// BTreeMap keeps the breakdown ascending by market id
    pub markets: BTreeMap<String, MarketVolume>,
    pub total_buy_volume: Decimal,
    pub total_sell_volume: Decimal,
    pub buy_count: u64,
    pub sell_count: u64,
}

impl AggregateReport {
    /// Aggregate a window of trades; unknown-side trades are excluded from
    /// the buy/sell numbers
    pub fn from_trades(trades: &[NormalizedTrade]) -> Self {
        let mut report = AggregateReport::default();

        for trade in trades {
            let stats = report.markets.entry(trade.market_id.clone()).or_default();
            match trade.side {
                TradeSide::Buy => {
                    stats.buy_count += 1;
                    stats.buy_volume += trade.usd_notional;
                    report.buy_count += 1;
                    report.total_buy_volume += trade.usd_notional;
                }
                TradeSide::Sell => {
                    stats.sell_count += 1;
                    stats.sell_volume += trade.usd_notional;
                    report.sell_count += 1;
                    report.total_sell_volume += trade.usd_notional;
                }
                TradeSide::Unknown => {}
            }
        }

        report
    }
}

/// Background service posting periodic volume reports
pub struct TradeReporter {
    window: Arc<TradeWindowStore>,
    broadcast: Arc<dyn BroadcastChannel>,
    config: ReporterConfig,
}

impl TradeReporter {
    /// Create a new reporter with an injected broadcast handle
    pub fn new(
        window: Arc<TradeWindowStore>,
        broadcast: Arc<dyn BroadcastChannel>,
        config: ReporterConfig,
    ) -> Self {
        Self {
            window,
            broadcast,
            config,
        }
    }

    /// Run the report loop until shutdown
    pub async fn start(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            "[Reporter] Starting with {:?} report interval",
            self.config.interval
        );

        let mut ticker = interval(self.config.interval);
        // The first tick completes immediately; consume it so the first
        // report covers a full interval
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("[Reporter] Shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        warn!("[Reporter] Report cycle failed: {}", e);
                    }
                }
            }
        }
    }

    /// Produce one report if the trailing window is non-empty
    ///
    /// Returns whether a report was emitted.
    pub async fn run_once(&self) -> Result<bool, TradeWindowError> {
        let now = Utc::now();
        let window_start = now.timestamp() - self.config.interval.as_secs() as i64;
        let trades = self.window.range_since(&self.config.account_id, window_start)?;

        if trades.is_empty() {
            debug!("[Reporter] No trades in window - skipping report");
            return Ok(false);
        }

        let report = AggregateReport::from_trades(&trades);
        let text = self.format_report(&report, now);

        // Report loss is acceptable; broadcast sends are never retried
        match self.broadcast.send_message(&text).await {
            Ok(()) => info!(
                "[Reporter] Posted report covering {} trades",
                trades.len()
            ),
            Err(e) => warn!("[Reporter] Failed to post report: {}", e),
        }

        Ok(true)
    }

    fn format_report(&self, report: &AggregateReport, now: DateTime<Utc>) -> String {
        let mut lines = vec![
            format!(
                "🐋 <b>Lighter Whale Report</b>  <i>{}</i>",
                now.format("%H:%M UTC")
            ),
            format!("Account: <code>{}</code>", self.config.account_id),
            format!(
                "Window: last {} min",
                self.config.interval.as_secs() / 60
            ),
            String::new(),
            format!(
                "📈 <b>Total BUY  volume:</b>  ${}",
                format_usd(&report.total_buy_volume)
            ),
            format!(
                "📉 <b>Total SELL volume:</b>  ${}",
                format_usd(&report.total_sell_volume)
            ),
        ];

        if report.markets.len() > 1 {
            lines.push(String::new());
            lines.push("<b>Per-market breakdown:</b>".to_string());
            for (market, stats) in &report.markets {
                lines.push(format!(
                    "  Market {}: ↑{} (${})  ↓{} (${})",
                    market,
                    stats.buy_count,
                    format_usd(&stats.buy_volume),
                    stats.sell_count,
                    format_usd(&stats.sell_volume),
                ));
            }
        }

        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;
    use tracker_notify::NotifyError;

    fn trade(id: &str, ts: i64, market: &str, side: TradeSide, usd: Decimal) -> NormalizedTrade {
        NormalizedTrade {
            external_id: id.to_string(),
            market_id: market.to_string(),
            timestamp: DateTime::from_timestamp(ts, 0).unwrap(),
            side,
            usd_notional: usd,
            price: Decimal::ZERO,
            size: Decimal::ZERO,
        }
    }

    #[derive(Default)]
    struct RecordingBroadcast {
        messages: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl BroadcastChannel for RecordingBroadcast {
        async fn send_message(&self, text: &str) -> Result<(), NotifyError> {
            self.messages.lock().push(text.to_string());
            Ok(())
        }
    }

    #[test]
    fn test_aggregate_report_scenario() {
        // Window [0, 300): Buy $100, Sell $50, Sell $25 on market M1
        let trades = vec![
            trade("t1", 10, "M1", TradeSide::Buy, dec!(100)),
            trade("t2", 20, "M1", TradeSide::Sell, dec!(50)),
            trade("t3", 30, "M1", TradeSide::Sell, dec!(25)),
        ];

        let report = AggregateReport::from_trades(&trades);
        assert_eq!(report.total_buy_volume, dec!(100));
        assert_eq!(report.total_sell_volume, dec!(75));

        let m1 = &report.markets["M1"];
        assert_eq!(m1.buy_count, 1);
        assert_eq!(m1.buy_volume, dec!(100));
        assert_eq!(m1.sell_count, 2);
        assert_eq!(m1.sell_volume, dec!(75));
    }

    #[test]
    fn test_aggregate_excludes_unknown_side_from_totals() {
        let trades = vec![
            trade("t1", 10, "M1", TradeSide::Buy, dec!(100)),
            trade("t2", 20, "M1", TradeSide::Unknown, dec!(999)),
        ];

        let report = AggregateReport::from_trades(&trades);
        assert_eq!(report.total_buy_volume, dec!(100));
        assert_eq!(report.total_sell_volume, Decimal::ZERO);
    }

    #[test]
    fn test_aggregate_markets_are_sorted_ascending() {
        let trades = vec![
            trade("t1", 10, "9", TradeSide::Buy, dec!(1)),
            trade("t2", 20, "132", TradeSide::Buy, dec!(2)),
            trade("t3", 30, "12", TradeSide::Buy, dec!(3)),
        ];

        let report = AggregateReport::from_trades(&trades);
        let markets: Vec<&String> = report.markets.keys().collect();
        assert_eq!(markets, vec!["12", "132", "9"]);
    }

    #[tokio::test]
    async fn test_empty_window_emits_nothing() {
        let window = Arc::new(TradeWindowStore::new_in_memory().unwrap());
        let broadcast = Arc::new(RecordingBroadcast::default());
        let reporter = TradeReporter::new(
            window,
            Arc::clone(&broadcast) as Arc<dyn BroadcastChannel>,
            ReporterConfig::new("714638"),
        );

        assert!(!reporter.run_once().await.unwrap());
        assert!(broadcast.messages.lock().is_empty());
    }

    #[tokio::test]
    async fn test_report_is_emitted_once_with_expected_numbers() {
        let window = Arc::new(TradeWindowStore::new_in_memory().unwrap());
        let broadcast = Arc::new(RecordingBroadcast::default());

        let now = Utc::now().timestamp();
        window
            .insert_all(
                "714638",
                &[
                    trade("t1", now - 60, "M1", TradeSide::Buy, dec!(100)),
                    trade("t2", now - 50, "M1", TradeSide::Sell, dec!(50)),
                    trade("t3", now - 40, "M1", TradeSide::Sell, dec!(25)),
                ],
            )
            .unwrap();

        let reporter = TradeReporter::new(
            window,
            Arc::clone(&broadcast) as Arc<dyn BroadcastChannel>,
            ReporterConfig::new("714638"),
        );

        assert!(reporter.run_once().await.unwrap());
        let messages = broadcast.messages.lock();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("Total BUY  volume:</b>  $100.00"));
        assert!(messages[0].contains("Total SELL volume:</b>  $75.00"));
        // Single market: no per-market breakdown
        assert!(!messages[0].contains("Per-market breakdown"));
    }

    #[tokio::test]
    async fn test_multi_market_breakdown_is_listed() {
        let window = Arc::new(TradeWindowStore::new_in_memory().unwrap());
        let broadcast = Arc::new(RecordingBroadcast::default());

        let now = Utc::now().timestamp();
        window
            .insert_all(
                "714638",
                &[
                    trade("t1", now - 60, "A", TradeSide::Buy, dec!(10)),
                    trade("t2", now - 50, "B", TradeSide::Sell, dec!(20)),
                ],
            )
            .unwrap();

        let reporter = TradeReporter::new(
            window,
            Arc::clone(&broadcast) as Arc<dyn BroadcastChannel>,
            ReporterConfig::new("714638"),
        );

        assert!(reporter.run_once().await.unwrap());
        let messages = broadcast.messages.lock();
        let report = &messages[0];
        assert!(report.contains("Per-market breakdown"));
        let a_pos = report.find("Market A:").unwrap();
        let b_pos = report.find("Market B:").unwrap();
        assert!(a_pos < b_pos);
    }
}
