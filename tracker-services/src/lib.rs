//! Engine services for the Lighter Whale Tracker
//!
//! This crate turns the raw trade feed into rate-limited, idempotent
//! notifications and periodic volume reports: watermark-based dedup, a
//! bounded recent-trade window, the cooldown-gated dispatcher, and the
//! aggregating reporter, plus the two ingestion drivers (stream ingestor and
//! poll monitor).

pub mod dispatcher;
pub mod ingest;
pub mod monitor;
pub mod reporter;
pub mod subscribers;
pub mod trade_window;
pub mod watermark;

mod format;

pub use dispatcher::{DispatchError, DispatcherConfig, NotificationDispatcher};
pub use ingest::{IngestConfig, IngestError, IngestSummary, TradeIngestor};
pub use monitor::{MonitorConfig, MonitorError, MonitorOutcome, TradeFetcher, TradeMonitor};
pub use reporter::{AggregateReport, MarketVolume, ReporterConfig, TradeReporter};
pub use subscribers::{Subscriber, SubscriberStore, SubscriberStoreError};
pub use trade_window::{TradeWindowError, TradeWindowStore};
pub use watermark::{WatermarkError, WatermarkStore, WatermarkTracker};
