//! Watermark-based trade deduplication
//!
//! The watermark is the timestamp boundary below which all trades are
//! considered already processed. It is keyed per account in SQLite, loaded
//! once at startup, and advanced only after a batch has been fully handed to
//! downstream consumers. If persistence fails the in-memory value stays put,
//! so the same trades are re-delivered on the next cycle — safe, because the
//! window store and cooldown gate are idempotent per notification key.

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use tracker_core::NormalizedTrade;

/// Durable store for per-account watermarks
pub struct WatermarkStore {
    conn: Mutex<Connection>,
}

impl WatermarkStore {
    /// Open (or create) the watermark database
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, WatermarkError> {
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                WatermarkError::Io(format!("Failed to create database directory: {}", e))
            })?;
        }

        let conn = Connection::open(db_path).map_err(WatermarkError::Database)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (useful for testing)
    pub fn new_in_memory() -> Result<Self, WatermarkError> {
        let conn = Connection::open_in_memory().map_err(WatermarkError::Database)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), WatermarkError> {
        let conn = self.conn.lock().map_err(|_| WatermarkError::LockError)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS watermarks (
                account_id TEXT PRIMARY KEY,
                last_ts INTEGER NOT NULL
            );
            "#,
        )
        .map_err(WatermarkError::Database)?;
        Ok(())
    }

    /// Load the persisted watermark for an account
    pub fn load(&self, account_id: &str) -> Result<Option<i64>, WatermarkError> {
        let conn = self.conn.lock().map_err(|_| WatermarkError::LockError)?;
        let value = conn
            .query_row(
                "SELECT last_ts FROM watermarks WHERE account_id = ?1",
                params![account_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(WatermarkError::Database)?;
        Ok(value)
    }

    /// Persist the watermark; the stored value never moves backwards
    pub fn save(&self, account_id: &str, last_ts: i64) -> Result<(), WatermarkError> {
        let conn = self.conn.lock().map_err(|_| WatermarkError::LockError)?;
        conn.execute(
            r#"
            INSERT INTO watermarks (account_id, last_ts)
            VALUES (?1, ?2)
            ON CONFLICT(account_id) DO UPDATE SET last_ts = MAX(last_ts, excluded.last_ts)
            "#,
            params![account_id, last_ts],
        )
        .map_err(WatermarkError::Database)?;
        Ok(())
    }
}

/// Filters the normalized stream to only-new trades and owns watermark
/// advancement (single writer)
pub struct WatermarkTracker {
    store: Arc<WatermarkStore>,
    account_id: String,
    current: parking_lot::Mutex<Option<i64>>,
}

impl WatermarkTracker {
    /// Create a tracker, resuming from the persisted watermark
    pub fn new(
        store: Arc<WatermarkStore>,
        account_id: impl Into<String>,
    ) -> Result<Self, WatermarkError> {
        let account_id = account_id.into();
        let current = store.load(&account_id)?;
        debug!(
            "[Watermark] Resuming account {} from {:?}",
            account_id, current
        );
        Ok(Self {
            store,
            account_id,
            current: parking_lot::Mutex::new(current),
        })
    }

    /// The current in-memory watermark (unix seconds)
    pub fn current(&self) -> Option<i64> {
        *self.current.lock()
    }

    /// Filter a batch down to trades strictly newer than the watermark
    ///
    /// Returns the survivors sorted ascending by `(timestamp, external_id)`;
    /// duplicate external ids within the batch collapse to one entry.
    pub fn admit(&self, batch: Vec<NormalizedTrade>) -> Vec<NormalizedTrade> {
        let watermark = *self.current.lock();

        let mut fresh: Vec<NormalizedTrade> = batch
            .into_iter()
            .filter(|t| watermark.map_or(true, |w| t.unix_ts() > w))
            .collect();

        fresh.sort_by(|a, b| {
            a.unix_ts()
                .cmp(&b.unix_ts())
                .then_with(|| a.external_id.cmp(&b.external_id))
        });
        fresh.dedup_by(|a, b| a.external_id == b.external_id);
        fresh
    }

    /// Persist and then advance the in-memory watermark
    ///
    /// An older (or equal) value is a no-op: re-delivery after a failed cycle
    /// is an expected path, not an error. If persistence fails the in-memory
    /// value does not move.
    pub fn advance(&self, to: i64) -> Result<(), WatermarkError> {
        let mut current = self.current.lock();
        if current.is_some_and(|w| to <= w) {
            return Ok(());
        }
        self.store.save(&self.account_id, to)?;
        *current = Some(to);
        debug!("[Watermark] Advanced account {} to {}", self.account_id, to);
        Ok(())
    }
}

/// Errors from watermark persistence
#[derive(Debug, thiserror::Error)]
pub enum WatermarkError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Failed to acquire lock")]
    LockError,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use tracker_core::TradeSide;

    fn trade(id: &str, ts: i64, side: TradeSide) -> NormalizedTrade {
        NormalizedTrade {
            external_id: id.to_string(),
            market_id: "132".to_string(),
            timestamp: DateTime::from_timestamp(ts, 0).unwrap(),
            side,
            usd_notional: dec!(100),
            price: Decimal::ZERO,
            size: Decimal::ZERO,
        }
    }

    #[test]
    fn test_admit_keeps_everything_without_watermark() {
        let store = Arc::new(WatermarkStore::new_in_memory().unwrap());
        let tracker = WatermarkTracker::new(store, "714638").unwrap();

        let fresh = tracker.admit(vec![
            trade("b", 200, TradeSide::Buy),
            trade("a", 100, TradeSide::Sell),
        ]);
        assert_eq!(fresh.len(), 2);
        // Sorted ascending by timestamp
        assert_eq!(fresh[0].external_id, "a");
        assert_eq!(fresh[1].external_id, "b");
    }

    #[test]
    fn test_admit_filters_strictly_newer_only() {
        let store = Arc::new(WatermarkStore::new_in_memory().unwrap());
        let tracker = WatermarkTracker::new(store, "714638").unwrap();
        tracker.advance(100).unwrap();

        let fresh = tracker.admit(vec![
            trade("old", 99, TradeSide::Sell),
            trade("boundary", 100, TradeSide::Sell),
            trade("new", 101, TradeSide::Sell),
        ]);
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].external_id, "new");
    }

    #[test]
    fn test_admit_orders_timestamp_ties_by_external_id() {
        let store = Arc::new(WatermarkStore::new_in_memory().unwrap());
        let tracker = WatermarkTracker::new(store, "714638").unwrap();

        let fresh = tracker.admit(vec![
            trade("t2", 100, TradeSide::Sell),
            trade("t1", 100, TradeSide::Sell),
        ]);
        assert_eq!(fresh.len(), 2);
        assert_eq!(fresh[0].external_id, "t1");
        assert_eq!(fresh[1].external_id, "t2");
    }

    #[test]
    fn test_admit_collapses_duplicate_external_ids() {
        let store = Arc::new(WatermarkStore::new_in_memory().unwrap());
        let tracker = WatermarkTracker::new(store, "714638").unwrap();

        let fresh = tracker.admit(vec![
            trade("dup", 100, TradeSide::Sell),
            trade("dup", 100, TradeSide::Sell),
        ]);
        assert_eq!(fresh.len(), 1);
    }

    #[test]
    fn test_advance_persists_and_resumes() {
        let store = Arc::new(WatermarkStore::new_in_memory().unwrap());
        let tracker = WatermarkTracker::new(Arc::clone(&store), "714638").unwrap();
        tracker.advance(500).unwrap();

        // A new tracker over the same store resumes where we left off
        let resumed = WatermarkTracker::new(store, "714638").unwrap();
        assert_eq!(resumed.current(), Some(500));
        assert!(resumed.admit(vec![trade("x", 500, TradeSide::Sell)]).is_empty());
    }

    #[test]
    fn test_advance_never_moves_backwards() {
        let store = Arc::new(WatermarkStore::new_in_memory().unwrap());
        let tracker = WatermarkTracker::new(Arc::clone(&store), "714638").unwrap();
        tracker.advance(500).unwrap();
        tracker.advance(300).unwrap();
        assert_eq!(tracker.current(), Some(500));
        assert_eq!(store.load("714638").unwrap(), Some(500));
    }

    #[test]
    fn test_watermarks_are_keyed_per_account() {
        let store = Arc::new(WatermarkStore::new_in_memory().unwrap());
        let a = WatermarkTracker::new(Arc::clone(&store), "a").unwrap();
        let b = WatermarkTracker::new(Arc::clone(&store), "b").unwrap();
        a.advance(100).unwrap();
        assert_eq!(b.current(), None);
        assert_eq!(store.load("a").unwrap(), Some(100));
        assert_eq!(store.load("b").unwrap(), None);
    }

    #[test]
    fn test_double_admit_after_advance_is_empty() {
        let store = Arc::new(WatermarkStore::new_in_memory().unwrap());
        let tracker = WatermarkTracker::new(store, "714638").unwrap();

        let batch = vec![trade("a", 100, TradeSide::Sell), trade("b", 101, TradeSide::Sell)];
        let fresh = tracker.admit(batch.clone());
        assert_eq!(fresh.len(), 2);
        tracker.advance(fresh.last().unwrap().unix_ts()).unwrap();

        assert!(tracker.admit(batch).is_empty());
    }
}
