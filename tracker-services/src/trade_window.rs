//! Recent-trade window storage
//!
//! A bounded, time-scored index of normalized trades keyed by external id,
//! read by the reporter independently of ingestion ticks. Membership is
//! idempotent (re-inserting an existing key is a no-op) and each insert batch
//! commits in one transaction, so the reporter never observes a partial
//! batch. Callers purge after every insert so storage stays bounded even
//! under bursty volume.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use rust_decimal::Decimal;

use tracker_core::{NormalizedTrade, TradeSide};

/// Trade window storage using SQLite
pub struct TradeWindowStore {
    conn: Mutex<Connection>,
}

impl TradeWindowStore {
    /// Create a new TradeWindowStore instance
    ///
    /// Creates the database file and tables if they don't exist.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, TradeWindowError> {
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                TradeWindowError::Io(format!("Failed to create database directory: {}", e))
            })?;
        }

        let conn = Connection::open(db_path).map_err(TradeWindowError::Database)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory TradeWindowStore (useful for testing)
    pub fn new_in_memory() -> Result<Self, TradeWindowError> {
        let conn = Connection::open_in_memory().map_err(TradeWindowError::Database)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), TradeWindowError> {
        let conn = self.conn.lock().map_err(|_| TradeWindowError::LockError)?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS window_trades (
                external_id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL,
                market_id TEXT NOT NULL,
                ts INTEGER NOT NULL,
                side TEXT NOT NULL,
                usd TEXT NOT NULL,
                price TEXT NOT NULL,
                size TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_window_trades_ts
            ON window_trades(account_id, ts);
            "#,
        )
        .map_err(TradeWindowError::Database)?;

        Ok(())
    }

    /// Idempotently insert a batch; returns the external ids actually added
    ///
    /// The whole batch commits in one transaction.
    pub fn insert_all(
        &self,
        account_id: &str,
        trades: &[NormalizedTrade],
    ) -> Result<Vec<String>, TradeWindowError> {
        let mut conn = self.conn.lock().map_err(|_| TradeWindowError::LockError)?;
        let tx = conn.transaction().map_err(TradeWindowError::Database)?;

        let mut inserted = Vec::new();
        for trade in trades {
            let changed = tx
                .execute(
                    r#"
                    INSERT OR IGNORE INTO window_trades
                        (external_id, account_id, market_id, ts, side, usd, price, size)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                    "#,
                    params![
                        trade.external_id,
                        account_id,
                        trade.market_id,
                        trade.unix_ts(),
                        trade.side.as_str(),
                        trade.usd_notional.to_string(),
                        trade.price.to_string(),
                        trade.size.to_string(),
                    ],
                )
                .map_err(TradeWindowError::Database)?;

            if changed > 0 {
                inserted.push(trade.external_id.clone());
            }
        }

        tx.commit().map_err(TradeWindowError::Database)?;
        Ok(inserted)
    }

    /// Remove entries with score < cutoff; returns the count removed
    pub fn purge_before(&self, account_id: &str, cutoff: i64) -> Result<usize, TradeWindowError> {
        let conn = self.conn.lock().map_err(|_| TradeWindowError::LockError)?;
        let removed = conn
            .execute(
                "DELETE FROM window_trades WHERE account_id = ?1 AND ts < ?2",
                params![account_id, cutoff],
            )
            .map_err(TradeWindowError::Database)?;
        Ok(removed)
    }

    /// All entries with score >= window_start, ascending by (ts, external_id)
    pub fn range_since(
        &self,
        account_id: &str,
        window_start: i64,
    ) -> Result<Vec<NormalizedTrade>, TradeWindowError> {
        let conn = self.conn.lock().map_err(|_| TradeWindowError::LockError)?;

        let mut stmt = conn
            .prepare(
                r#"
                SELECT external_id, market_id, ts, side, usd, price, size
                FROM window_trades
                WHERE account_id = ?1 AND ts >= ?2
                ORDER BY ts ASC, external_id ASC
                "#,
            )
            .map_err(TradeWindowError::Database)?;

        let trades = stmt
            .query_map(params![account_id, window_start], |row| {
                let external_id: String = row.get(0)?;
                let market_id: String = row.get(1)?;
                let ts: i64 = row.get(2)?;
                let side: String = row.get(3)?;
                let usd: String = row.get(4)?;
                let price: String = row.get(5)?;
                let size: String = row.get(6)?;
                Ok((external_id, market_id, ts, side, usd, price, size))
            })
            .map_err(TradeWindowError::Database)?
            .filter_map(|r| r.ok())
            .map(|(external_id, market_id, ts, side, usd, price, size)| NormalizedTrade {
                external_id,
                market_id,
                timestamp: DateTime::from_timestamp(ts, 0).unwrap_or_else(Utc::now),
                side: side.parse().unwrap_or(TradeSide::Unknown),
                usd_notional: usd.parse::<Decimal>().unwrap_or_default(),
                price: price.parse::<Decimal>().unwrap_or_default(),
                size: size.parse::<Decimal>().unwrap_or_default(),
            })
            .collect();

        Ok(trades)
    }

    /// Number of entries currently held for an account
    pub fn count(&self, account_id: &str) -> Result<usize, TradeWindowError> {
        let conn = self.conn.lock().map_err(|_| TradeWindowError::LockError)?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM window_trades WHERE account_id = ?1",
                params![account_id],
                |row| row.get(0),
            )
            .map_err(TradeWindowError::Database)?;
        Ok(count as usize)
    }
}

/// Errors that can occur during trade window operations
#[derive(Debug, thiserror::Error)]
pub enum TradeWindowError {
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
    use rust_decimal_macros::dec;

    const ACCOUNT: &str = "714638";

    fn trade(id: &str, ts: i64, side: TradeSide, usd: Decimal) -> NormalizedTrade {
        NormalizedTrade {
            external_id: id.to_string(),
            market_id: "132".to_string(),
            timestamp: DateTime::from_timestamp(ts, 0).unwrap(),
            side,
            usd_notional: usd,
            price: dec!(0.5),
            size: dec!(10),
        }
    }

    #[test]
    fn test_insert_is_idempotent() {
        let store = TradeWindowStore::new_in_memory().unwrap();

        let batch = vec![trade("t1", 100, TradeSide::Sell, dec!(500))];
        let first = store.insert_all(ACCOUNT, &batch).unwrap();
        assert_eq!(first, vec!["t1".to_string()]);

        let second = store.insert_all(ACCOUNT, &batch).unwrap();
        assert!(second.is_empty());
        assert_eq!(store.count(ACCOUNT).unwrap(), 1);
    }

    #[test]
    fn test_duplicate_ids_within_batch_collapse() {
        let store = TradeWindowStore::new_in_memory().unwrap();

        let batch = vec![
            trade("t1", 100, TradeSide::Sell, dec!(500)),
            trade("t1", 100, TradeSide::Sell, dec!(500)),
        ];
        let inserted = store.insert_all(ACCOUNT, &batch).unwrap();
        assert_eq!(inserted.len(), 1);
        assert_eq!(store.count(ACCOUNT).unwrap(), 1);
    }

    #[test]
    fn test_range_since_is_ascending_and_inclusive() {
        let store = TradeWindowStore::new_in_memory().unwrap();

        store
            .insert_all(
                ACCOUNT,
                &[
                    trade("t3", 300, TradeSide::Buy, dec!(1)),
                    trade("t1", 100, TradeSide::Sell, dec!(2)),
                    trade("t2", 200, TradeSide::Sell, dec!(3)),
                ],
            )
            .unwrap();

        let range = store.range_since(ACCOUNT, 200).unwrap();
        let ids: Vec<&str> = range.iter().map(|t| t.external_id.as_str()).collect();
        assert_eq!(ids, vec!["t2", "t3"]);
        assert_eq!(range[0].usd_notional, dec!(3));
    }

    #[test]
    fn test_purge_removes_strictly_older_entries() {
        let store = TradeWindowStore::new_in_memory().unwrap();
        let retention = 360;
        let t = 1_000;

        store
            .insert_all(ACCOUNT, &[trade("t1", t, TradeSide::Sell, dec!(5))])
            .unwrap();

        // Purge just before the horizon elapses: entry retained
        let removed = store.purge_before(ACCOUNT, (t + retention - 1) - retention).unwrap();
        assert_eq!(removed, 0);
        assert_eq!(store.range_since(ACCOUNT, 0).unwrap().len(), 1);

        // Purge just after: entry gone
        let removed = store.purge_before(ACCOUNT, (t + retention + 1) - retention).unwrap();
        assert_eq!(removed, 1);
        assert!(store.range_since(ACCOUNT, 0).unwrap().is_empty());
    }

    #[test]
    fn test_accounts_are_isolated() {
        let store = TradeWindowStore::new_in_memory().unwrap();
        store
            .insert_all("a", &[trade("t1", 100, TradeSide::Sell, dec!(1))])
            .unwrap();

        assert_eq!(store.count("a").unwrap(), 1);
        assert_eq!(store.count("b").unwrap(), 0);
        assert!(store.range_since("b", 0).unwrap().is_empty());
    }
}
