//! Subscriber storage
//!
//! One row per Pushover subscriber. `last_notified_at` is the cooldown
//! stamp: it only ever moves forward, and only the dispatcher moves it, on
//! confirmed delivery. Registration replaces the push key without touching
//! an existing stamp.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

/// A registered Pushover subscriber
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscriber {
    pub user_id: i64,
    pub push_key: String,
    /// Unix seconds of the last confirmed delivery, if any
    pub last_notified_at: Option<i64>,
}

/// Subscriber storage using SQLite
pub struct SubscriberStore {
    conn: Mutex<Connection>,
}

impl SubscriberStore {
    /// Create a new SubscriberStore instance
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, SubscriberStoreError> {
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SubscriberStoreError::Io(format!("Failed to create database directory: {}", e))
            })?;
        }

        let conn = Connection::open(db_path).map_err(SubscriberStoreError::Database)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory SubscriberStore (useful for testing)
    pub fn new_in_memory() -> Result<Self, SubscriberStoreError> {
        let conn = Connection::open_in_memory().map_err(SubscriberStoreError::Database)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), SubscriberStoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| SubscriberStoreError::LockError)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS subscribers (
                user_id INTEGER PRIMARY KEY,
                push_key TEXT NOT NULL,
                last_notified_at INTEGER DEFAULT NULL
            );
            "#,
        )
        .map_err(SubscriberStoreError::Database)?;
        Ok(())
    }

    /// Insert or update a subscriber's push key, preserving any cooldown stamp
    pub fn upsert(&self, user_id: i64, push_key: &str) -> Result<(), SubscriberStoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| SubscriberStoreError::LockError)?;
        conn.execute(
            r#"
            INSERT INTO subscribers (user_id, push_key)
            VALUES (?1, ?2)
            ON CONFLICT(user_id) DO UPDATE SET push_key = excluded.push_key
            "#,
            params![user_id, push_key],
        )
        .map_err(SubscriberStoreError::Database)?;
        Ok(())
    }

    /// Remove a subscriber. Returns true if a row was deleted.
    pub fn delete(&self, user_id: i64) -> Result<bool, SubscriberStoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| SubscriberStoreError::LockError)?;
        let deleted = conn
            .execute("DELETE FROM subscribers WHERE user_id = ?1", params![user_id])
            .map_err(SubscriberStoreError::Database)?;
        Ok(deleted > 0)
    }

    /// Fetch a single subscriber
    pub fn get(&self, user_id: i64) -> Result<Option<Subscriber>, SubscriberStoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| SubscriberStoreError::LockError)?;
        let row = conn
            .query_row(
                "SELECT user_id, push_key, last_notified_at FROM subscribers WHERE user_id = ?1",
                params![user_id],
                |row| {
                    Ok(Subscriber {
                        user_id: row.get(0)?,
                        push_key: row.get(1)?,
                        last_notified_at: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(SubscriberStoreError::Database)?;
        Ok(row)
    }

    /// All subscribers whose cooldown has elapsed:
    /// `last_notified_at` is null or `last_notified_at <= now - cooldown`
    pub fn list_eligible(
        &self,
        cooldown_secs: i64,
        now: i64,
    ) -> Result<Vec<Subscriber>, SubscriberStoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| SubscriberStoreError::LockError)?;
        let cutoff = now - cooldown_secs;

        let mut stmt = conn
            .prepare(
                r#"
                SELECT user_id, push_key, last_notified_at
                FROM subscribers
                WHERE last_notified_at IS NULL OR last_notified_at <= ?1
                ORDER BY user_id ASC
                "#,
            )
            .map_err(SubscriberStoreError::Database)?;

        let subscribers = stmt
            .query_map(params![cutoff], |row| {
                Ok(Subscriber {
                    user_id: row.get(0)?,
                    push_key: row.get(1)?,
                    last_notified_at: row.get(2)?,
                })
            })
            .map_err(SubscriberStoreError::Database)?
            .filter_map(|r| r.ok())
            .collect();

        Ok(subscribers)
    }

    /// Stamp a confirmed delivery; the stamp never moves backwards
    pub fn mark_notified(&self, user_id: i64, at: i64) -> Result<(), SubscriberStoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| SubscriberStoreError::LockError)?;
        conn.execute(
            r#"
            UPDATE subscribers
            SET last_notified_at = MAX(COALESCE(last_notified_at, 0), ?2)
            WHERE user_id = ?1
            "#,
            params![user_id, at],
        )
        .map_err(SubscriberStoreError::Database)?;
        Ok(())
    }

    /// Number of registered subscribers
    pub fn count(&self) -> Result<usize, SubscriberStoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| SubscriberStoreError::LockError)?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM subscribers", [], |row| row.get(0))
            .map_err(SubscriberStoreError::Database)?;
        Ok(count as usize)
    }
}

/// Errors that can occur during subscriber storage operations
#[derive(Debug, thiserror::Error)]
pub enum SubscriberStoreError {
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

    #[test]
    fn test_upsert_and_get() {
        let store = SubscriberStore::new_in_memory().unwrap();
        store.upsert(42, "key-abc").unwrap();

        let subscriber = store.get(42).unwrap().unwrap();
        assert_eq!(subscriber.push_key, "key-abc");
        assert_eq!(subscriber.last_notified_at, None);
    }

    #[test]
    fn test_upsert_replaces_key_but_preserves_stamp() {
        let store = SubscriberStore::new_in_memory().unwrap();
        store.upsert(42, "key-old").unwrap();
        store.mark_notified(42, 1_000).unwrap();

        store.upsert(42, "key-new").unwrap();
        let subscriber = store.get(42).unwrap().unwrap();
        assert_eq!(subscriber.push_key, "key-new");
        assert_eq!(subscriber.last_notified_at, Some(1_000));
    }

    #[test]
    fn test_delete() {
        let store = SubscriberStore::new_in_memory().unwrap();
        store.upsert(42, "key").unwrap();
        assert!(store.delete(42).unwrap());
        assert!(!store.delete(42).unwrap());
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_eligibility_cutoff() {
        let store = SubscriberStore::new_in_memory().unwrap();
        let cooldown = 7_200;
        let now = 100_000;

        store.upsert(1, "never-notified").unwrap();
        store.upsert(2, "long-ago").unwrap();
        store.mark_notified(2, now - cooldown).unwrap(); // exactly at the boundary
        store.upsert(3, "recent").unwrap();
        store.mark_notified(3, now - cooldown + 1).unwrap();

        let eligible = store.list_eligible(cooldown, now).unwrap();
        let ids: Vec<i64> = eligible.iter().map(|s| s.user_id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_mark_notified_never_moves_backwards() {
        let store = SubscriberStore::new_in_memory().unwrap();
        store.upsert(1, "key").unwrap();
        store.mark_notified(1, 5_000).unwrap();
        store.mark_notified(1, 4_000).unwrap();

        let subscriber = store.get(1).unwrap().unwrap();
        assert_eq!(subscriber.last_notified_at, Some(5_000));
    }
}
