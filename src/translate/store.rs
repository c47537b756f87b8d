//! Namespaced key-value store backing the translation memory.
//! SQLite table for cross-session persistence, plus an in-memory store.

use std::collections::HashMap;
use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use super::TranslateError;

/// Key-value persistence seam. Values are opaque strings (JSON in practice).
pub trait KeyValueStore: Send + Sync {
    fn get(&self, namespace: &str) -> Result<Option<String>, TranslateError>;
    fn set(&self, namespace: &str, value: &str) -> Result<(), TranslateError>;
    fn remove(&self, namespace: &str) -> Result<(), TranslateError>;
}

/// SQLite-backed store: one row per namespace.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the store database at the given path.
    pub fn open(db_path: &Path) -> Result<Self, TranslateError> {
        let conn = Connection::open(db_path)?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv_store (
                namespace TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );",
        )?;

        info!(path = %db_path.display(), "kv store opened");

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, namespace: &str) -> Result<Option<String>, TranslateError> {
        let conn = self.conn.lock();
        let value = conn
            .query_row(
                "SELECT value FROM kv_store WHERE namespace = ?1",
                params![namespace],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, namespace: &str, value: &str) -> Result<(), TranslateError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO kv_store (namespace, value, updated_at)
             VALUES (?1, ?2, ?3)",
            params![namespace, value, now_unix()],
        )?;
        debug!(namespace, bytes = value.len(), "kv store write");
        Ok(())
    }

    fn remove(&self, namespace: &str) -> Result<(), TranslateError> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM kv_store WHERE namespace = ?1", params![namespace])?;
        Ok(())
    }
}

/// Volatile store backing the memory in tests.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<HashMap<String, String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for InMemoryStore {
    fn get(&self, namespace: &str) -> Result<Option<String>, TranslateError> {
        Ok(self.inner.lock().get(namespace).cloned())
    }

    fn set(&self, namespace: &str, value: &str) -> Result<(), TranslateError> {
        self.inner
            .lock()
            .insert(namespace.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, namespace: &str) -> Result<(), TranslateError> {
        self.inner.lock().remove(namespace);
        Ok(())
    }
}

/// Current time as Unix timestamp (seconds).
fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
