// Durable key/value storage backing the result cache

use crate::error::StoreError;
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

type Result<T> = std::result::Result<T, StoreError>;

/// Default ceiling, in the same ballpark as browser local storage.
pub const DEFAULT_QUOTA_BYTES: usize = 5 * 1024 * 1024;

/// String-valued key/value storage with a size ceiling.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    /// Fails with [`StoreError::QuotaExceeded`] when the write would push the
    /// store past its ceiling.
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
    /// Returns how many entries were removed.
    fn clear(&self) -> Result<usize>;
}

fn current_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
    quota_bytes: usize,
}

impl SqliteStore {
    pub fn exists(path: &Path) -> bool {
        path.exists()
    }

    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            ",
        )?;

        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let store = SqliteStore {
            conn: Mutex::new(conn),
            quota_bytes: DEFAULT_QUOTA_BYTES,
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn with_quota(mut self, quota_bytes: usize) -> Self {
        self.quota_bytes = quota_bytes;
        self
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS kv_entries (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    /// Bytes currently used, optionally ignoring one key that is about to be replaced.
    fn used_bytes(conn: &Connection, excluding: &str) -> Result<usize> {
        let used: i64 = conn.query_row(
            "SELECT COALESCE(SUM(LENGTH(CAST(key AS BLOB)) + LENGTH(CAST(value AS BLOB))), 0)
             FROM kv_entries WHERE key != ?1",
            params![excluding],
            |row| row.get(0),
        )?;
        Ok(used.max(0) as usize)
    }

    pub fn len(&self) -> Result<usize> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM kv_entries", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl KvStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let value = conn
            .query_row(
                "SELECT value FROM kv_entries WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;

        let needed = Self::used_bytes(&conn, key)? + key.len() + value.len();
        if needed > self.quota_bytes {
            return Err(StoreError::QuotaExceeded {
                needed,
                limit: self.quota_bytes,
            });
        }

        conn.execute(
            "INSERT INTO kv_entries (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, current_timestamp()],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        conn.execute("DELETE FROM kv_entries WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn clear(&self) -> Result<usize> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let removed = conn.execute("DELETE FROM kv_entries", [])?;
        Ok(removed)
    }
}

/// In-process store, used when no cache directory is available and in tests.
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
    quota_bytes: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_quota(DEFAULT_QUOTA_BYTES)
    }

    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            quota_bytes,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        let used: usize = entries
            .iter()
            .filter(|(k, _)| k.as_str() != key)
            .map(|(k, v)| k.len() + v.len())
            .sum();
        let needed = used + key.len() + value.len();
        if needed > self.quota_bytes {
            return Err(StoreError::QuotaExceeded {
                needed,
                limit: self.quota_bytes,
            });
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        entries.remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<usize> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        let removed = entries.len();
        entries.clear();
        Ok(removed)
    }
}
