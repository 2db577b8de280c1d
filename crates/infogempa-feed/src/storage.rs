//! Durable string key-value storage for snapshots and locations.

use std::path::Path;

use infogempa_core::{RusqliteErrorExt, StorageError};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

/// Fixed storage keys.
pub mod keys {
    pub const GEMPA_LIST: &str = "gempaData";
    pub const GEMPA_LATEST: &str = "autoGempaData";
    pub const GEMPA_UPDATED: &str = "lastUpdate";
    pub const WEATHER: &str = "weatherData";
    pub const WEATHER_UPDATED: &str = "weatherLastUpdate";
    pub const CURRENT_LOCATION: &str = "currentLocation";
    pub const SAVED_LOCATIONS: &str = "savedLocations";
}

/// String-keyed storage holding JSON-encoded values.
///
/// No cross-key locking: concurrent writers to the same key race and the
/// last write wins.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Write several keys in one transaction.
    fn set_many(&self, entries: &[(&str, String)]) -> Result<(), StorageError>;
}

/// SQLite-backed key-value store.
pub struct SqliteKeyValueStore {
    conn: Mutex<Connection>,
}

impl SqliteKeyValueStore {
    /// Open (or create) the store at the given path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let conn = Connection::open(path).map_err(|e| e.into_storage_error())?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory().map_err(|e| e.into_storage_error())?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StorageError> {
        self.conn
            .lock()
            .execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS kv (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );
                "#,
            )
            .map_err(|e| e.into_storage_error())
    }
}

impl KeyValueStore for SqliteKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.conn
            .lock()
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()
            .map_err(|e| e.into_storage_error())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.conn
            .lock()
            .execute(
                "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
                params![key, value],
            )
            .map(|_| ())
            .map_err(|e| e.into_storage_error())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.conn
            .lock()
            .execute("DELETE FROM kv WHERE key = ?1", params![key])
            .map(|_| ())
            .map_err(|e| e.into_storage_error())
    }

    fn set_many(&self, entries: &[(&str, String)]) -> Result<(), StorageError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(|e| e.into_storage_error())?;
        for (key, value) in entries {
            tx.execute(
                "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
                params![key, value],
            )
            .map_err(|e| e.into_storage_error())?;
        }
        tx.commit().map_err(|e| e.into_storage_error())
    }
}
