//! SQLite-backed store for cache generations.

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

use crate::request::{ResponseSource, ShellResponse};

/// A stored response for one request key.
#[derive(Debug, Clone)]
pub struct CachedEntry {
    pub key: String,
    pub response: ShellResponse,
    pub captured_at: DateTime<Utc>,
}

/// Storage for named cache generations.
///
/// Only the shell worker talks to this; pages never read or write it directly.
pub trait CacheStorage: Send + Sync {
    /// Create the generation if it doesn't exist yet.
    fn open(&self, generation: &str) -> Result<()>;

    /// Names of all existing generations.
    fn generations(&self) -> Result<Vec<String>>;

    /// Delete a generation and all of its entries. Returns whether it existed.
    fn delete(&self, generation: &str) -> Result<bool>;

    /// Store one entry, unless the stored copy was captured later.
    fn put(
        &self,
        generation: &str,
        key: &str,
        response: &ShellResponse,
        captured_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Store several entries atomically: either all are written or none.
    fn put_all(&self, generation: &str, entries: &[(String, ShellResponse)]) -> Result<()>;

    fn lookup(&self, generation: &str, key: &str) -> Result<Option<CachedEntry>>;

    fn keys(&self, generation: &str) -> Result<Vec<String>>;
}

/// SQLite cache for shell generations.
pub struct SqliteCacheStorage {
    conn: Mutex<Connection>,
}

impl SqliteCacheStorage {
    /// Create a new cache at the given path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.init_schema()?;
        Ok(storage)
    }

    /// Create an in-memory cache (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.init_schema()?;
        Ok(storage)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.lock().execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS generations (
                name TEXT PRIMARY KEY,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS entries (
                generation TEXT NOT NULL REFERENCES generations(name) ON DELETE CASCADE,
                key TEXT NOT NULL,
                status INTEGER NOT NULL,
                headers_json TEXT NOT NULL,
                body BLOB NOT NULL,
                captured_at INTEGER NOT NULL,
                PRIMARY KEY (generation, key)
            );
            "#,
        )?;
        Ok(())
    }

    fn insert_generation(conn: &Connection, generation: &str) -> Result<()> {
        conn.execute(
            "INSERT OR IGNORE INTO generations (name, created_at) VALUES (?1, ?2)",
            params![generation, Utc::now().timestamp_millis()],
        )?;
        Ok(())
    }

    fn insert_entry(
        conn: &Connection,
        generation: &str,
        key: &str,
        response: &ShellResponse,
        captured_at: DateTime<Utc>,
    ) -> Result<()> {
        let headers_json = serde_json::to_string(&response.headers)?;
        conn.execute(
            r#"
            INSERT INTO entries
            (generation, key, status, headers_json, body, captured_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT (generation, key) DO UPDATE SET
                status = excluded.status,
                headers_json = excluded.headers_json,
                body = excluded.body,
                captured_at = excluded.captured_at
            WHERE excluded.captured_at >= entries.captured_at
            "#,
            params![
                generation,
                key,
                response.status,
                headers_json,
                response.body,
                captured_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }
}

impl CacheStorage for SqliteCacheStorage {
    fn open(&self, generation: &str) -> Result<()> {
        let conn = self.conn.lock();
        Self::insert_generation(&conn, generation)
    }

    fn generations(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT name FROM generations ORDER BY created_at, name")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect::<Result<Vec<String>, _>>()
            .map_err(|e| anyhow::anyhow!("Failed to read generations: {}", e))
    }

    fn delete(&self, generation: &str) -> Result<bool> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM entries WHERE generation = ?1", params![generation])?;
        let removed = conn.execute("DELETE FROM generations WHERE name = ?1", params![generation])?;
        Ok(removed > 0)
    }

    fn put(
        &self,
        generation: &str,
        key: &str,
        response: &ShellResponse,
        captured_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock();
        Self::insert_generation(&conn, generation)?;
        Self::insert_entry(&conn, generation, key, response, captured_at)
    }

    fn put_all(&self, generation: &str, entries: &[(String, ShellResponse)]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let captured_at = Utc::now();
        Self::insert_generation(&tx, generation)?;
        for (key, response) in entries {
            Self::insert_entry(&tx, generation, key, response, captured_at)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn lookup(&self, generation: &str, key: &str) -> Result<Option<CachedEntry>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT status, headers_json, body, captured_at FROM entries WHERE generation = ?1 AND key = ?2",
                params![generation, key],
                |row| {
                    Ok((
                        row.get::<_, u16>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Vec<u8>>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            )
            .optional()?;

        let Some((status, headers_json, body, captured_ms)) = row else {
            return Ok(None);
        };

        let headers: Vec<(String, String)> = serde_json::from_str(&headers_json)?;
        let captured_at = DateTime::from_timestamp_millis(captured_ms).unwrap_or_else(Utc::now);

        Ok(Some(CachedEntry {
            key: key.to_string(),
            response: ShellResponse {
                status,
                headers,
                body,
                source: ResponseSource::Cache,
            },
            captured_at,
        }))
    }

    fn keys(&self, generation: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT key FROM entries WHERE generation = ?1 ORDER BY key")?;
        let rows = stmt.query_map(params![generation], |row| row.get(0))?;
        rows.collect::<Result<Vec<String>, _>>()
            .map_err(|e| anyhow::anyhow!("Failed to read cache keys: {}", e))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    fn response(body: &str) -> ShellResponse {
        ShellResponse {
            status: 200,
            headers: vec![("content-type".to_string(), "text/html".to_string())],
            body: body.as_bytes().to_vec(),
            source: ResponseSource::Network,
        }
    }

    #[test]
    fn test_put_and_lookup() {
        let storage = SqliteCacheStorage::in_memory().unwrap();
        storage.put("v1", "GET http://localhost/", &response("<html>"), Utc::now()).unwrap();

        let entry = storage.lookup("v1", "GET http://localhost/").unwrap().unwrap();
        assert_eq!(entry.response.body, b"<html>");
        assert_eq!(entry.response.status, 200);
        assert_eq!(entry.response.header("content-type"), Some("text/html"));
        assert_eq!(entry.response.source, ResponseSource::Cache);
    }

    #[test]
    fn test_lookup_is_scoped_to_generation() {
        let storage = SqliteCacheStorage::in_memory().unwrap();
        storage.put("v1", "GET http://localhost/", &response("old"), Utc::now()).unwrap();

        assert!(storage.lookup("v2", "GET http://localhost/").unwrap().is_none());
    }

    #[test]
    fn test_put_replaces_existing_entry() {
        let storage = SqliteCacheStorage::in_memory().unwrap();
        let earlier = Utc::now();
        let later = earlier + chrono::Duration::seconds(1);
        storage.put("v1", "k", &response("first"), earlier).unwrap();
        storage.put("v1", "k", &response("second"), later).unwrap();

        let entry = storage.lookup("v1", "k").unwrap().unwrap();
        assert_eq!(entry.response.text(), "second");
        assert_eq!(entry.captured_at.timestamp_millis(), later.timestamp_millis());
        assert_eq!(storage.keys("v1").unwrap(), vec!["k".to_string()]);
    }

    #[test]
    fn test_older_capture_does_not_overwrite_newer() {
        let storage = SqliteCacheStorage::in_memory().unwrap();
        let earlier = Utc::now();
        let later = earlier + chrono::Duration::seconds(1);

        // Write-behind tasks may land out of order
        storage.put("v1", "k", &response("newer"), later).unwrap();
        storage.put("v1", "k", &response("older"), earlier).unwrap();

        let entry = storage.lookup("v1", "k").unwrap().unwrap();
        assert_eq!(entry.response.text(), "newer");
    }

    #[test]
    fn test_delete_removes_generation_and_entries() {
        let storage = SqliteCacheStorage::in_memory().unwrap();
        storage
            .put_all(
                "v1",
                &[("a".to_string(), response("a")), ("b".to_string(), response("b"))],
            )
            .unwrap();
        storage.open("v2").unwrap();

        assert!(storage.delete("v1").unwrap());
        assert!(!storage.delete("v1").unwrap());
        assert_eq!(storage.generations().unwrap(), vec!["v2".to_string()]);
        assert!(storage.keys("v1").unwrap().is_empty());
    }

    #[test]
    fn test_open_is_idempotent() {
        let storage = SqliteCacheStorage::in_memory().unwrap();
        storage.open("v1").unwrap();
        storage.open("v1").unwrap();
        assert_eq!(storage.generations().unwrap(), vec!["v1".to_string()]);
    }

    #[test]
    fn test_on_disk_storage_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");

        {
            let storage = SqliteCacheStorage::new(&path).unwrap();
            storage.put("v1", "k", &response("kept"), Utc::now()).unwrap();
        }

        let storage = SqliteCacheStorage::new(&path).unwrap();
        let entry = storage.lookup("v1", "k").unwrap().unwrap();
        assert_eq!(entry.response.text(), "kept");
    }
}
