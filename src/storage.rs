// 💾 Persistence port
//
// The application keeps exactly two durable records, each a JSON blob under
// a fixed key. Every mutation rewrites the whole record; there is no partial
// or delta persistence.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

/// Key of the session list (JSON array, newest first)
pub const SESSIONS_KEY: &str = "marie_sessions";

/// Key of the category list (JSON array of names)
pub const CATEGORIES_KEY: &str = "marie_categories";

/// Read-all / write-all access to named records
pub trait Storage: Send + Sync {
    /// Stored value for `key`, or None if never written
    fn read(&self, key: &str) -> Result<Option<String>>;

    /// Replace the stored value for `key`
    fn write(&self, key: &str, value: &str) -> Result<()>;
}

// ============================================================================
// SQLITE STORAGE
// ============================================================================

pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database: {}", db_path.display()))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        setup_database(&conn)?;
        Ok(SqliteStorage {
            conn: Mutex::new(conn),
        })
    }
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS records (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    Ok(())
}

impl Storage for SqliteStorage {
    fn read(&self, key: &str) -> Result<Option<String>> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow::anyhow!("Database lock poisoned"))?;

        conn.query_row("SELECT value FROM records WHERE key = ?1", params![key], |row| row.get(0))
            .optional()
            .with_context(|| format!("Failed to read record {}", key))
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow::anyhow!("Database lock poisoned"))?;

        conn.execute(
            "INSERT INTO records (key, value, updated_at) VALUES (?1, ?2, CURRENT_TIMESTAMP)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
            params![key, value],
        )
        .with_context(|| format!("Failed to write record {}", key))?;

        Ok(())
    }
}

// ============================================================================
// MEMORY STORAGE
// ============================================================================

/// Volatile storage for tests and dry runs
#[derive(Default)]
pub struct MemoryStorage {
    records: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn read(&self, key: &str) -> Result<Option<String>> {
        let records = self
            .records
            .lock()
            .map_err(|_| anyhow::anyhow!("Storage lock poisoned"))?;
        Ok(records.get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| anyhow::anyhow!("Storage lock poisoned"))?;
        records.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Memory storage whose writes to chosen keys fail, for error-path tests
#[cfg(test)]
#[derive(Default)]
pub(crate) struct FaultyStorage {
    inner: MemoryStorage,
    failing: Mutex<Vec<String>>,
}

#[cfg(test)]
impl FaultyStorage {
    pub(crate) fn fail_writes_to(&self, key: &str) {
        self.failing.lock().unwrap().push(key.to_string());
    }

    pub(crate) fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }
}

#[cfg(test)]
impl Storage for FaultyStorage {
    fn read(&self, key: &str) -> Result<Option<String>> {
        self.inner.read(key)
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        if self.failing.lock().unwrap().iter().any(|k| k == key) {
            anyhow::bail!("disk full writing {}", key);
        }
        self.inner.write(key, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_read_missing_key() {
        let storage = SqliteStorage::open_in_memory().unwrap();

        assert_eq!(storage.read(SESSIONS_KEY).unwrap(), None);
    }

    #[test]
    fn test_sqlite_write_overwrites_whole_record() {
        let storage = SqliteStorage::open_in_memory().unwrap();

        storage.write(CATEGORIES_KEY, r#"["A"]"#).unwrap();
        storage.write(CATEGORIES_KEY, r#"["A","B"]"#).unwrap();

        assert_eq!(storage.read(CATEGORIES_KEY).unwrap().as_deref(), Some(r#"["A","B"]"#));
        assert_eq!(storage.read(SESSIONS_KEY).unwrap(), None);
    }

    #[test]
    fn test_setup_database_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        setup_database(&conn).unwrap();
        setup_database(&conn).unwrap();
    }

    #[test]
    fn test_memory_storage_roundtrip() {
        let storage = MemoryStorage::new();

        storage.write(SESSIONS_KEY, "[]").unwrap();

        assert_eq!(storage.read(SESSIONS_KEY).unwrap().as_deref(), Some("[]"));
    }
}
