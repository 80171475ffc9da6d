//! Storage tier trait and SQLite implementation.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

/// Failure of a backing storage tier. Never escapes the cache store.
#[derive(Error, Debug)]
pub enum StorageError {
  #[error("storage quota exceeded: {needed} bytes needed, quota is {quota}")]
  QuotaExceeded { needed: u64, quota: u64 },

  #[error("sqlite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("storage lock poisoned")]
  LockPoisoned,

  #[error("could not determine data directory")]
  NoDataDir,
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// A string key/value store backing one cache tier.
///
/// Values are serialized cache entries. Every operation reports failure
/// explicitly; the cache store decides how to degrade.
pub trait StorageTier: Send + Sync {
  /// Short name used in logs.
  fn name(&self) -> &'static str;

  fn get_item(&self, key: &str) -> StorageResult<Option<String>>;

  fn set_item(&self, key: &str, value: &str) -> StorageResult<()>;

  fn remove_item(&self, key: &str) -> StorageResult<()>;

  /// All keys currently stored.
  fn keys(&self) -> StorageResult<Vec<String>>;

  fn clear(&self) -> StorageResult<()>;
}

/// Storage implementation that doesn't store anything.
/// Used when persistence is disabled - all operations are no-ops.
pub struct NoopStorage;

impl StorageTier for NoopStorage {
  fn name(&self) -> &'static str {
    "noop"
  }

  fn get_item(&self, _key: &str) -> StorageResult<Option<String>> {
    Ok(None) // Always miss
  }

  fn set_item(&self, _key: &str, _value: &str) -> StorageResult<()> {
    Ok(()) // Discard
  }

  fn remove_item(&self, _key: &str) -> StorageResult<()> {
    Ok(())
  }

  fn keys(&self) -> StorageResult<Vec<String>> {
    Ok(Vec::new())
  }

  fn clear(&self) -> StorageResult<()> {
    Ok(())
  }
}

/// SQLite-based storage tier.
///
/// Opened on a file it backs the persistent tier; opened in memory it backs
/// the session tier and disappears with the process.
pub struct SqliteStorage {
  name: &'static str,
  conn: Mutex<Connection>,
  quota_bytes: Option<u64>,
}

impl SqliteStorage {
  /// Open (or create) the persistent store at the default location.
  pub fn open_default() -> StorageResult<Self> {
    Self::open(&Self::default_path()?)
  }

  /// Open (or create) a persistent store at `path`.
  pub fn open(path: &Path) -> StorageResult<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(path)?;
    Self::with_connection("persistent", conn)
  }

  /// Create a session store that lives in memory.
  pub fn in_memory() -> StorageResult<Self> {
    let conn = Connection::open_in_memory()?;
    Self::with_connection("session", conn)
  }

  fn with_connection(name: &'static str, conn: Connection) -> StorageResult<Self> {
    let storage = Self {
      name,
      conn: Mutex::new(conn),
      quota_bytes: None,
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Limit the total bytes (keys plus values) this tier may hold.
  pub fn with_quota(mut self, quota_bytes: u64) -> Self {
    self.quota_bytes = Some(quota_bytes);
    self
  }

  /// Get the default database path.
  pub fn default_path() -> StorageResult<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or(StorageError::NoDataDir)?;

    Ok(data_dir.join("vetrina").join("cache.db"))
  }

  fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|_| StorageError::LockPoisoned)
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> StorageResult<()> {
    self.lock()?.execute_batch(CACHE_SCHEMA)?;
    Ok(())
  }

  fn check_quota(&self, conn: &Connection, key: &str, value: &str) -> StorageResult<()> {
    let Some(quota) = self.quota_bytes else {
      return Ok(());
    };

    let used: i64 = conn.query_row(
      "SELECT COALESCE(SUM(LENGTH(CAST(key AS BLOB)) + LENGTH(CAST(value AS BLOB))), 0)
       FROM cache_items WHERE key != ?",
      params![key],
      |row| row.get(0),
    )?;
    let needed = u64::try_from(used).unwrap_or(0) + (key.len() + value.len()) as u64;

    if needed > quota {
      return Err(StorageError::QuotaExceeded { needed, quota });
    }
    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- Serialized cache entries keyed by cache key
CREATE TABLE IF NOT EXISTS cache_items (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl StorageTier for SqliteStorage {
  fn name(&self) -> &'static str {
    self.name
  }

  fn get_item(&self, key: &str) -> StorageResult<Option<String>> {
    let conn = self.lock()?;
    let value = conn
      .query_row(
        "SELECT value FROM cache_items WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()?;
    Ok(value)
  }

  fn set_item(&self, key: &str, value: &str) -> StorageResult<()> {
    let conn = self.lock()?;
    self.check_quota(&conn, key, value)?;

    conn.execute(
      "INSERT OR REPLACE INTO cache_items (key, value, stored_at)
       VALUES (?, ?, datetime('now'))",
      params![key, value],
    )?;
    Ok(())
  }

  fn remove_item(&self, key: &str) -> StorageResult<()> {
    self
      .lock()?
      .execute("DELETE FROM cache_items WHERE key = ?", params![key])?;
    Ok(())
  }

  fn keys(&self) -> StorageResult<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare("SELECT key FROM cache_items ORDER BY key")?;
    let keys = stmt
      .query_map([], |row| row.get(0))?
      .collect::<Result<Vec<String>, _>>()?;
    Ok(keys)
  }

  fn clear(&self) -> StorageResult<()> {
    self.lock()?.execute("DELETE FROM cache_items", [])?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn test_set_get_remove() {
    let storage = SqliteStorage::in_memory().unwrap();
    storage.set_item("a", "1").unwrap();
    assert_eq!(storage.get_item("a").unwrap().as_deref(), Some("1"));

    storage.set_item("a", "2").unwrap();
    assert_eq!(storage.get_item("a").unwrap().as_deref(), Some("2"));

    storage.remove_item("a").unwrap();
    assert_eq!(storage.get_item("a").unwrap(), None);
  }

  #[test]
  fn test_keys_and_clear() {
    let storage = SqliteStorage::in_memory().unwrap();
    storage.set_item("b", "x").unwrap();
    storage.set_item("a", "y").unwrap();
    assert_eq!(storage.keys().unwrap(), vec!["a".to_string(), "b".to_string()]);

    storage.clear().unwrap();
    assert!(storage.keys().unwrap().is_empty());
  }

  #[test]
  fn test_file_storage_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("nested").join("cache.db");

    {
      let storage = SqliteStorage::open(&path).unwrap();
      storage.set_item("hierarchy:/hierarchy", "{}").unwrap();
    }

    let storage = SqliteStorage::open(&path).unwrap();
    assert_eq!(storage.name(), "persistent");
    assert_eq!(
      storage.get_item("hierarchy:/hierarchy").unwrap().as_deref(),
      Some("{}")
    );
  }

  #[test]
  fn test_quota_rejects_oversized_write() {
    let storage = SqliteStorage::in_memory().unwrap().with_quota(16);
    storage.set_item("k", "small").unwrap();

    let err = storage.set_item("k2", "this value is far too long").unwrap_err();
    assert!(matches!(err, StorageError::QuotaExceeded { quota: 16, .. }));
    assert_eq!(storage.get_item("k2").unwrap(), None);
  }

  #[test]
  fn test_quota_ignores_value_being_replaced() {
    let storage = SqliteStorage::in_memory().unwrap().with_quota(12);
    storage.set_item("k", "1234567890").unwrap();
    // Replacing the same key only counts the new value.
    storage.set_item("k", "0987654321").unwrap();
  }

  #[test]
  fn test_open_below_a_file_is_an_io_error() {
    let temp_dir = TempDir::new().unwrap();
    let blocker = temp_dir.path().join("not-a-dir");
    std::fs::write(&blocker, "x").unwrap();

    let err = SqliteStorage::open(&blocker.join("cache.db")).err().unwrap();
    assert!(matches!(err, StorageError::Io(_)));
  }

  #[test]
  fn test_noop_storage_always_misses() {
    let storage = NoopStorage;
    storage.set_item("a", "1").unwrap();
    assert_eq!(storage.get_item("a").unwrap(), None);
    assert!(storage.keys().unwrap().is_empty());
  }
}
