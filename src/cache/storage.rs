//! Key-value storage trait and its SQLite / in-memory implementations.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Trait for persistent string-keyed storage backends.
///
/// This is the only thing the post cache knows about persistence; a
/// browser-style local storage is the model.
pub trait KeyValueStore: Send + Sync + 'static {
  /// Read a value. A missing key is `Ok(None)`.
  fn get(&self, key: &str) -> Result<Option<String>>;

  /// Write a single value, replacing any previous one.
  fn set(&self, key: &str, value: &str) -> Result<()> {
    self.set_many(&[(key, value)])
  }

  /// Write several values. Backends that can do so apply them atomically.
  fn set_many(&self, entries: &[(&str, &str)]) -> Result<()>;

  /// Remove a value. Removing a missing key is not an error.
  fn remove(&self, key: &str) -> Result<()>;
}

/// Shared handles forward to the inner store, so one file can back both the
/// post cache and the session.
impl<S: KeyValueStore + ?Sized> KeyValueStore for std::sync::Arc<S> {
  fn get(&self, key: &str) -> Result<Option<String>> {
    (**self).get(key)
  }

  fn set_many(&self, entries: &[(&str, &str)]) -> Result<()> {
    (**self).set_many(entries)
  }

  fn remove(&self, key: &str) -> Result<()> {
    (**self).remove(key)
  }
}

/// Storage implementation that doesn't store anything.
/// Used when caching is disabled - every read misses.
pub struct NoopStorage;

impl KeyValueStore for NoopStorage {
  fn get(&self, _key: &str) -> Result<Option<String>> {
    Ok(None) // Always miss
  }

  fn set_many(&self, _entries: &[(&str, &str)]) -> Result<()> {
    Ok(()) // Discard
  }

  fn remove(&self, _key: &str) -> Result<()> {
    Ok(())
  }
}

/// In-process storage with an optional per-value size quota.
#[derive(Default)]
pub struct MemoryStorage {
  entries: Mutex<HashMap<String, String>>,
  max_value_bytes: Option<usize>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  /// Reject any value larger than `bytes`, like a full browser quota.
  pub fn with_quota(mut self, bytes: usize) -> Self {
    self.max_value_bytes = Some(bytes);
    self
  }

  pub fn len(&self) -> usize {
    self.entries.lock().map(|e| e.len()).unwrap_or(0)
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl KeyValueStore for MemoryStorage {
  fn get(&self, key: &str) -> Result<Option<String>> {
    let entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(entries.get(key).cloned())
  }

  fn set_many(&self, new_entries: &[(&str, &str)]) -> Result<()> {
    check_quota(self.max_value_bytes, new_entries)?;

    let mut entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    for (key, value) in new_entries {
      entries.insert(key.to_string(), value.to_string());
    }
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<()> {
    let mut entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    entries.remove(key);
    Ok(())
  }
}

fn check_quota(max_value_bytes: Option<usize>, entries: &[(&str, &str)]) -> Result<()> {
  if let Some(max) = max_value_bytes {
    if let Some((key, value)) = entries.iter().find(|(_, v)| v.len() > max) {
      return Err(eyre!(
        "Storage quota exceeded writing {} ({} bytes, limit {})",
        key,
        value.len(),
        max
      ));
    }
  }
  Ok(())
}

/// SQLite-based key-value storage.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
  max_value_bytes: Option<usize>,
}

impl SqliteStorage {
  /// Open the storage at the default location.
  pub fn open() -> Result<Self> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open (or create) the storage at `path`.
  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    let storage = Self {
      conn: Mutex::new(conn),
      max_value_bytes: None,
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  pub fn with_quota(mut self, bytes: Option<usize>) -> Self {
    self.max_value_bytes = bytes;
    self
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("vboard").join("cache.db"))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv_store (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    written_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl KeyValueStore for SqliteStorage {
  fn get(&self, key: &str) -> Result<Option<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .query_row(
        "SELECT value FROM kv_store WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read {}: {}", key, e))
  }

  fn set_many(&self, entries: &[(&str, &str)]) -> Result<()> {
    check_quota(self.max_value_bytes, entries)?;

    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    for (key, value) in entries {
      tx.execute(
        "INSERT OR REPLACE INTO kv_store (key, value, written_at)
         VALUES (?, ?, datetime('now'))",
        params![key, value],
      )
      .map_err(|e| eyre!("Failed to write {}: {}", key, e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn remove(&self, key: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM kv_store WHERE key = ?", params![key])
      .map_err(|e| eyre!("Failed to remove {}: {}", key, e))?;

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_sqlite_set_get_remove() {
    let dir = tempfile::tempdir().unwrap();
    let storage = SqliteStorage::open_at(&dir.path().join("cache.db")).unwrap();

    assert_eq!(storage.get("a").unwrap(), None);
    storage.set("a", "1").unwrap();
    storage.set("a", "2").unwrap();
    assert_eq!(storage.get("a").unwrap().as_deref(), Some("2"));

    storage.remove("a").unwrap();
    storage.remove("a").unwrap();
    assert_eq!(storage.get("a").unwrap(), None);
  }

  #[test]
  fn test_sqlite_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("cache.db");

    {
      let storage = SqliteStorage::open_at(&path).unwrap();
      storage.set_many(&[("posts", "[]"), ("ts", "now")]).unwrap();
    }

    let storage = SqliteStorage::open_at(&path).unwrap();
    assert_eq!(storage.get("posts").unwrap().as_deref(), Some("[]"));
    assert_eq!(storage.get("ts").unwrap().as_deref(), Some("now"));
  }

  #[test]
  fn test_sqlite_quota_rejects_whole_batch() {
    let dir = tempfile::tempdir().unwrap();
    let storage = SqliteStorage::open_at(&dir.path().join("cache.db"))
      .unwrap()
      .with_quota(Some(4));

    assert!(storage.set_many(&[("small", "ok"), ("big", "too large")]).is_err());
    assert_eq!(storage.get("small").unwrap(), None);
  }

  #[test]
  fn test_memory_quota() {
    let storage = MemoryStorage::new().with_quota(3);
    assert!(storage.set("k", "abc").is_ok());
    assert!(storage.set("k", "abcd").is_err());
    assert_eq!(storage.get("k").unwrap().as_deref(), Some("abc"));
  }

  #[test]
  fn test_noop_always_misses() {
    let storage = NoopStorage;
    storage.set("k", "v").unwrap();
    assert_eq!(storage.get("k").unwrap(), None);
  }

  #[test]
  fn test_shared_handle_sees_same_entries() {
    let inner = std::sync::Arc::new(MemoryStorage::new());
    let shared: std::sync::Arc<dyn KeyValueStore> = inner.clone();
    shared.set("k", "v").unwrap();
    assert_eq!(inner.get("k").unwrap().as_deref(), Some("v"));
    shared.remove("k").unwrap();
    assert!(inner.is_empty());
  }
}
