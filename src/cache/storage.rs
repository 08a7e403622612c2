//! Snapshot storage trait with SQLite and in-memory implementations.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

/// A persisted snapshot as raw JSON plus bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSnapshot {
  pub data: String,
  /// Bumped on every write, starting at 1
  pub version: u64,
  pub saved_at: DateTime<Utc>,
}

/// Trait for snapshot storage backends: a string key-value store with
/// compare-and-swap writes.
pub trait SnapshotStorage: Send + Sync {
  /// Read the snapshot stored under `key`.
  fn read(&self, key: &str) -> Result<Option<StoredSnapshot>>;

  /// Replace the value under `key` and return the new version.
  ///
  /// With `expected` set, the write is refused unless the stored version
  /// still matches (0 meaning "absent").
  fn write(&self, key: &str, data: &str, expected: Option<u64>) -> Result<u64>;
}

fn check_version(key: &str, current: u64, expected: Option<u64>) -> Result<()> {
  match expected {
    Some(expected) if expected != current => Err(eyre!(
      "Snapshot {} changed concurrently (expected version {}, found {})",
      key,
      expected,
      current
    )),
    _ => Ok(()),
  }
}

/// SQLite-based snapshot storage.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

/// Schema for snapshot tables.
const SNAPSHOT_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS snapshots (
    key TEXT PRIMARY KEY,
    data TEXT NOT NULL,
    version INTEGER NOT NULL,
    saved_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

impl SqliteStorage {
  /// Open (or create) the snapshot database at `path`.
  pub fn open_at(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open snapshot database at {}: {}", path.display(), e))?;
    Self::with_connection(conn)
  }

  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory snapshot database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(SNAPSHOT_SCHEMA)
      .map_err(|e| eyre!("Failed to run snapshot migrations: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }
}

impl SnapshotStorage for SqliteStorage {
  fn read(&self, key: &str) -> Result<Option<StoredSnapshot>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let row: Option<(String, i64, String)> = conn
      .query_row(
        "SELECT data, version, saved_at FROM snapshots WHERE key = ?",
        params![key],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read snapshot {}: {}", key, e))?;

    match row {
      Some((data, version, saved_at)) => Ok(Some(StoredSnapshot {
        data,
        version: version.max(0) as u64,
        saved_at: parse_datetime(&saved_at)?,
      })),
      None => Ok(None),
    }
  }

  fn write(&self, key: &str, data: &str, expected: Option<u64>) -> Result<u64> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let current: i64 = tx
      .query_row(
        "SELECT version FROM snapshots WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read snapshot version {}: {}", key, e))?
      .unwrap_or(0);
    check_version(key, current.max(0) as u64, expected)?;

    let next = current + 1;
    tx.execute(
      "INSERT OR REPLACE INTO snapshots (key, data, version, saved_at)
       VALUES (?, ?, ?, datetime('now'))",
      params![key, data, next],
    )
    .map_err(|e| eyre!("Failed to write snapshot {}: {}", key, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(next as u64)
  }
}

/// In-memory snapshot storage, used with `--ephemeral` and in tests.
#[derive(Default)]
pub struct MemoryStorage {
  snapshots: Mutex<HashMap<String, StoredSnapshot>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }
}

impl SnapshotStorage for MemoryStorage {
  fn read(&self, key: &str) -> Result<Option<StoredSnapshot>> {
    let snapshots = self
      .snapshots
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(snapshots.get(key).cloned())
  }

  fn write(&self, key: &str, data: &str, expected: Option<u64>) -> Result<u64> {
    let mut snapshots = self
      .snapshots
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let current = snapshots.get(key).map(|s| s.version).unwrap_or(0);
    check_version(key, current, expected)?;

    let version = current + 1;
    snapshots.insert(
      key.to_string(),
      StoredSnapshot {
        data: data.to_string(),
        version,
        saved_at: Utc::now(),
      },
    );
    Ok(version)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
