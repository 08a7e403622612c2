//! Durable, versioned response stores and their SQLite and in-memory backends.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use super::request::{RequestKey, Response};

/// Storage usage as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageEstimate {
  pub usage: u64,
  pub quota: u64,
}

impl StorageEstimate {
  /// Fraction of the quota in use. A zero quota counts as full.
  pub fn usage_ratio(&self) -> f64 {
    if self.quota == 0 {
      return 1.0;
    }
    self.usage as f64 / self.quota as f64
  }
}

/// A collection of named response stores addressable by request identity.
pub trait ResponseStore: Send + Sync {
  /// Names of every store that currently exists.
  fn list_stores(&self) -> Result<Vec<String>>;

  /// Create the named store if it does not exist yet.
  fn open(&self, store: &str) -> Result<()>;

  /// Look up a cached response in one store.
  fn lookup(&self, store: &str, key: &RequestKey) -> Result<Option<Response>>;

  /// Insert or replace a single entry.
  fn put(&self, store: &str, key: &RequestKey, response: &Response) -> Result<()>;

  /// Insert several entries as one unit: either all are written or none.
  fn put_all(&self, store: &str, entries: &[(RequestKey, Response)]) -> Result<()>;

  /// Delete a store and everything in it. Returns false if it did not exist.
  fn delete_store(&self, store: &str) -> Result<bool>;

  /// Usage estimate, or None when the backend cannot tell.
  fn estimate(&self) -> Result<Option<StorageEstimate>>;
}

/// SQLite-backed response store.
///
/// Body bytes are counted once on open and then tracked on every write, so
/// the quota guard never scans the table.
pub struct SqliteResponseStore {
  conn: Mutex<Connection>,
  quota: Option<u64>,
  usage: AtomicU64,
}

const RESPONSE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_stores (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS cache_entries (
    store_name TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    request_key TEXT NOT NULL,
    status INTEGER NOT NULL,
    content_type TEXT,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (store_name, key_hash)
);
"#;

impl SqliteResponseStore {
  /// Open (or create) the store database at `path`.
  pub fn open_at(path: &Path, quota: Option<u64>) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open response cache at {}: {}", path.display(), e))?;
    Self::with_connection(conn, quota)
  }

  #[cfg(test)]
  pub fn open_in_memory(quota: Option<u64>) -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory cache: {}", e))?;
    Self::with_connection(conn, quota)
  }

  fn with_connection(conn: Connection, quota: Option<u64>) -> Result<Self> {
    conn
      .execute_batch(RESPONSE_SCHEMA)
      .map_err(|e| eyre!("Failed to run response cache migrations: {}", e))?;

    let usage: i64 = conn
      .query_row(
        "SELECT COALESCE(SUM(length(body)), 0) FROM cache_entries",
        [],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to measure cache usage: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
      quota,
      usage: AtomicU64::new(usage.max(0) as u64),
    })
  }

  fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Apply a byte delta. Callers hold the connection lock.
  fn adjust_usage(&self, delta: i64) {
    if delta >= 0 {
      self.usage.fetch_add(delta as u64, Ordering::Relaxed);
    } else {
      let shrink = delta.unsigned_abs();
      let _ = self
        .usage
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |u| Some(u.saturating_sub(shrink)));
    }
  }
}

/// Write one entry and return how many body bytes the store grew by.
fn insert_entry(conn: &Connection, store: &str, key: &RequestKey, response: &Response) -> Result<i64> {
  let hash = key.hash();
  let previous: Option<i64> = conn
    .query_row(
      "SELECT length(body) FROM cache_entries WHERE store_name = ? AND key_hash = ?",
      params![store, hash],
      |row| row.get(0),
    )
    .optional()
    .map_err(|e| eyre!("Failed to read {}: {}", key.description(), e))?;

  conn
    .execute(
      "INSERT OR IGNORE INTO cache_stores (name) VALUES (?)",
      params![store],
    )
    .map_err(|e| eyre!("Failed to register store {}: {}", store, e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO cache_entries
         (store_name, key_hash, request_key, status, content_type, body, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        store,
        hash,
        key.description(),
        response.status,
        response.content_type,
        response.body
      ],
    )
    .map_err(|e| eyre!("Failed to cache {}: {}", key.description(), e))?;

  Ok(response.body.len() as i64 - previous.unwrap_or(0))
}

impl ResponseStore for SqliteResponseStore {
  fn list_stores(&self) -> Result<Vec<String>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare("SELECT name FROM cache_stores ORDER BY name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list stores: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read store name: {}", e))?;

    Ok(names)
  }

  fn open(&self, store: &str) -> Result<()> {
    self
      .conn()?
      .execute(
        "INSERT OR IGNORE INTO cache_stores (name) VALUES (?)",
        params![store],
      )
      .map_err(|e| eyre!("Failed to open store {}: {}", store, e))?;
    Ok(())
  }

  fn lookup(&self, store: &str, key: &RequestKey) -> Result<Option<Response>> {
    self
      .conn()?
      .query_row(
        "SELECT status, content_type, body FROM cache_entries
         WHERE store_name = ? AND key_hash = ?",
        params![store, key.hash()],
        |row| {
          Ok(Response {
            status: row.get(0)?,
            content_type: row.get(1)?,
            body: row.get(2)?,
          })
        },
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {}: {}", key.description(), e))
  }

  fn put(&self, store: &str, key: &RequestKey, response: &Response) -> Result<()> {
    let conn = self.conn()?;
    let grown = insert_entry(&conn, store, key, response)?;
    self.adjust_usage(grown);
    Ok(())
  }

  fn put_all(&self, store: &str, entries: &[(RequestKey, Response)]) -> Result<()> {
    let conn = self.conn()?;
    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let mut grown = 0;
    for (key, response) in entries {
      grown += insert_entry(&tx, store, key, response)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    self.adjust_usage(grown);
    Ok(())
  }

  fn delete_store(&self, store: &str) -> Result<bool> {
    let conn = self.conn()?;
    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let freed: i64 = tx
      .query_row(
        "SELECT COALESCE(SUM(length(body)), 0) FROM cache_entries WHERE store_name = ?",
        params![store],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to measure store {}: {}", store, e))?;
    tx.execute(
      "DELETE FROM cache_entries WHERE store_name = ?",
      params![store],
    )
    .map_err(|e| eyre!("Failed to delete entries of {}: {}", store, e))?;
    let removed = tx
      .execute("DELETE FROM cache_stores WHERE name = ?", params![store])
      .map_err(|e| eyre!("Failed to delete store {}: {}", store, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    self.adjust_usage(-freed);
    Ok(removed > 0)
  }

  fn estimate(&self) -> Result<Option<StorageEstimate>> {
    let quota = match self.quota {
      Some(quota) => quota,
      None => return Ok(None),
    };

    Ok(Some(StorageEstimate {
      usage: self.usage.load(Ordering::Relaxed),
      quota,
    }))
  }
}

/// In-memory response store, used with `--ephemeral` and in tests.
#[derive(Default)]
pub struct MemoryResponseStore {
  stores: Mutex<BTreeMap<String, HashMap<String, Response>>>,
  quota: Option<u64>,
}

impl MemoryResponseStore {
  pub fn new(quota: Option<u64>) -> Self {
    Self {
      stores: Mutex::new(BTreeMap::new()),
      quota,
    }
  }

  fn stores(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, HashMap<String, Response>>>> {
    self.stores.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl ResponseStore for MemoryResponseStore {
  fn list_stores(&self) -> Result<Vec<String>> {
    Ok(self.stores()?.keys().cloned().collect())
  }

  fn open(&self, store: &str) -> Result<()> {
    self.stores()?.entry(store.to_string()).or_default();
    Ok(())
  }

  fn lookup(&self, store: &str, key: &RequestKey) -> Result<Option<Response>> {
    Ok(
      self
        .stores()?
        .get(store)
        .and_then(|entries| entries.get(&key.hash()))
        .cloned(),
    )
  }

  fn put(&self, store: &str, key: &RequestKey, response: &Response) -> Result<()> {
    self
      .stores()?
      .entry(store.to_string())
      .or_default()
      .insert(key.hash(), response.clone());
    Ok(())
  }

  fn put_all(&self, store: &str, entries: &[(RequestKey, Response)]) -> Result<()> {
    let mut stores = self.stores()?;
    let target = stores.entry(store.to_string()).or_default();
    for (key, response) in entries {
      target.insert(key.hash(), response.clone());
    }
    Ok(())
  }

  fn delete_store(&self, store: &str) -> Result<bool> {
    Ok(self.stores()?.remove(store).is_some())
  }

  fn estimate(&self) -> Result<Option<StorageEstimate>> {
    let quota = match self.quota {
      Some(quota) => quota,
      None => return Ok(None),
    };

    let usage = self
      .stores()?
      .values()
      .flat_map(|entries| entries.values())
      .map(|r| r.body.len() as u64)
      .sum();

    Ok(Some(StorageEstimate { usage, quota }))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use reqwest::Method;
  use url::Url;

  fn key(path: &str) -> RequestKey {
    let url = Url::parse("https://farm.example").unwrap().join(path).unwrap();
    RequestKey::new(&Method::GET, &url)
  }

  fn html(body: &str) -> Response {
    Response::new(200, Some("text/html"), body.as_bytes().to_vec())
  }

  fn backends() -> Vec<Box<dyn ResponseStore>> {
    vec![
      Box::new(SqliteResponseStore::open_in_memory(Some(1_000)).unwrap()),
      Box::new(MemoryResponseStore::new(Some(1_000))),
    ]
  }

  #[test]
  fn test_put_and_lookup() {
    for store in backends() {
      store.put("farm-v1", &key("/"), &html("home")).unwrap();

      assert_eq!(store.lookup("farm-v1", &key("/")).unwrap(), Some(html("home")));
      assert_eq!(store.lookup("farm-v1", &key("/other")).unwrap(), None);
      // Stores are isolated from each other
      assert_eq!(store.lookup("farm-v2", &key("/")).unwrap(), None);
    }
  }

  #[test]
  fn test_put_replaces_entry() {
    for store in backends() {
      store.put("farm-v1", &key("/"), &html("old")).unwrap();
      store.put("farm-v1", &key("/"), &html("new")).unwrap();
      assert_eq!(store.lookup("farm-v1", &key("/")).unwrap(), Some(html("new")));
    }
  }

  #[test]
  fn test_delete_store_removes_entries() {
    for store in backends() {
      store.put("farm-v1", &key("/"), &html("home")).unwrap();
      store.open("farm-v2").unwrap();
      assert_eq!(store.list_stores().unwrap(), vec!["farm-v1", "farm-v2"]);

      assert!(store.delete_store("farm-v1").unwrap());
      assert!(!store.delete_store("farm-v1").unwrap());
      assert_eq!(store.list_stores().unwrap(), vec!["farm-v2"]);
      assert_eq!(store.lookup("farm-v1", &key("/")).unwrap(), None);
    }
  }

  #[test]
  fn test_put_all() {
    for store in backends() {
      let entries = vec![(key("/"), html("home")), (key("/offline.html"), html("offline"))];
      store.put_all("farm-v1", &entries).unwrap();
      assert_eq!(
        store.lookup("farm-v1", &key("/offline.html")).unwrap(),
        Some(html("offline"))
      );
    }
  }

  #[test]
  fn test_estimate_counts_body_bytes() {
    for store in backends() {
      store.put("farm-v1", &key("/"), &html("12345")).unwrap();
      store.put("farm-v0", &key("/"), &html("123")).unwrap();
      let estimate = store.estimate().unwrap().unwrap();
      assert_eq!(estimate, StorageEstimate { usage: 8, quota: 1_000 });
    }
  }

  #[test]
  fn test_estimate_tracks_replace_and_delete() {
    for store in backends() {
      store.put("farm-v1", &key("/"), &html("12345")).unwrap();
      store.put("farm-v1", &key("/"), &html("12")).unwrap();
      store
        .put_all("farm-v0", &[(key("/"), html("123")), (key("/a"), html("4567"))])
        .unwrap();
      assert_eq!(store.estimate().unwrap().unwrap().usage, 9);

      store.delete_store("farm-v0").unwrap();
      assert_eq!(store.estimate().unwrap().unwrap().usage, 2);
    }
  }

  #[test]
  fn test_sqlite_usage_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");

    {
      let store = SqliteResponseStore::open_at(&path, Some(100)).unwrap();
      store.put("farm-v1", &key("/"), &html("home")).unwrap();
    }

    let store = SqliteResponseStore::open_at(&path, Some(100)).unwrap();
    assert_eq!(
      store.estimate().unwrap(),
      Some(StorageEstimate { usage: 4, quota: 100 })
    );
  }

  #[test]
  fn test_sqlite_lookup_on_read_only_database() {
    let store = SqliteResponseStore::open_in_memory(None).unwrap();
    store.put("farm-v1", &key("/offline.html"), &html("offline")).unwrap();
    store.conn().unwrap().execute_batch("PRAGMA query_only = ON").unwrap();

    assert_eq!(
      store.lookup("farm-v1", &key("/offline.html")).unwrap(),
      Some(html("offline"))
    );
  }

  #[test]
  fn test_estimate_unavailable_without_quota() {
    let store = MemoryResponseStore::new(None);
    assert_eq!(store.estimate().unwrap(), None);
  }

  #[test]
  fn test_sqlite_persists_across_connections() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");

    {
      let store = SqliteResponseStore::open_at(&path, None).unwrap();
      store.put("farm-v1", &key("/"), &html("home")).unwrap();
    }

    let store = SqliteResponseStore::open_at(&path, None).unwrap();
    assert_eq!(store.lookup("farm-v1", &key("/")).unwrap(), Some(html("home")));
  }

  #[test]
  fn test_usage_ratio() {
    let estimate = StorageEstimate { usage: 80, quota: 100 };
    assert!((estimate.usage_ratio() - 0.8).abs() < f64::EPSILON);
    assert_eq!(StorageEstimate { usage: 0, quota: 0 }.usage_ratio(), 1.0);
  }
}
