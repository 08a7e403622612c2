//! Reconciliation layer: local snapshots kept in step with the remote API.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use super::retry::RetryPolicy;
use super::storage::SnapshotStorage;
use super::traits::{CacheResult, Entity};

/// Per-key async locks so read-modify-write on one snapshot is single-writer.
#[derive(Default)]
struct KeyLocks {
  locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyLocks {
  fn get(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
    let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
    locks.entry(key.to_string()).or_default().clone()
  }
}

/// A snapshot as loaded, with the version needed to write it back.
struct Loaded<T> {
  items: Vec<T>,
  /// None when the backend could not be read at all
  version: Option<u64>,
  saved_at: Option<DateTime<Utc>>,
}

/// Local snapshot store for farm collections.
///
/// Snapshots are write-through: they only ever hold data the server has
/// confirmed. Reads never fail; a missing, unreadable or corrupt snapshot is
/// an empty one.
pub struct ReconcileCache {
  storage: Arc<dyn SnapshotStorage>,
  retry: RetryPolicy,
  locks: Arc<KeyLocks>,
}

impl ReconcileCache {
  pub fn new(storage: Arc<dyn SnapshotStorage>) -> Self {
    Self {
      storage,
      retry: RetryPolicy::default(),
      locks: Arc::new(KeyLocks::default()),
    }
  }

  /// Set the retry policy used for every reconciliation fetch.
  pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
    self.retry = retry;
    self
  }

  fn load_key<T: Entity>(&self, key: &str) -> Loaded<T> {
    let snapshot = match self.storage.read(key) {
      Ok(Some(snapshot)) => snapshot,
      Ok(None) => {
        return Loaded {
          items: Vec::new(),
          version: Some(0),
          saved_at: None,
        }
      }
      Err(e) => {
        warn!("Failed to read snapshot {}: {}", key, e);
        return Loaded {
          items: Vec::new(),
          version: None,
          saved_at: None,
        };
      }
    };

    match serde_json::from_str(&snapshot.data) {
      Ok(items) => Loaded {
        items,
        version: Some(snapshot.version),
        saved_at: Some(snapshot.saved_at),
      },
      Err(e) => {
        warn!("Ignoring corrupt snapshot {}: {}", key, e);
        Loaded {
          items: Vec::new(),
          version: Some(snapshot.version),
          saved_at: None,
        }
      }
    }
  }

  fn write<T: Entity>(&self, key: &str, items: &[T], expected: Option<u64>) -> Result<u64> {
    let data = serde_json::to_string(items)
      .map_err(|e| eyre!("Failed to serialize snapshot {}: {}", key, e))?;
    self.storage.write(key, &data, expected)
  }

  /// Last saved snapshot for one farm, or empty.
  pub fn load<T: Entity>(&self, scope: &str) -> Vec<T> {
    self.load_key(&T::kind().snapshot_key(scope)).items
  }

  /// Replace the snapshot for one farm entirely.
  pub async fn save<T: Entity>(&self, scope: &str, items: &[T]) -> Result<()> {
    let key = T::kind().snapshot_key(scope);
    let lock = self.locks.get(&key);
    let _guard = lock.lock().await;

    self.write(&key, items, None)?;
    debug!("Saved {} {} to {}", items.len(), T::kind(), key);
    Ok(())
  }

  /// Fetch the authoritative collection and replace the snapshot with it.
  ///
  /// On success the snapshot is saved before the data is returned. When every
  /// attempt fails, the previous snapshot is returned together with the error.
  pub async fn reconcile<T, F, Fut>(&self, scope: &str, fetcher: F) -> CacheResult<Vec<T>>
  where
    T: Entity,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
  {
    let kind = T::kind();
    let label = format!("Fetching {} for farm {}", kind, scope);

    match self.retry.run(&label, fetcher).await {
      Ok(fresh) => {
        if let Err(e) = self.save(scope, &fresh).await {
          warn!("Failed to save {} snapshot: {}", kind, e);
        }
        CacheResult::from_network(fresh)
      }
      Err(e) => {
        let loaded = self.load_key::<T>(&kind.snapshot_key(scope));
        warn!(
          "Serving {} cached {} for farm {}: {}",
          loaded.items.len(),
          kind,
          scope,
          e
        );
        CacheResult::from_snapshot(loaded.items, loaded.saved_at, e.to_string())
      }
    }
  }

  /// Read-modify-write one snapshot under its key lock. Failures are logged;
  /// the snapshot is an optimization and the server already has the change.
  async fn update<T, C>(&self, scope: &str, change: C)
  where
    T: Entity,
    C: FnOnce(&mut Vec<T>),
  {
    let key = T::kind().snapshot_key(scope);
    let lock = self.locks.get(&key);
    let _guard = lock.lock().await;

    let loaded = self.load_key::<T>(&key);
    let version = match loaded.version {
      Some(version) => version,
      None => {
        warn!("Skipping update of unreadable snapshot {}", key);
        return;
      }
    };

    let mut items = loaded.items;
    change(&mut items);
    if let Err(e) = self.write(&key, &items, Some(version)) {
      warn!("Failed to update snapshot {}: {}", key, e);
    }
  }

  /// Record an entity the server has confirmed creating, in memory and in the
  /// snapshot. An entity with the same id is replaced rather than duplicated.
  pub async fn apply_confirmed_create<T: Entity>(&self, scope: &str, state: &mut Vec<T>, item: T) {
    upsert(state, item.clone());
    self.update::<T, _>(scope, |items| upsert(items, item)).await;
  }

  /// Drop an entity the server has confirmed removing, in memory and in the
  /// snapshot.
  pub async fn apply_confirmed_removal<T: Entity>(&self, scope: &str, state: &mut Vec<T>, id: &str) {
    state.retain(|e| e.entity_id() != id);
    self
      .update::<T, _>(scope, |items| items.retain(|e| e.entity_id() != id))
      .await;
  }

  /// Run a remote create and apply it locally only once it succeeds.
  pub async fn create<T, Fut>(&self, scope: &str, state: &mut Vec<T>, remote: Fut) -> Result<T>
  where
    T: Entity,
    Fut: Future<Output = Result<T>>,
  {
    let created = remote.await?;
    self
      .apply_confirmed_create(scope, state, created.clone())
      .await;
    Ok(created)
  }

  /// Run a remote removal and apply it locally only once it succeeds.
  pub async fn remove<T, R, Fut>(
    &self,
    scope: &str,
    state: &mut Vec<T>,
    id: &str,
    remote: Fut,
  ) -> Result<R>
  where
    T: Entity,
    Fut: Future<Output = Result<R>>,
  {
    let confirmation = remote.await?;
    self.apply_confirmed_removal(scope, state, id).await;
    Ok(confirmation)
  }
}

impl Clone for ReconcileCache {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      retry: self.retry,
      locks: Arc::clone(&self.locks),
    }
  }
}

fn upsert<T: Entity>(items: &mut Vec<T>, item: T) {
  let id = item.entity_id();
  match items.iter_mut().find(|e| e.entity_id() == id) {
    Some(existing) => *existing = item,
    None => items.push(item),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::{MemoryStorage, StoredSnapshot};
  use crate::cache::traits::{CacheSource, EntityKind};
  use serde::{Deserialize, Serialize};
  use std::sync::atomic::{AtomicU32, Ordering};

  #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
  struct Kit {
    id: String,
    name: String,
  }

  impl Entity for Kit {
    fn entity_id(&self) -> String {
      self.id.clone()
    }

    fn kind() -> EntityKind {
      EntityKind::Rabbits
    }
  }

  fn kit(id: &str) -> Kit {
    Kit {
      id: id.to_string(),
      name: format!("kit {}", id),
    }
  }

  fn cache() -> (ReconcileCache, Arc<MemoryStorage>) {
    let storage = Arc::new(MemoryStorage::new());
    (ReconcileCache::new(storage.clone()), storage)
  }

  /// Storage that refuses every operation.
  struct UnavailableStorage;

  impl SnapshotStorage for UnavailableStorage {
    fn read(&self, _key: &str) -> Result<Option<StoredSnapshot>> {
      Err(eyre!("storage disabled"))
    }

    fn write(&self, _key: &str, _data: &str, _expected: Option<u64>) -> Result<u64> {
      Err(eyre!("quota exceeded"))
    }
  }

  #[tokio::test]
  async fn test_load_missing_is_empty() {
    let (cache, _) = cache();
    assert!(cache.load::<Kit>("farm-1").is_empty());
  }

  #[tokio::test]
  async fn test_load_corrupt_is_empty() {
    let (cache, storage) = cache();
    storage
      .write("rabbit_farm_rabbits_farm-1", "{not json", None)
      .unwrap();
    assert!(cache.load::<Kit>("farm-1").is_empty());
  }

  #[tokio::test]
  async fn test_save_twice_is_idempotent() {
    let (cache, _) = cache();
    let items = vec![kit("a"), kit("b")];

    cache.save("farm-1", &items).await.unwrap();
    cache.save("farm-1", &items).await.unwrap();

    assert_eq!(cache.load::<Kit>("farm-1"), items);
  }

  #[tokio::test]
  async fn test_save_replaces_entirely() {
    let (cache, _) = cache();
    cache.save("farm-1", &[kit("a"), kit("b")]).await.unwrap();
    cache.save("farm-1", &[kit("c")]).await.unwrap();
    assert_eq!(cache.load::<Kit>("farm-1"), vec![kit("c")]);
  }

  #[tokio::test]
  async fn test_scopes_are_independent() {
    let (cache, _) = cache();
    cache.save("farm-1", &[kit("a")]).await.unwrap();
    assert!(cache.load::<Kit>("farm-2").is_empty());
  }

  #[tokio::test]
  async fn test_reconcile_saves_before_returning() {
    let (cache, storage) = cache();
    cache.save("farm-1", &[kit("stale")]).await.unwrap();

    let result = cache
      .reconcile("farm-1", || async { Ok(vec![kit("a"), kit("b")]) })
      .await;

    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(result.data, vec![kit("a"), kit("b")]);
    assert_eq!(cache.load::<Kit>("farm-1"), result.data);
    assert_eq!(
      storage
        .read("rabbit_farm_rabbits_farm-1")
        .unwrap()
        .unwrap()
        .version,
      2
    );
  }

  #[tokio::test(start_paused = true)]
  async fn test_reconcile_failure_serves_snapshot() {
    let (cache, _) = cache();
    cache.save("farm-1", &[kit("a")]).await.unwrap();

    let result = cache
      .reconcile::<Kit, _, _>("farm-1", || async { Err(eyre!("503 Service Unavailable")) })
      .await;

    assert_eq!(result.source, CacheSource::Snapshot);
    assert_eq!(result.data, vec![kit("a")]);
    assert!(result.saved_at.is_some());
    assert!(result.error.unwrap().contains("503"));
    assert_eq!(cache.load::<Kit>("farm-1"), vec![kit("a")]);
  }

  #[tokio::test(start_paused = true)]
  async fn test_reconcile_retries_once() {
    let (cache, _) = cache();
    let calls = Arc::new(AtomicU32::new(0));

    let result = cache
      .reconcile("farm-1", || {
        let calls = calls.clone();
        async move {
          if calls.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(eyre!("connection reset"))
          } else {
            Ok(vec![kit("a")])
          }
        }
      })
      .await;

    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(cache.load::<Kit>("farm-1"), vec![kit("a")]);
  }

  #[tokio::test]
  async fn test_reconcile_without_storage_still_returns_data() {
    let cache = ReconcileCache::new(Arc::new(UnavailableStorage));
    let result = cache
      .reconcile("farm-1", || async { Ok(vec![kit("a")]) })
      .await;
    assert_eq!(result.data, vec![kit("a")]);
    assert!(cache.load::<Kit>("farm-1").is_empty());
  }

  #[tokio::test]
  async fn test_create_persists_only_after_success() {
    let (cache, _) = cache();
    cache.save("farm-1", &[kit("a")]).await.unwrap();
    let mut state = cache.load::<Kit>("farm-1");

    let failed = cache
      .create("farm-1", &mut state, async { Err(eyre!("400 rabbit id taken")) })
      .await;
    assert!(failed.is_err());
    assert_eq!(state, vec![kit("a")]);
    assert_eq!(cache.load::<Kit>("farm-1"), vec![kit("a")]);

    let created = cache
      .create("farm-1", &mut state, async { Ok(kit("b")) })
      .await
      .unwrap();
    assert_eq!(created, kit("b"));
    assert_eq!(state, vec![kit("a"), kit("b")]);
    assert_eq!(cache.load::<Kit>("farm-1"), vec![kit("a"), kit("b")]);
  }

  #[tokio::test]
  async fn test_create_does_not_duplicate() {
    let (cache, _) = cache();
    cache.save("farm-1", &[kit("a")]).await.unwrap();
    let mut state = cache.load::<Kit>("farm-1");

    let renamed = Kit {
      id: "a".into(),
      name: "Clover".into(),
    };
    cache
      .apply_confirmed_create("farm-1", &mut state, renamed.clone())
      .await;

    assert_eq!(state, vec![renamed.clone()]);
    assert_eq!(cache.load::<Kit>("farm-1"), vec![renamed]);
  }

  #[tokio::test]
  async fn test_remove_only_after_confirmation() {
    let (cache, _) = cache();
    cache.save("farm-1", &[kit("a"), kit("b")]).await.unwrap();
    let mut state = cache.load::<Kit>("farm-1");

    let failed: Result<()> = cache
      .remove("farm-1", &mut state, "a", async { Err(eyre!("offline")) })
      .await;
    assert!(failed.is_err());
    assert_eq!(cache.load::<Kit>("farm-1").len(), 2);

    cache
      .remove("farm-1", &mut state, "a", async { Ok(()) })
      .await
      .unwrap();
    assert_eq!(state, vec![kit("b")]);
    assert_eq!(cache.load::<Kit>("farm-1"), vec![kit("b")]);
  }

  #[tokio::test]
  async fn test_concurrent_creates_do_not_lose_updates() {
    let (cache, _) = cache();
    cache.save::<Kit>("farm-1", &[]).await.unwrap();
    let mut left = Vec::new();
    let mut right = Vec::new();

    let (a, b) = tokio::join!(
      cache.create("farm-1", &mut left, async {
        tokio::task::yield_now().await;
        Ok(kit("a"))
      }),
      cache.create("farm-1", &mut right, async {
        tokio::task::yield_now().await;
        Ok(kit("b"))
      }),
    );
    a.unwrap();
    b.unwrap();

    let mut ids: Vec<String> = cache
      .load::<Kit>("farm-1")
      .into_iter()
      .map(|k| k.id)
      .collect();
    ids.sort();
    assert_eq!(ids, vec!["a", "b"]);
  }
}
