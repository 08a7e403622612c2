//! Client reconciliation cache.
//!
//! Keeps a local, per-farm snapshot of each server-held collection so data can
//! be shown instantly and while offline:
//! - snapshots are full-replace and only ever hold server-confirmed data
//! - reconciliation fetches share one bounded retry policy
//! - read-modify-write on a snapshot is serialized per key

mod layer;
mod retry;
mod storage;
mod traits;

pub use layer::ReconcileCache;
pub use retry::RetryPolicy;
pub use storage::{MemoryStorage, SnapshotStorage, SqliteStorage};
pub use traits::{CacheResult, CacheSource, Entity, EntityKind};
