//! Core traits and types for the reconciliation cache.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt;

/// The collections mirrored locally, one snapshot per farm each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
  Rabbits,
  Hutches,
  Rows,
  Removals,
  Breedings,
}

impl EntityKind {
  pub const ALL: [EntityKind; 5] = [
    EntityKind::Rabbits,
    EntityKind::Hutches,
    EntityKind::Rows,
    EntityKind::Removals,
    EntityKind::Breedings,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      EntityKind::Rabbits => "rabbits",
      EntityKind::Hutches => "hutches",
      EntityKind::Rows => "rows",
      EntityKind::Removals => "removals",
      EntityKind::Breedings => "breedings",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    Self::ALL
      .into_iter()
      .find(|k| k.as_str() == s.trim().to_lowercase())
  }

  /// Persisted key of the snapshot for this kind on one farm.
  pub fn snapshot_key(&self, scope: &str) -> String {
    format!("rabbit_farm_{}_{}", self.as_str(), scope)
  }
}

impl fmt::Display for EntityKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.pad(self.as_str())
  }
}

/// Trait for entities that can be mirrored in a local snapshot.
pub trait Entity: Clone + Send + Sync + Serialize + DeserializeOwned {
  /// Identifier the server uses for this entity (rabbit id, row name, ...)
  fn entity_id(&self) -> String;

  /// Which snapshot this entity lives in
  fn kind() -> EntityKind;
}

/// Result of a reconciliation, including where the data came from.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The data to render
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the snapshot was saved (if served from the snapshot)
  pub saved_at: Option<DateTime<Utc>>,
  /// Why the server could not be reached, if it could not
  pub error: Option<String>,
}

impl<T> CacheResult<T> {
  /// Fresh data confirmed by the server.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      saved_at: None,
      error: None,
    }
  }

  /// Last known snapshot, served because the server could not be reached.
  pub fn from_snapshot(data: T, saved_at: Option<DateTime<Utc>>, error: String) -> Self {
    Self {
      data,
      source: CacheSource::Snapshot,
      saved_at,
      error: Some(error),
    }
  }
}

/// Indicates where reconciled data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from the server
  Network,
  /// Local snapshot, possibly stale
  Snapshot,
}
