//! Farm client that keeps local snapshots in step with the server.

use chrono::{DateTime, NaiveDate, Utc};
use color_eyre::{eyre::eyre, Result};

use crate::cache::{CacheResult, CacheSource, Entity, EntityKind, ReconcileCache};

use super::breeding::{check_compatibility, BreedingRules, Compatibility, PregnancySchedule};
use super::client::FarmClient;
use super::types::{
  BreedingRecord, Hutch, NewBreeding, NewHutch, NewRabbit, NewRow, Rabbit, RemovalRecord,
  RemovalRequest, Row,
};

/// In-memory copy of one farm's collections.
#[derive(Debug, Clone, Default)]
pub struct FarmState {
  pub rabbits: Vec<Rabbit>,
  pub hutches: Vec<Hutch>,
  pub rows: Vec<Row>,
  pub removals: Vec<RemovalRecord>,
  pub breedings: Vec<BreedingRecord>,
}

impl FarmState {
  pub fn rabbit(&self, id: &str) -> Result<&Rabbit> {
    self
      .rabbits
      .iter()
      .find(|r| r.id == id)
      .ok_or_else(|| eyre!("Rabbit {} is not on this farm", id))
  }

  pub fn len(&self, kind: EntityKind) -> usize {
    match kind {
      EntityKind::Rabbits => self.rabbits.len(),
      EntityKind::Hutches => self.hutches.len(),
      EntityKind::Rows => self.rows.len(),
      EntityKind::Removals => self.removals.len(),
      EntityKind::Breedings => self.breedings.len(),
    }
  }
}

/// Summary of one collection sync.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
  pub kind: EntityKind,
  pub count: usize,
  pub source: CacheSource,
  pub saved_at: Option<DateTime<Utc>>,
  pub error: Option<String>,
}

impl SyncOutcome {
  fn new<T>(kind: EntityKind, result: &CacheResult<Vec<T>>) -> Self {
    Self {
      kind,
      count: result.data.len(),
      source: result.source,
      saved_at: result.saved_at,
      error: result.error.clone(),
    }
  }
}

/// Farm client with write-through snapshots.
///
/// Reads reconcile against the server and fall back to the last snapshot.
/// Writes reach the local state only after the server confirms them.
#[derive(Clone)]
pub struct CachedFarmClient {
  inner: FarmClient,
  cache: ReconcileCache,
  farm_id: String,
  rules: BreedingRules,
}

impl CachedFarmClient {
  pub fn new(
    inner: FarmClient,
    cache: ReconcileCache,
    farm_id: impl Into<String>,
    rules: BreedingRules,
  ) -> Self {
    Self {
      inner,
      cache,
      farm_id: farm_id.into(),
      rules,
    }
  }

  pub fn farm_id(&self) -> &str {
    &self.farm_id
  }

  /// Everything saved locally, without touching the network.
  pub fn load(&self) -> FarmState {
    FarmState {
      rabbits: self.cache.load(&self.farm_id),
      hutches: self.cache.load(&self.farm_id),
      rows: self.cache.load(&self.farm_id),
      removals: self.cache.load(&self.farm_id),
      breedings: self.cache.load(&self.farm_id),
    }
  }

  async fn reconcile_into<T, F, Fut>(&self, target: &mut Vec<T>, fetch: F) -> SyncOutcome
  where
    T: Entity,
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<Vec<T>>>,
  {
    let result = self.cache.reconcile(&self.farm_id, fetch).await;
    let outcome = SyncOutcome::new(T::kind(), &result);
    *target = result.data;
    outcome
  }

  /// Reconcile one collection and replace it in `state`.
  pub async fn sync(&self, kind: EntityKind, state: &mut FarmState) -> SyncOutcome {
    let farm = self.farm_id.as_str();
    let api = &self.inner;

    match kind {
      EntityKind::Rabbits => {
        self
          .reconcile_into(&mut state.rabbits, || api.list_rabbits(farm))
          .await
      }
      EntityKind::Hutches => {
        self
          .reconcile_into(&mut state.hutches, || api.list_hutches(farm))
          .await
      }
      EntityKind::Rows => {
        self
          .reconcile_into(&mut state.rows, || api.list_rows(farm))
          .await
      }
      EntityKind::Removals => {
        self
          .reconcile_into(&mut state.removals, || api.list_removals(farm))
          .await
      }
      EntityKind::Breedings => {
        self
          .reconcile_into(&mut state.breedings, || api.list_breedings(farm))
          .await
      }
    }
  }

  pub async fn sync_all(&self, state: &mut FarmState) -> Vec<SyncOutcome> {
    let mut outcomes = Vec::with_capacity(EntityKind::ALL.len());
    for kind in EntityKind::ALL {
      outcomes.push(self.sync(kind, state).await);
    }
    outcomes
  }

  pub async fn add_rabbit(&self, state: &mut FarmState, rabbit: NewRabbit) -> Result<Rabbit> {
    let remote = self.inner.create_rabbit(&self.farm_id, &rabbit);
    self
      .cache
      .create(&self.farm_id, &mut state.rabbits, remote)
      .await
  }

  pub async fn add_hutch(&self, state: &mut FarmState, hutch: NewHutch) -> Result<Hutch> {
    let remote = self.inner.create_hutch(&self.farm_id, &hutch);
    self
      .cache
      .create(&self.farm_id, &mut state.hutches, remote)
      .await
  }

  pub async fn add_row(&self, state: &mut FarmState, row: NewRow) -> Result<Row> {
    let remote = self.inner.create_row(&self.farm_id, &row);
    self.cache.create(&self.farm_id, &mut state.rows, remote).await
  }

  pub async fn delete_hutch(&self, state: &mut FarmState, hutch_id: &str) -> Result<()> {
    let remote = self.inner.delete_hutch(&self.farm_id, hutch_id);
    self
      .cache
      .remove(&self.farm_id, &mut state.hutches, hutch_id, remote)
      .await
  }

  pub async fn delete_row(&self, state: &mut FarmState, row_name: &str) -> Result<()> {
    let remote = self.inner.delete_row(&self.farm_id, row_name);
    self
      .cache
      .remove(&self.farm_id, &mut state.rows, row_name, remote)
      .await
  }

  /// Take a rabbit off the farm: it leaves the rabbit list and joins the
  /// removal history once the server has recorded it.
  pub async fn remove_rabbit(
    &self,
    state: &mut FarmState,
    rabbit_id: &str,
    removal: RemovalRequest,
  ) -> Result<RemovalRecord> {
    let remote = self.inner.remove_rabbit(&self.farm_id, rabbit_id, &removal);
    let record = self
      .cache
      .remove(&self.farm_id, &mut state.rabbits, rabbit_id, remote)
      .await?;

    self
      .cache
      .apply_confirmed_create(&self.farm_id, &mut state.removals, record.clone())
      .await;
    Ok(record)
  }

  /// Compatibility of two rabbits already loaded in `state`, with ages taken
  /// on `mating_date`.
  pub fn check_breeding(
    &self,
    state: &FarmState,
    doe_id: &str,
    buck_id: &str,
    mating_date: NaiveDate,
  ) -> Result<Compatibility> {
    let doe = state.rabbit(doe_id)?;
    let buck = state.rabbit(buck_id)?;
    Ok(check_compatibility(
      doe,
      buck,
      &state.rabbits,
      &self.rules,
      mating_date,
    ))
  }

  pub fn schedule(&self, mating_date: NaiveDate) -> PregnancySchedule {
    self.rules.schedule(mating_date)
  }

  /// Record a mating after checking the pair locally.
  pub async fn record_breeding(
    &self,
    state: &mut FarmState,
    doe_id: &str,
    buck_id: &str,
    mating_date: NaiveDate,
  ) -> Result<BreedingRecord> {
    let compatibility = self.check_breeding(state, doe_id, buck_id, mating_date)?;
    if !compatibility.is_compatible() {
      return Err(eyre!(
        "Cannot breed {} with {}: {}",
        doe_id,
        buck_id,
        compatibility.messages().join(", ")
      ));
    }

    let breeding = NewBreeding {
      doe_id: doe_id.to_string(),
      buck_id: buck_id.to_string(),
      mating_date,
      expected_birth_date: self.schedule(mating_date).expected_kindling,
    };
    let remote = self.inner.record_breeding(&self.farm_id, &breeding);
    self
      .cache
      .create(&self.farm_id, &mut state.breedings, remote)
      .await
  }
}
