//! Application context: everything a command needs, built once at startup.

use color_eyre::{eyre::eyre, Result};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use crate::cache::{MemoryStorage, ReconcileCache, SnapshotStorage, SqliteStorage};
use crate::config::Config;
use crate::event::LifecycleEvents;
use crate::farm::{CachedFarmClient, FarmClient};
use crate::offline::{
  Classifier, Clients, HttpNetwork, InstallReport, MemoryResponseStore, Network, Notifier,
  OfflineController, PurgeReport, ResponseStore, SqliteResponseStore,
};

const RESPONSES_DB: &str = "responses.db";
const SNAPSHOTS_DB: &str = "snapshots.db";

/// What `boot` did.
#[derive(Debug, Default)]
pub struct BootReport {
  /// Present when the current store had to be populated
  pub install: Option<InstallReport>,
  pub purge: PurgeReport,
}

pub struct AppContext {
  pub controller: Arc<OfflineController>,
  pub farm: CachedFarmClient,
  pub events: LifecycleEvents,
}

impl AppContext {
  /// Build the context over the real network.
  ///
  /// With `ephemeral` set, both stores live in memory and vanish on exit.
  pub fn new(config: Config, ephemeral: bool, notifier: Arc<dyn Notifier>) -> Result<Self> {
    let network = Arc::new(HttpNetwork::new()?);
    Self::with_network(config, ephemeral, network, notifier)
  }

  pub fn with_network(
    config: Config,
    ephemeral: bool,
    network: Arc<dyn Network>,
    notifier: Arc<dyn Notifier>,
  ) -> Result<Self> {
    let quota = config.offline.quota_bytes;
    let (responses, snapshots): (Arc<dyn ResponseStore>, Arc<dyn SnapshotStorage>) = if ephemeral {
      (
        Arc::new(MemoryResponseStore::new(quota)),
        Arc::new(MemoryStorage::new()),
      )
    } else {
      let dir = config.data_dir()?;
      (
        Arc::new(SqliteResponseStore::open_at(&dir.join(RESPONSES_DB), quota)?),
        Arc::new(SqliteStorage::open_at(&dir.join(SNAPSHOTS_DB))?),
      )
    };

    let api_url = config.api_url()?;
    let classifier = Classifier::new(config.offline.exclusions.as_slice(), Some(&api_url));
    let clients = Arc::new(Mutex::new(Clients::new()));
    let (tx, events) = LifecycleEvents::channel();

    let controller = Arc::new(
      OfflineController::new(
        config.controller_settings()?,
        responses,
        network,
        clients,
        tx,
      )
      .with_classifier(classifier)
      .with_notifier(notifier),
    );

    // API calls go through the controller, which passes them straight on
    let api = FarmClient::new(&config, controller.clone())?;
    let cache = ReconcileCache::new(snapshots).with_retry(config.sync.retry);
    let farm = CachedFarmClient::new(api, cache, config.farm_id.clone(), config.breeding.clone());

    Ok(Self {
      controller,
      farm,
      events,
    })
  }

  /// Bring the controller into service.
  ///
  /// Installs when the current store does not exist yet (or `force` is set),
  /// then activates.
  pub async fn boot(&self, force: bool) -> Result<BootReport> {
    let current = self.controller.current_store();
    let present = match self.controller.list_stores() {
      Ok(stores) => stores.contains(&current),
      Err(e) => {
        warn!("Cannot list cache stores, reinstalling: {}", e);
        false
      }
    };

    let install = if force || !present {
      let report = self.controller.install().await;
      if let Some(error) = &report.essential_error {
        info!("Installed without essential files: {}", error);
      }
      Some(report)
    } else {
      None
    };

    let purge = self.controller.activate().await;
    if !self.controller.is_controlling() {
      return Err(eyre!(
        "Offline controller {} failed to take control",
        self.controller.version()
      ));
    }

    Ok(BootReport { install, purge })
  }
}
