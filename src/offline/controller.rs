//! The offline controller: install/activate lifecycle and per-request routing.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

use crate::event::LifecycleEvent;

use super::classify::{Classification, Classifier};
use super::clients::Clients;
use super::fallback;
use super::network::Network;
use super::notify::{
  ClickOutcome, LogNotifier, Notification, NotificationClick, Notifier, PushPayload, ACTION_DISMISS,
};
use super::request::{Destination, Request, RequestKey, Response};
use super::store::ResponseStore;

/// Static settings of one controller version.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
  /// Origin the application shell is served from
  pub origin: Url,
  /// Store names are `<prefix>-<version>`
  pub cache_prefix: String,
  pub version: String,
  /// Cached as a unit at install; any failure skips the whole phase
  pub essential: Vec<String>,
  /// Cached one by one at install; failures are skipped
  pub optional: Vec<String>,
  pub offline_page: String,
  /// Fraction of quota above which stale stores are purged before writes
  pub quota_threshold: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
  /// Created, nothing cached yet
  Parsed,
  Installed,
  Activated,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InstallReport {
  pub essential_cached: bool,
  pub essential_error: Option<String>,
  pub optional_cached: Vec<String>,
  pub optional_failed: Vec<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PurgeReport {
  pub deleted: Vec<String>,
  pub failed: Vec<String>,
}

/// Mediates every request the application makes.
///
/// The cache is only ever an optimization: each store operation is wrapped so
/// that a storage failure degrades to network-only behaviour.
pub struct OfflineController {
  settings: ControllerSettings,
  store: Arc<dyn ResponseStore>,
  network: Arc<dyn Network>,
  classifier: Classifier,
  clients: Arc<Mutex<Clients>>,
  notifier: Arc<dyn Notifier>,
  events: mpsc::UnboundedSender<LifecycleEvent>,
  state: Mutex<ControllerState>,
}

impl OfflineController {
  pub fn new(
    settings: ControllerSettings,
    store: Arc<dyn ResponseStore>,
    network: Arc<dyn Network>,
    clients: Arc<Mutex<Clients>>,
    events: mpsc::UnboundedSender<LifecycleEvent>,
  ) -> Self {
    Self {
      settings,
      store,
      network,
      classifier: Classifier::default(),
      clients,
      notifier: Arc::new(LogNotifier),
      events,
      state: Mutex::new(ControllerState::Parsed),
    }
  }

  pub fn with_classifier(mut self, classifier: Classifier) -> Self {
    self.classifier = classifier;
    self
  }

  pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
    self.notifier = notifier;
    self
  }

  pub fn version(&self) -> &str {
    &self.settings.version
  }

  /// Name of the store this version reads and writes.
  pub fn current_store(&self) -> String {
    format!("{}-{}", self.settings.cache_prefix, self.settings.version)
  }

  pub fn state(&self) -> ControllerState {
    *self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn set_state(&self, state: ControllerState) {
    *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
  }

  /// True when this version controls the open clients.
  pub fn is_controlling(&self) -> bool {
    let clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
    self.state() == ControllerState::Activated && clients.controller() == Some(self.version())
  }

  pub fn list_stores(&self) -> Result<Vec<String>> {
    self.store.list_stores()
  }

  fn url_for(&self, path: &str) -> Result<Url> {
    self
      .settings
      .origin
      .join(path)
      .map_err(|e| eyre!("Invalid asset path {}: {}", path, e))
  }

  fn offline_page_key(&self) -> Option<RequestKey> {
    let url = self.url_for(&self.settings.offline_page).ok()?;
    Some(RequestKey::new(&reqwest::Method::GET, &url))
  }

  /// Fetch a manifest entry; non-2xx answers count as failures.
  async fn fetch_asset(&self, path: &str) -> Result<(RequestKey, Response)> {
    let url = self.url_for(path)?;
    let request = Request::get(url, Destination::from_path(path));
    let key = request.key();
    let response = self.network.fetch(request).await?;
    if !response.is_success() {
      return Err(eyre!("{} returned status {}", path, response.status));
    }
    Ok((key, response))
  }

  /// Pre-populate the current store from the manifest.
  ///
  /// Always completes. The essential phase is all-or-nothing, the optional
  /// phase is best-effort per file.
  pub async fn install(&self) -> InstallReport {
    let store = self.current_store();
    let mut report = InstallReport::default();
    if let Err(e) = self.store.open(&store) {
      warn!("Failed to open cache store {}: {}", store, e);
    }

    let fetched = join_all(self.settings.essential.iter().map(|p| self.fetch_asset(p))).await;
    match fetched.into_iter().collect::<Result<Vec<_>>>() {
      Ok(entries) => {
        self.quota_guard();
        match self.store.put_all(&store, &entries) {
          Ok(()) => report.essential_cached = true,
          Err(e) => {
            warn!("Failed to cache essential files: {}", e);
            report.essential_error = Some(e.to_string());
          }
        }
      }
      Err(e) => {
        warn!("Skipping essential cache phase: {}", e);
        report.essential_error = Some(e.to_string());
      }
    }

    for path in &self.settings.optional {
      match self.fetch_asset(path).await {
        Ok((key, response)) => {
          if self.try_put(&key, &response) {
            report.optional_cached.push(path.clone());
          } else {
            report.optional_failed.push(path.clone());
          }
        }
        Err(e) => {
          debug!("Skipping optional asset {}: {}", path, e);
          report.optional_failed.push(path.clone());
        }
      }
    }

    self.set_state(ControllerState::Installed);
    info!(version = %self.version(), "offline controller installed");
    let _ = self.events.send(LifecycleEvent::Installed {
      version: self.version().to_string(),
    });

    let current = self
      .clients
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .controller()
      .map(String::from);
    if let Some(current) = current.filter(|c| c != self.version()) {
      let _ = self.events.send(LifecycleEvent::UpdateAvailable {
        current,
        next: self.version().to_string(),
      });
    }

    report
  }

  /// Delete every store but the current one, then take over all clients.
  pub async fn activate(&self) -> PurgeReport {
    let report = self.purge_stale_stores();

    let previous = self
      .clients
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .claim(self.version());
    self.set_state(ControllerState::Activated);

    info!(
      version = %self.version(),
      previous = previous.as_deref().unwrap_or("none"),
      deleted = report.deleted.len(),
      "offline controller activated"
    );
    let _ = self.events.send(LifecycleEvent::Activated {
      version: self.version().to_string(),
    });

    report
  }

  fn purge_stale_stores(&self) -> PurgeReport {
    let current = self.current_store();
    let mut report = PurgeReport::default();

    let names = match self.store.list_stores() {
      Ok(names) => names,
      Err(e) => {
        warn!("Failed to list cache stores: {}", e);
        return report;
      }
    };

    for name in names.into_iter().filter(|n| *n != current) {
      match self.store.delete_store(&name) {
        Ok(_) => {
          debug!("Deleted stale cache store {}", name);
          report.deleted.push(name);
        }
        Err(e) => {
          warn!("Failed to delete cache store {}: {}", name, e);
          report.failed.push(name);
        }
      }
    }

    report
  }

  /// Purge stale stores ahead of a write when usage is above the threshold.
  pub fn quota_guard(&self) -> Option<PurgeReport> {
    let estimate = match self.store.estimate() {
      Ok(Some(estimate)) => estimate,
      Ok(None) => return None,
      Err(e) => {
        warn!("Storage estimate unavailable: {}", e);
        return None;
      }
    };

    if estimate.usage_ratio() < self.settings.quota_threshold {
      return None;
    }

    warn!(
      usage = estimate.usage,
      quota = estimate.quota,
      "cache usage above threshold, purging stale stores"
    );
    Some(self.purge_stale_stores())
  }

  /// Best-effort write into the current store.
  fn try_put(&self, key: &RequestKey, response: &Response) -> bool {
    self.quota_guard();
    match self.store.put(&self.current_store(), key, response) {
      Ok(()) => true,
      Err(e) => {
        warn!("Failed to cache {}: {}", key.description(), e);
        false
      }
    }
  }

  /// Best-effort read from the current store.
  fn try_lookup(&self, key: &RequestKey) -> Option<Response> {
    match self.store.lookup(&self.current_store(), key) {
      Ok(found) => found,
      Err(e) => {
        warn!("Cache lookup failed for {}: {}", key.description(), e);
        None
      }
    }
  }

  /// Route a request.
  ///
  /// Cacheable requests always produce a response. Only requests this
  /// controller does not handle (uncontrolled, non-GET, excluded) can return
  /// the network's error.
  pub async fn handle(&self, request: Request) -> Result<Response> {
    if !self.is_controlling() {
      return self.network.fetch(request).await;
    }

    if let Classification::NotCacheable(skip) = self.classifier.classify(&request) {
      debug!(url = %request.url, %skip, "passthrough");
      return self.network.fetch(request).await;
    }

    match request.destination {
      Destination::Document => Ok(self.network_first(request).await),
      _ => Ok(self.cache_first(request).await),
    }
  }

  async fn network_first(&self, request: Request) -> Response {
    let key = request.key();

    match self.network.fetch(request).await {
      Ok(response) => {
        if response.is_success() {
          self.try_put(&key, &response);
        }
        response
      }
      Err(e) => {
        debug!("Navigation to {} failed, using fallback: {}", key.description(), e);
        if let Some(cached) = self.try_lookup(&key) {
          return cached;
        }
        if let Some(page) = self.offline_page_key().and_then(|k| self.try_lookup(&k)) {
          return page;
        }
        fallback::offline_document()
      }
    }
  }

  async fn cache_first(&self, request: Request) -> Response {
    let key = request.key();
    if let Some(cached) = self.try_lookup(&key) {
      return cached;
    }

    let destination = request.destination;
    match self.network.fetch(request).await {
      Ok(response) => {
        if response.status == 200 {
          self.try_put(&key, &response);
        }
        response
      }
      Err(e) => {
        debug!("Asset {} unavailable: {}", key.description(), e);
        fallback::degraded_asset(destination)
      }
    }
  }

  /// Decode and show a push message. Failures are dropped.
  pub fn handle_push(&self, payload: &[u8]) -> Option<Notification> {
    let payload: PushPayload = match serde_json::from_slice(payload) {
      Ok(payload) => payload,
      Err(e) => {
        debug!("Dropping undecodable push payload: {}", e);
        return None;
      }
    };

    let notification = Notification::from_payload(payload);
    if let Err(e) = self.notifier.show(&notification) {
      warn!("Failed to show notification: {}", e);
      return None;
    }
    Some(notification)
  }

  /// Route a notification click to a client window.
  pub fn handle_notification_click(&self, click: NotificationClick) -> ClickOutcome {
    if click.action.as_deref() == Some(ACTION_DISMISS) {
      return ClickOutcome::Dismissed;
    }

    let target = click.notification.url.as_deref().unwrap_or("/");
    let url = self
      .url_for(target)
      .map(String::from)
      .unwrap_or_else(|_| self.settings.origin.to_string());

    let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
    match clients.focus_matching(&url) {
      Some(client) => ClickOutcome::Focused { client, url },
      None => {
        let client = clients.open_window(&url);
        ClickOutcome::Opened { client, url }
      }
    }
  }
}

#[async_trait]
impl Network for OfflineController {
  async fn fetch(&self, request: Request) -> Result<Response> {
    self.handle(request).await
  }
}
