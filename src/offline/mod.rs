//! Offline cache controller.
//!
//! Sits underneath every HTTP request the application makes and decides, per
//! request, whether to answer from the network or from a durable, versioned
//! response store:
//! - navigations are network-first with an offline-page fallback chain
//! - subresources are cache-first with placeholder degradation
//! - stale store versions are purged on activation and under quota pressure

mod classify;
mod clients;
mod controller;
mod fallback;
mod network;
mod notify;
mod request;
mod store;

pub use classify::{Classifier, DEFAULT_EXCLUSIONS};
pub use clients::Clients;
pub use controller::{ControllerSettings, InstallReport, OfflineController, PurgeReport};
pub use network::{HttpNetwork, Network};
pub use notify::{ClickOutcome, Notification, NotificationClick, Notifier, PushPayload};
pub use request::{Destination, Request, Response};
pub use store::{MemoryResponseStore, ResponseStore, SqliteResponseStore};
