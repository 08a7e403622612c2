//! Farm records: API client, domain types, breeding rules and the
//! snapshot-backed client used by the application.

mod api_types;
mod breeding;
mod cache;
mod cached_client;
mod client;
mod types;

pub use breeding::BreedingRules;
pub use cached_client::{CachedFarmClient, FarmState, SyncOutcome};
pub use client::FarmClient;
pub use types::{Gender, NewHutch, NewRabbit, NewRow, RemovalRequest};
