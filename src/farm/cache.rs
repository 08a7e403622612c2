//! Snapshot identity of each farm collection.

use crate::cache::{Entity, EntityKind};

use super::types::{BreedingRecord, Hutch, Rabbit, RemovalRecord, Row};

impl Entity for Rabbit {
  fn entity_id(&self) -> String {
    self.id.clone()
  }

  fn kind() -> EntityKind {
    EntityKind::Rabbits
  }
}

impl Entity for Hutch {
  fn entity_id(&self) -> String {
    self.id.clone()
  }

  fn kind() -> EntityKind {
    EntityKind::Hutches
  }
}

// Rows are addressed by name
impl Entity for Row {
  fn entity_id(&self) -> String {
    self.name.clone()
  }

  fn kind() -> EntityKind {
    EntityKind::Rows
  }
}

// A rabbit leaves the farm at most once
impl Entity for RemovalRecord {
  fn entity_id(&self) -> String {
    self.rabbit_id.clone()
  }

  fn kind() -> EntityKind {
    EntityKind::Removals
  }
}

impl Entity for BreedingRecord {
  fn entity_id(&self) -> String {
    self.id.clone()
  }

  fn kind() -> EntityKind {
    EntityKind::Breedings
  }
}
