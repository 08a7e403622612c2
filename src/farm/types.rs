use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
  Doe,
  Buck,
}

impl fmt::Display for Gender {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Gender::Doe => f.pad("doe"),
      Gender::Buck => f.pad("buck"),
    }
  }
}

/// A rabbit currently on the farm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rabbit {
  pub id: String,
  pub name: Option<String>,
  pub gender: Gender,
  pub breed: String,
  pub birth_date: NaiveDate,
  pub father_id: Option<String>,
  pub mother_id: Option<String>,
  pub hutch_id: Option<String>,
  pub is_pregnant: bool,
  pub pregnancy_start_date: Option<NaiveDate>,
  pub expected_birth_date: Option<NaiveDate>,
}

impl Rabbit {
  /// Recorded parent ids, father first
  pub fn parents(&self) -> impl Iterator<Item = &str> {
    self
      .father_id
      .as_deref()
      .into_iter()
      .chain(self.mother_id.as_deref())
  }

  pub fn label(&self) -> String {
    match &self.name {
      Some(name) => format!("{} ({})", name, self.id),
      None => self.id.clone(),
    }
  }
}

/// A hutch placed in a row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hutch {
  pub id: String,
  pub row_name: String,
  pub level: String,
  pub position: u32,
  pub size: Option<String>,
  pub material: Option<String>,
  pub features: Vec<String>,
  pub is_occupied: bool,
}

/// A row of hutches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
  pub name: String,
  pub description: Option<String>,
  pub capacity: u32,
  pub levels: Vec<String>,
}

/// A rabbit that left the farm (sold, died, culled, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemovalRecord {
  pub rabbit_id: String,
  pub reason: String,
  pub notes: Option<String>,
  pub date: NaiveDate,
  pub sale_amount: Option<f64>,
}

/// A recorded mating
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreedingRecord {
  pub id: String,
  pub doe_id: String,
  pub buck_id: String,
  pub mating_date: NaiveDate,
  pub expected_birth_date: NaiveDate,
  pub actual_birth_date: Option<NaiveDate>,
  pub number_of_kits: Option<u32>,
}

/// New rabbit as submitted to the API
#[derive(Debug, Clone, Serialize)]
pub struct NewRabbit {
  pub rabbit_id: String,
  pub name: Option<String>,
  pub gender: Gender,
  pub breed: String,
  pub birth_date: NaiveDate,
  pub father_id: Option<String>,
  pub mother_id: Option<String>,
  pub hutch_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewHutch {
  pub id: String,
  pub row_name: String,
  pub level: String,
  pub position: u32,
  pub size: Option<String>,
  pub material: Option<String>,
  pub features: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewRow {
  pub name: String,
  pub description: Option<String>,
  pub capacity: u32,
  pub levels: Vec<String>,
}

/// Body of a rabbit removal request
#[derive(Debug, Clone, Serialize)]
pub struct RemovalRequest {
  pub reason: String,
  pub notes: Option<String>,
  pub date: NaiveDate,
  pub sale_amount: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewBreeding {
  pub doe_id: String,
  pub buck_id: String,
  pub mating_date: NaiveDate,
  pub expected_birth_date: NaiveDate,
}
