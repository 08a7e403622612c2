//! Serde-deserializable types matching farm API responses.
//!
//! These are separate from the domain types so that every payload is checked
//! once at the boundary; a malformed record is rejected here instead of being
//! carried into snapshots.

use chrono::{DateTime, NaiveDate};
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;

use super::types::{BreedingRecord, Gender, Hutch, RemovalRecord, Rabbit, Row};

/// Envelope wrapping every API response.
#[derive(Debug, Deserialize)]
pub struct ApiEnvelope<T> {
  pub success: bool,
  pub data: Option<T>,
  pub message: Option<String>,
}

impl<T> ApiEnvelope<T> {
  /// Turn `success: false` into an error carrying the server's message.
  pub fn ensure_success(&self) -> Result<()> {
    if self.success {
      return Ok(());
    }
    Err(eyre!(
      "{}",
      self
        .message
        .as_deref()
        .unwrap_or("Request was not successful")
    ))
  }

  /// Unwrap the payload of a successful response.
  pub fn into_data(self) -> Result<T> {
    self.ensure_success()?;
    self
      .data
      .ok_or_else(|| eyre!("Response is missing its data field"))
  }
}

/// Conversion from a wire type into a validated domain type.
pub trait IntoDomain {
  type Output;

  fn into_domain(self) -> Result<Self::Output>;
}

impl<T: IntoDomain> IntoDomain for Vec<T> {
  type Output = Vec<T::Output>;

  fn into_domain(self) -> Result<Self::Output> {
    self.into_iter().map(IntoDomain::into_domain).collect()
  }
}

// ============================================================================
// Field helpers
// ============================================================================

/// Accepts `2024-03-01` as well as full RFC 3339 timestamps.
fn parse_date(field: &str, value: &str) -> Result<NaiveDate> {
  let value = value.trim();
  NaiveDate::parse_from_str(value, "%Y-%m-%d")
    .or_else(|_| DateTime::parse_from_rfc3339(value).map(|dt| dt.date_naive()))
    .map_err(|_| eyre!("Invalid {} '{}'", field, value))
}

fn parse_optional_date(field: &str, value: Option<String>) -> Result<Option<NaiveDate>> {
  match value.as_deref().map(str::trim) {
    None | Some("") => Ok(None),
    Some(v) => parse_date(field, v).map(Some),
  }
}

fn required(field: &str, value: String) -> Result<String> {
  let value = value.trim();
  if value.is_empty() {
    return Err(eyre!("Missing {}", field));
  }
  Ok(value.to_string())
}

/// Blank strings become None
fn optional(value: Option<String>) -> Option<String> {
  value
    .map(|v| v.trim().to_string())
    .filter(|v| !v.is_empty())
}

fn parse_gender(value: &str) -> Result<Gender> {
  match value.trim().to_lowercase().as_str() {
    "doe" | "female" | "f" => Ok(Gender::Doe),
    "buck" | "male" | "m" => Ok(Gender::Buck),
    other => Err(eyre!("Unknown gender '{}'", other)),
  }
}

// ============================================================================
// Rabbits
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiRabbit {
  pub rabbit_id: String,
  pub name: Option<String>,
  pub gender: String,
  #[serde(default)]
  pub breed: String,
  pub birth_date: String,
  pub father_id: Option<String>,
  pub mother_id: Option<String>,
  pub hutch_id: Option<String>,
  #[serde(default)]
  pub is_pregnant: Option<bool>,
  pub pregnancy_start_date: Option<String>,
  pub expected_birth_date: Option<String>,
}

impl IntoDomain for ApiRabbit {
  type Output = Rabbit;

  fn into_domain(self) -> Result<Rabbit> {
    let id = required("rabbit_id", self.rabbit_id)?;
    let context = |e: color_eyre::Report| eyre!("Rabbit {}: {}", id, e);

    Ok(Rabbit {
      name: optional(self.name),
      gender: parse_gender(&self.gender).map_err(context)?,
      breed: self.breed.trim().to_string(),
      birth_date: parse_date("birth_date", &self.birth_date).map_err(context)?,
      father_id: optional(self.father_id),
      mother_id: optional(self.mother_id),
      hutch_id: optional(self.hutch_id),
      is_pregnant: self.is_pregnant.unwrap_or(false),
      pregnancy_start_date: parse_optional_date("pregnancy_start_date", self.pregnancy_start_date)
        .map_err(context)?,
      expected_birth_date: parse_optional_date("expected_birth_date", self.expected_birth_date)
        .map_err(context)?,
      id,
    })
  }
}

// ============================================================================
// Hutches and rows
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiHutch {
  pub id: String,
  pub row_name: String,
  pub level: String,
  pub position: u32,
  pub size: Option<String>,
  pub material: Option<String>,
  #[serde(default)]
  pub features: Vec<String>,
  #[serde(default)]
  pub is_occupied: bool,
}

impl IntoDomain for ApiHutch {
  type Output = Hutch;

  fn into_domain(self) -> Result<Hutch> {
    Ok(Hutch {
      id: required("hutch id", self.id)?,
      row_name: required("row_name", self.row_name)?,
      level: required("level", self.level)?,
      position: self.position,
      size: optional(self.size),
      material: optional(self.material),
      features: self.features,
      is_occupied: self.is_occupied,
    })
  }
}

#[derive(Debug, Deserialize)]
pub struct ApiRow {
  pub name: String,
  pub description: Option<String>,
  pub capacity: u32,
  #[serde(default)]
  pub levels: Vec<String>,
}

impl IntoDomain for ApiRow {
  type Output = Row;

  fn into_domain(self) -> Result<Row> {
    Ok(Row {
      name: required("row name", self.name)?,
      description: optional(self.description),
      capacity: self.capacity,
      levels: self.levels,
    })
  }
}

// ============================================================================
// Removals and breeding
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiRemoval {
  pub rabbit_id: String,
  pub reason: String,
  pub notes: Option<String>,
  pub date: String,
  pub sale_amount: Option<f64>,
}

impl IntoDomain for ApiRemoval {
  type Output = RemovalRecord;

  fn into_domain(self) -> Result<RemovalRecord> {
    if let Some(amount) = self.sale_amount {
      if !amount.is_finite() || amount < 0.0 {
        return Err(eyre!("Invalid sale_amount {}", amount));
      }
    }

    Ok(RemovalRecord {
      rabbit_id: required("rabbit_id", self.rabbit_id)?,
      reason: required("reason", self.reason)?,
      notes: optional(self.notes),
      date: parse_date("date", &self.date)?,
      sale_amount: self.sale_amount,
    })
  }
}

#[derive(Debug, Deserialize)]
pub struct ApiBreeding {
  pub id: serde_json::Value,
  pub doe_id: String,
  pub buck_id: String,
  pub mating_date: String,
  pub expected_birth_date: String,
  pub actual_birth_date: Option<String>,
  pub number_of_kits: Option<u32>,
}

impl IntoDomain for ApiBreeding {
  type Output = BreedingRecord;

  fn into_domain(self) -> Result<BreedingRecord> {
    // Ids arrive as either numbers or strings
    let id = match self.id {
      serde_json::Value::String(s) => s,
      serde_json::Value::Number(n) => n.to_string(),
      other => return Err(eyre!("Invalid breeding id {}", other)),
    };

    Ok(BreedingRecord {
      id: required("breeding id", id)?,
      doe_id: required("doe_id", self.doe_id)?,
      buck_id: required("buck_id", self.buck_id)?,
      mating_date: parse_date("mating_date", &self.mating_date)?,
      expected_birth_date: parse_date("expected_birth_date", &self.expected_birth_date)?,
      actual_birth_date: parse_optional_date("actual_birth_date", self.actual_birth_date)?,
      number_of_kits: self.number_of_kits,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn rabbits(json: &str) -> Result<Vec<Rabbit>> {
    let envelope: ApiEnvelope<Vec<ApiRabbit>> = serde_json::from_str(json)?;
    envelope.into_data()?.into_domain()
  }

  #[test]
  fn test_rabbit_envelope() {
    let list = rabbits(
      r#"{"success":true,"data":[{
        "rabbit_id":"RB-001","name":"Clover","gender":"female","breed":"New Zealand White",
        "birth_date":"2024-01-15T00:00:00.000Z","father_id":"RB-000","mother_id":"",
        "hutch_id":"A1","is_pregnant":true,"pregnancy_start_date":"2024-09-01",
        "expected_birth_date":null
      }]}"#,
    )
    .unwrap();

    let clover = &list[0];
    assert_eq!(clover.id, "RB-001");
    assert_eq!(clover.gender, Gender::Doe);
    assert_eq!(clover.birth_date, NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
    assert_eq!(clover.father_id.as_deref(), Some("RB-000"));
    assert_eq!(clover.mother_id, None);
    assert!(clover.is_pregnant);
    assert_eq!(
      clover.pregnancy_start_date,
      NaiveDate::from_ymd_opt(2024, 9, 1)
    );
  }

  #[test]
  fn test_unsuccessful_envelope_surfaces_message() {
    let err = rabbits(r#"{"success":false,"message":"Farm not found"}"#).unwrap_err();
    assert_eq!(err.to_string(), "Farm not found");
  }

  #[test]
  fn test_missing_data_is_rejected() {
    assert!(rabbits(r#"{"success":true}"#).is_err());
  }

  #[test]
  fn test_malformed_rabbit_is_rejected() {
    let err = rabbits(
      r#"{"success":true,"data":[{"rabbit_id":"RB-9","gender":"unknown","birth_date":"2024-01-01"}]}"#,
    )
    .unwrap_err();
    assert!(err.to_string().contains("RB-9"));

    assert!(rabbits(
      r#"{"success":true,"data":[{"rabbit_id":"  ","gender":"buck","birth_date":"2024-01-01"}]}"#
    )
    .is_err());
    assert!(rabbits(
      r#"{"success":true,"data":[{"rabbit_id":"RB-1","gender":"buck","birth_date":"soon"}]}"#
    )
    .is_err());
  }

  #[test]
  fn test_breeding_numeric_id() {
    let envelope: ApiEnvelope<ApiBreeding> = serde_json::from_str(
      r#"{"success":true,"data":{"id":17,"doe_id":"D1","buck_id":"B1",
        "mating_date":"2024-05-01","expected_birth_date":"2024-06-01"}}"#,
    )
    .unwrap();
    let record = envelope.into_data().unwrap().into_domain().unwrap();
    assert_eq!(record.id, "17");
    assert_eq!(record.actual_birth_date, None);
  }

  #[test]
  fn test_negative_sale_amount_rejected() {
    let removal = ApiRemoval {
      rabbit_id: "RB-1".into(),
      reason: "sold".into(),
      notes: None,
      date: "2024-05-01".into(),
      sale_amount: Some(-5.0),
    };
    assert!(removal.into_domain().is_err());
  }
}
