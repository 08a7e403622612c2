//! Breeding compatibility and pregnancy dates.
//!
//! Everything here is pure and works on the rabbits already loaded in memory.

use chrono::{Days, Months, NaiveDate};
use serde::Deserialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

use super::types::{Gender, Rabbit};

/// Days between the expected kindling date and putting in the nest box.
pub const NEST_BOX_LEAD_DAYS: u64 = 3;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BreedingRules {
  pub gestation_days: u64,
  /// Age at which a rabbit of an unlisted breed can be bred
  pub default_maturity_months: u32,
  /// Maturity age per breed, keyed by lowercase breed name. Configured
  /// entries are layered over the built-in ones.
  #[serde(deserialize_with = "deserialize_maturity_months")]
  pub maturity_months: HashMap<String, u32>,
}

fn breed_key(breed: &str) -> String {
  breed.trim().to_lowercase()
}

fn builtin_maturity_months() -> HashMap<String, u32> {
  [
    ("dutch", 4),
    ("new zealand white", 5),
    ("californian", 5),
    ("flemish giant", 8),
  ]
  .into_iter()
  .map(|(breed, months)| (breed.to_string(), months))
  .collect()
}

fn deserialize_maturity_months<'de, D>(deserializer: D) -> Result<HashMap<String, u32>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let configured: HashMap<String, u32> = HashMap::deserialize(deserializer)?;
  let mut merged = builtin_maturity_months();
  merged.extend(
    configured
      .into_iter()
      .map(|(breed, months)| (breed_key(&breed), months)),
  );
  Ok(merged)
}

impl Default for BreedingRules {
  fn default() -> Self {
    Self {
      gestation_days: 31,
      default_maturity_months: 6,
      maturity_months: builtin_maturity_months(),
    }
  }
}

impl BreedingRules {
  pub fn maturity_months_for(&self, breed: &str) -> u32 {
    self
      .maturity_months
      .get(&breed_key(breed))
      .copied()
      .unwrap_or(self.default_maturity_months)
  }

  /// First day the rabbit is old enough to breed.
  pub fn mature_on(&self, rabbit: &Rabbit) -> NaiveDate {
    let months = self.maturity_months_for(&rabbit.breed);
    rabbit
      .birth_date
      .checked_add_months(Months::new(months))
      .unwrap_or(NaiveDate::MAX)
  }

  pub fn schedule(&self, mating_date: NaiveDate) -> PregnancySchedule {
    let expected_kindling = mating_date
      .checked_add_days(Days::new(self.gestation_days))
      .unwrap_or(NaiveDate::MAX);
    let nest_box = expected_kindling
      .checked_sub_days(Days::new(NEST_BOX_LEAD_DAYS))
      .unwrap_or(mating_date);

    PregnancySchedule {
      mating_date,
      expected_kindling,
      nest_box,
    }
  }
}

/// Key dates of one pregnancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PregnancySchedule {
  pub mating_date: NaiveDate,
  pub expected_kindling: NaiveDate,
  pub nest_box: NaiveDate,
}

impl PregnancySchedule {
  /// Days left until kindling; negative once the date has passed.
  pub fn days_remaining(&self, today: NaiveDate) -> i64 {
    (self.expected_kindling - today).num_days()
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Kinship {
  /// `ancestor` appears in the recorded lineage of `descendant`
  Ancestor { ancestor: String, descendant: String },
  SharedParent(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incompatibility {
  Inbreeding(Kinship),
  SexMismatch,
  DoePregnant,
  Immature { rabbit_id: String, ready_on: NaiveDate },
}

impl fmt::Display for Incompatibility {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Incompatibility::Inbreeding(_) => f.write_str("inbreeding"),
      Incompatibility::SexMismatch => f.write_str("pair must be a doe and a buck"),
      Incompatibility::DoePregnant => f.write_str("doe is already pregnant"),
      Incompatibility::Immature { rabbit_id, ready_on } => {
        write!(f, "{} is too young to breed until {}", rabbit_id, ready_on)
      }
    }
  }
}

/// Outcome of a compatibility check.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Compatibility {
  /// Every reason the pair cannot be bred; inbreeding always comes first
  pub reasons: Vec<Incompatibility>,
}

impl Compatibility {
  pub fn is_compatible(&self) -> bool {
    self.reasons.is_empty()
  }

  /// Reasons as display strings
  pub fn messages(&self) -> Vec<String> {
    self.reasons.iter().map(ToString::to_string).collect()
  }
}

/// True if `candidate` appears anywhere in the recorded lineage of `rabbit`.
///
/// Parents missing from `herd` (sold, deceased) still match by id, but their
/// own lineage is unknown.
pub fn is_ancestor(candidate: &str, rabbit: &Rabbit, herd: &[Rabbit]) -> bool {
  let by_id: HashMap<&str, &Rabbit> = herd.iter().map(|r| (r.id.as_str(), r)).collect();
  let mut visited: HashSet<&str> = HashSet::new();
  let mut queue: VecDeque<&str> = rabbit.parents().collect();

  while let Some(id) = queue.pop_front() {
    if id == candidate {
      return true;
    }
    // Guards against cycles in bad data
    if !visited.insert(id) {
      continue;
    }
    if let Some(parent) = by_id.get(id) {
      queue.extend(parent.parents());
    }
  }
  false
}

fn kinship(doe: &Rabbit, buck: &Rabbit, herd: &[Rabbit]) -> Option<Kinship> {
  if is_ancestor(&doe.id, buck, herd) {
    return Some(Kinship::Ancestor {
      ancestor: doe.id.clone(),
      descendant: buck.id.clone(),
    });
  }
  if is_ancestor(&buck.id, doe, herd) {
    return Some(Kinship::Ancestor {
      ancestor: buck.id.clone(),
      descendant: doe.id.clone(),
    });
  }

  let doe_parents: HashSet<&str> = doe.parents().collect();
  buck
    .parents()
    .find(|p| doe_parents.contains(p))
    .map(|p| Kinship::SharedParent(p.to_string()))
}

/// Check whether `doe` and `buck` can be bred on `mating_date`.
pub fn check_compatibility(
  doe: &Rabbit,
  buck: &Rabbit,
  herd: &[Rabbit],
  rules: &BreedingRules,
  mating_date: NaiveDate,
) -> Compatibility {
  let mut reasons = Vec::new();

  if let Some(kin) = kinship(doe, buck, herd) {
    reasons.push(Incompatibility::Inbreeding(kin));
  }
  if doe.gender != Gender::Doe || buck.gender != Gender::Buck || doe.id == buck.id {
    reasons.push(Incompatibility::SexMismatch);
  }
  if doe.is_pregnant {
    reasons.push(Incompatibility::DoePregnant);
  }
  for rabbit in [doe, buck] {
    let ready_on = rules.mature_on(rabbit);
    if mating_date < ready_on {
      reasons.push(Incompatibility::Immature {
        rabbit_id: rabbit.id.clone(),
        ready_on,
      });
    }
  }

  Compatibility { reasons }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
  }

  fn rabbit(id: &str, gender: Gender, father: Option<&str>, mother: Option<&str>) -> Rabbit {
    Rabbit {
      id: id.to_string(),
      name: None,
      gender,
      breed: "New Zealand White".to_string(),
      birth_date: date(2023, 1, 1),
      father_id: father.map(String::from),
      mother_id: mother.map(String::from),
      hutch_id: None,
      is_pregnant: false,
      pregnancy_start_date: None,
      expected_birth_date: None,
    }
  }

  fn today() -> NaiveDate {
    date(2024, 6, 1)
  }

  #[test]
  fn test_unrelated_adults_are_compatible() {
    let doe = rabbit("D1", Gender::Doe, Some("B0"), Some("D0"));
    let buck = rabbit("B1", Gender::Buck, Some("B9"), Some("D9"));
    let result = check_compatibility(&doe, &buck, &[], &BreedingRules::default(), today());
    assert!(result.is_compatible());
  }

  #[test]
  fn test_shared_parent_is_inbreeding() {
    let doe = rabbit("D1", Gender::Doe, Some("B0"), Some("D0"));
    let buck = rabbit("B1", Gender::Buck, Some("B0"), Some("D7"));
    let result = check_compatibility(
      &doe,
      &buck,
      &[doe.clone(), buck.clone()],
      &BreedingRules::default(),
      today(),
    );

    assert_eq!(
      result.reasons,
      vec![Incompatibility::Inbreeding(Kinship::SharedParent("B0".into()))]
    );
    assert_eq!(result.messages(), vec!["inbreeding"]);
  }

  #[test]
  fn test_grandparent_is_ancestor() {
    let grandsire = rabbit("B0", Gender::Buck, None, None);
    let dam = rabbit("D0", Gender::Doe, Some("B0"), None);
    let doe = rabbit("D1", Gender::Doe, Some("B5"), Some("D0"));
    let herd = vec![grandsire.clone(), dam, doe.clone()];

    assert!(is_ancestor("B0", &doe, &herd));
    assert!(!is_ancestor("B5", &grandsire, &herd));

    let result = check_compatibility(&doe, &grandsire, &herd, &BreedingRules::default(), today());
    assert_eq!(
      result.reasons[0],
      Incompatibility::Inbreeding(Kinship::Ancestor {
        ancestor: "B0".into(),
        descendant: "D1".into(),
      })
    );
  }

  #[test]
  fn test_lineage_cycle_terminates() {
    let a = rabbit("A", Gender::Doe, Some("B"), None);
    let b = rabbit("B", Gender::Buck, Some("A"), None);
    let herd = vec![a.clone(), b];
    assert!(!is_ancestor("Z", &a, &herd));
  }

  #[test]
  fn test_inbreeding_listed_first() {
    let mut doe = rabbit("D1", Gender::Doe, Some("B0"), None);
    doe.is_pregnant = true;
    doe.birth_date = date(2024, 5, 1);
    let buck = rabbit("B1", Gender::Buck, Some("B0"), None);

    let result = check_compatibility(&doe, &buck, &[], &BreedingRules::default(), today());
    assert!(matches!(result.reasons[0], Incompatibility::Inbreeding(_)));
    assert!(result.reasons.contains(&Incompatibility::DoePregnant));
    assert!(result.reasons.contains(&Incompatibility::Immature {
      rabbit_id: "D1".into(),
      ready_on: date(2024, 10, 1),
    }));
  }

  #[test]
  fn test_same_sex_pair_rejected() {
    let a = rabbit("D1", Gender::Doe, None, None);
    let b = rabbit("D2", Gender::Doe, None, None);
    let result = check_compatibility(&a, &b, &[], &BreedingRules::default(), today());
    assert_eq!(result.reasons, vec![Incompatibility::SexMismatch]);
  }

  #[test]
  fn test_maturity_by_breed() {
    let rules = BreedingRules::default();
    assert_eq!(rules.maturity_months_for("Flemish Giant"), 8);
    assert_eq!(rules.maturity_months_for("Rex"), 6);

    let mut dutch = rabbit("D1", Gender::Doe, None, None);
    dutch.breed = "Dutch".into();
    dutch.birth_date = date(2023, 10, 31);
    // Clamped to the last day of February
    assert_eq!(rules.mature_on(&dutch), date(2024, 2, 29));
  }

  #[test]
  fn test_configured_maturity_merges_over_builtins() {
    let rules: BreedingRules =
      serde_yaml::from_str("maturity_months:\n  Rex: 5\n  \"Dutch \": 3\n").unwrap();
    assert_eq!(rules.maturity_months_for("rex"), 5);
    assert_eq!(rules.maturity_months_for("Dutch"), 3);
    assert_eq!(rules.maturity_months_for("New Zealand White"), 5);
    assert_eq!(rules.maturity_months_for("Lionhead"), 6);
  }

  #[test]
  fn test_pregnancy_schedule() {
    let schedule = BreedingRules::default().schedule(date(2024, 3, 1));
    assert_eq!(schedule.expected_kindling, date(2024, 4, 1));
    assert_eq!(schedule.nest_box, date(2024, 3, 29));
    assert_eq!(schedule.days_remaining(date(2024, 3, 22)), 10);
    assert_eq!(schedule.days_remaining(date(2024, 4, 3)), -2);
  }
}
