use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use crate::cache::RetryPolicy;
use crate::farm::BreedingRules;
use crate::offline::{ControllerSettings, DEFAULT_EXCLUSIONS};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  /// Farm whose records are synced
  pub farm_id: String,
  #[serde(default)]
  pub app: AppConfig,
  #[serde(default)]
  pub offline: OfflineConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub breeding: BreedingRules,
  /// Write logs here instead of stderr
  pub log_file: Option<PathBuf>,
  /// Where the SQLite stores live (defaults to the XDG data dir)
  pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
  /// Origin the web app is served from
  pub origin: String,
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      origin: "http://localhost:3000".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OfflineConfig {
  pub cache_prefix: String,
  /// Bump to roll out a new store; older stores are purged on activation
  pub version: String,
  pub essential: Vec<String>,
  pub optional: Vec<String>,
  pub offline_page: String,
  pub quota_threshold: f64,
  /// Capacity of the response store in bytes; no quota checks when unset
  pub quota_bytes: Option<u64>,
  /// Path patterns never cached (`/api/*`, `*.map`, `*webpack*`, exact paths)
  pub exclusions: Vec<String>,
}

impl Default for OfflineConfig {
  fn default() -> Self {
    Self {
      cache_prefix: "rabbit-farm".to_string(),
      version: "v1".to_string(),
      essential: vec![
        "/".to_string(),
        "/offline.html".to_string(),
        "/icons/icon-192x192.png".to_string(),
      ],
      optional: vec![
        "/manifest.json".to_string(),
        "/icons/icon-512x512.png".to_string(),
        "/icons/badge-72x72.png".to_string(),
      ],
      offline_page: "/offline.html".to_string(),
      quota_threshold: 0.8,
      quota_bytes: Some(50 * 1024 * 1024),
      exclusions: DEFAULT_EXCLUSIONS.iter().map(|s| s.to_string()).collect(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncConfig {
  #[serde(default)]
  pub retry: RetryPolicy,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./warren.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/warren/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/warren/config.yaml\n\
                 See warren.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("warren.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("warren").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config =
      serde_yaml::from_str(contents).map_err(|e| eyre!("Failed to parse config: {}", e))?;

    if config.farm_id.trim().is_empty() {
      return Err(eyre!("farm_id must not be empty"));
    }
    if !(0.0..=1.0).contains(&config.offline.quota_threshold) {
      return Err(eyre!(
        "offline.quota_threshold must be between 0 and 1, got {}",
        config.offline.quota_threshold
      ));
    }

    Ok(config)
  }

  /// Get the farm API token from the environment.
  pub fn get_api_token() -> Result<String> {
    std::env::var("WARREN_API_TOKEN")
      .map_err(|_| eyre!("API token not found. Set WARREN_API_TOKEN environment variable."))
  }

  pub fn api_url(&self) -> Result<Url> {
    Url::parse(&self.api.url).map_err(|e| eyre!("Invalid api.url {}: {}", self.api.url, e))
  }

  /// Directory holding the durable stores.
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.data_dir {
      return Ok(dir.clone());
    }
    dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .map(|p| p.join("warren"))
      .ok_or_else(|| eyre!("Could not determine data directory"))
  }

  pub fn controller_settings(&self) -> Result<ControllerSettings> {
    let origin = Url::parse(&self.app.origin)
      .map_err(|e| eyre!("Invalid app.origin {}: {}", self.app.origin, e))?;

    Ok(ControllerSettings {
      origin,
      cache_prefix: self.offline.cache_prefix.clone(),
      version: self.offline.version.clone(),
      essential: self.offline.essential.clone(),
      optional: self.offline.optional.clone(),
      offline_page: self.offline.offline_page.clone(),
      quota_threshold: self.offline.quota_threshold,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::parse(
      "api:\n  url: https://api.farm.example/v1/\nfarm_id: farm-1\n",
    )
    .unwrap();

    assert_eq!(config.farm_id, "farm-1");
    assert_eq!(config.offline.cache_prefix, "rabbit-farm");
    assert_eq!(config.offline.quota_threshold, 0.8);
    assert!(config.offline.exclusions.iter().any(|e| e == "*.map"));
    assert_eq!(config.sync.retry, RetryPolicy::default());
    assert_eq!(config.breeding.gestation_days, 31);
    assert!(config.log_file.is_none());

    let settings = config.controller_settings().unwrap();
    assert_eq!(settings.origin.as_str(), "http://localhost:3000/");
    assert_eq!(settings.version, "v1");
  }

  #[test]
  fn test_sections_override_defaults() {
    let config = Config::parse(
      r#"
api:
  url: https://api.farm.example/
farm_id: north
app:
  origin: https://farm.example
offline:
  version: v7
  quota_threshold: 0.5
  exclusions: ["/admin/*"]
sync:
  retry:
    max_attempts: 4
breeding:
  gestation_days: 30
  maturity_months:
    rex: 5
log_file: /tmp/warren.log
"#,
    )
    .unwrap();

    assert_eq!(config.offline.version, "v7");
    // Unlisted fields in a section keep their defaults
    assert_eq!(config.offline.offline_page, "/offline.html");
    assert_eq!(config.offline.exclusions, vec!["/admin/*"]);
    assert_eq!(config.sync.retry.max_attempts, 4);
    assert_eq!(config.sync.retry.backoff_secs, 2);
    assert_eq!(config.breeding.gestation_days, 30);
    assert_eq!(config.breeding.maturity_months_for("Rex"), 5);
    // Built-in breeds survive a partial override
    assert_eq!(config.breeding.maturity_months_for("Dutch"), 4);
    assert_eq!(config.breeding.maturity_months_for("Flemish Giant"), 8);
    assert_eq!(config.log_file, Some(PathBuf::from("/tmp/warren.log")));
  }

  #[test]
  fn test_rejects_bad_threshold() {
    let err = Config::parse(
      "api:\n  url: https://a.example/\nfarm_id: f\noffline:\n  quota_threshold: 1.5\n",
    )
    .unwrap_err();
    assert!(err.to_string().contains("quota_threshold"));
  }

  #[test]
  fn test_missing_farm_id() {
    assert!(Config::parse("api:\n  url: https://a.example/\n").is_err());
    assert!(Config::parse("api:\n  url: https://a.example/\nfarm_id: ' '\n").is_err());
  }

  #[test]
  fn test_explicit_path_must_exist() {
    let err = Config::load(Some(Path::new("/nonexistent/warren.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }

  #[test]
  fn test_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("warren.yaml");
    std::fs::write(&path, "api:\n  url: https://a.example/\nfarm_id: f9\n").unwrap();
    assert_eq!(Config::load(Some(&path)).unwrap().farm_id, "f9");
  }
}
