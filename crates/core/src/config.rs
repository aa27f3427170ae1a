//! Small JSON key-value config store (spec §4.11), grounded on the teacher's
//! `engram-core::config::Config` defaulting conventions but persisted as
//! JSON under the database directory instead of project-relative TOML.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

use crate::error::ConfigError;

pub const CONFIG_FILE_NAME: &str = "config.json";
const CONFIG_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CpuThrottle {
  Low,
  #[default]
  Medium,
  High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppSettings {
  pub cpu_throttle: CpuThrottle,
  pub exclude_patterns: Vec<String>,
}

impl Default for AppSettings {
  fn default() -> Self {
    Self {
      cpu_throttle: CpuThrottle::default(),
      exclude_patterns: vec![
        "node_modules".to_string(),
        ".git".to_string(),
        "target".to_string(),
      ],
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppConfig {
  pub version: u32,
  pub watched_folders: Vec<String>,
  pub settings: AppSettings,
  pub last_updated: String,
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      version: CONFIG_SCHEMA_VERSION,
      watched_folders: Vec::new(),
      settings: AppSettings::default(),
      last_updated: String::new(),
    }
  }
}

impl AppConfig {
  /// Loads config from `<db_dir>/config.json`. Corrupt or missing contents
  /// silently fall back to defaults; this never returns an error.
  pub async fn load(db_dir: &Path) -> Self {
    let path = db_dir.join(CONFIG_FILE_NAME);
    let contents = match tokio::fs::read_to_string(&path).await {
      Ok(c) => c,
      Err(e) => {
        debug!(path = %path.display(), error = %e, "no config file, using defaults");
        return Self::default();
      }
    };

    match serde_json::from_str::<serde_json::Value>(&contents) {
      Ok(raw) => Self::migrate(raw),
      Err(e) => {
        warn!(path = %path.display(), error = %e, "corrupt config, falling back to defaults");
        Self::default()
      }
    }
  }

  /// Fills any missing field from `AppConfig::default()` before strict
  /// deserialization, so old config files keep working across additive
  /// schema changes.
  pub fn migrate(raw: serde_json::Value) -> Self {
    let mut merged = serde_json::to_value(Self::default()).expect("default serializes");
    merge_json(&mut merged, raw);
    serde_json::from_value(merged).unwrap_or_default()
  }

  /// Atomically writes this config to `<db_dir>/config.json` (temp file +
  /// rename), matching the ledger's atomic-write discipline.
  pub async fn save(&self, db_dir: &Path) -> Result<(), ConfigError> {
    tokio::fs::create_dir_all(db_dir).await?;
    let path = db_dir.join(CONFIG_FILE_NAME);
    let tmp_path = db_dir.join(format!("{CONFIG_FILE_NAME}.tmp"));

    let body = serde_json::to_string_pretty(self)?;
    tokio::fs::write(&tmp_path, body).await?;
    tokio::fs::rename(&tmp_path, &path).await?;
    Ok(())
  }
}

/// Recursively overlays `overlay` onto `base`, keeping `base`'s keys for
/// anything `overlay` doesn't set.
fn merge_json(base: &mut serde_json::Value, overlay: serde_json::Value) {
  match (base, overlay) {
    (serde_json::Value::Object(base_map), serde_json::Value::Object(overlay_map)) => {
      for (key, value) in overlay_map {
        match base_map.get_mut(&key) {
          Some(existing) => merge_json(existing, value),
          None => {
            base_map.insert(key, value);
          }
        }
      }
    }
    (base_slot, overlay_value) => {
      *base_slot = overlay_value;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn missing_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = AppConfig::load(dir.path()).await;
    assert_eq!(config, AppConfig::default());
  }

  #[tokio::test]
  async fn corrupt_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    tokio::fs::write(dir.path().join(CONFIG_FILE_NAME), b"not json{{{")
      .await
      .unwrap();
    let config = AppConfig::load(dir.path()).await;
    assert_eq!(config, AppConfig::default());
  }

  #[tokio::test]
  async fn save_then_load_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = AppConfig::default();
    config.watched_folders.push("/home/user/docs".to_string());
    config.settings.cpu_throttle = CpuThrottle::High;

    config.save(dir.path()).await.unwrap();
    let loaded = AppConfig::load(dir.path()).await;
    assert_eq!(loaded, config);
  }

  #[test]
  fn migration_fills_missing_fields() {
    let partial = serde_json::json!({ "watchedFolders": ["/a"], "version": 1 });
    let config = AppConfig::migrate(partial);
    assert_eq!(config.watched_folders, vec!["/a".to_string()]);
    // Settings object was entirely absent: defaults fill it in.
    assert_eq!(config.settings.cpu_throttle, CpuThrottle::Medium);
  }
}
