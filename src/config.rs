//! Configuration management for the scanning service.
//!
//! Settings are read from `minewd/config.toml` under the user's config
//! directory; a file with defaults is written on first start.

use std::{env, fs, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
   bluetooth::{adapter::ScanOptions, tracker::DEFAULT_MIN_INTERVAL},
   error::{Result, ScanError},
   permissions::store::{self, PermissionStore},
};

/// Main configuration structure for the service.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Config {
   /// Minimum time between two accepted reports of the same device.
   #[serde(default = "default_min_report_interval")]
   pub min_report_interval_ms: u64,

   /// Only keep advertisements carrying the Minew vendor id.
   #[serde(default)]
   pub minew_only: bool,

   /// Ask the controller to report every advertisement, not just the first.
   #[serde(default = "default_duplicate_data")]
   pub duplicate_data: bool,

   /// Adapter name (`hci0`, ...); the default adapter when unset.
   #[serde(default)]
   pub adapter: Option<String>,

   #[serde(default)]
   pub permission_store_path: Option<PathBuf>,
}

fn default_min_report_interval() -> u64 {
   u64::try_from(DEFAULT_MIN_INTERVAL.as_millis()).unwrap_or(1000)
}

const fn default_duplicate_data() -> bool {
   true
}

impl Default for Config {
   fn default() -> Self {
      Self {
         min_report_interval_ms: default_min_report_interval(),
         minew_only: false,
         duplicate_data: default_duplicate_data(),
         adapter: None,
         permission_store_path: None,
      }
   }
}

impl Config {
   /// Loads configuration from disk or creates default if not exists.
   pub fn load() -> Result<Self> {
      let config_path = Self::config_path()?;

      if config_path.exists() {
         let contents = fs::read_to_string(&config_path)?;
         Self::from_toml_str(&contents)
      } else {
         let config = Self::default();
         config.save()?;
         Ok(config)
      }
   }

   pub fn from_toml_str(contents: &str) -> Result<Self> {
      Ok(toml::from_str(contents)?)
   }

   /// Saves the current configuration to disk.
   pub fn save(&self) -> Result<()> {
      let config_path = Self::config_path()?;

      if let Some(parent) = config_path.parent() {
         fs::create_dir_all(parent)?;
      }

      let contents = toml::to_string_pretty(self)?;
      fs::write(&config_path, contents)?;

      Ok(())
   }

   fn config_path() -> Result<PathBuf> {
      let config_dir = if let Ok(minewd_home) = env::var("MINEWD_HOME") {
         PathBuf::from(minewd_home)
      } else if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
         PathBuf::from(config_home)
      } else if let Ok(home) = env::var("HOME") {
         PathBuf::from(home).join(".config")
      } else {
         return Err(ScanError::ConfigDirNotFound);
      };

      Ok(config_dir.join("minewd").join("config.toml"))
   }

   pub const fn min_report_interval(&self) -> Duration {
      Duration::from_millis(self.min_report_interval_ms)
   }

   /// Filters applied to every scan, whatever the caller asks for.
   pub const fn scan_options(&self) -> ScanOptions {
      ScanOptions {
         minew_only: self.minew_only,
      }
   }

   /// Opens the permission flag store, honoring `permission_store_path`.
   pub fn open_permission_store(&self) -> std::result::Result<PermissionStore, store::Error> {
      match &self.permission_store_path {
         Some(path) => PermissionStore::open_at(path),
         None => PermissionStore::open(),
      }
   }
}

#[cfg(test)]
mod tests {
   use tempfile::TempDir;

   use super::*;
   use crate::permissions::store::DenialStore;

   #[test]
   fn test_empty_file_uses_defaults() -> Result<()> {
      let config = Config::from_toml_str("")?;
      assert_eq!(config, Config::default());
      assert_eq!(config.min_report_interval(), Duration::from_millis(1000));
      assert!(config.duplicate_data);
      assert!(!config.scan_options().minew_only);
      Ok(())
   }

   #[test]
   fn test_partial_file() -> Result<()> {
      let config = Config::from_toml_str(
         r#"
         min_report_interval_ms = 250
         minew_only = true
         adapter = "hci1"
         "#,
      )?;
      assert_eq!(config.min_report_interval_ms, 250);
      assert!(config.scan_options().minew_only);
      assert_eq!(config.adapter.as_deref(), Some("hci1"));
      assert!(config.duplicate_data);
      Ok(())
   }

   #[test]
   fn test_configured_filter_applies_to_requests() -> Result<()> {
      let forced = Config::from_toml_str("minew_only = true")?.scan_options();
      assert!(forced.union(ScanOptions { minew_only: false }).minew_only);

      let open = Config::default().scan_options();
      assert!(!open.union(ScanOptions { minew_only: false }).minew_only);
      assert!(open.union(ScanOptions { minew_only: true }).minew_only);
      Ok(())
   }

   #[test]
   fn test_round_trips_through_toml() -> Result<()> {
      let config = Config {
         permission_store_path: Some(PathBuf::from("/tmp/minewd")),
         ..Config::default()
      };
      let text = toml::to_string_pretty(&config)?;
      assert_eq!(Config::from_toml_str(&text)?, config);
      Ok(())
   }

   #[test]
   fn test_rejects_bad_types() {
      let err = Config::from_toml_str("minew_only = \"yes\"").unwrap_err();
      assert!(matches!(err, ScanError::TomlParse(_)));
   }

   #[test]
   fn test_permission_store_path_override() -> Result<()> {
      let dir = TempDir::new().unwrap();
      let config = Config {
         permission_store_path: Some(dir.path().join("permissions.db")),
         ..Config::default()
      };
      let store = config.open_permission_store()?;
      assert!(!store.denied_permanently()?);
      Ok(())
   }
}
