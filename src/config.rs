use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::cache::CacheStore;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL of the backend, e.g. `https://school.example.com/api/v1`
  pub url: String,
  /// Tenant id sent with every request
  pub tenant: Option<String>,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Age after which entries are re-fetched even if nothing invalidated them
  #[serde(default = "default_stale_time_secs")]
  pub stale_time_secs: u64,
  /// When false every read goes to the network
  #[serde(default = "default_enabled")]
  pub enabled: bool,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      stale_time_secs: default_stale_time_secs(),
      enabled: default_enabled(),
    }
  }
}

fn default_timeout_secs() -> u64 {
  30
}

fn default_stale_time_secs() -> u64 {
  300
}

fn default_enabled() -> bool {
  true
}

impl CacheConfig {
  /// Build the store this configuration describes.
  pub fn store(&self) -> CacheStore {
    let store = if self.enabled {
      CacheStore::new()
    } else {
      CacheStore::disabled()
    };
    // Clamped to stay within chrono's range.
    let secs = self.stale_time_secs.min(u64::from(u32::MAX)) as i64;
    store.with_stale_time(chrono::Duration::seconds(secs))
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./schooldesk.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/schooldesk/config.yaml
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
        "No configuration file found. Create one at ~/.config/schooldesk/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("schooldesk.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("schooldesk").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    if config.api.url.trim().is_empty() {
      return Err(eyre!("api.url must not be empty"));
    }
    Ok(config)
  }

  /// Get the API token from environment variables.
  ///
  /// Checks SCHOOLDESK_API_TOKEN first, then SCHOOLDESK_TOKEN as fallback.
  pub fn get_api_token() -> Result<String> {
    std::env::var("SCHOOLDESK_API_TOKEN")
      .or_else(|_| std::env::var("SCHOOLDESK_TOKEN"))
      .map_err(|_| {
        eyre!("API token not found. Set SCHOOLDESK_API_TOKEN or SCHOOLDESK_TOKEN environment variable.")
      })
  }
}
