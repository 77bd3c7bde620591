use std::path::{Path, PathBuf};
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;

use crate::cache::CacheConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheSettings,
  #[serde(default)]
  pub autosave: AutosaveSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL of the Draftdeck backend
  pub url: String,
}

/// Cache lifetimes in seconds. Tunable because the right windows depend on
/// how many people edit the same content concurrently.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
  pub stale_secs: u64,
  pub gc_secs: u64,
}

impl Default for CacheSettings {
  fn default() -> Self {
    Self {
      stale_secs: 5 * 60,
      gc_secs: 30 * 60,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AutosaveSettings {
  /// Quiet period after the last edit before the flow editor saves
  pub debounce_ms: u64,
}

impl Default for AutosaveSettings {
  fn default() -> Self {
    Self { debounce_ms: 3000 }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./draftdeck.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/draftdeck/config.yaml
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
        "No configuration file found. Create one at ~/.config/draftdeck/config.yaml\n\
                 with at least:\n  api:\n    url: https://your-backend.example.com"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("draftdeck.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("draftdeck").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  pub fn cache_config(&self) -> CacheConfig {
    CacheConfig {
      stale_after: Duration::from_secs(self.cache.stale_secs),
      evict_after: Duration::from_secs(self.cache.gc_secs),
    }
  }

  pub fn debounce(&self) -> Duration {
    Duration::from_millis(self.autosave.debounce_ms)
  }

  /// Get the login password from the environment.
  ///
  /// Passwords never live in the config file.
  pub fn get_password() -> Result<String> {
    std::env::var("DRAFTDECK_PASSWORD")
      .map_err(|_| eyre!("Password not found. Set the DRAFTDECK_PASSWORD environment variable."))
  }
}
