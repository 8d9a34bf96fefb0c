use chrono::Duration;
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::cache::{DEFAULT_RETENTION, DEFAULT_STALE_AFTER};
use crate::db::DbLocation;
use crate::sync::DEFAULT_MAX_RETRIES;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub backend: BackendConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub sync: SyncConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BackendConfig {
  /// Project URL of the hosted backend (e.g. "https://abc.supabase.co").
  /// Only needed by commands that talk to it.
  pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// When false, entity reads always go to the backend and nothing is cached
  #[serde(default = "default_enabled")]
  pub enabled: bool,
  /// Database file (defaults to $XDG_DATA_HOME/ordersnapr/offline.db)
  pub path: Option<PathBuf>,
  /// Age after which a type's cache should be refetched
  #[serde(default = "default_stale_after_secs")]
  pub stale_after_secs: u64,
  /// Age after which cached records are pruned
  #[serde(default = "default_retain_secs")]
  pub retain_secs: u64,
}

fn default_enabled() -> bool {
  true
}

fn default_stale_after_secs() -> u64 {
  DEFAULT_STALE_AFTER.num_seconds() as u64
}

fn default_retain_secs() -> u64 {
  DEFAULT_RETENTION.num_seconds() as u64
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: default_enabled(),
      path: None,
      stale_after_secs: default_stale_after_secs(),
      retain_secs: default_retain_secs(),
    }
  }
}

/// Convert a user-supplied number of seconds, rejecting values chrono cannot hold.
pub fn duration_from_secs(secs: u64) -> Result<Duration> {
  i64::try_from(secs)
    .ok()
    .and_then(Duration::try_seconds)
    .ok_or_else(|| eyre!("Duration of {} seconds is out of range", secs))
}

impl CacheConfig {
  pub fn stale_after(&self) -> Result<Duration> {
    duration_from_secs(self.stale_after_secs)
      .map_err(|e| eyre!("Invalid cache.stale_after_secs: {}", e))
  }

  pub fn retention(&self) -> Result<Duration> {
    duration_from_secs(self.retain_secs).map_err(|e| eyre!("Invalid cache.retain_secs: {}", e))
  }

  /// Configured database file, or the default one.
  pub fn location(&self) -> Result<DbLocation> {
    match &self.path {
      Some(path) => Ok(DbLocation::File(path.clone())),
      None => DbLocation::default_file(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
  /// Attempts before a queued operation is dropped
  #[serde(default = "default_max_retries")]
  pub max_retries: u32,
  /// Seconds between scheduled sync passes in watch mode
  #[serde(default = "default_interval_secs")]
  pub interval_secs: u64,
  /// HTTP request timeout; none by default
  #[serde(default)]
  pub request_timeout_secs: Option<u64>,
}

fn default_max_retries() -> u32 {
  DEFAULT_MAX_RETRIES
}

fn default_interval_secs() -> u64 {
  30
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      max_retries: default_max_retries(),
      interval_secs: default_interval_secs(),
      request_timeout_secs: None,
    }
  }
}

impl SyncConfig {
  pub fn interval(&self) -> std::time::Duration {
    std::time::Duration::from_secs(self.interval_secs.max(1))
  }

  pub fn request_timeout(&self) -> Option<std::time::Duration> {
    self.request_timeout_secs.map(std::time::Duration::from_secs)
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./ordersnapr.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/ordersnapr/config.yaml
  ///
  /// Without any file the defaults are used.
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
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("ordersnapr.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("ordersnapr").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    // An empty file deserializes to null
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))
  }

  /// Get the backend API key from environment variables.
  ///
  /// Checks ORDERSNAPR_API_KEY first, then SUPABASE_ANON_KEY as fallback.
  pub fn get_api_key() -> Result<String> {
    std::env::var("ORDERSNAPR_API_KEY")
      .or_else(|_| std::env::var("SUPABASE_ANON_KEY"))
      .map_err(|_| {
        eyre!("Backend API key not found. Set ORDERSNAPR_API_KEY or SUPABASE_ANON_KEY environment variable.")
      })
  }
}
