use chrono::Duration as ChronoDuration;
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::cache::snapshot_name;
use crate::sync::RetryPolicy;

/// Longest configurable retry backoff: one year.
const MAX_BACKOFF_SECS: i64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Version tag; bumping it creates a new cache snapshot on next start
  pub version: String,
  /// Prefix of the cache snapshot name
  pub cache_prefix: String,
  /// Base URL the app and its resources are served from
  pub origin: String,
  /// Resources stored when a snapshot is installed, relative to `origin`
  pub resources: Vec<String>,
  /// Document served to navigations when offline
  pub fallback_page: Option<String>,
  /// Subresource served when offline; off unless set
  pub offline_asset: Option<String>,
  /// Seconds before a network fetch is abandoned
  pub fetch_timeout_secs: u64,
  /// Name of the notice channel
  pub channel: String,
  /// Database location (default: $XDG_DATA_HOME/vacay/vacay.db)
  pub database: Option<PathBuf>,
  pub sync: SyncConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Endpoint receiving one record per POST; no endpoint means local-only
  pub endpoint: Option<Url>,
  /// Queue submissions and deliver them later; otherwise send immediately
  pub deferred: bool,
  pub tag: String,
  pub probe_interval_secs: u64,
  pub concurrency: usize,
  pub max_attempts: u32,
  pub base_backoff_secs: i64,
  pub max_backoff_secs: i64,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      version: "v1".to_string(),
      cache_prefix: "vacation-tracker".to_string(),
      origin: "http://localhost:8080/".to_string(),
      resources: vec![
        "index.html".to_string(),
        "style.css".to_string(),
        "app.js".to_string(),
        "manifest.json".to_string(),
        "assets/icons/icon-512x512.png".to_string(),
      ],
      fallback_page: Some("/index.html".to_string()),
      offline_asset: None,
      fetch_timeout_secs: 10,
      channel: "vacation-tracker".to_string(),
      database: None,
      sync: SyncConfig::default(),
    }
  }
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      endpoint: None,
      deferred: true,
      tag: "sync-vacations".to_string(),
      probe_interval_secs: 15,
      concurrency: 4,
      max_attempts: 8,
      base_backoff_secs: 30,
      max_backoff_secs: 3600,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./vacay.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/vacay/config.yaml
  ///
  /// Falls back to defaults when no file exists.
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
      None => {
        tracing::debug!("no configuration file found, using defaults");
        Ok(Self::default())
      }
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("vacay.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("vacay").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    if self.version.trim().is_empty() {
      return Err(eyre!("version must not be empty"));
    }
    if self.sync.max_attempts == 0 {
      return Err(eyre!("sync.max_attempts must be at least 1"));
    }
    if self.sync.base_backoff_secs < 0
      || self.sync.max_backoff_secs < self.sync.base_backoff_secs
      || self.sync.max_backoff_secs > MAX_BACKOFF_SECS
    {
      return Err(eyre!(
        "sync backoff must satisfy 0 <= base_backoff_secs <= max_backoff_secs <= {}",
        MAX_BACKOFF_SECS
      ));
    }
    self.origin()?;
    for resource in &self.resources {
      self.resolve(resource)?;
    }
    Ok(())
  }

  /// Name of the snapshot matching the running version.
  pub fn snapshot_name(&self) -> String {
    snapshot_name(&self.cache_prefix, &self.version)
  }

  pub fn origin(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))
  }

  /// Resolve a path or URL against the origin.
  pub fn resolve(&self, path: &str) -> Result<Url> {
    self
      .origin()?
      .join(path)
      .map_err(|e| eyre!("Invalid resource '{}': {}", path, e))
  }

  pub fn resource_urls(&self) -> Result<Vec<Url>> {
    self.resources.iter().map(|r| self.resolve(r)).collect()
  }

  pub fn fetch_timeout(&self) -> Duration {
    Duration::from_secs(self.fetch_timeout_secs)
  }

  pub fn retry_policy(&self) -> RetryPolicy {
    RetryPolicy {
      max_attempts: self.sync.max_attempts,
      base_delay: ChronoDuration::seconds(self.sync.base_backoff_secs),
      max_delay: ChronoDuration::seconds(self.sync.max_backoff_secs),
    }
  }

  /// Get the sync endpoint bearer token from the environment, if any.
  ///
  /// Checks VACAY_SYNC_TOKEN.
  pub fn get_sync_token() -> Option<String> {
    std::env::var("VACAY_SYNC_TOKEN")
      .ok()
      .filter(|t| !t.is_empty())
  }
}
