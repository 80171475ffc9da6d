use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::api::{InvalidationRule, InvalidationRules};
use crate::cache::{CachePolicy, CacheType, PolicyTable, Tier, DEFAULT_SWEEP_INTERVAL};

/// Environment variable overriding `api.url`.
pub const API_URL_ENV: &str = "VETRINA_API_URL";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  /// Extra invalidation rules, merged after the built-in ones
  #[serde(default)]
  pub invalidation: Vec<InvalidationRule>,
  #[serde(default)]
  pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL of the backend, e.g. https://api.example.com/api
  pub url: Option<String>,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      url: None,
      timeout_secs: default_timeout_secs(),
    }
  }
}

fn default_timeout_secs() -> u64 {
  30
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Keep the persistent tier on disk; when false it is disabled
  #[serde(default = "default_true")]
  pub persist: bool,
  /// Location of the persistent tier (default: $XDG_DATA_HOME/vetrina/cache.db)
  pub path: Option<PathBuf>,
  #[serde(default = "default_sweep_interval_secs")]
  pub sweep_interval_secs: u64,
  /// Byte quota for each of the persistent and session tiers
  #[serde(default = "default_quota_bytes")]
  pub quota_bytes: Option<u64>,
  /// Per-category overrides, keyed by cache type name
  #[serde(default)]
  pub policies: BTreeMap<String, PolicyOverride>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      persist: true,
      path: None,
      sweep_interval_secs: default_sweep_interval_secs(),
      quota_bytes: default_quota_bytes(),
      policies: BTreeMap::new(),
    }
  }
}

fn default_true() -> bool {
  true
}

fn default_sweep_interval_secs() -> u64 {
  DEFAULT_SWEEP_INTERVAL.as_secs()
}

fn default_quota_bytes() -> Option<u64> {
  Some(5 * 1024 * 1024)
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct PolicyOverride {
  pub ttl_secs: Option<u64>,
  pub tier: Option<Tier>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
  /// Default filter when RUST_LOG is unset
  #[serde(default = "default_log_level")]
  pub level: String,
  /// Write daily-rotated log files here instead of stderr
  pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: default_log_level(),
      directory: None,
    }
  }
}

fn default_log_level() -> String {
  "warn".to_string()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./vetrina.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/vetrina/config.yaml
  ///
  /// Without a file the defaults are used. `VETRINA_API_URL` overrides `api.url`.
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

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };

    Ok(config.with_api_url(std::env::var(API_URL_ENV).ok()))
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("vetrina.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("vetrina").join("config.yaml");
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

  pub fn from_yaml(contents: &str) -> Result<Self> {
    Ok(serde_yaml::from_str(contents)?)
  }

  /// Override the API base URL when `url` is set and non-empty.
  pub fn with_api_url(mut self, url: Option<String>) -> Self {
    if let Some(url) = url.filter(|u| !u.trim().is_empty()) {
      self.api.url = Some(url);
    }
    self
  }

  /// The API base URL, which must be configured.
  pub fn base_url(&self) -> Result<Url> {
    let raw = self.api.url.as_deref().ok_or_else(|| {
      eyre!(
        "API base URL not configured. Set api.url in the config file or the {} environment variable.",
        API_URL_ENV
      )
    })?;

    Url::parse(raw).map_err(|e| eyre!("Invalid API base URL '{}': {}", raw, e))
  }

  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.api.timeout_secs)
  }

  pub fn sweep_interval(&self) -> Duration {
    Duration::from_secs(self.cache.sweep_interval_secs.max(1))
  }

  /// Default policies with the configured overrides applied.
  ///
  /// Unknown cache type names are logged and skipped.
  pub fn policy_table(&self) -> PolicyTable {
    let mut table = PolicyTable::default();
    for (name, over) in &self.cache.policies {
      let Some(cache_type) = CacheType::parse(name) else {
        continue;
      };
      let Some(base) = table.get(cache_type).copied() else {
        continue;
      };
      let ttl = over.ttl_secs.map(Duration::from_secs).unwrap_or(base.ttl);
      let tier = over.tier.unwrap_or(base.tier);
      table.set(cache_type, CachePolicy::new(ttl, tier));
    }
    table
  }

  pub fn invalidation_rules(&self) -> InvalidationRules {
    let mut rules = InvalidationRules::default();
    rules.extend(self.invalidation.iter().cloned());
    rules
  }
}
