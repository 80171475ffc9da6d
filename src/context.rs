//! The application context: every shared component, built once.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tracing::warn;

use crate::api::{ApiClient, Credentials, ReqwestTransport, Transport};
use crate::cache::{CacheStore, CacheSweeper, NoopStorage, SqliteStorage, StorageTier};
use crate::config::Config;

/// Shared components handed to every consumer.
pub struct AppContext {
  pub config: Config,
  pub cache: Arc<CacheStore>,
  pub api: ApiClient,
  sweeper: Option<CacheSweeper>,
}

impl AppContext {
  /// Build the context from configuration, talking to the real backend.
  ///
  /// The periodic sweep is not started here; long-running users call
  /// [`AppContext::start_sweeper`] from inside the runtime, otherwise expired
  /// entries are only dropped when read or on an explicit sweep.
  pub fn build(config: Config) -> Result<Self> {
    let transport = ReqwestTransport::new(config.timeout())
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;
    let persistent = open_persistent(&config);
    let session = open_session(&config);
    Self::with_parts(config, Arc::new(transport), persistent, session)
  }

  /// Build the context over explicit transport and storage tiers.
  ///
  /// Like [`AppContext::build`], this leaves the sweep stopped.
  pub fn with_parts(
    config: Config,
    transport: Arc<dyn Transport>,
    persistent: Arc<dyn StorageTier>,
    session: Arc<dyn StorageTier>,
  ) -> Result<Self> {
    let base_url = config.base_url()?;
    let cache = Arc::new(CacheStore::new(persistent, session, config.policy_table()));
    let api = ApiClient::new(
      base_url,
      transport,
      Arc::new(Credentials::from_env()),
      Arc::clone(&cache),
      config.invalidation_rules(),
    );

    Ok(Self {
      config,
      cache,
      api,
      sweeper: None,
    })
  }

  /// Start the periodic sweep. Must be called inside a tokio runtime.
  /// Calling it again while the sweep runs does nothing.
  pub fn start_sweeper(&mut self) {
    if self.sweeper.is_none() {
      let interval = self.config.sweep_interval();
      self.sweeper = Some(CacheSweeper::spawn(Arc::clone(&self.cache), interval));
    }
  }

  pub fn sweeper_running(&self) -> bool {
    self.sweeper.as_ref().is_some_and(CacheSweeper::is_running)
  }
}

/// Open the on-disk tier. Failures degrade to no persistence.
fn open_persistent(config: &Config) -> Arc<dyn StorageTier> {
  if !config.cache.persist {
    return Arc::new(NoopStorage);
  }

  let opened = match &config.cache.path {
    Some(path) => SqliteStorage::open(path),
    None => SqliteStorage::open_default(),
  };

  match opened {
    Ok(storage) => Arc::new(apply_quota(storage, config)),
    Err(e) => {
      warn!(error = %e, "persistent cache unavailable, continuing without it");
      Arc::new(NoopStorage)
    }
  }
}

fn open_session(config: &Config) -> Arc<dyn StorageTier> {
  match SqliteStorage::in_memory() {
    Ok(storage) => Arc::new(apply_quota(storage, config)),
    Err(e) => {
      warn!(error = %e, "session cache unavailable, continuing without it");
      Arc::new(NoopStorage)
    }
  }
}

fn apply_quota(storage: SqliteStorage, config: &Config) -> SqliteStorage {
  match config.cache.quota_bytes {
    Some(quota) => storage.with_quota(quota),
    None => storage,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::testing::FakeTransport;
  use crate::api::Method;
  use crate::cache::CacheType;
  use serde_json::json;
  use tempfile::TempDir;

  fn config(yaml: &str) -> Config {
    Config::from_yaml(yaml).unwrap()
  }

  #[test]
  fn test_disabled_persistence_uses_noop_tier() {
    let config = config("cache:\n  persist: false\n");
    let persistent = open_persistent(&config);
    assert_eq!(persistent.name(), "noop");
  }

  #[test]
  fn test_missing_base_url_is_an_error() {
    let result = AppContext::with_parts(
      Config::default(),
      Arc::new(FakeTransport::new()),
      Arc::new(NoopStorage),
      Arc::new(NoopStorage),
    );
    assert!(result.is_err());
  }

  #[test]
  fn test_persistent_tier_opens_configured_path() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("cache.db");
    let yaml = format!(
      "api:\n  url: https://api.test\ncache:\n  path: {}\n",
      path.display()
    );

    let config = config(&yaml);
    let persistent = open_persistent(&config);
    let ctx = AppContext::with_parts(
      config,
      Arc::new(FakeTransport::new()),
      persistent,
      Arc::new(NoopStorage),
    )
    .unwrap();
    ctx
      .cache
      .set("hierarchy:/hierarchy", json!({}), CacheType::Hierarchy);

    assert!(path.exists());
    assert_eq!(ctx.cache.stats().persistent, 1);
  }

  #[tokio::test]
  async fn test_sweeper_starts_only_when_asked() {
    let mut ctx = AppContext::with_parts(
      config("api:\n  url: https://api.test\n"),
      Arc::new(FakeTransport::new()),
      Arc::new(NoopStorage),
      Arc::new(NoopStorage),
    )
    .unwrap();
    assert!(!ctx.sweeper_running());

    ctx.start_sweeper();
    ctx.start_sweeper();
    assert!(ctx.sweeper_running());
  }

  #[tokio::test]
  async fn test_context_wires_cache_into_client() {
    let transport = Arc::new(FakeTransport::new().json(Method::Get, "/hierarchy", 200, json!([1])));
    let mut ctx = AppContext::with_parts(
      config("api:\n  url: https://api.test\n"),
      transport.clone(),
      Arc::new(NoopStorage),
      Arc::new(SqliteStorage::in_memory().unwrap()),
    )
    .unwrap();
    ctx.start_sweeper();

    ctx.api.hierarchy().await.unwrap();
    ctx.api.hierarchy().await.unwrap();

    assert_eq!(transport.call_count(), 1);
    assert_eq!(ctx.cache.stats().memory, 1);
    assert!(ctx.sweeper_running());
  }
}
