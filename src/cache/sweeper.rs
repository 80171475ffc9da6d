//! Background task that periodically evicts expired cache entries.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use super::store::CacheStore;

/// Default interval between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Handle to a running sweep task. The task stops when the handle is dropped.
#[derive(Debug)]
pub struct CacheSweeper {
  task: JoinHandle<()>,
}

impl CacheSweeper {
  /// Spawn the sweep loop on the current tokio runtime.
  pub fn spawn(store: Arc<CacheStore>, interval: Duration) -> Self {
    let task = tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
      // The first tick completes immediately
      ticker.tick().await;

      loop {
        ticker.tick().await;
        let removed = store.sweep();
        debug!(removed, "cache sweep finished");
      }
    });

    Self { task }
  }

  pub fn stop(&self) {
    self.task.abort();
  }

  pub fn is_running(&self) -> bool {
    !self.task.is_finished()
  }
}

impl Drop for CacheSweeper {
  fn drop(&mut self) {
    self.task.abort();
  }
}
