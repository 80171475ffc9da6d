//! Multi-tier cache store: memory in front of persistent and session tiers.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use super::entry::CacheEntry;
use super::policy::{CachePolicy, CacheType, PolicyTable, Tier};
use super::storage::{NoopStorage, StorageTier};
use crate::clock::{Clock, SystemClock};

/// Entry counts per tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
  pub memory: usize,
  pub persistent: usize,
  pub session: usize,
}

/// Cache store that manages TTL policy across the three tiers.
///
/// The memory tier is always consulted first and mirrors the most recently
/// used persisted entries. Storage failures never reach the caller: reads
/// degrade to a miss and writes to memory-only.
pub struct CacheStore {
  memory: Mutex<HashMap<String, CacheEntry>>,
  persistent: Arc<dyn StorageTier>,
  session: Arc<dyn StorageTier>,
  policies: PolicyTable,
  clock: Arc<dyn Clock>,
}

impl CacheStore {
  /// Create a new store over the given backing tiers.
  pub fn new(
    persistent: Arc<dyn StorageTier>,
    session: Arc<dyn StorageTier>,
    policies: PolicyTable,
  ) -> Self {
    Self {
      memory: Mutex::new(HashMap::new()),
      persistent,
      session,
      policies,
      clock: Arc::new(SystemClock),
    }
  }

  /// Store that keeps everything in process memory.
  pub fn memory_only(policies: PolicyTable) -> Self {
    Self::new(Arc::new(NoopStorage), Arc::new(NoopStorage), policies)
  }

  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  pub fn policies(&self) -> &PolicyTable {
    &self.policies
  }

  fn memory(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
    self.memory.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn backing(&self, tier: Tier) -> Option<&dyn StorageTier> {
    match tier {
      Tier::Memory => None,
      Tier::Persistent => Some(self.persistent.as_ref()),
      Tier::Session => Some(self.session.as_ref()),
    }
  }

  fn persisted_tiers(&self) -> [&dyn StorageTier; 2] {
    [self.persistent.as_ref(), self.session.as_ref()]
  }

  /// Read the data for `key`.
  ///
  /// With `allow_expired` the TTL is ignored; that is only meant for serving
  /// stale data when the upstream is unreachable.
  pub fn get(&self, key: &str, cache_type: CacheType, allow_expired: bool) -> Option<Value> {
    self
      .lookup(key, cache_type, allow_expired)
      .map(|entry| entry.data)
  }

  /// Like [`CacheStore::get`] but returns the whole entry with its timestamp.
  pub fn lookup(&self, key: &str, cache_type: CacheType, allow_expired: bool) -> Option<CacheEntry> {
    let (entry, from_backing, policy) = self.read(key, cache_type)?;

    if allow_expired {
      return Some(entry);
    }

    if policy.is_expired(entry.timestamp, self.clock.now_millis()) {
      debug!(key, %cache_type, "cache entry expired");
      self.delete(key, None);
      return None;
    }

    if from_backing {
      self.memory().insert(key.to_string(), entry.clone());
    }

    debug!(key, %cache_type, from_backing, "cache hit");
    Some(entry)
  }

  /// Read without evicting. Returns the entry and whether it is within its TTL.
  ///
  /// An expired entry is left in place so it can still back an offline
  /// fallback if the refresh that follows fails.
  pub fn peek(&self, key: &str, cache_type: CacheType) -> Option<(CacheEntry, bool)> {
    let (entry, from_backing, policy) = self.read(key, cache_type)?;
    let fresh = !policy.is_expired(entry.timestamp, self.clock.now_millis());

    if fresh && from_backing {
      self.memory().insert(key.to_string(), entry.clone());
    }
    Some((entry, fresh))
  }

  fn read(&self, key: &str, cache_type: CacheType) -> Option<(CacheEntry, bool, CachePolicy)> {
    let Some(policy) = self.policies.get(cache_type).copied() else {
      debug!(key, %cache_type, "no policy registered, treating as miss");
      return None;
    };

    let in_memory = self.memory().get(key).cloned();
    match in_memory {
      Some(entry) => Some((entry, false, policy)),
      None => self
        .read_backing(key, policy.tier)
        .map(|entry| (entry, true, policy)),
    }
  }

  fn read_backing(&self, key: &str, tier: Tier) -> Option<CacheEntry> {
    let backing = self.backing(tier)?;

    let raw = match backing.get_item(key) {
      Ok(Some(raw)) => raw,
      Ok(None) => return None,
      Err(e) => {
        warn!(key, tier = backing.name(), error = %e, "cache read failed");
        return None;
      }
    };

    match serde_json::from_str::<CacheEntry>(&raw) {
      Ok(entry) => Some(entry),
      Err(e) => {
        warn!(key, tier = backing.name(), error = %e, "discarding undecodable cache entry");
        if let Err(e) = backing.remove_item(key) {
          warn!(key, tier = backing.name(), error = %e, "failed to remove cache entry");
        }
        None
      }
    }
  }

  /// Store `data` under `key`.
  ///
  /// Returns `false` when the category has no policy (nothing is written) or
  /// when the backing tier rejected the write (the memory copy is kept).
  pub fn set(&self, key: &str, data: Value, cache_type: CacheType) -> bool {
    let Some(policy) = self.policies.get(cache_type).copied() else {
      warn!(key, %cache_type, "no policy registered, not caching");
      return false;
    };

    let entry = CacheEntry::new(data, self.clock.now_millis(), cache_type);
    self.memory().insert(key.to_string(), entry.clone());

    let Some(backing) = self.backing(policy.tier) else {
      return true;
    };

    let raw = match serde_json::to_string(&entry) {
      Ok(raw) => raw,
      Err(e) => {
        warn!(key, error = %e, "failed to serialize cache entry");
        return false;
      }
    };

    match backing.set_item(key, &raw) {
      Ok(()) => true,
      Err(e) => {
        warn!(key, tier = backing.name(), error = %e, "cache write failed, keeping memory copy");
        false
      }
    }
  }

  /// Remove `key` from memory and from `tier`, or from both persisted tiers
  /// when no tier is given.
  pub fn delete(&self, key: &str, tier: Option<Tier>) -> bool {
    self.memory().remove(key);

    let targets: Vec<&dyn StorageTier> = match tier {
      Some(tier) => self.backing(tier).into_iter().collect(),
      None => self.persisted_tiers().to_vec(),
    };

    for backing in targets {
      if let Err(e) = backing.remove_item(key) {
        warn!(key, tier = backing.name(), error = %e, "cache delete failed");
      }
    }
    true
  }

  /// Remove every key containing `pattern` from all tiers.
  ///
  /// Returns the number of keys removed. An empty pattern removes nothing.
  pub fn invalidate(&self, pattern: &str) -> usize {
    if pattern.is_empty() {
      warn!("ignoring empty invalidation pattern");
      return 0;
    }

    let mut removed = {
      let mut memory = self.memory();
      let before = memory.len();
      memory.retain(|key, _| !key.contains(pattern));
      before - memory.len()
    };

    for backing in self.persisted_tiers() {
      let keys = match backing.keys() {
        Ok(keys) => keys,
        Err(e) => {
          warn!(tier = backing.name(), error = %e, "failed to list keys for invalidation");
          continue;
        }
      };

      for key in keys.iter().filter(|k| k.contains(pattern)) {
        match backing.remove_item(key) {
          Ok(()) => removed += 1,
          Err(e) => warn!(key = %key, tier = backing.name(), error = %e, "failed to invalidate"),
        }
      }
    }

    if removed > 0 {
      info!(pattern, removed, "invalidated cache entries");
    }
    removed
  }

  /// Evict every expired entry from every tier.
  ///
  /// Persisted entries that cannot be decoded, or whose category has no
  /// policy, are evicted as well. Returns the number of entries removed.
  pub fn sweep(&self) -> usize {
    let now = self.clock.now_millis();
    let policies = &self.policies;
    let is_live = |entry: &CacheEntry| {
      policies
        .get(entry.cache_type)
        .is_some_and(|policy| !policy.is_expired(entry.timestamp, now))
    };

    let mut removed = {
      let mut memory = self.memory();
      let before = memory.len();
      memory.retain(|_, entry| is_live(entry));
      before - memory.len()
    };

    for backing in self.persisted_tiers() {
      let keys = match backing.keys() {
        Ok(keys) => keys,
        Err(e) => {
          warn!(tier = backing.name(), error = %e, "failed to list keys for sweep");
          continue;
        }
      };

      for key in keys {
        let keep = match backing.get_item(&key) {
          Ok(Some(raw)) => serde_json::from_str::<CacheEntry>(&raw)
            .map(|entry| is_live(&entry))
            .unwrap_or(false),
          Ok(None) => true,
          Err(e) => {
            warn!(key = %key, tier = backing.name(), error = %e, "failed to read during sweep");
            true
          }
        };

        if !keep {
          match backing.remove_item(&key) {
            Ok(()) => removed += 1,
            Err(e) => warn!(key = %key, tier = backing.name(), error = %e, "failed to sweep entry"),
          }
        }
      }
    }

    if removed > 0 {
      info!(removed, "swept expired cache entries");
    }
    removed
  }

  /// Empty every tier.
  pub fn clear(&self) {
    self.memory().clear();
    for backing in self.persisted_tiers() {
      if let Err(e) = backing.clear() {
        warn!(tier = backing.name(), error = %e, "failed to clear cache tier");
      }
    }
  }

  pub fn stats(&self) -> CacheStats {
    let count = |backing: &dyn StorageTier| match backing.keys() {
      Ok(keys) => keys.len(),
      Err(e) => {
        warn!(tier = backing.name(), error = %e, "failed to count cache entries");
        0
      }
    };

    CacheStats {
      memory: self.memory().len(),
      persistent: count(self.persistent.as_ref()),
      session: count(self.session.as_ref()),
    }
  }
}
