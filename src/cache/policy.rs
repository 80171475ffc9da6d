//! Cache categories and the TTL/tier policy attached to each.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Named cache category. Every cached response belongs to exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheType {
  VetrineList,
  SearchResults,
  VetrinaFiles,
  Reviews,
  Favorites,
  Hierarchy,
  UserProfile,
}

impl CacheType {
  pub const ALL: [CacheType; 7] = [
    CacheType::VetrineList,
    CacheType::SearchResults,
    CacheType::VetrinaFiles,
    CacheType::Reviews,
    CacheType::Favorites,
    CacheType::Hierarchy,
    CacheType::UserProfile,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      CacheType::VetrineList => "vetrine_list",
      CacheType::SearchResults => "search_results",
      CacheType::VetrinaFiles => "vetrina_files",
      CacheType::Reviews => "reviews",
      CacheType::Favorites => "favorites",
      CacheType::Hierarchy => "hierarchy",
      CacheType::UserProfile => "user_profile",
    }
  }

  /// Lenient lookup used at the edges (CLI, config). Unknown names log and
  /// return `None`, which callers treat as "do not cache".
  pub fn parse(name: &str) -> Option<CacheType> {
    match name.parse() {
      Ok(cache_type) => Some(cache_type),
      Err(_) => {
        tracing::warn!(cache_type = name, "unknown cache type, request will not be cached");
        None
      }
    }
  }

  fn default_policy(&self) -> CachePolicy {
    let minutes = |m: u64| Duration::from_secs(m * 60);
    match self {
      CacheType::VetrineList => CachePolicy::new(minutes(5), Tier::Persistent),
      CacheType::SearchResults => CachePolicy::new(minutes(2), Tier::Session),
      CacheType::VetrinaFiles => CachePolicy::new(minutes(10), Tier::Memory),
      CacheType::Reviews => CachePolicy::new(minutes(5), Tier::Memory),
      CacheType::Favorites => CachePolicy::new(minutes(2), Tier::Session),
      CacheType::Hierarchy => CachePolicy::new(minutes(60), Tier::Persistent),
      CacheType::UserProfile => CachePolicy::new(minutes(10), Tier::Session),
    }
  }
}

impl fmt::Display for CacheType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for CacheType {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    CacheType::ALL
      .into_iter()
      .find(|t| t.as_str() == s)
      .ok_or_else(|| format!("unknown cache type '{}'", s))
  }
}

/// Backing store for a cache category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
  /// Process memory only
  Memory,
  /// On-disk store that survives restarts
  Persistent,
  /// Store scoped to the running session
  Session,
}

impl Tier {
  pub fn as_str(&self) -> &'static str {
    match self {
      Tier::Memory => "memory",
      Tier::Persistent => "persistent",
      Tier::Session => "session",
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
  pub ttl: Duration,
  pub tier: Tier,
}

impl CachePolicy {
  pub fn new(ttl: Duration, tier: Tier) -> Self {
    Self { ttl, tier }
  }

  pub fn ttl_millis(&self) -> i64 {
    i64::try_from(self.ttl.as_millis()).unwrap_or(i64::MAX)
  }

  /// An entry written at `timestamp` is valid while `now - timestamp <= ttl`.
  pub fn is_expired(&self, timestamp: i64, now: i64) -> bool {
    now.saturating_sub(timestamp) > self.ttl_millis()
  }
}

/// Policy lookup table. Built once from defaults and config overrides.
#[derive(Debug, Clone)]
pub struct PolicyTable {
  policies: HashMap<CacheType, CachePolicy>,
}

impl PolicyTable {
  /// Empty table: every lookup misses and nothing is written.
  pub fn empty() -> Self {
    Self {
      policies: HashMap::new(),
    }
  }

  pub fn with_policy(mut self, cache_type: CacheType, policy: CachePolicy) -> Self {
    self.policies.insert(cache_type, policy);
    self
  }

  pub fn set(&mut self, cache_type: CacheType, policy: CachePolicy) {
    self.policies.insert(cache_type, policy);
  }

  pub fn get(&self, cache_type: CacheType) -> Option<&CachePolicy> {
    self.policies.get(&cache_type)
  }
}

impl Default for PolicyTable {
  fn default() -> Self {
    let policies = CacheType::ALL
      .into_iter()
      .map(|t| (t, t.default_policy()))
      .collect();
    Self { policies }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_every_cache_type_has_default_policy() {
    let table = PolicyTable::default();
    for cache_type in CacheType::ALL {
      assert!(table.get(cache_type).is_some(), "{} missing", cache_type);
    }
  }

  #[test]
  fn test_cache_type_names_round_trip() {
    for cache_type in CacheType::ALL {
      assert_eq!(cache_type.as_str().parse::<CacheType>(), Ok(cache_type));
    }
    assert_eq!(CacheType::parse("not_a_type"), None);
  }

  #[test]
  fn test_expiry_boundary_is_inclusive() {
    let policy = CachePolicy::new(Duration::from_millis(1_000), Tier::Memory);
    assert!(!policy.is_expired(0, 1_000));
    assert!(policy.is_expired(0, 1_001));
  }

  #[test]
  fn test_empty_table_has_no_policies() {
    let table = PolicyTable::empty();
    assert!(table.get(CacheType::Reviews).is_none());
  }
}
