//! Core types for the caching system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::policy::CacheType;

/// A cached response body.
///
/// Persisted tiers store this as a JSON string with the fields
/// `data`, `timestamp` and `cacheType`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
  /// Decoded response body
  pub data: Value,
  /// Creation time, milliseconds since the Unix epoch
  pub timestamp: i64,
  pub cache_type: CacheType,
}

impl CacheEntry {
  pub fn new(data: Value, timestamp: i64, cache_type: CacheType) -> Self {
    Self {
      data,
      timestamp,
      cache_type,
    }
  }

  pub fn cached_at(&self) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(self.timestamp).unwrap_or_default()
  }
}

/// Result from a cache-aware request, including data and where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from a fresh cache hit.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::CacheFresh,
      cached_at: Some(cached_at),
    }
  }

  /// Create a new cache result for offline mode (expired data served
  /// because the network was unreachable).
  pub fn offline(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at: Some(cached_at),
    }
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, within its TTL
  CacheFresh,
  /// Network unavailable, serving expired cached data
  Offline,
}
