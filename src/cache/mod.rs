//! Multi-tier response cache.
//!
//! This module provides the caching mechanism behind the API client:
//! - Named cache categories, each with a TTL and a backing tier
//! - A memory tier in front of persistent and session stores
//! - Substring invalidation after mutations
//! - A periodic sweep of expired entries

mod entry;
mod key;
mod policy;
mod storage;
mod store;
mod sweeper;

pub use entry::{CacheEntry, CacheResult, CacheSource};
pub use key::{canonical_json, generate_cache_key};
pub use policy::{CachePolicy, CacheType, PolicyTable, Tier};
pub use storage::{NoopStorage, SqliteStorage, StorageError, StorageResult, StorageTier};
pub use store::{CacheStats, CacheStore};
pub use sweeper::{CacheSweeper, DEFAULT_SWEEP_INTERVAL};
