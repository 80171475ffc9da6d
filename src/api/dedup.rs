//! Single-flight request deduplication with a cache in front.

use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

use super::transport::{HttpRequest, Transport};
use crate::cache::{CacheResult, CacheStore, CacheType};
use crate::error::Result;

type SharedResponse = Shared<BoxFuture<'static, Result<CacheResult<Value>>>>;
type InFlight = Arc<Mutex<HashMap<String, SharedResponse>>>;

/// Where a response is cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSlot {
  pub key: String,
  pub cache_type: CacheType,
}

impl CacheSlot {
  pub fn new(key: impl Into<String>, cache_type: CacheType) -> Self {
    Self {
      key: key.into(),
      cache_type,
    }
  }
}

enum Admission {
  Hit(CacheResult<Value>),
  Pending(SharedResponse),
}

/// Joins concurrent identical requests onto one network call.
///
/// Every caller that arrives while a request with the same identity is in
/// flight awaits the same shared future and receives the same outcome.
/// The request runs on its own task, so it completes and fills the cache
/// even if every caller stops waiting. The in-flight entry is removed as
/// soon as the request settles.
#[derive(Clone)]
pub struct RequestDeduplicator {
  transport: Arc<dyn Transport>,
  cache: Arc<CacheStore>,
  in_flight: InFlight,
}

impl RequestDeduplicator {
  pub fn new(transport: Arc<dyn Transport>, cache: Arc<CacheStore>) -> Self {
    Self {
      transport,
      cache,
      in_flight: Arc::new(Mutex::new(HashMap::new())),
    }
  }

  /// Number of requests currently in flight.
  pub fn in_flight_count(&self) -> usize {
    lock(&self.in_flight).len()
  }

  /// Execute `request`, joining an identical in-flight request if there is
  /// one and answering from the cache when `slot` holds a fresh entry.
  pub async fn execute(
    &self,
    request: HttpRequest,
    slot: Option<CacheSlot>,
  ) -> Result<CacheResult<Value>> {
    match self.admit(request, slot) {
      Admission::Hit(result) => Ok(result),
      Admission::Pending(pending) => pending.await,
    }
  }

  fn admit(&self, request: HttpRequest, slot: Option<CacheSlot>) -> Admission {
    let id = request.identity();

    let joined = lock(&self.in_flight).get(&id).cloned();
    if let Some(pending) = joined {
      debug!(url = %request.url, "joining in-flight request");
      return Admission::Pending(pending);
    }

    // Peek rather than read: an expired entry must survive for the
    // offline fallback in `run`.
    if let Some(slot) = &slot {
      if let Some((entry, true)) = self.cache.peek(&slot.key, slot.cache_type) {
        let cached_at = entry.cached_at();
        return Admission::Hit(CacheResult::from_cache(entry.data, cached_at));
      }
    }

    let mut in_flight = lock(&self.in_flight);
    if let Some(pending) = in_flight.get(&id) {
      debug!(url = %request.url, "joining in-flight request");
      return Admission::Pending(pending.clone());
    }

    // Registered before the task starts, so the task's guard always finds
    // its own entry to clear.
    let guard = FlightGuard {
      in_flight: Arc::clone(&self.in_flight),
      id: id.clone(),
    };
    let (task, handle) = run(
      Arc::clone(&self.transport),
      Arc::clone(&self.cache),
      guard,
      request,
      slot,
    )
    .remote_handle();
    let pending = handle.boxed().shared();
    in_flight.insert(id, pending.clone());
    drop(in_flight);

    tokio::spawn(task);
    Admission::Pending(pending)
  }
}

fn lock(in_flight: &InFlight) -> MutexGuard<'_, HashMap<String, SharedResponse>> {
  in_flight.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clears the in-flight entry when the request task ends, even if it panics
/// or is aborted.
struct FlightGuard {
  in_flight: InFlight,
  id: String,
}

impl Drop for FlightGuard {
  fn drop(&mut self) {
    lock(&self.in_flight).remove(&self.id);
  }
}

async fn run(
  transport: Arc<dyn Transport>,
  cache: Arc<CacheStore>,
  guard: FlightGuard,
  request: HttpRequest,
  slot: Option<CacheSlot>,
) -> Result<CacheResult<Value>> {
  let url = request.url.to_string();
  debug!(method = %request.method, %url, "sending request");

  let outcome = match transport.send(request).await {
    Ok(response) => response.into_json(),
    Err(e) => Err(e),
  };

  let result = match outcome {
    Ok(data) => {
      if let Some(slot) = &slot {
        cache.set(&slot.key, data.clone(), slot.cache_type);
      }
      Ok(CacheResult::from_network(data))
    }
    Err(err) if err.is_network() => {
      let stale = slot
        .as_ref()
        .and_then(|slot| cache.lookup(&slot.key, slot.cache_type, true));
      match stale {
        Some(entry) => {
          warn!(%url, error = %err, "network unavailable, serving expired cache entry");
          let cached_at = entry.cached_at();
          Ok(CacheResult::offline(entry.data, cached_at))
        }
        None => Err(err),
      }
    }
    Err(err) => Err(err),
  };

  drop(guard);
  result
}
