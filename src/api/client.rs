//! API client with transparent caching, deduplication and invalidation.

use futures::future::join_all;
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;
use url::Url;

use super::auth::Credentials;
use super::dedup::{CacheSlot, RequestDeduplicator};
use super::invalidation::InvalidationRules;
use super::transport::{HttpRequest, Method, Transport};
use crate::cache::{generate_cache_key, CacheResult, CacheStore, CacheType};
use crate::error::{ApiError, Result};

/// Per-request options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOptions {
  /// Query parameters, always sent sorted by name
  pub query: BTreeMap<String, String>,
  /// Extra headers; names are lowercased
  pub headers: BTreeMap<String, String>,
  /// Cache category for GET responses; `None` means never cached
  pub cache_type: Option<CacheType>,
  /// Do not send the stored bearer token
  pub skip_auth: bool,
}

impl RequestOptions {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.query.insert(name.into(), value.into());
    self
  }

  pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
    self.headers.insert(name.to_ascii_lowercase(), value.into());
    self
  }

  pub fn cached(mut self, cache_type: CacheType) -> Self {
    self.cache_type = Some(cache_type);
    self
  }

  pub fn skip_auth(mut self) -> Self {
    self.skip_auth = true;
    self
  }
}

/// One request of a [`ApiClient::batch`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchRequest {
  Get {
    path: String,
    options: RequestOptions,
  },
  Post {
    path: String,
    body: Value,
    options: RequestOptions,
  },
  Delete {
    path: String,
    options: RequestOptions,
  },
}

impl BatchRequest {
  pub fn get(path: impl Into<String>, options: RequestOptions) -> Self {
    BatchRequest::Get {
      path: path.into(),
      options,
    }
  }

  pub fn post(path: impl Into<String>, body: Value, options: RequestOptions) -> Self {
    BatchRequest::Post {
      path: path.into(),
      body,
      options,
    }
  }

  pub fn delete(path: impl Into<String>, options: RequestOptions) -> Self {
    BatchRequest::Delete {
      path: path.into(),
      options,
    }
  }
}

/// Marketplace API client.
///
/// GETs go through the deduplicator and, when a cache category is given,
/// the cache store. Mutations are never served from cache and invalidate
/// related entries once they succeed.
#[derive(Clone)]
pub struct ApiClient {
  base_url: Url,
  credentials: Arc<Credentials>,
  cache: Arc<CacheStore>,
  dedup: RequestDeduplicator,
  rules: Arc<InvalidationRules>,
}

impl ApiClient {
  pub fn new(
    base_url: Url,
    transport: Arc<dyn Transport>,
    credentials: Arc<Credentials>,
    cache: Arc<CacheStore>,
    rules: InvalidationRules,
  ) -> Self {
    Self {
      base_url,
      credentials,
      dedup: RequestDeduplicator::new(transport, Arc::clone(&cache)),
      cache,
      rules: Arc::new(rules),
    }
  }

  pub fn base_url(&self) -> &Url {
    &self.base_url
  }

  pub fn cache(&self) -> &Arc<CacheStore> {
    &self.cache
  }

  pub fn credentials(&self) -> &Arc<Credentials> {
    &self.credentials
  }

  pub fn deduplicator(&self) -> &RequestDeduplicator {
    &self.dedup
  }

  /// Full URL for `path` with the query parameters appended in name order.
  pub fn url(&self, path: &str, query: &BTreeMap<String, String>) -> Result<Url> {
    let base = self.base_url.as_str().trim_end_matches('/');
    let separator = if path.starts_with('/') { "" } else { "/" };
    let raw = format!("{}{}{}", base, separator, path);

    let mut url = Url::parse(&raw).map_err(|e| ApiError::InvalidUrl(format!("{}: {}", raw, e)))?;
    if !query.is_empty() {
      let mut pairs = url.query_pairs_mut();
      for (name, value) in query {
        pairs.append_pair(name, value);
      }
    }
    Ok(url)
  }

  fn build_request(
    &self,
    method: Method,
    path: &str,
    body: Option<Value>,
    options: &RequestOptions,
  ) -> Result<HttpRequest> {
    let mut request = HttpRequest::new(method, self.url(path, &options.query)?);
    request
      .headers
      .insert("accept".to_string(), "application/json".to_string());
    for (name, value) in &options.headers {
      request
        .headers
        .insert(name.to_ascii_lowercase(), value.clone());
    }

    if !options.skip_auth && !request.headers.contains_key("authorization") {
      if let Some(bearer) = self.credentials.bearer() {
        request.headers.insert("authorization".to_string(), bearer);
      }
    }

    request.body = body;
    Ok(request)
  }

  fn cache_slot(path: &str, options: &RequestOptions) -> Option<CacheSlot> {
    let cache_type = options.cache_type?;
    let params: Map<String, Value> = options
      .query
      .iter()
      .map(|(k, v)| (k.clone(), Value::String(v.clone())))
      .collect();
    let key = generate_cache_key(cache_type, path, &Value::Object(params));
    Some(CacheSlot::new(key, cache_type))
  }

  /// GET `path`, reporting whether the data came from the network or cache.
  pub async fn fetch(&self, path: &str, options: RequestOptions) -> Result<CacheResult<Value>> {
    let path = normalize_path(path);
    let request = self.build_request(Method::Get, &path, None, &options)?;
    let slot = Self::cache_slot(&path, &options);
    self.dedup.execute(request, slot).await
  }

  pub async fn get(&self, path: &str, options: RequestOptions) -> Result<Value> {
    self.fetch(path, options).await.map(|result| result.data)
  }

  pub async fn post(&self, path: &str, body: Value, options: RequestOptions) -> Result<Value> {
    self.mutate(Method::Post, path, Some(body), options).await
  }

  pub async fn delete(&self, path: &str, options: RequestOptions) -> Result<Value> {
    self.mutate(Method::Delete, path, None, options).await
  }

  async fn mutate(
    &self,
    method: Method,
    path: &str,
    body: Option<Value>,
    options: RequestOptions,
  ) -> Result<Value> {
    let path = normalize_path(path);
    let request = self.build_request(method, &path, body, &options)?;
    let result = self.dedup.execute(request, None).await?;
    self.invalidate_after(method, &path);
    Ok(result.data)
  }

  fn invalidate_after(&self, method: Method, path: &str) {
    for pattern in self.rules.patterns_for(path) {
      let removed = self.cache.invalidate(&pattern);
      debug!(%method, path, pattern = %pattern, removed, "invalidated after mutation");
    }
  }

  /// Run every request concurrently. Each gets its own outcome, in input
  /// order; one failure never cancels the others.
  pub async fn batch(&self, requests: Vec<BatchRequest>) -> Vec<Result<Value>> {
    join_all(requests.into_iter().map(|request| self.dispatch(request))).await
  }

  async fn dispatch(&self, request: BatchRequest) -> Result<Value> {
    match request {
      BatchRequest::Get { path, options } => self.get(&path, options).await,
      BatchRequest::Post {
        path,
        body,
        options,
      } => self.post(&path, body, options).await,
      BatchRequest::Delete { path, options } => self.delete(&path, options).await,
    }
  }
}

/// Cache keys and invalidation rules always see the leading slash.
fn normalize_path(path: &str) -> Cow<'_, str> {
  if path.starts_with('/') {
    Cow::Borrowed(path)
  } else {
    Cow::Owned(format!("/{}", path))
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use crate::api::testing::{FakeTransport, Reply};
  use crate::cache::{CacheSource, PolicyTable, SqliteStorage};
  use serde_json::json;
  use std::time::Duration;

  pub(crate) fn client_with(transport: FakeTransport) -> (ApiClient, Arc<FakeTransport>) {
    let transport = Arc::new(transport);
    let cache = Arc::new(CacheStore::new(
      Arc::new(SqliteStorage::in_memory().unwrap()),
      Arc::new(SqliteStorage::in_memory().unwrap()),
      PolicyTable::default(),
    ));
    let client = ApiClient::new(
      Url::parse("https://api.test/api/").unwrap(),
      transport.clone(),
      Arc::new(Credentials::new(Some("tok".to_string()))),
      cache,
      InvalidationRules::default(),
    );
    (client, transport)
  }

  #[test]
  fn test_url_keeps_base_path_and_sorts_query() {
    let (client, _) = client_with(FakeTransport::new());
    let query = BTreeMap::from([
      ("page".to_string(), "2".to_string()),
      ("course".to_string(), "analisi 1".to_string()),
    ]);
    let url = client.url("/vetrine/search", &query).unwrap();
    assert_eq!(
      url.as_str(),
      "https://api.test/api/vetrine/search?course=analisi+1&page=2"
    );
    assert_eq!(
      client.url("hierarchy", &BTreeMap::new()).unwrap().as_str(),
      "https://api.test/api/hierarchy"
    );
  }

  #[tokio::test]
  async fn test_get_injects_bearer_token() {
    let (client, transport) =
      client_with(FakeTransport::new().json(Method::Get, "/api/hierarchy", 200, json!({})));

    client.get("/hierarchy", RequestOptions::new()).await.unwrap();

    let calls = transport.calls();
    assert_eq!(calls[0].headers.get("authorization").map(String::as_str), Some("Bearer tok"));
    assert_eq!(calls[0].headers.get("accept").map(String::as_str), Some("application/json"));
  }

  #[tokio::test]
  async fn test_skip_auth_omits_token() {
    let (client, transport) =
      client_with(FakeTransport::new().json(Method::Get, "/api/hierarchy", 200, json!({})));

    client
      .get("/hierarchy", RequestOptions::new().skip_auth())
      .await
      .unwrap();

    assert!(!transport.calls()[0].headers.contains_key("authorization"));
  }

  #[tokio::test]
  async fn test_cached_get_hits_network_once() {
    let (client, transport) =
      client_with(FakeTransport::new().json(Method::Get, "/api/vetrine", 200, json!([1])));
    let options = RequestOptions::new().cached(CacheType::VetrineList);

    let first = client.fetch("/vetrine", options.clone()).await.unwrap();
    let second = client.fetch("/vetrine", options).await.unwrap();

    assert_eq!(first.source, CacheSource::Network);
    assert_eq!(second.source, CacheSource::CacheFresh);
    assert_eq!(transport.call_count(), 1);
  }

  #[tokio::test]
  async fn test_uncached_get_always_hits_network() {
    let (client, transport) =
      client_with(FakeTransport::new().json(Method::Get, "/api/vetrine", 200, json!([1])));

    client.get("/vetrine", RequestOptions::new()).await.unwrap();
    client.get("/vetrine", RequestOptions::new()).await.unwrap();

    assert_eq!(transport.call_count(), 2);
  }

  #[tokio::test]
  async fn test_post_invalidates_related_entries_only() {
    let (client, _) = client_with(FakeTransport::new().json(
      Method::Post,
      "/api/vetrine/42/files",
      201,
      json!({"id": 9}),
    ));
    let cache = client.cache();
    cache.set("vetrine_list", json!([1, 2]), CacheType::VetrineList);
    cache.set("reviews_42", json!([{"rating": 5}]), CacheType::Reviews);

    client
      .post("/vetrine/42/files", json!({"name": "appunti.pdf"}), RequestOptions::new())
      .await
      .unwrap();

    assert_eq!(cache.get("vetrine_list", CacheType::VetrineList, false), None);
    assert_eq!(
      cache.get("reviews_42", CacheType::Reviews, false),
      Some(json!([{"rating": 5}]))
    );
  }

  #[tokio::test]
  async fn test_post_without_leading_slash_still_invalidates() {
    let (client, transport) = client_with(FakeTransport::new().json(
      Method::Post,
      "/api/vetrine/42/files",
      201,
      json!({"id": 9}),
    ));
    let cache = client.cache();
    cache.set("vetrine_list:/vetrine", json!([1]), CacheType::VetrineList);

    client
      .post("vetrine/42/files", json!({"name": "appunti.pdf"}), RequestOptions::new())
      .await
      .unwrap();

    assert_eq!(
      transport.calls()[0].url.as_str(),
      "https://api.test/api/vetrine/42/files"
    );
    assert_eq!(cache.get("vetrine_list:/vetrine", CacheType::VetrineList, false), None);
  }

  #[tokio::test]
  async fn test_paths_with_and_without_slash_share_cache_entry() {
    let (client, transport) =
      client_with(FakeTransport::new().json(Method::Get, "/api/hierarchy", 200, json!({})));
    let options = RequestOptions::new().cached(CacheType::Hierarchy);

    client.get("/hierarchy", options.clone()).await.unwrap();
    let second = client.fetch("hierarchy", options).await.unwrap();

    assert_eq!(second.source, CacheSource::CacheFresh);
    assert_eq!(transport.call_count(), 1);
  }

  #[tokio::test]
  async fn test_failed_mutation_does_not_invalidate() {
    let (client, _) = client_with(FakeTransport::new().json(
      Method::Delete,
      "/api/user/favorites/vetrine/3",
      500,
      json!({"message": "nope"}),
    ));
    client
      .cache()
      .set("favorites:/user/favorites", json!([3]), CacheType::Favorites);

    let err = client
      .delete("/user/favorites/vetrine/3", RequestOptions::new())
      .await
      .unwrap_err();

    assert_eq!(err.status(), Some(500));
    assert!(client
      .cache()
      .get("favorites:/user/favorites", CacheType::Favorites, false)
      .is_some());
  }

  #[tokio::test]
  async fn test_post_is_never_served_from_cache() {
    let (client, transport) = client_with(FakeTransport::new().json(
      Method::Post,
      "/api/vetrine/1/reviews",
      201,
      json!({"ok": true}),
    ));
    let body = json!({"rating": 4});

    client
      .post("/vetrine/1/reviews", body.clone(), RequestOptions::new().cached(CacheType::Reviews))
      .await
      .unwrap();
    client
      .post("/vetrine/1/reviews", body, RequestOptions::new().cached(CacheType::Reviews))
      .await
      .unwrap();

    assert_eq!(transport.call_count(), 2);
  }

  #[tokio::test]
  async fn test_batch_settles_every_request() {
    let (client, transport) = client_with(
      FakeTransport::new()
        .with_delay(Duration::from_millis(10))
        .json(Method::Get, "/api/hierarchy", 200, json!({"h": 1}))
        .json(Method::Get, "/api/vetrine", 200, json!([1])),
    );
    transport.reply(Method::Get, "/api/vetrine/9/files", Reply::NetworkError("reset".into()));

    let results = client
      .batch(vec![
        BatchRequest::get("/hierarchy", RequestOptions::new()),
        BatchRequest::get("/vetrine/9/files", RequestOptions::new()),
        BatchRequest::get("/vetrine", RequestOptions::new()),
        BatchRequest::get("/hierarchy", RequestOptions::new()),
      ])
      .await;

    assert_eq!(results.len(), 4);
    assert_eq!(results[0].as_ref().unwrap(), &json!({"h": 1}));
    assert!(results[1].as_ref().unwrap_err().is_network());
    assert_eq!(results[2].as_ref().unwrap(), &json!([1]));
    assert_eq!(results[3].as_ref().unwrap(), &json!({"h": 1}));
    // The two identical hierarchy requests shared one call.
    assert_eq!(transport.call_count(), 3);
  }

  #[tokio::test]
  async fn test_query_order_does_not_change_cache_key() {
    let (client, transport) = client_with(FakeTransport::new().json(
      Method::Get,
      "/api/vetrine/search",
      200,
      json!([]),
    ));

    let a = RequestOptions::new()
      .query("b", "2")
      .query("a", "1")
      .cached(CacheType::SearchResults);
    let b = RequestOptions::new()
      .query("a", "1")
      .query("b", "2")
      .cached(CacheType::SearchResults);

    client.get("/vetrine/search", a).await.unwrap();
    client.get("/vetrine/search", b).await.unwrap();

    assert_eq!(transport.call_count(), 1);
  }
}
