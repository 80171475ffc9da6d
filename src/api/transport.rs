//! HTTP transport seam and the reqwest-backed implementation.

use futures::future::BoxFuture;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use url::Url;

use crate::cache::canonical_json;
use crate::error::{ApiError, Result};

/// HTTP verbs used by the marketplace API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
  Get,
  Post,
  Delete,
}

impl Method {
  pub fn as_str(&self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Post => "POST",
      Method::Delete => "DELETE",
    }
  }
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl From<Method> for reqwest::Method {
  fn from(method: Method) -> Self {
    match method {
      Method::Get => reqwest::Method::GET,
      Method::Post => reqwest::Method::POST,
      Method::Delete => reqwest::Method::DELETE,
    }
  }
}

/// A fully built request. Header names are lowercase.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
  pub method: Method,
  pub url: Url,
  pub headers: BTreeMap<String, String>,
  pub body: Option<Value>,
}

impl HttpRequest {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      headers: BTreeMap::new(),
      body: None,
    }
  }

  /// Stable identity used to join concurrent identical requests.
  ///
  /// Covers method, URL, headers and body, so a GET and a POST to the same
  /// URL never share a result.
  pub fn identity(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_str().as_bytes());
    hasher.update(b"\n");
    hasher.update(self.url.as_str().as_bytes());
    hasher.update(b"\n");
    for (name, value) in &self.headers {
      hasher.update(name.as_bytes());
      hasher.update(b":");
      hasher.update(value.as_bytes());
      hasher.update(b"\n");
    }
    if let Some(body) = &self.body {
      hasher.update(canonical_json(body).as_bytes());
    }
    hex::encode(hasher.finalize())
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
  pub status: u16,
  pub body: String,
}

impl HttpResponse {
  pub fn new(status: u16, body: impl Into<String>) -> Self {
    Self {
      status,
      body: body.into(),
    }
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Decode a 2xx body as JSON, or turn anything else into an HTTP error.
  ///
  /// An empty success body decodes to `null`.
  pub fn into_json(self) -> Result<Value> {
    if !self.is_success() {
      let message = error_message(self.status, &self.body);
      return Err(ApiError::Http {
        status: self.status,
        message,
      });
    }

    if self.body.trim().is_empty() {
      return Ok(Value::Null);
    }

    serde_json::from_str(&self.body).map_err(|e| ApiError::Decode(e.to_string()))
  }
}

/// Pull a human readable message out of an error body.
fn error_message(status: u16, body: &str) -> String {
  if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) {
    for field in ["message", "error", "detail"] {
      if let Some(Value::String(message)) = map.get(field) {
        return message.clone();
      }
    }
  }

  let trimmed = body.trim();
  if !trimmed.is_empty() {
    return trimmed.chars().take(200).collect();
  }

  reqwest::StatusCode::from_u16(status)
    .ok()
    .and_then(|s| s.canonical_reason())
    .unwrap_or("request failed")
    .to_string()
}

/// Sends requests over the network.
///
/// The returned future is `'static` so it can be shared between callers.
pub trait Transport: Send + Sync {
  fn send(&self, request: HttpRequest) -> BoxFuture<'static, Result<HttpResponse>>;
}

/// Transport backed by a pooled reqwest client.
#[derive(Clone)]
pub struct ReqwestTransport {
  client: reqwest::Client,
}

impl ReqwestTransport {
  pub fn new(timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .user_agent(concat!("vetrina/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| ApiError::Network(e.to_string()))?;

    Ok(Self { client })
  }
}

fn header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap> {
  let mut map = HeaderMap::new();
  for (name, value) in headers {
    let name = HeaderName::from_bytes(name.as_bytes())
      .map_err(|e| ApiError::InvalidHeader(format!("{}: {}", name, e)))?;
    let value =
      HeaderValue::from_str(value).map_err(|e| ApiError::InvalidHeader(format!("{}: {}", name, e)))?;
    map.insert(name, value);
  }
  Ok(map)
}

impl Transport for ReqwestTransport {
  fn send(&self, request: HttpRequest) -> BoxFuture<'static, Result<HttpResponse>> {
    let client = self.client.clone();

    Box::pin(async move {
      let mut headers = header_map(&request.headers)?;
      let mut builder = client.request(request.method.into(), request.url);

      if let Some(body) = &request.body {
        headers
          .entry(CONTENT_TYPE)
          .or_insert(HeaderValue::from_static("application/json"));
        builder = builder.body(body.to_string());
      }

      let response = builder
        .headers(headers)
        .send()
        .await
        .map_err(|e| ApiError::Network(e.to_string()))?;

      let status = response.status().as_u16();
      let body = response
        .text()
        .await
        .map_err(|e| ApiError::Network(e.to_string()))?;

      Ok(HttpResponse { status, body })
    })
  }
}
