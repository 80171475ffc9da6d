//! Scripted transport for tests.

use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use super::transport::{HttpRequest, HttpResponse, Method, Transport};
use crate::error::{ApiError, Result};

#[derive(Debug, Clone)]
pub enum Reply {
  Json(u16, Value),
  NetworkError(String),
}

/// Transport that answers from a script keyed by method and URL path,
/// recording every request it sees.
pub struct FakeTransport {
  replies: Mutex<HashMap<(Method, String), Reply>>,
  calls: Mutex<Vec<HttpRequest>>,
  delay: Duration,
}

impl FakeTransport {
  pub fn new() -> Self {
    Self {
      replies: Mutex::new(HashMap::new()),
      calls: Mutex::new(Vec::new()),
      delay: Duration::from_millis(0),
    }
  }

  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = delay;
    self
  }

  pub fn reply(&self, method: Method, path: &str, reply: Reply) {
    self
      .replies
      .lock()
      .unwrap()
      .insert((method, path.to_string()), reply);
  }

  pub fn json(self, method: Method, path: &str, status: u16, body: Value) -> Self {
    self.reply(method, path, Reply::Json(status, body));
    self
  }

  pub fn calls(&self) -> Vec<HttpRequest> {
    self.calls.lock().unwrap().clone()
  }

  pub fn call_count(&self) -> usize {
    self.calls.lock().unwrap().len()
  }
}

impl Transport for FakeTransport {
  fn send(&self, request: HttpRequest) -> BoxFuture<'static, Result<HttpResponse>> {
    let reply = self
      .replies
      .lock()
      .unwrap()
      .get(&(request.method, request.url.path().to_string()))
      .cloned();
    self.calls.lock().unwrap().push(request);
    let delay = self.delay;

    Box::pin(async move {
      if !delay.is_zero() {
        tokio::time::sleep(delay).await;
      }
      match reply {
        Some(Reply::Json(status, body)) => Ok(HttpResponse::new(status, body.to_string())),
        Some(Reply::NetworkError(message)) => Err(ApiError::Network(message)),
        None => Ok(HttpResponse::new(404, r#"{"message":"no route"}"#)),
      }
    })
  }
}
