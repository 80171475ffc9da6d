//! Error types surfaced by the API layer.

use thiserror::Error;

/// Errors returned to callers of the API facade.
///
/// `Clone` because a single failed request fans out to every caller that
/// joined it through the deduplicator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
  /// The request never produced an HTTP response (DNS, connect, TLS, reset).
  #[error("network error: {0}")]
  Network(String),

  /// The server answered with a non-2xx status.
  #[error("HTTP {status}: {message}")]
  Http { status: u16, message: String },

  /// A 2xx response whose body was not valid JSON.
  #[error("failed to decode response body: {0}")]
  Decode(String),

  #[error("invalid URL: {0}")]
  InvalidUrl(String),

  #[error("invalid header: {0}")]
  InvalidHeader(String),
}

impl ApiError {
  /// HTTP status code, if this is an HTTP-level failure.
  pub fn status(&self) -> Option<u16> {
    match self {
      ApiError::Http { status, .. } => Some(*status),
      _ => None,
    }
  }

  pub fn is_network(&self) -> bool {
    matches!(self, ApiError::Network(_))
  }

  pub fn is_unauthorized(&self) -> bool {
    self.status() == Some(401)
  }
}

pub type Result<T> = std::result::Result<T, ApiError>;
