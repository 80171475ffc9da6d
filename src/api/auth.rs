//! Stored bearer credential.

use std::fmt;
use std::sync::{PoisonError, RwLock};

/// Environment variable holding the API token.
pub const TOKEN_ENV: &str = "VETRINA_API_TOKEN";

/// Bearer token shared by every request of a client.
#[derive(Default)]
pub struct Credentials {
  token: RwLock<Option<String>>,
}

impl Credentials {
  pub fn new(token: Option<String>) -> Self {
    let credentials = Self::default();
    if let Some(token) = token {
      credentials.set(token);
    }
    credentials
  }

  /// Read the token from `VETRINA_API_TOKEN`, if set.
  pub fn from_env() -> Self {
    Self::new(std::env::var(TOKEN_ENV).ok())
  }

  /// Store a token. Blank tokens clear the credential.
  pub fn set(&self, token: impl Into<String>) {
    let token = token.into();
    let token = token.trim();
    let value = (!token.is_empty()).then(|| token.to_string());
    *self.token.write().unwrap_or_else(PoisonError::into_inner) = value;
  }

  pub fn clear(&self) {
    *self.token.write().unwrap_or_else(PoisonError::into_inner) = None;
  }

  pub fn is_present(&self) -> bool {
    self.token.read().unwrap_or_else(PoisonError::into_inner).is_some()
  }

  /// Value for the `Authorization` header.
  pub fn bearer(&self) -> Option<String> {
    self
      .token
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .as_ref()
      .map(|token| format!("Bearer {}", token))
  }
}

impl fmt::Debug for Credentials {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = if self.is_present() { "<redacted>" } else { "<none>" };
    f.debug_struct("Credentials").field("token", &state).finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_bearer_header_value() {
    let credentials = Credentials::new(Some("abc".to_string()));
    assert_eq!(credentials.bearer().as_deref(), Some("Bearer abc"));
  }

  #[test]
  fn test_blank_token_is_absent() {
    let credentials = Credentials::new(Some("  ".to_string()));
    assert!(!credentials.is_present());
    assert_eq!(credentials.bearer(), None);
  }

  #[test]
  fn test_clear_removes_token() {
    let credentials = Credentials::new(Some("abc".to_string()));
    credentials.clear();
    assert_eq!(credentials.bearer(), None);
  }

  #[test]
  fn test_debug_never_prints_token() {
    let credentials = Credentials::new(Some("secret".to_string()));
    assert!(!format!("{:?}", credentials).contains("secret"));
  }
}
