//! Which cached entries a mutation invalidates.

use serde::Deserialize;
use std::collections::BTreeSet;

/// A mutation on any path containing `endpoint` invalidates every cache key
/// containing one of `patterns`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InvalidationRule {
  pub endpoint: String,
  pub patterns: Vec<String>,
}

impl InvalidationRule {
  pub fn new(endpoint: &str, patterns: &[&str]) -> Self {
    Self {
      endpoint: endpoint.to_string(),
      patterns: patterns.iter().map(|p| p.to_string()).collect(),
    }
  }
}

/// Rule set resolved once at configuration time.
///
/// Matching is by substring on both sides, so it is only as precise as the
/// API's endpoint naming.
#[derive(Debug, Clone)]
pub struct InvalidationRules {
  rules: Vec<InvalidationRule>,
}

impl InvalidationRules {
  pub fn new(rules: Vec<InvalidationRule>) -> Self {
    Self { rules }
  }

  pub fn extend(&mut self, rules: impl IntoIterator<Item = InvalidationRule>) {
    self.rules.extend(rules);
  }

  pub fn rules(&self) -> &[InvalidationRule] {
    &self.rules
  }

  /// Cache patterns to invalidate after a successful mutation of `path`.
  pub fn patterns_for(&self, path: &str) -> BTreeSet<String> {
    let path = path.split('?').next().unwrap_or(path);
    self
      .rules
      .iter()
      .filter(|rule| path.contains(rule.endpoint.as_str()))
      .flat_map(|rule| rule.patterns.iter().cloned())
      .collect()
  }
}

impl Default for InvalidationRules {
  fn default() -> Self {
    Self::new(vec![
      InvalidationRule::new("/vetrine", &["vetrine"]),
      InvalidationRule::new("/favorites", &["favorites"]),
      InvalidationRule::new("/reviews", &["reviews"]),
      InvalidationRule::new("/hierarchy", &["hierarchy"]),
    ])
  }
}
