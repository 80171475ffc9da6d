//! Deterministic cache keys.

use serde_json::Value;

use super::policy::CacheType;

/// Build the cache key for a response.
///
/// Semantically identical requests map to the same key regardless of the
/// order of keys in `params`. Keys stay human readable so substring
/// invalidation can match on endpoint and category names.
pub fn generate_cache_key(cache_type: CacheType, endpoint: &str, params: &Value) -> String {
  let mut key = format!("{}:{}", cache_type.as_str(), endpoint);
  if !is_empty_params(params) {
    key.push('?');
    write_canonical(params, &mut key);
  }
  key
}

/// Serialize JSON with object keys sorted at every level.
pub fn canonical_json(value: &Value) -> String {
  let mut out = String::new();
  write_canonical(value, &mut out);
  out
}

fn is_empty_params(params: &Value) -> bool {
  match params {
    Value::Null => true,
    Value::Object(map) => map.is_empty(),
    Value::Array(items) => items.is_empty(),
    _ => false,
  }
}

fn write_canonical(value: &Value, out: &mut String) {
  match value {
    Value::Object(map) => {
      let mut entries: Vec<_> = map.iter().collect();
      entries.sort_by(|a, b| a.0.cmp(b.0));
      out.push('{');
      for (i, (k, v)) in entries.into_iter().enumerate() {
        if i > 0 {
          out.push(',');
        }
        out.push_str(&Value::String(k.clone()).to_string());
        out.push(':');
        write_canonical(v, out);
      }
      out.push('}');
    }
    Value::Array(items) => {
      out.push('[');
      for (i, item) in items.iter().enumerate() {
        if i > 0 {
          out.push(',');
        }
        write_canonical(item, out);
      }
      out.push(']');
    }
    scalar => out.push_str(&scalar.to_string()),
  }
}
