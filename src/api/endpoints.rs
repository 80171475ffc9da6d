//! Typed calls for the marketplace endpoints.

use serde_json::{json, Value};

use super::client::{ApiClient, RequestOptions};
use crate::cache::CacheType;
use crate::error::Result;

pub const VETRINE: &str = "/vetrine";
pub const VETRINE_SEARCH: &str = "/vetrine/search";
pub const FAVORITES: &str = "/user/favorites";
pub const HIERARCHY: &str = "/hierarchy";

pub fn vetrina_files(id: u64) -> String {
  format!("/vetrine/{}/files", id)
}

pub fn vetrina_reviews(id: u64) -> String {
  format!("/vetrine/{}/reviews", id)
}

pub fn favorite_vetrina(id: u64) -> String {
  format!("/user/favorites/vetrine/{}", id)
}

fn with_filters<'a>(
  options: RequestOptions,
  filters: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> RequestOptions {
  filters
    .into_iter()
    .fold(options, |options, (name, value)| options.query(name, value))
}

impl ApiClient {
  /// List showcases, optionally filtered (course, faculty, page...).
  pub async fn list_vetrine<'a>(
    &self,
    filters: impl IntoIterator<Item = (&'a str, &'a str)>,
  ) -> Result<Value> {
    let options = with_filters(RequestOptions::new().cached(CacheType::VetrineList), filters);
    self.get(VETRINE, options).await
  }

  /// Full-text search over showcases.
  pub async fn search_vetrine<'a>(
    &self,
    text: &str,
    filters: impl IntoIterator<Item = (&'a str, &'a str)>,
  ) -> Result<Value> {
    let options = with_filters(
      RequestOptions::new()
        .cached(CacheType::SearchResults)
        .query("text", text),
      filters,
    );
    self.get(VETRINE_SEARCH, options).await
  }

  pub async fn vetrina_files(&self, id: u64) -> Result<Value> {
    let options = RequestOptions::new().cached(CacheType::VetrinaFiles);
    self.get(&vetrina_files(id), options).await
  }

  pub async fn vetrina_reviews(&self, id: u64) -> Result<Value> {
    let options = RequestOptions::new().cached(CacheType::Reviews);
    self.get(&vetrina_reviews(id), options).await
  }

  pub async fn add_review(&self, id: u64, rating: u8, comment: &str) -> Result<Value> {
    let body = json!({ "rating": rating, "comment": comment });
    self
      .post(&vetrina_reviews(id), body, RequestOptions::new())
      .await
  }

  pub async fn favorites(&self) -> Result<Value> {
    let options = RequestOptions::new().cached(CacheType::Favorites);
    self.get(FAVORITES, options).await
  }

  pub async fn add_favorite(&self, id: u64) -> Result<Value> {
    self
      .post(&favorite_vetrina(id), Value::Null, RequestOptions::new())
      .await
  }

  pub async fn remove_favorite(&self, id: u64) -> Result<Value> {
    self
      .delete(&favorite_vetrina(id), RequestOptions::new())
      .await
  }

  /// Faculty / course hierarchy. Changes rarely, so it lives in the
  /// persistent tier.
  pub async fn hierarchy(&self) -> Result<Value> {
    let options = RequestOptions::new().cached(CacheType::Hierarchy);
    self.get(HIERARCHY, options).await
  }
}
