//! Client for the marketplace REST API.

mod auth;
mod client;
mod dedup;
pub mod endpoints;
mod invalidation;
mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use auth::{Credentials, TOKEN_ENV};
pub use client::{ApiClient, BatchRequest, RequestOptions};
pub use dedup::{CacheSlot, RequestDeduplicator};
pub use invalidation::{InvalidationRule, InvalidationRules};
pub use transport::{HttpRequest, HttpResponse, Method, ReqwestTransport, Transport};
