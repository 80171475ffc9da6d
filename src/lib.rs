//! Client-side caching and request layer for the vetrine document marketplace.
//!
//! - [`cache`]: memory / persistent / session tiers with per-category TTL
//! - [`api`]: single-flight API client that reads through and invalidates the cache
//! - [`context`]: the one place where all of it is wired together

pub mod api;
pub mod cache;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod logging;

pub use context::AppContext;
pub use error::ApiError;
