//! # api-cache
//!
//! A fail-open HTTP response cache for axum services, backed by Redis.
//!
//! Successful `GET` responses are memoized under keys derived from the
//! request path and query string. Write handlers purge affected entries by
//! pattern. When the store is missing, slow or down, requests behave exactly
//! as if caching were disabled.
//!
//! ## Modules
//! - [`caching`]: backends, key derivation, the tower layer, invalidation, admin routes
//! - [`observability`]: logging setup and health reporting
//! - [`core`]: configuration and application errors
//! - [`gateway`]: router assembly, the grants collection and the HTTP server

pub mod caching;
pub mod core;
pub mod gateway;
pub mod observability;

pub use caching::{
    connect_backend, BackendState, CacheBackend, CacheError, CacheLayer, CachePolicy, CacheResult,
    InvalidationService, InvalidationTarget,
};
pub use core::config::AppConfig;
pub use core::error::{AppError, AppResult};
