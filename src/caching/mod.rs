//! # Response Caching Module
//!
//! A fail-open cache for successful `GET` responses, sitting in front of the
//! API handlers.
//!
//! ## Architecture
//! 1. **Stores**: the [`CacheBackend`] capability set with three
//!    implementations: Redis ([`RedisBackend`]), an always-missing
//!    [`DegradedBackend`] and a process-local [`InMemoryBackend`]
//! 2. **Key generation**: [`CacheKey`] derives a namespaced key from the
//!    request path and query string
//! 3. **Middleware**: [`CacheLayer`] replays hits and captures 200 responses
//!    on misses, writing them back without delaying the client
//! 4. **Invalidation**: [`InvalidationService`] purges key patterns after writes
//! 5. **Admin**: stats and manual invalidation endpoints
//!
//! Every backend failure degrades to "as if caching were disabled"; nothing
//! in this module turns a cache problem into an error response.
//!
//! ## Usage Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use axum::{routing::get, Router};
//! use api_cache::caching::{connect_backend, CacheLayer, CachePolicy, InvalidationService};
//! use api_cache::core::config::CacheConfig;
//!
//! # async fn run() {
//! let config = CacheConfig::default();
//! let backend = connect_backend(&config);
//! let invalidation = InvalidationService::new(backend.clone());
//!
//! let app: Router = Router::new()
//!     .route("/api/grants", get(|| async { "[]" }))
//!     .layer(CacheLayer::new(backend, CachePolicy::from_config(&config)));
//! # let _ = (app, invalidation);
//! # }
//! ```

pub mod admin;
pub mod entry;
pub mod invalidation;
pub mod key_generator;
pub mod middleware;
pub mod stats;
pub mod stores;

pub use admin::{CacheAdminRouter, CacheAdminState};
pub use entry::CacheEntry;
pub use invalidation::{InvalidationService, InvalidationTarget};
pub use key_generator::{CacheKey, CACHE_PREFIX};
pub use middleware::{CacheLayer, CacheMiddleware, CachePolicy};
pub use stats::{CacheStats, CacheStatsSnapshot};
pub use stores::{
    connect_backend, BackendCounters, BackendState, CacheBackend, DegradedBackend, InMemoryBackend, RedisBackend,
    RedisBackendConfig,
};

/// Cache operation result
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache-specific error types
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache store error: {message}")]
    Store { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Cache configuration error: {message}")]
    Configuration { message: String },

    #[error("Cache operation timeout")]
    Timeout,

    #[error("Cache not available")]
    Unavailable,
}

impl CacheError {
    /// Whether retrying the same command may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout => true,
            Self::Redis(e) => e.is_io_error() || e.is_timeout() || e.is_connection_dropped(),
            _ => false,
        }
    }
}
