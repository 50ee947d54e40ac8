//! # Cache Middleware
//!
//! Tower layer that memoizes successful `GET` responses.
//!
//! - **Hit**: the stored status, headers and body are replayed and the inner
//!   service is never called.
//! - **Miss**: the inner service runs; if it answers `200 OK` with a body of
//!   known size within the policy limit, the finalized status, headers and
//!   body are captured and written back on a spawned task. The client gets
//!   the response without waiting for that write.
//!
//! Failure policy is fail-open throughout. A backend that is not ready, a
//! failed lookup, an undecodable entry or a failed write all result in exactly
//! the response the inner service would have produced with caching disabled.
//! The inner service's own error type passes through untouched.

use super::entry::CacheEntry;
use super::key_generator::CacheKey;
use super::stats::CacheStats;
use super::stores::CacheBackend;
use crate::core::config::CacheConfig;
use axum::body::Body;
use axum::extract::Request;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::future::BoxFuture;
use http_body::Body as _;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tower::{Layer, Service};
use tracing::{debug, warn};

/// What gets cached and for how long
#[derive(Debug, Clone)]
pub struct CachePolicy {
    /// TTL for stored responses
    pub ttl: Duration,

    /// Bodies larger than this (or of unknown size) are not captured
    pub max_body_bytes: usize,
}

impl CachePolicy {
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            ttl: config.default_ttl,
            max_body_bytes: config.max_body_bytes,
        }
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

/// Response cache layer
///
/// Holds the process-wide backend handle; every service produced by
/// [`Layer::layer`] shares it, along with the statistics counters.
#[derive(Clone)]
pub struct CacheLayer {
    backend: Arc<dyn CacheBackend>,
    policy: CachePolicy,
    stats: Arc<CacheStats>,
}

impl CacheLayer {
    pub fn new(backend: Arc<dyn CacheBackend>, policy: CachePolicy) -> Self {
        Self {
            backend,
            policy,
            stats: Arc::new(CacheStats::new()),
        }
    }

    /// Share an existing counter set (e.g. the one exposed by the admin router)
    pub fn with_stats(mut self, stats: Arc<CacheStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn stats(&self) -> Arc<CacheStats> {
        Arc::clone(&self.stats)
    }
}

impl<S> Layer<S> for CacheLayer {
    type Service = CacheMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CacheMiddleware {
            inner,
            backend: Arc::clone(&self.backend),
            policy: self.policy.clone(),
            stats: Arc::clone(&self.stats),
        }
    }
}

/// Response cache service produced by [`CacheLayer`]
#[derive(Clone)]
pub struct CacheMiddleware<S> {
    inner: S,
    backend: Arc<dyn CacheBackend>,
    policy: CachePolicy,
    stats: Arc<CacheStats>,
}

impl<S> Service<Request> for CacheMiddleware<S>
where
    S: Service<Request> + Clone + Send + 'static,
    S::Response: IntoResponse + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        if request.method() != Method::GET {
            let future = self.inner.call(request);
            return Box::pin(async move { Ok(future.await?.into_response()) });
        }

        // the driven instance is the one poll_ready was called on
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let backend = Arc::clone(&self.backend);
        let policy = self.policy.clone();
        let stats = Arc::clone(&self.stats);

        Box::pin(async move {
            let key = CacheKey::from_uri(request.uri());

            let state = backend.state();
            if !state.is_ready() {
                warn!(key = %key, backend = backend.name(), %state, "Cache backend not ready; bypassing cache");
                stats.record_bypass();
                return Ok(inner.call(request).await?.into_response());
            }

            if let Some(response) = lookup(backend.as_ref(), &key, &stats).await {
                return Ok(response);
            }

            stats.record_miss();
            let response = inner.call(request).await?.into_response();
            Ok(capture(response, key, backend, &policy, stats).await)
        })
    }
}

/// Fetch and decode a stored entry; every failure is reported as a miss
async fn lookup(backend: &dyn CacheBackend, key: &CacheKey, stats: &CacheStats) -> Option<Response> {
    let bytes = match backend.get(key.as_str()).await {
        Ok(Some(bytes)) => bytes,
        Ok(None) => {
            debug!(key = %key, "Cache miss");
            return None;
        }
        Err(e) => {
            warn!(key = %key, error = %e, "Cache lookup failed; treating as miss");
            stats.record_read_error();
            return None;
        }
    };

    match CacheEntry::decode(&bytes).and_then(CacheEntry::into_response) {
        Ok(response) => {
            debug!(key = %key, "Cache hit");
            stats.record_hit();
            Some(response)
        }
        Err(e) => {
            warn!(key = %key, error = %e, "Unreadable cache entry; treating as miss");
            stats.record_read_error();
            None
        }
    }
}

/// Capture a cacheable response and schedule the write; returns the
/// response the client receives, byte-for-byte what the handler produced
async fn capture(
    response: Response,
    key: CacheKey,
    backend: Arc<dyn CacheBackend>,
    policy: &CachePolicy,
    stats: Arc<CacheStats>,
) -> Response {
    if response.status() != StatusCode::OK {
        debug!(key = %key, status = response.status().as_u16(), "Response not cacheable");
        return response;
    }

    let (parts, body) = response.into_parts();

    match body.size_hint().exact() {
        Some(len) if len <= policy.max_body_bytes as u64 => {}
        other => {
            debug!(key = %key, size = ?other, "Response body unbounded or too large; not caching");
            return Response::from_parts(parts, body);
        }
    }

    let bytes = match axum::body::to_bytes(body, policy.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            // surface the same body failure the client would have seen
            warn!(key = %key, error = %e, "Failed to buffer response body; not caching");
            let failed = futures::stream::once(async move { Err::<Bytes, _>(e) });
            return Response::from_parts(parts, Body::from_stream(failed));
        }
    };

    let Some(entry) = CacheEntry::capture(parts.status, &parts.headers, &bytes) else {
        debug!(key = %key, "Response headers not storable; not caching");
        return Response::from_parts(parts, Body::from(bytes));
    };
    let ttl = policy.ttl;

    tokio::spawn(async move {
        let result = match entry.encode() {
            Ok(payload) => backend.set_with_ttl(key.as_str(), &payload, ttl).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                debug!(key = %key, ttl_secs = ttl.as_secs(), "Stored response in cache");
                stats.record_store();
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to store response in cache");
                stats.record_store_failure();
            }
        }
    });

    Response::from_parts(parts, Body::from(bytes))
}
