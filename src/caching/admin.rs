//! # Cache Admin Interface
//!
//! Operator endpoints, mounted under `/admin`:
//! - `GET  /cache/stats`: counters plus backend name and state
//! - `POST /cache/invalidate`: `{"pattern": "grants:*"}`, returns `{"invalidated": n}`
//! - `POST /cache/invalidate/user/:user_id`: purge one user's cached reads
//!
//! Unlike write-path invalidation, these report backend failures (503) since
//! the caller asked for the purge explicitly.

use super::invalidation::{InvalidationService, InvalidationTarget};
use super::stats::{CacheStats, CacheStatsSnapshot};
use super::stores::{BackendCounters, BackendState, CacheBackend};
use super::CacheError;
use crate::core::error::{AppError, AppResult};
use axum::{
    extract::{Path, State},
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Cache admin state
#[derive(Clone)]
pub struct CacheAdminState {
    pub backend: Arc<dyn CacheBackend>,
    pub invalidation: InvalidationService,
    pub stats: Arc<CacheStats>,
}

/// Cache admin router
pub struct CacheAdminRouter;

impl CacheAdminRouter {
    pub fn create_router(state: CacheAdminState) -> Router {
        Router::new()
            .route("/cache/stats", get(get_cache_stats))
            .route("/cache/invalidate", post(invalidate_pattern))
            .route("/cache/invalidate/user/:user_id", post(invalidate_user))
            .with_state(state)
    }
}

/// Cache statistics response
#[derive(Debug, Serialize)]
pub struct CacheStatsResponse {
    pub backend: &'static str,
    pub state: BackendState,
    #[serde(flatten)]
    pub stats: CacheStatsSnapshot,
    pub hit_ratio: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_errors: Option<BackendCounters>,
    pub timestamp: DateTime<Utc>,
}

/// Pattern invalidation request
#[derive(Debug, Deserialize)]
pub struct InvalidationRequest {
    pub pattern: String,
}

/// Invalidation outcome
#[derive(Debug, Serialize)]
pub struct InvalidationResponse {
    pub pattern: String,
    pub invalidated: u64,
    pub timestamp: DateTime<Utc>,
}

pub async fn get_cache_stats(State(state): State<CacheAdminState>) -> Json<CacheStatsResponse> {
    let stats = state.stats.snapshot();

    Json(CacheStatsResponse {
        backend: state.backend.name(),
        state: state.backend.state(),
        hit_ratio: stats.hit_ratio(),
        stats,
        backend_errors: state.backend.counters(),
        timestamp: Utc::now(),
    })
}

pub async fn invalidate_pattern(
    State(state): State<CacheAdminState>,
    Json(request): Json<InvalidationRequest>,
) -> AppResult<Json<InvalidationResponse>> {
    let pattern = request.pattern.trim();
    if pattern.is_empty() {
        return Err(AppError::validation("pattern", "must not be empty"));
    }

    run_invalidation(&state, pattern).await
}

pub async fn invalidate_user(
    State(state): State<CacheAdminState>,
    Path(user_id): Path<String>,
) -> AppResult<Json<InvalidationResponse>> {
    run_invalidation(&state, &InvalidationTarget::User(user_id).pattern()).await
}

async fn run_invalidation(state: &CacheAdminState, pattern: &str) -> AppResult<Json<InvalidationResponse>> {
    match state.invalidation.try_invalidate(pattern).await {
        Ok(invalidated) => {
            info!(pattern, invalidated, "Cache invalidated via admin API");
            Ok(Json(InvalidationResponse {
                pattern: pattern.to_string(),
                invalidated,
                timestamp: Utc::now(),
            }))
        }
        Err(e) => {
            warn!(pattern, error = %e, "Admin cache invalidation failed");
            let reason = match e {
                CacheError::Unavailable => format!("backend {} is {}", state.backend.name(), state.backend.state()),
                other => other.to_string(),
            };
            Err(AppError::service_unavailable("cache", reason))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caching::{InMemoryBackend, RedisBackend, RedisBackendConfig};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::time::Duration;
    use tower::ServiceExt;

    fn admin(backend: Arc<dyn CacheBackend>) -> (Router, Arc<CacheStats>) {
        let stats = Arc::new(CacheStats::new());
        let state = CacheAdminState {
            backend: backend.clone(),
            invalidation: InvalidationService::new(backend),
            stats: stats.clone(),
        };
        (CacheAdminRouter::create_router(state), stats)
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_stats_endpoint() {
        let (router, stats) = admin(Arc::new(InMemoryBackend::new()));
        stats.record_hit();
        stats.record_miss();

        let response = router
            .oneshot(Request::builder().uri("/cache/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["backend"], "memory");
        assert_eq!(body["state"], "ready");
        assert_eq!(body["hits"], 1);
        assert_eq!(body["hit_ratio"], 0.5);
        assert!(body.get("backend_errors").is_none());
    }

    #[tokio::test]
    async fn test_stats_endpoint_reports_backend_errors() {
        let backend = RedisBackend::connect(RedisBackendConfig {
            url: "redis://127.0.0.1:1".to_string(),
            connect_timeout: Duration::from_millis(200),
            retry_base_delay: Duration::from_millis(10),
            retry_max_delay: Duration::from_millis(50),
            ..Default::default()
        })
        .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let (router, _) = admin(backend.clone());

        let response = router
            .oneshot(Request::builder().uri("/cache/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let body = json_body(response).await;
        assert_eq!(body["backend"], "redis");
        assert!(body["backend_errors"]["connection_errors"].as_u64().unwrap() >= 1);
        assert!(body["backend_errors"]["timeouts"].is_u64());

        backend.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalidate_pattern_endpoint() {
        let backend = Arc::new(InMemoryBackend::new());
        let ttl = Duration::from_secs(60);
        backend.set_with_ttl("cache:grants:/api/grants", b"{}", ttl).await.unwrap();
        backend.set_with_ttl("cache:artists:/api/artists", b"{}", ttl).await.unwrap();
        let (router, _) = admin(backend.clone());

        let response = router
            .oneshot(post_json("/cache/invalidate", r#"{"pattern":"grants:*"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["invalidated"], 1);
        assert_eq!(backend.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_pattern_is_rejected() {
        let (router, _) = admin(Arc::new(InMemoryBackend::new()));
        let response = router
            .oneshot(post_json("/cache/invalidate", r#"{"pattern":"  "}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"]["type"], "request_validation_error");
    }

    #[tokio::test]
    async fn test_unavailable_backend_gives_503() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.close().await.unwrap();
        let (router, _) = admin(backend);

        let response = router
            .oneshot(post_json("/cache/invalidate/user/42", ""))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_invalidate_user_endpoint() {
        let backend = Arc::new(InMemoryBackend::new());
        let ttl = Duration::from_secs(60);
        backend
            .set_with_ttl("cache:user:42:/api/users/42/applications", b"{}", ttl)
            .await
            .unwrap();
        backend.set_with_ttl("cache:user:7:/api/users/7", b"{}", ttl).await.unwrap();
        let (router, _) = admin(backend.clone());

        let response = router
            .oneshot(post_json("/cache/invalidate/user/42", ""))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["invalidated"], 1);
        assert!(backend.get("cache:user:7:/api/users/7").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_invalidate_user_endpoint_treats_wildcards_literally() {
        let backend = Arc::new(InMemoryBackend::new());
        let ttl = Duration::from_secs(60);
        backend.set_with_ttl("cache:user:42:/api/users/42", b"{}", ttl).await.unwrap();
        backend.set_with_ttl("cache:user:7:/api/users/7", b"{}", ttl).await.unwrap();
        let (router, _) = admin(backend.clone());

        let response = router
            .oneshot(post_json("/cache/invalidate/user/*", ""))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["invalidated"], 0);
        assert_eq!(backend.len(), 2);
    }
}
