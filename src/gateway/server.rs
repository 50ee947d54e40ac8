//! # HTTP Server Module
//!
//! Assembles the application router and runs it:
//! - `/api/...` collection routes behind the response cache layer
//! - `/health` with the cache reported as a non-critical dependency
//! - `/admin/cache/...` operator endpoints
//!
//! The backend handle is created once at startup and injected everywhere it
//! is needed; nothing in the request path reaches for global state.

use crate::caching::{
    CacheAdminRouter, CacheAdminState, CacheBackend, CacheLayer, CachePolicy, CacheStats,
    InvalidationService,
};
use crate::core::config::AppConfig;
use crate::core::error::{AppError, AppResult};
use crate::gateway::grants::{grants_router, GrantsState};
use crate::observability::health::{CacheHealthProbe, HealthProbe, HealthReport};
use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument, warn};

/// Shared services, built once per process
#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<dyn CacheBackend>,
    pub invalidation: InvalidationService,
    pub stats: Arc<CacheStats>,
    pub policy: CachePolicy,
    pub health: CacheHealthProbe,
}

impl AppState {
    pub fn new(backend: Arc<dyn CacheBackend>, config: &AppConfig) -> Self {
        Self {
            invalidation: InvalidationService::new(Arc::clone(&backend)),
            stats: Arc::new(CacheStats::new()),
            policy: CachePolicy::from_config(&config.cache),
            health: CacheHealthProbe::new(Arc::clone(&backend), config.cache.health_timeout),
            backend,
        }
    }
}

/// Build the full application router
pub fn build_router(state: &AppState) -> Router {
    let cache_layer = CacheLayer::new(Arc::clone(&state.backend), state.policy.clone())
        .with_stats(Arc::clone(&state.stats));

    let api = grants_router(GrantsState::new(state.invalidation.clone())).layer(cache_layer);

    let admin = CacheAdminRouter::create_router(CacheAdminState {
        backend: Arc::clone(&state.backend),
        invalidation: state.invalidation.clone(),
        stats: Arc::clone(&state.stats),
    });

    let health = Router::new()
        .route("/health", get(health_check))
        .with_state(state.health.clone());

    Router::new()
        .merge(api)
        .merge(health)
        .nest("/admin", admin)
        .layer(TraceLayer::new_for_http())
}

/// Health endpoint; a failing cache degrades the report but keeps it 200
pub async fn health_check(State(probe): State<CacheHealthProbe>) -> impl IntoResponse {
    let report = HealthReport::new(vec![probe.check().await]);
    (report.http_status(), Json(report))
}

/// HTTP server wrapper
pub struct ApiServer {
    addr: SocketAddr,
    app: Router,
}

impl ApiServer {
    pub fn new(config: &AppConfig, state: &AppState) -> AppResult<Self> {
        Ok(Self {
            addr: config.server.socket_addr()?,
            app: build_router(state),
        })
    }

    pub fn bind_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Serve until `shutdown` resolves, then drain in-flight requests
    #[instrument(skip(self, shutdown), fields(addr = %self.addr))]
    pub async fn serve<F>(self, shutdown: F) -> AppResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|e| AppError::internal(format!("Failed to bind server to {}: {}", self.addr, e)))?;

        info!("HTTP server listening on {}", self.addr);

        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| AppError::internal(format!("Server error: {}", e)))?;

        info!("HTTP server stopped");
        Ok(())
    }
}

/// Resolves on Ctrl-C (or immediately if the handler cannot be installed)
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    info!("Shutdown signal received");
}
