//! # api-cache - Main Entry Point
//!
//! Runs the grants API behind the fail-open response cache.
//!
//! Startup sequence:
//! 1. Load configuration (`APP_CONFIG` YAML file if set, otherwise environment)
//! 2. Initialise structured logging
//! 3. Select the cache backend (Redis, or the degraded stand-in)
//! 4. Serve until Ctrl-C, then drain requests and close the backend

use anyhow::Context;
use tracing::{info, warn};

use api_cache::caching::connect_backend;
use api_cache::core::config::AppConfig;
use api_cache::gateway::{shutdown_signal, ApiServer, AppState};
use api_cache::observability::init_logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config().await?;

    init_logging(&config.logging);
    info!("🚀 Starting api-cache v{}", env!("CARGO_PKG_VERSION"));

    // never fails: an absent or unusable store selects the degraded backend
    let backend = connect_backend(&config.cache);
    info!(backend = backend.name(), state = %backend.state(), "Cache backend selected");

    let state = AppState::new(backend.clone(), &config);
    let server = ApiServer::new(&config, &state).context("failed to build HTTP server")?;
    info!("🌐 Listening on {}", server.bind_addr());

    let served = server.serve(shutdown_signal()).await;

    if let Err(e) = backend.close().await {
        warn!(error = %e, "Error while closing cache backend");
    }

    served.context("HTTP server failed")?;
    info!("✅ Shutdown complete");
    Ok(())
}

async fn load_config() -> anyhow::Result<AppConfig> {
    match std::env::var("APP_CONFIG") {
        Ok(path) if !path.is_empty() => AppConfig::load_from_file(&path)
            .await
            .with_context(|| format!("failed to load configuration from {}", path)),
        _ => AppConfig::from_env().context("invalid configuration in environment"),
    }
}
