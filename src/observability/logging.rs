//! # Structured Logging
//!
//! Installs the global `tracing` subscriber. `RUST_LOG` takes precedence over
//! the configured level so operators can raise verbosity for a single module
//! (for example `RUST_LOG=api_cache::caching=debug`) without editing config.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::observability::config::{LogConfig, LogFormat};

/// Build the filter from `RUST_LOG`, falling back to the configured level
pub fn build_filter(config: &LogConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("api_cache={},tower_http=info", config.level))
    })
}

/// Initialize the global subscriber
///
/// Returns `false` if a subscriber was already installed (tests, embedding),
/// in which case the existing one is left untouched.
pub fn init_logging(config: &LogConfig) -> bool {
    let filter = build_filter(config);

    let result = match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true)
                    .json(),
            )
            .try_init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .try_init(),
    };

    result.is_ok()
}
