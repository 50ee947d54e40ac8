// Logging configuration
pub mod config;

// Structured logging
pub mod logging;

// Health checks
pub mod health;

pub use config::{LogConfig, LogFormat};
pub use health::{CacheHealthProbe, HealthCheck, HealthProbe, HealthReport, ServiceStatus};
pub use logging::init_logging;
