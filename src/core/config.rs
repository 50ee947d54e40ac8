//! # Configuration Module
//!
//! Configuration for the HTTP server, the response cache and logging.
//!
//! ## Sources
//! - YAML file via [`AppConfig::load_from_file`]
//! - Environment variables, applied on top of the file (or of the defaults
//!   when no file is used, see [`AppConfig::from_env`])
//!
//! Durations are written in humantime form (`"300s"`, `"2s"`, `"50ms"`).
//!
//! Cache settings never abort startup. A missing or malformed `REDIS_URL`
//! selects the degraded backend; any other invalid cache setting disables
//! caching (see [`CacheConfig::disable`]). Server and logging settings are
//! validated strictly.

use serde::{Deserialize, Serialize};
use std::env;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::core::error::{AppError, AppResult};
use crate::observability::config::{LogConfig, LogFormat};

/// Top-level application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// HTTP listener settings
    pub server: ServerConfig,

    /// Response cache settings
    pub cache: CacheConfig,

    /// Logging settings
    pub logging: LogConfig,
}

impl AppConfig {
    /// Load configuration from a YAML file, then apply environment overrides
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let content = tokio::fs::read_to_string(path).await?;

        let mut config = Self::from_yaml_str(&content)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML document
    ///
    /// A `cache` section that does not deserialize disables caching rather
    /// than failing; every other section must be well-formed.
    pub fn from_yaml_str(content: &str) -> AppResult<Self> {
        let mut document: serde_yaml::Value = serde_yaml::from_str(content)?;

        let cache_section = document
            .as_mapping_mut()
            .and_then(|mapping| mapping.remove("cache"));

        let mut config: AppConfig = if document.is_null() {
            AppConfig::default()
        } else {
            serde_yaml::from_value(document)?
        };

        match cache_section {
            Some(section) if !section.is_null() => match serde_yaml::from_value::<CacheConfig>(section) {
                Ok(cache) => config.cache = cache,
                Err(e) => config.cache.disable(format!("cache section: {}", e)),
            },
            _ => {}
        }

        Ok(config)
    }

    /// Build configuration from defaults plus environment overrides
    pub fn from_env() -> AppResult<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build configuration from defaults plus overrides from `lookup`
    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        config.apply_overrides(lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> AppResult<()> {
        self.apply_overrides(|name| env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable lookup
    ///
    /// Recognised variables: `REDIS_URL`, `CACHE_ENABLED`, `CACHE_TTL` (seconds),
    /// `CACHE_CONNECT_TIMEOUT`, `CACHE_COMMAND_TIMEOUT`, `CACHE_KEEPALIVE_INTERVAL`,
    /// `CACHE_MAX_RETRIES`, `SERVER_BIND_ADDRESS`, `SERVER_PORT`, `LOG_LEVEL`,
    /// `LOG_FORMAT`.
    ///
    /// Unparsable `CACHE_*` values disable caching; unparsable server or
    /// logging values are errors.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> AppResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cache_problems = Vec::new();

        if let Some(url) = lookup("REDIS_URL") {
            let url = url.trim();
            self.cache.redis_url = if url.is_empty() {
                None
            } else {
                Some(url.to_string())
            };
        }

        if let Some(enabled) = lookup("CACHE_ENABLED") {
            match enabled.trim().parse() {
                Ok(enabled) => self.cache.enabled = enabled,
                Err(e) => cache_problems.push(format!("Invalid CACHE_ENABLED: {}", e)),
            }
        }

        if let Some(ttl) = lookup("CACHE_TTL") {
            match ttl.trim().parse::<u64>() {
                Ok(seconds) => self.cache.default_ttl = Duration::from_secs(seconds),
                Err(e) => cache_problems.push(format!("Invalid CACHE_TTL: {}", e)),
            }
        }

        for (name, field) in [
            ("CACHE_CONNECT_TIMEOUT", &mut self.cache.connect_timeout),
            ("CACHE_COMMAND_TIMEOUT", &mut self.cache.command_timeout),
            ("CACHE_KEEPALIVE_INTERVAL", &mut self.cache.keepalive_interval),
        ] {
            if let Some(value) = lookup(name) {
                match humantime::parse_duration(value.trim()) {
                    Ok(duration) => *field = duration,
                    Err(e) => cache_problems.push(format!("Invalid {}: {}", name, e)),
                }
            }
        }

        if let Some(retries) = lookup("CACHE_MAX_RETRIES") {
            match retries.trim().parse() {
                Ok(retries) => self.cache.max_retries = retries,
                Err(e) => cache_problems.push(format!("Invalid CACHE_MAX_RETRIES: {}", e)),
            }
        }

        if !cache_problems.is_empty() {
            self.cache.disable(cache_problems.join("; "));
        }

        if let Some(addr) = lookup("SERVER_BIND_ADDRESS") {
            self.server.bind_address = addr;
        }

        if let Some(port) = lookup("SERVER_PORT") {
            self.server.port = port
                .parse()
                .map_err(|e| AppError::config(format!("Invalid SERVER_PORT: {}", e)))?;
        }

        if let Some(level) = lookup("LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Some(format) = lookup("LOG_FORMAT") {
            self.logging.format = match format.to_ascii_lowercase().as_str() {
                "json" => LogFormat::Json,
                "text" | "pretty" => LogFormat::Text,
                other => {
                    return Err(AppError::config(format!("Invalid LOG_FORMAT: {}", other)));
                }
            };
        }

        Ok(())
    }

    /// Validate the configuration
    ///
    /// Server problems are fatal. Cache problems disable caching instead; the
    /// reason is kept in [`CacheConfig::disabled_reason`] and logged when the
    /// backend is selected.
    pub fn validate(&mut self) -> AppResult<()> {
        let cache_problems = self.cache.problems();
        if !cache_problems.is_empty() {
            self.cache.disable(cache_problems.join("; "));
        }

        if self.server.bind_address.trim().is_empty() {
            return Err(AppError::config("server.bind_address cannot be empty"));
        }

        Ok(())
    }
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind
    pub bind_address: String,

    /// TCP port
    pub port: u16,
}

impl ServerConfig {
    /// Resolve the socket address to listen on
    pub fn socket_addr(&self) -> AppResult<SocketAddr> {
        format!("{}:{}", self.bind_address, self.port)
            .parse()
            .map_err(|e| AppError::config(format!("Invalid bind address: {}", e)))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Response cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Master switch; when off the degraded backend is used
    pub enabled: bool,

    /// Redis connection URL (`redis://:password@host:port/db`). Absent selects
    /// the degraded backend.
    pub redis_url: Option<String>,

    /// TTL applied to every stored response
    #[serde(with = "humantime_serde")]
    pub default_ttl: Duration,

    /// Timeout for establishing the backend connection
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Timeout for a single backend command
    #[serde(with = "humantime_serde")]
    pub command_timeout: Duration,

    /// Retries per command after the first attempt
    pub max_retries: u32,

    /// First backoff delay; doubled on each retry
    #[serde(with = "humantime_serde")]
    pub retry_base_delay: Duration,

    /// Upper bound for the backoff delay
    #[serde(with = "humantime_serde")]
    pub retry_max_delay: Duration,

    /// Interval between keep-alive pings
    #[serde(with = "humantime_serde")]
    pub keepalive_interval: Duration,

    /// Timeout used by the health probe
    #[serde(with = "humantime_serde")]
    pub health_timeout: Duration,

    /// Largest response body that will be captured for caching
    pub max_body_bytes: usize,

    /// Set when invalid settings forced caching off
    #[serde(skip)]
    pub disabled_reason: Option<String>,
}

impl CacheConfig {
    /// Every invalid setting, in one pass
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.default_ttl.as_secs() == 0 {
            problems.push("cache.default_ttl must be at least one second".to_string());
        }

        if self.command_timeout.is_zero() {
            problems.push("cache.command_timeout must be greater than 0".to_string());
        }

        if self.connect_timeout.is_zero() {
            problems.push("cache.connect_timeout must be greater than 0".to_string());
        }

        if self.keepalive_interval.is_zero() {
            problems.push("cache.keepalive_interval must be greater than 0".to_string());
        }

        if self.health_timeout.is_zero() {
            problems.push("cache.health_timeout must be greater than 0".to_string());
        }

        if self.retry_base_delay > self.retry_max_delay {
            problems.push("cache.retry_base_delay cannot exceed cache.retry_max_delay".to_string());
        }

        if self.max_body_bytes == 0 {
            problems.push("cache.max_body_bytes must be greater than 0".to_string());
        }

        problems
    }

    /// Turn caching off and reset every other setting to its default
    pub fn disable(&mut self, reason: impl Into<String>) {
        let reason = match self.disabled_reason.take() {
            Some(previous) => format!("{}; {}", previous, reason.into()),
            None => reason.into(),
        };

        *self = Self {
            enabled: false,
            disabled_reason: Some(reason),
            ..Self::default()
        };
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            redis_url: None,
            default_ttl: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(2),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(50),
            retry_max_delay: Duration::from_secs(2),
            keepalive_interval: Duration::from_secs(30),
            health_timeout: Duration::from_secs(1),
            max_body_bytes: 1024 * 1024,
            disabled_reason: None,
        }
    }
}
