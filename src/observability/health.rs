//! # Health Checking
//!
//! Health check results, report aggregation and the cache probe.
//!
//! The cache is an accelerator, not a liveness dependency: its check is
//! registered as non-critical, so an unreachable backend turns the report
//! `Degraded` while the process keeps reporting itself as serving.

use crate::caching::CacheBackend;
use async_trait::async_trait;
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, warn};

/// Health status of the process or one of its dependencies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    /// Fully functional
    Healthy,
    /// Serving, with a non-critical dependency failing
    Degraded,
    /// A critical dependency is failing
    Unhealthy,
    /// Not yet checked
    Unknown,
}

/// Individual health check result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    pub name: String,
    pub status: ServiceStatus,
    pub message: Option<String>,
    /// Whether a failure of this check makes the whole report unhealthy
    pub critical: bool,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, serde_json::Value>,
}

impl HealthCheck {
    pub fn new(name: impl Into<String>, status: ServiceStatus, message: Option<String>, duration: Duration) -> Self {
        Self {
            name: name.into(),
            status,
            message,
            critical: true,
            duration_ms: duration.as_millis() as u64,
            timestamp: Utc::now(),
            details: BTreeMap::new(),
        }
    }

    /// Create a successful health check
    pub fn success(name: impl Into<String>, duration: Duration) -> Self {
        Self::new(name, ServiceStatus::Healthy, None, duration)
    }

    /// Create a failed health check
    pub fn failure(name: impl Into<String>, error: impl Into<String>, duration: Duration) -> Self {
        Self::new(name, ServiceStatus::Unhealthy, Some(error.into()), duration)
    }

    pub fn non_critical(mut self) -> Self {
        self.critical = false;
        self
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }
}

/// Aggregated health status with individual check results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: ServiceStatus,
    pub timestamp: DateTime<Utc>,
    pub checks: BTreeMap<String, HealthCheck>,
    pub version: String,
}

impl HealthReport {
    pub fn new(checks: Vec<HealthCheck>) -> Self {
        let checks: BTreeMap<String, HealthCheck> = checks
            .into_iter()
            .map(|check| (check.name.clone(), check))
            .collect();

        Self {
            status: Self::aggregate_status(&checks),
            timestamp: Utc::now(),
            checks,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// HTTP status for the health endpoint; only an unhealthy report fails it
    pub fn http_status(&self) -> StatusCode {
        match self.status {
            ServiceStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::OK,
        }
    }

    fn aggregate_status(checks: &BTreeMap<String, HealthCheck>) -> ServiceStatus {
        if checks.is_empty() {
            return ServiceStatus::Unknown;
        }

        let mut overall = ServiceStatus::Healthy;
        for check in checks.values() {
            let effective = match (check.status, check.critical) {
                (ServiceStatus::Unhealthy, false) => ServiceStatus::Degraded,
                (status, _) => status,
            };
            overall = match (overall, effective) {
                (ServiceStatus::Unhealthy, _) | (_, ServiceStatus::Unhealthy) => ServiceStatus::Unhealthy,
                (ServiceStatus::Degraded, _) | (_, ServiceStatus::Degraded) => ServiceStatus::Degraded,
                (ServiceStatus::Unknown, _) | (_, ServiceStatus::Unknown) => ServiceStatus::Unknown,
                _ => ServiceStatus::Healthy,
            };
        }
        overall
    }
}

/// A dependency that can report on itself
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn check(&self) -> HealthCheck;

    fn name(&self) -> &'static str;
}

/// Reachability probe for the cache backend
#[derive(Clone)]
pub struct CacheHealthProbe {
    backend: Arc<dyn CacheBackend>,
    timeout: Duration,
}

impl CacheHealthProbe {
    pub fn new(backend: Arc<dyn CacheBackend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    /// `ping()` under the probe timeout; false on timeout or error
    pub async fn check_reachable(&self) -> bool {
        match timeout(self.timeout, self.backend.ping()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                debug!(backend = self.backend.name(), error = %e, "Cache ping failed");
                false
            }
            Err(_) => {
                debug!(backend = self.backend.name(), timeout_ms = self.timeout.as_millis() as u64, "Cache ping timed out");
                false
            }
        }
    }
}

#[async_trait]
impl HealthProbe for CacheHealthProbe {
    async fn check(&self) -> HealthCheck {
        let start = Instant::now();
        let reachable = self.check_reachable().await;
        let elapsed = start.elapsed();

        let check = if reachable {
            HealthCheck::success(self.name(), elapsed)
        } else {
            warn!(backend = self.backend.name(), state = %self.backend.state(), "Cache backend unreachable");
            HealthCheck::failure(self.name(), "cache backend unreachable", elapsed)
        };

        let check = check
            .non_critical()
            .with_detail("backend", self.backend.name())
            .with_detail("state", self.backend.state().as_str());

        match self.backend.counters() {
            Some(counters) => check
                .with_detail("connection_errors", counters.connection_errors)
                .with_detail("timeouts", counters.timeouts),
            None => check,
        }
    }

    fn name(&self) -> &'static str {
        "cache"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caching::stores::{BackendCounters, BackendState};
    use crate::caching::{CacheResult, DegradedBackend, InMemoryBackend};

    struct HangingBackend;

    #[async_trait]
    impl CacheBackend for HangingBackend {
        fn name(&self) -> &'static str {
            "hanging"
        }
        fn state(&self) -> BackendState {
            BackendState::Ready
        }
        async fn get(&self, _key: &str) -> CacheResult<Option<Vec<u8>>> {
            Ok(None)
        }
        async fn set_with_ttl(&self, _key: &str, _value: &[u8], _ttl: Duration) -> CacheResult<()> {
            Ok(())
        }
        async fn list_keys(&self, _pattern: &str) -> CacheResult<Vec<String>> {
            Ok(Vec::new())
        }
        async fn delete_many(&self, _keys: &[String]) -> CacheResult<u64> {
            Ok(0)
        }
        async fn ping(&self) -> CacheResult<()> {
            futures::future::pending().await
        }
        async fn close(&self) -> CacheResult<()> {
            Ok(())
        }
        fn counters(&self) -> Option<BackendCounters> {
            Some(BackendCounters {
                connection_errors: 2,
                timeouts: 7,
            })
        }
    }

    #[test]
    fn test_report_aggregation() {
        let ok = HealthCheck::success("database", Duration::from_millis(3));
        let cache_down = HealthCheck::failure("cache", "unreachable", Duration::from_millis(5)).non_critical();
        let db_down = HealthCheck::failure("database", "connection refused", Duration::from_millis(5));

        assert_eq!(HealthReport::new(vec![ok.clone()]).status, ServiceStatus::Healthy);

        let report = HealthReport::new(vec![ok, cache_down.clone()]);
        assert_eq!(report.status, ServiceStatus::Degraded);
        assert_eq!(report.http_status(), StatusCode::OK);

        let report = HealthReport::new(vec![db_down, cache_down]);
        assert_eq!(report.status, ServiceStatus::Unhealthy);
        assert_eq!(report.http_status(), StatusCode::SERVICE_UNAVAILABLE);

        assert_eq!(HealthReport::new(Vec::new()).status, ServiceStatus::Unknown);
    }

    #[tokio::test]
    async fn test_reachable_backend() {
        let probe = CacheHealthProbe::new(Arc::new(InMemoryBackend::new()), Duration::from_secs(1));
        assert!(probe.check_reachable().await);

        let check = probe.check().await;
        assert_eq!(check.status, ServiceStatus::Healthy);
        assert_eq!(check.details["backend"], "memory");
        assert_eq!(check.details["state"], "ready");
        assert!(!check.details.contains_key("timeouts"));
    }

    #[tokio::test]
    async fn test_closed_backend_is_unreachable_but_not_critical() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.close().await.unwrap();
        let probe = CacheHealthProbe::new(backend, Duration::from_secs(1));

        assert!(!probe.check_reachable().await);

        let report = HealthReport::new(vec![probe.check().await]);
        assert_eq!(report.status, ServiceStatus::Degraded);
        assert_eq!(report.checks["cache"].details["state"], "closed");
    }

    #[tokio::test]
    async fn test_ping_timeout_reports_unreachable() {
        let probe = CacheHealthProbe::new(Arc::new(HangingBackend), Duration::from_millis(50));
        assert!(!probe.check_reachable().await);

        let check = probe.check().await;
        assert_eq!(check.status, ServiceStatus::Unhealthy);
        assert_eq!(check.details["connection_errors"], 2);
        assert_eq!(check.details["timeouts"], 7);
    }

    #[tokio::test]
    async fn test_degraded_backend_pings_ok() {
        let probe = CacheHealthProbe::new(Arc::new(DegradedBackend::new()), Duration::from_secs(1));
        let check = probe.check().await;
        assert_eq!(check.status, ServiceStatus::Healthy);
        assert_eq!(check.details["backend"], "degraded");
    }
}
