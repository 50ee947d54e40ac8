//! # Cache Invalidation
//!
//! Pattern-based bulk deletion for write paths. Patterns are given without
//! the `cache:` namespace (`grants:*`) and resolved against it here, so they
//! line up with the keys [`super::CacheKey`] produces.
//!
//! | Target                | Pattern          |
//! |-----------------------|------------------|
//! | `Grants`              | `grants:*`       |
//! | `Artists`             | `artists:*`      |
//! | `Applications`        | `applications:*` |
//! | `Documents`           | `documents:*`    |
//! | `User(id)`            | `user:{id}:*`    |
//!
//! User ids are glob-escaped, so `User("*")` purges nothing but the literal
//! user `*`.

use super::key_generator::namespaced_pattern;
use super::stores::{glob_escape, CacheBackend};
use super::{CacheError, CacheResult};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Entity collections whose cached reads are purged after a mutation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InvalidationTarget {
    Grants,
    Artists,
    Applications,
    Documents,
    User(String),
}

impl InvalidationTarget {
    /// Un-namespaced invalidation pattern for this target
    pub fn pattern(&self) -> String {
        match self {
            Self::Grants => "grants:*".to_string(),
            Self::Artists => "artists:*".to_string(),
            Self::Applications => "applications:*".to_string(),
            Self::Documents => "documents:*".to_string(),
            Self::User(user_id) => format!("user:{}:*", glob_escape(user_id)),
        }
    }
}

impl fmt::Display for InvalidationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Grants => f.write_str("grants"),
            Self::Artists => f.write_str("artists"),
            Self::Applications => f.write_str("applications"),
            Self::Documents => f.write_str("documents"),
            Self::User(user_id) => write!(f, "user {}", user_id),
        }
    }
}

/// Purges cached responses by pattern
#[derive(Clone)]
pub struct InvalidationService {
    backend: Arc<dyn CacheBackend>,
}

impl InvalidationService {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend }
    }

    /// Delete every entry matching `pattern`; returns how many were removed
    ///
    /// Never fails. A backend that is not ready, or any backend error, is
    /// logged and reported as zero deletions.
    pub async fn invalidate(&self, pattern: &str) -> u64 {
        match self.try_invalidate(pattern).await {
            Ok(deleted) => deleted,
            Err(CacheError::Unavailable) => {
                info!(pattern, backend = self.backend.name(), "Cache backend not ready; skipping invalidation");
                0
            }
            Err(e) => {
                warn!(pattern, error = %e, "Cache invalidation failed");
                0
            }
        }
    }

    /// Invalidate the fixed pattern for an entity collection or user
    pub async fn invalidate_target(&self, target: InvalidationTarget) -> u64 {
        debug!(%target, "Invalidating cached responses");
        self.invalidate(&target.pattern()).await
    }

    /// Like [`Self::invalidate`] but reports backend failures to the caller
    pub async fn try_invalidate(&self, pattern: &str) -> CacheResult<u64> {
        if !self.backend.state().is_ready() {
            return Err(CacheError::Unavailable);
        }

        let resolved = namespaced_pattern(pattern);
        let keys = self.backend.list_keys(&resolved).await?;
        if keys.is_empty() {
            debug!(pattern = %resolved, "No cached entries to invalidate");
            return Ok(0);
        }

        let deleted = self.backend.delete_many(&keys).await?;
        info!(pattern = %resolved, matched = keys.len(), deleted, "Invalidated cached responses");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caching::stores::{DegradedBackend, InMemoryBackend};
    use std::time::Duration;

    const TTL: Duration = Duration::from_secs(60);

    async fn seeded() -> Arc<InMemoryBackend> {
        let backend = Arc::new(InMemoryBackend::new());
        for key in [
            "cache:grants:/api/grants",
            "cache:grants:/api/grants?page=2",
            "cache:grants:/api/grants/7",
            "cache:artists:5",
            "cache:user:42:/api/users/42/applications",
            "cache:user:421:/api/users/421",
            "grants:outside-namespace",
        ] {
            backend.set_with_ttl(key, b"{}", TTL).await.unwrap();
        }
        backend
    }

    #[test]
    fn test_target_patterns() {
        assert_eq!(InvalidationTarget::Grants.pattern(), "grants:*");
        assert_eq!(InvalidationTarget::Artists.pattern(), "artists:*");
        assert_eq!(InvalidationTarget::Applications.pattern(), "applications:*");
        assert_eq!(InvalidationTarget::Documents.pattern(), "documents:*");
        assert_eq!(InvalidationTarget::User("42".into()).pattern(), "user:42:*");
        assert_eq!(InvalidationTarget::User("*".into()).pattern(), "user:\\*:*");
        assert_eq!(InvalidationTarget::User("4?".into()).pattern(), "user:4\\?:*");
    }

    #[tokio::test]
    async fn test_user_id_wildcards_are_literal() {
        let backend = seeded().await;
        let service = InvalidationService::new(backend.clone());

        for user_id in ["*", "4?", "[0-9]*"] {
            let deleted = service
                .invalidate_target(InvalidationTarget::User(user_id.into()))
                .await;
            assert_eq!(deleted, 0, "user id {:?} matched other users", user_id);
        }

        assert!(backend.get("cache:user:42:/api/users/42/applications").await.unwrap().is_some());
        assert!(backend.get("cache:user:421:/api/users/421").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_invalidation_is_scoped_to_pattern() {
        let backend = seeded().await;
        let service = InvalidationService::new(backend.clone());

        assert_eq!(service.invalidate("grants:*").await, 3);

        assert!(backend.get("cache:grants:/api/grants").await.unwrap().is_none());
        assert!(backend.get("cache:grants:/api/grants?page=2").await.unwrap().is_none());
        assert!(backend.get("cache:artists:5").await.unwrap().is_some());
        assert!(backend.get("grants:outside-namespace").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_user_target_does_not_touch_other_users() {
        let backend = seeded().await;
        let service = InvalidationService::new(backend.clone());

        let deleted = service
            .invalidate_target(InvalidationTarget::User("42".into()))
            .await;

        assert_eq!(deleted, 1);
        assert!(backend.get("cache:user:421:/api/users/421").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_no_matches_is_a_noop() {
        let backend = seeded().await;
        let service = InvalidationService::new(backend.clone());

        assert_eq!(service.invalidate("documents:*").await, 0);
        assert_eq!(backend.len(), 7);
    }

    #[tokio::test]
    async fn test_not_ready_backend_is_a_noop() {
        let backend = seeded().await;
        backend.close().await.unwrap();
        let service = InvalidationService::new(backend.clone());

        assert_eq!(service.invalidate("grants:*").await, 0);
        assert!(matches!(
            service.try_invalidate("grants:*").await,
            Err(CacheError::Unavailable)
        ));
    }

    #[tokio::test]
    async fn test_degraded_backend_reports_zero() {
        let service = InvalidationService::new(Arc::new(DegradedBackend::new()));
        assert_eq!(service.invalidate_target(InvalidationTarget::Grants).await, 0);
        assert_eq!(service.try_invalidate("grants:*").await.unwrap(), 0);
    }
}
