//! # Degraded Cache Store
//!
//! Stand-in used when no real store is configured or constructible. It is
//! always `Ready`, every read misses and every write "succeeds" without
//! storing anything, so the middleware runs its normal path and simply never
//! hits.

use super::{BackendState, CacheBackend};
use crate::caching::CacheResult;
use async_trait::async_trait;
use std::time::Duration;
use tracing::trace;

#[derive(Debug, Clone, Copy, Default)]
pub struct DegradedBackend;

impl DegradedBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CacheBackend for DegradedBackend {
    fn name(&self) -> &'static str {
        "degraded"
    }

    fn state(&self) -> BackendState {
        BackendState::Ready
    }

    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        trace!(key, "degraded backend get");
        Ok(None)
    }

    async fn set_with_ttl(&self, key: &str, _value: &[u8], _ttl: Duration) -> CacheResult<()> {
        trace!(key, "degraded backend set (discarded)");
        Ok(())
    }

    async fn list_keys(&self, _pattern: &str) -> CacheResult<Vec<String>> {
        Ok(Vec::new())
    }

    async fn delete_many(&self, _keys: &[String]) -> CacheResult<u64> {
        Ok(0)
    }

    async fn ping(&self) -> CacheResult<()> {
        Ok(())
    }

    async fn close(&self) -> CacheResult<()> {
        Ok(())
    }
}
