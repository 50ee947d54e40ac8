//! # In-Memory Cache Store
//!
//! Process-local backend with per-entry TTL. Useful for single-instance
//! deployments and tests; entries do not survive a restart and are not shared
//! between processes.
//!
//! Expiry is checked lazily on access. [`InMemoryBackend::purge_expired`]
//! sweeps everything at once and [`InMemoryBackend::spawn_sweeper`] runs it
//! on an interval.

use super::{glob_match, BackendState, CacheBackend};
use crate::caching::{CacheError, CacheResult};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: Vec<u8>,
    expires_at: Instant,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// In-memory cache implementation
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    entries: DashMap<String, MemoryEntry>,
    closed: AtomicBool,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, including expired ones not yet purged
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every expired entry, returning how many were dropped
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let purged = before.saturating_sub(self.entries.len());
        if purged > 0 {
            debug!(purged, "Purged expired in-memory cache entries");
        }
        purged
    }

    /// Run [`Self::purge_expired`] every `every` until the backend is closed
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let backend = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(every);
            loop {
                ticker.tick().await;
                if backend.closed.load(Ordering::Acquire) {
                    break;
                }
                backend.purge_expired();
            }
        })
    }

    fn ensure_open(&self) -> CacheResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(CacheError::Unavailable)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CacheBackend for InMemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn state(&self) -> BackendState {
        if self.closed.load(Ordering::Acquire) {
            BackendState::Closed
        } else {
            BackendState::Ready
        }
    }

    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        self.ensure_open()?;

        let now = Instant::now();
        let value = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => Some(entry.value.clone()),
            Some(_) => None,
            None => return Ok(None),
        };

        if value.is_none() {
            // only drop it if nobody replaced it in the meantime
            self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        }

        Ok(value)
    }

    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()> {
        self.ensure_open()?;

        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_vec(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn list_keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        self.ensure_open()?;

        let now = Instant::now();
        Ok(self
            .entries
            .iter()
            .filter(|entry| !entry.value().is_expired(now) && glob_match(pattern, entry.key()))
            .map(|entry| entry.key().clone())
            .collect())
    }

    async fn delete_many(&self, keys: &[String]) -> CacheResult<u64> {
        self.ensure_open()?;

        let now = Instant::now();
        let deleted = keys
            .iter()
            .filter_map(|key| self.entries.remove(key))
            .filter(|(_, entry)| !entry.is_expired(now))
            .count();
        Ok(deleted as u64)
    }

    async fn ping(&self) -> CacheResult<()> {
        self.ensure_open()
    }

    async fn close(&self) -> CacheResult<()> {
        self.closed.store(true, Ordering::Release);
        self.entries.clear();
        Ok(())
    }
}
