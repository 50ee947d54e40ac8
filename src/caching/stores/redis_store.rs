//! # Redis Cache Store
//!
//! Live backend over a `redis` [`ConnectionManager`]. The connection is
//! established in the background; until it is up the backend reports
//! `connecting` and every command returns [`CacheError::Unavailable`].
//!
//! Lifecycle events (connect, ready, error, reconnecting, close) are logged,
//! never returned to request code. Callers only look at [`CacheBackend::state`].
//!
//! Per command:
//! - bounded by `command_timeout`
//! - transient failures retried up to `max_retries` times with exponential
//!   backoff capped at `retry_max_delay`
//! - exhausting the retries moves the backend to `degraded`; the next
//!   successful command or keep-alive ping moves it back to `ready`

use super::{BackendCounters, BackendState, CacheBackend};
use crate::caching::{CacheError, CacheResult};
use crate::core::config::CacheConfig;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use redis::aio::ConnectionManager;
use redis::{Client, RedisResult};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Redis backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisBackendConfig {
    /// Redis connection URL; carries host, port, password and database
    pub url: String,

    /// Connection establishment timeout
    pub connect_timeout: Duration,

    /// Timeout for a single command (including a full SCAN sweep)
    pub command_timeout: Duration,

    /// Retries after the first failed attempt of a command
    pub max_retries: u32,

    /// Backoff for the first retry
    pub retry_base_delay: Duration,

    /// Backoff ceiling
    pub retry_max_delay: Duration,

    /// Keep-alive ping interval
    pub keepalive_interval: Duration,

    /// COUNT hint passed to SCAN
    pub scan_count: usize,
}

impl RedisBackendConfig {
    pub fn from_cache_config(url: &str, config: &CacheConfig) -> Self {
        Self {
            url: url.to_string(),
            connect_timeout: config.connect_timeout,
            command_timeout: config.command_timeout,
            max_retries: config.max_retries,
            retry_base_delay: config.retry_base_delay,
            retry_max_delay: config.retry_max_delay,
            keepalive_interval: config.keepalive_interval,
            ..Default::default()
        }
    }

    /// Delay before retry number `attempt` (zero-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.retry_base_delay
            .saturating_mul(factor)
            .min(self.retry_max_delay)
    }
}

impl Default for RedisBackendConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            connect_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(2),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(50),
            retry_max_delay: Duration::from_secs(2),
            keepalive_interval: Duration::from_secs(30),
            scan_count: 500,
        }
    }
}

/// Redis cache implementation
pub struct RedisBackend {
    config: RedisBackendConfig,
    client: Client,
    connection: RwLock<Option<ConnectionManager>>,
    state: RwLock<BackendState>,
    tasks: Mutex<Vec<JoinHandle<()>>>,

    connection_errors: AtomicU64,
    timeouts: AtomicU64,
}

impl RedisBackend {
    /// Validate the URL and start connecting in the background
    ///
    /// Must be called from within a Tokio runtime. Fails only when the URL
    /// cannot be parsed; an unreachable server is reported through
    /// [`CacheBackend::state`] instead.
    pub fn connect(config: RedisBackendConfig) -> CacheResult<Arc<Self>> {
        let client = Client::open(config.url.as_str()).map_err(|e| CacheError::Configuration {
            message: format!("invalid cache backend URL: {}", e),
        })?;

        let backend = Arc::new(Self {
            config,
            client,
            connection: RwLock::new(None),
            state: RwLock::new(BackendState::Uninitialized),
            tasks: Mutex::new(Vec::new()),
            connection_errors: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
        });

        let connector = tokio::spawn(Self::connection_loop(Arc::downgrade(&backend)));
        let keepalive = tokio::spawn(Self::keepalive_loop(
            Arc::downgrade(&backend),
            backend.config.keepalive_interval,
        ));
        backend.tasks.lock().extend([connector, keepalive]);

        Ok(backend)
    }

    /// `host:port` of the server, without credentials
    pub fn address(&self) -> String {
        self.client.get_connection_info().addr.to_string()
    }

    fn set_state(&self, next: BackendState) {
        let previous = {
            let mut state = self.state.write();
            // closed is terminal
            if *state == BackendState::Closed {
                return;
            }
            std::mem::replace(&mut *state, next)
        };
        if previous == next {
            return;
        }

        match next {
            BackendState::Ready => info!(addr = %self.address(), from = %previous, "Cache backend ready"),
            BackendState::Connecting => info!(addr = %self.address(), from = %previous, "Cache backend connecting"),
            BackendState::Degraded => warn!(addr = %self.address(), from = %previous, "Cache backend degraded; reconnecting"),
            BackendState::Closed => info!(addr = %self.address(), "Cache backend closed"),
            BackendState::Uninitialized => debug!(addr = %self.address(), "Cache backend reset"),
        }
    }

    async fn connection_loop(backend: Weak<Self>) {
        let mut attempt = 0u32;
        loop {
            let Some(this) = backend.upgrade() else { return };
            if this.state() == BackendState::Closed {
                return;
            }

            this.set_state(BackendState::Connecting);
            match this.establish().await {
                Ok(()) => return,
                Err(e) => {
                    this.connection_errors.fetch_add(1, Ordering::Relaxed);
                    if matches!(e, CacheError::Timeout) {
                        this.timeouts.fetch_add(1, Ordering::Relaxed);
                    }
                    let delay = this.config.backoff(attempt);
                    warn!(
                        addr = %this.address(),
                        error = %e,
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        "Cache backend connection failed; reconnecting"
                    );
                    drop(this);
                    attempt = attempt.saturating_add(1);
                    sleep(delay).await;
                }
            }
        }
    }

    async fn establish(&self) -> CacheResult<()> {
        debug!(addr = %self.address(), "Opening cache backend connection");

        let manager = timeout(
            self.config.connect_timeout,
            ConnectionManager::new(self.client.clone()),
        )
        .await
        .map_err(|_| CacheError::Timeout)??;

        // close() may have run while we were connecting
        if self.state() == BackendState::Closed {
            return Ok(());
        }

        *self.connection.write() = Some(manager);
        info!(addr = %self.address(), "Cache backend connected");
        self.set_state(BackendState::Ready);
        Ok(())
    }

    async fn keepalive_loop(backend: Weak<Self>, every: Duration) {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let Some(this) = backend.upgrade() else { return };

            match this.state() {
                BackendState::Closed => return,
                BackendState::Ready | BackendState::Degraded => {}
                _ => continue,
            }

            let Ok(conn) = this.connection() else { continue };
            match timeout(this.config.command_timeout, ping_once(conn)).await {
                Ok(Ok(())) => this.set_state(BackendState::Ready),
                Ok(Err(e)) => {
                    error!(addr = %this.address(), error = %e, "Cache backend keep-alive failed");
                    this.set_state(BackendState::Degraded);
                }
                Err(_) => {
                    this.timeouts.fetch_add(1, Ordering::Relaxed);
                    warn!(addr = %this.address(), "Cache backend keep-alive timed out");
                    this.set_state(BackendState::Degraded);
                }
            }
        }
    }

    /// Cheap handle to the shared multiplexed connection
    fn connection(&self) -> CacheResult<ConnectionManager> {
        match self.state() {
            BackendState::Ready | BackendState::Degraded => {}
            _ => return Err(CacheError::Unavailable),
        }
        self.connection.read().clone().ok_or(CacheError::Unavailable)
    }

    /// Run a command with timeout and bounded retries
    async fn execute<T, F, Fut>(&self, command: &'static str, operation: F) -> CacheResult<T>
    where
        F: Fn(ConnectionManager) -> Fut,
        Fut: Future<Output = RedisResult<T>>,
    {
        let mut attempt = 0u32;

        loop {
            let conn = self.connection()?;

            let result = match timeout(self.config.command_timeout, operation(conn)).await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(CacheError::Redis(e)),
                Err(_) => {
                    self.timeouts.fetch_add(1, Ordering::Relaxed);
                    Err(CacheError::Timeout)
                }
            };

            match result {
                Ok(value) => {
                    if self.state() == BackendState::Degraded {
                        self.set_state(BackendState::Ready);
                    }
                    return Ok(value);
                }
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    self.connection_errors.fetch_add(1, Ordering::Relaxed);
                    let delay = self.config.backoff(attempt);
                    warn!(command, attempt, error = %e, retry_in_ms = delay.as_millis() as u64, "Cache command failed; retrying");
                    attempt += 1;
                    sleep(delay).await;
                }
                Err(e) => {
                    self.connection_errors.fetch_add(1, Ordering::Relaxed);
                    error!(command, attempts = attempt + 1, error = %e, "Cache command failed");
                    if e.is_transient() {
                        self.set_state(BackendState::Degraded);
                    }
                    return Err(e);
                }
            }
        }
    }
}

async fn ping_once(mut conn: ConnectionManager) -> RedisResult<()> {
    let reply: String = redis::cmd("PING").query_async(&mut conn).await?;
    if reply == "PONG" {
        Ok(())
    } else {
        Err(redis::RedisError::from((
            redis::ErrorKind::ResponseError,
            "unexpected PING reply",
            reply,
        )))
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    fn state(&self) -> BackendState {
        *self.state.read()
    }

    fn counters(&self) -> Option<BackendCounters> {
        Some(BackendCounters {
            connection_errors: self.connection_errors.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        })
    }

    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let value = self
            .execute("GET", move |mut conn| async move {
                redis::cmd("GET")
                    .arg(key)
                    .query_async::<_, Option<Vec<u8>>>(&mut conn)
                    .await
            })
            .await?;

        debug!(key, hit = value.is_some(), "Redis cache lookup");
        Ok(value)
    }

    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()> {
        // SETEX rejects 0; sub-second TTLs round up to one second
        let ttl_seconds = ttl.as_secs().max(1);

        self.execute("SETEX", move |mut conn| async move {
            redis::cmd("SETEX")
                .arg(key)
                .arg(ttl_seconds)
                .arg(value)
                .query_async::<_, ()>(&mut conn)
                .await
        })
        .await?;

        debug!(key, ttl_seconds, "Set Redis cache key");
        Ok(())
    }

    async fn list_keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        let count = self.config.scan_count;

        let mut keys = self
            .execute("SCAN", move |mut conn| async move {
                let mut cursor: u64 = 0;
                let mut all_keys = Vec::new();

                loop {
                    let (next_cursor, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(count)
                        .query_async(&mut conn)
                        .await?;

                    all_keys.extend(batch);

                    if next_cursor == 0 {
                        break;
                    }
                    cursor = next_cursor;
                }

                Ok::<Vec<String>, redis::RedisError>(all_keys)
            })
            .await?;

        // SCAN may report a key more than once
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn delete_many(&self, keys: &[String]) -> CacheResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }

        let deleted = self
            .execute("DEL", move |mut conn| async move {
                redis::cmd("DEL")
                    .arg(keys)
                    .query_async::<_, u64>(&mut conn)
                    .await
            })
            .await?;

        debug!(requested = keys.len(), deleted, "Deleted Redis cache keys");
        Ok(deleted)
    }

    async fn ping(&self) -> CacheResult<()> {
        self.execute("PING", ping_once).await
    }

    async fn close(&self) -> CacheResult<()> {
        self.set_state(BackendState::Closed);

        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.connection.write().take();

        Ok(())
    }
}

impl Drop for RedisBackend {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}
