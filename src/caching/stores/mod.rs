//! # Cache Stores Module
//!
//! The backend capability contract and its implementations:
//! - [`RedisBackend`]: network store with reconnects, retries and timeouts
//! - [`DegradedBackend`]: always misses, always succeeds
//! - [`InMemoryBackend`]: process-local store with TTL expiry
//!
//! The concrete backend is chosen once, by [`connect_backend`], and shared as
//! `Arc<dyn CacheBackend>`. Callers never branch on which one they got.

pub mod degraded;
pub mod memory;
pub mod redis_store;

pub use degraded::DegradedBackend;
pub use memory::InMemoryBackend;
pub use redis_store::{RedisBackend, RedisBackendConfig};

use super::CacheResult;
use crate::core::config::CacheConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Failure counters kept by network backends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BackendCounters {
    /// Failed connection attempts and failed commands
    pub connection_errors: u64,
    /// Connects and commands that ran out of time
    pub timeouts: u64,
}

/// Connection state of a backend
///
/// Only [`BackendState::Ready`] permits reads and writes. Any other state
/// makes the middleware bypass the cache for that request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendState {
    Uninitialized,
    Connecting,
    Ready,
    Degraded,
    Closed,
}

impl BackendState {
    pub fn is_ready(self) -> bool {
        self == Self::Ready
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Degraded => "degraded",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for BackendState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability set required of any cache backend
///
/// Keys are passed through verbatim; namespacing is the caller's job. A
/// backend that is not ready returns [`super::CacheError::Unavailable`]
/// rather than panicking or blocking.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Short identifier used in logs and health reports
    fn name(&self) -> &'static str;

    /// Current connection state
    fn state(&self) -> BackendState;

    /// Get a value; `None` when absent or expired
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Store a value that expires after `ttl`
    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()>;

    /// List keys matching a glob pattern (`*`, `?`, `[...]`)
    async fn list_keys(&self, pattern: &str) -> CacheResult<Vec<String>>;

    /// Delete the given keys, returning how many existed
    async fn delete_many(&self, keys: &[String]) -> CacheResult<u64>;

    /// Round-trip check
    async fn ping(&self) -> CacheResult<()>;

    /// Release connections; later calls report `Unavailable`
    async fn close(&self) -> CacheResult<()>;

    /// Failure counters, for backends that keep them
    fn counters(&self) -> Option<BackendCounters> {
        None
    }
}

/// Select and construct the process-wide backend
///
/// Never fails: disabled caching, a missing URL or a malformed URL all yield
/// the [`DegradedBackend`]. A valid URL yields a [`RedisBackend`] that
/// connects in the background, so startup does not wait on the store.
pub fn connect_backend(config: &CacheConfig) -> Arc<dyn CacheBackend> {
    if let Some(reason) = config.disabled_reason.as_deref() {
        warn!(reason, "Invalid cache configuration; response caching disabled, using degraded backend");
        return Arc::new(DegradedBackend::new());
    }

    if !config.enabled {
        info!("Response caching disabled by configuration; using degraded backend");
        return Arc::new(DegradedBackend::new());
    }

    let Some(url) = config.redis_url.as_deref() else {
        info!("No cache backend URL configured; using degraded backend");
        return Arc::new(DegradedBackend::new());
    };

    match RedisBackend::connect(RedisBackendConfig::from_cache_config(url, config)) {
        Ok(backend) => backend,
        Err(e) => {
            warn!(error = %e, "Cache backend could not be constructed; using degraded backend");
            Arc::new(DegradedBackend::new())
        }
    }
}

/// Redis-style glob match used by backends without server-side matching
///
/// Supports `*`, `?`, `[abc]`, `[a-z]`, `[^a]` and `\` escapes.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    glob_match_from(&pattern, &text)
}

/// Escape glob metacharacters so `literal` matches only itself
pub fn glob_escape(literal: &str) -> String {
    let mut escaped = String::with_capacity(literal.len());
    for c in literal.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn glob_match_from(pattern: &[char], text: &[char]) -> bool {
    let (mut p, mut t) = (0, 0);
    // position of the last `*` and the text index it is currently absorbing up to
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() {
            match pattern[p] {
                '*' => {
                    backtrack = Some((p, t));
                    p += 1;
                    continue;
                }
                '?' => {
                    p += 1;
                    t += 1;
                    continue;
                }
                '[' => {
                    if let Some((matched, next)) = match_class(pattern, p, text[t]) {
                        if matched {
                            p = next;
                            t += 1;
                            continue;
                        }
                    } else if text[t] == '[' {
                        p += 1;
                        t += 1;
                        continue;
                    }
                }
                '\\' if p + 1 < pattern.len() => {
                    if pattern[p + 1] == text[t] {
                        p += 2;
                        t += 1;
                        continue;
                    }
                }
                c => {
                    if c == text[t] {
                        p += 1;
                        t += 1;
                        continue;
                    }
                }
            }
        }

        match backtrack {
            Some((star, absorbed)) => {
                p = star + 1;
                t = absorbed + 1;
                backtrack = Some((star, absorbed + 1));
            }
            None => return false,
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}

/// Match `c` against the class starting at `pattern[start] == '['`.
/// Returns `(matched, index after ']')`, or `None` for an unterminated class.
fn match_class(pattern: &[char], start: usize, c: char) -> Option<(bool, usize)> {
    let mut i = start + 1;
    let negate = i < pattern.len() && pattern[i] == '^';
    if negate {
        i += 1;
    }

    let mut matched = false;
    while i < pattern.len() && pattern[i] != ']' {
        if pattern[i] == '\\' && i + 1 < pattern.len() {
            matched |= pattern[i + 1] == c;
            i += 2;
        } else if i + 2 < pattern.len() && pattern[i + 1] == '-' && pattern[i + 2] != ']' {
            let (lo, hi) = if pattern[i] <= pattern[i + 2] {
                (pattern[i], pattern[i + 2])
            } else {
                (pattern[i + 2], pattern[i])
            };
            matched |= lo <= c && c <= hi;
            i += 3;
        } else {
            matched |= pattern[i] == c;
            i += 1;
        }
    }

    if i >= pattern.len() {
        return None;
    }

    Some((matched != negate, i + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_star_and_question() {
        assert!(glob_match("cache:grants:*", "cache:grants:/api/grants?page=1"));
        assert!(glob_match("cache:grants:*", "cache:grants:"));
        assert!(!glob_match("cache:grants:*", "cache:artists:5"));
        assert!(glob_match("cache:?:x", "cache:a:x"));
        assert!(!glob_match("cache:?:x", "cache:ab:x"));
        assert!(glob_match("*", ""));
        assert!(glob_match("a*b*c", "a123b456c"));
        assert!(!glob_match("a*b*c", "a123b456"));
    }

    #[test]
    fn test_glob_classes_and_escapes() {
        assert!(glob_match("h[ae]llo", "hello"));
        assert!(glob_match("h[ae]llo", "hallo"));
        assert!(!glob_match("h[ae]llo", "hillo"));
        assert!(glob_match("h[^e]llo", "hallo"));
        assert!(!glob_match("h[^e]llo", "hello"));
        assert!(glob_match("v[0-9]", "v7"));
        assert!(glob_match("a\\*b", "a*b"));
        assert!(!glob_match("a\\*b", "axb"));
    }

    #[test]
    fn test_glob_escape_matches_only_the_literal() {
        assert_eq!(glob_escape("42"), "42");
        assert_eq!(glob_escape("a*b?[c]\\"), "a\\*b\\?\\[c\\]\\\\");

        let pattern = format!("user:{}:*", glob_escape("*"));
        assert!(glob_match(&pattern, "user:*:/api/users/*"));
        assert!(!glob_match(&pattern, "user:42:/api/users/42"));
    }

    #[test]
    fn test_backend_state_display() {
        assert_eq!(BackendState::Ready.to_string(), "ready");
        assert!(BackendState::Ready.is_ready());
        assert!(!BackendState::Degraded.is_ready());
        assert!(!BackendState::Connecting.is_ready());
    }

    #[tokio::test]
    async fn test_connect_backend_without_url_is_degraded() {
        let backend = connect_backend(&CacheConfig::default());
        assert_eq!(backend.name(), "degraded");
        assert_eq!(backend.state(), BackendState::Ready);
    }

    #[tokio::test]
    async fn test_connect_backend_disabled_is_degraded() {
        let config = CacheConfig {
            enabled: false,
            redis_url: Some("redis://localhost:6379".to_string()),
            ..Default::default()
        };
        assert_eq!(connect_backend(&config).name(), "degraded");
    }

    #[tokio::test]
    async fn test_connect_backend_invalid_settings_are_degraded() {
        let mut config = CacheConfig {
            redis_url: Some("redis://localhost:6379".to_string()),
            ..Default::default()
        };
        config.disable("Invalid CACHE_TTL: invalid digit found in string");
        assert_eq!(connect_backend(&config).name(), "degraded");
    }

    #[tokio::test]
    async fn test_connect_backend_malformed_url_falls_back() {
        let config = CacheConfig {
            redis_url: Some("definitely not a url".to_string()),
            ..Default::default()
        };
        let backend = connect_backend(&config);
        assert_eq!(backend.name(), "degraded");
        assert!(backend.get("cache:x").await.unwrap().is_none());
    }
}
