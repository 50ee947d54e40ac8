//! # Cache Key Generator
//!
//! Keys have the shape `cache:<scope>:<path-and-query>`:
//!
//! | Request path                 | Key                                             |
//! |------------------------------|-------------------------------------------------|
//! | `/api/grants?page=2`         | `cache:grants:/api/grants?page=2`               |
//! | `/api/users/42/applications` | `cache:user:42:/api/users/42/applications`      |
//! | `/api/users`                 | `cache:users:/api/users`                        |
//! | `/`                          | `cache:/`                                       |
//!
//! The scope is the first path segment after an optional `api` segment,
//! except that `users/<id>` narrows to `user:<id>`. It is what lets the fixed
//! invalidation table (see [`super::InvalidationTarget`]) purge a collection
//! with a single pattern.
//!
//! The query string is used exactly as received. `?a=1&b=2` and `?b=2&a=1`
//! are different keys.

use axum::http::Uri;
use std::fmt;

/// Namespace shared by every cache entry and invalidation pattern
pub const CACHE_PREFIX: &str = "cache:";

/// Fully-qualified backend key for one request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for a request URI
    pub fn from_uri(uri: &Uri) -> Self {
        let path_and_query = uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| uri.path());
        Self::from_path_and_query(path_and_query)
    }

    /// Derive the key from a raw path with optional query string
    pub fn from_path_and_query(path_and_query: &str) -> Self {
        let path = path_and_query
            .split_once('?')
            .map_or(path_and_query, |(path, _)| path);

        match resource_scope(path) {
            Some(scope) => Self(format!("{}{}:{}", CACHE_PREFIX, scope, path_and_query)),
            None => Self(format!("{}{}", CACHE_PREFIX, path_and_query)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Resolve a caller-supplied invalidation pattern into the backend namespace
pub fn namespaced_pattern(pattern: &str) -> String {
    format!("{}{}", CACHE_PREFIX, pattern)
}

fn resource_scope(path: &str) -> Option<String> {
    let mut segments = path.split('/').filter(|s| !s.is_empty());

    let mut first = segments.next()?;
    if first == "api" {
        first = segments.next()?;
    }

    if first == "users" {
        if let Some(user_id) = segments.next() {
            return Some(format!("user:{}", user_id));
        }
    }

    Some(first.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_scope() {
        assert_eq!(
            CacheKey::from_path_and_query("/api/grants?page=2").as_str(),
            "cache:grants:/api/grants?page=2"
        );
        assert_eq!(
            CacheKey::from_path_and_query("/api/artists/5").as_str(),
            "cache:artists:/api/artists/5"
        );
    }

    #[test]
    fn test_user_scope() {
        assert_eq!(
            CacheKey::from_path_and_query("/api/users/42/applications").as_str(),
            "cache:user:42:/api/users/42/applications"
        );
        assert_eq!(
            CacheKey::from_path_and_query("/api/users").as_str(),
            "cache:users:/api/users"
        );
    }

    #[test]
    fn test_paths_without_api_segment() {
        assert_eq!(
            CacheKey::from_path_and_query("/documents/9").as_str(),
            "cache:documents:/documents/9"
        );
        assert_eq!(CacheKey::from_path_and_query("/").as_str(), "cache:/");
        assert_eq!(CacheKey::from_path_and_query("/api").as_str(), "cache:/api");
    }

    #[test]
    fn test_identical_requests_derive_identical_keys() {
        let a: Uri = "/api/grants?status=open&page=1".parse().unwrap();
        let b: Uri = "/api/grants?status=open&page=1".parse().unwrap();
        assert_eq!(CacheKey::from_uri(&a), CacheKey::from_uri(&b));
    }

    #[test]
    fn test_query_strings_are_not_normalized() {
        let a = CacheKey::from_path_and_query("/api/grants?a=1&b=2");
        let b = CacheKey::from_path_and_query("/api/grants?b=2&a=1");
        let c = CacheKey::from_path_and_query("/api/grants");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_absolute_uri_uses_path_and_query_only() {
        let uri: Uri = "http://example.com/api/grants?x=1".parse().unwrap();
        assert_eq!(
            CacheKey::from_uri(&uri).as_str(),
            "cache:grants:/api/grants?x=1"
        );
    }

    #[test]
    fn test_namespaced_pattern() {
        assert_eq!(namespaced_pattern("grants:*"), "cache:grants:*");
    }
}
