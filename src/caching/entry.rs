//! # Cached Response Entry
//!
//! The only format written to the backend:
//!
//! ```json
//! {"statusCode": 200, "data": "{\"grants\":[]}", "headers": {"content-type": "application/json"}}
//! ```
//!
//! `data` carries the body text verbatim. Bodies that are not valid UTF-8 are
//! base64-encoded and flagged with `"encoding": "base64"`. Header names are
//! lower-case; a header with several values is stored as an array, a single
//! value as a plain string. Both shapes are accepted when reading.

use super::{CacheError, CacheResult};
use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::Response;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Stored status/body/headers triple for one response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub status_code: u16,

    pub data: String,

    #[serde(default, skip_serializing_if = "PayloadEncoding::is_utf8")]
    pub encoding: PayloadEncoding,

    #[serde(default)]
    pub headers: BTreeMap<String, HeaderValues>,
}

/// How `data` encodes the body bytes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadEncoding {
    #[default]
    Utf8,
    Base64,
}

impl PayloadEncoding {
    fn is_utf8(&self) -> bool {
        *self == Self::Utf8
    }
}

/// One or more values for a single header name, in emission order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "OneOrMany", into = "OneOrMany")]
pub struct HeaderValues(pub Vec<String>);

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl From<OneOrMany> for HeaderValues {
    fn from(value: OneOrMany) -> Self {
        match value {
            OneOrMany::One(v) => Self(vec![v]),
            OneOrMany::Many(vs) => Self(vs),
        }
    }
}

impl From<HeaderValues> for OneOrMany {
    fn from(mut values: HeaderValues) -> Self {
        if values.0.len() == 1 {
            Self::One(values.0.remove(0))
        } else {
            Self::Many(values.0)
        }
    }
}

impl CacheEntry {
    /// Capture a finalized response
    ///
    /// Returns `None` when a header value is not visible ASCII: the JSON
    /// format stores header values as text, so such a response cannot be
    /// replayed faithfully and must not be cached.
    pub fn capture(status: StatusCode, headers: &HeaderMap, body: &[u8]) -> Option<Self> {
        let mut captured: BTreeMap<String, HeaderValues> = BTreeMap::new();

        for (name, value) in headers {
            let Ok(text) = value.to_str() else {
                debug!(header = %name, "Header value is not text; response cannot be cached");
                return None;
            };
            captured
                .entry(name.as_str().to_string())
                .or_default()
                .0
                .push(text.to_string());
        }

        let (data, encoding) = match std::str::from_utf8(body) {
            Ok(text) => (text.to_string(), PayloadEncoding::Utf8),
            Err(_) => (BASE64.encode(body), PayloadEncoding::Base64),
        };

        Some(Self {
            status_code: status.as_u16(),
            data,
            encoding,
            headers: captured,
        })
    }

    /// Serialize for storage
    pub fn encode(&self) -> CacheResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse a stored entry
    pub fn decode(bytes: &[u8]) -> CacheResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Body bytes as originally emitted
    pub fn body(&self) -> CacheResult<Bytes> {
        match self.encoding {
            PayloadEncoding::Utf8 => Ok(Bytes::from(self.data.clone())),
            PayloadEncoding::Base64 => BASE64
                .decode(self.data.as_bytes())
                .map(Bytes::from)
                .map_err(|e| CacheError::Store {
                    message: format!("invalid base64 payload: {}", e),
                }),
        }
    }

    /// Rebuild the header map, preserving repeated values
    pub fn header_map(&self) -> CacheResult<HeaderMap> {
        let mut map = HeaderMap::new();
        for (name, values) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| CacheError::Store {
                message: format!("invalid header name {:?}: {}", name, e),
            })?;
            for value in &values.0 {
                let value = HeaderValue::from_str(value).map_err(|e| CacheError::Store {
                    message: format!("invalid value for header {}: {}", name, e),
                })?;
                map.append(name.clone(), value);
            }
        }
        Ok(map)
    }

    /// Replay the entry as an HTTP response
    ///
    /// Any inconsistency (bad status, header or payload) is an error so the
    /// caller can fall back to the handler instead of serving garbage.
    pub fn into_response(self) -> CacheResult<Response> {
        let status = StatusCode::from_u16(self.status_code).map_err(|e| CacheError::Store {
            message: format!("invalid status code {}: {}", self.status_code, e),
        })?;
        let headers = self.header_map()?;
        let body = self.body()?;

        let mut response = Response::new(Body::from(body));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}
