//! # Application Error Types
//!
//! Errors surfaced by the service's own endpoints (configuration loading, the
//! admin surface, the sample collection handlers). Cache failures are NOT part
//! of this taxonomy on the request path: the caching layer absorbs them and
//! degrades to "no cache" instead. See [`crate::caching::CacheError`].
//!
//! `AppError` implements [`IntoResponse`] so handlers can return
//! `AppResult<T>` directly and axum renders a structured JSON error body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Result type used by configuration loading and HTTP handlers
pub type AppResult<T> = Result<T, AppError>;

/// Application-level error
#[derive(Debug, Error, Clone)]
pub enum AppError {
    /// Configuration-related errors (invalid config, unreadable files, bad env values)
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Request validation errors (missing fields, malformed values)
    #[error("Request validation failed: {field} - {reason}")]
    RequestValidation { field: String, reason: String },

    /// Requested resource does not exist
    #[error("Not found: {resource}")]
    NotFound { resource: String },

    /// A dependency the request explicitly needs is unavailable
    #[error("Service unavailable: {service} - {reason}")]
    ServiceUnavailable { service: String, reason: String },

    /// Internal server errors for unexpected failures
    #[error("Internal server error: {message}")]
    Internal { message: String },

    /// I/O errors (reading the configuration file)
    #[error("I/O error: {message}")]
    Io { message: String },

    /// YAML parsing errors for configuration files
    #[error("YAML error: {message}")]
    Yaml { message: String },
}

impl AppError {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a validation error for a specific field
    pub fn validation<F: Into<String>, R: Into<String>>(field: F, reason: R) -> Self {
        Self::RequestValidation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a not found error
    pub fn not_found<S: Into<String>>(resource: S) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Create a service unavailable error
    pub fn service_unavailable<S: Into<String>, R: Into<String>>(service: S, reason: R) -> Self {
        Self::ServiceUnavailable {
            service: service.into(),
            reason: reason.into(),
        }
    }

    /// Create an internal error with a custom message
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// HTTP status code returned to clients for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::RequestValidation { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Configuration { .. }
            | Self::Internal { .. }
            | Self::Io { .. }
            | Self::Yaml { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable error type for API responses
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration_error",
            Self::RequestValidation { .. } => "request_validation_error",
            Self::NotFound { .. } => "not_found",
            Self::ServiceUnavailable { .. } => "service_unavailable",
            Self::Internal { .. } => "internal_error",
            Self::Io { .. } => "io_error",
            Self::Yaml { .. } => "yaml_error",
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Yaml {
            message: err.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let error_response = json!({
            "error": {
                "code": status.as_u16(),
                "message": self.to_string(),
                "type": self.error_type(),
            }
        });

        (status, Json(error_response)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            AppError::validation("pattern", "must not be empty").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::not_found("grant 7").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::service_unavailable("cache", "not ready").status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::config("bad ttl").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_type_names() {
        assert_eq!(AppError::internal("boom").error_type(), "internal_error");
        assert_eq!(AppError::config("x").error_type(), "configuration_error");
    }

    #[test]
    fn test_from_conversions() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "app.yaml");
        let err: AppError = io.into();
        assert_eq!(err.error_type(), "io_error");
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

        let yaml = serde_yaml::from_str::<u16>("[not, a, port]").unwrap_err();
        let err: AppError = yaml.into();
        assert_eq!(err.error_type(), "yaml_error");
    }

    #[tokio::test]
    async fn test_into_response_renders_json_body() {
        let response = AppError::not_found("grant 42").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"]["code"], 404);
        assert_eq!(value["error"]["type"], "not_found");
        assert_eq!(value["error"]["message"], "Not found: grant 42");
    }
}
