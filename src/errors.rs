//! Error types for GalleryStore
//!
//! Provides structured error handling using thiserror for all error cases
//! encountered in the storage core, including provider operations, access
//! control, and configuration errors.
//!
//! Provider implementations normalize backend-specific failures into this
//! taxonomy at their own boundary; nothing above the provider layer ever
//! sees a backend-native error type.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::store::ProviderId;

/// Main error type for GalleryStore operations
#[derive(Error, Debug)]
pub enum StorageError {
    /// Provider unknown, disabled, or misconfigured
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Credential invalid or expired on a remote provider call
    #[error("Authentication failed for provider {provider}: {message}")]
    Authentication {
        provider: ProviderId,
        message: String,
    },

    /// Resource absent at the resolved path
    #[error("Not found: {path}")]
    NotFound { path: String },

    /// Path-traversal rejection or an access-control deny.
    /// Must never disclose whether the underlying resource exists.
    #[error("Access denied")]
    AccessDenied,

    /// Network timeout, rate limit, or other retryable failure
    #[error("Transient error: {0}")]
    Transient(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    /// Whether this failure is authentication-class and should drive the
    /// credential lifecycle state machine. Timeouts are transient and must
    /// never count as authentication failures.
    pub fn is_authentication(&self) -> bool {
        matches!(self, StorageError::Authentication { .. })
    }

    /// Normalize an `object_store` error into the taxonomy.
    ///
    /// The aws implementation surfaces credential rejections as generic
    /// errors, so auth detection falls back on the response text.
    pub fn from_object_store(err: object_store::Error, provider: ProviderId, path: &str) -> Self {
        match err {
            object_store::Error::NotFound { .. } => StorageError::NotFound {
                path: path.to_string(),
            },
            other => {
                let message = other.to_string();
                if is_auth_message(&message) {
                    StorageError::Authentication { provider, message }
                } else if is_transient_message(&message) {
                    StorageError::Transient(message)
                } else {
                    StorageError::Internal(message)
                }
            }
        }
    }
}

fn is_auth_message(message: &str) -> bool {
    const MARKERS: [&str; 5] = [
        "403",
        "InvalidAccessKeyId",
        "SignatureDoesNotMatch",
        "AccessDenied",
        "ExpiredToken",
    ];
    MARKERS.iter().any(|m| message.contains(m))
}

fn is_transient_message(message: &str) -> bool {
    const MARKERS: [&str; 5] = ["timed out", "timeout", "429", "503", "connection"];
    let lower = message.to_lowercase();
    MARKERS.iter().any(|m| lower.contains(m))
}

impl IntoResponse for StorageError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            StorageError::Configuration(msg) => {
                (StatusCode::BAD_REQUEST, "ConfigurationError", msg.clone())
            }
            StorageError::Authentication { provider, .. } => (
                StatusCode::BAD_GATEWAY,
                "AuthenticationError",
                format!("Provider {} requires re-authorization", provider),
            ),
            StorageError::NotFound { path } => (
                StatusCode::NOT_FOUND,
                "NotFound",
                format!("No resource at {}", path),
            ),
            // Deliberately uniform: the same body whether the path escaped
            // the sandbox or the evaluator denied an existing resource.
            StorageError::AccessDenied => (
                StatusCode::FORBIDDEN,
                "AccessDenied",
                "Access denied".to_string(),
            ),
            StorageError::Transient(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "TransientError",
                "Storage temporarily unavailable, retry later".to_string(),
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "InternalError",
                "Storage unavailable".to_string(),
            ),
        };

        let body = serde_json::json!({
            "error": code,
            "message": message,
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_denied_message_is_generic() {
        // The Display output must not mention any path or resource.
        let err = StorageError::AccessDenied;
        assert_eq!(err.to_string(), "Access denied");
    }

    #[test]
    fn test_auth_classification() {
        let err = StorageError::Authentication {
            provider: ProviderId::Drive,
            message: "invalid_grant".to_string(),
        };
        assert!(err.is_authentication());
        assert!(!StorageError::Transient("timeout".into()).is_authentication());
        assert!(!StorageError::AccessDenied.is_authentication());
    }

    #[test]
    fn test_object_store_not_found_maps_to_not_found() {
        let err = object_store::Error::NotFound {
            path: "a/b.jpg".to_string(),
            source: "gone".into(),
        };
        let mapped = StorageError::from_object_store(err, ProviderId::S3, "a/b.jpg");
        assert!(matches!(mapped, StorageError::NotFound { ref path } if path == "a/b.jpg"));
    }

    #[test]
    fn test_auth_markers_detected() {
        assert!(is_auth_message("Generic S3 error: SignatureDoesNotMatch"));
        assert!(is_auth_message("HTTP status 403 Forbidden"));
        assert!(!is_auth_message("HTTP status 500"));
    }
}
