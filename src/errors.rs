//! Error types shared by the storage layer, the browse core and the HTTP
//! handlers.
//!
//! Every variant maps to one error kind.  The enum implements
//! [`axum::response::IntoResponse`] so handlers can simply return
//! `Err(BrowseError::NotFound { .. })`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type BrowseResult<T> = Result<T, BrowseError>;

/// Generate a 16-character hex request ID.
pub fn generate_request_id() -> String {
    let bytes: [u8; 8] = rand::random();
    hex::encode(bytes).to_uppercase()
}

/// Failure kinds surfaced by the browse core.
#[derive(Debug, Error)]
pub enum BrowseError {
    /// The bucket or key does not exist.
    #[error("{resource} not found: {message}")]
    NotFound { resource: String, message: String },

    /// The caller's credentials are not allowed to perform the operation.
    #[error("Access denied: {message}")]
    AccessDenied { message: String },

    /// The request reached an endpoint that does not own the bucket.
    ///
    /// Recovered once inside the redirect-aware invoker; only surfaces when
    /// the regional retry is misrouted too.
    #[error("Bucket {bucket} must be addressed through another region: {message}")]
    RegionMismatch { bucket: String, message: String },

    /// Network failure, timeout or unreadable response.
    #[error("Storage request failed: {message}")]
    Transport { message: String },

    /// A filter entry could not be understood.
    #[error("Invalid filter: {message}")]
    InvalidFilter { message: String },

    /// A query parameter could not be parsed.
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// The operation was cancelled or ran past its deadline.
    #[error("{message}")]
    Cancelled { message: String },

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl BrowseError {
    /// Shorthand for a missing bucket.
    pub fn no_such_bucket(bucket: &str) -> Self {
        BrowseError::NotFound {
            resource: "Bucket".to_string(),
            message: format!("bucket '{bucket}' does not exist"),
        }
    }

    /// Shorthand for a missing key.
    pub fn no_such_key(bucket: &str, key: &str) -> Self {
        BrowseError::NotFound {
            resource: "Object".to_string(),
            message: format!("key '{key}' does not exist in bucket '{bucket}'"),
        }
    }

    /// Stable kind string, used in JSON error bodies and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            BrowseError::NotFound { .. } => "NotFound",
            BrowseError::AccessDenied { .. } => "AccessDenied",
            BrowseError::RegionMismatch { .. } => "RegionMismatch",
            BrowseError::Transport { .. } => "TransportError",
            BrowseError::InvalidFilter { .. } => "InvalidFilter",
            BrowseError::InvalidRequest { .. } => "InvalidRequest",
            BrowseError::Cancelled { .. } => "Cancelled",
            BrowseError::Internal(_) => "InternalError",
        }
    }

    /// Whether this is the wrong-region signal the invoker retries on.
    pub fn is_region_mismatch(&self) -> bool {
        matches!(self, BrowseError::RegionMismatch { .. })
    }

    /// Return the appropriate HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            BrowseError::NotFound { .. } => StatusCode::NOT_FOUND,
            BrowseError::AccessDenied { .. } => StatusCode::FORBIDDEN,
            BrowseError::RegionMismatch { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            BrowseError::Transport { .. } => StatusCode::BAD_GATEWAY,
            BrowseError::InvalidFilter { .. } | BrowseError::InvalidRequest { .. } => {
                StatusCode::BAD_REQUEST
            }
            BrowseError::Cancelled { .. } => StatusCode::GATEWAY_TIMEOUT,
            BrowseError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for BrowseError {
    fn into_response(self) -> Response {
        let request_id = generate_request_id();
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!(request_id = %request_id, kind = self.kind(), "{self}");
        }

        let body = json!({
            "error": self.kind(),
            "message": self.to_string(),
        });

        (status, [("x-request-id", request_id)], Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_is_16_upper_hex() {
        let id = generate_request_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            BrowseError::no_such_bucket("b").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            BrowseError::AccessDenied {
                message: "nope".into()
            }
            .status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            BrowseError::Transport {
                message: "reset".into()
            }
            .status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            BrowseError::Cancelled {
                message: "timed out".into()
            }
            .status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn test_kind_strings() {
        assert_eq!(BrowseError::no_such_key("b", "k").kind(), "NotFound");
        assert_eq!(
            BrowseError::Internal(anyhow::anyhow!("boom")).kind(),
            "InternalError"
        );
        assert!(BrowseError::RegionMismatch {
            bucket: "b".into(),
            message: "moved".into()
        }
        .is_region_mismatch());
    }

    #[test]
    fn test_no_such_key_message_names_bucket_and_key() {
        let err = BrowseError::no_such_key("photos", "cat.jpg");
        let text = err.to_string();
        assert!(text.contains("photos"));
        assert!(text.contains("cat.jpg"));
    }
}
