//! HTTP error mapping.
//!
//! Every component raises typed domain errors; this layer maps them to the
//! stable wire contract: HTTP status per the error matrix, a JSON envelope
//! `{"error": "<kind>"}`, and an `X-Error-Code` response header carrying the
//! symbolic kind for programmatic clients. Internal detail (SQL text, file
//! paths, store messages) never leaves the process; the full error is
//! logged server-side.

use axum::{
    Json,
    http::{HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

static X_ERROR_CODE: HeaderName = HeaderName::from_static("x-error-code");

/// Wire envelope for every error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Stable symbolic kind, identical to the `X-Error-Code` header.
    pub error: String,
    /// Human-readable message, safe for display.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Server error type; almost everything funnels through the core error.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Core(#[from] oxihub_core::Error),

    #[error("IO error")]
    Io(#[from] std::io::Error),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

fn status_for(kind: &str) -> StatusCode {
    match kind {
        "unauthenticated" | "invalid_credentials" | "revoked_token" => StatusCode::UNAUTHORIZED,
        "forbidden" => StatusCode::FORBIDDEN,
        "repo_not_found" | "revision_not_found" | "path_not_found" | "not_found" => {
            StatusCode::NOT_FOUND
        }
        "name_taken" => StatusCode::CONFLICT,
        "invalid_name" => StatusCode::UNPROCESSABLE_ENTITY,
        "quota_exceeded" | "inline_too_large" | "object_too_large" => {
            StatusCode::PAYLOAD_TOO_LARGE
        }
        "object_not_ready" | "size_mismatch" | "unsupported_hash" => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        "stale_revision" | "concurrent_update" => StatusCode::CONFLICT,
        "storage_unavailable" | "backend_unavailable" => StatusCode::SERVICE_UNAVAILABLE,
        "malformed_payload" => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Message the client may see; internal variants collapse to a generic line.
fn safe_message(error: &oxihub_core::Error) -> Option<String> {
    use oxihub_core::Error as E;
    match error {
        E::Libsql(_) | E::Git2(_) | E::Io(_) | E::ObjectStore(_) | E::SerdeJson(_) => None,
        other => Some(other.to_string()),
    }
}

impl ServerError {
    fn kind(&self) -> &'static str {
        match self {
            ServerError::Core(e) => e.kind(),
            ServerError::Io(_) => "internal_error",
            ServerError::BadRequest(_) => "malformed_payload",
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        // Full error server-side only.
        tracing::error!(error = ?self, "request error");

        let kind = self.kind();
        let status = status_for(kind);
        let message = match &self {
            ServerError::Core(e) => safe_message(e),
            ServerError::Io(_) => None,
            ServerError::BadRequest(msg) => Some(msg.clone()),
        };

        let body = ErrorResponse {
            error: kind.to_string(),
            message,
        };
        let mut response = (status, Json(body)).into_response();
        if let Ok(value) = HeaderValue::from_str(kind) {
            response.headers_mut().insert(X_ERROR_CODE.clone(), value);
        }
        response
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_status_matrix() {
        assert_eq!(status_for("quota_exceeded"), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(status_for("stale_revision"), StatusCode::CONFLICT);
        assert_eq!(status_for("malformed_payload"), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for("storage_unavailable"),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_internal_errors_stay_opaque() {
        let error = oxihub_core::Error::ObjectStore("secret endpoint detail".to_string());
        assert!(safe_message(&error).is_none());
    }
}
