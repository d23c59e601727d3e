//! Relay request errors
//!
//! Every variant becomes a JSON response; CORS headers are added by the
//! relay handler on the way out.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Missing path")]
    MissingPath,

    #[error("invalid target {target}: {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("invalid request body: {0}")]
    InvalidBody(String),

    /// No candidate produced a usable response; `detail` is the last failure
    #[error("fetch failed: {detail}")]
    AllTargetsFailed { detail: String },
}

impl RelayError {
    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::MissingPath
            | RelayError::InvalidTarget { .. }
            | RelayError::InvalidBody(_) => StatusCode::BAD_REQUEST,
            RelayError::AllTargetsFailed { .. } => StatusCode::BAD_GATEWAY,
        }
    }

    /// JSON error body: {"error": "...", "detail": "...", "request_id": "req_..."}
    ///
    /// A missing path answers a bare `{"error": "Missing path"}`.
    pub fn into_response(self, request_id: &str) -> Response {
        let status = self.status();
        let body = match &self {
            RelayError::MissingPath => serde_json::json!({ "error": "Missing path" }),
            RelayError::InvalidTarget { target, reason } => serde_json::json!({
                "error": "Invalid target",
                "detail": format!("{target}: {reason}"),
                "request_id": request_id,
            }),
            RelayError::InvalidBody(detail) => serde_json::json!({
                "error": "Invalid request body",
                "detail": detail,
                "request_id": request_id,
            }),
            RelayError::AllTargetsFailed { detail } => serde_json::json!({
                "error": "fetch failed",
                "detail": detail,
                "request_id": request_id,
            }),
        };
        (
            status,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}
