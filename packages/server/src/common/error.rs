//! API error envelope.
//!
//! Every handler failure renders as `{"error": <short tag>, "detail": <msg>}`
//! with the HTTP status implied by the error kind.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::kernel::store::StoreError;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed input, unknown template, bad flag combination. Never enqueued.
    #[error("{0}")]
    Validation(String),

    /// Inventory, template, or credential id unknown.
    #[error("{0}")]
    NotFound(String),

    /// Caller failed authentication or the allowlist policy.
    #[error("{0}")]
    Unauthorized(String),

    /// Queue / semaphore / stats store failure that reached the dispatcher.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Store(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn tag(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "validation",
            ApiError::NotFound(_) => "not_found",
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::Store(_) => "store_error",
            ApiError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = json!({
            "error": self.tag(),
            "detail": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}
