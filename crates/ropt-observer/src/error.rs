//! Error types for the API layer.
//!
//! [`ObserverError`] unifies all failure modes into a single enum that
//! can be converted into an Axum HTTP response via its
//! [`IntoResponse`](axum::response::IntoResponse) implementation.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use ropt_core::{CoreError, IngestError};
use ropt_types::InvalidMetric;

/// Body code returned when the ingestion queue is full.
pub const QUEUE_FULL_CODE: &str = "event_queue_full";

/// Errors that can occur in the API layer.
#[derive(Debug, thiserror::Error)]
pub enum ObserverError {
    /// The ingestion queue is at capacity.
    #[error("event queue full")]
    QueueFull,

    /// A dependency the request needs is not available.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The request body or query was rejected.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A core operation failed.
    #[error("core error: {0}")]
    Core(#[from] CoreError),
}

impl From<IngestError> for ObserverError {
    fn from(e: IngestError) -> Self {
        match e {
            IngestError::Overflow => Self::QueueFull,
            IngestError::Closed => Self::Unavailable("event pipeline closed".to_owned()),
            IngestError::Malformed(invalid) => Self::InvalidRequest(invalid.to_string()),
        }
    }
}

impl From<InvalidMetric> for ObserverError {
    fn from(e: InvalidMetric) -> Self {
        Self::InvalidRequest(e.to_string())
    }
}

impl From<JsonRejection> for ObserverError {
    fn from(rejection: JsonRejection) -> Self {
        Self::InvalidRequest(rejection.body_text())
    }
}

impl IntoResponse for ObserverError {
    fn into_response(self) -> Response {
        if matches!(self, Self::QueueFull) {
            let body = serde_json::json!({
                "ok": false,
                "error": QUEUE_FULL_CODE,
            });
            return (StatusCode::SERVICE_UNAVAILABLE, axum::Json(body)).into_response();
        }

        let (status, message) = match &self {
            Self::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            Self::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Self::Core(e) => {
                tracing::warn!(error = %e, "Request failed in core");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            Self::QueueFull => (StatusCode::SERVICE_UNAVAILABLE, QUEUE_FULL_CODE.to_owned()),
        };

        let body = serde_json::json!({
            "error": message,
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}
