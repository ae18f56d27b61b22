use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::db::StorageError;
use crate::services::queue::QueueError;

/// Failures surfaced by the orchestration layer.
///
/// Submission-time errors (`Conflict`, `InsufficientData`) are returned
/// synchronously and never reach the queue. Execution-time errors move the
/// job to `failed` with the raw text retained; the cleanup handler
/// summarizes them on the next read.
#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error("not enough encoded data: need at least {needed}, found {got}")]
    InsufficientData { needed: usize, got: usize },

    #[error("computation failed: {0}")]
    Computation(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}

impl OrchestrationError {
    fn status_code(&self) -> StatusCode {
        match self {
            OrchestrationError::Conflict(_) => StatusCode::CONFLICT,
            OrchestrationError::NotFound(_) => StatusCode::NOT_FOUND,
            OrchestrationError::InsufficientData { .. } => StatusCode::BAD_REQUEST,
            OrchestrationError::Computation(_)
            | OrchestrationError::Storage(_)
            | OrchestrationError::Queue(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for OrchestrationError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = Json(serde_json::json!({ "detail": self.to_string() }));
        (status, body).into_response()
    }
}
