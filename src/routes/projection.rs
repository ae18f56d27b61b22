use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::app_state::AppState;
use crate::error::OrchestrationError;
use crate::services::projection::{self, ProjectionOutcome};

/// GET /api/v1/labels/{label_id}/projection
///
/// 200 with the cached payload when fresh, 202 while the computation is
/// queued or running, 400 below the minimum-data threshold, 500 with a
/// short message when the computation failed.
pub async fn get_projection(
    State(state): State<AppState>,
    Path(label_id): Path<i64>,
) -> Result<Response, OrchestrationError> {
    let outcome = projection::get_or_compute(
        state.queue.as_ref(),
        state.store.as_ref(),
        label_id,
        state.config.projection_ttl_secs,
    )
    .await?;

    Ok(match outcome {
        ProjectionOutcome::Ready(payload) => (StatusCode::OK, Json(payload)).into_response(),
        ProjectionOutcome::Pending => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "detail": "projection in progress" })),
        )
            .into_response(),
    })
}
