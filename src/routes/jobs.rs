use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::app_state::AppState;
use crate::error::OrchestrationError;
use crate::models::job::{JobKind, JobState};
use crate::services::dedup::{self, JobStatusResponse};

/// Request body for POST /api/v1/tasks/{task_id}/auto-annotate.
#[derive(Debug, Deserialize)]
pub struct AutoAnnotateRequest {
    /// Label name -> label id the detector should look for.
    pub labels: HashMap<String, i64>,
    /// Drop earlier auto annotations before writing new ones.
    #[serde(default)]
    pub cleanup: bool,
}

/// Request body for POST /api/v1/annotations/{annotation_id}/encode.
#[derive(Debug, Deserialize)]
pub struct EncodeRequest {
    pub task_id: i64,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub job_id: String,
    pub status: JobState,
}

/// POST /api/v1/tasks/{task_id}/auto-annotate — submit an inference job.
///
/// 202 with the job handle, or 409 while a job for the same task is active.
pub async fn submit_auto_annotate(
    State(state): State<AppState>,
    Path(task_id): Path<i64>,
    Json(request): Json<AutoAnnotateRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), OrchestrationError> {
    let args = serde_json::json!({
        "labels": request.labels,
        "cleanup": request.cleanup,
    });
    let record = dedup::submit(state.queue.as_ref(), task_id, JobKind::Inference, args).await?;
    metrics::counter!("annotation_jobs_total", "kind" => "inference").increment(1);

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            job_id: record.id,
            status: record.status,
        }),
    ))
}

/// POST /api/v1/annotations/{annotation_id}/encode — submit a
/// feature-encode job for one annotated region.
pub async fn submit_encode(
    State(state): State<AppState>,
    Path(annotation_id): Path<i64>,
    Json(request): Json<EncodeRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), OrchestrationError> {
    let args = serde_json::json!({ "task_id": request.task_id });
    let record = dedup::submit(
        state.queue.as_ref(),
        annotation_id,
        JobKind::FeatureEncode,
        args,
    )
    .await?;
    metrics::counter!("annotation_jobs_total", "kind" => "feature_encode").increment(1);

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            job_id: record.id,
            status: record.status,
        }),
    ))
}

/// GET /api/v1/jobs/{job_id} — poll job status until a terminal state.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatusResponse>, OrchestrationError> {
    let status = dedup::status(state.queue.as_ref(), &job_id).await?;
    Ok(Json(status))
}
