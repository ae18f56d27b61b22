use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::OrchestrationError;
use crate::models::job::{JobKind, JobRecord, JobState};
use crate::services::cleanup::process_failed_job;
use crate::services::queue::WorkQueue;

/// Response for job status polling.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatusResponse {
    pub job_id: String,
    pub kind: JobKind,
    pub target_resource_id: i64,
    pub status: JobState,
    pub progress: u8,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Short human-readable message; present only for failed jobs.
    pub error: Option<String>,
}

/// Collect every record owned by this layer that the dedup guard must
/// consider: all non-failed registries.
async fn known_jobs(queue: &dyn WorkQueue) -> Result<Vec<JobRecord>, OrchestrationError> {
    let mut ids = Vec::new();
    for state in JobState::NON_FAILED {
        ids.extend(queue.list_ids(state).await?);
    }
    ids.sort();
    ids.dedup();

    let mut records = Vec::with_capacity(ids.len());
    for id in ids {
        match queue.fetch(&id).await? {
            Some(record) => records.push(record),
            // Registry entry for a record that has since expired.
            None => queue.delete(&id).await?,
        }
    }
    Ok(records)
}

/// Accept a new computation for `(resource_id, kind)` unless one is
/// already active.
///
/// It is still possible for two concurrent submissions to pass the check
/// within the same race window. The race isn't critical; the filtration is
/// a light-weight protection, not a lock. Callers needing strict
/// exclusivity must serialize externally.
pub async fn submit(
    queue: &dyn WorkQueue,
    resource_id: i64,
    kind: JobKind,
    args: serde_json::Value,
) -> Result<JobRecord, OrchestrationError> {
    let active = known_jobs(queue)
        .await?
        .into_iter()
        .any(|job| {
            job.target_resource_id == resource_id && job.kind == kind && job.status.is_active()
        });
    if active {
        return Err(OrchestrationError::Conflict(format!(
            "only one running {kind} request is allowed for resource #{resource_id}"
        )));
    }

    let record = JobRecord::new(kind, resource_id, args);
    queue.enqueue(&record).await?;

    tracing::info!(
        job_id = %record.id,
        kind = %kind,
        resource_id,
        "job submitted"
    );
    Ok(record)
}

/// Same guard, but with a caller-chosen deterministic id (projection jobs).
pub async fn submit_with_id(
    queue: &dyn WorkQueue,
    id: String,
    resource_id: i64,
    kind: JobKind,
    args: serde_json::Value,
) -> Result<JobRecord, OrchestrationError> {
    if let Some(existing) = queue.fetch(&id).await? {
        if existing.status.is_active() {
            return Err(OrchestrationError::Conflict(format!(
                "only one running {kind} request is allowed for resource #{resource_id}"
            )));
        }
    }
    let record = JobRecord::with_id(id, kind, resource_id, args);
    queue.enqueue(&record).await?;
    Ok(record)
}

/// Status polling for a single job id.
///
/// A failed record is reclaimed by the read that observes it: temp
/// artifacts and the dependency record go with it, and the next poll for
/// the same id is `NotFound`.
pub async fn status(
    queue: &dyn WorkQueue,
    job_id: &str,
) -> Result<JobStatusResponse, OrchestrationError> {
    let record = queue
        .fetch(job_id)
        .await?
        .ok_or_else(|| OrchestrationError::NotFound(format!("{job_id} job is not found")))?;

    let error = match record.status {
        JobState::Failed => Some(process_failed_job(queue, job_id).await?),
        _ => None,
    };

    Ok(JobStatusResponse {
        job_id: record.id,
        kind: record.kind,
        target_resource_id: record.target_resource_id,
        status: record.status,
        progress: record.progress,
        enqueued_at: record.enqueued_at,
        started_at: record.started_at,
        ended_at: record.ended_at,
        error,
    })
}
