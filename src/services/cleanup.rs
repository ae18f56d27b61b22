use crate::error::OrchestrationError;
use crate::services::queue::WorkQueue;

/// Reclaim a failed or consumed job and return a user-presentable message.
///
/// Deletes the temp artifact named in the record (a missing file is fine),
/// captures the raw error from the job or its dependency, cascades deletion
/// to the dependency record, deletes the job itself, and summarizes the
/// raw text. Calling it again for the same id yields `NotFound`.
pub async fn process_failed_job(
    queue: &dyn WorkQueue,
    job_id: &str,
) -> Result<String, OrchestrationError> {
    let record = queue
        .fetch(job_id)
        .await?
        .ok_or_else(|| OrchestrationError::NotFound(format!("{job_id} job is not found")))?;

    if let Some(tmp_file) = &record.tmp_file {
        if tmp_file.exists() {
            if let Err(e) = std::fs::remove_file(tmp_file) {
                tracing::warn!(job_id, path = %tmp_file.display(), error = %e, "failed to remove temp file");
            }
        }
    }

    let mut raw = record.error.clone();
    if let Some(dep_id) = &record.dependency_id {
        if let Some(dep) = queue.fetch(dep_id).await? {
            if raw.is_none() {
                raw = dep.error.clone();
            }
            queue.delete(dep_id).await?;
        }
    }
    queue.delete(job_id).await?;

    tracing::info!(job_id, "failed job cleaned up");
    Ok(parse_exception_message(raw.as_deref().unwrap_or("job failed")))
}

/// Best-effort extraction of a short message from a raw failure trace.
///
/// Recognizes the structured detail marker
/// `ErrorDetail(string="...", code=...)` and namespaced exception prefixes
/// like `framework.exceptions.ValidationError: ...`. Anything it cannot
/// parse is returned unchanged; this function never fails.
pub fn parse_exception_message(msg: &str) -> String {
    if msg.contains("ErrorDetail") {
        if let Some(detail) = msg
            .split_once("string=")
            .map(|(_, rest)| rest)
            .and_then(|rest| rest.split(", code=").next())
        {
            return detail.trim().trim_matches('"').to_string();
        }
    } else if let Some((prefix, rest)) = msg.split_once(':') {
        let namespaced = !prefix.contains(char::is_whitespace)
            && (prefix.contains('.') || prefix.contains("::"));
        if namespaced && !rest.trim().is_empty() {
            return rest.trim().to_string();
        }
    }
    msg.to_string()
}
