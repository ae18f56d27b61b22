use std::sync::Arc;

use crate::error::OrchestrationError;
use crate::models::job::JobState;
use crate::services::queue::WorkQueue;

/// Publishes a monotonic 0-100 progress value for one running job.
///
/// `report` also returns the job's live status; it is the system's only
/// cancellation mechanism. A computation that stops seeing `Started` must
/// exit at that checkpoint — cancellation is cooperative, never preemptive.
pub struct ProgressReporter {
    queue: Arc<dyn WorkQueue>,
    job_id: String,
    last: u8,
}

impl ProgressReporter {
    pub fn new(queue: Arc<dyn WorkQueue>, job_id: impl Into<String>) -> Self {
        Self {
            queue,
            job_id: job_id.into(),
            last: 0,
        }
    }

    /// Record `floor(fraction * 100)` and return the live status.
    ///
    /// Progress never decreases; a deleted job reads as `NotFound`, which
    /// the executor treats the same as cancellation. Only the progress
    /// value is written, through [`WorkQueue::set_progress`]; a status
    /// change landing at any point around this call survives it and is
    /// returned here or at the next checkpoint.
    pub async fn report(&mut self, fraction: f64) -> Result<JobState, OrchestrationError> {
        let value = (fraction.clamp(0.0, 1.0) * 100.0).floor() as u8;
        self.last = self.last.max(value);
        self.queue.set_progress(&self.job_id, self.last).await?;

        let record = self
            .queue
            .fetch(&self.job_id)
            .await?
            .ok_or_else(|| {
                OrchestrationError::NotFound(format!("{} job is not found", self.job_id))
            })?;
        Ok(record.status)
    }
}
