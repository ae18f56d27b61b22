use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use strum::{Display, EnumString};
use uuid::Uuid;

/// What a job computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobKind {
    /// Run the remote detector over every frame of a task.
    Inference,
    /// Encode one annotated region into a feature vector.
    FeatureEncode,
    /// Reduce a label's feature vectors to 2-D coordinates.
    Projection,
    /// Prerequisite file fetch another job depends on.
    Download,
}

/// Queue-side status of a job. Mirrors the underlying queue's registries;
/// the orchestration layer only triggers transitions, it never invents them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobState {
    Queued,
    Started,
    Finished,
    Failed,
    Deferred,
    Scheduled,
}

impl JobState {
    /// States a job may still leave. The dedup guard and the projection
    /// cache both use this single definition.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            JobState::Queued | JobState::Started | JobState::Deferred | JobState::Scheduled
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Finished | JobState::Failed)
    }

    /// Every registry, in a fixed order.
    pub const ALL: [JobState; 6] = [
        JobState::Queued,
        JobState::Started,
        JobState::Finished,
        JobState::Failed,
        JobState::Deferred,
        JobState::Scheduled,
    ];

    /// Registries the dedup guard scans: everything but failed, which is
    /// terminal and never blocks a new submission.
    pub const NON_FAILED: [JobState; 5] = [
        JobState::Queued,
        JobState::Started,
        JobState::Finished,
        JobState::Deferred,
        JobState::Scheduled,
    ];
}

/// The orchestration layer's view of one queued unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub kind: JobKind,
    /// Domain entity the job operates on (task, annotation or label id).
    pub target_resource_id: i64,
    pub status: JobState,
    /// 0..=100, monotonic non-decreasing during normal execution.
    pub progress: u8,
    /// Temporary artifact to remove if the job fails.
    pub tmp_file: Option<PathBuf>,
    /// Prerequisite job, e.g. a file download that must finish first.
    pub dependency_id: Option<String>,
    /// Raw failure text, populated only in the failed state.
    pub error: Option<String>,
    /// Kind-specific arguments, deserialized by the executor.
    pub args: serde_json::Value,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// A fresh record with a random id, ready to enqueue.
    pub fn new(kind: JobKind, target_resource_id: i64, args: serde_json::Value) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), kind, target_resource_id, args)
    }

    /// A fresh record with a caller-chosen (deterministic) id.
    pub fn with_id(
        id: String,
        kind: JobKind,
        target_resource_id: i64,
        args: serde_json::Value,
    ) -> Self {
        Self {
            id,
            kind,
            target_resource_id,
            status: JobState::Queued,
            progress: 0,
            tmp_file: None,
            dependency_id: None,
            error: None,
            args,
            enqueued_at: Utc::now(),
            started_at: None,
            ended_at: None,
        }
    }

    /// Deterministic id for a projection job, so a retried read resolves to
    /// the same job instead of enqueuing a duplicate.
    pub fn projection_id(label_id: i64) -> String {
        format!("projection:label-{label_id}")
    }

    /// Deterministic id for a download dependency of `parent_id`.
    pub fn dependency_id_for(parent_id: &str, filename: &str) -> String {
        format!("{parent_id}?action=download_{filename}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_and_terminal_are_disjoint() {
        for state in [
            JobState::Queued,
            JobState::Started,
            JobState::Finished,
            JobState::Failed,
            JobState::Deferred,
            JobState::Scheduled,
        ] {
            assert_ne!(state.is_active(), state.is_terminal(), "{state}");
        }
    }

    #[test]
    fn non_failed_excludes_only_failed() {
        assert!(!JobState::NON_FAILED.contains(&JobState::Failed));
        assert_eq!(JobState::NON_FAILED.len(), 5);
    }

    #[test]
    fn state_serializes_snake_case() {
        let json = serde_json::to_string(&JobState::Deferred).unwrap();
        assert_eq!(json, "\"deferred\"");
        let kind = serde_json::to_string(&JobKind::FeatureEncode).unwrap();
        assert_eq!(kind, "\"feature_encode\"");
    }

    #[test]
    fn projection_id_is_deterministic() {
        assert_eq!(JobRecord::projection_id(42), "projection:label-42");
        assert_eq!(JobRecord::projection_id(42), JobRecord::projection_id(42));
    }

    #[test]
    fn dependency_id_embeds_parent_and_filename() {
        let id = JobRecord::dependency_id_for("abc", "frames.zip");
        assert_eq!(id, "abc?action=download_frames.zip");
    }

    #[test]
    fn new_record_starts_queued_at_zero_progress() {
        let record = JobRecord::new(JobKind::Inference, 7, serde_json::json!({}));
        assert_eq!(record.status, JobState::Queued);
        assert_eq!(record.progress, 0);
        assert!(record.error.is_none());
        assert!(record.started_at.is_none());
    }
}
