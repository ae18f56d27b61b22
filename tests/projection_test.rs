//! Projection cache behavior: the insufficient-data gate, lazy TTL expiry,
//! deterministic job identity, and failure surfacing.

mod helpers;

use std::path::PathBuf;
use std::sync::Arc;

use annotation_compute::error::OrchestrationError;
use annotation_compute::models::annotation::{AnnotationRow, ShapeType};
use annotation_compute::models::job::{JobKind, JobRecord, JobState};
use annotation_compute::services::executor::{self, ExecutionContext};
use annotation_compute::services::projection::{get_or_compute, ProjectionOutcome, MIN_FEATURES};
use annotation_compute::services::queue::{self, WorkQueue};

use helpers::{feature_bytes, MemoryAnnotationStore, MemoryWorkQueue, StubDetector};

const LABEL: i64 = 42;
const TTL: u64 = 3600;

/// Populate `count` encoded annotations for [`LABEL`], each with a distinct
/// feature vector so the reduction has real spread to work with.
fn seed_features(store: &MemoryAnnotationStore, count: usize) {
    for i in 0..count {
        let v = i as f32;
        store.add_annotation(AnnotationRow {
            id: 1000 + i as i64,
            task_id: 1,
            label_id: LABEL,
            frame: i as i64,
            shape_type: ShapeType::Rectangle,
            points: vec![0.0, 0.0, 10.0, 10.0],
            feature: Some(feature_bytes(&[v, v * 0.5, 3.0 - v, (v * 7.0).sin()])),
        });
    }
}

fn context(
    queue: Arc<MemoryWorkQueue>,
    store: Arc<MemoryAnnotationStore>,
    dir: &std::path::Path,
) -> ExecutionContext {
    let model_path = dir.join("model.bin");
    std::fs::write(&model_path, b"weights").unwrap();
    ExecutionContext {
        queue,
        store,
        detector: Arc::new(StubDetector::new()),
        model_path,
        data_root: dir.to_path_buf(),
    }
}

/// Drive the single queued projection job the way the worker binary would.
async fn run_pending_job(ctx: &ExecutionContext) {
    let claimed = queue::next_ready_job(ctx.queue.as_ref())
        .await
        .unwrap()
        .expect("a projection job should be dispatchable");
    assert_eq!(claimed.kind, JobKind::Projection);
    let outcome = executor::execute(ctx, &claimed).await;
    executor::finalize(ctx.queue.as_ref(), &claimed.id, outcome)
        .await
        .unwrap();
}

#[tokio::test]
async fn too_few_features_is_rejected_without_enqueueing() {
    let queue = MemoryWorkQueue::new();
    let store = MemoryAnnotationStore::new();
    seed_features(&store, MIN_FEATURES - 1);

    let result = get_or_compute(queue.as_ref(), store.as_ref(), LABEL, TTL).await;
    match result {
        Err(OrchestrationError::InsufficientData { needed, got }) => {
            assert_eq!(needed, MIN_FEATURES);
            assert_eq!(got, MIN_FEATURES - 1);
        }
        other => panic!("expected InsufficientData, got {other:?}"),
    }
    assert_eq!(queue.job_count(), 0);
}

#[tokio::test]
async fn first_read_enqueues_exactly_one_deterministic_job() {
    let queue = MemoryWorkQueue::new();
    let store = MemoryAnnotationStore::new();
    seed_features(&store, MIN_FEATURES);

    let outcome = get_or_compute(queue.as_ref(), store.as_ref(), LABEL, TTL)
        .await
        .unwrap();
    assert!(matches!(outcome, ProjectionOutcome::Pending));

    let job_id = JobRecord::projection_id(LABEL);
    let job = queue.fetch(&job_id).await.unwrap().expect("job enqueued");
    assert_eq!(job.kind, JobKind::Projection);
    assert_eq!(job.target_resource_id, LABEL);

    // Polling again while the job is active does not enqueue another.
    let outcome = get_or_compute(queue.as_ref(), store.as_ref(), LABEL, TTL)
        .await
        .unwrap();
    assert!(matches!(outcome, ProjectionOutcome::Pending));
    assert_eq!(queue.job_count(), 1);
}

#[tokio::test]
async fn computed_projection_is_served_and_its_job_released() {
    let dir = tempfile::tempdir().unwrap();
    let queue = MemoryWorkQueue::new();
    let store = MemoryAnnotationStore::new();
    seed_features(&store, 25);

    let outcome = get_or_compute(queue.as_ref(), store.as_ref(), LABEL, TTL)
        .await
        .unwrap();
    assert!(matches!(outcome, ProjectionOutcome::Pending));

    let ctx = context(queue.clone(), store.clone(), dir.path());
    run_pending_job(&ctx).await;

    let outcome = get_or_compute(queue.as_ref(), store.as_ref(), LABEL, TTL)
        .await
        .unwrap();
    let payload = match outcome {
        ProjectionOutcome::Ready(payload) => payload,
        ProjectionOutcome::Pending => panic!("expected a cached result"),
    };

    assert_eq!(payload.label_id, LABEL);
    assert_eq!(payload.tx.len(), 25);
    assert_eq!(payload.ty.len(), 25);
    for &v in payload.tx.iter().chain(payload.ty.iter()) {
        assert!((0.0..=1.0).contains(&v), "coordinate {v} out of range");
    }
    let annotations = payload.annotations.as_array().unwrap();
    assert_eq!(annotations.len(), 25);
    assert!(PathBuf::from(&payload.artifact_path).exists());

    // The finished job record is released once the result is consumed.
    assert_eq!(queue.job_count(), 0);
}

#[tokio::test]
async fn expired_projection_is_evicted_and_recomputed() {
    let dir = tempfile::tempdir().unwrap();
    let queue = MemoryWorkQueue::new();
    let store = MemoryAnnotationStore::new();
    seed_features(&store, MIN_FEATURES);

    get_or_compute(queue.as_ref(), store.as_ref(), LABEL, TTL)
        .await
        .unwrap();
    let ctx = context(queue.clone(), store.clone(), dir.path());
    run_pending_job(&ctx).await;

    // Just inside the window: still served from cache.
    store.age_projection(LABEL, TTL as i64 - 60);
    let outcome = get_or_compute(queue.as_ref(), store.as_ref(), LABEL, TTL)
        .await
        .unwrap();
    assert!(matches!(outcome, ProjectionOutcome::Ready(_)));
    let artifact = PathBuf::from(
        &store
            .projections
            .lock()
            .unwrap()
            .get(&LABEL)
            .unwrap()
            .artifact_path
            .clone(),
    );
    assert!(artifact.exists());

    // Past the window: row and artifact go, a fresh job is queued.
    store.age_projection(LABEL, 120);
    let outcome = get_or_compute(queue.as_ref(), store.as_ref(), LABEL, TTL)
        .await
        .unwrap();
    assert!(matches!(outcome, ProjectionOutcome::Pending));
    assert!(!artifact.exists());
    assert!(store.projections.lock().unwrap().get(&LABEL).is_none());
    let job = queue
        .fetch(&JobRecord::projection_id(LABEL))
        .await
        .unwrap()
        .expect("recomputation job enqueued");
    assert_eq!(job.status, JobState::Queued);
}

#[tokio::test]
async fn failed_projection_job_surfaces_its_message_and_is_reclaimed() {
    let queue = MemoryWorkQueue::new();
    let store = MemoryAnnotationStore::new();
    seed_features(&store, MIN_FEATURES);

    let mut job = JobRecord::with_id(
        JobRecord::projection_id(LABEL),
        JobKind::Projection,
        LABEL,
        serde_json::json!({}),
    );
    job.status = JobState::Failed;
    job.error = Some("numerics.ReductionError: feature vectors are empty".to_string());
    queue.enqueue(&job).await.unwrap();

    let result = get_or_compute(queue.as_ref(), store.as_ref(), LABEL, TTL).await;
    match result {
        Err(OrchestrationError::Computation(message)) => {
            assert_eq!(message, "feature vectors are empty");
        }
        other => panic!("expected Computation error, got {other:?}"),
    }

    // The failed record was removed; the next read starts a fresh job.
    assert_eq!(queue.job_count(), 0);
    let outcome = get_or_compute(queue.as_ref(), store.as_ref(), LABEL, TTL)
        .await
        .unwrap();
    assert!(matches!(outcome, ProjectionOutcome::Pending));
    assert_eq!(queue.job_count(), 1);
}
