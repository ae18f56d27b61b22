use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::db::AnnotationStore;
use crate::error::OrchestrationError;
use crate::models::annotation::{Shape, ShapeType};
use crate::models::job::{JobKind, JobRecord, JobState};
use crate::services::accumulator::{ResultAccumulator, FLUSH_INTERVAL};
use crate::services::detector::Detector;
use crate::services::engine::EmbeddingModel;
use crate::services::progress::ProgressReporter;
use crate::services::projection;
use crate::services::queue::WorkQueue;

/// Everything a worker slot needs to execute jobs.
pub struct ExecutionContext {
    pub queue: Arc<dyn WorkQueue>,
    pub store: Arc<dyn AnnotationStore>,
    pub detector: Arc<dyn Detector>,
    pub model_path: PathBuf,
    pub data_root: PathBuf,
}

#[derive(Debug, Deserialize)]
struct InferenceArgs {
    /// Label name -> label id, as the detector reports names.
    labels: HashMap<String, i64>,
    /// Drop earlier auto annotations before writing new ones.
    #[serde(default)]
    cleanup: bool,
}

#[derive(Debug, Deserialize)]
struct FeatureEncodeArgs {
    task_id: i64,
}

#[derive(Debug, Deserialize)]
struct DownloadArgs {
    src_path: String,
    dest_path: String,
}

/// Execute one claimed job to completion.
///
/// An `Ok` return means the computation ran through (or exited at a
/// cancellation checkpoint); the caller decides whether the record still
/// transitions to finished. An `Err` carries the raw failure text that the
/// cleanup handler later summarizes.
pub async fn execute(ctx: &ExecutionContext, record: &JobRecord) -> Result<(), OrchestrationError> {
    match record.kind {
        JobKind::Inference => run_inference(ctx, record).await,
        JobKind::FeatureEncode => run_feature_encode(ctx, record).await,
        JobKind::Projection => run_projection(ctx, record).await,
        JobKind::Download => run_download(ctx, record).await,
    }
}

/// Detector sweep over every frame of the target task.
async fn run_inference(
    ctx: &ExecutionContext,
    record: &JobRecord,
) -> Result<(), OrchestrationError> {
    let args: InferenceArgs = serde_json::from_value(record.args.clone())
        .map_err(|e| OrchestrationError::Computation(format!("invalid inference args: {e}")))?;
    let task_id = record.target_resource_id;

    if args.cleanup {
        ctx.store.clear_auto_annotations(task_id).await?;
    }

    let frames = ctx.store.frame_count(task_id).await?;
    let label_names: Vec<String> = args.labels.keys().cloned().collect();
    let mut reporter = ProgressReporter::new(ctx.queue.clone(), record.id.clone());
    let mut results = ResultAccumulator::new(task_id);

    for frame in 0..frames {
        let Some(image_path) = ctx.store.frame_image_path(task_id, frame).await? else {
            // Deleted frames are skipped, not errors.
            continue;
        };
        let image_bytes = tokio::fs::read(&image_path).await.map_err(|e| {
            OrchestrationError::Computation(format!("failed to read frame {frame}: {e}"))
        })?;

        let detections = ctx
            .detector
            .detect(&image_bytes, &label_names)
            .await
            .map_err(|e| OrchestrationError::Computation(e.to_string()))?;

        for (name, label_id) in &args.labels {
            for points in detections.get(name).into_iter().flatten() {
                results.append_shape(Shape::auto_rectangle(frame, *label_id, *points));
                if results.len() >= FLUSH_INTERVAL {
                    results.flush(ctx.store.as_ref()).await?;
                }
            }
        }

        let status = reporter.report((frame + 1) as f64 / frames as f64).await?;
        if status != JobState::Started {
            tracing::info!(job_id = %record.id, frame, %status, "job no longer running, stopping");
            break;
        }
    }

    // Whatever remains below a full batch still gets written.
    results.flush(ctx.store.as_ref()).await?;
    Ok(())
}

/// Encode one annotated region into its feature payload.
async fn run_feature_encode(
    ctx: &ExecutionContext,
    record: &JobRecord,
) -> Result<(), OrchestrationError> {
    let args: FeatureEncodeArgs = serde_json::from_value(record.args.clone())
        .map_err(|e| OrchestrationError::Computation(format!("invalid encode args: {e}")))?;
    let annotation_id = record.target_resource_id;

    if let Some(dimension) = ctx.store.task_dimension(args.task_id).await? {
        if dimension == "3d" {
            return Ok(());
        }
    }

    let Some(annotation) = ctx.store.annotation(annotation_id).await? else {
        return Err(OrchestrationError::NotFound(format!(
            "annotation {annotation_id} not found"
        )));
    };
    // Computed at most once; a re-run must not overwrite.
    if annotation.feature.is_some() {
        return Ok(());
    }

    let window = match annotation.shape_type {
        ShapeType::Rectangle => window_from_points(&annotation.points),
        // Masks carry their bounding box as the trailing four values.
        ShapeType::Mask => window_from_points(
            &annotation.points[annotation.points.len().saturating_sub(4)..],
        ),
        ShapeType::Polygon => return Ok(()),
    };
    let Some(window) = window else {
        return Err(OrchestrationError::Computation(format!(
            "annotation {annotation_id} has no usable bounding box"
        )));
    };

    let Some(image_path) = ctx
        .store
        .frame_image_path(annotation.task_id, annotation.frame)
        .await?
    else {
        return Err(OrchestrationError::Computation(format!(
            "frame {} of task {} has no image",
            annotation.frame, annotation.task_id
        )));
    };
    let image_bytes = tokio::fs::read(&image_path)
        .await
        .map_err(|e| OrchestrationError::Computation(e.to_string()))?;

    let model = EmbeddingModel::get_instance(&ctx.model_path)
        .map_err(|e| OrchestrationError::Computation(e.to_string()))?;
    let feature = model
        .encode_region(&image_bytes, window)
        .map_err(|e| OrchestrationError::Computation(e.to_string()))?;

    ctx.store.set_feature(annotation_id, &feature).await?;
    Ok(())
}

fn window_from_points(points: &[f64]) -> Option<[f64; 4]> {
    match points {
        [x0, y0, x1, y1] => Some([*x0, *y0, *x1, *y1]),
        _ => None,
    }
}

async fn run_projection(
    ctx: &ExecutionContext,
    record: &JobRecord,
) -> Result<(), OrchestrationError> {
    let mut reporter = ProgressReporter::new(ctx.queue.clone(), record.id.clone());
    let status = reporter.report(0.1).await?;
    if status != JobState::Started {
        return Ok(());
    }
    projection::compute_projection(ctx.store.as_ref(), record.target_resource_id, &ctx.data_root)
        .await?;
    reporter.report(1.0).await?;
    Ok(())
}

/// Fetch a prerequisite file to a local destination. The destination is
/// recorded as the job's temp file so a failed run leaves nothing behind.
async fn run_download(
    ctx: &ExecutionContext,
    record: &JobRecord,
) -> Result<(), OrchestrationError> {
    let args: DownloadArgs = serde_json::from_value(record.args.clone())
        .map_err(|e| OrchestrationError::Computation(format!("invalid download args: {e}")))?;

    let mut claimed = record.clone();
    claimed.tmp_file = Some(PathBuf::from(&args.dest_path));
    ctx.queue.save(&claimed).await?;

    if let Some(parent) = Path::new(&args.dest_path).parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| OrchestrationError::Computation(e.to_string()))?;
    }
    tokio::fs::copy(&args.src_path, &args.dest_path)
        .await
        .map_err(|e| {
            OrchestrationError::Computation(format!(
                "failed to fetch {}: {e}",
                args.src_path
            ))
        })?;
    Ok(())
}

/// Terminal bookkeeping after `execute` returns.
///
/// Success only marks the record finished if it is still `started`; an
/// administratively cancelled or deleted job is left alone. Failure stores
/// the raw error text verbatim for the cleanup handler to summarize.
pub async fn finalize(
    queue: &dyn WorkQueue,
    job_id: &str,
    outcome: Result<(), OrchestrationError>,
) -> Result<(), OrchestrationError> {
    let Some(mut record) = queue.fetch(job_id).await? else {
        return Ok(());
    };

    match outcome {
        Ok(()) => {
            if record.status == JobState::Started {
                record.status = JobState::Finished;
                record.progress = 100;
                record.ended_at = Some(chrono::Utc::now());
                queue.set_progress(&record.id, 100).await?;
                queue.save(&record).await?;
                metrics::counter!("annotation_jobs_completed").increment(1);
            }
        }
        Err(e) => {
            record.status = JobState::Failed;
            record.error = Some(e.to_string());
            record.ended_at = Some(chrono::Utc::now());
            queue.save(&record).await?;
            metrics::counter!("annotation_jobs_failed").increment(1);
        }
    }
    Ok(())
}
