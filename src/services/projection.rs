use chrono::{Duration, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::db::AnnotationStore;
use crate::error::OrchestrationError;
use crate::models::job::{JobKind, JobRecord, JobState};
use crate::models::projection::{floats_to_bytes, ProjectionPayload, ProjectionRow};
use crate::services::cleanup::process_failed_job;
use crate::services::dedup;
use crate::services::queue::WorkQueue;

/// Minimum number of encoded feature rows before a projection is computed.
pub const MIN_FEATURES: usize = 20;

/// Pixel size of the rendered scatter artifact.
const ARTIFACT_SIZE: u32 = 512;

/// Outcome of a projection read.
#[derive(Debug, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ProjectionOutcome {
    /// A fresh cached result.
    Ready(ProjectionPayload),
    /// A computation job is queued or running; poll again.
    Pending,
}

/// Serve the cached projection for `label_id`, or arrange its computation.
///
/// Expiry is checked lazily here; there is no background eviction. An
/// expired row is deleted and recomputation is triggered. A failed prior
/// job is reclaimed and its message surfaced as a `Computation` error.
pub async fn get_or_compute(
    queue: &dyn WorkQueue,
    store: &dyn AnnotationStore,
    label_id: i64,
    ttl_secs: u64,
) -> Result<ProjectionOutcome, OrchestrationError> {
    let got = store.feature_count(label_id).await?;
    if got < MIN_FEATURES {
        return Err(OrchestrationError::InsufficientData {
            needed: MIN_FEATURES,
            got,
        });
    }

    if let Some(row) = store.projection(label_id).await? {
        let expires_at = row.created_at + Duration::seconds(ttl_secs as i64);
        if Utc::now() < expires_at {
            // The result has been consumed; the finished job record is not
            // retained past this point.
            let job_id = JobRecord::projection_id(label_id);
            if let Some(job) = queue.fetch(&job_id).await? {
                if job.status.is_terminal() {
                    queue.delete(&job_id).await?;
                }
            }
            metrics::counter!("projection_cache_hits").increment(1);
            return Ok(ProjectionOutcome::Ready(row.into_payload()));
        }
        // Stale: drop the row and the rendered artifact, then recompute.
        let artifact = PathBuf::from(&row.artifact_path);
        if artifact.exists() {
            let _ = std::fs::remove_file(&artifact);
        }
        store.delete_projection(label_id).await?;
        metrics::counter!("projection_cache_evictions").increment(1);
    }

    let job_id = JobRecord::projection_id(label_id);
    if let Some(job) = queue.fetch(&job_id).await? {
        return match job.status {
            JobState::Failed => {
                let message = process_failed_job(queue, &job_id).await?;
                Err(OrchestrationError::Computation(message))
            }
            JobState::Finished => {
                // Result already consumed or expired above; release the
                // record and enqueue a fresh computation.
                queue.delete(&job_id).await?;
                enqueue_projection(queue, label_id).await?;
                Ok(ProjectionOutcome::Pending)
            }
            _ => Ok(ProjectionOutcome::Pending),
        };
    }

    enqueue_projection(queue, label_id).await?;
    Ok(ProjectionOutcome::Pending)
}

async fn enqueue_projection(
    queue: &dyn WorkQueue,
    label_id: i64,
) -> Result<(), OrchestrationError> {
    metrics::counter!("projection_cache_misses").increment(1);
    dedup::submit_with_id(
        queue,
        JobRecord::projection_id(label_id),
        label_id,
        JobKind::Projection,
        serde_json::json!({}),
    )
    .await?;
    Ok(())
}

/// Worker-side computation: reduce the label's features to 2-D, render the
/// scatter artifact, and insert the cached row.
pub async fn compute_projection(
    store: &dyn AnnotationStore,
    label_id: i64,
    data_root: &Path,
) -> Result<(), OrchestrationError> {
    let rows = store.features(label_id).await?;
    if rows.len() < MIN_FEATURES {
        return Err(OrchestrationError::InsufficientData {
            needed: MIN_FEATURES,
            got: rows.len(),
        });
    }

    let features: Vec<Vec<f32>> = rows
        .iter()
        .map(|r| crate::models::projection::bytes_to_floats(&r.feature))
        .collect();
    let annotations: Vec<[i64; 3]> = rows
        .iter()
        .map(|r| [r.annotation_id, r.frame, r.job_id.unwrap_or(0)])
        .collect();

    let (mut tx, mut ty) = reduce_2d(&features)
        .ok_or_else(|| OrchestrationError::Computation("feature vectors are empty".into()))?;
    scale_to_unit_range(&mut tx);
    scale_to_unit_range(&mut ty);

    let artifact_path = data_root.join(format!("label-{label_id}.png"));
    if artifact_path.exists() {
        std::fs::remove_file(&artifact_path)
            .map_err(|e| OrchestrationError::Computation(e.to_string()))?;
    }
    render_scatter(&tx, &ty, &artifact_path)?;

    let row = ProjectionRow {
        label_id,
        tx: floats_to_bytes(&tx),
        ty: floats_to_bytes(&ty),
        annotations: serde_json::to_value(annotations)
            .map_err(|e| OrchestrationError::Computation(e.to_string()))?,
        artifact_path: artifact_path.display().to_string(),
        created_at: Utc::now(),
    };
    store.insert_projection(&row).await?;
    Ok(())
}

/// Map each value into the 0..1 range. A constant axis collapses to 0.
pub fn scale_to_unit_range(values: &mut [f32]) {
    let Some((min, max)) = values
        .iter()
        .fold(None, |acc: Option<(f32, f32)>, &v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
    else {
        return;
    };
    let range = max - min;
    for v in values.iter_mut() {
        *v = if range > 0.0 { (*v - min) / range } else { 0.0 };
    }
}

/// Project feature vectors onto their two principal directions.
///
/// Power iteration over the centered data; the reduction only needs to be
/// stable and deterministic, not optimal. Returns `None` for empty input
/// or zero-dimensional features.
pub fn reduce_2d(features: &[Vec<f32>]) -> Option<(Vec<f32>, Vec<f32>)> {
    let n = features.len();
    let dim = features.first()?.len();
    if dim == 0 {
        return None;
    }

    // Center each column.
    let mut mean = vec![0.0f32; dim];
    for row in features {
        for (m, v) in mean.iter_mut().zip(row) {
            *m += v / n as f32;
        }
    }
    let centered: Vec<Vec<f32>> = features
        .iter()
        .map(|row| row.iter().zip(&mean).map(|(v, m)| v - m).collect())
        .collect();

    let first = principal_direction(&centered, None);
    let second = principal_direction(&centered, Some(&first));

    let tx = centered.iter().map(|row| dot(row, &first)).collect();
    let ty = centered.iter().map(|row| dot(row, &second)).collect();
    Some((tx, ty))
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// One dominant eigenvector of the covariance, optionally deflated against
/// an already-found direction. Deterministic start vector.
fn principal_direction(centered: &[Vec<f32>], deflate: Option<&[f32]>) -> Vec<f32> {
    let dim = centered[0].len();
    let mut v: Vec<f32> = (0..dim)
        .map(|i| if i % 2 == 0 { 1.0 } else { 0.5 })
        .collect();
    normalize(&mut v);

    for _ in 0..50 {
        // w = Cv without materializing the covariance matrix.
        let mut w = vec![0.0f32; dim];
        for row in centered {
            let scale = dot(row, &v);
            for (wi, ri) in w.iter_mut().zip(row) {
                *wi += scale * ri;
            }
        }
        if let Some(prev) = deflate {
            let overlap = dot(&w, prev);
            for (wi, pi) in w.iter_mut().zip(prev) {
                *wi -= overlap * pi;
            }
        }
        if !normalize(&mut w) {
            break;
        }
        v = w;
    }
    if let Some(prev) = deflate {
        let overlap = dot(&v, prev);
        for (vi, pi) in v.iter_mut().zip(prev) {
            *vi -= overlap * pi;
        }
        normalize(&mut v);
    }
    v
}

/// Scale to unit length; false when the vector is (numerically) zero.
fn normalize(v: &mut [f32]) -> bool {
    let norm = dot(v, v).sqrt();
    if norm <= f32::EPSILON {
        return false;
    }
    for x in v.iter_mut() {
        *x /= norm;
    }
    true
}

/// Render the scatter plot artifact used by the visualization UI.
fn render_scatter(tx: &[f32], ty: &[f32], path: &Path) -> Result<(), OrchestrationError> {
    let mut img =
        image::RgbImage::from_pixel(ARTIFACT_SIZE, ARTIFACT_SIZE, image::Rgb([255, 255, 255]));
    let margin = 8i64;
    let span = (ARTIFACT_SIZE as i64 - 2 * margin - 1) as f32;

    for (&x, &y) in tx.iter().zip(ty) {
        let cx = margin + (x * span) as i64;
        // Image rows grow downward; plot y upward.
        let cy = margin + ((1.0 - y) * span) as i64;
        for dx in -1..=1i64 {
            for dy in -1..=1i64 {
                let (px, py) = (cx + dx, cy + dy);
                if (0..ARTIFACT_SIZE as i64).contains(&px)
                    && (0..ARTIFACT_SIZE as i64).contains(&py)
                {
                    img.put_pixel(px as u32, py as u32, image::Rgb([30, 90, 200]));
                }
            }
        }
    }

    img.save(path)
        .map_err(|e| OrchestrationError::Computation(format!("failed to render artifact: {e}")))
}
