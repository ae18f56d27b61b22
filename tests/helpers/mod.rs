//! In-memory collaborators for integration tests: the work queue and the
//! annotation store behind the same traits the Redis/Postgres
//! implementations use, plus a scriptable detector.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use annotation_compute::db::{AnnotationStore, StorageError};
use annotation_compute::models::annotation::{AnnotationRow, FeatureRow, LabeledData};
use annotation_compute::models::job::{JobRecord, JobState};
use annotation_compute::models::projection::ProjectionRow;
use annotation_compute::services::detector::{Detector, DetectorError};
use annotation_compute::services::queue::{QueueError, WorkQueue};

#[derive(Default)]
pub struct MemoryWorkQueue {
    jobs: Mutex<HashMap<String, JobRecord>>,
    ready: Mutex<VecDeque<String>>,
}

impl MemoryWorkQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Out-of-band status write, standing in for administrative actions.
    pub fn set_status(&self, id: &str, status: JobState) {
        if let Some(record) = self.jobs.lock().unwrap().get_mut(id) {
            record.status = status;
        }
    }

    pub fn job_count(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }
}

#[async_trait]
impl WorkQueue for MemoryWorkQueue {
    async fn enqueue(&self, record: &JobRecord) -> Result<(), QueueError> {
        self.jobs
            .lock()
            .unwrap()
            .insert(record.id.clone(), record.clone());
        if record.status != JobState::Scheduled {
            self.ready.lock().unwrap().push_back(record.id.clone());
        }
        Ok(())
    }

    async fn fetch(&self, id: &str) -> Result<Option<JobRecord>, QueueError> {
        Ok(self.jobs.lock().unwrap().get(id).cloned())
    }

    async fn list_ids(&self, state: JobState) -> Result<Vec<String>, QueueError> {
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.status == state)
            .map(|r| r.id.clone())
            .collect())
    }

    async fn save(&self, record: &JobRecord) -> Result<(), QueueError> {
        self.jobs
            .lock()
            .unwrap()
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn set_progress(&self, id: &str, progress: u8) -> Result<(), QueueError> {
        if let Some(record) = self.jobs.lock().unwrap().get_mut(id) {
            record.progress = progress;
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), QueueError> {
        self.jobs.lock().unwrap().remove(id);
        self.ready.lock().unwrap().retain(|queued| queued != id);
        Ok(())
    }

    async fn pop_ready(&self) -> Result<Option<String>, QueueError> {
        Ok(self.ready.lock().unwrap().pop_front())
    }

    async fn push_ready(&self, id: &str) -> Result<(), QueueError> {
        self.ready.lock().unwrap().push_back(id.to_string());
        Ok(())
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryAnnotationStore {
    pub annotations: Mutex<HashMap<i64, AnnotationRow>>,
    /// Every bulk write, in arrival order.
    pub batches: Mutex<Vec<LabeledData>>,
    /// (task_id, frame) -> image path.
    pub frames: Mutex<HashMap<(i64, i64), String>>,
    /// task_id -> (dimension, frame_count).
    pub tasks: Mutex<HashMap<i64, (String, i64)>>,
    pub projections: Mutex<HashMap<i64, ProjectionRow>>,
    pub set_feature_calls: AtomicUsize,
}

impl MemoryAnnotationStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_task(&self, task_id: i64, dimension: &str, frame_count: i64) {
        self.tasks
            .lock()
            .unwrap()
            .insert(task_id, (dimension.to_string(), frame_count));
    }

    pub fn add_frame(&self, task_id: i64, frame: i64, image_path: &str) {
        self.frames
            .lock()
            .unwrap()
            .insert((task_id, frame), image_path.to_string());
    }

    pub fn add_annotation(&self, row: AnnotationRow) {
        self.annotations.lock().unwrap().insert(row.id, row);
    }

    /// Backdate a cached projection, as if it were created `secs` ago.
    pub fn age_projection(&self, label_id: i64, secs: i64) {
        if let Some(row) = self.projections.lock().unwrap().get_mut(&label_id) {
            row.created_at -= chrono::Duration::seconds(secs);
        }
    }

    pub fn flushed_batch_sizes(&self) -> Vec<usize> {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .map(|b| b.shapes.len())
            .collect()
    }
}

#[async_trait]
impl AnnotationStore for MemoryAnnotationStore {
    async fn bulk_create_annotations(
        &self,
        _task_id: i64,
        data: &LabeledData,
    ) -> Result<(), StorageError> {
        self.batches.lock().unwrap().push(data.clone());
        Ok(())
    }

    async fn clear_auto_annotations(&self, task_id: i64) -> Result<(), StorageError> {
        self.annotations
            .lock()
            .unwrap()
            .retain(|_, row| row.task_id != task_id);
        Ok(())
    }

    async fn annotation(&self, id: i64) -> Result<Option<AnnotationRow>, StorageError> {
        Ok(self.annotations.lock().unwrap().get(&id).cloned())
    }

    async fn set_feature(&self, annotation_id: i64, feature: &[u8]) -> Result<(), StorageError> {
        self.set_feature_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(row) = self.annotations.lock().unwrap().get_mut(&annotation_id) {
            row.feature = Some(feature.to_vec());
        }
        Ok(())
    }

    async fn feature_count(&self, label_id: i64) -> Result<usize, StorageError> {
        Ok(self
            .annotations
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.label_id == label_id && r.feature.is_some())
            .count())
    }

    async fn features(&self, label_id: i64) -> Result<Vec<FeatureRow>, StorageError> {
        let mut rows: Vec<FeatureRow> = self
            .annotations
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.label_id == label_id && r.feature.is_some())
            .map(|r| FeatureRow {
                annotation_id: r.id,
                frame: r.frame,
                job_id: None,
                feature: r.feature.clone().unwrap_or_default(),
            })
            .collect();
        rows.sort_by_key(|r| r.annotation_id);
        Ok(rows)
    }

    async fn task_dimension(&self, task_id: i64) -> Result<Option<String>, StorageError> {
        Ok(self
            .tasks
            .lock()
            .unwrap()
            .get(&task_id)
            .map(|(dim, _)| dim.clone()))
    }

    async fn frame_count(&self, task_id: i64) -> Result<i64, StorageError> {
        self.tasks
            .lock()
            .unwrap()
            .get(&task_id)
            .map(|(_, n)| *n)
            .ok_or_else(|| StorageError::Backend(format!("task {task_id} not found")))
    }

    async fn frame_image_path(
        &self,
        task_id: i64,
        frame: i64,
    ) -> Result<Option<String>, StorageError> {
        Ok(self.frames.lock().unwrap().get(&(task_id, frame)).cloned())
    }

    async fn projection(&self, label_id: i64) -> Result<Option<ProjectionRow>, StorageError> {
        Ok(self.projections.lock().unwrap().get(&label_id).cloned())
    }

    async fn insert_projection(&self, row: &ProjectionRow) -> Result<(), StorageError> {
        self.projections
            .lock()
            .unwrap()
            .insert(row.label_id, row.clone());
        Ok(())
    }

    async fn delete_projection(&self, label_id: i64) -> Result<(), StorageError> {
        self.projections.lock().unwrap().remove(&label_id);
        Ok(())
    }
}

/// Detector returning one fixed box per requested label, with an optional
/// action fired on a chosen call (used to exercise cooperative cancel).
pub struct StubDetector {
    pub calls: AtomicUsize,
    trigger: Option<(usize, Box<dyn Fn() + Send + Sync>)>,
}

impl StubDetector {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            trigger: None,
        }
    }

    /// Run `action` during the `on_call`-th detect invocation (1-based).
    pub fn with_trigger(on_call: usize, action: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            trigger: Some((on_call, Box::new(action))),
        }
    }
}

#[async_trait]
impl Detector for StubDetector {
    async fn detect(
        &self,
        _image_bytes: &[u8],
        labels: &[String],
    ) -> Result<HashMap<String, Vec<[f64; 4]>>, DetectorError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((on_call, action)) = &self.trigger {
            if call == *on_call {
                action();
            }
        }
        Ok(labels
            .iter()
            .map(|name| (name.clone(), vec![[1.0, 2.0, 30.0, 40.0]]))
            .collect())
    }
}

/// A small PNG written to `dir`, used as a frame image.
pub fn write_sample_png(dir: &std::path::Path, name: &str) -> String {
    let img = image::RgbImage::from_fn(64, 64, |x, y| {
        image::Rgb([(x * 3) as u8, (y * 3) as u8, 64])
    });
    let path = dir.join(name);
    img.save(&path).unwrap();
    path.display().to_string()
}

/// Little-endian f32 feature bytes for seeding the store.
pub fn feature_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}
