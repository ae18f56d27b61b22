use crate::db::AnnotationStore;
use crate::error::OrchestrationError;
use crate::models::annotation::{LabeledData, Shape};

/// How many buffered shapes trigger an intermediate flush. Bounds both
/// memory use and the size of a single bulk write.
pub const FLUSH_INTERVAL: usize = 100;

/// Buffers detector output and flushes it to storage in bounded batches.
///
/// Flushes happen strictly in append order. A failed flush propagates as a
/// job failure; batches already committed are not rolled back.
pub struct ResultAccumulator {
    task_id: i64,
    data: LabeledData,
}

impl ResultAccumulator {
    pub fn new(task_id: i64) -> Self {
        Self {
            task_id,
            data: LabeledData::empty(),
        }
    }

    pub fn append_shape(&mut self, shape: Shape) {
        self.data.shapes.push(shape);
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn len(&self) -> usize {
        self.data.shapes.len()
    }

    /// Write the buffered batch and reset. No-op (returns 0) when empty.
    pub async fn flush(
        &mut self,
        store: &dyn AnnotationStore,
    ) -> Result<usize, OrchestrationError> {
        if self.is_empty() {
            return Ok(0);
        }
        let flushed = self.data.shapes.len();
        store
            .bulk_create_annotations(self.task_id, &self.data)
            .await?;
        self.data = LabeledData::empty();
        Ok(flushed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::StorageError;
    use crate::models::annotation::{AnnotationRow, FeatureRow};
    use crate::models::projection::ProjectionRow;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Captures flushed batch sizes; every other operation is unreachable
    /// from the accumulator.
    #[derive(Default)]
    struct RecordingStore {
        batches: Mutex<Vec<Vec<Shape>>>,
    }

    #[async_trait]
    impl AnnotationStore for RecordingStore {
        async fn bulk_create_annotations(
            &self,
            _task_id: i64,
            data: &LabeledData,
        ) -> Result<(), StorageError> {
            self.batches.lock().unwrap().push(data.shapes.clone());
            Ok(())
        }

        async fn clear_auto_annotations(&self, _task_id: i64) -> Result<(), StorageError> {
            unreachable!()
        }
        async fn annotation(&self, _id: i64) -> Result<Option<AnnotationRow>, StorageError> {
            unreachable!()
        }
        async fn set_feature(&self, _id: i64, _f: &[u8]) -> Result<(), StorageError> {
            unreachable!()
        }
        async fn feature_count(&self, _label_id: i64) -> Result<usize, StorageError> {
            unreachable!()
        }
        async fn features(&self, _label_id: i64) -> Result<Vec<FeatureRow>, StorageError> {
            unreachable!()
        }
        async fn task_dimension(&self, _task_id: i64) -> Result<Option<String>, StorageError> {
            unreachable!()
        }
        async fn frame_count(&self, _task_id: i64) -> Result<i64, StorageError> {
            unreachable!()
        }
        async fn frame_image_path(
            &self,
            _task_id: i64,
            _frame: i64,
        ) -> Result<Option<String>, StorageError> {
            unreachable!()
        }
        async fn projection(&self, _label_id: i64) -> Result<Option<ProjectionRow>, StorageError> {
            unreachable!()
        }
        async fn insert_projection(&self, _row: &ProjectionRow) -> Result<(), StorageError> {
            unreachable!()
        }
        async fn delete_projection(&self, _label_id: i64) -> Result<(), StorageError> {
            unreachable!()
        }
    }

    fn shape(frame: i64) -> Shape {
        Shape::auto_rectangle(frame, 1, [0.0, 0.0, 10.0, 10.0])
    }

    #[tokio::test]
    async fn empty_flush_is_a_no_op() {
        let store = RecordingStore::default();
        let mut acc = ResultAccumulator::new(1);
        assert_eq!(acc.flush(&store).await.unwrap(), 0);
        assert!(store.batches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn flush_writes_once_and_resets() {
        let store = RecordingStore::default();
        let mut acc = ResultAccumulator::new(1);
        for frame in 0..3 {
            acc.append_shape(shape(frame));
        }
        assert_eq!(acc.flush(&store).await.unwrap(), 3);
        assert!(acc.is_empty());
        assert_eq!(acc.flush(&store).await.unwrap(), 0);

        let batches = store.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 3);
    }

    #[tokio::test]
    async fn batches_preserve_append_order() {
        let store = RecordingStore::default();
        let mut acc = ResultAccumulator::new(1);
        for frame in 0..250 {
            acc.append_shape(shape(frame));
            if acc.len() >= FLUSH_INTERVAL {
                acc.flush(&store).await.unwrap();
            }
        }
        acc.flush(&store).await.unwrap();

        let batches = store.batches.lock().unwrap();
        let sizes: Vec<usize> = batches.iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![100, 100, 50]);

        let frames: Vec<i64> = batches.iter().flatten().map(|s| s.frame).collect();
        let expected: Vec<i64> = (0..250).collect();
        assert_eq!(frames, expected);
    }
}
