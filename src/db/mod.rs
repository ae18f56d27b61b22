use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

use crate::models::annotation::{AnnotationRow, FeatureRow, LabeledData};
use crate::models::projection::ProjectionRow;

pub mod store;

pub use store::PgAnnotationStore;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0}")]
    Backend(String),
}

/// Domain-storage operations this layer performs. The relational model
/// itself (tasks, labels, annotations) belongs to an external collaborator;
/// these are the only writes and reads the orchestration core needs.
#[async_trait]
pub trait AnnotationStore: Send + Sync {
    /// One bulk write of a versioned annotation batch.
    async fn bulk_create_annotations(
        &self,
        task_id: i64,
        data: &LabeledData,
    ) -> Result<(), StorageError>;

    /// Drop previously auto-generated annotations for a task.
    async fn clear_auto_annotations(&self, task_id: i64) -> Result<(), StorageError>;

    async fn annotation(&self, id: i64) -> Result<Option<AnnotationRow>, StorageError>;

    /// Attach an encoded feature payload to an annotation.
    async fn set_feature(&self, annotation_id: i64, feature: &[u8]) -> Result<(), StorageError>;

    /// Number of annotations under `label_id` that carry a feature.
    async fn feature_count(&self, label_id: i64) -> Result<usize, StorageError>;

    /// Feature rows contributing to a projection of `label_id`.
    async fn features(&self, label_id: i64) -> Result<Vec<FeatureRow>, StorageError>;

    /// "2d" or "3d"; feature encoding skips 3-D tasks.
    async fn task_dimension(&self, task_id: i64) -> Result<Option<String>, StorageError>;

    async fn frame_count(&self, task_id: i64) -> Result<i64, StorageError>;

    async fn frame_image_path(
        &self,
        task_id: i64,
        frame: i64,
    ) -> Result<Option<String>, StorageError>;

    async fn projection(&self, label_id: i64) -> Result<Option<ProjectionRow>, StorageError>;

    async fn insert_projection(&self, row: &ProjectionRow) -> Result<(), StorageError>;

    async fn delete_projection(&self, label_id: i64) -> Result<(), StorageError>;
}

/// Initialize PostgreSQL connection pool
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .min_connections(5)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}
