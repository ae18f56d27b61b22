use async_trait::async_trait;
use sqlx::{PgPool, Row};

use super::{AnnotationStore, StorageError};
use crate::models::annotation::{AnnotationRow, FeatureRow, LabeledData};
use crate::models::projection::ProjectionRow;

/// Postgres-backed implementation of [`AnnotationStore`].
pub struct PgAnnotationStore {
    pool: PgPool,
}

impl PgAnnotationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn parse_shape_type(raw: &str) -> Result<crate::models::annotation::ShapeType, StorageError> {
    raw.parse()
        .map_err(|_| StorageError::Backend(format!("unknown shape type '{raw}' in storage")))
}

#[async_trait]
impl AnnotationStore for PgAnnotationStore {
    async fn bulk_create_annotations(
        &self,
        task_id: i64,
        data: &LabeledData,
    ) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;
        for shape in &data.shapes {
            let points = serde_json::to_value(&shape.points)
                .map_err(|e| StorageError::Backend(e.to_string()))?;
            sqlx::query(
                r#"
                INSERT INTO labeled_shapes
                    (task_id, label_id, frame, shape_type, points, occluded, z_order, source)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(task_id)
            .bind(shape.label_id)
            .bind(shape.frame)
            .bind(shape.shape_type.to_string())
            .bind(points)
            .bind(shape.occluded)
            .bind(shape.z_order)
            .bind(&shape.source)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn clear_auto_annotations(&self, task_id: i64) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM labeled_shapes WHERE task_id = $1 AND source = 'auto'")
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn annotation(&self, id: i64) -> Result<Option<AnnotationRow>, StorageError> {
        let row = sqlx::query(
            r#"
            SELECT id, task_id, label_id, frame, shape_type, points, feature
            FROM labeled_shapes
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => {
                let shape_type: String = r.try_get("shape_type")?;
                let points: serde_json::Value = r.try_get("points")?;
                let points: Vec<f64> = serde_json::from_value(points)
                    .map_err(|e| StorageError::Backend(e.to_string()))?;
                Ok(Some(AnnotationRow {
                    id: r.try_get("id")?,
                    task_id: r.try_get("task_id")?,
                    label_id: r.try_get("label_id")?,
                    frame: r.try_get("frame")?,
                    shape_type: parse_shape_type(&shape_type)?,
                    points,
                    feature: r.try_get("feature")?,
                }))
            }
            None => Ok(None),
        }
    }

    async fn set_feature(&self, annotation_id: i64, feature: &[u8]) -> Result<(), StorageError> {
        sqlx::query("UPDATE labeled_shapes SET feature = $1 WHERE id = $2")
            .bind(feature)
            .bind(annotation_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn feature_count(&self, label_id: i64) -> Result<usize, StorageError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM labeled_shapes WHERE label_id = $1 AND feature IS NOT NULL",
        )
        .bind(label_id)
        .fetch_one(&self.pool)
        .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n as usize)
    }

    async fn features(&self, label_id: i64) -> Result<Vec<FeatureRow>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT id, frame, job_id, feature
            FROM labeled_shapes
            WHERE label_id = $1 AND feature IS NOT NULL
            ORDER BY id
            "#,
        )
        .bind(label_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| {
                Ok(FeatureRow {
                    annotation_id: r.try_get("id")?,
                    frame: r.try_get("frame")?,
                    job_id: r.try_get("job_id")?,
                    feature: r.try_get("feature")?,
                })
            })
            .collect()
    }

    async fn task_dimension(&self, task_id: i64) -> Result<Option<String>, StorageError> {
        let row = sqlx::query("SELECT dimension FROM tasks WHERE id = $1")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some(r) => Some(r.try_get("dimension")?),
            None => None,
        })
    }

    async fn frame_count(&self, task_id: i64) -> Result<i64, StorageError> {
        let row = sqlx::query("SELECT frame_count FROM tasks WHERE id = $1")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StorageError::Backend(format!("task {task_id} not found")))?;
        Ok(row.try_get("frame_count")?)
    }

    async fn frame_image_path(
        &self,
        task_id: i64,
        frame: i64,
    ) -> Result<Option<String>, StorageError> {
        let row = sqlx::query(
            "SELECT image_path FROM task_frames WHERE task_id = $1 AND frame = $2",
        )
        .bind(task_id)
        .bind(frame)
        .fetch_optional(&self.pool)
        .await?;
        Ok(match row {
            Some(r) => Some(r.try_get("image_path")?),
            None => None,
        })
    }

    async fn projection(&self, label_id: i64) -> Result<Option<ProjectionRow>, StorageError> {
        let row = sqlx::query(
            r#"
            SELECT label_id, tx, ty, annotations, artifact_path, created_at
            FROM projections
            WHERE label_id = $1
            "#,
        )
        .bind(label_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some(r) => Some(ProjectionRow {
                label_id: r.try_get("label_id")?,
                tx: r.try_get("tx")?,
                ty: r.try_get("ty")?,
                annotations: r.try_get("annotations")?,
                artifact_path: r.try_get("artifact_path")?,
                created_at: r.try_get("created_at")?,
            }),
            None => None,
        })
    }

    async fn insert_projection(&self, row: &ProjectionRow) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO projections (label_id, tx, ty, annotations, artifact_path, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (label_id) DO UPDATE
                SET tx = EXCLUDED.tx,
                    ty = EXCLUDED.ty,
                    annotations = EXCLUDED.annotations,
                    artifact_path = EXCLUDED.artifact_path,
                    created_at = EXCLUDED.created_at
            "#,
        )
        .bind(row.label_id)
        .bind(&row.tx)
        .bind(&row.ty)
        .bind(&row.annotations)
        .bind(&row.artifact_path)
        .bind(row.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_projection(&self, label_id: i64) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM projections WHERE label_id = $1")
            .bind(label_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
