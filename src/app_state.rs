use sqlx::PgPool;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::AnnotationStore;
use crate::services::queue::WorkQueue;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub queue: Arc<dyn WorkQueue>,
    pub store: Arc<dyn AnnotationStore>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(
        db: PgPool,
        queue: Arc<dyn WorkQueue>,
        store: Arc<dyn AnnotationStore>,
        config: AppConfig,
    ) -> Self {
        Self {
            db,
            queue,
            store,
            config: Arc::new(config),
        }
    }
}
