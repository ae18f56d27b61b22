use annotation_compute::{
    config::AppConfig,
    db::{self, PgAnnotationStore},
    services::{
        detector::HttpDetector,
        executor::{self, ExecutionContext},
        queue::{self, RedisWorkQueue},
    },
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting annotation compute worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");
    let poll_interval = Duration::from_millis(config.worker_poll_interval_ms);

    // Initialize database
    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Initialize services
    tracing::info!("Initializing services");
    let queue = RedisWorkQueue::new(&config.redis_url).expect("Failed to initialize work queue");
    let store = PgAnnotationStore::new(db_pool);
    let detector = HttpDetector::new(&config.detector_url);

    std::fs::create_dir_all(&config.data_root).expect("Failed to create data root");

    let ctx = ExecutionContext {
        queue: Arc::new(queue),
        store: Arc::new(store),
        detector: Arc::new(detector),
        // The embedding model itself is loaded lazily by the first
        // feature-encode job and reused for the process lifetime.
        model_path: PathBuf::from(&config.model_path),
        data_root: PathBuf::from(&config.data_root),
    };

    tracing::info!("Worker ready, starting job processing loop");

    // Main processing loop
    loop {
        match process_next_job(&ctx).await {
            Ok(true) => {
                tracing::debug!("Job processed, checking for next job");
            }
            Ok(false) => {
                tracing::trace!("No jobs available, sleeping");
                sleep(poll_interval).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Error processing job, will retry");
                sleep(poll_interval).await;
            }
        }
    }
}

/// Claim and execute the next ready job.
/// Returns Ok(true) if a job was processed, Ok(false) if no job available.
async fn process_next_job(
    ctx: &ExecutionContext,
) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
    let job = match queue::next_ready_job(ctx.queue.as_ref()).await? {
        Some(record) => record,
        None => return Ok(false),
    };

    tracing::info!(
        job_id = %job.id,
        kind = %job.kind,
        resource_id = job.target_resource_id,
        "Processing job"
    );

    let start = std::time::Instant::now();
    let outcome = executor::execute(ctx, &job).await;
    metrics::histogram!("annotation_job_seconds", "kind" => job.kind.to_string())
        .record(start.elapsed().as_secs_f64());

    match &outcome {
        Ok(()) => {
            tracing::info!(
                job_id = %job.id,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Job completed"
            );
        }
        Err(e) => {
            tracing::error!(job_id = %job.id, error = %e, "Job processing failed");
        }
    }

    executor::finalize(ctx.queue.as_ref(), &job.id, outcome).await?;
    Ok(true)
}
