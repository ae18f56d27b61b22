mod app_state;
mod config;
mod db;
mod error;
mod models;
mod routes;
mod services;

use axum::{routing::get, routing::post, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use app_state::AppState;
use config::AppConfig;
use db::PgAnnotationStore;
use services::queue::RedisWorkQueue;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing annotation-compute server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    // Register application metrics
    metrics::describe_counter!(
        "annotation_jobs_total",
        "Total compute jobs submitted, by kind"
    );
    metrics::describe_counter!(
        "annotation_jobs_completed",
        "Total compute jobs that finished successfully"
    );
    metrics::describe_counter!("annotation_jobs_failed", "Total compute jobs that failed");
    metrics::describe_histogram!(
        "annotation_job_seconds",
        "Wall-clock time spent executing one compute job"
    );
    metrics::describe_counter!(
        "projection_cache_hits",
        "Projection reads served from the TTL cache"
    );
    metrics::describe_counter!(
        "projection_cache_misses",
        "Projection reads that triggered a computation"
    );
    metrics::describe_counter!(
        "projection_cache_evictions",
        "Expired projection rows evicted on read"
    );

    // Initialize database connection pool
    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Run database migrations
    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    // Initialize Redis-backed work queue
    tracing::info!("Connecting to Redis work queue");
    let queue = RedisWorkQueue::new(&config.redis_url).expect("Failed to initialize work queue");

    let store = PgAnnotationStore::new(db_pool.clone());

    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(db_pool, Arc::new(queue), Arc::new(store), config);

    // Build API routes
    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route(
            "/api/v1/tasks/{task_id}/auto-annotate",
            post(routes::jobs::submit_auto_annotate),
        )
        .route(
            "/api/v1/annotations/{annotation_id}/encode",
            post(routes::jobs::submit_encode),
        )
        .route("/api/v1/jobs/{job_id}", get(routes::jobs::get_job_status))
        .route(
            "/api/v1/labels/{label_id}/projection",
            get(routes::projection::get_projection),
        )
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::render_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(1024 * 1024)); // 1 MB limit

    tracing::info!("Starting annotation-compute on {}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", bind_addr);

    axum::serve(listener, app).await.expect("Server error");
}
