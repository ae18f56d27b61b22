use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use std::time::Instant;

use crate::app_state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub database: ComponentHealth,
    pub queue: ComponentHealth,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    pub status: &'static str,
    pub latency_ms: Option<u64>,
}

impl ComponentHealth {
    fn from_probe(ok: bool, started: Instant) -> Self {
        if ok {
            Self {
                status: "ok",
                latency_ms: Some(started.elapsed().as_millis() as u64),
            }
        } else {
            Self {
                status: "error",
                latency_ms: None,
            }
        }
    }

    fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// GET /health — readiness of the two collaborators jobs cannot run
/// without: the annotation store and the work queue.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let started = Instant::now();
    let database = ComponentHealth::from_probe(
        sqlx::query("SELECT 1").execute(&state.db).await.is_ok(),
        started,
    );

    let started = Instant::now();
    let queue = ComponentHealth::from_probe(state.queue.health_check().await.is_ok(), started);

    let healthy = database.is_ok() && queue.is_ok();
    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let body = HealthResponse {
        status: if healthy { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        database,
        queue,
    };
    (code, Json(body))
}
