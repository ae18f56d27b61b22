use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string for the job queue
    pub redis_url: String,

    /// Base URL of the remote detector service
    pub detector_url: String,

    /// Path to the embedding model weights, loaded once per worker process
    pub model_path: String,

    /// Directory for rendered projection artifacts
    #[serde(default = "default_data_root")]
    pub data_root: String,

    /// Lifetime of a cached projection before it is recomputed on read
    #[serde(default = "default_projection_ttl_secs")]
    pub projection_ttl_secs: u64,

    /// Worker sleep between empty queue polls
    #[serde(default = "default_worker_poll_interval_ms")]
    pub worker_poll_interval_ms: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_data_root() -> String {
    "./data".to_string()
}

fn default_projection_ttl_secs() -> u64 {
    3600
}

fn default_worker_poll_interval_ms() -> u64 {
    1000
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }
}
