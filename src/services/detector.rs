use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Object detector the inference job calls per frame. Trait so the
/// executor can run against a stub in tests.
#[async_trait]
pub trait Detector: Send + Sync {
    /// Detect the given labels on one frame image. Returns bounding boxes
    /// `[x0, y0, x1, y1]` keyed by label name; labels with no hits may be
    /// absent from the map.
    async fn detect(
        &self,
        image_bytes: &[u8],
        labels: &[String],
    ) -> Result<HashMap<String, Vec<[f64; 4]>>, DetectorError>;
}

/// Client for the remote detection service.
pub struct HttpDetector {
    http: Client,
    inference_url: String,
}

#[derive(Deserialize)]
struct InferenceResponse {
    #[serde(default)]
    bbox: HashMap<String, Vec<[f64; 4]>>,
}

impl HttpDetector {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: Client::new(),
            inference_url: format!("{}/inference", base_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl Detector for HttpDetector {
    async fn detect(
        &self,
        image_bytes: &[u8],
        labels: &[String],
    ) -> Result<HashMap<String, Vec<[f64; 4]>>, DetectorError> {
        let request_body = serde_json::json!({
            "image": base64::engine::general_purpose::STANDARD.encode(image_bytes),
            "labels": labels,
        });

        let response = self
            .http
            .post(&self.inference_url)
            .json(&request_body)
            .send()
            .await?
            .error_for_status()?;

        let parsed: InferenceResponse = response.json().await?;
        Ok(parsed.bbox)
    }
}
