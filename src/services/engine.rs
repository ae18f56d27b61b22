use image::imageops::FilterType;
use std::path::Path;
use std::sync::OnceLock;

/// Side length the cropped region is resampled to before encoding.
const ENCODE_SIZE: u32 = 16;

static INSTANCE: OnceLock<EmbeddingModel> = OnceLock::new();

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("failed to load model from {path}: {source}")]
    Load {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to decode region image: {0}")]
    Image(#[from] image::ImageError),

    #[error("invalid crop window {0:?}")]
    InvalidCrop([f64; 4]),
}

/// Process-wide embedding model.
///
/// The first `get_instance` call performs the expensive weight load; every
/// later call returns the same instance for the lifetime of the worker
/// process, whatever path it passes. The instance is immutable after
/// initialization, so concurrent reads need no lock. Each worker process
/// loads independently; nothing is shared across processes.
pub struct EmbeddingModel {
    weights: Vec<u8>,
}

impl EmbeddingModel {
    pub fn get_instance(model_path: &Path) -> Result<&'static EmbeddingModel, EngineError> {
        if let Some(model) = INSTANCE.get() {
            return Ok(model);
        }
        let loaded = Self::load(model_path)?;
        // A concurrent first call may also have loaded; get_or_init keeps
        // exactly one instance either way.
        Ok(INSTANCE.get_or_init(|| loaded))
    }

    fn load(model_path: &Path) -> Result<Self, EngineError> {
        let weights = std::fs::read(model_path).map_err(|source| EngineError::Load {
            path: model_path.display().to_string(),
            source,
        })?;
        if weights.is_empty() {
            return Err(EngineError::Load {
                path: model_path.display().to_string(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidData, "model file is empty"),
            });
        }
        tracing::info!(
            path = %model_path.display(),
            bytes = weights.len(),
            "embedding model loaded"
        );
        Ok(Self { weights })
    }

    /// Encode the `[x0, y0, x1, y1]` region of an image into the feature
    /// byte payload stored on the annotation: crop, resample, then blend
    /// each normalized channel with the loaded weights.
    pub fn encode_region(
        &self,
        image_bytes: &[u8],
        window: [f64; 4],
    ) -> Result<Vec<u8>, EngineError> {
        let [x0, y0, x1, y1] = window;
        if !(x0 < x1 && y0 < y1) || x0 < 0.0 || y0 < 0.0 {
            return Err(EngineError::InvalidCrop(window));
        }

        let img = image::load_from_memory(image_bytes)?;
        let (x, y) = (x0.floor() as u32, y0.floor() as u32);
        // A window starting past the image edge has nothing to crop.
        if x >= img.width() || y >= img.height() {
            return Err(EngineError::InvalidCrop(window));
        }
        let width = ((x1 - x0).ceil() as u32).max(1).min(img.width().saturating_sub(x).max(1));
        let height = ((y1 - y0).ceil() as u32).max(1).min(img.height().saturating_sub(y).max(1));

        let region = img
            .crop_imm(x, y, width, height)
            .resize_exact(ENCODE_SIZE, ENCODE_SIZE, FilterType::Triangle)
            .to_rgb8();

        let mut feature = Vec::with_capacity((ENCODE_SIZE * ENCODE_SIZE * 3 * 4) as usize);
        for (i, value) in region.as_raw().iter().enumerate() {
            let weight = self.weights[i % self.weights.len()] as f32 / 255.0;
            let normalized = (*value as f32 / 255.0 + weight) / 2.0;
            feature.extend_from_slice(&normalized.to_le_bytes());
        }
        Ok(feature)
    }
}
