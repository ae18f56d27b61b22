use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A cached projection result row, keyed by label.
///
/// Valid until `created_at + TTL`; validity is checked lazily on read, there
/// is no background eviction.
#[derive(Debug, Clone)]
pub struct ProjectionRow {
    pub label_id: i64,
    /// x coordinates, little-endian f32 bytes, scaled to the 0..1 range.
    pub tx: Vec<u8>,
    /// y coordinates, same layout as `tx`.
    pub ty: Vec<u8>,
    /// Index of contributing annotations: `[annotation_id, frame, job_id]`.
    pub annotations: serde_json::Value,
    /// Rendered scatter artifact on local disk.
    pub artifact_path: String,
    pub created_at: DateTime<Utc>,
}

/// Wire payload served to pollers once a projection is ready.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectionPayload {
    pub label_id: i64,
    pub tx: Vec<f32>,
    pub ty: Vec<f32>,
    pub annotations: serde_json::Value,
    pub artifact_path: String,
    pub created_at: DateTime<Utc>,
}

pub fn floats_to_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn bytes_to_floats(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

impl ProjectionRow {
    pub fn into_payload(self) -> ProjectionPayload {
        ProjectionPayload {
            label_id: self.label_id,
            tx: bytes_to_floats(&self.tx),
            ty: bytes_to_floats(&self.ty),
            annotations: self.annotations,
            artifact_path: self.artifact_path,
            created_at: self.created_at,
        }
    }
}
