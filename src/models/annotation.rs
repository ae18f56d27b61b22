use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Geometry kind of an annotated shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ShapeType {
    Rectangle,
    Polygon,
    Mask,
}

/// One annotated shape, as accepted by the bulk annotation endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shape {
    pub frame: i64,
    pub label_id: i64,
    #[serde(rename = "type")]
    pub shape_type: ShapeType,
    pub occluded: bool,
    /// Rectangles and masks carry `[x0, y0, x1, y1]` as the trailing four
    /// values; polygons carry the vertex list.
    pub points: Vec<f64>,
    pub z_order: i32,
    pub group: Option<i64>,
    pub attributes: Vec<serde_json::Value>,
    /// "auto" for detector output, "manual" otherwise.
    pub source: String,
}

impl Shape {
    /// A detector-produced rectangle on `frame`.
    pub fn auto_rectangle(frame: i64, label_id: i64, points: [f64; 4]) -> Self {
        Self {
            frame,
            label_id,
            shape_type: ShapeType::Rectangle,
            occluded: false,
            points: points.to_vec(),
            z_order: 0,
            group: None,
            attributes: Vec::new(),
            source: "auto".to_string(),
        }
    }
}

/// Versioned container the domain's bulk-write endpoint accepts. The
/// inference path only ever fills `shapes`; tags and tracks travel empty
/// for wire compatibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabeledData {
    pub version: u64,
    pub tags: Vec<serde_json::Value>,
    pub shapes: Vec<Shape>,
    pub tracks: Vec<serde_json::Value>,
}

impl LabeledData {
    pub fn empty() -> Self {
        Self {
            version: 0,
            tags: Vec::new(),
            shapes: Vec::new(),
            tracks: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty() && self.shapes.is_empty() && self.tracks.is_empty()
    }
}

/// A stored annotation row, as seen by the feature-encode job.
#[derive(Debug, Clone)]
pub struct AnnotationRow {
    pub id: i64,
    pub task_id: i64,
    pub label_id: i64,
    pub frame: i64,
    pub shape_type: ShapeType,
    pub points: Vec<f64>,
    /// Encoded feature payload; computed at most once per annotation.
    pub feature: Option<Vec<u8>>,
}

/// A feature row contributing to a projection.
#[derive(Debug, Clone)]
pub struct FeatureRow {
    pub annotation_id: i64,
    pub frame: i64,
    pub job_id: Option<i64>,
    pub feature: Vec<u8>,
}
