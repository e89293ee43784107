use serde::{Deserialize, Serialize};

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// One face as produced by the backend: embedding plus geometry.
///
/// The embedding is the raw model output; the matcher normalizes it
/// before any comparison.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub embedding: Vec<f32>,
    pub bbox: BoundingBox,
}
