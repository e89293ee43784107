//! ArcFace embedding extraction via ONNX Runtime.
//!
//! Aligns each detected face to the canonical 112×112 crop and runs the
//! w600k_r50 ArcFace model to produce a 512-dimensional embedding.

use std::path::Path;

use image::RgbImage;
use lineup_core::BoundingBox;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use thiserror::Error;

use crate::alignment;

const INPUT_SIZE: usize = alignment::ALIGNED_SIZE as usize;
const MEAN: f32 = 127.5;
/// ArcFace uses symmetric normalization: std 127.5, not the detector's 128.
const STD: f32 = 127.5;
pub const EMBEDDING_DIM: usize = 512;

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("embedding model not found: {0}")]
    ModelNotFound(String),
    #[error("embedding inference failed: {0}")]
    Inference(String),
    #[error("face has no landmarks; the detector must supply them for alignment")]
    NoLandmarks,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

pub struct FaceEmbedder {
    session: Session,
}

impl FaceEmbedder {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, EmbedderError> {
        if !model_path.exists() {
            return Err(EmbedderError::ModelNotFound(
                model_path.display().to_string(),
            ));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(path = %model_path.display(), "ArcFace embedder loaded");
        Ok(Self { session })
    }

    /// Extract the raw 512-dimensional embedding for one detected face.
    ///
    /// The output is deliberately not unit-normalized: the matcher
    /// normalizes for cosine scoring, the centroid strategy averages raw
    /// vectors, and euclidean verification distances need raw magnitudes.
    pub fn extract(
        &mut self,
        image: &RgbImage,
        face: &BoundingBox,
    ) -> Result<Vec<f32>, EmbedderError> {
        let landmarks = face.landmarks.as_ref().ok_or(EmbedderError::NoLandmarks)?;
        let aligned = alignment::align_face(image, landmarks);
        let tensor = to_tensor(&aligned);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(tensor.view())?])?;
        let (_, values) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EmbedderError::Inference(format!("embedding output: {e}")))?;

        if values.len() != EMBEDDING_DIM {
            return Err(EmbedderError::Inference(format!(
                "expected {EMBEDDING_DIM}-dim embedding, got {}",
                values.len()
            )));
        }
        Ok(values.to_vec())
    }
}

/// Normalize the aligned RGB crop into an NCHW float tensor.
fn to_tensor(aligned: &RgbImage) -> Array4<f32> {
    let mut tensor = Array4::<f32>::zeros((1, 3, INPUT_SIZE, INPUT_SIZE));
    for (x, y, pixel) in aligned.enumerate_pixels() {
        for channel in 0..3 {
            tensor[[0, channel, y as usize, x as usize]] =
                (pixel[channel] as f32 - MEAN) / STD;
        }
    }
    tensor
}
