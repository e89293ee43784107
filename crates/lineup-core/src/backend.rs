//! Interface to the detection-and-embedding capability.
//!
//! The core never runs inference itself. Faces come in through this trait:
//! `lineup-model` provides the ONNX-backed implementation, tests use
//! stubs. The backend owns detection, alignment, and embedding extraction
//! as one call.

use std::str::FromStr;

use image::RgbImage;
use thiserror::Error;

use crate::types::DetectedFace;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("no face detected")]
    NoFaceDetected,
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// Distance metric for two-image verification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DistanceMetric {
    #[default]
    Cosine,
    Euclidean,
    EuclideanL2,
}

impl FromStr for DistanceMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cosine" => Ok(Self::Cosine),
            "euclidean" => Ok(Self::Euclidean),
            "euclidean_l2" => Ok(Self::EuclideanL2),
            other => Err(format!(
                "unknown distance metric '{other}' (expected cosine, euclidean, or euclidean_l2)"
            )),
        }
    }
}

/// Outcome of comparing the faces of two single images.
#[derive(Debug, Clone)]
pub struct PairVerification {
    pub verified: bool,
    pub distance: f32,
    pub threshold: f32,
}

/// Face detection plus embedding extraction, and single-pair verification.
pub trait FaceBackend {
    /// Detect every face in the image and return one embedding per face,
    /// in detector order. Zero faces is `Ok` with an empty list, not an
    /// error.
    fn extract_faces(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, BackendError>;

    /// Compare the first face of each image under `metric`.
    ///
    /// Unlike extraction, a missing face in either image is an error here:
    /// verification is a single-shot operation with no batch to protect,
    /// and the caller must be able to tell "no face" from "different face".
    fn verify_pair(
        &mut self,
        a: &RgbImage,
        b: &RgbImage,
        metric: DistanceMetric,
    ) -> Result<PairVerification, BackendError>;
}
