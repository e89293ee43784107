//! The ONNX-backed implementation of [`lineup_core::FaceBackend`]:
//! SCRFD detection feeding ArcFace embedding extraction, plus pair
//! verification with the ArcFace per-metric reference thresholds.

use std::path::Path;

use image::RgbImage;
use lineup_core::{BackendError, DetectedFace, DistanceMetric, FaceBackend, PairVerification};

use crate::detector::FaceDetector;
use crate::embedder::FaceEmbedder;

/// ArcFace decision thresholds per distance metric.
fn reference_threshold(metric: DistanceMetric) -> f32 {
    match metric {
        DistanceMetric::Cosine => 0.68,
        DistanceMetric::Euclidean => 4.15,
        DistanceMetric::EuclideanL2 => 1.13,
    }
}

pub struct OnnxBackend {
    detector: FaceDetector,
    embedder: FaceEmbedder,
}

impl OnnxBackend {
    /// Load both models. Fails fast with the offending path when a model
    /// file is missing.
    pub fn load(detector_model: &Path, embedding_model: &Path) -> Result<Self, BackendError> {
        let detector = FaceDetector::load(detector_model)
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;
        let embedder = FaceEmbedder::load(embedding_model)
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;
        Ok(Self { detector, embedder })
    }

    fn first_embedding(&mut self, image: &RgbImage) -> Result<Vec<f32>, BackendError> {
        self.extract_faces(image)?
            .into_iter()
            .next()
            .map(|face| face.embedding)
            .ok_or(BackendError::NoFaceDetected)
    }
}

impl FaceBackend for OnnxBackend {
    fn extract_faces(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, BackendError> {
        let boxes = self
            .detector
            .detect(image)
            .map_err(|e| BackendError::Inference(e.to_string()))?;

        let mut faces = Vec::with_capacity(boxes.len());
        for bbox in boxes {
            match self.embedder.extract(image, &bbox) {
                Ok(embedding) => faces.push(DetectedFace { embedding, bbox }),
                // One unembeddable face (e.g. missing landmarks) is
                // dropped; the remaining faces still come through.
                Err(e) => {
                    tracing::debug!(error = %e, "skipping face that failed embedding extraction")
                }
            }
        }
        Ok(faces)
    }

    fn verify_pair(
        &mut self,
        a: &RgbImage,
        b: &RgbImage,
        metric: DistanceMetric,
    ) -> Result<PairVerification, BackendError> {
        let embedding_a = self.first_embedding(a)?;
        let embedding_b = self.first_embedding(b)?;

        let distance = distance(&embedding_a, &embedding_b, metric);
        let threshold = reference_threshold(metric);
        Ok(PairVerification {
            verified: distance <= threshold,
            distance,
            threshold,
        })
    }
}

/// Distance between two raw embeddings under the given metric.
fn distance(a: &[f32], b: &[f32], metric: DistanceMetric) -> f32 {
    match metric {
        DistanceMetric::Cosine => 1.0 - cosine(a, b),
        DistanceMetric::Euclidean => euclidean(a, b),
        DistanceMetric::EuclideanL2 => {
            euclidean(&lineup_core::matcher::l2_normalize(a), &lineup_core::matcher::l2_normalize(b))
        }
    }
}

/// Unclamped cosine similarity in [-1, 1].
fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    let denom = norm_a * norm_b;
    if denom > 0.0 {
        dot / denom
    } else {
        0.0
    }
}

fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_distance_of_identical_vectors_is_zero() {
        let v = [0.3, 0.4, 0.5];
        assert!(distance(&v, &v, DistanceMetric::Cosine).abs() < 1e-6);
    }

    #[test]
    fn cosine_distance_of_orthogonal_vectors_is_one() {
        let a = [1.0, 0.0];
        let b = [0.0, 1.0];
        assert!((distance(&a, &b, DistanceMetric::Cosine) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn euclidean_distance_matches_geometry() {
        let a = [0.0, 0.0];
        let b = [3.0, 4.0];
        assert!((distance(&a, &b, DistanceMetric::Euclidean) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn euclidean_l2_ignores_magnitude() {
        // Parallel vectors of different lengths are identical after
        // normalization.
        let a = [2.0, 0.0];
        let b = [7.0, 0.0];
        assert!(distance(&a, &b, DistanceMetric::EuclideanL2).abs() < 1e-6);
        // But plain euclidean sees the magnitude gap.
        assert!(distance(&a, &b, DistanceMetric::Euclidean) > 4.9);
    }

    #[test]
    fn thresholds_follow_the_metric() {
        assert!((reference_threshold(DistanceMetric::Cosine) - 0.68).abs() < 1e-6);
        assert!((reference_threshold(DistanceMetric::Euclidean) - 4.15).abs() < 1e-6);
        assert!((reference_threshold(DistanceMetric::EuclideanL2) - 1.13).abs() < 1e-6);
    }

    #[test]
    fn zero_vector_cosine_is_neutral() {
        let zero = [0.0, 0.0];
        let v = [1.0, 0.0];
        assert_eq!(cosine(&zero, &v), 0.0);
    }
}
