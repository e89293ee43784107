//! Recognition, verification, and registration façade.
//!
//! Orchestrates the backend (detection + embedding), the matcher, and the
//! store. Batch paths degrade silently per item: one undecodable file or
//! undetectable face never aborts a folder walk or a multi-face
//! recognition. Verification is the exception and propagates failure.

use std::fs;
use std::path::{Path, PathBuf};

use image::RgbImage;
use thiserror::Error;

use crate::augment;
use crate::backend::{BackendError, FaceBackend, PairVerification};
use crate::config::Config;
use crate::matcher::{self, MatchResult};
use crate::preprocess;
use crate::store::{FaceStore, StoreError};
use crate::types::{BoundingBox, DetectedFace};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to read image {path}: {message}")]
    Image { path: String, message: String },
}

/// One recognized face: the best-identity decision plus its geometry.
#[derive(Debug, Clone)]
pub struct Recognition {
    pub identity: Option<String>,
    pub similarity: f32,
    pub bbox: BoundingBox,
}

pub struct FaceEngine {
    backend: Box<dyn FaceBackend>,
    store: FaceStore,
    config: Config,
}

impl FaceEngine {
    pub fn new(backend: Box<dyn FaceBackend>, store: FaceStore, config: Config) -> Self {
        Self {
            backend,
            store,
            config,
        }
    }

    pub fn store(&self) -> &FaceStore {
        &self.store
    }

    /// Register faces from one image under `identity`.
    ///
    /// Keeps only the first detected face (detector order) unless
    /// `all_faces` is set. Returns the number of records added; a missing
    /// file, undecodable image, or faceless image yields 0, not an error.
    /// Store failures (dimension mismatch, disk trouble) do propagate.
    pub fn register_image(
        &mut self,
        path: &Path,
        identity: &str,
        all_faces: bool,
    ) -> Result<usize, EngineError> {
        let Some(image) = self.decode(path) else {
            return Ok(0);
        };
        let faces = self.extract(&image, path);
        let kept = if all_faces {
            faces
        } else {
            faces.into_iter().take(1).collect()
        };

        let mut added = 0;
        for face in kept {
            self.store.add(
                identity,
                face.embedding,
                Some(path.to_string_lossy().as_ref()),
            )?;
            added += 1;
        }
        Ok(added)
    }

    /// Register every accepted image file in `folder` under one identity,
    /// defaulting to the folder's own name. Files are visited in sorted
    /// filename order; extensions are matched case-insensitively.
    ///
    /// With augmentation each source image is expanded into four variants
    /// (original, mirror, brightened, darkened) and contributes one record
    /// per variant whose extraction succeeds — only the first detected
    /// face of each variant is kept, so a folder never registers multiple
    /// faces per image even though [`register_image`](Self::register_image)
    /// can. Decode and extraction failures skip the file or variant.
    pub fn register_folder(
        &mut self,
        folder: &Path,
        identity: Option<&str>,
        augment: bool,
    ) -> Result<usize, EngineError> {
        let name = match identity {
            Some(name) => name.to_string(),
            None => folder
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };

        let mut files: Vec<PathBuf> = match fs::read_dir(folder) {
            Ok(entries) => entries
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path())
                .filter(|path| path.is_file() && self.accepts_extension(path))
                .collect(),
            Err(e) => {
                tracing::warn!(folder = %folder.display(), error = %e, "cannot read folder");
                return Ok(0);
            }
        };
        files.sort();

        let mut added = 0;
        for path in &files {
            if augment {
                let Some(image) = self.decode(path) else {
                    continue;
                };
                for variant in augment::variants(&image) {
                    if let Some(face) = self.extract(&variant, path).into_iter().next() {
                        self.store.add(
                            &name,
                            face.embedding,
                            Some(path.to_string_lossy().as_ref()),
                        )?;
                        added += 1;
                    }
                }
            } else {
                added += self.register_image(path, &name, false)?;
            }
        }

        tracing::info!(
            folder = %folder.display(),
            identity = %name,
            files = files.len(),
            added,
            augment,
            "folder registration finished"
        );
        Ok(added)
    }

    /// Recognize every face in the image against the current gallery.
    ///
    /// One result per detected face, detection order preserved. Never
    /// fails: extraction trouble yields an empty list.
    pub fn recognize(&mut self, image: &RgbImage) -> Vec<Recognition> {
        let prepared = self.prepared(image);
        let faces = match self.backend.extract_faces(&prepared) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::debug!(error = %e, "extraction failed, nothing recognized");
                return Vec::new();
            }
        };

        let records = self.store.get_all();
        faces
            .into_iter()
            .map(|face| {
                let MatchResult { identity, score } = matcher::find_best(
                    &face.embedding,
                    &records,
                    self.config.match_strategy,
                    self.config.similarity_threshold,
                );
                Recognition {
                    identity,
                    similarity: score,
                    bbox: face.bbox,
                }
            })
            .collect()
    }

    /// [`recognize`](Self::recognize) from a file path. A missing or
    /// undecodable file yields an empty list.
    pub fn recognize_path(&mut self, path: &Path) -> Vec<Recognition> {
        match self.decode(path) {
            Some(image) => self.recognize(&image),
            None => Vec::new(),
        }
    }

    /// Verify that two images show the same face.
    ///
    /// Pure pass-through to the backend's pair primitive under the
    /// configured distance metric. A missing face in either image is an
    /// error, not a non-match.
    pub fn verify(&mut self, path_a: &Path, path_b: &Path) -> Result<PairVerification, EngineError> {
        let a = self.open(path_a)?;
        let b = self.open(path_b)?;
        let prepared_a = self.prepared(&a);
        let prepared_b = self.prepared(&b);
        let metric = self.config.distance_metric;
        Ok(self.backend.verify_pair(&prepared_a, &prepared_b, metric)?)
    }

    /// Extract faces from one prepared image, degrading to an empty list.
    fn extract(&mut self, image: &RgbImage, source: &Path) -> Vec<DetectedFace> {
        let prepared = self.prepared(image);
        match self.backend.extract_faces(&prepared) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::debug!(
                    path = %source.display(),
                    error = %e,
                    "extraction failed, skipping"
                );
                Vec::new()
            }
        }
    }

    /// Illumination normalization, when enabled. Applied to registration
    /// and recognition inputs alike so gallery and query embeddings come
    /// from matching conditions.
    fn prepared(&self, image: &RgbImage) -> RgbImage {
        if self.config.preprocess {
            preprocess::normalize_illumination(image)
        } else {
            image.clone()
        }
    }

    fn decode(&self, path: &Path) -> Option<RgbImage> {
        match image::open(path) {
            Ok(image) => Some(image.to_rgb8()),
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "decode failed, skipping");
                None
            }
        }
    }

    fn open(&self, path: &Path) -> Result<RgbImage, EngineError> {
        image::open(path)
            .map(|image| image.to_rgb8())
            .map_err(|e| EngineError::Image {
                path: path.display().to_string(),
                message: e.to_string(),
            })
    }

    fn accepts_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| {
                let lowered = e.to_ascii_lowercase();
                self.config
                    .image_extensions
                    .iter()
                    .any(|accepted| accepted == &lowered)
            })
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::MatchStrategy;
    use image::Rgb;

    /// Deterministic stand-in for the ONNX backend: returns a fixed list
    /// of faces for every image, or errors when told to.
    struct StubBackend {
        embeddings: Vec<Vec<f32>>,
        fail_extract: bool,
        pair: Option<PairVerification>,
    }

    impl StubBackend {
        fn with_faces(embeddings: Vec<Vec<f32>>) -> Self {
            Self {
                embeddings,
                fail_extract: false,
                pair: None,
            }
        }
    }

    impl FaceBackend for StubBackend {
        fn extract_faces(&mut self, _image: &RgbImage) -> Result<Vec<DetectedFace>, BackendError> {
            if self.fail_extract {
                return Err(BackendError::Inference("stub failure".into()));
            }
            Ok(self
                .embeddings
                .iter()
                .map(|embedding| DetectedFace {
                    embedding: embedding.clone(),
                    bbox: BoundingBox {
                        x: 0.0,
                        y: 0.0,
                        width: 10.0,
                        height: 10.0,
                        confidence: 0.9,
                        landmarks: None,
                    },
                })
                .collect())
        }

        fn verify_pair(
            &mut self,
            _a: &RgbImage,
            _b: &RgbImage,
            _metric: crate::backend::DistanceMetric,
        ) -> Result<PairVerification, BackendError> {
            self.pair.clone().ok_or(BackendError::NoFaceDetected)
        }
    }

    fn engine_in(dir: &tempfile::TempDir, backend: StubBackend) -> FaceEngine {
        let config = Config {
            gallery_path: dir.path().join("gallery.json"),
            ..Config::default()
        };
        let store = FaceStore::new(&config.gallery_path);
        FaceEngine::new(Box::new(backend), store, config)
    }

    fn write_image(path: &Path) {
        RgbImage::from_pixel(8, 8, Rgb([120, 130, 140]))
            .save(path)
            .unwrap();
    }

    #[test]
    fn register_image_missing_file_adds_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine_in(&dir, StubBackend::with_faces(vec![vec![1.0, 0.0]]));
        let added = engine
            .register_image(Path::new("/no/such/file.jpg"), "alice", false)
            .unwrap();
        assert_eq!(added, 0);
        assert_eq!(engine.store().count(), 0);
    }

    #[test]
    fn register_image_keeps_first_face_unless_all_faces() {
        let dir = tempfile::tempdir().unwrap();
        let photo = dir.path().join("two-people.jpg");
        write_image(&photo);

        let faces = vec![vec![1.0, 0.0], vec![0.0, 1.0]];

        let mut engine = engine_in(&dir, StubBackend::with_faces(faces.clone()));
        assert_eq!(engine.register_image(&photo, "alice", false).unwrap(), 1);
        assert_eq!(engine.store().count(), 1);

        engine.store().clear().unwrap();
        assert_eq!(engine.register_image(&photo, "alice", true).unwrap(), 2);
        assert_eq!(engine.store().count(), 2);
    }

    #[test]
    fn register_image_records_provenance() {
        let dir = tempfile::tempdir().unwrap();
        let photo = dir.path().join("alice.jpg");
        write_image(&photo);

        let mut engine = engine_in(&dir, StubBackend::with_faces(vec![vec![1.0, 0.0]]));
        engine.register_image(&photo, "alice", false).unwrap();

        let records = engine.store().get_all();
        assert_eq!(
            records[0].source_path.as_deref(),
            Some(photo.to_string_lossy().as_ref())
        );
    }

    #[test]
    fn folder_filters_extensions_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("carol");
        fs::create_dir(&folder).unwrap();
        write_image(&folder.join("a.jpg"));
        fs::write(folder.join("b.txt"), b"not an image").unwrap();
        write_image(&folder.join("c.PNG"));

        let mut engine = engine_in(&dir, StubBackend::with_faces(vec![vec![1.0, 0.0]]));
        let added = engine.register_folder(&folder, None, false).unwrap();
        assert_eq!(added, 2);
        // Identity defaults to the folder name.
        assert_eq!(engine.store().identities(), ["carol"]);
    }

    #[test]
    fn folder_augmentation_quadruples_records() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("dave");
        fs::create_dir(&folder).unwrap();
        write_image(&folder.join("one.jpg"));
        write_image(&folder.join("two.jpg"));

        let mut engine = engine_in(&dir, StubBackend::with_faces(vec![vec![1.0, 0.0]]));
        assert_eq!(engine.register_folder(&folder, None, true).unwrap(), 8);

        engine.store().clear().unwrap();
        assert_eq!(engine.register_folder(&folder, None, false).unwrap(), 2);
    }

    #[test]
    fn folder_skips_files_that_fail_extraction() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("erin");
        fs::create_dir(&folder).unwrap();
        write_image(&folder.join("photo.jpg"));

        let mut engine = engine_in(
            &dir,
            StubBackend {
                embeddings: vec![vec![1.0, 0.0]],
                fail_extract: true,
                pair: None,
            },
        );
        assert_eq!(engine.register_folder(&folder, None, false).unwrap(), 0);
        assert_eq!(engine.register_folder(&folder, None, true).unwrap(), 0);
    }

    #[test]
    fn missing_folder_registers_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine_in(&dir, StubBackend::with_faces(vec![vec![1.0, 0.0]]));
        let added = engine
            .register_folder(Path::new("/no/such/folder"), Some("alice"), false)
            .unwrap();
        assert_eq!(added, 0);
    }

    #[test]
    fn recognize_matches_each_face_in_detection_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine_in(
            &dir,
            StubBackend::with_faces(vec![vec![1.0, 0.0], vec![0.0, 1.0]]),
        );
        engine.store().add("alice", vec![1.0, 0.0], None).unwrap();
        engine.store().add("bob", vec![0.0, 1.0], None).unwrap();

        let image = RgbImage::new(4, 4);
        let results = engine.recognize(&image);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].identity.as_deref(), Some("alice"));
        assert_eq!(results[1].identity.as_deref(), Some("bob"));
        assert!((results[0].similarity - 1.0).abs() < 1e-5);
    }

    #[test]
    fn recognize_on_empty_gallery_reports_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine_in(&dir, StubBackend::with_faces(vec![vec![1.0, 0.0]]));
        let results = engine.recognize(&RgbImage::new(4, 4));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].identity, None);
        assert_eq!(results[0].similarity, 0.0);
    }

    #[test]
    fn recognize_swallows_extraction_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine_in(
            &dir,
            StubBackend {
                embeddings: vec![],
                fail_extract: true,
                pair: None,
            },
        );
        assert!(engine.recognize(&RgbImage::new(4, 4)).is_empty());
        assert!(engine.recognize_path(Path::new("/no/such.jpg")).is_empty());
    }

    #[test]
    fn recognize_respects_configured_strategy_and_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let backend = StubBackend::with_faces(vec![vec![1.0, 0.0]]);
        let config = Config {
            gallery_path: dir.path().join("gallery.json"),
            match_strategy: MatchStrategy::Centroid,
            similarity_threshold: 0.99,
            ..Config::default()
        };
        let store = FaceStore::new(&config.gallery_path);
        store.add("alice", vec![0.8, 0.6], None).unwrap();
        let mut engine = FaceEngine::new(Box::new(backend), store, config);

        let results = engine.recognize(&RgbImage::new(4, 4));
        // Best score 0.8 is below the 0.99 threshold: rejected but reported.
        assert_eq!(results[0].identity, None);
        assert!((results[0].similarity - 0.8).abs() < 1e-5);
    }

    #[test]
    fn verify_passes_through_backend_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.jpg");
        let b = dir.path().join("b.jpg");
        write_image(&a);
        write_image(&b);

        let mut engine = engine_in(
            &dir,
            StubBackend {
                embeddings: vec![],
                fail_extract: false,
                pair: Some(PairVerification {
                    verified: true,
                    distance: 0.31,
                    threshold: 0.68,
                }),
            },
        );
        let outcome = engine.verify(&a, &b).unwrap();
        assert!(outcome.verified);
        assert!((outcome.distance - 0.31).abs() < 1e-6);
    }

    #[test]
    fn verify_propagates_no_face_error() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.jpg");
        let b = dir.path().join("b.jpg");
        write_image(&a);
        write_image(&b);

        let mut engine = engine_in(&dir, StubBackend::with_faces(vec![]));
        let err = engine.verify(&a, &b).unwrap_err();
        assert!(matches!(
            err,
            EngineError::Backend(BackendError::NoFaceDetected)
        ));
    }

    #[test]
    fn verify_errors_on_unreadable_image() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.jpg");
        write_image(&a);

        let mut engine = engine_in(&dir, StubBackend::with_faces(vec![]));
        let err = engine.verify(&a, Path::new("/no/such.jpg")).unwrap_err();
        assert!(matches!(err, EngineError::Image { .. }));
    }
}
