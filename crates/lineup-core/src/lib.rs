//! lineup-core — gallery-backed face identification.
//!
//! Embedding storage, similarity matching under three selectable
//! strategies, the registration pipeline (folder walks, augmentation,
//! illumination normalization), and the recognition/verification façade.
//! Inference itself lives behind [`backend::FaceBackend`]; see
//! `lineup-model` for the ONNX implementation.

pub mod augment;
pub mod backend;
pub mod config;
pub mod engine;
pub mod matcher;
pub mod preprocess;
pub mod store;
pub mod types;

pub use backend::{BackendError, DistanceMetric, FaceBackend, PairVerification};
pub use config::Config;
pub use engine::{EngineError, FaceEngine, Recognition};
pub use matcher::{MatchResult, MatchStrategy};
pub use store::{FaceRecord, FaceStore, StoreError};
pub use types::{BoundingBox, DetectedFace};
