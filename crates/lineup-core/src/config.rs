//! Pipeline configuration, loaded from `LINEUP_*` environment variables
//! with defaults. Components take their tunables as explicit values; no
//! ambient globals.

use std::path::PathBuf;

use crate::backend::DistanceMetric;
use crate::matcher::MatchStrategy;

/// Default file name of the SCRFD detection model.
const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
/// Default file name of the ArcFace embedding model.
const EMBEDDING_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the gallery file.
    pub gallery_path: PathBuf,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Detection model file name inside the model directory.
    pub detector_model: String,
    /// Embedding model file name inside the model directory.
    pub embedding_model: String,
    /// Aggregation strategy for recognition.
    pub match_strategy: MatchStrategy,
    /// Minimum similarity for a recognition match.
    pub similarity_threshold: f32,
    /// Distance metric for two-image verification.
    pub distance_metric: DistanceMetric,
    /// Apply illumination normalization before extraction.
    pub preprocess: bool,
    /// Default for expanding folder images into mirror/brightness variants.
    pub augment: bool,
    /// Accepted image file extensions, lowercase, without the dot.
    pub image_extensions: Vec<String>,
    /// Advisory minimum photo count per identity.
    pub min_photos_recommended: usize,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            gallery_path: data_dir.join("gallery.json"),
            model_dir: data_dir.join("models"),
            detector_model: DETECTOR_MODEL_FILE.to_string(),
            embedding_model: EMBEDDING_MODEL_FILE.to_string(),
            match_strategy: MatchStrategy::default(),
            similarity_threshold: 0.6,
            distance_metric: DistanceMetric::default(),
            preprocess: false,
            augment: false,
            image_extensions: ["jpg", "jpeg", "png", "bmp", "webp"]
                .map(str::to_string)
                .to_vec(),
            min_photos_recommended: 3,
        }
    }
}

impl Config {
    /// Load configuration from `LINEUP_*` environment variables, falling
    /// back to defaults. Unparseable values fall back with a warning
    /// rather than aborting.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("LINEUP_GALLERY_PATH") {
            config.gallery_path = PathBuf::from(path);
        }
        if let Ok(dir) = std::env::var("LINEUP_MODEL_DIR") {
            config.model_dir = PathBuf::from(dir);
        }
        if let Ok(file) = std::env::var("LINEUP_DETECTOR_MODEL") {
            config.detector_model = file;
        }
        if let Ok(file) = std::env::var("LINEUP_EMBEDDING_MODEL") {
            config.embedding_model = file;
        }
        if let Some(strategy) = env_parsed("LINEUP_MATCH_STRATEGY") {
            config.match_strategy = strategy;
        }
        if let Some(threshold) = env_parsed("LINEUP_SIMILARITY_THRESHOLD") {
            config.similarity_threshold = threshold;
        }
        if let Some(metric) = env_parsed("LINEUP_DISTANCE_METRIC") {
            config.distance_metric = metric;
        }
        config.preprocess = env_flag("LINEUP_PREPROCESS", config.preprocess);
        config.augment = env_flag("LINEUP_AUGMENT", config.augment);
        if let Ok(extensions) = std::env::var("LINEUP_IMAGE_EXTENSIONS") {
            config.image_extensions = extensions
                .split(',')
                .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|e| !e.is_empty())
                .collect();
        }
        if let Some(min) = env_parsed("LINEUP_MIN_PHOTOS") {
            config.min_photos_recommended = min;
        }

        config
    }

    /// Path to the configured detection model.
    pub fn detector_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.detector_model)
    }

    /// Path to the configured embedding model.
    pub fn embedding_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.embedding_model)
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("lineup")
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable configuration value");
            None
        }
    }
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key).map(|v| v != "0").unwrap_or(default)
}
