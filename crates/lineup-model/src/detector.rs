//! SCRFD face detector via ONNX Runtime.
//!
//! Anchor-free decoding over three stride levels with NMS
//! post-processing. Input images are letterboxed onto a 640×640 RGB
//! canvas; detections are mapped back into source coordinates.

use std::cmp::Ordering;
use std::path::Path;

use image::imageops::FilterType;
use image::RgbImage;
use lineup_core::BoundingBox;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use thiserror::Error;

const INPUT_SIZE: u32 = 640;
const MEAN: f32 = 127.5;
const STD: f32 = 128.0;
const CONFIDENCE_THRESHOLD: f32 = 0.5;
const NMS_IOU_THRESHOLD: f32 = 0.4;
const STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;
/// SCRFD exports nine tensors: [0-2] scores, [3-5] boxes, [6-8] landmarks,
/// each trio ordered by stride 8/16/32.
const NUM_OUTPUTS: usize = 9;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detector model not found: {0}")]
    ModelNotFound(String),
    #[error("detector inference failed: {0}")]
    Inference(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Coordinate mapping between the letterboxed canvas and the source image.
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

pub struct FaceDetector {
    session: Session,
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(
                model_path.display().to_string(),
            ));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let outputs = session.outputs().len();
        if outputs != NUM_OUTPUTS {
            return Err(DetectorError::Inference(format!(
                "expected {NUM_OUTPUTS} output tensors (score/box/landmark per stride), got {outputs}"
            )));
        }

        tracing::info!(path = %model_path.display(), "SCRFD detector loaded");
        Ok(Self { session })
    }

    /// Detect faces, highest confidence first.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
        let (tensor, letterbox) = preprocess(image);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(tensor.view())?])?;

        let mut detections = Vec::new();
        for (level, &stride) in STRIDES.iter().enumerate() {
            let (_, scores) = outputs[level]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::Inference(format!("scores stride {stride}: {e}")))?;
            let (_, boxes) = outputs[level + 3]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::Inference(format!("boxes stride {stride}: {e}")))?;
            let (_, landmarks) = outputs[level + 6]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::Inference(format!("landmarks stride {stride}: {e}")))?;

            decode_level(scores, boxes, landmarks, stride, &letterbox, &mut detections);
        }

        let mut kept = nms(detections, NMS_IOU_THRESHOLD);
        kept.sort_by(|a, b| by_confidence(b, a));
        Ok(kept)
    }
}

fn by_confidence(a: &BoundingBox, b: &BoundingBox) -> Ordering {
    a.confidence
        .partial_cmp(&b.confidence)
        .unwrap_or(Ordering::Equal)
}

/// Letterbox-resize onto the 640×640 canvas and normalize into an NCHW
/// tensor. Padding stays at zero, which is exactly the normalized value of
/// a mean-gray pixel.
fn preprocess(image: &RgbImage) -> (Array4<f32>, Letterbox) {
    let (width, height) = image.dimensions();
    let scale = (INPUT_SIZE as f32 / width as f32).min(INPUT_SIZE as f32 / height as f32);
    let new_w = ((width as f32 * scale).round() as u32).clamp(1, INPUT_SIZE);
    let new_h = ((height as f32 * scale).round() as u32).clamp(1, INPUT_SIZE);

    let resized = image::imageops::resize(image, new_w, new_h, FilterType::Triangle);
    let pad_x = (INPUT_SIZE - new_w) / 2;
    let pad_y = (INPUT_SIZE - new_h) / 2;

    let size = INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        let tx = (x + pad_x) as usize;
        let ty = (y + pad_y) as usize;
        for channel in 0..3 {
            tensor[[0, channel, ty, tx]] = (pixel[channel] as f32 - MEAN) / STD;
        }
    }

    (
        tensor,
        Letterbox {
            scale,
            pad_x: pad_x as f32,
            pad_y: pad_y as f32,
        },
    )
}

/// Decode one stride level's raw tensors into source-space detections.
fn decode_level(
    scores: &[f32],
    boxes: &[f32],
    landmarks: &[f32],
    stride: usize,
    letterbox: &Letterbox,
    out: &mut Vec<BoundingBox>,
) {
    let grid = INPUT_SIZE as usize / stride;
    let anchors = grid * grid * ANCHORS_PER_CELL;

    for idx in 0..anchors {
        let Some(&score) = scores.get(idx) else {
            break;
        };
        if score <= CONFIDENCE_THRESHOLD {
            continue;
        }

        let cell = idx / ANCHORS_PER_CELL;
        let anchor_x = ((cell % grid) * stride) as f32;
        let anchor_y = ((cell / grid) * stride) as f32;
        let s = stride as f32;

        // Box regression is distance-to-edge from the anchor point, in
        // stride units: [left, top, right, bottom].
        let b = idx * 4;
        if b + 3 >= boxes.len() {
            break;
        }
        let (x1, y1) = letterbox.to_source(anchor_x - boxes[b] * s, anchor_y - boxes[b + 1] * s);
        let (x2, y2) =
            letterbox.to_source(anchor_x + boxes[b + 2] * s, anchor_y + boxes[b + 3] * s);

        let k = idx * 10;
        let points = (k + 9 < landmarks.len()).then(|| {
            std::array::from_fn(|i| {
                letterbox.to_source(
                    anchor_x + landmarks[k + i * 2] * s,
                    anchor_y + landmarks[k + i * 2 + 1] * s,
                )
            })
        });

        out.push(BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: score,
            landmarks: points,
        });
    }
}

/// Greedy non-maximum suppression: keep each detection only if it does not
/// overlap an already-kept, higher-confidence one.
fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| by_confidence(b, a));

    let mut kept: Vec<BoundingBox> = Vec::new();
    for detection in detections {
        if kept.iter().all(|k| iou(k, &detection) <= iou_threshold) {
            kept.push(detection);
        }
    }
    kept
}

/// Intersection-over-union of two boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.width * a.height + b.width * b.height - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}
