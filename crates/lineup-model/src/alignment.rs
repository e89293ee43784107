//! Canonical face alignment for the embedder.
//!
//! Estimates a 4-DOF similarity transform (scale, rotation, translation)
//! from the detector's five landmarks to the InsightFace 112×112
//! reference positions, then warps the face region with bilinear
//! sampling.

use image::RgbImage;

/// InsightFace reference landmarks for a 112×112 aligned crop:
/// left eye, right eye, nose, left mouth, right mouth.
const REFERENCE: [(f32, f32); 5] = [
    (38.2946, 51.6963),
    (73.5318, 51.5014),
    (56.0252, 71.7366),
    (41.5493, 92.3655),
    (70.7299, 92.2041),
];

pub const ALIGNED_SIZE: u32 = 112;

/// 2×3 row-major affine matrix `[a, -b, tx; b, a, ty]`.
type Transform = [f32; 6];

/// Warp the source image into a 112×112 aligned RGB crop.
pub fn align_face(image: &RgbImage, landmarks: &[(f32, f32); 5]) -> RgbImage {
    let transform = similarity_transform(landmarks, &REFERENCE);
    warp(image, &transform, ALIGNED_SIZE)
}

/// Closed-form least-squares similarity transform mapping `src` points
/// onto `dst` points. With centered coordinates the optimal rotation-scale
/// pair is `a = Σ(p·q) / Σ|p|²`, `b = Σ(p×q) / Σ|p|²`.
fn similarity_transform(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Transform {
    let n = src.len() as f32;
    let (mut src_cx, mut src_cy, mut dst_cx, mut dst_cy) = (0.0f32, 0.0f32, 0.0f32, 0.0f32);
    for i in 0..src.len() {
        src_cx += src[i].0;
        src_cy += src[i].1;
        dst_cx += dst[i].0;
        dst_cy += dst[i].1;
    }
    let (src_cx, src_cy) = (src_cx / n, src_cy / n);
    let (dst_cx, dst_cy) = (dst_cx / n, dst_cy / n);

    let mut variance = 0.0f32;
    let mut dot = 0.0f32;
    let mut cross = 0.0f32;
    for i in 0..src.len() {
        let (px, py) = (src[i].0 - src_cx, src[i].1 - src_cy);
        let (qx, qy) = (dst[i].0 - dst_cx, dst[i].1 - dst_cy);
        variance += px * px + py * py;
        dot += px * qx + py * qy;
        cross += px * qy - py * qx;
    }

    if variance < 1e-8 {
        // Degenerate landmarks (all coincident): identity transform.
        return [1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
    }

    let a = dot / variance;
    let b = cross / variance;
    let tx = dst_cx - (a * src_cx - b * src_cy);
    let ty = dst_cy - (b * src_cx + a * src_cy);
    [a, -b, tx, b, a, ty]
}

/// Inverse-map each output pixel through the transform and sample the
/// source bilinearly. Pixels outside the frame come out black.
fn warp(image: &RgbImage, transform: &Transform, size: u32) -> RgbImage {
    let (a, tx, b, ty) = (transform[0], transform[2], transform[3], transform[5]);
    let mut out = RgbImage::new(size, size);

    // Invert the 2×2 rotation-scale block; det = a² + b².
    let det = a * a + b * b;
    if det < 1e-12 {
        return out;
    }
    let inv_a = a / det;
    let inv_b = b / det;

    let (width, height) = image.dimensions();
    for (ox, oy, pixel) in out.enumerate_pixels_mut() {
        let rx = ox as f32 - tx;
        let ry = oy as f32 - ty;
        let sx = inv_a * rx + inv_b * ry;
        let sy = -inv_b * rx + inv_a * ry;
        pixel.0 = sample_bilinear(image, width, height, sx, sy);
    }
    out
}

fn sample_bilinear(image: &RgbImage, width: u32, height: u32, x: f32, y: f32) -> [u8; 3] {
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let at = |px: i64, py: i64| -> [f32; 3] {
        if px >= 0 && px < width as i64 && py >= 0 && py < height as i64 {
            let p = image.get_pixel(px as u32, py as u32).0;
            [p[0] as f32, p[1] as f32, p[2] as f32]
        } else {
            [0.0; 3]
        }
    };

    let tl = at(x0, y0);
    let tr = at(x0 + 1, y0);
    let bl = at(x0, y0 + 1);
    let br = at(x0 + 1, y0 + 1);

    std::array::from_fn(|c| {
        let top = tl[c] * (1.0 - fx) + tr[c] * fx;
        let bottom = bl[c] * (1.0 - fx) + br[c] * fx;
        (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8
    })
}
