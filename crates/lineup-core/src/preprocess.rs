//! Illumination normalization for extraction inputs.
//!
//! Converts to Lab, applies contrast-limited adaptive histogram
//! equalization (CLAHE) to the lightness channel only, converts back.
//! Registration and recognition inputs both run through this when enabled,
//! so gallery and query embeddings are extracted under matching lighting
//! conditions; applying it to one side only silently degrades match
//! quality.

use image::RgbImage;

const CLAHE_TILES: usize = 8;
const CLAHE_CLIP_LIMIT: f32 = 2.0;

/// Equalize local contrast on the lightness channel, leaving the color
/// channels untouched.
pub fn normalize_illumination(image: &RgbImage) -> RgbImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return image.clone();
    }

    let pixels = (width * height) as usize;
    let mut lightness = vec![0u8; pixels];
    let mut chroma = vec![(0.0f32, 0.0f32); pixels];
    for (i, p) in image.pixels().enumerate() {
        let (l, a, b) = rgb_to_lab(p[0], p[1], p[2]);
        lightness[i] = (l * 255.0 / 100.0).round().clamp(0.0, 255.0) as u8;
        chroma[i] = (a, b);
    }

    let equalized = clahe(&lightness, width as usize, height as usize);

    let mut out = RgbImage::new(width, height);
    for (i, p) in out.pixels_mut().enumerate() {
        let l = equalized[i] as f32 * 100.0 / 255.0;
        let (a, b) = chroma[i];
        p.0 = lab_to_rgb(l, a, b);
    }
    out
}

/// CLAHE over an 8-bit plane: per-tile clip-limited histogram equalization
/// with bilinear interpolation between neighboring tile mappings.
fn clahe(plane: &[u8], width: usize, height: usize) -> Vec<u8> {
    let tiles_x = CLAHE_TILES.min(width);
    let tiles_y = CLAHE_TILES.min(height);
    let tile_w = width.div_ceil(tiles_x);
    let tile_h = height.div_ceil(tiles_y);

    // One equalization LUT per tile.
    let mut luts = vec![[0u8; 256]; tiles_x * tiles_y];
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let x1 = (x0 + tile_w).min(width);
            let y1 = (y0 + tile_h).min(height);

            let mut hist = [0u32; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[plane[y * width + x] as usize] += 1;
                }
            }
            let count = ((x1 - x0) * (y1 - y0)) as u32;
            clip_histogram(&mut hist, count);

            let lut = &mut luts[ty * tiles_x + tx];
            let mut cdf = 0u32;
            for (value, bin) in hist.iter().enumerate() {
                cdf += bin;
                lut[value] = ((cdf as f32 / count as f32) * 255.0).round() as u8;
            }
        }
    }

    // Blend the four nearest tile mappings per pixel to avoid visible tile
    // seams.
    let mut out = vec![0u8; plane.len()];
    for y in 0..height {
        let gy = (y as f32 + 0.5) / tile_h as f32 - 0.5;
        let ty0 = gy.floor() as i32;
        let wy = (gy - ty0 as f32).clamp(0.0, 1.0);
        let ty1 = (ty0 + 1).clamp(0, tiles_y as i32 - 1) as usize;
        let ty0 = ty0.clamp(0, tiles_y as i32 - 1) as usize;

        for x in 0..width {
            let gx = (x as f32 + 0.5) / tile_w as f32 - 0.5;
            let tx0 = gx.floor() as i32;
            let wx = (gx - tx0 as f32).clamp(0.0, 1.0);
            let tx1 = (tx0 + 1).clamp(0, tiles_x as i32 - 1) as usize;
            let tx0 = tx0.clamp(0, tiles_x as i32 - 1) as usize;

            let v = plane[y * width + x] as usize;
            let top = luts[ty0 * tiles_x + tx0][v] as f32 * (1.0 - wx)
                + luts[ty0 * tiles_x + tx1][v] as f32 * wx;
            let bottom = luts[ty1 * tiles_x + tx0][v] as f32 * (1.0 - wx)
                + luts[ty1 * tiles_x + tx1][v] as f32 * wx;
            out[y * width + x] = (top * (1.0 - wy) + bottom * wy).round() as u8;
        }
    }
    out
}

/// Clip histogram bins at the CLAHE limit and spread the excess evenly, so
/// near-uniform tiles do not get their noise amplified into full contrast.
fn clip_histogram(hist: &mut [u32; 256], count: u32) {
    let limit = ((CLAHE_CLIP_LIMIT * count as f32 / 256.0).max(1.0)) as u32;
    let mut excess = 0u32;
    for bin in hist.iter_mut() {
        if *bin > limit {
            excess += *bin - limit;
            *bin = limit;
        }
    }
    let per_bin = excess / 256;
    let mut remainder = excess % 256;
    for bin in hist.iter_mut() {
        *bin += per_bin;
        if remainder > 0 {
            *bin += 1;
            remainder -= 1;
        }
    }
}

// sRGB ↔ CIELAB under the D65 white point.

fn srgb_to_linear(c: f32) -> f32 {
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

fn linear_to_srgb(c: f32) -> f32 {
    if c <= 0.003_130_8 {
        12.92 * c
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    }
}

fn rgb_to_lab(r: u8, g: u8, b: u8) -> (f32, f32, f32) {
    let r = srgb_to_linear(r as f32 / 255.0);
    let g = srgb_to_linear(g as f32 / 255.0);
    let b = srgb_to_linear(b as f32 / 255.0);

    let x = 0.412_456_4 * r + 0.357_576_1 * g + 0.180_437_5 * b;
    let y = 0.212_672_9 * r + 0.715_152_2 * g + 0.072_175 * b;
    let z = 0.019_333_9 * r + 0.119_192 * g + 0.950_304_1 * b;

    let f = |t: f32| {
        if t > 0.008_856 {
            t.cbrt()
        } else {
            7.787 * t + 16.0 / 116.0
        }
    };
    let fx = f(x / 0.950_47);
    let fy = f(y);
    let fz = f(z / 1.088_83);

    (116.0 * fy - 16.0, 500.0 * (fx - fy), 200.0 * (fy - fz))
}

fn lab_to_rgb(l: f32, a: f32, b: f32) -> [u8; 3] {
    let fy = (l + 16.0) / 116.0;
    let fx = fy + a / 500.0;
    let fz = fy - b / 200.0;

    let f_inv = |t: f32| {
        let t3 = t * t * t;
        if t3 > 0.008_856 {
            t3
        } else {
            (t - 16.0 / 116.0) / 7.787
        }
    };
    let x = 0.950_47 * f_inv(fx);
    let y = f_inv(fy);
    let z = 1.088_83 * f_inv(fz);

    let r = 3.240_454_2 * x - 1.537_138_5 * y - 0.498_531_4 * z;
    let g = -0.969_266 * x + 1.876_010_8 * y + 0.041_556 * z;
    let b = 0.055_643_4 * x - 0.204_025_9 * y + 1.057_225_2 * z;

    let to8 = |c: f32| (linear_to_srgb(c.clamp(0.0, 1.0)) * 255.0).round() as u8;
    [to8(r), to8(g), to8(b)]
}
