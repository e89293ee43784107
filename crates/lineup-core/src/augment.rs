//! Synthetic registration variants: mirror and brightness shifts.
//!
//! Brightness is scaled multiplicatively on the value channel of the HSV
//! representation, so hue and saturation survive the shift and highlights
//! clamp instead of washing out the whole image.

use image::{imageops, RgbImage};

const BRIGHTEN_FACTOR: f32 = 1.1;
const DARKEN_FACTOR: f32 = 0.9;

/// The four registration variants of one source image: the original, a
/// horizontal mirror, a brightened copy, and a darkened copy.
pub fn variants(image: &RgbImage) -> Vec<RgbImage> {
    vec![
        image.clone(),
        imageops::flip_horizontal(image),
        scale_brightness(image, BRIGHTEN_FACTOR),
        scale_brightness(image, DARKEN_FACTOR),
    ]
}

/// Multiply the HSV value channel by `factor`, clamping to the valid range.
pub fn scale_brightness(image: &RgbImage, factor: f32) -> RgbImage {
    let mut out = image.clone();
    for pixel in out.pixels_mut() {
        let [r, g, b] = pixel.0;
        let (h, s, v) = rgb_to_hsv(r, g, b);
        pixel.0 = hsv_to_rgb(h, s, (v * factor).clamp(0.0, 1.0));
    }
    out
}

/// RGB → HSV with hue in degrees [0, 360), saturation and value in [0, 1].
fn rgb_to_hsv(r: u8, g: u8, b: u8) -> (f32, f32, f32) {
    let r = r as f32 / 255.0;
    let g = g as f32 / 255.0;
    let b = b as f32 / 255.0;

    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let h = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * ((g - b) / delta).rem_euclid(6.0)
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    let s = if max == 0.0 { 0.0 } else { delta / max };
    (h, s, max)
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> [u8; 3] {
    let c = v * s;
    let hp = h / 60.0;
    let x = c * (1.0 - (hp % 2.0 - 1.0).abs());
    let (r1, g1, b1) = match hp as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = v - c;
    [
        ((r1 + m) * 255.0).round() as u8,
        ((g1 + m) * 255.0).round() as u8,
        ((b1 + m) * 255.0).round() as u8,
    ]
}
