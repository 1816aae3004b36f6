//! Brightness-threshold matting for signature images
//!
//! Scanned and photographed signatures usually sit on near-white paper. Pixels
//! whose mean RGB brightness exceeds the threshold become fully transparent;
//! everything else is left as-is.

use crate::error::Result;
use crate::signature::{decode_signature, encode_png};
use image::RgbaImage;

/// True when the pixel's mean brightness is strictly above `threshold`
///
/// Compares the channel sum against `3 * threshold` so no rounding is involved.
#[inline]
pub fn is_background(r: u8, g: u8, b: u8, threshold: u8) -> bool {
    u16::from(r) + u16::from(g) + u16::from(b) > 3 * u16::from(threshold)
}

/// Returns a copy of `image` with background pixels made transparent
///
/// RGB values are preserved for every pixel, including the ones whose alpha
/// is zeroed. Existing alpha is kept for foreground pixels.
pub fn apply_threshold(image: &RgbaImage, threshold: u8) -> RgbaImage {
    let mut out = image.clone();
    apply_threshold_in_place(&mut out, threshold);
    out
}

pub fn apply_threshold_in_place(image: &mut RgbaImage, threshold: u8) {
    for pixel in image.pixels_mut() {
        let [r, g, b, _] = pixel.0;
        if is_background(r, g, b, threshold) {
            pixel.0[3] = 0;
        }
    }
}

/// Decode an encoded image, matte it and re-encode as PNG
pub fn matte_png(bytes: &[u8], threshold: u8) -> Result<Vec<u8>> {
    let image = decode_signature(bytes)?;
    encode_png(&apply_threshold(&image, threshold))
}

/// Number of pixels with zero alpha
pub fn transparent_pixel_count(image: &RgbaImage) -> usize {
    image.pixels().filter(|p| p.0[3] == 0).count()
}
