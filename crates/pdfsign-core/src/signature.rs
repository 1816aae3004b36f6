//! Signature bitmaps: drawn on the pad or uploaded and matted
//!
//! The canonical in-memory form is 8-bit RGBA; PNG is the interchange form
//! handed to the UI and to the compositor.

use crate::error::{Result, SignError};
use crate::matting::apply_threshold;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// Ink colour for drawn signatures
const INK: Rgba<u8> = Rgba([0, 0, 0, 255]);
const PAPER: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Pen diameter in pixels for the signature pad
pub const DEFAULT_PEN_WIDTH: f64 = 2.5;

/// One continuous pen-down movement on the signature pad, in pad pixels
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    pub points: Vec<(f64, f64)>,
}

impl Stroke {
    pub fn new(points: Vec<(f64, f64)>) -> Self {
        Self { points }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SignatureSource {
    Drawn,
    Uploaded { threshold: u8 },
}

/// The active signature
///
/// Uploaded signatures keep the decoded original so the threshold can be
/// changed without re-uploading.
#[derive(Debug, Clone)]
pub struct SignatureBitmap {
    source: SignatureSource,
    original: RgbaImage,
    image: RgbaImage,
}

impl SignatureBitmap {
    /// A signature drawn on the pad, used as-is
    pub fn drawn(image: RgbaImage) -> Result<Self> {
        ensure_non_empty(&image)?;
        Ok(Self {
            source: SignatureSource::Drawn,
            original: image.clone(),
            image,
        })
    }

    /// A drawn signature handed over as encoded image bytes (e.g. canvas PNG)
    pub fn drawn_from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::drawn(decode_signature(bytes)?)
    }

    /// An uploaded image, matted at `threshold`
    pub fn uploaded(mime: &str, bytes: &[u8], threshold: u8) -> Result<Self> {
        check_image_mime(mime)?;
        let original = decode_signature(bytes)?;
        ensure_non_empty(&original)?;
        let image = apply_threshold(&original, threshold);
        tracing::debug!(
            width = original.width(),
            height = original.height(),
            threshold,
            "uploaded signature decoded"
        );
        Ok(Self {
            source: SignatureSource::Uploaded { threshold },
            original,
            image,
        })
    }

    /// Re-matte an uploaded signature from its original pixels
    ///
    /// Drawn signatures are never matted; the call is a no-op for them.
    pub fn set_threshold(&mut self, threshold: u8) {
        if let SignatureSource::Uploaded { threshold: current } = self.source {
            if current != threshold {
                self.image = apply_threshold(&self.original, threshold);
                self.source = SignatureSource::Uploaded { threshold };
            }
        }
    }

    pub fn source(&self) -> SignatureSource {
        self.source
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn to_png(&self) -> Result<Vec<u8>> {
        encode_png(&self.image)
    }
}

/// Decode any supported raster (PNG, JPEG, WebP, GIF, BMP) to RGBA
pub fn decode_signature(bytes: &[u8]) -> Result<RgbaImage> {
    if bytes.is_empty() {
        return Err(SignError::Decode("Empty image data".into()));
    }
    let decoded = image::load_from_memory(bytes)
        .map_err(|e| SignError::Decode(format!("Failed to decode image: {}", e)))?;
    Ok(decoded.to_rgba8())
}

pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    DynamicImage::ImageRgba8(image.clone())
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .map_err(|e| SignError::Embed(format!("Failed to encode PNG: {}", e)))?;
    Ok(out)
}

/// Declared upload type must be an image
pub fn check_image_mime(mime: &str) -> Result<()> {
    if mime.trim().to_ascii_lowercase().starts_with("image/") {
        Ok(())
    } else {
        Err(SignError::Validation(format!(
            "Invalid file type '{}': please upload an image file",
            mime
        )))
    }
}

fn ensure_non_empty(image: &RgbaImage) -> Result<()> {
    if image.width() == 0 || image.height() == 0 {
        return Err(SignError::Validation("No signature found".into()));
    }
    Ok(())
}

/// Rasterize pad strokes as opaque ink on white paper
///
/// Each segment is stamped with round pen disks so joints and caps come out
/// rounded. Returns a `Validation` error when there is nothing to draw.
pub fn render_strokes(
    strokes: &[Stroke],
    width: u32,
    height: u32,
    pen_width: f64,
) -> Result<RgbaImage> {
    if width == 0 || height == 0 {
        return Err(SignError::DegenerateGeometry {
            width: width as f64,
            height: height as f64,
        });
    }
    if strokes.iter().all(|s| s.points.is_empty()) {
        return Err(SignError::Validation(
            "No signature found: please draw your signature first".into(),
        ));
    }

    let mut canvas = RgbaImage::from_pixel(width, height, PAPER);
    let radius = (pen_width / 2.0).max(0.5);

    for stroke in strokes {
        let mut points = stroke
            .points
            .iter()
            .copied()
            .filter(|(x, y)| x.is_finite() && y.is_finite());
        let Some(mut prev) = points.next() else {
            continue;
        };
        stamp_disk(&mut canvas, prev, radius);
        for next in points {
            draw_segment(&mut canvas, prev, next, radius);
            prev = next;
        }
    }

    Ok(canvas)
}

fn draw_segment(canvas: &mut RgbaImage, from: (f64, f64), to: (f64, f64), radius: f64) {
    let (dx, dy) = (to.0 - from.0, to.1 - from.1);
    let length = (dx * dx + dy * dy).sqrt();
    // Stamp at half-radius spacing so the line has no gaps
    let steps = ((length / (radius * 0.5)).ceil() as usize).max(1);
    for i in 1..=steps {
        let t = i as f64 / steps as f64;
        stamp_disk(canvas, (from.0 + dx * t, from.1 + dy * t), radius);
    }
}

fn stamp_disk(canvas: &mut RgbaImage, center: (f64, f64), radius: f64) {
    let (w, h) = (canvas.width() as i64, canvas.height() as i64);
    let x0 = ((center.0 - radius).floor() as i64).max(0);
    let x1 = ((center.0 + radius).ceil() as i64).min(w - 1);
    let y0 = ((center.1 - radius).floor() as i64).max(0);
    let y1 = ((center.1 + radius).ceil() as i64).min(h - 1);
    let r2 = radius * radius;

    for y in y0..=y1 {
        for x in x0..=x1 {
            let px = x as f64 + 0.5 - center.0;
            let py = y as f64 + 0.5 - center.1;
            if px * px + py * py <= r2 {
                canvas.put_pixel(x as u32, y as u32, INK);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn png_of(image: &RgbaImage) -> Vec<u8> {
        encode_png(image).unwrap()
    }

    #[test]
    fn test_decode_png_to_rgba() {
        let image = RgbaImage::from_pixel(3, 2, Rgba([10, 20, 30, 255]));
        let decoded = decode_signature(&png_of(&image)).unwrap();
        assert_eq!(decoded.dimensions(), (3, 2));
        assert_eq!(decoded.get_pixel(2, 1).0, [10, 20, 30, 255]);
    }

    #[test]
    fn test_decode_garbage_is_decode_error() {
        let err = decode_signature(b"not an image").unwrap_err();
        assert_eq!(err.kind(), "decode");
        assert!(decode_signature(&[]).is_err());
    }

    #[test]
    fn test_mime_check() {
        assert!(check_image_mime("image/png").is_ok());
        assert!(check_image_mime("IMAGE/JPEG").is_ok());
        assert!(check_image_mime("application/pdf").is_err());
        assert!(check_image_mime("").is_err());
    }

    #[test]
    fn test_uploaded_signature_is_matted() {
        let mut image = RgbaImage::from_pixel(2, 1, Rgba([255, 255, 255, 255]));
        image.put_pixel(1, 0, Rgba([0, 0, 0, 255]));

        let sig = SignatureBitmap::uploaded("image/png", &png_of(&image), 240).unwrap();
        assert_eq!(sig.image().get_pixel(0, 0).0[3], 0);
        assert_eq!(sig.image().get_pixel(1, 0).0[3], 255);
        assert_eq!(sig.source(), SignatureSource::Uploaded { threshold: 240 });
    }

    #[test]
    fn test_threshold_change_remattes_from_original() {
        let image = RgbaImage::from_pixel(1, 1, Rgba([200, 200, 200, 255]));
        let mut sig = SignatureBitmap::uploaded("image/png", &png_of(&image), 150).unwrap();
        assert_eq!(sig.image().get_pixel(0, 0).0[3], 0);

        // Raising the threshold restores the pixel since the original is kept
        sig.set_threshold(250);
        assert_eq!(sig.image().get_pixel(0, 0).0[3], 255);
    }

    #[test]
    fn test_drawn_signature_ignores_threshold() {
        let image = RgbaImage::from_pixel(1, 1, PAPER);
        let mut sig = SignatureBitmap::drawn(image).unwrap();
        sig.set_threshold(0);
        assert_eq!(sig.image().get_pixel(0, 0).0[3], 255);
        assert_eq!(sig.source(), SignatureSource::Drawn);
    }

    #[test]
    fn test_render_strokes_draws_ink_on_white() {
        let strokes = vec![Stroke::new(vec![(2.0, 5.0), (18.0, 5.0)])];
        let image = render_strokes(&strokes, 20, 10, DEFAULT_PEN_WIDTH).unwrap();

        assert_eq!(image.get_pixel(10, 5).0, [0, 0, 0, 255]);
        assert_eq!(image.get_pixel(10, 0).0, [255, 255, 255, 255]);
        assert_eq!(image.get_pixel(0, 9).0, [255, 255, 255, 255]);
    }

    #[test]
    fn test_render_single_point_stroke_is_a_dot() {
        let strokes = vec![Stroke::new(vec![(5.0, 5.0)])];
        let image = render_strokes(&strokes, 10, 10, 4.0).unwrap();
        assert_eq!(image.get_pixel(5, 5).0, [0, 0, 0, 255]);
    }

    #[test]
    fn test_render_without_strokes_fails() {
        let err = render_strokes(&[], 20, 10, DEFAULT_PEN_WIDTH).unwrap_err();
        assert_eq!(err.kind(), "validation");

        let err = render_strokes(&[Stroke::default()], 20, 10, DEFAULT_PEN_WIDTH).unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn test_strokes_outside_canvas_are_clipped() {
        let strokes = vec![Stroke::new(vec![(-50.0, -50.0), (100.0, 100.0)])];
        let image = render_strokes(&strokes, 10, 10, DEFAULT_PEN_WIDTH).unwrap();
        assert_eq!(image.get_pixel(5, 5).0, [0, 0, 0, 255]);
    }
}
