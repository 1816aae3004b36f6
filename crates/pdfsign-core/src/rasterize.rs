//! Page previews
//!
//! The browser build renders pages with pdf.js and only asks Rust for
//! metadata, so rasterization sits behind the `Rasterizer` trait. The built-in
//! `PreviewRasterizer` draws the subset of PDF graphics the signing flow
//! produces and inspects: filled rectangles and image XObjects, including
//! those nested in Form XObjects. Text is not drawn, so its bitmaps are not a
//! substitute for the pdf.js display.
//!
//! Rendering is deterministic: the same page content always yields the same
//! pixels.

use crate::config::SignConfig;
use crate::error::{Result, SignError};
use crate::geometry::{inherited, obj_to_f64, page_object_id, resolve, PageGeometry};
use crate::signature::encode_png;
use flate2::read::ZlibDecoder;
use image::{ImageFormat, Rgba, RgbaImage};
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use std::collections::HashSet;
use std::io::Read;

/// Largest canvas edge in pixels
const MAX_CANVAS_EDGE: u32 = 8192;

/// Form XObjects nested deeper than this are skipped
const MAX_FORM_DEPTH: usize = 16;

const PAPER: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// One rendered page
#[derive(Debug, Clone, PartialEq)]
pub struct PageBitmap {
    /// Zero-based page index
    pub page_index: usize,
    pub image: RgbaImage,
}

impl PageBitmap {
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

/// Turns document pages into previews
pub trait Rasterizer {
    /// Render a single page of a parsed document
    fn rasterize_page(&self, doc: &Document, page_index: usize) -> Result<PageBitmap>;

    /// One bitmap per page, in document order
    ///
    /// Holds every page in memory at once; interactive callers should render
    /// the displayed page with `rasterize_page` instead. Returns
    /// `SignError::Decode` for empty or corrupt input.
    fn rasterize(&self, bytes: &[u8]) -> Result<Vec<PageBitmap>> {
        let doc = load_for_render(bytes)?;
        (0..doc.get_pages().len())
            .map(|index| self.rasterize_page(&doc, index))
            .collect()
    }
}

fn load_for_render(bytes: &[u8]) -> Result<Document> {
    if bytes.is_empty() {
        return Err(SignError::Decode("Empty document".into()));
    }
    Document::load_mem(bytes).map_err(|e| SignError::Decode(format!("Failed to parse PDF: {}", e)))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreviewRasterizer {
    scale: f64,
}

impl Default for PreviewRasterizer {
    fn default() -> Self {
        Self { scale: 1.0 }
    }
}

impl Rasterizer for PreviewRasterizer {
    fn rasterize_page(&self, doc: &Document, page_index: usize) -> Result<PageBitmap> {
        self.render_page(doc, page_index)
    }

    fn rasterize(&self, bytes: &[u8]) -> Result<Vec<PageBitmap>> {
        self.render_document(&load_for_render(bytes)?)
    }
}

impl PreviewRasterizer {
    /// Rasterizer at `scale` pixels per point; unusable scales fall back to 1.0
    pub fn new(scale: f64) -> Self {
        if scale.is_finite() && scale > 0.0 {
            Self { scale }
        } else {
            Self::default()
        }
    }

    pub fn from_config(config: &SignConfig) -> Self {
        Self::new(config.render_scale)
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn render_document(&self, doc: &Document) -> Result<Vec<PageBitmap>> {
        let pages = doc.get_pages();
        if pages.is_empty() {
            return Err(SignError::Decode("PDF has no pages".into()));
        }
        pages
            .values()
            .enumerate()
            .map(|(index, id)| self.render_page_id(doc, index, *id))
            .collect()
    }

    pub fn render_page(&self, doc: &Document, page_index: usize) -> Result<PageBitmap> {
        let page_id = page_object_id(doc, page_index)?;
        self.render_page_id(doc, page_index, page_id)
    }

    fn render_page_id(
        &self,
        doc: &Document,
        page_index: usize,
        page_id: ObjectId,
    ) -> Result<PageBitmap> {
        let geometry = PageGeometry::from_page_id(doc, page_id)?;
        let width = canvas_edge(geometry.width * self.scale, &geometry)?;
        let height = canvas_edge(geometry.height * self.scale, &geometry)?;

        let content_bytes = doc
            .get_page_content(page_id)
            .map_err(|e| SignError::Decode(format!("Failed to read page content: {}", e)))?;
        let content = Content::decode(&content_bytes)
            .map_err(|e| SignError::Decode(format!("Failed to decode page content: {}", e)))?;

        let page_dict = doc.get_dictionary(page_id)?;
        let resources = inherited(doc, page_dict, b"Resources")
            .and_then(|o| resolve(doc, o))
            .and_then(|o| o.as_dict().ok());

        // User space to device pixels: shift by the MediaBox origin, flip y
        let device = Matrix::new(
            self.scale,
            0.0,
            0.0,
            -self.scale,
            -geometry.origin_x * self.scale,
            (geometry.origin_y + geometry.height) * self.scale,
        );

        let mut painter = Painter {
            doc,
            canvas: RgbaImage::from_pixel(width, height, PAPER),
            device,
            active_forms: HashSet::new(),
        };
        painter.run(&content.operations, resources, GraphicsState::default(), 0);

        tracing::trace!(page_index, width, height, "page rasterized");
        Ok(PageBitmap {
            page_index,
            image: painter.canvas,
        })
    }
}

fn canvas_edge(length: f64, geometry: &PageGeometry) -> Result<u32> {
    if !length.is_finite() || length <= 0.0 {
        return Err(SignError::DegenerateGeometry {
            width: geometry.width,
            height: geometry.height,
        });
    }
    let edge = length.ceil();
    if edge > MAX_CANVAS_EDGE as f64 {
        return Err(SignError::Decode(format!(
            "Page too large to preview ({} x {} points)",
            geometry.width, geometry.height
        )));
    }
    Ok(edge as u32)
}

/// Affine transform `[a b c d e f]` in PDF row-vector convention
#[derive(Debug, Clone, Copy, PartialEq)]
struct Matrix {
    a: f64,
    b: f64,
    c: f64,
    d: f64,
    e: f64,
    f: f64,
}

impl Default for Matrix {
    fn default() -> Self {
        Self::new(1.0, 0.0, 0.0, 1.0, 0.0, 0.0)
    }
}

impl Matrix {
    fn new(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> Self {
        Self { a, b, c, d, e, f }
    }

    fn from_operands(operands: &[Object]) -> Option<Self> {
        let values: Vec<f64> = operands.iter().filter_map(obj_to_f64).collect();
        match values.as_slice() {
            [a, b, c, d, e, f] => Some(Self::new(*a, *b, *c, *d, *e, *f)),
            _ => None,
        }
    }

    /// `self` applied first, then `rhs`
    fn then(self, rhs: Self) -> Self {
        Self {
            a: self.a * rhs.a + self.b * rhs.c,
            b: self.a * rhs.b + self.b * rhs.d,
            c: self.c * rhs.a + self.d * rhs.c,
            d: self.c * rhs.b + self.d * rhs.d,
            e: self.e * rhs.a + self.f * rhs.c + rhs.e,
            f: self.e * rhs.b + self.f * rhs.d + rhs.f,
        }
    }

    fn apply(self, x: f64, y: f64) -> (f64, f64) {
        (
            self.a * x + self.c * y + self.e,
            self.b * x + self.d * y + self.f,
        )
    }

    fn is_axis_aligned(self) -> bool {
        self.b.abs() < 1e-6 && self.c.abs() < 1e-6
    }
}

#[derive(Debug, Clone, Copy)]
struct GraphicsState {
    ctm: Matrix,
    fill: [u8; 3],
}

impl Default for GraphicsState {
    fn default() -> Self {
        Self {
            ctm: Matrix::default(),
            fill: [0, 0, 0],
        }
    }
}

/// Device-space rectangle, half-open on the right and bottom
#[derive(Debug, Clone, Copy)]
struct DeviceRect {
    x0: f64,
    y0: f64,
    x1: f64,
    y1: f64,
}

struct Painter<'a> {
    doc: &'a Document,
    canvas: RgbaImage,
    device: Matrix,
    active_forms: HashSet<ObjectId>,
}

impl<'a> Painter<'a> {
    fn run(
        &mut self,
        operations: &[Operation],
        resources: Option<&'a Dictionary>,
        mut state: GraphicsState,
        depth: usize,
    ) {
        let mut stack: Vec<GraphicsState> = Vec::new();
        let mut path: Vec<DeviceRect> = Vec::new();

        for op in operations {
            match op.operator.as_str() {
                "q" => stack.push(state),
                "Q" => {
                    if let Some(saved) = stack.pop() {
                        state = saved;
                    }
                }
                "cm" => {
                    if let Some(m) = Matrix::from_operands(&op.operands) {
                        state.ctm = m.then(state.ctm);
                    }
                }
                "g" | "rg" | "k" | "sc" | "scn" => {
                    if let Some(color) = fill_color(&op.operands) {
                        state.fill = color;
                    }
                }
                "re" => {
                    let values: Vec<f64> = op.operands.iter().filter_map(obj_to_f64).collect();
                    if let [x, y, w, h] = values.as_slice() {
                        if let Some(rect) = self.device_rect(state.ctm, *x, *y, *w, *h) {
                            path.push(rect);
                        }
                    }
                }
                "f" | "F" | "f*" | "B" | "B*" | "b" | "b*" => {
                    let color = Rgba([state.fill[0], state.fill[1], state.fill[2], 255]);
                    for rect in path.drain(..) {
                        self.fill_rect(rect, color);
                    }
                }
                "n" | "S" | "s" => path.clear(),
                "Do" => {
                    if let Some(name) = op.operands.first().and_then(|o| o.as_name().ok()) {
                        self.draw_xobject(resources, name, state, depth);
                    }
                }
                _ => {}
            }
        }
    }

    fn device_rect(&self, ctm: Matrix, x: f64, y: f64, w: f64, h: f64) -> Option<DeviceRect> {
        let full = ctm.then(self.device);
        if !full.is_axis_aligned() {
            return None;
        }
        let (ax, ay) = full.apply(x, y);
        let (bx, by) = full.apply(x + w, y + h);
        Some(DeviceRect {
            x0: ax.min(bx),
            y0: ay.min(by),
            x1: ax.max(bx),
            y1: ay.max(by),
        })
    }

    /// Pixel ranges whose centers fall inside the rectangle
    fn pixel_span(&self, rect: DeviceRect) -> Option<(u32, u32, u32, u32)> {
        let (w, h) = (self.canvas.width() as f64, self.canvas.height() as f64);
        let x_start = (rect.x0 - 0.5).ceil().max(0.0);
        let x_end = (rect.x1 - 0.5).ceil().min(w);
        let y_start = (rect.y0 - 0.5).ceil().max(0.0);
        let y_end = (rect.y1 - 0.5).ceil().min(h);
        if !(x_start < x_end && y_start < y_end) {
            return None;
        }
        Some((x_start as u32, x_end as u32, y_start as u32, y_end as u32))
    }

    fn fill_rect(&mut self, rect: DeviceRect, color: Rgba<u8>) {
        let Some((x0, x1, y0, y1)) = self.pixel_span(rect) else {
            return;
        };
        for y in y0..y1 {
            for x in x0..x1 {
                self.canvas.put_pixel(x, y, color);
            }
        }
    }

    fn draw_xobject(
        &mut self,
        resources: Option<&'a Dictionary>,
        name: &[u8],
        state: GraphicsState,
        depth: usize,
    ) {
        let doc = self.doc;
        let Some(entry) = resources
            .and_then(|r| r.get(b"XObject").ok())
            .and_then(|o| resolve(doc, o))
            .and_then(|o| o.as_dict().ok())
            .and_then(|d| d.get(name).ok())
        else {
            return;
        };
        let Some(stream) = resolve(doc, entry).and_then(|o| o.as_stream().ok()) else {
            return;
        };

        match stream.dict.get(b"Subtype").and_then(|o| o.as_name()) {
            Ok(b"Image") => match decode_image_xobject(doc, stream) {
                Some(image) => self.draw_image(&image, state.ctm),
                None => tracing::debug!(
                    name = %String::from_utf8_lossy(name),
                    "skipping unsupported image XObject"
                ),
            },
            Ok(b"Form") => {
                let Ok(form_id) = entry.as_reference() else {
                    return;
                };
                if depth >= MAX_FORM_DEPTH || !self.active_forms.insert(form_id) {
                    return;
                }
                self.draw_form(stream, resources, state, depth);
                self.active_forms.remove(&form_id);
            }
            _ => {}
        }
    }

    fn draw_form(
        &mut self,
        stream: &'a Stream,
        parent_resources: Option<&'a Dictionary>,
        mut state: GraphicsState,
        depth: usize,
    ) {
        let doc = self.doc;
        let Some(bytes) = plain_content(stream) else {
            return;
        };
        let Ok(content) = Content::decode(&bytes) else {
            return;
        };
        let form_matrix = stream
            .dict
            .get(b"Matrix")
            .ok()
            .and_then(|o| o.as_array().ok())
            .and_then(|arr| Matrix::from_operands(arr))
            .unwrap_or_default();
        let resources = stream
            .dict
            .get(b"Resources")
            .ok()
            .and_then(|o| resolve(doc, o))
            .and_then(|o| o.as_dict().ok())
            .or(parent_resources);

        state.ctm = form_matrix.then(state.ctm);
        self.run(&content.operations, resources, state, depth + 1);
    }

    /// Paint an image into the unit square mapped by the CTM
    fn draw_image(&mut self, image: &RgbaImage, ctm: Matrix) {
        let full = ctm.then(self.device);
        if !full.is_axis_aligned() || full.a.abs() < 1e-9 || full.d.abs() < 1e-9 {
            return;
        }
        let (ax, ay) = full.apply(0.0, 0.0);
        let (bx, by) = full.apply(1.0, 1.0);
        let rect = DeviceRect {
            x0: ax.min(bx),
            y0: ay.min(by),
            x1: ax.max(bx),
            y1: ay.max(by),
        };
        let Some((x0, x1, y0, y1)) = self.pixel_span(rect) else {
            return;
        };

        let (iw, ih) = (image.width() as f64, image.height() as f64);
        for y in y0..y1 {
            // Unit-square v runs bottom to top; image rows run top to bottom
            let v = (y as f64 + 0.5 - full.f) / full.d;
            let row = (((1.0 - v) * ih).floor()).clamp(0.0, ih - 1.0) as u32;
            for x in x0..x1 {
                let u = (x as f64 + 0.5 - full.e) / full.a;
                let col = ((u * iw).floor()).clamp(0.0, iw - 1.0) as u32;
                let src = image.get_pixel(col, row);
                let dst = self.canvas.get_pixel_mut(x, y);
                *dst = blend(*dst, *src);
            }
        }
    }
}

/// Source-over onto an opaque backdrop
fn blend(dst: Rgba<u8>, src: Rgba<u8>) -> Rgba<u8> {
    let alpha = src.0[3] as u32;
    let mix = |s: u8, d: u8| ((s as u32 * alpha + d as u32 * (255 - alpha) + 127) / 255) as u8;
    Rgba([
        mix(src.0[0], dst.0[0]),
        mix(src.0[1], dst.0[1]),
        mix(src.0[2], dst.0[2]),
        255,
    ])
}

fn unit_to_byte(v: f64) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn cmyk_to_rgb(c: f64, m: f64, y: f64, k: f64) -> [u8; 3] {
    [
        unit_to_byte((1.0 - c) * (1.0 - k)),
        unit_to_byte((1.0 - m) * (1.0 - k)),
        unit_to_byte((1.0 - y) * (1.0 - k)),
    ]
}

/// Non-stroking colour from gray, RGB or CMYK operands
fn fill_color(operands: &[Object]) -> Option<[u8; 3]> {
    let values: Vec<f64> = operands.iter().filter_map(obj_to_f64).collect();
    match values.as_slice() {
        [gray] => {
            let v = unit_to_byte(*gray);
            Some([v, v, v])
        }
        [r, g, b] => Some([unit_to_byte(*r), unit_to_byte(*g), unit_to_byte(*b)]),
        [c, m, y, k] => Some(cmyk_to_rgb(*c, *m, *y, *k)),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ColorModel {
    Gray,
    Rgb,
    Cmyk,
}

impl ColorModel {
    fn channels(self) -> usize {
        match self {
            Self::Gray => 1,
            Self::Rgb => 3,
            Self::Cmyk => 4,
        }
    }

    fn from_name(name: &[u8]) -> Option<Self> {
        match name {
            b"DeviceGray" | b"CalGray" | b"G" => Some(Self::Gray),
            b"DeviceRGB" | b"CalRGB" | b"RGB" => Some(Self::Rgb),
            b"DeviceCMYK" | b"CMYK" => Some(Self::Cmyk),
            _ => None,
        }
    }

    fn from_channel_count(n: i64) -> Option<Self> {
        match n {
            1 => Some(Self::Gray),
            3 => Some(Self::Rgb),
            4 => Some(Self::Cmyk),
            _ => None,
        }
    }

    fn to_rgb(self, px: &[u8]) -> [u8; 3] {
        match self {
            Self::Gray => [px[0], px[0], px[0]],
            Self::Rgb => [px[0], px[1], px[2]],
            Self::Cmyk => cmyk_to_rgb(
                px[0] as f64 / 255.0,
                px[1] as f64 / 255.0,
                px[2] as f64 / 255.0,
                px[3] as f64 / 255.0,
            ),
        }
    }
}

fn color_model(doc: &Document, dict: &Dictionary) -> Option<ColorModel> {
    let Ok(obj) = dict.get(b"ColorSpace") else {
        // Soft masks may omit the colour space
        return Some(ColorModel::Gray);
    };
    match resolve(doc, obj)? {
        Object::Name(name) => ColorModel::from_name(name),
        Object::Array(arr) => {
            let head = arr.first()?.as_name().ok()?;
            if head == b"ICCBased" {
                let profile = resolve(doc, arr.get(1)?)?.as_stream().ok()?;
                let n = profile.dict.get(b"N").ok()?.as_i64().ok()?;
                ColorModel::from_channel_count(n)
            } else {
                ColorModel::from_name(head)
            }
        }
        _ => None,
    }
}

fn filter_names(dict: &Dictionary) -> Vec<&[u8]> {
    match dict.get(b"Filter") {
        Ok(Object::Name(name)) => vec![name.as_slice()],
        Ok(Object::Array(arr)) => arr.iter().filter_map(|o| o.as_name().ok()).collect(),
        _ => Vec::new(),
    }
}

/// Stream data with its filters undone
///
/// lopdf refuses to decompress image streams, so filters are applied here.
/// Only FlateDecode without a predictor is supported.
fn plain_content(stream: &Stream) -> Option<Vec<u8>> {
    let predictor = stream
        .dict
        .get(b"DecodeParms")
        .and_then(|o| o.as_dict())
        .and_then(|d| d.get(b"Predictor"))
        .and_then(|o| o.as_i64())
        .unwrap_or(1);
    let mut data = stream.content.clone();
    for filter in filter_names(&stream.dict) {
        data = match filter {
            b"FlateDecode" | b"Fl" if predictor <= 1 => inflate(&data)?,
            _ => return None,
        };
    }
    Some(data)
}

fn inflate(data: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    ZlibDecoder::new(data).read_to_end(&mut out).ok()?;
    Some(out)
}

fn image_dimensions(dict: &Dictionary) -> Option<(u32, u32)> {
    let dim = |key: &[u8]| {
        dict.get(key)
            .ok()
            .and_then(|o| o.as_i64().ok())
            .and_then(|v| u32::try_from(v).ok())
            .filter(|v| *v > 0)
    };
    Some((dim(b"Width")?, dim(b"Height")?))
}

/// Decode an image XObject (and its soft mask) to RGBA
fn decode_image_xobject(doc: &Document, stream: &Stream) -> Option<RgbaImage> {
    let dict = &stream.dict;
    if matches!(dict.get(b"ImageMask"), Ok(Object::Boolean(true))) {
        return None;
    }

    let filters = filter_names(dict);
    let mut image = match filters.as_slice() {
        [b"DCTDecode"] => image::load_from_memory_with_format(&stream.content, ImageFormat::Jpeg)
            .ok()?
            .to_rgba8(),
        _ => {
            let (width, height) = image_dimensions(dict)?;
            let bpc = dict.get(b"BitsPerComponent").ok().and_then(obj_to_f64);
            if bpc.is_some_and(|b| b != 8.0) {
                return None;
            }
            let model = color_model(doc, dict)?;
            let plain = plain_content(stream)?;
            samples_to_rgba(width, height, model, &plain)?
        }
    };

    if let Some(mask) = dict
        .get(b"SMask")
        .ok()
        .and_then(|o| resolve(doc, o))
        .and_then(|o| o.as_stream().ok())
    {
        if let Some(alpha) = decode_image_xobject(doc, mask) {
            apply_soft_mask(&mut image, &alpha);
        }
    }

    Some(image)
}

fn samples_to_rgba(width: u32, height: u32, model: ColorModel, data: &[u8]) -> Option<RgbaImage> {
    let channels = model.channels();
    let expected = (width as usize)
        .checked_mul(height as usize)?
        .checked_mul(channels)?;
    if data.len() < expected {
        return None;
    }

    let mut rgba = Vec::with_capacity(expected / channels * 4);
    for px in data[..expected].chunks_exact(channels) {
        let [r, g, b] = model.to_rgb(px);
        rgba.extend_from_slice(&[r, g, b, 255]);
    }
    RgbaImage::from_raw(width, height, rgba)
}

/// Use the mask's luminance as alpha, sampled to the image size
fn apply_soft_mask(image: &mut RgbaImage, mask: &RgbaImage) {
    let (iw, ih) = image.dimensions();
    let (mw, mh) = mask.dimensions();
    for (x, y, px) in image.enumerate_pixels_mut() {
        let mx = (x as u64 * mw as u64 / iw as u64) as u32;
        let my = (y as u64 * mh as u64 / ih as u64) as u32;
        px.0[3] = mask.get_pixel(mx, my).0[0];
    }
}
