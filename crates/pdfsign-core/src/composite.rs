//! Draw a signature bitmap onto one page of a PDF
//!
//! The bitmap becomes an 8-bit DeviceRGB image XObject with a DeviceGray soft
//! mask carrying its alpha. The page's existing content is wrapped in `q`/`Q`
//! so any unbalanced graphics state it leaves behind cannot shift the
//! signature, then `q w 0 0 h x y cm /Name Do Q` is appended. Other pages'
//! content streams are not touched.

use crate::coords::PdfRect;
use crate::error::{Result, SignError};
use crate::geometry::{inherited, is_usable, page_object_id, resolve};
use crate::signature::decode_signature;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use image::RgbaImage;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use std::io::Write;

/// Prefix for the XObject resource names this module adds
const RESOURCE_PREFIX: &str = "Sig";

/// Composite `signature` onto page `page_index` of `pdf_bytes` at `rect`
///
/// Returns the bytes of the new document; the input is not modified.
pub fn composite_signature(
    pdf_bytes: &[u8],
    signature: &RgbaImage,
    page_index: usize,
    rect: &PdfRect,
) -> Result<Vec<u8>> {
    if pdf_bytes.is_empty() {
        return Err(SignError::Decode("Empty document".into()));
    }
    let mut doc = Document::load_mem(pdf_bytes)
        .map_err(|e| SignError::Decode(format!("Failed to parse PDF: {}", e)))?;

    let name = composite_into(&mut doc, signature, page_index, rect)?;
    tracing::info!(
        page_index,
        resource = %name,
        x = rect.x,
        y = rect.y,
        width = rect.width,
        height = rect.height,
        "signature composited"
    );

    doc.compress();
    let mut out = Vec::new();
    doc.save_to(&mut out)
        .map_err(|e| SignError::Embed(format!("Failed to save PDF: {}", e)))?;
    Ok(out)
}

/// Same as `composite_signature`, with the signature given as encoded image bytes
pub fn composite_signature_bytes(
    pdf_bytes: &[u8],
    signature_bytes: &[u8],
    page_index: usize,
    rect: &PdfRect,
) -> Result<Vec<u8>> {
    let signature = decode_signature(signature_bytes).map_err(|e| match e {
        SignError::Decode(msg) => SignError::Embed(msg),
        other => other,
    })?;
    composite_signature(pdf_bytes, &signature, page_index, rect)
}

/// Embed the signature into an already parsed document
///
/// Returns the resource name the image was registered under.
pub fn composite_into(
    doc: &mut Document,
    signature: &RgbaImage,
    page_index: usize,
    rect: &PdfRect,
) -> Result<String> {
    if signature.width() == 0 || signature.height() == 0 {
        return Err(SignError::Embed("Signature image is empty".into()));
    }
    if !is_usable(rect.width) || !is_usable(rect.height) || !rect.x.is_finite() || !rect.y.is_finite()
    {
        return Err(SignError::DegenerateGeometry {
            width: rect.width,
            height: rect.height,
        });
    }

    let page_id = page_object_id(doc, page_index)?;
    let image_id = add_image_xobject(doc, signature)?;
    let name = register_xobject(doc, page_id, image_id)?;
    append_draw_ops(doc, page_id, &name, rect)?;
    Ok(name)
}

fn flate(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .and_then(|_| encoder.finish())
        .map_err(|e| SignError::Embed(format!("Failed to compress image data: {}", e)))
}

/// Split RGBA into an RGB image XObject plus a gray soft mask
fn add_image_xobject(doc: &mut Document, signature: &RgbaImage) -> Result<ObjectId> {
    let (width, height) = signature.dimensions();
    let pixels = (width as usize) * (height as usize);
    let mut rgb = Vec::with_capacity(pixels * 3);
    let mut alpha = Vec::with_capacity(pixels);
    for pixel in signature.pixels() {
        let [r, g, b, a] = pixel.0;
        rgb.extend_from_slice(&[r, g, b]);
        alpha.push(a);
    }

    let smask_id = doc.add_object(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width as i64,
            "Height" => height as i64,
            "ColorSpace" => "DeviceGray",
            "BitsPerComponent" => 8,
            "Filter" => "FlateDecode",
        },
        flate(&alpha)?,
    ));

    Ok(doc.add_object(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width as i64,
            "Height" => height as i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
            "Filter" => "FlateDecode",
            "SMask" => smask_id,
        },
        flate(&rgb)?,
    )))
}

/// Add the image to the page's XObject resources under an unused name
///
/// Resources shared with other pages (by reference or inheritance) are
/// copied onto the page first, so other pages see no change.
fn register_xobject(doc: &mut Document, page_id: ObjectId, image_id: ObjectId) -> Result<String> {
    let mut resources = {
        let page_dict = doc.get_dictionary(page_id)?;
        inherited(doc, page_dict, b"Resources")
            .and_then(|o| resolve(doc, o))
            .and_then(|o| o.as_dict().ok())
            .cloned()
            .unwrap_or_default()
    };

    let mut xobjects = resources
        .get(b"XObject")
        .ok()
        .and_then(|o| resolve(doc, o))
        .and_then(|o| o.as_dict().ok())
        .cloned()
        .unwrap_or_default();

    let name = (1..)
        .map(|n| format!("{}{}", RESOURCE_PREFIX, n))
        .find(|candidate| !xobjects.has(candidate.as_bytes()))
        .unwrap_or_else(|| RESOURCE_PREFIX.to_string());

    xobjects.set(name.as_bytes().to_vec(), Object::Reference(image_id));
    resources.set("XObject", Object::Dictionary(xobjects));

    let page_dict = doc
        .get_object_mut(page_id)
        .and_then(|o| o.as_dict_mut())
        .map_err(|e| SignError::Embed(format!("Page is not a dictionary: {}", e)))?;
    page_dict.set("Resources", Object::Dictionary(resources));
    Ok(name)
}

/// Current content stream references of a page, in order
fn page_content_refs(doc: &Document, page_dict: &Dictionary) -> Vec<Object> {
    match page_dict.get(b"Contents") {
        Ok(Object::Reference(id)) => match doc.get_object(*id) {
            Ok(Object::Array(items)) => items.clone(),
            Ok(_) => vec![Object::Reference(*id)],
            Err(_) => Vec::new(),
        },
        Ok(Object::Array(items)) => items.clone(),
        _ => Vec::new(),
    }
}

fn encode_ops(operations: Vec<Operation>) -> Result<Vec<u8>> {
    Content { operations }
        .encode()
        .map_err(|e| SignError::Embed(format!("Failed to encode content: {}", e)))
}

fn append_draw_ops(doc: &mut Document, page_id: ObjectId, name: &str, rect: &PdfRect) -> Result<()> {
    let existing = {
        let page_dict = doc.get_dictionary(page_id)?;
        page_content_refs(doc, page_dict)
    };

    // Streams are concatenated on rendering; the newlines keep `q` and `Q`
    // from fusing with the page's first or last token
    let mut prefix = encode_ops(vec![Operation::new("q", vec![])])?;
    prefix.push(b'\n');
    let mut suffix = b"\n".to_vec();
    suffix.extend(encode_ops(vec![
        Operation::new("Q", vec![]),
        Operation::new("q", vec![]),
        Operation::new(
            "cm",
            vec![
                Object::Real(rect.width as f32),
                Object::Integer(0),
                Object::Integer(0),
                Object::Real(rect.height as f32),
                Object::Real(rect.x as f32),
                Object::Real(rect.y as f32),
            ],
        ),
        Operation::new("Do", vec![Object::Name(name.as_bytes().to_vec())]),
        Operation::new("Q", vec![]),
    ])?);

    let prefix_id = doc.add_object(Stream::new(Dictionary::new(), prefix));
    let suffix_id = doc.add_object(Stream::new(Dictionary::new(), suffix));

    let mut contents = Vec::with_capacity(existing.len() + 2);
    contents.push(Object::Reference(prefix_id));
    contents.extend(existing);
    contents.push(Object::Reference(suffix_id));

    let page_dict = doc
        .get_object_mut(page_id)
        .and_then(|o| o.as_dict_mut())
        .map_err(|e| SignError::Embed(format!("Page is not a dictionary: {}", e)))?;
    page_dict.set("Contents", Object::Array(contents));
    Ok(())
}
