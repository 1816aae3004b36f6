//! Page and preview geometry
//!
//! Page sizes come from the PDF MediaBox (inherited from the page tree when
//! absent on the page). Preview sizes come from the live on-screen element.

use crate::error::{Result, SignError};
use lopdf::{Dictionary, Document, Object, ObjectId};
use serde::{Deserialize, Serialize};

/// Native size of a page in PDF points (1 point = 1/72 inch)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageGeometry {
    /// Lower-left corner of the MediaBox
    pub origin_x: f64,
    pub origin_y: f64,
    pub width: f64,
    pub height: f64,
    /// Page rotation in degrees (0, 90, 180, 270)
    pub rotation: i32,
}

impl PageGeometry {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            origin_x: 0.0,
            origin_y: 0.0,
            width,
            height,
            rotation: 0,
        }
    }

    pub fn aspect_ratio(&self) -> f64 {
        self.width / self.height
    }

    /// Read the geometry of a zero-based page index
    pub fn from_document(doc: &Document, page_index: usize) -> Result<Self> {
        let page_id = page_object_id(doc, page_index)?;
        Self::from_page_id(doc, page_id)
    }

    pub fn from_page_id(doc: &Document, page_id: ObjectId) -> Result<Self> {
        let page_dict = doc
            .get_object(page_id)
            .and_then(|o| o.as_dict())
            .map_err(|e| SignError::Decode(format!("Page is not a dictionary: {}", e)))?;

        let [x1, y1, x2, y2] = inherited(doc, page_dict, b"MediaBox")
            .map(|obj| parse_box_array(doc, obj))
            .transpose()?
            // Default to US Letter size
            .unwrap_or([0.0, 0.0, 612.0, 792.0]);

        let rotation = inherited(doc, page_dict, b"Rotate")
            .and_then(|o| o.as_i64().ok())
            .map(|angle| normalize_rotation(angle as i32))
            .unwrap_or(0);

        Ok(Self {
            origin_x: x1.min(x2),
            origin_y: y1.min(y2),
            width: (x2 - x1).abs(),
            height: (y2 - y1).abs(),
            rotation,
        })
    }

    /// Geometry of every page, in page order
    pub fn all_from_document(doc: &Document) -> Result<Vec<Self>> {
        doc.get_pages()
            .values()
            .map(|id| Self::from_page_id(doc, *id))
            .collect()
    }
}

/// Live bounding rectangle of the preview element, in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PreviewRect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl PreviewRect {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            left: 0.0,
            top: 0.0,
            width,
            height,
        }
    }

    pub fn with_offset(mut self, left: f64, top: f64) -> Self {
        self.left = left;
        self.top = top;
        self
    }

    /// Reject zero, negative or non-finite sizes before any division
    pub fn ensure_usable(&self) -> Result<()> {
        if is_usable(self.width) && is_usable(self.height) {
            Ok(())
        } else {
            Err(SignError::DegenerateGeometry {
                width: self.width,
                height: self.height,
            })
        }
    }

    /// Convert a viewport pointer position into element-local coordinates
    pub fn to_local(&self, client_x: f64, client_y: f64) -> (f64, f64) {
        (client_x - self.left, client_y - self.top)
    }

    pub fn contains_local(&self, x: f64, y: f64) -> bool {
        x >= 0.0 && y >= 0.0 && x <= self.width && y <= self.height
    }
}

/// Source of the preview element's current geometry
///
/// Implementations must read the live layout on every call; the geometry can
/// change between interactions.
pub trait PreviewSource {
    fn preview_rect(&self) -> Option<PreviewRect>;
}

impl PreviewSource for PreviewRect {
    fn preview_rect(&self) -> Option<PreviewRect> {
        Some(*self)
    }
}

impl<F> PreviewSource for F
where
    F: Fn() -> Option<PreviewRect>,
{
    fn preview_rect(&self) -> Option<PreviewRect> {
        self()
    }
}

pub(crate) fn is_usable(v: f64) -> bool {
    v.is_finite() && v > 0.0
}

/// Object id for a zero-based page index
pub(crate) fn page_object_id(doc: &Document, page_index: usize) -> Result<ObjectId> {
    let pages = doc.get_pages();
    let page_count = pages.len();
    // get_pages is keyed by 1-based page number
    u32::try_from(page_index)
        .ok()
        .and_then(|n| n.checked_add(1))
        .and_then(|number| pages.get(&number).copied())
        .ok_or(SignError::PageIndex {
            index: page_index,
            page_count,
        })
}

/// Look up a key on the page, walking up the Parent chain for inheritable entries
pub(crate) fn inherited<'a>(doc: &'a Document, page_dict: &'a Dictionary, key: &[u8]) -> Option<&'a Object> {
    let mut dict = page_dict;
    // Guard against cyclic Parent references
    for _ in 0..32 {
        if let Ok(value) = dict.get(key) {
            return Some(value);
        }
        let parent_id = dict.get(b"Parent").and_then(|p| p.as_reference()).ok()?;
        dict = doc.get_object(parent_id).and_then(|o| o.as_dict()).ok()?;
    }
    None
}

/// Parse a box array [x1, y1, x2, y2]
fn parse_box_array(doc: &Document, obj: &Object) -> Result<[f64; 4]> {
    let resolved = match obj {
        Object::Reference(id) => doc.get_object(*id)?,
        other => other,
    };
    let array = resolved
        .as_array()
        .map_err(|_| SignError::Decode("MediaBox is not an array".to_string()))?;
    if array.len() != 4 {
        return Err(SignError::Decode(
            "MediaBox must have 4 elements".to_string(),
        ));
    }

    let mut result = [0.0; 4];
    for (i, obj) in array.iter().enumerate() {
        result[i] = obj_to_f64(obj).ok_or_else(|| {
            SignError::Decode(format!("MediaBox element {} is not a number", i))
        })?;
    }
    Ok(result)
}

/// Follow a single indirect reference, returning the object itself otherwise
pub(crate) fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Object> {
    match obj {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

pub(crate) fn obj_to_f64(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(n) => Some(*n as f64),
        Object::Real(n) => Some(*n as f64),
        _ => None,
    }
}

/// Normalize rotation to 0, 90, 180, or 270
fn normalize_rotation(angle: i32) -> i32 {
    angle.rem_euclid(360)
}
