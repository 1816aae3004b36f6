//! Client-side PDF signature placement
//!
//! This crate holds every algorithmic piece of the signing flow, free of any
//! platform dependency:
//! - `rasterize`: page previews behind the `Rasterizer` trait
//! - `placement`: pointer interaction to `{x, y, scale, page_index}`
//! - `coords`: letterbox-aware mapping from the preview element to PDF space
//! - `matting`: brightness-threshold background removal
//! - `composite`: drawing the signature into the document
//! - `session`: the single-writer state holder tying them together

pub mod composite;
pub mod config;
pub mod coords;
pub mod error;
pub mod geometry;
pub mod matting;
pub mod placement;
pub mod rasterize;
pub mod session;
pub mod signature;
pub mod task;
pub mod validation;

pub use composite::{composite_signature, composite_signature_bytes};
pub use config::SignConfig;
pub use coords::{map_placement, LetterboxFit, PdfRect};
pub use error::{Result, SignError};
pub use geometry::{PageGeometry, PreviewRect, PreviewSource};
pub use matting::{apply_threshold, matte_png};
pub use placement::{Gesture, Placement, PlacementObserver, PlacementTracker};
pub use rasterize::{PageBitmap, PreviewRasterizer, Rasterizer};
pub use session::{SignedOutput, SigningSession};
pub use signature::{decode_signature, render_strokes, SignatureBitmap, Stroke};
pub use task::{Generation, TaskOutcome, Ticket};

/// Parse PDF bytes and return page count
pub fn get_page_count(bytes: &[u8]) -> Result<usize> {
    let doc = lopdf::Document::load_mem(bytes).map_err(|e| SignError::Decode(e.to_string()))?;
    Ok(doc.get_pages().len())
}

#[cfg(test)]
pub(crate) mod test_support {
    use lopdf::content::{Content, Operation};
    use lopdf::{Dictionary, Document, Object, Stream};

    /// Create a valid test PDF with `num_pages` US Letter pages
    ///
    /// Each page carries a label and a gray bar at a page-specific height so
    /// rendered pages differ from each other.
    pub fn create_test_pdf(num_pages: u32) -> Vec<u8> {
        let sizes: Vec<(i64, i64)> = (0..num_pages).map(|_| (612, 792)).collect();
        create_test_pdf_with_sizes(&sizes)
    }

    pub fn create_test_pdf_with_sizes(sizes: &[(i64, i64)]) -> Vec<u8> {
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();

        let font_id = doc.add_object(Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Font".to_vec())),
            ("Subtype", Object::Name(b"Type1".to_vec())),
            ("BaseFont", Object::Name(b"Helvetica".to_vec())),
        ]));
        let resources_id = doc.add_object(Dictionary::from_iter(vec![(
            "Font",
            Object::Dictionary(Dictionary::from_iter(vec![("F1", Object::Reference(font_id))])),
        )]));

        let mut page_ids = Vec::new();
        for (i, (width, height)) in sizes.iter().enumerate() {
            let bar_y = 40 + (i as i64 * 30) % (height - 60).max(1);
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec![Object::Name(b"F1".to_vec()), Object::Integer(12)]),
                    Operation::new("Td", vec![Object::Integer(50), Object::Integer(height - 50)]),
                    Operation::new(
                        "Tj",
                        vec![Object::String(
                            format!("Page {}", i + 1).into_bytes(),
                            lopdf::StringFormat::Literal,
                        )],
                    ),
                    Operation::new("ET", vec![]),
                    Operation::new("g", vec![Object::Real(0.6)]),
                    Operation::new(
                        "re",
                        vec![
                            Object::Integer(20),
                            Object::Integer(bar_y),
                            Object::Integer(width - 40),
                            Object::Integer(10),
                        ],
                    ),
                    Operation::new("f", vec![]),
                ],
            };
            let content_id =
                doc.add_object(Stream::new(Dictionary::new(), content.encode().unwrap()));

            let page = Dictionary::from_iter(vec![
                ("Type", Object::Name(b"Page".to_vec())),
                ("Parent", Object::Reference(pages_id)),
                (
                    "MediaBox",
                    Object::Array(vec![
                        Object::Integer(0),
                        Object::Integer(0),
                        Object::Integer(*width),
                        Object::Integer(*height),
                    ]),
                ),
                ("Contents", Object::Reference(content_id)),
                ("Resources", Object::Reference(resources_id)),
            ]);
            page_ids.push(doc.add_object(page));
        }

        finish_document(doc, pages_id, page_ids)
    }

    /// Single-page PDF with the given content; `resources` may add objects
    pub fn create_pdf_with_page(
        width: i64,
        height: i64,
        operations: Vec<Operation>,
        resources: impl FnOnce(&mut Document) -> Dictionary,
    ) -> Vec<u8> {
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();

        let resources = resources(&mut doc);
        let content_id = doc.add_object(Stream::new(
            Dictionary::new(),
            Content { operations }.encode().unwrap(),
        ));
        let page_id = doc.add_object(Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Page".to_vec())),
            ("Parent", Object::Reference(pages_id)),
            (
                "MediaBox",
                Object::Array(vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(width),
                    Object::Integer(height),
                ]),
            ),
            ("Contents", Object::Reference(content_id)),
            ("Resources", Object::Dictionary(resources)),
        ]));

        finish_document(doc, pages_id, vec![page_id])
    }

    fn finish_document(
        mut doc: Document,
        pages_id: lopdf::ObjectId,
        page_ids: Vec<lopdf::ObjectId>,
    ) -> Vec<u8> {
        let pages = Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Pages".to_vec())),
            ("Count", Object::Integer(page_ids.len() as i64)),
            (
                "Kids",
                Object::Array(page_ids.iter().map(|id| Object::Reference(*id)).collect()),
            ),
        ]);
        doc.objects.insert(pages_id, Object::Dictionary(pages));

        let catalog = Dictionary::from_iter(vec![
            ("Type", Object::Name(b"Catalog".to_vec())),
            ("Pages", Object::Reference(pages_id)),
        ]);
        let catalog_id = doc.add_object(catalog);
        doc.trailer.set("Root", Object::Reference(catalog_id));

        let mut buffer = Vec::new();
        doc.save_to(&mut buffer).unwrap();
        buffer
    }
}
