//! Coordinate transformation between the preview element and PDF user space
//!
//! The rendered page is fitted into the preview element with "object-contain"
//! semantics: uniformly scaled until one axis fills the element, then centred,
//! leaving letterbox bars on the other axis. Mapping a placement therefore has
//! to remove the bars before applying a single uniform scale factor, and flip
//! the Y axis (preview origin top-left, PDF origin bottom-left).

use crate::config::{SignConfig, FOOTPRINT_ASPECT};
use crate::error::{Result, SignError};
use crate::geometry::{is_usable, page_object_id, PageGeometry, PreviewRect};
use crate::placement::Placement;
use lopdf::Document;
use serde::{Deserialize, Serialize};

/// Rectangle in PDF user space (origin bottom-left, y up)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PdfRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Where the page actually lands inside the preview element
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LetterboxFit {
    /// Size of the fitted page in preview pixels
    pub fit_width: f64,
    pub fit_height: f64,
    /// Letterbox bar size on each side
    pub x_offset: f64,
    pub y_offset: f64,
    /// Document units per preview pixel
    pub k: f64,
}

impl LetterboxFit {
    pub fn compute(preview: &PreviewRect, page: &PageGeometry) -> Result<Self> {
        preview.ensure_usable()?;
        if !is_usable(page.width) || !is_usable(page.height) {
            return Err(SignError::DegenerateGeometry {
                width: page.width,
                height: page.height,
            });
        }

        // previewAspect > pageAspect, compared cross-multiplied so equal
        // aspects produce an exact fit with zero bars
        let (fit_width, fit_height) = if preview.width * page.height > preview.height * page.width
        {
            // Preview is wider than the page: page height fills the element
            (preview.height * page.width / page.height, preview.height)
        } else {
            // Preview is taller (or equal): page width fills the element
            (preview.width, preview.width * page.height / page.width)
        };

        Ok(Self {
            fit_width,
            fit_height,
            x_offset: (preview.width - fit_width) / 2.0,
            y_offset: (preview.height - fit_height) / 2.0,
            k: page.width / fit_width,
        })
    }
}

/// Map a placement to the rectangle the signature image occupies on the page
///
/// The caller is responsible for `placement.page_index` matching `page`.
pub fn map_placement(
    preview: &PreviewRect,
    page: &PageGeometry,
    placement: &Placement,
    config: &SignConfig,
) -> Result<PdfRect> {
    let fit = LetterboxFit::compute(preview, page)?;

    let adj_x = placement.x - fit.x_offset;
    let adj_y = placement.y - fit.y_offset;

    let doc_x = adj_x * fit.k + config.x_nudge;
    let doc_y_top_down = adj_y * fit.k;

    let preview_sig_width = config.base_footprint_width * placement.scale;
    let sig_width = preview_sig_width * fit.k;
    let sig_height = preview_sig_width * FOOTPRINT_ASPECT * fit.k;

    let rect = PdfRect {
        x: page.origin_x + doc_x,
        y: page.origin_y + page.height - doc_y_top_down - sig_height,
        width: sig_width,
        height: sig_height,
    };

    tracing::debug!(
        fit_width = fit.fit_width,
        fit_height = fit.fit_height,
        x_offset = fit.x_offset,
        y_offset = fit.y_offset,
        k = fit.k,
        x = rect.x,
        y = rect.y,
        width = rect.width,
        height = rect.height,
        "mapped placement to page space"
    );

    Ok(rect)
}

/// Map a placement against the page it references in `doc`
pub fn map_placement_in_document(
    doc: &Document,
    preview: &PreviewRect,
    placement: &Placement,
    config: &SignConfig,
) -> Result<PdfRect> {
    let page_id = page_object_id(doc, placement.page_index)?;
    let page = PageGeometry::from_page_id(doc, page_id)?;
    map_placement(preview, &page, placement, config)
}

/// Convert a preview-local point to PDF coordinates through the letterbox fit
pub fn preview_to_pdf(x: f64, y: f64, fit: &LetterboxFit, page: &PageGeometry) -> (f64, f64) {
    let pdf_x = page.origin_x + (x - fit.x_offset) * fit.k;
    let pdf_y = page.origin_y + page.height - (y - fit.y_offset) * fit.k;
    (pdf_x, pdf_y)
}

/// Convert a PDF point back to preview-local coordinates
pub fn pdf_to_preview(
    pdf_x: f64,
    pdf_y: f64,
    fit: &LetterboxFit,
    page: &PageGeometry,
) -> (f64, f64) {
    let x = (pdf_x - page.origin_x) / fit.k + fit.x_offset;
    let y = (page.origin_y + page.height - pdf_y) / fit.k + fit.y_offset;
    (x, y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn placement(x: f64, y: f64, scale: f64) -> Placement {
        Placement {
            x,
            y,
            scale,
            page_index: 0,
        }
    }

    #[test]
    fn test_matching_aspect_has_no_letterbox() {
        let fit = LetterboxFit::compute(
            &PreviewRect::new(400.0, 600.0),
            &PageGeometry::new(200.0, 300.0),
        )
        .unwrap();
        assert_eq!(fit.x_offset, 0.0);
        assert_eq!(fit.y_offset, 0.0);
        assert_eq!(fit.k, 0.5);
    }

    #[test]
    fn test_scenario_click_on_matching_preview() {
        // A click at (100, 150) records (50, 125) with scale 1.0
        let rect = map_placement(
            &PreviewRect::new(400.0, 600.0),
            &PageGeometry::new(200.0, 300.0),
            &placement(50.0, 125.0, 1.0),
            &SignConfig::default(),
        )
        .unwrap();

        assert_eq!(
            rect,
            PdfRect {
                x: 17.0,
                y: 187.5,
                width: 100.0,
                height: 50.0,
            }
        );
    }

    #[test]
    fn test_wide_preview_letterboxes_horizontally() {
        // Square preview, US Letter page: bars left and right
        let preview = PreviewRect::new(400.0, 400.0);
        let page = PageGeometry::new(612.0, 792.0);
        let fit = LetterboxFit::compute(&preview, &page).unwrap();

        assert_eq!(fit.fit_height, 400.0);
        assert!((fit.fit_width - 309.0909).abs() < 0.001);
        assert!((fit.x_offset - 45.4545).abs() < 0.001);
        assert_eq!(fit.y_offset, 0.0);
        assert!((fit.k - 1.98).abs() < 1e-9);

        // A placement at the left edge of the rendered page lands at x = nudge
        let rect = map_placement(
            &preview,
            &page,
            &placement(fit.x_offset, 0.0, 1.0),
            &SignConfig::default(),
        )
        .unwrap();
        assert!((rect.x - -8.0).abs() < 1e-9);
        assert!((rect.y + rect.height - 792.0).abs() < 1e-9);
    }

    #[test]
    fn test_tall_preview_letterboxes_vertically() {
        // Preview aspect 1:1.4 with a landscape page
        let preview = PreviewRect::new(400.0, 560.0);
        let page = PageGeometry::new(842.0, 595.0);
        let fit = LetterboxFit::compute(&preview, &page).unwrap();

        assert_eq!(fit.fit_width, 400.0);
        assert_eq!(fit.x_offset, 0.0);
        assert!(fit.y_offset > 0.0);
        assert!((fit.k - 842.0 / 400.0).abs() < 1e-12);
    }

    #[test]
    fn test_footprint_is_two_to_one() {
        let rect = map_placement(
            &PreviewRect::new(400.0, 560.0),
            &PageGeometry::new(612.0, 792.0),
            &placement(10.0, 10.0, 1.7),
            &SignConfig::default(),
        )
        .unwrap();
        assert!((rect.width - 2.0 * rect.height).abs() < 1e-9);
    }

    #[test]
    fn test_zero_preview_is_degenerate() {
        let err = map_placement(
            &PreviewRect::new(0.0, 560.0),
            &PageGeometry::new(612.0, 792.0),
            &placement(0.0, 0.0, 1.0),
            &SignConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, SignError::DegenerateGeometry { .. }));
    }

    #[test]
    fn test_zero_page_is_degenerate() {
        let err = LetterboxFit::compute(
            &PreviewRect::new(400.0, 560.0),
            &PageGeometry::new(612.0, 0.0),
        )
        .unwrap_err();
        assert!(matches!(err, SignError::DegenerateGeometry { .. }));
    }

    #[test]
    fn test_media_box_origin_is_applied() {
        let mut page = PageGeometry::new(200.0, 300.0);
        page.origin_x = 10.0;
        page.origin_y = 20.0;

        let rect = map_placement(
            &PreviewRect::new(400.0, 600.0),
            &page,
            &placement(50.0, 125.0, 1.0),
            &SignConfig::default(),
        )
        .unwrap();
        assert_eq!(rect.x, 27.0);
        assert_eq!(rect.y, 207.5);
    }

    #[test]
    fn test_page_index_checked_against_document() {
        let pdf = crate::test_support::create_test_pdf(2);
        let doc = Document::load_mem(&pdf).unwrap();
        let mut p = placement(0.0, 0.0, 1.0);
        p.page_index = 2;

        let err = map_placement_in_document(
            &doc,
            &PreviewRect::new(400.0, 560.0),
            &p,
            &SignConfig::default(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            SignError::PageIndex {
                index: 2,
                page_count: 2
            }
        );
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    // Strategy for valid positive dimensions (1.0 to 2000.0 points/pixels)
    fn dimension() -> impl Strategy<Value = f64> {
        1.0f64..2000.0
    }

    fn percentage() -> impl Strategy<Value = f64> {
        0.0f64..=1.0
    }

    proptest! {
        /// Property: the fitted page never exceeds the preview and bars are symmetric
        #[test]
        fn fit_stays_inside_preview(
            preview_w in dimension(),
            preview_h in dimension(),
            page_w in dimension(),
            page_h in dimension(),
        ) {
            let fit = LetterboxFit::compute(
                &PreviewRect::new(preview_w, preview_h),
                &PageGeometry::new(page_w, page_h),
            ).unwrap();

            let tolerance = 1e-9 * preview_w.max(preview_h);
            prop_assert!(fit.fit_width <= preview_w + tolerance);
            prop_assert!(fit.fit_height <= preview_h + tolerance);
            prop_assert!(fit.x_offset >= -tolerance);
            prop_assert!(fit.y_offset >= -tolerance);
            // One axis always fills the element
            prop_assert!(
                (fit.fit_width - preview_w).abs() <= tolerance
                    || (fit.fit_height - preview_h).abs() <= tolerance
            );
        }

        /// Property: k is uniform, so it converts both axes of the fitted page
        #[test]
        fn scale_factor_is_uniform(
            preview_w in dimension(),
            preview_h in dimension(),
            page_w in dimension(),
            page_h in dimension(),
        ) {
            let fit = LetterboxFit::compute(
                &PreviewRect::new(preview_w, preview_h),
                &PageGeometry::new(page_w, page_h),
            ).unwrap();

            prop_assert!((fit.k * fit.fit_width - page_w).abs() < 1e-6 * page_w);
            prop_assert!((fit.k * fit.fit_height - page_h).abs() < 1e-6 * page_h);
        }

        /// Property: preview->PDF->preview roundtrip returns the original point
        #[test]
        fn roundtrip_preview_to_pdf_to_preview(
            preview_w in dimension(),
            preview_h in dimension(),
            page_w in dimension(),
            page_h in dimension(),
            x_pct in percentage(),
            y_pct in percentage(),
        ) {
            let page = PageGeometry::new(page_w, page_h);
            let fit = LetterboxFit::compute(&PreviewRect::new(preview_w, preview_h), &page).unwrap();

            let x = x_pct * preview_w;
            let y = y_pct * preview_h;
            let (pdf_x, pdf_y) = preview_to_pdf(x, y, &fit, &page);
            let (back_x, back_y) = pdf_to_preview(pdf_x, pdf_y, &fit, &page);

            let tolerance = 1e-6;
            prop_assert!((back_x - x).abs() < tolerance, "x: {} -> {} -> {}", x, pdf_x, back_x);
            prop_assert!((back_y - y).abs() < tolerance, "y: {} -> {} -> {}", y, pdf_y, back_y);
        }

        /// Property: the centre of the preview is the centre of the page
        #[test]
        fn preview_centre_maps_to_page_centre(
            preview_w in dimension(),
            preview_h in dimension(),
            page_w in dimension(),
            page_h in dimension(),
        ) {
            let page = PageGeometry::new(page_w, page_h);
            let fit = LetterboxFit::compute(&PreviewRect::new(preview_w, preview_h), &page).unwrap();
            let (pdf_x, pdf_y) = preview_to_pdf(preview_w / 2.0, preview_h / 2.0, &fit, &page);

            prop_assert!((pdf_x - page_w / 2.0).abs() < 1e-6 * page_w.max(1.0));
            prop_assert!((pdf_y - page_h / 2.0).abs() < 1e-6 * page_h.max(1.0));
        }

        /// Property: moving down in the preview moves down on the page
        #[test]
        fn y_axis_is_inverted(
            preview_w in dimension(),
            preview_h in dimension(),
            page_w in dimension(),
            page_h in dimension(),
            y1_pct in 0.0f64..0.5,
        ) {
            let config = SignConfig::default();
            let preview = PreviewRect::new(preview_w, preview_h);
            let page = PageGeometry::new(page_w, page_h);
            let upper = Placement { x: 0.0, y: y1_pct * preview_h, scale: 1.0, page_index: 0 };
            let lower = Placement { y: (y1_pct + 0.1) * preview_h, ..upper };

            let upper_rect = map_placement(&preview, &page, &upper, &config).unwrap();
            let lower_rect = map_placement(&preview, &page, &lower, &config).unwrap();
            prop_assert!(lower_rect.y < upper_rect.y);
        }

        /// Property: output is always finite for usable geometry
        #[test]
        fn mapping_is_finite(
            preview_w in dimension(),
            preview_h in dimension(),
            page_w in dimension(),
            page_h in dimension(),
            x_pct in percentage(),
            y_pct in percentage(),
            scale in 0.5f64..=2.0,
        ) {
            let p = Placement { x: x_pct * preview_w, y: y_pct * preview_h, scale, page_index: 0 };
            let rect = map_placement(
                &PreviewRect::new(preview_w, preview_h),
                &PageGeometry::new(page_w, page_h),
                &p,
                &SignConfig::default(),
            ).unwrap();

            prop_assert!(rect.x.is_finite() && rect.y.is_finite());
            prop_assert!(rect.width > 0.0 && rect.height > 0.0);
        }
    }
}
