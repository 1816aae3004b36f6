//! Upload validation and document info
//!
//! Checks run cheapest-first: declared type, size limit, header, then a full
//! parse to count pages.

use crate::config::SignConfig;
use crate::error::{Result, SignError};
use lopdf::Document;
use serde::Serialize;

pub const PDF_MIME: &str = "application/pdf";

/// Document information extracted during validation
#[derive(Debug, Clone, Serialize, Default, PartialEq)]
pub struct PdfInfo {
    pub page_count: usize,
    /// PDF version string (e.g., "1.7")
    pub version: String,
    pub encrypted: bool,
    pub size_bytes: usize,
    pub title: Option<String>,
    pub author: Option<String>,
}

/// Checks that do not need to parse the document
///
/// Rejects anything not declared as `application/pdf` and anything above the
/// configured size limit.
pub fn check_upload(mime: &str, size_bytes: usize, config: &SignConfig) -> Result<()> {
    let declared = mime.split(';').next().unwrap_or("").trim();
    if !declared.eq_ignore_ascii_case(PDF_MIME) {
        return Err(SignError::Validation(format!(
            "Invalid file type '{}': please upload a PDF file",
            mime
        )));
    }
    if size_bytes > config.max_file_bytes {
        return Err(SignError::Validation(format!(
            "File too large: {} bytes (maximum {} bytes)",
            size_bytes, config.max_file_bytes
        )));
    }
    Ok(())
}

/// Validate an upload end to end and return the parsed document
pub fn validate_upload(
    mime: &str,
    bytes: &[u8],
    config: &SignConfig,
) -> Result<(Document, PdfInfo)> {
    check_upload(mime, bytes.len(), config)?;
    validate_pdf(bytes)
}

/// Parse a PDF and extract basic info
pub fn validate_pdf(bytes: &[u8]) -> Result<(Document, PdfInfo)> {
    quick_validate(bytes)?;

    let version = extract_version(bytes);
    let document = Document::load_mem(bytes)
        .map_err(|e| SignError::Decode(format!("Failed to parse PDF: {}", e)))?;

    let page_count = document.get_pages().len();
    if page_count == 0 {
        return Err(SignError::Decode("PDF has no pages".into()));
    }

    let (title, author) = extract_metadata(&document);
    let info = PdfInfo {
        page_count,
        version,
        encrypted: document.is_encrypted(),
        size_bytes: bytes.len(),
        title,
        author,
    };
    Ok((document, info))
}

/// Header-only checks
pub fn quick_validate(bytes: &[u8]) -> Result<()> {
    if bytes.is_empty() {
        return Err(SignError::Decode("Empty document".into()));
    }
    if bytes.len() < 8 {
        return Err(SignError::Decode("File too small to be a valid PDF".into()));
    }
    if !bytes.starts_with(b"%PDF-") {
        return Err(SignError::Decode(
            "Not a valid PDF file (missing %PDF- header)".into(),
        ));
    }
    Ok(())
}

/// Version from the `%PDF-x.y` header, "1.4" when unreadable
pub fn extract_version(bytes: &[u8]) -> String {
    if bytes.len() >= 8 && bytes.starts_with(b"%PDF-") {
        if let Ok(version) = std::str::from_utf8(&bytes[5..8]) {
            return version.trim().to_string();
        }
    }
    "1.4".to_string()
}

fn extract_metadata(document: &Document) -> (Option<String>, Option<String>) {
    let Ok(info_id) = document.trailer.get(b"Info").and_then(|o| o.as_reference()) else {
        return (None, None);
    };
    let Ok(info) = document.get_dictionary(info_id) else {
        return (None, None);
    };

    let text = |key: &[u8]| {
        info.get(key)
            .and_then(|o| o.as_str())
            .ok()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .filter(|s| !s.is_empty())
    };
    (text(b"Title"), text(b"Author"))
}
