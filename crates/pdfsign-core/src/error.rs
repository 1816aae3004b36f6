use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SignError {
    /// Wrong file type, oversized upload, or missing signature/placement
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Corrupt or empty document/image bytes
    #[error("Failed to decode: {0}")]
    Decode(String),

    #[error("Degenerate geometry: {width}x{height}")]
    DegenerateGeometry { width: f64, height: f64 },

    #[error("Page index {index} is out of range (document has {page_count} pages)")]
    PageIndex { index: usize, page_count: usize },

    /// Signature bitmap could not be embedded as a PDF image
    #[error("Failed to embed signature: {0}")]
    Embed(String),
}

impl SignError {
    /// Short category label, used for user-facing notifications
    pub fn kind(&self) -> &'static str {
        match self {
            SignError::Validation(_) => "validation",
            SignError::Decode(_) => "decode",
            SignError::DegenerateGeometry { .. } => "geometry",
            SignError::PageIndex { .. } => "page_index",
            SignError::Embed(_) => "embed",
        }
    }
}

impl From<lopdf::Error> for SignError {
    fn from(e: lopdf::Error) -> Self {
        SignError::Decode(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SignError>;
