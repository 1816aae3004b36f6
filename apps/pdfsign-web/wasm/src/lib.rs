//! WASM bindings for placing a signature on a PDF
//!
//! All signing state lives in Rust inside `SignSession`. JavaScript handles
//! file input, drawing the preview bitmaps and triggering downloads.
//!
//! ## Usage (JavaScript)
//!
//! ```javascript
//! import init, { SignSession } from './pkg/pdfsign_wasm.js';
//!
//! await init();
//!
//! const session = new SignSession();
//! session.setPlacementCallback((placement) => renderOverlay(placement));
//! const pages = session.loadDocument(file.name, file.type, bytes);
//! session.setUploadedSignature(sigFile.type, sigBytes, 240);
//!
//! const rect = preview.getBoundingClientRect();
//! session.click(x, y, rect.width, rect.height);
//! overlay.onmousedown = (e) => session.captureDrag(preview, e.clientX, e.clientY);
//!
//! const signed = session.generateForElement(preview);
//! downloadBlob(signed, session.outputName());
//! ```

pub mod capture;
pub mod session;

use pdfsign_core::validation;
use wasm_bindgen::prelude::*;

pub use session::SignSession;

/// Initialize the WASM module
/// Called automatically by wasm-bindgen
#[wasm_bindgen(start)]
pub fn init() {
    console_error_panic_hook::set_once();
    web_sys::console::log_1(&format!("pdfsign-wasm {} loaded", get_version()).into());
}

/// Get the library version
#[wasm_bindgen]
pub fn get_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

/// Quick header check for a PDF file
#[wasm_bindgen]
pub fn quick_validate(bytes: &[u8]) -> Result<(), JsValue> {
    validation::quick_validate(bytes).map_err(|e| JsValue::from_str(&e.to_string()))
}

/// Get PDF info without creating a session
#[wasm_bindgen]
pub fn get_pdf_info(bytes: &[u8]) -> Result<JsValue, JsValue> {
    let (_, info) = validation::validate_pdf(bytes).map_err(|e| JsValue::from_str(&e.to_string()))?;

    serde_wasm_bindgen::to_value(&info)
        .map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
}

/// Get page count from PDF bytes
#[wasm_bindgen]
pub fn get_page_count(bytes: &[u8]) -> Result<u32, JsValue> {
    pdfsign_core::get_page_count(bytes)
        .map(|count| count as u32)
        .map_err(|e| JsValue::from_str(&e.to_string()))
}

/// Preview the threshold matte on an image without touching a session
#[wasm_bindgen(js_name = matteSignature)]
pub fn matte_signature(bytes: &[u8], threshold: u8) -> Result<Vec<u8>, JsValue> {
    pdfsign_core::matte_png(bytes, threshold).map_err(|e| JsValue::from_str(&e.to_string()))
}
