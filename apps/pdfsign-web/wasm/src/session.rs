//! Stateful signing session exposed to JavaScript
//!
//! Wraps `SigningSession` so the page only forwards DOM events and file
//! bytes. Placement changes are queued while the session is borrowed and
//! delivered to the JS callback once the call that caused them returns.

use crate::capture::{element_preview, PointerCapture};
use pdfsign_core::{
    Placement, PlacementObserver, PreviewRect, SignConfig, SignError, SigningSession, Stroke,
};
use serde::Serialize;
use std::cell::RefCell;
use std::rc::Rc;
use wasm_bindgen::prelude::*;
use web_sys::Element;

/// Queue of placement changes plus the JS callback that receives them
#[derive(Clone, Default)]
pub struct Notifier {
    pending: Rc<RefCell<Vec<Option<Placement>>>>,
    callback: Rc<RefCell<Option<js_sys::Function>>>,
}

impl Notifier {
    fn observer(&self) -> impl PlacementObserver + 'static {
        let pending = self.pending.clone();
        move |placement: Option<&Placement>| pending.borrow_mut().push(placement.copied())
    }

    fn set_callback(&self, callback: Option<js_sys::Function>) {
        *self.callback.borrow_mut() = callback;
    }

    fn pending_len(&self) -> usize {
        self.pending.borrow().len()
    }

    /// Deliver queued changes in order
    ///
    /// Callback: `(placement: {x, y, scale, page_index} | null) => void`
    pub fn flush(&self) {
        let events: Vec<Option<Placement>> = self.pending.borrow_mut().drain(..).collect();
        let callback = self.callback.borrow().clone();
        let Some(callback) = callback else {
            return;
        };
        for placement in events {
            let value = match placement {
                Some(p) => serde_wasm_bindgen::to_value(&p).unwrap_or(JsValue::NULL),
                None => JsValue::NULL,
            };
            if let Err(e) = callback.call1(&JsValue::NULL, &value) {
                web_sys::console::error_2(&"placement callback threw:".into(), &e);
            }
        }
    }
}

/// Summary returned after loading a document
#[derive(Debug, Serialize)]
struct LoadedInfo {
    name: String,
    page_count: usize,
    size_bytes: usize,
    version: String,
}

fn js_err(e: SignError) -> String {
    e.to_string()
}

/// Signing session held in Rust memory
#[wasm_bindgen]
pub struct SignSession {
    inner: Rc<RefCell<SigningSession>>,
    notifier: Notifier,
    capture: Option<PointerCapture>,
}

impl Default for SignSession {
    fn default() -> Self {
        Self::with_session(SigningSession::default())
    }
}

impl SignSession {
    fn with_session(mut session: SigningSession) -> Self {
        let notifier = Notifier::default();
        session.subscribe(notifier.observer());
        Self {
            inner: Rc::new(RefCell::new(session)),
            notifier,
            capture: None,
        }
    }

    fn with_config_internal(json: &str) -> Result<Self, String> {
        let config =
            SignConfig::from_json(json).map_err(|e| format!("Invalid configuration: {}", e))?;
        Ok(Self::with_session(SigningSession::new(config)))
    }

    fn load_document_internal(
        &mut self,
        name: &str,
        mime: &str,
        bytes: &[u8],
    ) -> Result<LoadedInfo, String> {
        self.capture = None;
        let mut session = self.inner.borrow_mut();
        let page_count = session.load_document(name, mime, bytes).map_err(js_err)?;
        let info = session
            .document()
            .map(|doc| LoadedInfo {
                name: doc.name.clone(),
                page_count,
                size_bytes: doc.info.size_bytes,
                version: doc.info.version.clone(),
            })
            .ok_or_else(|| "Document was not loaded".to_string())?;
        Ok(info)
    }

    fn page_preview_internal(&self, page_index: usize) -> Result<Vec<u8>, String> {
        let session = self.inner.borrow();
        let bitmap = session.page_preview(page_index).map_err(js_err)?;
        bitmap.to_png().map_err(js_err)
    }

    fn set_drawn_strokes_internal(
        &mut self,
        strokes: &[Stroke],
        width: u32,
        height: u32,
    ) -> Result<(), String> {
        self.inner
            .borrow_mut()
            .set_drawn_strokes(strokes, width, height)
            .map_err(js_err)
    }

    fn set_uploaded_signature_internal(
        &mut self,
        mime: &str,
        bytes: &[u8],
        threshold: u8,
    ) -> Result<(), String> {
        self.inner
            .borrow_mut()
            .set_uploaded_signature(mime, bytes, threshold)
            .map_err(js_err)
    }

    fn click_internal(&mut self, x: f64, y: f64, preview: PreviewRect) -> Option<Placement> {
        self.inner.borrow_mut().click(x, y, &preview)
    }

    fn drag_internal(&mut self, pointer_x: f64, pointer_y: f64, preview: PreviewRect) {
        self.inner
            .borrow_mut()
            .pointer_move(pointer_x, pointer_y, &preview);
    }

    fn end_gesture_internal(&mut self) {
        self.capture = None;
        self.inner.borrow_mut().end_gesture();
    }

    fn go_to_page_internal(&mut self, page_index: usize) -> Result<(), String> {
        self.end_gesture_internal();
        self.inner.borrow_mut().go_to_page(page_index).map_err(js_err)
    }

    fn generate_internal(&mut self, preview: PreviewRect) -> Result<Vec<u8>, String> {
        self.end_gesture_internal();
        let output = self.inner.borrow_mut().generate(&preview).map_err(js_err)?;
        Ok(output.bytes)
    }

    fn start_capture(&mut self, element: Element) -> Result<(), JsValue> {
        // Replacing the old capture detaches its listeners first
        self.capture = None;
        self.capture = Some(PointerCapture::attach(
            self.inner.clone(),
            self.notifier.clone(),
            element,
        )?);
        Ok(())
    }
}

fn to_array(bytes: &[u8]) -> js_sys::Uint8Array {
    let array = js_sys::Uint8Array::new_with_length(bytes.len() as u32);
    array.copy_from(bytes);
    array
}

fn to_js<T: Serialize>(value: &T) -> Result<JsValue, JsValue> {
    serde_wasm_bindgen::to_value(value)
        .map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
}

#[wasm_bindgen]
impl SignSession {
    /// Create a session with limits from the default configuration
    #[wasm_bindgen(constructor)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session from a JSON configuration object
    #[wasm_bindgen(js_name = withConfig)]
    pub fn with_config(json: &str) -> Result<SignSession, JsValue> {
        Self::with_config_internal(json).map_err(|e| JsValue::from_str(&e))
    }

    /// Set the placement callback
    /// Callback signature: (placement: {x, y, scale, page_index} | null) => void
    #[wasm_bindgen(js_name = setPlacementCallback)]
    pub fn set_placement_callback(&mut self, callback: js_sys::Function) {
        self.notifier.set_callback(Some(callback));
    }

    /// Load and rasterize a PDF; replaces any current document
    /// Returns `{name, page_count, size_bytes, version}`
    #[wasm_bindgen(js_name = loadDocument)]
    pub fn load_document(&mut self, name: &str, mime: &str, bytes: &[u8]) -> Result<JsValue, JsValue> {
        let result = self.load_document_internal(name, mime, bytes);
        self.notifier.flush();
        let info = result.map_err(|e| JsValue::from_str(&e))?;
        to_js(&info)
    }

    #[wasm_bindgen(js_name = clearDocument)]
    pub fn clear_document(&mut self) {
        self.capture = None;
        self.inner.borrow_mut().clear_document();
        self.notifier.flush();
    }

    #[wasm_bindgen(js_name = pageCount)]
    pub fn page_count(&self) -> usize {
        self.inner.borrow().page_count()
    }

    #[wasm_bindgen(js_name = currentPage)]
    pub fn current_page(&self) -> usize {
        self.inner.borrow().current_page()
    }

    /// Page bitmap as PNG bytes, rendered on request
    ///
    /// Text is not drawn. Display the page with pdf.js and use this only for
    /// thumbnails or checking where the signature landed.
    #[wasm_bindgen(js_name = pagePreviewPng)]
    pub fn page_preview_png(&self, page_index: usize) -> Result<js_sys::Uint8Array, JsValue> {
        let png = self
            .page_preview_internal(page_index)
            .map_err(|e| JsValue::from_str(&e))?;
        Ok(to_array(&png))
    }

    /// Page geometry in PDF points: `{origin_x, origin_y, width, height, rotation}`
    #[wasm_bindgen(js_name = pageSize)]
    pub fn page_size(&self, page_index: usize) -> Result<JsValue, JsValue> {
        let geometry = self
            .inner
            .borrow()
            .page_geometry(page_index)
            .map_err(|e| JsValue::from_str(&e.to_string()))?;
        to_js(&geometry)
    }

    /// Use an exported drawing-pad image as the signature
    #[wasm_bindgen(js_name = setDrawnSignature)]
    pub fn set_drawn_signature(&mut self, png: &[u8]) -> Result<(), JsValue> {
        self.inner
            .borrow_mut()
            .set_drawn_signature(png)
            .map_err(|e| JsValue::from_str(&e.to_string()))
    }

    /// Render pad strokes, `[{points: [[x, y], ...]}, ...]`, as the signature
    #[wasm_bindgen(js_name = setDrawnStrokes)]
    pub fn set_drawn_strokes(&mut self, strokes: JsValue, width: u32, height: u32) -> Result<(), JsValue> {
        let strokes: Vec<Stroke> = serde_wasm_bindgen::from_value(strokes)
            .map_err(|e| JsValue::from_str(&format!("Invalid strokes: {}", e)))?;
        self.set_drawn_strokes_internal(&strokes, width, height)
            .map_err(|e| JsValue::from_str(&e))
    }

    #[wasm_bindgen(js_name = setUploadedSignature)]
    pub fn set_uploaded_signature(&mut self, mime: &str, bytes: &[u8], threshold: u8) -> Result<(), JsValue> {
        self.set_uploaded_signature_internal(mime, bytes, threshold)
            .map_err(|e| JsValue::from_str(&e))
    }

    /// Re-matte an uploaded signature from its original pixels
    #[wasm_bindgen(js_name = setThreshold)]
    pub fn set_threshold(&mut self, threshold: u8) {
        self.inner.borrow_mut().set_threshold(threshold);
    }

    #[wasm_bindgen(js_name = clearSignature)]
    pub fn clear_signature(&mut self) {
        self.inner.borrow_mut().clear_signature();
    }

    /// Current signature bitmap as PNG bytes, if any
    #[wasm_bindgen(js_name = signaturePng)]
    pub fn signature_png(&self) -> Result<Option<js_sys::Uint8Array>, JsValue> {
        let session = self.inner.borrow();
        match session.signature() {
            Some(signature) => {
                let png = signature
                    .to_png()
                    .map_err(|e| JsValue::from_str(&e.to_string()))?;
                Ok(Some(to_array(&png)))
            }
            None => Ok(None),
        }
    }

    /// Place the signature at an element-local click position
    ///
    /// Returns false when the click was ignored.
    pub fn click(&mut self, x: f64, y: f64, preview_width: f64, preview_height: f64) -> bool {
        let placed = self
            .click_internal(x, y, PreviewRect::new(preview_width, preview_height))
            .is_some();
        self.notifier.flush();
        placed
    }

    #[wasm_bindgen(js_name = beginDrag)]
    pub fn begin_drag(&mut self, pointer_x: f64, pointer_y: f64) -> bool {
        self.inner.borrow_mut().begin_drag(pointer_x, pointer_y)
    }

    #[wasm_bindgen(js_name = updateDrag)]
    pub fn update_drag(&mut self, pointer_x: f64, pointer_y: f64, preview_width: f64, preview_height: f64) {
        self.drag_internal(pointer_x, pointer_y, PreviewRect::new(preview_width, preview_height));
        self.notifier.flush();
    }

    #[wasm_bindgen(js_name = endDrag)]
    pub fn end_drag(&mut self) {
        self.end_gesture_internal();
    }

    #[wasm_bindgen(js_name = beginResize)]
    pub fn begin_resize(&mut self, pointer_x: f64) -> bool {
        self.inner.borrow_mut().begin_resize(pointer_x)
    }

    #[wasm_bindgen(js_name = updateResize)]
    pub fn update_resize(&mut self, pointer_x: f64, preview_width: f64, preview_height: f64) {
        self.drag_internal(pointer_x, 0.0, PreviewRect::new(preview_width, preview_height));
        self.notifier.flush();
    }

    #[wasm_bindgen(js_name = endResize)]
    pub fn end_resize(&mut self) {
        self.end_gesture_internal();
    }

    /// Start a drag and track it on document-level mouse events
    #[wasm_bindgen(js_name = captureDrag)]
    pub fn capture_drag(&mut self, element: Element, client_x: f64, client_y: f64) -> Result<bool, JsValue> {
        if !self.inner.borrow_mut().begin_drag(client_x, client_y) {
            return Ok(false);
        }
        self.start_capture(element)?;
        Ok(true)
    }

    /// Start a resize and track it on document-level mouse events
    #[wasm_bindgen(js_name = captureResize)]
    pub fn capture_resize(&mut self, element: Element, client_x: f64) -> Result<bool, JsValue> {
        if !self.inner.borrow_mut().begin_resize(client_x) {
            return Ok(false);
        }
        self.start_capture(element)?;
        Ok(true)
    }

    /// Show a page; clears the placement when the page changes
    #[wasm_bindgen(js_name = goToPage)]
    pub fn go_to_page(&mut self, page_index: usize) -> Result<(), JsValue> {
        let result = self.go_to_page_internal(page_index);
        self.notifier.flush();
        result.map_err(|e| JsValue::from_str(&e))
    }

    /// Move by `delta` pages; returns false at either end
    #[wasm_bindgen(js_name = changePage)]
    pub fn change_page(&mut self, delta: i32) -> bool {
        self.end_gesture_internal();
        let moved = self.inner.borrow_mut().change_page(delta as i64);
        self.notifier.flush();
        moved
    }

    /// Current placement or null
    pub fn placement(&self) -> Result<JsValue, JsValue> {
        match self.inner.borrow().placement() {
            Some(placement) => to_js(&placement),
            None => Ok(JsValue::NULL),
        }
    }

    #[wasm_bindgen(js_name = canGenerate)]
    pub fn can_generate(&self) -> bool {
        self.inner.borrow().can_generate()
    }

    #[wasm_bindgen(js_name = isGenerating)]
    pub fn is_generating(&self) -> bool {
        self.inner.borrow().is_generating()
    }

    /// Signed PDF bytes for a preview of the given size
    pub fn generate(&mut self, preview_width: f64, preview_height: f64) -> Result<js_sys::Uint8Array, JsValue> {
        let bytes = self
            .generate_internal(PreviewRect::new(preview_width, preview_height))
            .map_err(|e| JsValue::from_str(&e))?;
        Ok(to_array(&bytes))
    }

    /// Signed PDF bytes, reading the preview size from the live layout
    #[wasm_bindgen(js_name = generateForElement)]
    pub fn generate_for_element(&mut self, element: &Element) -> Result<js_sys::Uint8Array, JsValue> {
        let bytes = self
            .generate_internal(element_preview(element))
            .map_err(|e| JsValue::from_str(&e))?;
        Ok(to_array(&bytes))
    }

    /// Download name for the signed document, `signed_<name>`
    #[wasm_bindgen(js_name = outputName)]
    pub fn output_name(&self) -> Option<String> {
        self.inner.borrow().output_name()
    }

    /// Letterbox fit of the current page inside a preview of the given size
    pub fn fit(&self, preview_width: f64, preview_height: f64) -> Result<JsValue, JsValue> {
        let fit = self
            .inner
            .borrow()
            .current_fit(&PreviewRect::new(preview_width, preview_height))
            .map_err(|e| JsValue::from_str(&e.to_string()))?;
        to_js(&fit)
    }
}


#[cfg(all(test, target_arch = "wasm32"))]
mod wasm_tests {
    use super::tests::ready_session;
    use super::*;
    use pdfsign_core::Gesture;
    use wasm_bindgen_test::*;
    use web_sys::{MouseEvent, MouseEventInit};

    wasm_bindgen_test_configure!(run_in_browser);

    fn preview_element() -> Element {
        let document = web_sys::window().unwrap().document().unwrap();
        let element = document.create_element("div").unwrap();
        element
            .set_attribute(
                "style",
                "position:absolute;left:10px;top:20px;width:300px;height:400px",
            )
            .unwrap();
        document
            .document_element()
            .unwrap()
            .append_child(&element)
            .unwrap();
        element
    }

    fn fire(kind: &str, client_x: i32, client_y: i32) {
        let init = MouseEventInit::new();
        init.set_client_x(client_x);
        init.set_client_y(client_y);
        let event = MouseEvent::new_with_mouse_event_init_dict(kind, &init).unwrap();
        web_sys::window()
            .unwrap()
            .document()
            .unwrap()
            .dispatch_event(&event)
            .unwrap();
    }

    fn last_callback_value() -> JsValue {
        js_sys::Reflect::get(&js_sys::global(), &"__pdfsignPlacement".into()).unwrap()
    }

    #[wasm_bindgen_test]
    fn test_element_preview_reads_layout() {
        let preview = element_preview(&preview_element());
        assert_eq!((preview.width, preview.height), (300.0, 400.0));
        assert_eq!((preview.left, preview.top), (10.0, 20.0));
    }

    #[wasm_bindgen_test]
    fn test_captured_drag_follows_document_until_release() {
        let element = preview_element();
        let mut session = ready_session();
        session.click(120.0, 200.0, 300.0, 400.0);

        assert!(session.capture_drag(element, 120.0, 200.0).unwrap());
        fire("mousemove", 140, 210);
        let placement = session.inner.borrow().placement().unwrap();
        assert_eq!((placement.x, placement.y), (90.0, 185.0));

        fire("mouseup", 140, 210);
        assert_eq!(session.inner.borrow().tracker().gesture(), Gesture::Idle);

        fire("mousemove", 400, 400);
        let placement = session.inner.borrow().placement().unwrap();
        assert_eq!((placement.x, placement.y), (90.0, 185.0));
    }

    #[wasm_bindgen_test]
    fn test_callback_receives_placement_then_null() {
        let mut session = ready_session();
        session.set_placement_callback(js_sys::Function::new_with_args(
            "p",
            "globalThis.__pdfsignPlacement = p;",
        ));

        assert!(session.click(120.0, 200.0, 612.0, 792.0));
        let value = last_callback_value();
        let x = js_sys::Reflect::get(&value, &"x".into()).unwrap();
        assert_eq!(x.as_f64(), Some(70.0));

        session.go_to_page(1).unwrap();
        assert!(last_callback_value().is_null());
    }

    #[wasm_bindgen_test]
    fn test_throwing_callback_does_not_break_session() {
        let mut session = ready_session();
        session.set_placement_callback(js_sys::Function::new_with_args(
            "p",
            "throw new Error('listener failed');",
        ));

        assert!(session.click(120.0, 200.0, 612.0, 792.0));
        assert_eq!(session.notifier.pending_len(), 0);
        assert!(session.inner.borrow().placement().is_some());
    }
}
