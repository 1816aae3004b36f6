//! Document-level pointer capture for drag and resize gestures
//!
//! Once a gesture starts on the overlay, move and release events are taken
//! from the whole document so the gesture keeps tracking when the pointer
//! leaves the overlay. Listeners are removed on release, when a new capture
//! replaces this one, and when the capture is dropped.

use crate::session::Notifier;
use pdfsign_core::{PreviewRect, SigningSession};
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{Element, EventTarget, MouseEvent};

/// Live layout of the preview element
pub fn element_preview(element: &Element) -> PreviewRect {
    let bounds = element.get_bounding_client_rect();
    PreviewRect::new(bounds.width(), bounds.height()).with_offset(bounds.left(), bounds.top())
}

struct Listeners {
    target: EventTarget,
    on_move: Closure<dyn FnMut(MouseEvent)>,
    on_up: Closure<dyn FnMut(MouseEvent)>,
}

impl Listeners {
    fn detach(&self) {
        let _ = self
            .target
            .remove_event_listener_with_callback("mousemove", self.on_move.as_ref().unchecked_ref());
        let _ = self
            .target
            .remove_event_listener_with_callback("mouseup", self.on_up.as_ref().unchecked_ref());
    }
}

/// Active document listeners for one gesture
pub struct PointerCapture {
    listeners: Rc<RefCell<Option<Listeners>>>,
}

impl PointerCapture {
    /// Attach move/release listeners to the page's document
    ///
    /// The gesture must already have been started on `session`.
    pub fn attach(
        session: Rc<RefCell<SigningSession>>,
        notifier: Notifier,
        element: Element,
    ) -> Result<Self, JsValue> {
        let target: EventTarget = web_sys::window()
            .and_then(|w| w.document())
            .ok_or_else(|| JsValue::from_str("No document available"))?
            .into();

        let slot: Rc<RefCell<Option<Listeners>>> = Rc::new(RefCell::new(None));

        let move_session = session.clone();
        let move_notifier = notifier.clone();
        let on_move = Closure::wrap(Box::new(move |event: MouseEvent| {
            // Layout is read per event; the preview may have been resized
            let preview = element_preview(&element);
            if let Ok(mut session) = move_session.try_borrow_mut() {
                session.pointer_move(event.client_x() as f64, event.client_y() as f64, &preview);
            }
            move_notifier.flush();
        }) as Box<dyn FnMut(MouseEvent)>);

        let weak: Weak<RefCell<Option<Listeners>>> = Rc::downgrade(&slot);
        let on_up = Closure::wrap(Box::new(move |_event: MouseEvent| {
            if let Ok(mut session) = session.try_borrow_mut() {
                session.end_gesture();
            }
            if let Some(slot) = weak.upgrade() {
                if let Some(listeners) = slot.borrow().as_ref() {
                    listeners.detach();
                }
            }
            notifier.flush();
        }) as Box<dyn FnMut(MouseEvent)>);

        *slot.borrow_mut() = Some(Listeners {
            target,
            on_move,
            on_up,
        });
        // On failure the returned error drops `capture`, which detaches
        let capture = Self { listeners: slot };
        capture.listen()?;
        Ok(capture)
    }

    fn listen(&self) -> Result<(), JsValue> {
        if let Some(listeners) = self.listeners.borrow().as_ref() {
            listeners.target.add_event_listener_with_callback(
                "mousemove",
                listeners.on_move.as_ref().unchecked_ref(),
            )?;
            listeners.target.add_event_listener_with_callback(
                "mouseup",
                listeners.on_up.as_ref().unchecked_ref(),
            )?;
        }
        Ok(())
    }

    /// Remove the listeners without ending the gesture
    pub fn release(&self) {
        if let Some(listeners) = self.listeners.borrow().as_ref() {
            listeners.detach();
        }
    }
}

impl Drop for PointerCapture {
    fn drop(&mut self) {
        self.release();
    }
}
