//! Placement tracking for a signature on the displayed page
//!
//! The tracker is a small state machine:
//! - Unplaced: a click inside the preview places the signature
//! - Placed: drag gestures move it, corner-handle gestures resize it
//! - Any page change returns to Unplaced
//!
//! Pointer gestures run through an explicit `Gesture` state with begin/update/end
//! transitions. Every exit path (end, cancel, navigation, reset, drop) returns
//! the gesture to `Idle`.

use crate::config::SignConfig;
use crate::geometry::PreviewRect;
use serde::{Deserialize, Serialize};

/// Signature position on the preview element
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    /// Offset from the preview element's left edge, in preview pixels
    pub x: f64,
    /// Offset from the preview element's top edge, in preview pixels
    pub y: f64,
    /// Multiplier on the base footprint, within [0.5, 2.0]
    pub scale: f64,
    /// Zero-based page the placement belongs to
    pub page_index: usize,
}

/// Active pointer gesture
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Gesture {
    #[default]
    Idle,
    Dragging { last_x: f64, last_y: f64 },
    Resizing { start_x: f64, start_scale: f64 },
}

/// Receives the current placement after every change
pub trait PlacementObserver {
    fn placement_changed(&mut self, placement: Option<&Placement>);
}

impl<F> PlacementObserver for F
where
    F: FnMut(Option<&Placement>),
{
    fn placement_changed(&mut self, placement: Option<&Placement>) {
        self(placement)
    }
}

pub struct PlacementTracker {
    config: SignConfig,
    current_page: usize,
    placement: Option<Placement>,
    gesture: Gesture,
    observers: Vec<Box<dyn PlacementObserver>>,
}

impl std::fmt::Debug for PlacementTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlacementTracker")
            .field("current_page", &self.current_page)
            .field("placement", &self.placement)
            .field("gesture", &self.gesture)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl Default for PlacementTracker {
    fn default() -> Self {
        Self::new(SignConfig::default())
    }
}

impl PlacementTracker {
    pub fn new(config: SignConfig) -> Self {
        Self {
            config,
            current_page: 0,
            placement: None,
            gesture: Gesture::Idle,
            observers: Vec::new(),
        }
    }

    pub fn placement(&self) -> Option<Placement> {
        self.placement
    }

    pub fn is_placed(&self) -> bool {
        self.placement.is_some()
    }

    pub fn current_page(&self) -> usize {
        self.current_page
    }

    pub fn gesture(&self) -> Gesture {
        self.gesture
    }

    pub fn subscribe(&mut self, observer: impl PlacementObserver + 'static) {
        self.observers.push(Box::new(observer));
    }

    /// Primary click at element-local coordinates
    ///
    /// Only places the signature when nothing is placed yet; later clicks are
    /// ignored so an accidental click does not move an existing placement.
    pub fn click(&mut self, x: f64, y: f64, preview: &PreviewRect) -> Option<Placement> {
        if self.placement.is_some() {
            return None;
        }
        if !x.is_finite() || !y.is_finite() || !preview.contains_local(x, y) {
            return None;
        }

        let (anchor_x, anchor_y) = self.config.click_anchor;
        let placement = Placement {
            x: x - anchor_x,
            y: y - anchor_y,
            scale: 1.0,
            page_index: self.current_page,
        };
        self.set_placement(Some(placement));
        Some(placement)
    }

    /// Start moving the placed signature; returns false when nothing is placed
    pub fn begin_drag(&mut self, pointer_x: f64, pointer_y: f64) -> bool {
        if self.placement.is_none() {
            return false;
        }
        self.gesture = Gesture::Dragging {
            last_x: pointer_x,
            last_y: pointer_y,
        };
        true
    }

    /// Start resizing from a corner handle; returns false when nothing is placed
    pub fn begin_resize(&mut self, pointer_x: f64) -> bool {
        let Some(placement) = self.placement else {
            return false;
        };
        self.gesture = Gesture::Resizing {
            start_x: pointer_x,
            start_scale: placement.scale,
        };
        true
    }

    /// Feed a pointer position to the active gesture
    pub fn pointer_move(&mut self, pointer_x: f64, pointer_y: f64, preview: &PreviewRect) {
        if !pointer_x.is_finite() || !pointer_y.is_finite() {
            return;
        }
        match self.gesture {
            Gesture::Idle => {}
            Gesture::Dragging { last_x, last_y } => {
                self.gesture = Gesture::Dragging {
                    last_x: pointer_x,
                    last_y: pointer_y,
                };
                self.drag_by(pointer_x - last_x, pointer_y - last_y, preview);
            }
            Gesture::Resizing {
                start_x,
                start_scale,
            } => {
                let scale = self
                    .config
                    .clamp_scale(start_scale + (pointer_x - start_x) * self.config.resize_factor);
                if let Some(mut placement) = self.placement {
                    if placement.scale != scale {
                        placement.scale = scale;
                        self.set_placement(Some(placement));
                    }
                }
            }
        }
    }

    /// Move the placement by a pointer delta, keeping the footprint inside the preview
    pub fn drag_by(&mut self, dx: f64, dy: f64, preview: &PreviewRect) {
        let Some(placement) = self.placement else {
            return;
        };
        if !dx.is_finite() || !dy.is_finite() {
            return;
        }
        let moved = self.clamp_to_preview(
            Placement {
                x: placement.x + dx,
                y: placement.y + dy,
                ..placement
            },
            preview,
        );
        if moved != placement {
            self.set_placement(Some(moved));
        }
    }

    pub fn end_gesture(&mut self) {
        self.gesture = Gesture::Idle;
    }

    /// Bounds for `x` and `y` given the current scale
    ///
    /// The footprint is the same base size the mapper composites, so a
    /// placement at its bound still lands entirely on the page.
    pub fn drag_bounds(&self, scale: f64, preview: &PreviewRect) -> (f64, f64) {
        let footprint_w = self.config.base_footprint_width * scale;
        let footprint_h = self.config.base_footprint_height() * scale;
        let max_x = (preview.width - footprint_w).max(0.0);
        let max_y = (preview.height - footprint_h).max(0.0);
        (max_x, max_y)
    }

    fn clamp_to_preview(&self, placement: Placement, preview: &PreviewRect) -> Placement {
        let (max_x, max_y) = self.drag_bounds(placement.scale, preview);
        Placement {
            x: placement.x.clamp(0.0, max_x),
            y: placement.y.clamp(0.0, max_y),
            ..placement
        }
    }

    /// Switch the displayed page; any placement is discarded
    pub fn navigate_to(&mut self, page_index: usize) {
        self.end_gesture();
        if page_index == self.current_page {
            return;
        }
        self.current_page = page_index;
        if self.placement.is_some() {
            tracing::debug!(page_index, "page changed, clearing placement");
            self.set_placement(None);
        }
    }

    /// Return to the initial state for a newly loaded document
    pub fn reset(&mut self) {
        self.end_gesture();
        self.current_page = 0;
        if self.placement.is_some() {
            self.set_placement(None);
        }
    }

    fn set_placement(&mut self, placement: Option<Placement>) {
        self.placement = placement;
        for observer in &mut self.observers {
            observer.placement_changed(placement.as_ref());
        }
    }
}

impl Drop for PlacementTracker {
    fn drop(&mut self) {
        self.end_gesture();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn preview() -> PreviewRect {
        PreviewRect::new(400.0, 560.0)
    }

    fn placed_tracker(x: f64, y: f64) -> PlacementTracker {
        let mut tracker = PlacementTracker::default();
        tracker.click(x, y, &preview()).unwrap();
        tracker
    }

    #[test]
    fn test_click_centers_nominal_footprint() {
        let mut tracker = PlacementTracker::default();
        let placement = tracker.click(200.0, 300.0, &preview()).unwrap();
        assert_eq!(
            placement,
            Placement {
                x: 150.0,
                y: 275.0,
                scale: 1.0,
                page_index: 0,
            }
        );
    }

    #[test]
    fn test_second_click_does_not_move_placement() {
        let mut tracker = placed_tracker(200.0, 300.0);
        assert!(tracker.click(10.0, 10.0, &preview()).is_none());
        assert_eq!(tracker.placement().unwrap().x, 150.0);
    }

    #[test]
    fn test_click_outside_preview_is_ignored() {
        let mut tracker = PlacementTracker::default();
        assert!(tracker.click(-5.0, 10.0, &preview()).is_none());
        assert!(tracker.click(10.0, 600.0, &preview()).is_none());
        assert!(!tracker.is_placed());
    }

    #[test]
    fn test_drag_moves_by_delta() {
        let mut tracker = placed_tracker(200.0, 300.0);
        assert!(tracker.begin_drag(200.0, 300.0));
        tracker.pointer_move(210.0, 295.0, &preview());
        tracker.pointer_move(230.0, 290.0, &preview());
        tracker.end_gesture();

        let placement = tracker.placement().unwrap();
        assert_eq!((placement.x, placement.y), (180.0, 265.0));
        assert_eq!(tracker.gesture(), Gesture::Idle);
    }

    #[test]
    fn test_drag_clamps_to_preview() {
        let mut tracker = placed_tracker(200.0, 300.0);
        tracker.drag_by(-1000.0, -1000.0, &preview());
        let placement = tracker.placement().unwrap();
        assert_eq!((placement.x, placement.y), (0.0, 0.0));

        tracker.drag_by(5000.0, 5000.0, &preview());
        let placement = tracker.placement().unwrap();
        assert_eq!((placement.x, placement.y), (200.0, 460.0));
    }

    #[test]
    fn test_drag_clamp_uses_scaled_footprint() {
        let mut tracker = placed_tracker(200.0, 300.0);
        tracker.begin_resize(0.0);
        tracker.pointer_move(100.0, 0.0, &preview());
        tracker.end_gesture();
        assert_eq!(tracker.placement().unwrap().scale, 2.0);

        tracker.drag_by(5000.0, 5000.0, &preview());
        let placement = tracker.placement().unwrap();
        assert_eq!((placement.x, placement.y), (0.0, 360.0));
    }

    #[test]
    fn test_placement_at_bound_composites_inside_page() {
        use crate::coords::map_placement;
        use crate::geometry::PageGeometry;

        let mut tracker = placed_tracker(200.0, 300.0);
        tracker.drag_by(5000.0, 5000.0, &preview());
        let placement = tracker.placement().unwrap();

        let page = PageGeometry::new(400.0, 560.0);
        let rect = map_placement(&preview(), &page, &placement, &SignConfig::default()).unwrap();
        assert!(rect.x + rect.width <= page.width, "right edge {}", rect.x + rect.width);
        assert!(rect.y >= 0.0, "bottom edge {}", rect.y);
        assert_eq!((rect.width, rect.height), (200.0, 100.0));
    }

    #[test]
    fn test_footprint_wider_than_preview_pins_to_origin() {
        let narrow = PreviewRect::new(150.0, 80.0);
        let mut tracker = PlacementTracker::default();
        tracker.click(75.0, 40.0, &narrow).unwrap();
        tracker.drag_by(30.0, 30.0, &narrow);
        let placement = tracker.placement().unwrap();
        assert_eq!((placement.x, placement.y), (0.0, 0.0));
    }

    #[test]
    fn test_resize_is_horizontal_only_and_clamped() {
        let mut tracker = placed_tracker(200.0, 300.0);
        tracker.begin_resize(100.0);

        tracker.pointer_move(130.0, 900.0, &preview());
        assert!((tracker.placement().unwrap().scale - 1.3).abs() < 1e-12);

        tracker.pointer_move(-500.0, 0.0, &preview());
        assert_eq!(tracker.placement().unwrap().scale, 0.5);

        tracker.pointer_move(1000.0, 0.0, &preview());
        assert_eq!(tracker.placement().unwrap().scale, 2.0);
    }

    #[test]
    fn test_resize_does_not_move_position() {
        let mut tracker = placed_tracker(200.0, 300.0);
        tracker.begin_resize(0.0);
        tracker.pointer_move(40.0, 40.0, &preview());
        let placement = tracker.placement().unwrap();
        assert_eq!((placement.x, placement.y), (150.0, 275.0));
    }

    #[test]
    fn test_gestures_require_placement() {
        let mut tracker = PlacementTracker::default();
        assert!(!tracker.begin_drag(0.0, 0.0));
        assert!(!tracker.begin_resize(0.0));
        assert_eq!(tracker.gesture(), Gesture::Idle);
    }

    #[test]
    fn test_navigation_clears_placement_and_gesture() {
        let mut tracker = placed_tracker(200.0, 300.0);
        tracker.begin_drag(200.0, 300.0);
        tracker.navigate_to(1);

        assert!(tracker.placement().is_none());
        assert_eq!(tracker.gesture(), Gesture::Idle);
        assert_eq!(tracker.current_page(), 1);

        // Next placement belongs to the new page
        let placement = tracker.click(100.0, 100.0, &preview()).unwrap();
        assert_eq!(placement.page_index, 1);
    }

    #[test]
    fn test_moves_after_navigation_are_ignored() {
        let mut tracker = placed_tracker(200.0, 300.0);
        tracker.begin_drag(200.0, 300.0);
        tracker.navigate_to(1);
        tracker.pointer_move(250.0, 350.0, &preview());
        assert!(tracker.placement().is_none());
    }

    #[test]
    fn test_observers_see_every_change() {
        let seen: Rc<RefCell<Vec<Option<Placement>>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);

        let mut tracker = PlacementTracker::default();
        tracker.subscribe(move |p: Option<&Placement>| sink.borrow_mut().push(p.copied()));

        tracker.click(200.0, 300.0, &preview());
        tracker.drag_by(10.0, 0.0, &preview());
        tracker.navigate_to(2);

        let seen = seen.borrow();
        assert_eq!(seen.len(), 3);
        assert!(seen[0].is_some());
        assert_eq!(seen[1].unwrap().x, 160.0);
        assert!(seen[2].is_none());
    }

    #[test]
    fn test_reset_returns_to_first_page() {
        let mut tracker = placed_tracker(200.0, 300.0);
        tracker.navigate_to(3);
        tracker.reset();
        assert_eq!(tracker.current_page(), 0);
        assert!(tracker.placement().is_none());
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Property: after any drag sequence the footprint lies inside the preview
        #[test]
        fn drag_always_within_bounds(
            preview_w in 400.0f64..1200.0,
            preview_h in 200.0f64..1600.0,
            click_x_pct in 0.0f64..=1.0,
            click_y_pct in 0.0f64..=1.0,
            scale_drag in -200.0f64..200.0,
            deltas in prop::collection::vec((-500.0f64..500.0, -500.0f64..500.0), 1..20),
        ) {
            let preview = PreviewRect::new(preview_w, preview_h);
            let mut tracker = PlacementTracker::default();
            tracker.click(click_x_pct * preview_w, click_y_pct * preview_h, &preview).unwrap();

            tracker.begin_resize(0.0);
            tracker.pointer_move(scale_drag, 0.0, &preview);
            tracker.end_gesture();

            for (dx, dy) in deltas {
                tracker.drag_by(dx, dy, &preview);
            }

            let p = tracker.placement().unwrap();
            let (footprint_w, footprint_h) = (200.0 * p.scale, 100.0 * p.scale);
            prop_assert!(p.x >= 0.0 && p.x <= preview_w - footprint_w);
            prop_assert!(p.y >= 0.0 && p.y <= preview_h - footprint_h);
            prop_assert!((0.5..=2.0).contains(&p.scale));
        }
    }
}
