// src/input_system.rs
// Pointer/touch/wheel input for the orbit camera.
// Host events come in as `InputEvent` (the native host converts winit events, other hosts
// build them directly); `PointerTracker` folds them into one `OrbitInput` per frame.

use glam::Vec2;

use crate::camera_controller::OrbitInput;

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum PointerKind {
    Mouse,
    Touch,
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum PointerButton {
    Primary,
    Secondary,
    Middle,
}

/// Host input event, positions in logical pixels.
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum InputEvent {
    PointerDown { id: u64, kind: PointerKind, button: PointerButton, position: Vec2 },
    PointerMove { id: u64, position: Vec2 },
    PointerUp { id: u64 },
    /// Wheel notches; positive scrolls away from the model.
    Wheel { delta_y: f32 },
}

#[derive(Copy, Clone, Debug)]
struct Pointer {
    id: u64,
    kind: PointerKind,
    button: PointerButton,
    position: Vec2,
}

// Gesture state for up to two active pointers.
#[derive(Debug, Default)]
pub struct PointerTracker {
    pointers: Vec<Pointer>,
    pending: OrbitInput,
    dragged: bool,
}

impl PointerTracker {
    pub fn handle(&mut self, event: &InputEvent) {
        match *event {
            InputEvent::PointerDown { id, kind, button, position } => {
                if self.pointers.iter().any(|p| p.id == id) {
                    return;
                }
                // Mice have one cursor; a third finger is ignored.
                if (kind == PointerKind::Mouse && !self.pointers.is_empty()) || self.pointers.len() >= 2 {
                    return;
                }
                self.pointers.push(Pointer { id, kind, button, position });
            }
            InputEvent::PointerMove { id, position } => self.pointer_moved(id, position),
            InputEvent::PointerUp { id } => self.pointers.retain(|p| p.id != id),
            InputEvent::Wheel { delta_y } => {
                if delta_y.is_finite() {
                    self.pending.zoom += OrbitInput::wheel_zoom(delta_y);
                }
            }
        }
    }

    fn pointer_moved(&mut self, id: u64, position: Vec2) {
        let Some(index) = self.pointers.iter().position(|p| p.id == id) else { return };
        if !position.is_finite() {
            return;
        }

        if self.pointers.len() == 2 {
            let other = self.pointers[1 - index].position;
            let old = self.pointers[index].position;
            let old_span = old.distance(other);
            let new_span = position.distance(other);
            if old_span > f32::EPSILON && new_span > f32::EPSILON {
                self.pending.zoom += (old_span / new_span).ln();
            }
            // Centroid moves by half of this finger's motion.
            self.pending.pan += (position - old) * 0.5;
        } else {
            let pointer = self.pointers[index];
            let delta = position - pointer.position;
            match (pointer.kind, pointer.button) {
                (PointerKind::Mouse, PointerButton::Secondary | PointerButton::Middle) => {
                    self.pending.pan += delta
                }
                _ => self.pending.rotate += delta,
            }
        }
        self.pointers[index].position = position;
        self.dragged = true;
    }

    pub fn is_dragging(&self) -> bool {
        !self.pointers.is_empty()
    }

    /// Input accumulated since the previous call.
    pub fn take_input(&mut self, viewport_height: f32) -> OrbitInput {
        let input = OrbitInput {
            dragging: self.dragged || self.is_dragging(),
            viewport_height,
            ..self.pending
        };
        self.pending = OrbitInput::default();
        self.dragged = false;
        input
    }

    pub fn reset(&mut self) {
        self.pointers.clear();
        self.pending = OrbitInput::default();
        self.dragged = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn down(id: u64, kind: PointerKind, button: PointerButton, x: f32, y: f32) -> InputEvent {
        InputEvent::PointerDown { id, kind, button, position: Vec2::new(x, y) }
    }

    fn mv(id: u64, x: f32, y: f32) -> InputEvent {
        InputEvent::PointerMove { id, position: Vec2::new(x, y) }
    }

    #[test]
    fn primary_drag_rotates_secondary_pans() {
        let mut t = PointerTracker::default();
        t.handle(&down(1, PointerKind::Mouse, PointerButton::Primary, 10.0, 10.0));
        t.handle(&mv(1, 30.0, 5.0));
        let input = t.take_input(600.0);
        assert_eq!(input.rotate, Vec2::new(20.0, -5.0));
        assert!(input.dragging);

        t.handle(&InputEvent::PointerUp { id: 1 });
        t.handle(&down(1, PointerKind::Mouse, PointerButton::Secondary, 0.0, 0.0));
        t.handle(&mv(1, 4.0, 4.0));
        let input = t.take_input(600.0);
        assert_eq!(input.pan, Vec2::new(4.0, 4.0));
        assert_eq!(input.rotate, Vec2::ZERO);
    }

    #[test]
    fn pinch_out_zooms_in() {
        let mut t = PointerTracker::default();
        t.handle(&down(1, PointerKind::Touch, PointerButton::Primary, 100.0, 100.0));
        t.handle(&down(2, PointerKind::Touch, PointerButton::Primary, 200.0, 100.0));
        t.handle(&mv(2, 300.0, 100.0));
        let input = t.take_input(600.0);
        assert!(input.zoom < 0.0);
        assert!((input.zoom - 0.5f32.ln()).abs() < 1e-6);
        assert_eq!(input.rotate, Vec2::ZERO);
    }

    #[test]
    fn release_ends_drag_after_one_frame() {
        let mut t = PointerTracker::default();
        t.handle(&down(7, PointerKind::Touch, PointerButton::Primary, 0.0, 0.0));
        t.handle(&mv(7, 1.0, 0.0));
        t.handle(&InputEvent::PointerUp { id: 7 });
        assert!(t.take_input(600.0).dragging);
        assert!(!t.take_input(600.0).dragging);
    }

    #[test]
    fn wheel_accumulates_zoom() {
        let mut t = PointerTracker::default();
        t.handle(&InputEvent::Wheel { delta_y: 1.0 });
        t.handle(&InputEvent::Wheel { delta_y: 1.0 });
        let input = t.take_input(600.0);
        assert!(input.zoom > 0.0);
        assert!(!input.dragging);
    }
}
