// src/camera_controller.rs
// Orbit camera controller for the showroom viewer.
//
// The whole per-frame update is `step(state, dt, input, settings)`: it reads nothing but its
// arguments, so replaying the same input sequence always yields the same camera path.
//
// Example usage:
// let mut orbit = OrbitController::new(CameraState::default(), OrbitSettings::default());
// orbit.handle_event(&event);          // any number of times between frames
// orbit.update(dt, viewport_height);   // once per frame
// let view_proj = orbit.state().view_proj_matrix();

use std::f32::consts::{FRAC_PI_4, TAU};

use glam::Vec2;

use crate::camera::{CameraState, PendingDelta};
use crate::input_system::{InputEvent, PointerTracker};

/// Largest dt the controller integrates in one step (seconds).
const MAX_STEP: f32 = 0.25;
/// Zoom factor of a single wheel notch.
const WHEEL_ZOOM_SCALE: f32 = 0.95;

/// Tunables for orbit behavior.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct OrbitSettings {
    /// Speed the auto-rotation ramps up to (1.0 = one orbit per 60 s). 0 disables it.
    pub auto_rotate_target_speed: f32,
    /// Added to the auto-rotate speed every frame until the target is reached.
    pub auto_rotate_increment: f32,
    /// Fraction of the pending delta applied per 60 Hz frame.
    pub damping: f32,
    pub rotate_speed: f32,
    pub zoom_speed: f32,
    pub pan_speed: f32,
    pub enable_pan: bool,
    pub enable_zoom: bool,
    pub min_polar: f32,
    pub max_polar: f32,
    pub min_distance: f32,
    pub max_distance: f32,
}

impl Default for OrbitSettings {
    fn default() -> Self {
        Self {
            auto_rotate_target_speed: 2.0,
            auto_rotate_increment: 0.05,
            damping: 0.05,
            rotate_speed: 0.5,
            zoom_speed: 1.0,
            pan_speed: 1.0,
            enable_pan: false,
            enable_zoom: true,
            min_polar: FRAC_PI_4,
            max_polar: 3.0 * FRAC_PI_4,
            min_distance: 3.0,
            max_distance: 12.0,
        }
    }
}

/// Gesture input gathered since the previous frame.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct OrbitInput {
    /// Rotate drag in logical pixels.
    pub rotate: Vec2,
    /// Pan drag in logical pixels.
    pub pan: Vec2,
    /// Natural log of the requested distance scale (negative zooms in).
    pub zoom: f32,
    /// A rotate or pan drag is in progress.
    pub dragging: bool,
    /// Viewport height in logical pixels, converts pixels to angles.
    pub viewport_height: f32,
}

impl OrbitInput {
    /// Zoom request for `notches` wheel steps (positive scrolls away from the model).
    pub fn wheel_zoom(notches: f32) -> f32 {
        -notches * WHEEL_ZOOM_SCALE.ln()
    }
}

/// Advance the camera by one frame.
pub fn step(state: &CameraState, dt: f32, input: &OrbitInput, settings: &OrbitSettings) -> CameraState {
    let mut next = *state;
    next.min_polar = settings.min_polar;
    next.max_polar = settings.max_polar;
    next.min_distance = settings.min_distance;
    next.max_distance = settings.max_distance;
    next.damping = settings.damping;

    let dt = if dt.is_finite() { dt.clamp(0.0, MAX_STEP) } else { 0.0 };
    let height = input.viewport_height.max(1.0);

    // A drag takes over; the ramp restarts from zero once it ends.
    if input.dragging {
        next.auto_rotate_speed = 0.0;
    } else {
        let target = settings.auto_rotate_target_speed.max(0.0);
        next.auto_rotate_speed = (next.auto_rotate_speed + settings.auto_rotate_increment).min(target);
        next.pending.azimuth -= TAU / 60.0 * next.auto_rotate_speed * dt;
    }

    next.pending.azimuth -= TAU * input.rotate.x / height * settings.rotate_speed;
    next.pending.polar -= TAU * input.rotate.y / height * settings.rotate_speed;

    if settings.enable_zoom {
        next.pending.zoom += input.zoom * settings.zoom_speed;
    }

    if settings.enable_pan && input.pan != Vec2::ZERO {
        // Pixels to world units at the target's depth.
        let world_per_px = 2.0 * next.distance * (next.projection.fov_y * 0.5).tan() / height;
        let (right, up) = next.screen_axes();
        let pan = input.pan * world_per_px * settings.pan_speed;
        next.target_goal += -right * pan.x + up * pan.y;
    }

    let k = damping_fraction(settings.damping, dt);
    next.azimuth += next.pending.azimuth * k;
    next.polar += next.pending.polar * k;
    next.distance *= (next.pending.zoom * k).exp();
    next.target += (next.target_goal - next.target) * k;
    next.pending = PendingDelta {
        azimuth: next.pending.azimuth * (1.0 - k),
        polar: next.pending.polar * (1.0 - k),
        zoom: next.pending.zoom * (1.0 - k),
    };

    next.clamp();
    // Deltas pushing past a limit are dropped so they don't stick to the bound.
    if next.polar <= next.min_polar && next.pending.polar < 0.0
        || next.polar >= next.max_polar && next.pending.polar > 0.0
    {
        next.pending.polar = 0.0;
    }
    if next.distance <= next.min_distance && next.pending.zoom < 0.0
        || next.distance >= next.max_distance && next.pending.zoom > 0.0
    {
        next.pending.zoom = 0.0;
    }
    next
}

/// Share of a pending delta consumed in `dt`, `damping` per 60 Hz frame.
fn damping_fraction(damping: f32, dt: f32) -> f32 {
    if damping <= 0.0 || damping >= 1.0 {
        return 1.0;
    }
    1.0 - (1.0 - damping).powf(dt * 60.0)
}

/// Owns the camera state and the pointer tracker feeding it.
#[derive(Debug)]
pub struct OrbitController {
    state: CameraState,
    settings: OrbitSettings,
    tracker: PointerTracker,
    attached: bool,
}

impl OrbitController {
    pub fn new(mut state: CameraState, settings: OrbitSettings) -> Self {
        state.min_polar = settings.min_polar;
        state.max_polar = settings.max_polar;
        state.min_distance = settings.min_distance;
        state.max_distance = settings.max_distance;
        state.damping = settings.damping;
        state.clamp();
        Self { state, settings, tracker: PointerTracker::default(), attached: true }
    }

    pub fn state(&self) -> &CameraState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut CameraState {
        &mut self.state
    }

    pub fn settings(&self) -> &OrbitSettings {
        &self.settings
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Feed one input event. Ignored once detached.
    pub fn handle_event(&mut self, event: &InputEvent) {
        if self.attached {
            self.tracker.handle(event);
        }
    }

    /// Per-frame update.
    pub fn update(&mut self, dt: f32, viewport_height: f32) {
        let input = self.tracker.take_input(viewport_height);
        self.state = step(&self.state, dt, &input, &self.settings);
    }

    /// Unbind input; drops any gesture in progress.
    pub fn detach(&mut self) {
        self.attached = false;
        self.tracker.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    const DT: f32 = 1.0 / 60.0;

    fn idle() -> OrbitInput {
        OrbitInput { viewport_height: 600.0, ..Default::default() }
    }

    #[test]
    fn auto_rotate_ramps_to_target() {
        let settings = OrbitSettings::default();
        let mut state = CameraState::default();
        let mut prev = 0.0;
        for _ in 0..100 {
            state = step(&state, DT, &idle(), &settings);
            assert!(state.auto_rotate_speed >= prev);
            assert!(state.auto_rotate_speed <= settings.auto_rotate_target_speed);
            prev = state.auto_rotate_speed;
        }
        assert_eq!(state.auto_rotate_speed, settings.auto_rotate_target_speed);
    }

    #[test]
    fn drag_resets_auto_rotate() {
        let settings = OrbitSettings::default();
        let mut state = CameraState::default();
        for _ in 0..10 {
            state = step(&state, DT, &idle(), &settings);
        }
        assert!(state.auto_rotate_speed > 0.0);
        let drag = OrbitInput { rotate: Vec2::new(5.0, 0.0), dragging: true, ..idle() };
        state = step(&state, DT, &drag, &settings);
        assert_eq!(state.auto_rotate_speed, 0.0);
        state = step(&state, DT, &idle(), &settings);
        assert!((state.auto_rotate_speed - settings.auto_rotate_increment).abs() < 1e-6);
    }

    #[test]
    fn unit_speed_is_one_orbit_per_minute() {
        let settings = OrbitSettings { auto_rotate_target_speed: 1.0, damping: 0.0, ..Default::default() };
        let state = CameraState { auto_rotate_speed: 1.0, ..CameraState::default() };
        let next = step(&state, 0.2, &idle(), &settings);
        let expected = TAU / 60.0 * 0.2;
        assert!(((next.azimuth - state.azimuth).abs() - expected).abs() < 1e-5);
    }

    #[test]
    fn polar_stays_bounded_under_random_drags() {
        let settings = OrbitSettings::default();
        let mut rng = StdRng::seed_from_u64(7);
        let mut state = CameraState::default();
        for _ in 0..2_000 {
            let input = OrbitInput {
                rotate: Vec2::new(rng.gen_range(-400.0..400.0), rng.gen_range(-400.0..400.0)),
                zoom: rng.gen_range(-2.0..2.0),
                dragging: rng.gen_bool(0.7),
                ..idle()
            };
            state = step(&state, rng.gen_range(0.0..0.1), &input, &settings);
            assert!(state.polar >= settings.min_polar && state.polar <= settings.max_polar);
            assert!(state.distance >= settings.min_distance && state.distance <= settings.max_distance);
        }
    }

    #[test]
    fn pan_and_zoom_flags_are_all_or_nothing() {
        let locked = OrbitSettings { enable_pan: false, enable_zoom: false, ..Default::default() };
        let state = CameraState::default();
        let input = OrbitInput { pan: Vec2::new(100.0, 50.0), zoom: -1.0, dragging: true, ..idle() };
        let next = step(&state, DT, &input, &locked);
        assert_eq!(next.target_goal, state.target_goal);
        assert_eq!(next.distance, state.distance);

        let open = OrbitSettings { enable_pan: true, ..locked };
        let next = step(&state, DT, &input, &open);
        assert_ne!(next.target_goal, state.target_goal);
        assert!((next.target - state.target).length() > 0.0);
    }

    #[test]
    fn damping_is_frame_rate_independent() {
        assert!((damping_fraction(0.05, DT) - 0.05).abs() < 1e-6);
        let two_half = 1.0 - (1.0 - damping_fraction(0.05, DT / 2.0)).powi(2);
        assert!((two_half - 0.05).abs() < 1e-6);
    }

    #[test]
    fn detached_controller_ignores_input() {
        let mut orbit = OrbitController::new(CameraState::default(), OrbitSettings::default());
        orbit.detach();
        orbit.handle_event(&InputEvent::Wheel { delta_y: -10.0 });
        let before = orbit.state().distance;
        orbit.update(DT, 600.0);
        assert_eq!(orbit.state().distance, before);
    }
}
