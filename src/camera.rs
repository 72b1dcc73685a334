// src/camera.rs
use std::f32::consts::{FRAC_PI_4, PI};

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

/// Perspective projection parameters.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Projection {
    /// Vertical field of view (radians).
    pub fov_y: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Projection {
    fn default() -> Self {
        Self { fov_y: 45f32.to_radians(), aspect: 1.0, near: 0.1, far: 1000.0 }
    }
}

impl Projection {
    pub fn matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, self.aspect, self.near, self.far)
    }
}

/// Rotation/zoom/pan still to be applied, consumed a damped fraction per frame.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct PendingDelta {
    pub azimuth: f32,
    pub polar: f32,
    /// Natural log of the distance scale (negative zooms in).
    pub zoom: f32,
}

/// Orbit camera. Position is derived from target + spherical coordinates (Y up).
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CameraState {
    pub target: Vec3,
    /// Where `target` settles; moved by panning.
    pub target_goal: Vec3,
    /// Angle around Y measured from +Z (radians).
    pub azimuth: f32,
    /// Angle from +Y (radians).
    pub polar: f32,
    pub distance: f32,
    pub min_polar: f32,
    pub max_polar: f32,
    pub min_distance: f32,
    pub max_distance: f32,
    /// Current auto-rotate speed (1.0 = one orbit per minute).
    pub auto_rotate_speed: f32,
    pub damping: f32,
    pub pending: PendingDelta,
    pub projection: Projection,
}

impl Default for CameraState {
    fn default() -> Self {
        Self::looking_from(Vec3::new(0.0, 2.0, 10.0), Vec3::ZERO)
    }
}

impl CameraState {
    /// Camera at `eye` orbiting `target`, default limits (polar within [pi/4, 3pi/4],
    /// distance within [3, 12]). The initial pose is clamped into those limits.
    pub fn looking_from(eye: Vec3, target: Vec3) -> Self {
        let offset = eye - target;
        let distance = offset.length().max(f32::EPSILON);
        let polar = (offset.y / distance).clamp(-1.0, 1.0).acos();
        let azimuth = offset.x.atan2(offset.z);
        let mut state = Self {
            target,
            target_goal: target,
            azimuth,
            polar,
            distance,
            min_polar: FRAC_PI_4,
            max_polar: 3.0 * FRAC_PI_4,
            min_distance: 3.0,
            max_distance: 12.0,
            auto_rotate_speed: 0.0,
            damping: 0.05,
            pending: PendingDelta::default(),
            projection: Projection::default(),
        };
        state.clamp();
        state
    }

    /// Enforce polar and distance bounds, wrap azimuth into (-pi, pi].
    pub fn clamp(&mut self) {
        self.polar = self.polar.clamp(self.min_polar, self.max_polar);
        self.distance = self.distance.clamp(self.min_distance, self.max_distance);
        if self.azimuth > PI || self.azimuth <= -PI {
            self.azimuth = (self.azimuth + PI).rem_euclid(2.0 * PI) - PI;
        }
    }

    pub fn position(&self) -> Vec3 {
        let (sin_p, cos_p) = self.polar.sin_cos();
        let (sin_a, cos_a) = self.azimuth.sin_cos();
        self.target + self.distance * Vec3::new(sin_p * sin_a, cos_p, sin_p * cos_a)
    }

    pub fn set_aspect(&mut self, aspect: f32) {
        if aspect.is_finite() && aspect > 0.0 {
            self.projection.aspect = aspect;
        }
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position(), self.target, Vec3::Y)
    }

    pub fn view_proj_matrix(&self) -> Mat4 {
        self.projection.matrix() * self.view_matrix()
    }

    /// Camera-space right and up axes in world space (for panning).
    pub fn screen_axes(&self) -> (Vec3, Vec3) {
        let forward = (self.target - self.position()).normalize_or_zero();
        let right = forward.cross(Vec3::Y).normalize_or_zero();
        let up = right.cross(forward);
        (right, up)
    }
}

/// GPU camera uniform (matches WGSL `Camera`).
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct CameraUniform {
    pub view_proj: [[f32; 4]; 4],
    /// xyz = eye position
    pub eye: [f32; 4],
}

impl CameraUniform {
    pub fn from_state(camera: &CameraState) -> Self {
        Self {
            view_proj: camera.view_proj_matrix().to_cols_array_2d(),
            eye: camera.position().extend(1.0).to_array(),
        }
    }
}
