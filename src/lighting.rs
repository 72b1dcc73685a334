// src/lighting.rs
use bytemuck::{Pod, Zeroable};
use glam::Vec3;

/// Lights the uniform has room for.
pub const MAX_LIGHTS: usize = 4;

pub const LIGHT_DIRECTIONAL: u32 = 0;
pub const LIGHT_SPOT: u32 = 2;

/// One light as the mesh shader reads it (matches WGSL `Light`).
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct GpuLight {
    pub position: [f32; 3],
    pub light_type: u32,
    pub color: [f32; 3],
    pub intensity: f32,
    /// Normalized, pointing from the light into the scene.
    pub direction: [f32; 3],
    /// Cosine of the half cone angle; unused for directional lights.
    pub spot_angle_cos: f32,
    pub casts_shadow: u32,
    pub _pad: [u32; 3],
}

/// Whole rig uniform (matches WGSL `Lighting`).
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct LightingUniform {
    pub ambient: [f32; 3],
    pub ambient_intensity: f32,
    pub light_count: u32,
    pub _pad: [u32; 3],
    pub lights: [GpuLight; MAX_LIGHTS],
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum LightKind {
    Directional,
    /// `cone_angle` is the full opening angle in radians.
    Spot { cone_angle: f32 },
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Light {
    pub kind: LightKind,
    pub position: Vec3,
    /// Point the light aims at.
    pub target: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    pub cast_shadow: bool,
}

impl Light {
    pub fn directional(position: Vec3, intensity: f32) -> Self {
        Self {
            kind: LightKind::Directional,
            position,
            target: Vec3::ZERO,
            color: Vec3::ONE,
            intensity,
            cast_shadow: false,
        }
    }

    pub fn spot(position: Vec3, target: Vec3, cone_angle: f32, intensity: f32) -> Self {
        Self {
            kind: LightKind::Spot { cone_angle },
            position,
            target,
            color: Vec3::ONE,
            intensity,
            cast_shadow: false,
        }
    }

    pub fn with_shadow(mut self) -> Self {
        self.cast_shadow = true;
        self
    }

    pub fn direction(&self) -> Vec3 {
        (self.target - self.position).normalize_or_zero()
    }

    pub fn to_gpu(&self) -> GpuLight {
        let (light_type, spot_angle_cos) = match self.kind {
            LightKind::Directional => (LIGHT_DIRECTIONAL, -1.0),
            LightKind::Spot { cone_angle } => (LIGHT_SPOT, (cone_angle * 0.5).cos()),
        };
        GpuLight {
            position: self.position.to_array(),
            light_type,
            color: self.color.to_array(),
            intensity: self.intensity,
            direction: self.direction().to_array(),
            spot_angle_cos,
            casts_shadow: self.cast_shadow as u32,
            _pad: [0; 3],
        }
    }
}

/// Ambient term plus a handful of analytic lights. Built once per session.
#[derive(Clone, Debug, PartialEq)]
pub struct LightRig {
    pub ambient_color: Vec3,
    pub ambient_intensity: f32,
    pub lights: Vec<Light>,
}

impl LightRig {
    /// Studio rig: soft ambient, key light with shadows, a rim light behind the model and a
    /// narrow spot from above.
    pub fn showroom() -> Self {
        Self {
            ambient_color: Vec3::ONE,
            ambient_intensity: 0.5,
            lights: vec![
                Light::directional(Vec3::new(10.0, 10.0, 5.0), 1.0).with_shadow(),
                Light::directional(Vec3::new(-10.0, 5.0, -5.0), 0.5),
                Light::spot(Vec3::new(0.0, 10.0, 0.0), Vec3::ZERO, 30f32.to_radians(), 0.8),
            ],
        }
    }

    /// Uniform payload. Lights past `MAX_LIGHTS` are dropped with a warning.
    pub fn uniform(&self) -> LightingUniform {
        if self.lights.len() > MAX_LIGHTS {
            log::warn!(
                "light rig has {} lights, only the first {MAX_LIGHTS} are uploaded",
                self.lights.len()
            );
        }
        let mut lights = [GpuLight::default(); MAX_LIGHTS];
        let count = self.lights.len().min(MAX_LIGHTS);
        for (slot, light) in lights.iter_mut().zip(&self.lights) {
            *slot = light.to_gpu();
        }
        LightingUniform {
            ambient: self.ambient_color.to_array(),
            ambient_intensity: self.ambient_intensity,
            light_count: count as u32,
            _pad: [0; 3],
            lights,
        }
    }
}

impl Default for LightRig {
    fn default() -> Self {
        Self::showroom()
    }
}
