// src/config.rs
//! Viewer configuration.
//!
//! Every tunable lives here with its default. Hosts pass JSON in camelCase; missing keys keep
//! their defaults, unknown keys are ignored.
//!
//! ```json
//! { "autoRotateTargetSpeed": 2.0, "enablePan": false, "enableZoom": true, "pixelDensityCap": 2 }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::camera_controller::OrbitSettings;
use crate::context::Context;
use crate::error::Result;
use crate::pbr_materials::ShowroomPresets;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ViewerConfig {
    /// 1.0 = one orbit per 60 s; 0 disables auto-rotation.
    pub auto_rotate_target_speed: f32,
    pub auto_rotate_increment: f32,
    pub enable_pan: bool,
    pub enable_zoom: bool,
    pub rotate_speed: f32,
    pub damping: f32,
    pub min_distance: f32,
    pub max_distance: f32,
    /// Upper bound on the device pixel ratio used for the drawing surface.
    pub pixel_density_cap: f32,
    /// Uniform scale applied to the attached model.
    pub model_scale: f32,
    /// sRGB clear color, 0xRRGGBB.
    pub background: u32,
    /// Fixed simulation step in seconds; `None` steps once per display refresh.
    pub fixed_step: Option<f32>,
    pub presets: ShowroomPresets,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        let orbit = OrbitSettings::default();
        Self {
            auto_rotate_target_speed: orbit.auto_rotate_target_speed,
            auto_rotate_increment: orbit.auto_rotate_increment,
            enable_pan: orbit.enable_pan,
            enable_zoom: orbit.enable_zoom,
            rotate_speed: orbit.rotate_speed,
            damping: orbit.damping,
            min_distance: orbit.min_distance,
            max_distance: orbit.max_distance,
            pixel_density_cap: 2.0,
            model_scale: 2.0,
            background: 0x1a1b25,
            fixed_step: None,
            presets: ShowroomPresets::default(),
        }
    }
}

impl ViewerConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("parsing viewer config")?;
        Ok(config.sanitized())
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_json(&raw)
    }

    /// Repair values that would break invariants (inverted bounds, negative speeds, NaN).
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        let finite_or = |v: f32, d: f32| if v.is_finite() { v } else { d };

        self.auto_rotate_target_speed =
            finite_or(self.auto_rotate_target_speed, defaults.auto_rotate_target_speed).max(0.0);
        self.auto_rotate_increment =
            finite_or(self.auto_rotate_increment, defaults.auto_rotate_increment).max(0.0);
        self.rotate_speed = finite_or(self.rotate_speed, defaults.rotate_speed);
        self.damping = finite_or(self.damping, defaults.damping).clamp(0.0, 1.0);
        self.min_distance = finite_or(self.min_distance, defaults.min_distance).max(0.01);
        self.max_distance = finite_or(self.max_distance, defaults.max_distance);
        if self.max_distance < self.min_distance {
            log::warn!(
                "maxDistance {} below minDistance {}, swapping",
                self.max_distance,
                self.min_distance
            );
            std::mem::swap(&mut self.min_distance, &mut self.max_distance);
        }
        self.pixel_density_cap = finite_or(self.pixel_density_cap, defaults.pixel_density_cap).max(1.0);
        self.model_scale = finite_or(self.model_scale, defaults.model_scale);
        if self.model_scale <= 0.0 {
            self.model_scale = defaults.model_scale;
        }
        self.fixed_step = self.fixed_step.filter(|s| s.is_finite() && *s > 0.0);
        self
    }

    pub fn orbit_settings(&self) -> OrbitSettings {
        OrbitSettings {
            auto_rotate_target_speed: self.auto_rotate_target_speed,
            auto_rotate_increment: self.auto_rotate_increment,
            damping: self.damping,
            rotate_speed: self.rotate_speed,
            enable_pan: self.enable_pan,
            enable_zoom: self.enable_zoom,
            min_distance: self.min_distance,
            max_distance: self.max_distance,
            ..OrbitSettings::default()
        }
    }

    /// Background as linear RGBA for the clear color.
    pub fn clear_color(&self) -> [f32; 4] {
        let channel = |shift: u32| srgb_to_linear(((self.background >> shift) & 0xff) as f32 / 255.0);
        [channel(16), channel(8), channel(0), 1.0]
    }
}

fn srgb_to_linear(c: f32) -> f32 {
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}
