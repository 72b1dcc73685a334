// src/viewport.rs
// Keeps the camera aspect and the drawing-surface resolution in step with the host element.
// Size notifications may arrive at any rate; they are coalesced and applied once per frame.

use serde::{Deserialize, Serialize};

use crate::camera::CameraState;
use crate::gpu::GpuBackend;

/// Host element size in logical pixels plus its device pixel ratio.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewportSize {
    pub width: f32,
    pub height: f32,
    pub device_pixel_ratio: f32,
}

impl ViewportSize {
    pub fn new(width: f32, height: f32, device_pixel_ratio: f32) -> Self {
        Self { width, height, device_pixel_ratio }
    }

    pub fn is_empty(&self) -> bool {
        !(self.width.is_finite() && self.height.is_finite()) || self.width <= 0.0 || self.height <= 0.0
    }

    pub fn aspect(&self) -> f32 {
        self.width / self.height
    }

    /// Effective pixel ratio: device ratio capped, never below 1.
    pub fn pixel_ratio(&self, cap: f32) -> f32 {
        let dpr = if self.device_pixel_ratio.is_finite() { self.device_pixel_ratio } else { 1.0 };
        dpr.min(cap).max(1.0)
    }

    /// Physical surface size, at least 1x1.
    pub fn physical(&self, cap: f32) -> (u32, u32) {
        let ratio = self.pixel_ratio(cap);
        (
            ((self.width * ratio).round() as u32).max(1),
            ((self.height * ratio).round() as u32).max(1),
        )
    }
}

#[derive(Debug)]
pub struct ViewportResizeHandler {
    pixel_density_cap: f32,
    applied: Option<ViewportSize>,
    latest: Option<ViewportSize>,
    attached: bool,
}

impl ViewportResizeHandler {
    pub fn new(pixel_density_cap: f32) -> Self {
        let cap = if pixel_density_cap.is_finite() { pixel_density_cap.max(1.0) } else { 1.0 };
        Self { pixel_density_cap: cap, applied: None, latest: None, attached: true }
    }

    /// Record the latest host size. Zero-area sizes are ignored.
    pub fn observe(&mut self, size: ViewportSize) {
        if !self.attached {
            return;
        }
        if size.is_empty() {
            log::debug!("ignoring empty viewport {}x{}", size.width, size.height);
            return;
        }
        self.latest = Some(size);
    }

    /// Push the net change (if any) to the camera and the surface. Returns whether it did.
    pub fn apply(&mut self, camera: &mut CameraState, backend: &mut dyn GpuBackend) -> bool {
        if !self.attached {
            return false;
        }
        let Some(latest) = self.latest.take() else { return false };
        if self.applied == Some(latest) {
            return false;
        }
        let (w, h) = latest.physical(self.pixel_density_cap);
        camera.set_aspect(latest.aspect());
        backend.resize_surface(w, h);
        self.applied = Some(latest);
        log::debug!(
            "viewport {}x{} @{} -> surface {w}x{h}",
            latest.width,
            latest.height,
            latest.device_pixel_ratio
        );
        true
    }

    /// Last size pushed to the surface.
    pub fn current(&self) -> Option<ViewportSize> {
        self.applied
    }

    pub fn detach(&mut self) {
        self.attached = false;
        self.latest = None;
    }
}
