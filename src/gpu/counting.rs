// src/gpu/counting.rs
// Headless backend that records every acquisition and release. Hosts without a GPU (tests,
// servers rendering nothing) mount the viewer on this; leak checks read the shared stats.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{
    BindingDesc, BufferDesc, FrameDraw, GpuBackend, GpuHandle, HandleAllocator, ProgramDesc,
    ResourceKind, TextureDesc,
};
use crate::error::{Result, ViewerError};

/// Counters shared between the backend and whoever inspects it.
#[derive(Clone, Debug, Default)]
pub struct GpuStats {
    pub acquired: usize,
    pub released: usize,
    pub failed_releases: usize,
    pub live: HashSet<GpuHandle>,
    pub frames: usize,
    pub surface_size: (u32, u32),
    pub last_frame: Option<FrameDraw>,
    /// Allocations left before every further allocation fails. `None` never fails.
    pub fail_after: Option<usize>,
    /// Largest texture side accepted, like a device's `max_texture_dimension_2d`.
    pub max_texture_dimension: Option<u32>,
}

impl GpuStats {
    pub fn live_of(&self, kind: ResourceKind) -> usize {
        self.live.iter().filter(|h| h.kind() == kind).count()
    }

    pub fn balanced(&self) -> bool {
        self.acquired == self.released && self.live.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct CountingBackend {
    ids: HandleAllocator,
    stats: Arc<Mutex<GpuStats>>,
}

impl CountingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend whose allocations start failing after `n` successes.
    pub fn failing_after(n: usize) -> Self {
        let backend = Self::default();
        backend.stats.lock().fail_after = Some(n);
        backend
    }

    /// Backend that rejects textures with a side longer than `max`.
    pub fn with_max_texture_dimension(max: u32) -> Self {
        let backend = Self::default();
        backend.stats.lock().max_texture_dimension = Some(max);
        backend
    }

    /// Shared view of the counters; stays valid after the backend is dropped.
    pub fn stats(&self) -> Arc<Mutex<GpuStats>> {
        Arc::clone(&self.stats)
    }

    fn acquire(&mut self, kind: ResourceKind, label: &str) -> Result<GpuHandle> {
        let mut stats = self.stats.lock();
        if let Some(left) = stats.fail_after.as_mut() {
            if *left == 0 {
                return Err(ViewerError::exhausted(format!("{kind:?} `{label}`")));
            }
            *left -= 1;
        }
        let handle = self.ids.next(kind);
        stats.acquired += 1;
        stats.live.insert(handle);
        Ok(handle)
    }

    fn check_live(&self, handle: GpuHandle) -> Result<()> {
        if self.stats.lock().live.contains(&handle) {
            Ok(())
        } else {
            Err(ViewerError::invalid_state(format!(
                "{:?} #{} is not live",
                handle.kind(),
                handle.id()
            )))
        }
    }
}

impl GpuBackend for CountingBackend {
    fn create_buffer(&mut self, desc: &BufferDesc<'_>) -> Result<GpuHandle> {
        self.acquire(ResourceKind::Buffer, desc.label)
    }

    fn write_buffer(&mut self, buffer: GpuHandle, _offset: u64, _data: &[u8]) -> Result<()> {
        self.check_live(buffer)
    }

    fn create_texture(&mut self, desc: &TextureDesc<'_>) -> Result<GpuHandle> {
        crate::ensure!(
            desc.rgba.len() == (desc.width as usize) * (desc.height as usize) * 4,
            ViewerError::unsupported(desc.label, "short pixel buffer")
        );
        let max_dimension = self.stats.lock().max_texture_dimension;
        if let Some(limit) = max_dimension {
            crate::ensure!(
                desc.width <= limit && desc.height <= limit,
                ViewerError::unsupported(
                    desc.label,
                    format!("texture {}x{} exceeds the device limit {limit}", desc.width, desc.height)
                )
            );
        }
        self.acquire(ResourceKind::Texture, desc.label)
    }

    fn create_program(&mut self, desc: &ProgramDesc<'_>) -> Result<GpuHandle> {
        self.acquire(ResourceKind::Program, desc.label)
    }

    fn create_binding(&mut self, desc: &BindingDesc<'_>) -> Result<GpuHandle> {
        for handle in desc.buffers.iter().chain(desc.texture.iter()) {
            self.check_live(*handle)?;
        }
        self.acquire(ResourceKind::Binding, desc.label)
    }

    fn release(&mut self, handle: GpuHandle) -> Result<()> {
        let mut stats = self.stats.lock();
        if stats.live.remove(&handle) {
            stats.released += 1;
            Ok(())
        } else {
            stats.failed_releases += 1;
            Err(ViewerError::invalid_state(format!(
                "double release of {:?} #{}",
                handle.kind(),
                handle.id()
            )))
        }
    }

    fn resize_surface(&mut self, width: u32, height: u32) {
        self.stats.lock().surface_size = (width, height);
    }

    fn draw(&mut self, frame: &FrameDraw) -> Result<()> {
        let mut stats = self.stats.lock();
        for item in &frame.items {
            let referenced = item
                .bindings
                .iter()
                .chain(item.vertex_buffer.iter())
                .chain(item.index_buffer.iter())
                .chain(std::iter::once(&item.program));
            for handle in referenced {
                crate::ensure!(
                    stats.live.contains(handle),
                    ViewerError::invalid_state(format!("draw references released {handle:?}"))
                );
            }
        }
        stats.frames += 1;
        stats.last_frame = Some(frame.clone());
        Ok(())
    }

    fn live_resources(&self) -> usize {
        self.stats.lock().live.len()
    }
}
