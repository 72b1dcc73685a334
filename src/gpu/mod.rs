// src/gpu/mod.rs
//! GPU abstraction used by the viewer.
//!
//! Everything the viewer allocates on the GPU goes through [`GpuBackend`] and comes back as an
//! opaque [`GpuHandle`]. Every handle is released exactly once; the composer and the viewer own
//! that bookkeeping, backends only have to honor the calls.
//!
//! Two backends:
//! * [`WgpuBackend`]: the real renderer.
//! * [`CountingBackend`]: headless, counts acquisitions/releases, can be told to fail.

use bytemuck::{Pod, Zeroable};

use crate::error::Result;

pub mod counting;
pub mod wgpu_backend;

pub use counting::{CountingBackend, GpuStats};
pub use wgpu_backend::WgpuBackend;

/// Kind of GPU object behind a handle.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Buffer,
    Texture,
    Binding,
    Program,
}

/// Opaque handle to a backend resource.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct GpuHandle {
    kind: ResourceKind,
    id: u64,
}

impl GpuHandle {
    #[inline]
    pub(crate) fn new(kind: ResourceKind, id: u64) -> Self {
        Self { kind, id }
    }

    #[inline]
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Monotonic id source shared by both backends.
#[derive(Debug, Default)]
pub(crate) struct HandleAllocator {
    next: u64,
}

impl HandleAllocator {
    pub(crate) fn next(&mut self, kind: ResourceKind) -> GpuHandle {
        self.next += 1;
        GpuHandle::new(kind, self.next)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    Vertex,
    Index,
    /// Rewritable with [`GpuBackend::write_buffer`].
    Uniform,
}

#[derive(Copy, Clone, Debug)]
pub struct BufferDesc<'a> {
    pub label: &'a str,
    pub usage: BufferUsage,
    pub contents: &'a [u8],
}

/// RGBA8 sRGB texture.
#[derive(Copy, Clone, Debug)]
pub struct TextureDesc<'a> {
    pub label: &'a str,
    pub width: u32,
    pub height: u32,
    pub rgba: &'a [u8],
}

/// Which shader program a pipeline is built for.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ProgramKind {
    /// Lit model geometry. Bind groups: 0 = frame, 1 = mesh.
    Mesh,
    /// Screen-space loading indicator. Bind group 0 = overlay.
    Overlay,
}

#[derive(Copy, Clone, Debug)]
pub struct ProgramDesc<'a> {
    pub label: &'a str,
    pub kind: ProgramKind,
    pub source: &'a str,
}

/// Layout of a binding group.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BindingLayout {
    /// camera uniform, lighting uniform
    Frame,
    /// mesh uniform, optional base color texture (backend default when absent)
    Mesh,
    /// overlay uniform
    Overlay,
}

#[derive(Copy, Clone, Debug)]
pub struct BindingDesc<'a> {
    pub label: &'a str,
    pub layout: BindingLayout,
    pub buffers: &'a [GpuHandle],
    pub texture: Option<GpuHandle>,
}

/// Interleaved vertex layout of every model buffer.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct MeshVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

/// One draw call.
#[derive(Clone, Debug, PartialEq)]
pub struct DrawItem {
    pub program: GpuHandle,
    /// Bound to groups 0..n in order.
    pub bindings: Vec<GpuHandle>,
    pub vertex_buffer: Option<GpuHandle>,
    /// When set, `count` indexes it; otherwise `count` vertices are drawn.
    pub index_buffer: Option<GpuHandle>,
    pub count: u32,
}

/// Everything the backend needs to produce one frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameDraw {
    pub clear_color: [f32; 4],
    pub items: Vec<DrawItem>,
}

/// GPU device seam. All calls happen on the frame-pump thread.
pub trait GpuBackend {
    fn create_buffer(&mut self, desc: &BufferDesc<'_>) -> Result<GpuHandle>;

    fn write_buffer(&mut self, buffer: GpuHandle, offset: u64, data: &[u8]) -> Result<()>;

    fn create_texture(&mut self, desc: &TextureDesc<'_>) -> Result<GpuHandle>;

    fn create_program(&mut self, desc: &ProgramDesc<'_>) -> Result<GpuHandle>;

    fn create_binding(&mut self, desc: &BindingDesc<'_>) -> Result<GpuHandle>;

    /// Releasing an unknown or already released handle is an error.
    fn release(&mut self, handle: GpuHandle) -> Result<()>;

    /// Physical pixel size of the drawing surface.
    fn resize_surface(&mut self, width: u32, height: u32);

    fn draw(&mut self, frame: &FrameDraw) -> Result<()>;

    fn live_resources(&self) -> usize;
}

/// Release every handle, logging failures. Returns how many failed.
pub fn release_all<I>(backend: &mut dyn GpuBackend, handles: I) -> usize
where
    I: IntoIterator<Item = GpuHandle>,
{
    let mut failed = 0;
    for handle in handles {
        if let Err(err) = backend.release(handle) {
            log::warn!("failed to release {:?} #{}: {err}", handle.kind(), handle.id());
            failed += 1;
        }
    }
    failed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocator_never_reuses_ids() {
        let mut alloc = HandleAllocator::default();
        let a = alloc.next(ResourceKind::Buffer);
        let b = alloc.next(ResourceKind::Buffer);
        assert_ne!(a, b);
        assert_eq!(b.kind(), ResourceKind::Buffer);
    }

    #[test]
    fn release_all_counts_failures() {
        let mut backend = CountingBackend::new();
        let buf = backend
            .create_buffer(&BufferDesc { label: "t", usage: BufferUsage::Uniform, contents: &[0; 16] })
            .unwrap();
        assert_eq!(release_all(&mut backend, [buf, buf]), 1);
        assert_eq!(backend.live_resources(), 0);
    }
}
