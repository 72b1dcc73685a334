// src/renderer.rs
// Frame assembly: owns the two programs and the per-frame uniforms, turns the composed scene
// into a `FrameDraw` (frustum culled) and adds the loading bar while a model is in flight.

use bytemuck::{Pod, Zeroable};
use glam::Mat4;

use crate::camera::{CameraState, CameraUniform};
use crate::culling::Frustum;
use crate::error::Result;
use crate::gpu::{
    release_all, BindingDesc, BindingLayout, BufferDesc, BufferUsage, DrawItem, FrameDraw,
    GpuBackend, GpuHandle, ProgramDesc, ProgramKind,
};
use crate::scene::SceneGraph;
use crate::shaders::{MESH_WGSL, OVERLAY_WGSL};

/// Matches WGSL `Overlay`.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct OverlayUniform {
    pub rect: [f32; 4],
    pub track: [f32; 4],
    pub fill: [f32; 4],
    pub progress: f32,
    pub _pad: [f32; 3],
}

impl OverlayUniform {
    /// Thin bar near the bottom of the viewport; `percent` in [0, 100].
    pub fn loading(percent: f32) -> Self {
        Self {
            rect: [-0.3, -0.82, 0.3, -0.79],
            track: [1.0, 1.0, 1.0, 0.15],
            fill: [1.0, 1.0, 1.0, 0.85],
            progress: (percent / 100.0).clamp(0.0, 1.0),
            _pad: [0.0; 3],
        }
    }
}

/// Counts from the last assembled frame.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub drawn: usize,
    pub culled: usize,
    pub overlay: bool,
}

#[derive(Debug)]
pub struct Renderer {
    mesh_program: GpuHandle,
    overlay_program: GpuHandle,
    camera_buffer: GpuHandle,
    frame_binding: GpuHandle,
    overlay_buffer: GpuHandle,
    overlay_binding: GpuHandle,
    last_progress: Option<f32>,
    stats: FrameStats,
    released: bool,
}

impl Renderer {
    /// Create programs and frame uniforms. On failure everything created so far is released.
    pub fn new(backend: &mut dyn GpuBackend, camera: &CameraState, lighting_buffer: GpuHandle) -> Result<Self> {
        let mut created = Vec::new();
        match Self::create(backend, camera, lighting_buffer, &mut created) {
            Ok(renderer) => Ok(renderer),
            Err(err) => {
                release_all(backend, created.into_iter().rev());
                Err(err)
            }
        }
    }

    fn create(
        backend: &mut dyn GpuBackend,
        camera: &CameraState,
        lighting_buffer: GpuHandle,
        created: &mut Vec<GpuHandle>,
    ) -> Result<Self> {
        let mut track = |h: GpuHandle| {
            created.push(h);
            h
        };

        let mesh_program = track(backend.create_program(&ProgramDesc {
            label: "Mesh Program",
            kind: ProgramKind::Mesh,
            source: MESH_WGSL,
        })?);
        let overlay_program = track(backend.create_program(&ProgramDesc {
            label: "Overlay Program",
            kind: ProgramKind::Overlay,
            source: OVERLAY_WGSL,
        })?);
        let camera_buffer = track(backend.create_buffer(&BufferDesc {
            label: "Camera Uniform",
            usage: BufferUsage::Uniform,
            contents: bytemuck::bytes_of(&CameraUniform::from_state(camera)),
        })?);
        let frame_binding = track(backend.create_binding(&BindingDesc {
            label: "Frame Binding",
            layout: BindingLayout::Frame,
            buffers: &[camera_buffer, lighting_buffer],
            texture: None,
        })?);
        let overlay_buffer = track(backend.create_buffer(&BufferDesc {
            label: "Overlay Uniform",
            usage: BufferUsage::Uniform,
            contents: bytemuck::bytes_of(&OverlayUniform::loading(0.0)),
        })?);
        let overlay_binding = track(backend.create_binding(&BindingDesc {
            label: "Overlay Binding",
            layout: BindingLayout::Overlay,
            buffers: &[overlay_buffer],
            texture: None,
        })?);

        Ok(Self {
            mesh_program,
            overlay_program,
            camera_buffer,
            frame_binding,
            overlay_buffer,
            overlay_binding,
            last_progress: None,
            stats: FrameStats::default(),
            released: false,
        })
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Update uniforms and assemble the frame. `loading` is the progress percent while a load
    /// is in flight.
    pub fn prepare(
        &mut self,
        backend: &mut dyn GpuBackend,
        camera: &CameraState,
        scene: &SceneGraph,
        loading: Option<f32>,
        clear_color: [f32; 4],
    ) -> Result<FrameDraw> {
        backend.write_buffer(self.camera_buffer, 0, bytemuck::bytes_of(&CameraUniform::from_state(camera)))?;

        let frustum = Frustum::from_view_proj(&camera.view_proj_matrix());
        let mut items = Vec::new();
        let mut culled = 0;
        scene.root.visit_world(&Mat4::IDENTITY, &mut |node, world| {
            let Some(mesh) = node.mesh.as_ref() else { return };
            let Some(gpu) = mesh.gpu else { return };
            if let Some(bounds) = mesh.bounds {
                if !frustum.intersects_aabb(&bounds.transformed(world)) {
                    culled += 1;
                    return;
                }
            }
            items.push(DrawItem {
                program: self.mesh_program,
                bindings: vec![self.frame_binding, gpu.binding],
                vertex_buffer: Some(gpu.vertex_buffer),
                index_buffer: Some(gpu.index_buffer),
                count: mesh.geometry.index_count(),
            });
        });
        let drawn = items.len();

        if let Some(percent) = loading {
            if self.last_progress != Some(percent) {
                backend.write_buffer(self.overlay_buffer, 0, bytemuck::bytes_of(&OverlayUniform::loading(percent)))?;
                self.last_progress = Some(percent);
            }
            items.push(DrawItem {
                program: self.overlay_program,
                bindings: vec![self.overlay_binding],
                vertex_buffer: None,
                index_buffer: None,
                count: 6,
            });
        }

        self.stats = FrameStats { drawn, culled, overlay: loading.is_some() };
        log::trace!("frame: {drawn} drawn, {culled} culled, overlay {}", loading.is_some());
        Ok(FrameDraw { clear_color, items })
    }

    /// Release bindings, uniforms, then programs. Safe to call more than once.
    pub fn release(&mut self, backend: &mut dyn GpuBackend) {
        if std::mem::replace(&mut self.released, true) {
            return;
        }
        let failed = release_all(
            backend,
            [
                self.overlay_binding,
                self.frame_binding,
                self.overlay_buffer,
                self.camera_buffer,
                self.overlay_program,
                self.mesh_program,
            ],
        );
        if failed > 0 {
            log::warn!("{failed} renderer resource(s) failed to release");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composer::SceneComposer;
    use crate::gltf_loader::{decode, fixtures};
    use crate::gpu::CountingBackend;
    use crate::lighting::LightRig;
    use crate::pbr_materials::{MaterialEnhancer, ShowroomPresets};

    fn setup(backend: &mut CountingBackend) -> (SceneComposer, Renderer) {
        let composer = SceneComposer::new(backend, LightRig::showroom(), 2.0).unwrap();
        let renderer =
            Renderer::new(backend, &CameraState::default(), composer.lighting_buffer().unwrap()).unwrap();
        (composer, renderer)
    }

    #[test]
    fn empty_scene_draws_only_the_overlay_while_loading() {
        let mut backend = CountingBackend::new();
        let (composer, mut renderer) = setup(&mut backend);
        let frame = renderer
            .prepare(&mut backend, &CameraState::default(), composer.graph(), Some(40.0), [0.0; 4])
            .unwrap();
        assert_eq!(frame.items.len(), 1);
        assert_eq!(frame.items[0].count, 6);

        let frame = renderer
            .prepare(&mut backend, &CameraState::default(), composer.graph(), None, [0.0; 4])
            .unwrap();
        assert!(frame.items.is_empty());
        backend.draw(&frame).unwrap();
    }

    #[test]
    fn culls_meshes_outside_the_frustum() {
        let mut backend = CountingBackend::new();
        let (mut composer, mut renderer) = setup(&mut backend);
        let presets = ShowroomPresets::default();
        let mut car = decode("car.glb", &fixtures::car_glb()).unwrap();
        MaterialEnhancer::new(&presets).enhance(&mut car);
        composer.attach(&mut backend, car).unwrap();

        let camera = CameraState::default();
        let frame = renderer.prepare(&mut backend, &camera, composer.graph(), None, [0.0; 4]).unwrap();
        assert_eq!(renderer.stats().drawn, 2);
        backend.draw(&frame).unwrap();

        let away = CameraState::looking_from(glam::Vec3::new(0.0, 2.0, 10.0), glam::Vec3::new(0.0, 2.0, 20.0));
        renderer.prepare(&mut backend, &away, composer.graph(), None, [0.0; 4]).unwrap();
        assert_eq!(renderer.stats().culled, 2);
    }

    #[test]
    fn partial_creation_is_rolled_back() {
        // lighting buffer, both programs, then the camera buffer fails
        let mut backend = CountingBackend::failing_after(3);
        let stats = backend.stats();
        let mut composer = SceneComposer::new(&mut backend, LightRig::showroom(), 2.0).unwrap();
        let err = Renderer::new(&mut backend, &CameraState::default(), composer.lighting_buffer().unwrap())
            .unwrap_err();
        assert!(err.is_exhaustion());
        composer.release_all(&mut backend);
        assert!(stats.lock().balanced());
    }
}
