// src/composer.rs
//! Scene composition: the showroom root, the lighting rig and the attached model.
//!
//! The scene root holds at most one child, the model wrapper. Attaching uploads the new model
//! first and only swaps once every upload succeeded; a failed upload is rolled back and the
//! previous model stays on screen.

use glam::Mat4;

use crate::error::{Result, ViewerError};
use crate::gpu::{
    release_all, BindingDesc, BindingLayout, BufferDesc, BufferUsage, GpuBackend, GpuHandle,
    MeshVertex, TextureDesc,
};
use crate::lighting::LightRig;
use crate::scene::{Mesh, MeshGpu, Node, SceneGraph, Transform};

pub const MODEL_NODE: &str = "model";

pub struct SceneComposer {
    graph: SceneGraph,
    rig: LightRig,
    lighting_buffer: Option<GpuHandle>,
    model_scale: f32,
}

impl SceneComposer {
    /// Build the empty lit scene and upload the rig. Independent of any model.
    pub fn new(backend: &mut dyn GpuBackend, rig: LightRig, model_scale: f32) -> Result<Self> {
        let uniform = rig.uniform();
        let lighting_buffer = backend.create_buffer(&BufferDesc {
            label: "Lighting Uniform",
            usage: BufferUsage::Uniform,
            contents: bytemuck::bytes_of(&uniform),
        })?;
        log::debug!("lighting rig uploaded ({} lights)", uniform.light_count);
        Ok(Self {
            graph: SceneGraph::new(Node::new("showroom")),
            rig,
            lighting_buffer: Some(lighting_buffer),
            model_scale,
        })
    }

    pub fn graph(&self) -> &SceneGraph {
        &self.graph
    }

    pub fn rig(&self) -> &LightRig {
        &self.rig
    }

    pub fn lighting_buffer(&self) -> Option<GpuHandle> {
        self.lighting_buffer
    }

    pub fn has_model(&self) -> bool {
        !self.graph.root.children.is_empty()
    }

    /// Upload `model` and make it the scene's only child, releasing the previous one.
    pub fn attach(&mut self, backend: &mut dyn GpuBackend, model: SceneGraph) -> Result<()> {
        let mut wrapper = Node::new(MODEL_NODE)
            .with_transform(Transform::from_scale(self.model_scale))
            .with_child(model.root);

        let mut created = Vec::new();
        if let Err(err) = upload_node(backend, &mut wrapper, &Mat4::IDENTITY, &mut created) {
            let leaked = release_all(backend, created.into_iter().rev());
            log::warn!("model upload failed, keeping previous model ({leaked} release failure(s)): {err}");
            return Err(if err.is_exhaustion() || err.is_unsupported() {
                err.context("attaching model")
            } else {
                ViewerError::unsupported(MODEL_NODE, format!("attaching model: {err}"))
            });
        }

        let meshes = wrapper_mesh_count(&wrapper);
        let previous = std::mem::replace(&mut self.graph.root.children, vec![wrapper]);
        self.graph.enhanced = model.enhanced;
        release_subtrees(backend, previous);
        match self.graph.world_bounds() {
            Some(b) => log::info!(
                "model attached ({meshes} mesh(es), scale {}, extents {:?})",
                self.model_scale,
                b.extents()
            ),
            None => log::info!("model attached ({meshes} mesh(es), scale {})", self.model_scale),
        }
        Ok(())
    }

    /// Remove and release the current model. Returns whether there was one.
    pub fn detach(&mut self, backend: &mut dyn GpuBackend) -> bool {
        let previous = std::mem::take(&mut self.graph.root.children);
        let had_model = !previous.is_empty();
        release_subtrees(backend, previous);
        self.graph.enhanced = false;
        had_model
    }

    /// Release the model and the lighting buffer. Safe to call more than once.
    pub fn release_all(&mut self, backend: &mut dyn GpuBackend) {
        self.detach(backend);
        if let Some(buffer) = self.lighting_buffer.take() {
            release_all(backend, [buffer]);
        }
    }
}

fn wrapper_mesh_count(node: &Node) -> usize {
    let mut count = 0;
    node.visit(&mut |n| count += n.mesh.is_some() as usize);
    count
}

fn release_subtrees(backend: &mut dyn GpuBackend, nodes: Vec<Node>) {
    let mut failed = 0;
    for node in &nodes {
        node.visit(&mut |n| {
            if let Some(gpu) = n.mesh.as_ref().and_then(|m| m.gpu) {
                failed += release_all(backend, gpu.handles());
            }
        });
    }
    if failed > 0 {
        log::warn!("{failed} model resource(s) failed to release");
    }
}

fn upload_node(
    backend: &mut dyn GpuBackend,
    node: &mut Node,
    parent: &Mat4,
    created: &mut Vec<GpuHandle>,
) -> Result<()> {
    let world = *parent * node.transform.matrix();
    if let Some(mesh) = node.mesh.as_mut() {
        if mesh.geometry.indices.is_empty() {
            log::debug!("skipping empty mesh in node `{}`", node.name);
        } else {
            mesh.gpu = Some(upload_mesh(backend, &node.name, mesh, &world, created)?);
        }
    }
    for child in &mut node.children {
        upload_node(backend, child, &world, created)?;
    }
    Ok(())
}

fn upload_mesh(
    backend: &mut dyn GpuBackend,
    name: &str,
    mesh: &Mesh,
    world: &Mat4,
    created: &mut Vec<GpuHandle>,
) -> Result<MeshGpu> {
    let mut track = |h: GpuHandle| {
        created.push(h);
        h
    };

    let geometry = &mesh.geometry;
    let vertices: Vec<MeshVertex> = (0..geometry.vertex_count())
        .map(|i| MeshVertex {
            position: geometry.positions[i],
            normal: geometry.normals.get(i).copied().unwrap_or([0.0, 1.0, 0.0]),
            uv: geometry.uvs.get(i).copied().unwrap_or_default(),
        })
        .collect();

    let vertex_buffer = track(backend.create_buffer(&BufferDesc {
        label: name,
        usage: BufferUsage::Vertex,
        contents: bytemuck::cast_slice(&vertices),
    })?);
    let index_buffer = track(backend.create_buffer(&BufferDesc {
        label: name,
        usage: BufferUsage::Index,
        contents: bytemuck::cast_slice(&geometry.indices),
    })?);
    let uniform = mesh.material.uniform(world);
    let uniform_buffer = track(backend.create_buffer(&BufferDesc {
        label: name,
        usage: BufferUsage::Uniform,
        contents: bytemuck::bytes_of(&uniform),
    })?);
    let texture = match &mesh.material.base_color_texture {
        Some(tex) => Some(track(backend.create_texture(&TextureDesc {
            label: name,
            width: tex.width,
            height: tex.height,
            rgba: &tex.rgba,
        })?)),
        None => None,
    };
    let binding = track(backend.create_binding(&BindingDesc {
        label: name,
        layout: BindingLayout::Mesh,
        buffers: &[uniform_buffer],
        texture,
    })?);

    Ok(MeshGpu { vertex_buffer, index_buffer, uniform_buffer, texture, binding })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gltf_loader::{decode, fixtures};
    use crate::gpu::{CountingBackend, ResourceKind};
    use crate::pbr_materials::{MaterialEnhancer, ShowroomPresets};

    fn car() -> SceneGraph {
        decode("car.glb", &fixtures::car_glb()).unwrap()
    }

    #[test]
    fn attach_wraps_model_under_single_child() {
        let mut backend = CountingBackend::new();
        let mut composer = SceneComposer::new(&mut backend, LightRig::showroom(), 2.0).unwrap();
        assert!(!composer.has_model());

        composer.attach(&mut backend, car()).unwrap();
        let root = &composer.graph().root;
        assert_eq!(root.children.len(), 1);
        assert_eq!(root.children[0].name, MODEL_NODE);
        assert_eq!(root.children[0].transform.scale, glam::Vec3::splat(2.0));
        assert!(composer.graph().meshes().iter().all(|m| m.gpu.is_some()));

        // lighting + 2 meshes x (vertex, index, uniform, binding)
        assert_eq!(backend.live_resources(), 9);
    }

    #[test]
    fn reattach_releases_previous_model() {
        let mut backend = CountingBackend::new();
        let stats = backend.stats();
        let mut composer = SceneComposer::new(&mut backend, LightRig::showroom(), 2.0).unwrap();
        composer.attach(&mut backend, car()).unwrap();
        composer
            .attach(&mut backend, decode("decal.glb", &fixtures::textured_glb()).unwrap())
            .unwrap();

        assert_eq!(composer.graph().root.children.len(), 1);
        assert!(composer.graph().root.find("body").is_none());
        assert!(composer.graph().root.find("decal").is_some());
        assert_eq!(stats.lock().live_of(ResourceKind::Texture), 1);

        composer.release_all(&mut backend);
        composer.release_all(&mut backend);
        assert!(stats.lock().balanced());
        assert_eq!(stats.lock().failed_releases, 0);
    }

    #[test]
    fn failed_upload_keeps_previous_model() {
        // lighting + first car + three allocations of the second
        let mut backend = CountingBackend::failing_after(1 + 8 + 3);
        let stats = backend.stats();
        let mut composer = SceneComposer::new(&mut backend, LightRig::showroom(), 2.0).unwrap();
        composer.attach(&mut backend, car()).unwrap();

        let err = composer.attach(&mut backend, car()).unwrap_err();
        assert!(err.is_exhaustion(), "{err}");
        assert!(composer.graph().root.find("body").is_some());
        assert_eq!(stats.lock().live.len(), 9);

        composer.release_all(&mut backend);
        assert!(stats.lock().balanced());
    }

    #[test]
    fn malformed_texture_is_unsupported_and_rolled_back() {
        let mut backend = CountingBackend::new();
        let stats = backend.stats();
        let mut composer = SceneComposer::new(&mut backend, LightRig::showroom(), 2.0).unwrap();
        composer.attach(&mut backend, car()).unwrap();

        let mut decal = decode("decal.glb", &fixtures::textured_glb()).unwrap();
        decal.for_each_mesh_mut(|m| {
            if let Some(tex) = m.material.base_color_texture.as_mut() {
                tex.rgba.truncate(4);
            }
        });
        let err = composer.attach(&mut backend, decal).unwrap_err();
        assert!(err.is_unsupported(), "{err}");
        assert!(!err.is_exhaustion());
        assert!(composer.graph().root.find("body").is_some());
        assert_eq!(stats.lock().live.len(), 9);

        composer.release_all(&mut backend);
        assert!(stats.lock().balanced());
    }

    #[test]
    fn attached_bounds_include_model_scale() {
        let mut backend = CountingBackend::new();
        let mut composer = SceneComposer::new(&mut backend, LightRig::showroom(), 2.0).unwrap();
        assert!(composer.graph().world_bounds().is_none());

        let presets = ShowroomPresets::default();
        let mut model = car();
        MaterialEnhancer::new(&presets).enhance(&mut model);
        let unscaled = model.world_bounds().unwrap();
        composer.attach(&mut backend, model).unwrap();
        let scaled = composer.graph().world_bounds().unwrap();
        assert!((scaled.extents() - unscaled.extents() * 2.0).length() < 1e-4);
        composer.release_all(&mut backend);
    }
}
