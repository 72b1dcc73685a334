// src/scene.rs
// Scene graph for the viewer: an owned tree of nodes, each with a local transform
// and an optional mesh. Children are owned by their parent, so the tree can't have
// cycles and every node except the root has exactly one parent.

use glam::{Mat4, Quat, Vec3};

use crate::gpu::GpuHandle;
use crate::pbr_materials::Material;

/// Local transform (translation, rotation, scale) relative to the parent.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Transform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Transform {
    pub const IDENTITY: Self = Self {
        translation: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    pub fn from_scale(scale: f32) -> Self {
        Self { scale: Vec3::splat(scale), ..Self::IDENTITY }
    }

    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Axis-aligned bounding box.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// Bounds of a point set. `None` for an empty set.
    pub fn from_points(points: &[[f32; 3]]) -> Option<Self> {
        let first = Vec3::from(*points.first()?);
        let (min, max) = points.iter().skip(1).fold((first, first), |(min, max), p| {
            let p = Vec3::from(*p);
            (min.min(p), max.max(p))
        });
        Some(Self { min, max })
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb { min: self.min.min(other.min), max: self.max.max(other.max) }
    }

    /// Conservative world-space bounds after `m` (transforms all 8 corners).
    pub fn transformed(&self, m: &Mat4) -> Aabb {
        let mut min = Vec3::splat(f32::INFINITY);
        let mut max = Vec3::splat(f32::NEG_INFINITY);
        for i in 0..8 {
            let corner = Vec3::new(
                if i & 1 == 0 { self.min.x } else { self.max.x },
                if i & 2 == 0 { self.min.y } else { self.max.y },
                if i & 4 == 0 { self.min.z } else { self.max.z },
            );
            let p = m.transform_point3(corner);
            min = min.min(p);
            max = max.max(p);
        }
        Aabb { min, max }
    }
}

/// CPU-side triangle geometry.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Geometry {
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub uvs: Vec<[f32; 2]>,
    pub indices: Vec<u32>,
}

impl Geometry {
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }
}

/// GPU resources backing one uploaded mesh. Released by the composer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MeshGpu {
    pub vertex_buffer: GpuHandle,
    pub index_buffer: GpuHandle,
    pub uniform_buffer: GpuHandle,
    pub texture: Option<GpuHandle>,
    pub binding: GpuHandle,
}

impl MeshGpu {
    /// Every handle, in release order (binding first, it references the others).
    pub fn handles(&self) -> impl Iterator<Item = GpuHandle> {
        [
            Some(self.binding),
            Some(self.uniform_buffer),
            self.texture,
            Some(self.index_buffer),
            Some(self.vertex_buffer),
        ]
        .into_iter()
        .flatten()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Mesh {
    pub geometry: Geometry,
    pub material: Material,
    pub cast_shadow: bool,
    pub receive_shadow: bool,
    /// Local-space bounds; filled in by the enhancement pass.
    pub bounds: Option<Aabb>,
    /// Set once the mesh is uploaded.
    pub gpu: Option<MeshGpu>,
}

impl Mesh {
    pub fn new(geometry: Geometry, material: Material) -> Self {
        Self {
            geometry,
            material,
            cast_shadow: false,
            receive_shadow: false,
            bounds: None,
            gpu: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Node {
    pub name: String,
    pub transform: Transform,
    pub mesh: Option<Mesh>,
    pub children: Vec<Node>,
}

impl Node {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    pub fn with_mesh(mut self, mesh: Mesh) -> Self {
        self.mesh = Some(mesh);
        self
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_child(mut self, child: Node) -> Self {
        self.children.push(child);
        self
    }

    /// Depth-first visit of this node and its descendants.
    pub fn visit<F: FnMut(&Node)>(&self, f: &mut F) {
        f(self);
        for child in &self.children {
            child.visit(f);
        }
    }

    pub fn visit_mut<F: FnMut(&mut Node)>(&mut self, f: &mut F) {
        f(self);
        for child in &mut self.children {
            child.visit_mut(f);
        }
    }

    /// Visit with the accumulated world matrix.
    pub fn visit_world<F: FnMut(&Node, &Mat4)>(&self, parent: &Mat4, f: &mut F) {
        let world = *parent * self.transform.matrix();
        f(self, &world);
        for child in &self.children {
            child.visit_world(&world, f);
        }
    }

    /// First node (depth-first) with the given name.
    pub fn find(&self, name: &str) -> Option<&Node> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(name))
    }

    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(Node::node_count).sum::<usize>()
    }
}

/// A decoded model, or the composed scene.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SceneGraph {
    pub root: Node,
    /// Set by the material enhancement pass; the pass never runs twice on the same graph.
    pub enhanced: bool,
}

impl SceneGraph {
    pub fn new(root: Node) -> Self {
        Self { root, enhanced: false }
    }

    pub fn meshes(&self) -> Vec<&Mesh> {
        let mut out = Vec::new();
        let mut stack = vec![&self.root];
        while let Some(node) = stack.pop() {
            if let Some(m) = &node.mesh {
                out.push(m);
            }
            stack.extend(node.children.iter().rev());
        }
        out
    }

    pub fn mesh_count(&self) -> usize {
        let mut count = 0;
        self.root.visit(&mut |n| count += n.mesh.is_some() as usize);
        count
    }

    pub fn for_each_mesh_mut<F: FnMut(&mut Mesh)>(&mut self, mut f: F) {
        self.root.visit_mut(&mut |n| {
            if let Some(m) = n.mesh.as_mut() {
                f(m);
            }
        });
    }

    /// World-space bounds of every mesh that has bounds.
    pub fn world_bounds(&self) -> Option<Aabb> {
        let mut acc: Option<Aabb> = None;
        self.root.visit_world(&Mat4::IDENTITY, &mut |node, world| {
            if let Some(b) = node.mesh.as_ref().and_then(|m| m.bounds) {
                let wb = b.transformed(world);
                acc = Some(acc.map_or(wb, |a| a.union(&wb)));
            }
        });
        acc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tri() -> Geometry {
        Geometry {
            positions: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 2.0, -1.0]],
            indices: vec![0, 1, 2],
            ..Default::default()
        }
    }

    #[test]
    fn aabb_from_points() {
        let b = Aabb::from_points(&tri().positions).unwrap();
        assert_eq!(b.min, Vec3::new(0.0, 0.0, -1.0));
        assert_eq!(b.max, Vec3::new(1.0, 2.0, 0.0));
        assert!(Aabb::from_points(&[]).is_none());
    }

    #[test]
    fn world_bounds_follow_parent_scale() {
        let mut mesh = Mesh::new(tri(), Material::named("Body"));
        mesh.bounds = Aabb::from_points(&mesh.geometry.positions);
        let graph = SceneGraph::new(
            Node::new("root")
                .with_transform(Transform::from_scale(2.0))
                .with_child(Node::new("body").with_mesh(mesh)),
        );
        let wb = graph.world_bounds().unwrap();
        assert_eq!(wb.max, Vec3::new(2.0, 4.0, 0.0));
        assert_eq!(wb.min, Vec3::new(0.0, 0.0, -2.0));
    }

    #[test]
    fn traversal_counts() {
        let graph = SceneGraph::new(
            Node::new("car")
                .with_child(Node::new("body").with_mesh(Mesh::new(tri(), Material::named("Body"))))
                .with_child(
                    Node::new("cabin")
                        .with_child(Node::new("glass").with_mesh(Mesh::new(tri(), Material::named("Glass")))),
                ),
        );
        assert_eq!(graph.root.node_count(), 4);
        assert_eq!(graph.mesh_count(), 2);
        assert!(graph.root.find("glass").is_some());
        assert!(graph.meshes().iter().all(|m| m.gpu.is_none()));
    }
}
