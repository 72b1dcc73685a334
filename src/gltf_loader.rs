// src/gltf_loader.rs
// glTF 2.0 / GLB decoding into the viewer's scene graph.
// Pure CPU work: runs on the loader thread, no GPU access. Uploading is the composer's job.

use std::collections::HashMap;

use glam::{Quat, Vec3};

use crate::error::{Result, ViewerError};
use crate::pbr_materials::{Material, TextureData};
use crate::scene::{Geometry, Mesh, Node, SceneGraph, Transform};

/// Deeper hierarchies are treated as malformed.
const MAX_NODE_DEPTH: usize = 64;

/// Decode a GLB (or glTF with embedded buffers) into a scene graph.
///
/// Malformed bytes are a `Load` error; a well-formed document the viewer can't show (no scene,
/// no positions, non-triangle primitives, out-of-range indices) is `UnsupportedAsset`.
pub fn decode(uri: &str, bytes: &[u8]) -> Result<SceneGraph> {
    let (document, buffers, images) =
        gltf::import_slice(bytes).map_err(|e| ViewerError::load(uri, format!("glTF decode: {e}")))?;

    let scene = document
        .default_scene()
        .or_else(|| document.scenes().next())
        .ok_or_else(|| ViewerError::unsupported(uri, "document has no scene"))?;

    let mut ctx = DecodeCtx { uri, buffers: &buffers, images: &images, textures: HashMap::new() };
    let mut root = Node::new(scene.name().unwrap_or("model"));
    for node in scene.nodes() {
        root.children.push(ctx.node(&node, 0)?);
    }

    let graph = SceneGraph::new(root);
    log::debug!(
        "decoded `{uri}`: {} node(s), {} mesh(es), {} texture(s)",
        graph.root.node_count(),
        graph.mesh_count(),
        ctx.textures.len()
    );
    Ok(graph)
}

struct DecodeCtx<'a> {
    uri: &'a str,
    buffers: &'a [gltf::buffer::Data],
    images: &'a [gltf::image::Data],
    // Converted images by glTF image index; `None` for formats that can't be shown.
    textures: HashMap<usize, Option<TextureData>>,
}

impl DecodeCtx<'_> {
    fn node(&mut self, node: &gltf::Node<'_>, depth: usize) -> Result<Node> {
        if depth > MAX_NODE_DEPTH {
            return Err(ViewerError::unsupported(self.uri, "node hierarchy too deep"));
        }

        let name = node
            .name()
            .map(str::to_owned)
            .unwrap_or_else(|| format!("node{}", node.index()));
        let (t, r, s) = node.transform().decomposed();
        let mut out = Node::new(name.clone()).with_transform(Transform {
            translation: Vec3::from(t),
            rotation: Quat::from_array(r),
            scale: Vec3::from(s),
        });

        if let Some(mesh) = node.mesh() {
            // First primitive lives on the node, the rest become children.
            for (i, primitive) in mesh.primitives().enumerate() {
                let converted = self.primitive(&primitive)?;
                if i == 0 {
                    out.mesh = Some(converted);
                } else {
                    out.children.push(Node::new(format!("{name}#{i}")).with_mesh(converted));
                }
            }
        }

        for child in node.children() {
            out.children.push(self.node(&child, depth + 1)?);
        }
        Ok(out)
    }

    fn primitive(&mut self, primitive: &gltf::Primitive<'_>) -> Result<Mesh> {
        if primitive.mode() != gltf::mesh::Mode::Triangles {
            return Err(ViewerError::unsupported(
                self.uri,
                format!("primitive mode {:?} (only triangles)", primitive.mode()),
            ));
        }

        let buffers = self.buffers;
        let reader = primitive.reader(|b| buffers.get(b.index()).map(|d| &d.0[..]));
        let positions: Vec<[f32; 3]> = reader
            .read_positions()
            .ok_or_else(|| ViewerError::unsupported(self.uri, "primitive without positions"))?
            .collect();
        let vertex_count = positions.len();

        let indices: Vec<u32> = match reader.read_indices() {
            Some(iter) => iter.into_u32().collect(),
            None => (0..vertex_count as u32).collect(),
        };
        if indices.len() % 3 != 0 {
            return Err(ViewerError::unsupported(self.uri, "index count is not a multiple of 3"));
        }
        if let Some(bad) = indices.iter().find(|&&i| i as usize >= vertex_count) {
            return Err(ViewerError::unsupported(
                self.uri,
                format!("index {bad} out of range for {vertex_count} vertices"),
            ));
        }

        let normals = match reader.read_normals() {
            Some(iter) => iter.collect(),
            None => smooth_normals(&positions, &indices),
        };
        let uvs = match reader.read_tex_coords(0) {
            Some(tc) => tc.into_f32().collect(),
            None => vec![[0.0, 0.0]; vertex_count],
        };

        let material = self.material(&primitive.material());
        Ok(Mesh::new(Geometry { positions, normals, uvs, indices }, material))
    }

    fn material(&mut self, material: &gltf::Material<'_>) -> Material {
        let pbr = material.pbr_metallic_roughness();
        let mut out = Material::named(material.name().unwrap_or_default())
            .with_pbr(pbr.roughness_factor(), pbr.metallic_factor());
        out.base_color = pbr.base_color_factor();
        out.base_color_texture = pbr
            .base_color_texture()
            .and_then(|info| self.texture(info.texture().source().index()));
        out
    }

    fn texture(&mut self, image_index: usize) -> Option<TextureData> {
        let images = self.images;
        let uri = self.uri;
        self.textures
            .entry(image_index)
            .or_insert_with(|| {
                let converted = images.get(image_index).and_then(to_rgba8);
                if converted.is_none() {
                    log::warn!("`{uri}`: image {image_index} has an unsupported pixel format, using base color only");
                }
                converted
            })
            .clone()
    }
}

/// Convert decoded glTF pixels to RGBA8.
fn to_rgba8(data: &gltf::image::Data) -> Option<TextureData> {
    use gltf::image::Format;
    use image::{DynamicImage, ImageBuffer};

    let (w, h) = (data.width, data.height);
    let pixels = data.pixels.clone();
    let dynamic = match data.format {
        Format::R8 => DynamicImage::ImageLuma8(ImageBuffer::from_raw(w, h, pixels)?),
        Format::R8G8 => DynamicImage::ImageLumaA8(ImageBuffer::from_raw(w, h, pixels)?),
        Format::R8G8B8 => DynamicImage::ImageRgb8(ImageBuffer::from_raw(w, h, pixels)?),
        Format::R8G8B8A8 => DynamicImage::ImageRgba8(ImageBuffer::from_raw(w, h, pixels)?),
        _ => return None,
    };
    Some(TextureData { width: w, height: h, rgba: dynamic.to_rgba8().into_raw() })
}

/// Area-weighted vertex normals for geometry that ships without them.
fn smooth_normals(positions: &[[f32; 3]], indices: &[u32]) -> Vec<[f32; 3]> {
    let mut acc = vec![Vec3::ZERO; positions.len()];
    for tri in indices.chunks_exact(3) {
        let [a, b, c] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
        let (pa, pb, pc) = (Vec3::from(positions[a]), Vec3::from(positions[b]), Vec3::from(positions[c]));
        let n = (pb - pa).cross(pc - pa);
        acc[a] += n;
        acc[b] += n;
        acc[c] += n;
    }
    acc.into_iter()
        .map(|n| n.try_normalize().unwrap_or(Vec3::Y).to_array())
        .collect()
}
