// src/pbr_materials.rs
// Showroom material system
//
// Exports:
// - Material / Clearcoat / TextureData: CPU-side shading parameters of a surface
// - MeshUniform (Pod) matching the WGSL `Mesh` struct
// - SurfaceKind + MaterialPreset + ShowroomPresets: the "showroom look"
// - MaterialEnhancer: one-shot pass that classifies surfaces and applies presets
//
// Usage summary:
// let enhancer = MaterialEnhancer::new(&config.presets);
// enhancer.enhance(&mut graph); // once, before the graph is attached

use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use serde::{Deserialize, Serialize};

use crate::scene::{Aabb, SceneGraph};

/// Optional clear lacquer layer on top of the base material.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Clearcoat {
    pub factor: f32,
    pub roughness: f32,
}

/// Decoded RGBA8 texture.
#[derive(Clone, PartialEq)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl std::fmt::Debug for TextureData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextureData")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.rgba.len())
            .finish()
    }
}

/// Named surface shading parameters. Roughness and metalness stay in [0, 1].
#[derive(Clone, Debug, PartialEq)]
pub struct Material {
    pub name: String,
    pub base_color: [f32; 4],
    roughness: f32,
    metalness: f32,
    /// Strength of environment reflections.
    pub reflection_intensity: f32,
    pub clearcoat: Option<Clearcoat>,
    pub base_color_texture: Option<TextureData>,
}

impl Material {
    pub fn named<S: Into<String>>(name: S) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    pub fn roughness(&self) -> f32 {
        self.roughness
    }

    pub fn metalness(&self) -> f32 {
        self.metalness
    }

    pub fn set_roughness(&mut self, value: f32) {
        self.roughness = clamp_unit(value);
    }

    pub fn set_metalness(&mut self, value: f32) {
        self.metalness = clamp_unit(value);
    }

    pub fn with_pbr(mut self, roughness: f32, metalness: f32) -> Self {
        self.set_roughness(roughness);
        self.set_metalness(metalness);
        self
    }

    /// Apply a preset in place.
    pub fn apply(&mut self, preset: &MaterialPreset) {
        self.set_roughness(preset.roughness);
        self.set_metalness(preset.metalness);
        self.reflection_intensity = preset.reflection_intensity.max(0.0);
        self.clearcoat = preset.clearcoat.map(|c| Clearcoat {
            factor: clamp_unit(c.factor),
            roughness: clamp_unit(c.roughness),
        });
        if let Some(color) = preset.color {
            self.base_color = color;
        }
    }

    /// GPU uniform for this material drawn with `model` as world matrix.
    pub fn uniform(&self, model: &Mat4) -> MeshUniform {
        let (coat, coat_rough) = self.clearcoat.map_or((0.0, 0.0), |c| (c.factor, c.roughness));
        MeshUniform {
            model: model.to_cols_array_2d(),
            base_color: self.base_color,
            pbr: [self.roughness, self.metalness, self.reflection_intensity, coat],
            extra: [
                coat_rough,
                self.base_color_texture.is_some() as u32 as f32,
                0.0,
                0.0,
            ],
        }
    }
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: String::new(),
            base_color: [1.0, 1.0, 1.0, 1.0],
            roughness: 1.0,
            metalness: 1.0,
            reflection_intensity: 1.0,
            clearcoat: None,
            base_color_texture: None,
        }
    }
}

#[inline]
fn clamp_unit(v: f32) -> f32 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

/// Matches WGSL `Mesh` struct exactly.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct MeshUniform {
    pub model: [[f32; 4]; 4],
    pub base_color: [f32; 4],
    /// roughness, metalness, reflection intensity, clearcoat
    pub pbr: [f32; 4],
    /// clearcoat roughness, has texture, unused, unused
    pub extra: [f32; 4],
}

/// Surface class used to pick a preset.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SurfaceKind {
    /// Painted exterior panels.
    Body,
    /// Glass, rubber, chrome, interior: every name that isn't recognized as body,
    /// unnamed materials included.
    Trim,
}

/// Fixed bundle of shading parameters for one surface class.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterialPreset {
    pub roughness: f32,
    pub metalness: f32,
    pub reflection_intensity: f32,
    #[serde(default)]
    pub clearcoat: Option<Clearcoat>,
    /// Replaces the base color when set.
    #[serde(default)]
    pub color: Option<[f32; 4]>,
}

impl MaterialPreset {
    /// Glossy, highly metallic, clear-coated paint.
    pub fn glossy_body() -> Self {
        Self {
            roughness: 0.15,
            metalness: 0.9,
            reflection_intensity: 1.5,
            clearcoat: Some(Clearcoat { factor: 1.0, roughness: 0.03 }),
            color: None,
        }
    }

    /// Moderate glass / trim finish.
    pub fn trim() -> Self {
        Self {
            roughness: 0.7,
            metalness: 0.3,
            reflection_intensity: 1.0,
            clearcoat: None,
            color: None,
        }
    }
}

/// The full showroom look: keyword vocabulary plus one preset per surface kind.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ShowroomPresets {
    /// Case-insensitive substrings that mark a material as body paint.
    pub body_keywords: Vec<String>,
    pub body: MaterialPreset,
    pub trim: MaterialPreset,
}

impl Default for ShowroomPresets {
    fn default() -> Self {
        Self {
            body_keywords: vec!["body".into(), "exterior".into(), "paint".into()],
            body: MaterialPreset::glossy_body(),
            trim: MaterialPreset::trim(),
        }
    }
}

impl ShowroomPresets {
    pub fn preset(&self, kind: SurfaceKind) -> &MaterialPreset {
        match kind {
            SurfaceKind::Body => &self.body,
            SurfaceKind::Trim => &self.trim,
        }
    }
}

/// Result of one enhancement pass.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct EnhanceReport {
    pub body: usize,
    pub trim: usize,
    /// The graph had already been enhanced; nothing was touched.
    pub skipped: bool,
}

/// One-shot material pass run between load and attach.
pub struct MaterialEnhancer<'a> {
    presets: &'a ShowroomPresets,
    keywords: Vec<String>,
}

impl<'a> MaterialEnhancer<'a> {
    pub fn new(presets: &'a ShowroomPresets) -> Self {
        let keywords = presets
            .body_keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        Self { presets, keywords }
    }

    pub fn classify(&self, material_name: &str) -> SurfaceKind {
        let name = material_name.to_lowercase();
        if self.keywords.iter().any(|k| name.contains(k.as_str())) {
            SurfaceKind::Body
        } else {
            SurfaceKind::Trim
        }
    }

    /// Apply presets, flag shadows and compute bounds on every mesh. Runs once per graph.
    pub fn enhance(&self, graph: &mut SceneGraph) -> EnhanceReport {
        if graph.enhanced {
            log::debug!("material pass already applied, skipping");
            return EnhanceReport { skipped: true, ..EnhanceReport::default() };
        }

        let mut report = EnhanceReport::default();
        graph.for_each_mesh_mut(|mesh| {
            let kind = self.classify(&mesh.material.name);
            mesh.material.apply(self.presets.preset(kind));
            match kind {
                SurfaceKind::Body => report.body += 1,
                SurfaceKind::Trim => report.trim += 1,
            }
            mesh.cast_shadow = true;
            mesh.receive_shadow = true;
            mesh.bounds = Aabb::from_points(&mesh.geometry.positions);
        });
        graph.enhanced = true;

        log::debug!(
            "material pass: {} body surface(s), {} trim surface(s)",
            report.body,
            report.trim
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{Geometry, Mesh, Node};

    fn mesh(material: &str) -> Mesh {
        Mesh::new(
            Geometry {
                positions: vec![[-1.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.5]],
                indices: vec![0, 1, 2],
                ..Default::default()
            },
            Material::named(material).with_pbr(0.5, 0.5),
        )
    }

    fn car() -> SceneGraph {
        SceneGraph::new(
            Node::new("car")
                .with_child(Node::new("shell").with_mesh(mesh("Car_BODY_paint")))
                .with_child(Node::new("door").with_mesh(mesh("ExteriorPanel")))
                .with_child(Node::new("windshield").with_mesh(mesh("Glass")))
                .with_child(Node::new("tyre").with_mesh(mesh(""))),
        )
    }

    #[test]
    fn classify_is_case_insensitive_with_trim_fallback() {
        let presets = ShowroomPresets::default();
        let enhancer = MaterialEnhancer::new(&presets);
        assert_eq!(enhancer.classify("BODY"), SurfaceKind::Body);
        assert_eq!(enhancer.classify("rear_Exterior_trim"), SurfaceKind::Body);
        assert_eq!(enhancer.classify("chrome"), SurfaceKind::Trim);
        assert_eq!(enhancer.classify(""), SurfaceKind::Trim);
    }

    #[test]
    fn enhance_applies_presets_and_bounds() {
        let presets = ShowroomPresets::default();
        let mut graph = car();
        let report = MaterialEnhancer::new(&presets).enhance(&mut graph);
        assert_eq!(report, EnhanceReport { body: 2, trim: 2, skipped: false });
        assert!(graph.enhanced);

        let shell = graph.root.find("shell").and_then(|n| n.mesh.as_ref()).unwrap();
        assert_eq!(shell.material.metalness(), presets.body.metalness);
        assert_eq!(shell.material.roughness(), presets.body.roughness);
        assert!(shell.material.clearcoat.is_some());
        assert!(shell.cast_shadow && shell.receive_shadow);
        assert!(shell.bounds.is_some());

        let glass = graph.root.find("windshield").and_then(|n| n.mesh.as_ref()).unwrap();
        assert_eq!(glass.material.metalness(), 0.3);
        assert_eq!(glass.material.roughness(), 0.7);
        assert!(glass.material.clearcoat.is_none());
    }

    #[test]
    fn second_pass_is_skipped() {
        let presets = ShowroomPresets::default();
        let enhancer = MaterialEnhancer::new(&presets);
        let mut graph = car();
        enhancer.enhance(&mut graph);
        graph.for_each_mesh_mut(|m| m.material.set_metalness(0.0));
        let report = enhancer.enhance(&mut graph);
        assert!(report.skipped);
        assert!(graph.meshes().iter().all(|m| m.material.metalness() == 0.0));
    }

    #[test]
    fn preset_values_are_clamped() {
        let mut material = Material::named("body");
        material.apply(&MaterialPreset {
            roughness: -0.5,
            metalness: 3.0,
            reflection_intensity: 2.0,
            clearcoat: None,
            color: Some([0.8, 0.1, 0.1, 1.0]),
        });
        assert_eq!(material.roughness(), 0.0);
        assert_eq!(material.metalness(), 1.0);
        assert_eq!(material.base_color, [0.8, 0.1, 0.1, 1.0]);
    }

    #[test]
    fn presets_deserialize_with_defaults() {
        let presets: ShowroomPresets =
            serde_json::from_str(r#"{"bodyKeywords":["shell"]}"#).unwrap();
        assert_eq!(presets.body_keywords, vec!["shell".to_string()]);
        assert_eq!(presets.body, MaterialPreset::glossy_body());
    }
}
