// src/shaders.rs
// WGSL sources for the two programs the viewer builds. Struct layouts must match the Pod
// uniforms: `CameraUniform`, `LightingUniform`/`GpuLight`, `MeshUniform`, `OverlayUniform`.

/// Lit model geometry. Group 0 = frame (camera, lighting), group 1 = mesh.
pub const MESH_WGSL: &str = r#"
struct Camera {
    view_proj: mat4x4<f32>,
    eye: vec4<f32>,
};

struct Light {
    position: vec3<f32>,
    light_type: u32,
    color: vec3<f32>,
    intensity: f32,
    direction: vec3<f32>,
    spot_cos: f32,
    casts_shadow: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
};

struct Lighting {
    ambient: vec3<f32>,
    ambient_intensity: f32,
    light_count: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
    lights: array<Light, 4>,
};

struct Mesh {
    model: mat4x4<f32>,
    base_color: vec4<f32>,
    // roughness, metalness, reflection intensity, clearcoat
    pbr: vec4<f32>,
    // clearcoat roughness, has texture
    extra: vec4<f32>,
};

@group(0) @binding(0) var<uniform> camera: Camera;
@group(0) @binding(1) var<uniform> lighting: Lighting;
@group(1) @binding(0) var<uniform> mesh: Mesh;
@group(1) @binding(1) var base_tex: texture_2d<f32>;
@group(1) @binding(2) var base_sampler: sampler;

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
};

struct VertexOutput {
    @builtin(position) clip_pos: vec4<f32>,
    @location(0) world_pos: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
};

@vertex
fn vs_main(in: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    let world = mesh.model * vec4<f32>(in.position, 1.0);
    out.clip_pos = camera.view_proj * world;
    out.world_pos = world.xyz;
    // Uniform scale only, so the model matrix is fine for normals.
    out.normal = normalize((mesh.model * vec4<f32>(in.normal, 0.0)).xyz);
    out.uv = in.uv;
    return out;
}

const PI: f32 = 3.14159265;

fn distribution_ggx(n_dot_h: f32, roughness: f32) -> f32 {
    let a = roughness * roughness;
    let a2 = a * a;
    let d = n_dot_h * n_dot_h * (a2 - 1.0) + 1.0;
    return a2 / max(PI * d * d, 1e-4);
}

fn fresnel_schlick(cos_theta: f32, f0: vec3<f32>) -> vec3<f32> {
    return f0 + (vec3<f32>(1.0) - f0) * pow(1.0 - clamp(cos_theta, 0.0, 1.0), 5.0);
}

// Cheap studio environment: bright ceiling, dark floor.
fn studio_env(dir: vec3<f32>) -> vec3<f32> {
    let t = clamp(dir.y * 0.5 + 0.5, 0.0, 1.0);
    return mix(vec3<f32>(0.05, 0.05, 0.06), vec3<f32>(0.9, 0.92, 1.0), t * t);
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    var albedo = mesh.base_color;
    if (mesh.extra.y > 0.5) {
        albedo = albedo * textureSample(base_tex, base_sampler, in.uv);
    }
    let roughness = clamp(mesh.pbr.x, 0.04, 1.0);
    let metalness = mesh.pbr.y;
    let reflection = mesh.pbr.z;
    let coat = mesh.pbr.w;
    let coat_roughness = clamp(mesh.extra.x, 0.02, 1.0);

    let n = normalize(in.normal);
    let v = normalize(camera.eye.xyz - in.world_pos);
    let n_dot_v = max(dot(n, v), 1e-3);
    let f0 = mix(vec3<f32>(0.04), albedo.rgb, metalness);

    var color = lighting.ambient * lighting.ambient_intensity * albedo.rgb * (1.0 - metalness * 0.5);

    for (var i = 0u; i < min(lighting.light_count, 4u); i = i + 1u) {
        let light = lighting.lights[i];
        var l = -light.direction;
        var falloff = 1.0;
        if (light.light_type == 2u) {
            l = normalize(light.position - in.world_pos);
            let cos_angle = dot(-l, light.direction);
            falloff = smoothstep(light.spot_cos, mix(light.spot_cos, 1.0, 0.2), cos_angle);
        }
        let n_dot_l = max(dot(n, l), 0.0);
        if (n_dot_l <= 0.0 || falloff <= 0.0) {
            continue;
        }
        let h = normalize(l + v);
        let n_dot_h = max(dot(n, h), 0.0);
        let f = fresnel_schlick(max(dot(h, v), 0.0), f0);
        let spec = distribution_ggx(n_dot_h, roughness) * f / (4.0 * n_dot_v * n_dot_l + 1e-3);
        let diffuse = (vec3<f32>(1.0) - f) * (1.0 - metalness) * albedo.rgb / PI;
        var lit = (diffuse + spec) * n_dot_l;
        if (coat > 0.0) {
            let fc = fresnel_schlick(max(dot(h, v), 0.0), vec3<f32>(0.04)).x * coat;
            lit = lit * (1.0 - fc) + vec3<f32>(distribution_ggx(n_dot_h, coat_roughness) * fc * n_dot_l * 0.25);
        }
        color = color + lit * light.color * light.intensity * falloff * PI;
    }

    let r = reflect(-v, n);
    let env_f = fresnel_schlick(n_dot_v, f0) * (1.0 - roughness * 0.7);
    color = color + studio_env(r) * env_f * reflection * 0.35;
    if (coat > 0.0) {
        color = color + studio_env(r) * fresnel_schlick(n_dot_v, vec3<f32>(0.04)) * coat * reflection * 0.5;
    }

    // Reinhard
    color = color / (color + vec3<f32>(1.0));
    return vec4<f32>(color, albedo.a);
}
"#;

/// Loading bar drawn from six generated vertices. Group 0 = overlay uniform.
pub const OVERLAY_WGSL: &str = r#"
struct Overlay {
    // x0, y0, x1, y1 in clip space
    rect: vec4<f32>,
    track: vec4<f32>,
    fill: vec4<f32>,
    progress: f32,
    _pad0: f32,
    _pad1: f32,
    _pad2: f32,
};

@group(0) @binding(0) var<uniform> overlay: Overlay;

struct VertexOutput {
    @builtin(position) clip_pos: vec4<f32>,
    @location(0) u: f32,
};

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> VertexOutput {
    var corners = array<vec2<f32>, 6>(
        vec2<f32>(0.0, 0.0), vec2<f32>(1.0, 0.0), vec2<f32>(1.0, 1.0),
        vec2<f32>(0.0, 0.0), vec2<f32>(1.0, 1.0), vec2<f32>(0.0, 1.0),
    );
    let c = corners[index];
    var out: VertexOutput;
    let xy = mix(overlay.rect.xy, overlay.rect.zw, c);
    out.clip_pos = vec4<f32>(xy, 0.0, 1.0);
    out.u = c.x;
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    if (in.u <= overlay.progress) {
        return overlay.fill;
    }
    return overlay.track;
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_points_present() {
        for src in [MESH_WGSL, OVERLAY_WGSL] {
            assert!(src.contains("fn vs_main"));
            assert!(src.contains("fn fs_main"));
        }
    }

    #[test]
    fn mesh_shader_binds_both_groups() {
        assert!(MESH_WGSL.contains("@group(0) @binding(1) var<uniform> lighting"));
        assert!(MESH_WGSL.contains("@group(1) @binding(2) var base_sampler"));
    }
}
