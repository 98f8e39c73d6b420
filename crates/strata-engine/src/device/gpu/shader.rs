//! Generated WGSL for the fixed-function emulation.
//!
//! One shader module exists per distinct set of bound vertex attribute
//! formats; everything else (lighting, fog, alpha test, texturing) is
//! driven by the per-draw uniform block.

use bytemuck::{Pod, Zeroable};
use glam::{Mat3, Mat4};

use crate::config::MAX_LIGHTS;
use crate::coords::Color;
use crate::device::{
    AttributeFormat, AttributeSlot, Fog, FogMode, Light, LightKind, LIGHT_LINEAR_ATTENUATION,
    LIGHT_QUADRATIC_ATTENUATION,
};

pub(super) const SLOT_COUNT: usize = 6;

/// Attribute slots in vertex-buffer order.
pub(super) const SLOTS: [AttributeSlot; SLOT_COUNT] = [
    AttributeSlot::Position,
    AttributeSlot::Texel,
    AttributeSlot::Normal,
    AttributeSlot::Color,
    AttributeSlot::InstanceMatrix,
    AttributeSlot::InstanceColor,
];

#[inline]
pub(super) const fn slot_index(slot: AttributeSlot) -> usize {
    match slot {
        AttributeSlot::Position => 0,
        AttributeSlot::Texel => 1,
        AttributeSlot::Normal => 2,
        AttributeSlot::Color => 3,
        AttributeSlot::InstanceMatrix => 4,
        AttributeSlot::InstanceColor => 5,
    }
}

/// Selects a shader variant: the format of every bound attribute.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub(super) struct ShaderKey {
    pub formats: [Option<AttributeFormat>; SLOT_COUNT],
}

impl ShaderKey {
    #[inline]
    pub fn has(&self, slot: AttributeSlot) -> bool {
        self.formats[slot_index(slot)].is_some()
    }
}

// ── uniforms ──────────────────────────────────────────────────────────────

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub(super) struct LightUniform {
    /// x: kind (0 ambient, 1 directional, 2 point)
    pub params: [f32; 4],
    pub color: [f32; 4],
    pub ambient: [f32; 4],
    pub position: [f32; 4],
    pub direction: [f32; 4],
}

impl LightUniform {
    pub fn from_light(light: &Light) -> Self {
        let kind = match light.kind {
            LightKind::Ambient => 0.0,
            LightKind::Directional => 1.0,
            LightKind::Point => 2.0,
        };
        Self {
            params: [kind, 0.0, 0.0, 0.0],
            color: light.color.to_array(),
            ambient: light.ambient.to_array(),
            position: light.position.extend(1.0).to_array(),
            direction: light.direction.extend(0.0).to_array(),
        }
    }
}

/// Per-draw uniform block. Layout mirrors `struct Draw` in the WGSL below.
#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub(super) struct DrawUniforms {
    pub projection: [[f32; 4]; 4],
    pub model_view: [[f32; 4]; 4],
    pub normal_matrix: [[f32; 4]; 4],
    pub color: [f32; 4],
    pub specular: [f32; 4],
    pub fog_color: [f32; 4],
    /// mode (0 off, 1 linear, 2 exp2), start, end, density
    pub fog: [f32; 4],
    /// alpha threshold (negative when off), lighting, textured, light count
    pub flags: [f32; 4],
    pub lights: [LightUniform; MAX_LIGHTS],
}

/// Inputs gathered from the api's current state at draw time.
pub(super) struct DrawState<'a> {
    pub projection: &'a Mat4,
    pub model_view: &'a Mat4,
    pub color: Color,
    pub specular: Color,
    pub fog: Option<&'a Fog>,
    pub alpha_threshold: Option<f32>,
    pub lit: bool,
    pub textured: bool,
    pub lights: &'a [Light],
}

impl DrawUniforms {
    pub fn new(s: &DrawState<'_>) -> Self {
        let mut lights = [LightUniform::zeroed(); MAX_LIGHTS];
        let count = s.lights.len().min(MAX_LIGHTS);
        for (dst, src) in lights.iter_mut().zip(s.lights) {
            *dst = LightUniform::from_light(src);
        }

        let (fog_color, fog) = match s.fog {
            Some(f) => match f.mode {
                FogMode::Linear { start, end } if end > start => {
                    (f.color.to_array(), [1.0, start, end, 0.0])
                }
                FogMode::Linear { .. } => ([0.0; 4], [0.0; 4]),
                FogMode::Exp2 { density } => (f.color.to_array(), [2.0, 0.0, 0.0, density]),
            },
            None => ([0.0; 4], [0.0; 4]),
        };

        Self {
            projection: s.projection.to_cols_array_2d(),
            model_view: s.model_view.to_cols_array_2d(),
            normal_matrix: normal_matrix(s.model_view).to_cols_array_2d(),
            color: s.color.to_array(),
            specular: s.specular.to_array(),
            fog_color,
            fog,
            flags: [
                s.alpha_threshold.unwrap_or(-1.0),
                if s.lit { 1.0 } else { 0.0 },
                if s.textured { 1.0 } else { 0.0 },
                count as f32,
            ],
            lights,
        }
    }
}

/// Inverse-transpose of the upper 3x3. Singular matrices pass through.
fn normal_matrix(model_view: &Mat4) -> Mat4 {
    let m = Mat3::from_mat4(*model_view);
    if m.determinant().abs() <= f32::EPSILON {
        return Mat4::from_mat3(m);
    }
    Mat4::from_mat3(m.inverse().transpose())
}

// ── source generation ─────────────────────────────────────────────────────

const COMMON: &str = r#"
struct Light {
    params: vec4<f32>,
    color: vec4<f32>,
    ambient: vec4<f32>,
    position: vec4<f32>,
    direction: vec4<f32>,
};

struct Draw {
    projection: mat4x4<f32>,
    model_view: mat4x4<f32>,
    normal_matrix: mat4x4<f32>,
    color: vec4<f32>,
    specular: vec4<f32>,
    fog_color: vec4<f32>,
    fog: vec4<f32>,
    flags: vec4<f32>,
    lights: array<Light, MAX_LIGHTS>,
};

@group(0) @binding(0) var<uniform> u: Draw;
@group(1) @binding(0) var t_color: texture_2d<f32>;
@group(1) @binding(1) var s_color: sampler;

struct VertexOutput {
    @builtin(position) clip: vec4<f32>,
    @location(0) color: vec4<f32>,
    @location(1) texel: vec2<f32>,
    @location(2) eye_distance: f32,
};

// Gouraud lighting in eye space. Directional lights carry the direction
// the light travels.
fn light_vertex(base: vec4<f32>, eye: vec3<f32>, normal: vec3<f32>) -> vec4<f32> {
    var lit = vec3<f32>(0.0);
    var spec = vec3<f32>(0.0);
    let count = u32(u.flags.w);
    for (var i = 0u; i < count; i = i + 1u) {
        let l = u.lights[i];
        let kind = u32(l.params.x);
        if (kind == 0u) {
            lit = lit + l.color.rgb;
            continue;
        }
        var dir = normalize(-l.direction.xyz);
        var attenuation = 1.0;
        if (kind == 2u) {
            let to_light = l.position.xyz - eye;
            let d = length(to_light);
            dir = to_light / max(d, 1e-5);
            attenuation = 1.0 / (1.0 + LINEAR_ATTENUATION * d + QUADRATIC_ATTENUATION * d * d);
        }
        let diffuse = max(dot(normal, dir), 0.0);
        lit = lit + attenuation * (l.ambient.rgb + l.color.rgb * diffuse);
        if (diffuse > 0.0) {
            let half_vec = normalize(dir - normalize(eye));
            spec = spec + attenuation * l.color.rgb * pow(max(dot(normal, half_vec), 0.0), 32.0);
        }
    }
    return vec4<f32>(base.rgb * lit + u.specular.rgb * spec, base.a);
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    var color = in.color;
    if (u.flags.z > 0.5) {
        color = color * textureSample(t_color, s_color, in.texel);
    }
    if (color.a <= u.flags.x) {
        discard;
    }
    let mode = u32(u.fog.x);
    if (mode != 0u) {
        var f = 1.0;
        if (mode == 1u) {
            f = (u.fog.z - in.eye_distance) / (u.fog.z - u.fog.y);
        } else {
            let d = u.fog.w * in.eye_distance;
            f = exp(-(d * d));
        }
        color = vec4<f32>(mix(u.fog_color.rgb, color.rgb, clamp(f, 0.0, 1.0)), color.a);
    }
    return color;
}
"#;

const fn components(format: AttributeFormat) -> u32 {
    match format {
        AttributeFormat::Float32x2 => 2,
        AttributeFormat::Float32x3 => 3,
        AttributeFormat::Float32x4 | AttributeFormat::Mat4 => 4,
    }
}

fn wgsl_vec(n: u32) -> String {
    format!("vec{n}<f32>")
}

fn field_name(slot: AttributeSlot) -> &'static str {
    match slot {
        AttributeSlot::Position => "position",
        AttributeSlot::Texel => "texel",
        AttributeSlot::Normal => "normal",
        AttributeSlot::Color => "color",
        AttributeSlot::InstanceMatrix => "instance_matrix",
        AttributeSlot::InstanceColor => "instance_color",
    }
}

/// Widens or narrows `in.<field>` to `want` components, filling with `fill`
/// (the trailing components of `(0, 0, 0, 1)`-style defaults).
fn fit(field: &str, have: u32, want: u32, fill: [&str; 4]) -> String {
    let src = format!("in.{field}");
    match have.cmp(&want) {
        std::cmp::Ordering::Equal => src,
        std::cmp::Ordering::Greater => {
            let swizzle = &"xyzw"[..want as usize];
            format!("{src}.{swizzle}")
        }
        std::cmp::Ordering::Less => {
            let pad = fill[have as usize..want as usize].join(", ");
            format!("{}({src}, {pad})", wgsl_vec(want))
        }
    }
}

const POSITION_FILL: [&str; 4] = ["0.0", "0.0", "0.0", "1.0"];
const COLOR_FILL: [&str; 4] = ["0.0", "0.0", "0.0", "1.0"];
const PLAIN_FILL: [&str; 4] = ["0.0", "0.0", "0.0", "0.0"];

/// Full WGSL module (vertex + fragment) for `key`.
///
/// `key` must contain a position attribute.
pub(super) fn shader_source(key: &ShaderKey) -> String {
    let mut src = COMMON
        .replace("MAX_LIGHTS", &MAX_LIGHTS.to_string())
        .replace("LINEAR_ATTENUATION", &format!("{LIGHT_LINEAR_ATTENUATION:?}"))
        .replace("QUADRATIC_ATTENUATION", &format!("{LIGHT_QUADRATIC_ATTENUATION:?}"));

    // vertex inputs
    src.push_str("\nstruct VertexInput {\n");
    for slot in SLOTS {
        let Some(format) = key.formats[slot_index(slot)] else { continue };
        if slot == AttributeSlot::InstanceMatrix && format == AttributeFormat::Mat4 {
            for c in 0..4 {
                src.push_str(&format!(
                    "    @location({}) instance_col{c}: vec4<f32>,\n",
                    slot.location() + c
                ));
            }
            continue;
        }
        src.push_str(&format!(
            "    @location({}) {}: {},\n",
            slot.location(),
            field_name(slot),
            wgsl_vec(components(format))
        ));
    }
    src.push_str("};\n");

    let n = |slot: AttributeSlot| key.formats[slot_index(slot)].map(components);

    let position = match n(AttributeSlot::Position) {
        Some(have) => fit("position", have, 4, POSITION_FILL),
        None => "vec4<f32>(0.0, 0.0, 0.0, 1.0)".to_owned(),
    };
    let normal = match n(AttributeSlot::Normal) {
        Some(have) => fit("normal", have, 3, PLAIN_FILL),
        None => "vec3<f32>(0.0, 0.0, 1.0)".to_owned(),
    };
    let color = match n(AttributeSlot::Color) {
        Some(have) => fit("color", have, 4, COLOR_FILL),
        None => "u.color".to_owned(),
    };
    let texel = match n(AttributeSlot::Texel) {
        Some(have) => fit("texel", have, 2, PLAIN_FILL),
        None => "vec2<f32>(0.0)".to_owned(),
    };

    src.push_str("\n@vertex\nfn vs_main(in: VertexInput) -> VertexOutput {\n");
    src.push_str(&format!("    var local = {position};\n"));
    src.push_str(&format!("    var normal = {normal};\n"));
    match key.formats[slot_index(AttributeSlot::InstanceMatrix)] {
        Some(AttributeFormat::Mat4) => {
            src.push_str(
                "    let inst = mat4x4<f32>(in.instance_col0, in.instance_col1, \
                 in.instance_col2, in.instance_col3);\n",
            );
            src.push_str("    local = inst * local;\n");
            src.push_str("    normal = (inst * vec4<f32>(normal, 0.0)).xyz;\n");
        }
        Some(_) | None => {}
    }
    src.push_str("    let eye = u.model_view * local;\n");
    src.push_str("    let clip = u.projection * eye;\n");
    src.push_str("    var out: VertexOutput;\n");
    // GL clip depth [-w, w] onto wgpu's [0, w].
    src.push_str("    out.clip = vec4<f32>(clip.x, clip.y, 0.5 * clip.z + 0.5 * clip.w, clip.w);\n");
    src.push_str(&format!("    var base = {color};\n"));
    if let Some(have) = n(AttributeSlot::InstanceColor) {
        src.push_str(&format!(
            "    base = base * {};\n",
            fit("instance_color", have, 4, COLOR_FILL)
        ));
    }
    src.push_str("    if (u.flags.y > 0.5) {\n");
    src.push_str(
        "        let n = normalize((u.normal_matrix * vec4<f32>(normal, 0.0)).xyz);\n",
    );
    src.push_str("        base = light_vertex(base, eye.xyz, n);\n");
    src.push_str("    }\n");
    src.push_str("    out.color = base;\n");
    src.push_str(&format!("    out.texel = {texel};\n"));
    src.push_str("    out.eye_distance = length(eye.xyz);\n");
    src.push_str("    return out;\n}\n");
    src
}
