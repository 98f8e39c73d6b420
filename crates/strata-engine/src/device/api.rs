use std::time::Duration;

use glam::{Mat4, Vec3};

use crate::coords::{Color, PixelRect};

// ── resource ids ──────────────────────────────────────────────────────────

/// GPU buffer object.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct GpuBufferId(pub u32);

/// Vertex-array object: a recorded set of attribute bindings.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct VertexArrayId(pub u32);

/// GPU fence signalled when previously submitted work has completed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct FenceId(pub u32);

/// GPU texture object.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TextureResourceId(pub u32);

/// Pending framebuffer readback.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ReadbackId(pub u32);

// ── fixed-function state ──────────────────────────────────────────────────

/// Toggleable pipeline capabilities.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Capability {
    DepthTest,
    Blend,
    CullFace,
    StencilTest,
    AlphaTest,
    PolygonOffsetFill,
    Fog,
    Lighting,
    ColorMaterial,
    ScissorTest,
    LineSmooth,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CullFace {
    Front,
    Back,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CompareFunc {
    Always,
    Never,
    Equal,
    Less,
    LessEqual,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BlendEquation {
    Add,
    /// `src * sf - dst * df`, as `GL_FUNC_SUBTRACT`
    Subtract,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    One,
    SrcAlpha,
    OneMinusSrcAlpha,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct BlendMode {
    pub equation: BlendEquation,
    pub src: BlendFactor,
    pub dst: BlendFactor,
}

impl BlendMode {
    pub const ALPHA: BlendMode = BlendMode {
        equation: BlendEquation::Add,
        src: BlendFactor::SrcAlpha,
        dst: BlendFactor::OneMinusSrcAlpha,
    };
    pub const ADDITIVE: BlendMode = BlendMode {
        equation: BlendEquation::Add,
        src: BlendFactor::SrcAlpha,
        dst: BlendFactor::One,
    };
    pub const SUBTRACTIVE: BlendMode = BlendMode {
        equation: BlendEquation::Subtract,
        src: BlendFactor::SrcAlpha,
        dst: BlendFactor::One,
    };
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum StencilAction {
    Keep,
    Zero,
    Replace,
    Increment,
    Decrement,
    Invert,
}

/// Actions on stencil-fail, depth-fail and pass.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct StencilOps {
    pub fail: StencilAction,
    pub depth_fail: StencilAction,
    pub pass: StencilAction,
}

impl StencilOps {
    pub const KEEP: StencilOps = StencilOps::on_pass(StencilAction::Keep);

    #[inline]
    pub const fn on_pass(pass: StencilAction) -> Self {
        Self {
            fail: StencilAction::Keep,
            depth_fail: StencilAction::Keep,
            pass,
        }
    }

    #[inline]
    pub const fn all(action: StencilAction) -> Self {
        Self {
            fail: action,
            depth_fail: action,
            pass: action,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct StencilFunc {
    pub compare: CompareFunc,
    pub reference: u32,
    pub mask: u32,
}

impl StencilFunc {
    pub const ALWAYS: StencilFunc = StencilFunc {
        compare: CompareFunc::Always,
        reference: 1,
        mask: 1,
    };
    /// Pass only where the stencil bit is set.
    pub const MASKED: StencilFunc = StencilFunc {
        compare: CompareFunc::Equal,
        reference: 1,
        mask: 1,
    };
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ShadeModel {
    Flat,
    Smooth,
}

/// Shader variant requested by the shader render scheme. Backends without
/// programmable shading may ignore it.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct ProgramSelection {
    pub lit: bool,
    pub textured: bool,
    pub glow: bool,
}

// ── lighting ──────────────────────────────────────────────────────────────

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum LightKind {
    Ambient,
    Directional,
    Point,
}

/// A light as carried by display lists. The renderer hands backends
/// eye-space positions and directions.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Light {
    pub kind: LightKind,
    pub color: Color,
    pub ambient: Color,
    pub position: Vec3,
    pub direction: Vec3,
}

impl Light {
    pub fn ambient(color: Color) -> Self {
        Self {
            kind: LightKind::Ambient,
            color,
            ambient: Color::BLACK,
            position: Vec3::ZERO,
            direction: Vec3::ZERO,
        }
    }

    pub fn directional(direction: Vec3, color: Color, ambient: Color) -> Self {
        Self {
            kind: LightKind::Directional,
            color,
            ambient,
            position: Vec3::ZERO,
            direction,
        }
    }

    pub fn point(position: Vec3, color: Color, ambient: Color) -> Self {
        Self {
            kind: LightKind::Point,
            color,
            ambient,
            position,
            direction: Vec3::ZERO,
        }
    }
}

/// Point-light falloff, matching classic GL attenuation terms.
pub const LIGHT_LINEAR_ATTENUATION: f32 = 0.05;
pub const LIGHT_QUADRATIC_ATTENUATION: f32 = 0.01;

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum FogMode {
    Linear { start: f32, end: f32 },
    Exp2 { density: f32 },
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Fog {
    pub color: Color,
    pub mode: FogMode,
}

impl Fog {
    #[inline]
    pub fn linear(color: Color, start: f32, end: f32) -> Self {
        Self {
            color,
            mode: FogMode::Linear { start, end },
        }
    }

    #[inline]
    pub fn exp2(color: Color, density: f32) -> Self {
        Self {
            color,
            mode: FogMode::Exp2 { density },
        }
    }

    /// Fraction of the surface color kept at eye distance `distance`.
    pub fn visibility(&self, distance: f32) -> f32 {
        let f = match self.mode {
            FogMode::Linear { start, end } => {
                if end <= start {
                    1.0
                } else {
                    (end - distance) / (end - start)
                }
            }
            FogMode::Exp2 { density } => {
                let d = density * distance;
                (-(d * d)).exp()
            }
        };
        f.clamp(0.0, 1.0)
    }
}

// ── geometry ──────────────────────────────────────────────────────────────

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Primitive {
    Points,
    Lines,
    LineStrip,
    Triangles,
    TriangleStrip,
    TriangleFan,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BufferTarget {
    Vertex,
    Index,
}

/// Allocation hint, as for `glBufferData`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    Static,
    Dynamic,
    Stream,
}

/// Fixed attribute locations shared by every vertex layout.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum AttributeSlot {
    Position,
    Texel,
    Normal,
    Color,
    /// Four consecutive locations, one per matrix column.
    InstanceMatrix,
    InstanceColor,
}

impl AttributeSlot {
    pub const PER_VERTEX: [AttributeSlot; 4] = [
        AttributeSlot::Position,
        AttributeSlot::Texel,
        AttributeSlot::Normal,
        AttributeSlot::Color,
    ];

    pub const PER_INSTANCE: [AttributeSlot; 2] =
        [AttributeSlot::InstanceMatrix, AttributeSlot::InstanceColor];

    /// First shader location used by the slot.
    pub const fn location(self) -> u32 {
        match self {
            AttributeSlot::Position => 0,
            AttributeSlot::Texel => 1,
            AttributeSlot::Normal => 2,
            AttributeSlot::Color => 3,
            AttributeSlot::InstanceMatrix => 4,
            AttributeSlot::InstanceColor => 8,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum AttributeFormat {
    Float32x2,
    Float32x3,
    Float32x4,
    /// Column-major 4x4 matrix spread over four locations.
    Mat4,
}

impl AttributeFormat {
    pub const fn size(self) -> u64 {
        match self {
            AttributeFormat::Float32x2 => 8,
            AttributeFormat::Float32x3 => 12,
            AttributeFormat::Float32x4 => 16,
            AttributeFormat::Mat4 => 64,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum StepMode {
    Vertex,
    Instance,
}

/// One attribute pointer: where the data lives and how to step through it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct AttributeBinding {
    pub slot: AttributeSlot,
    pub buffer: GpuBufferId,
    /// Byte offset of element 0 within `buffer`.
    pub offset: u64,
    pub stride: u32,
    pub format: AttributeFormat,
    pub step: StepMode,
}

// ── targets & readback ────────────────────────────────────────────────────

/// Which targets a clear touches, and the value each is cleared to.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct ClearTargets {
    pub color: Option<Color>,
    pub depth: Option<f32>,
    pub stencil: Option<u32>,
}

impl ClearTargets {
    pub fn all(color: Color) -> Self {
        Self {
            color: Some(color),
            depth: Some(1.0),
            stencil: Some(0),
        }
    }

    pub fn stencil(value: u32) -> Self {
        Self {
            stencil: Some(value),
            ..Self::default()
        }
    }
}

/// Tightly packed RGBA8 image, top row first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbaImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl RgbaImage {
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let mut pixels = Vec::with_capacity(width as usize * height as usize * 4);
        for _ in 0..(width as usize * height as usize) {
            pixels.extend_from_slice(&rgba);
        }
        Self { width, height, pixels }
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 4;
        let p = self.pixels.get(i..i + 4)?;
        Some([p[0], p[1], p[2], p[3]])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FenceStatus {
    Signaled,
    TimedOut,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadbackStatus {
    Pending,
    Ready(RgbaImage),
    Failed(String),
}

// ── the interface ─────────────────────────────────────────────────────────

/// GL-shaped capability interface the rendering core drives.
///
/// State set here persists until changed, as in a GL context. The renderer
/// only goes through the state cache for toggles it diffs; everything else is
/// issued directly. Implementations must be object-safe consumers: render
/// buffers and schemes take `&mut dyn GraphicsApi`.
pub trait GraphicsApi {
    // state
    fn set_enabled(&mut self, cap: Capability, enabled: bool);
    fn set_depth_mask(&mut self, write: bool);
    fn set_depth_func(&mut self, func: CompareFunc);
    fn set_cull_face(&mut self, face: CullFace);
    fn set_alpha_threshold(&mut self, threshold: f32);
    fn set_polygon_offset(&mut self, factor: f32, units: f32);
    fn set_blend(&mut self, mode: BlendMode);
    fn set_stencil_ops(&mut self, ops: StencilOps);
    fn set_stencil_func(&mut self, func: StencilFunc);
    fn set_shade_model(&mut self, model: ShadeModel);
    fn set_color_mask(&mut self, write_color: bool);
    fn set_line_width(&mut self, width: f32);
    fn select_program(&mut self, program: Option<ProgramSelection>);

    // current vertex color / material
    fn set_color(&mut self, color: Color);
    fn set_specular(&mut self, color: Color);

    // matrices
    fn load_projection(&mut self, m: &Mat4);
    fn load_model_view(&mut self, m: &Mat4);

    // lighting
    /// `None` disables the slot.
    fn set_light(&mut self, slot: usize, light: Option<&Light>);
    fn set_fog(&mut self, fog: Option<&Fog>);

    // targets
    fn set_viewport(&mut self, rect: PixelRect);
    fn set_scissor(&mut self, rect: PixelRect);
    fn clear(&mut self, targets: ClearTargets);

    // textures
    fn create_texture(&mut self, image: &RgbaImage) -> TextureResourceId;
    /// `None` disables texturing.
    fn bind_texture(&mut self, texture: Option<TextureResourceId>, clamp_u: bool, clamp_v: bool);
    fn delete_texture(&mut self, texture: TextureResourceId);

    // buffers
    fn create_buffer(&mut self, target: BufferTarget) -> GpuBufferId;
    fn delete_buffer(&mut self, buffer: GpuBufferId);
    /// Reallocates `buffer` to exactly `data.len()` bytes and fills it.
    fn buffer_data(&mut self, buffer: GpuBufferId, data: &[u8], usage: BufferUsage);
    /// Orphans the current storage and allocates `size` undefined bytes.
    fn buffer_storage(&mut self, buffer: GpuBufferId, size: usize, usage: BufferUsage);
    /// Unsynchronized write into existing storage. The caller guarantees the
    /// GPU is not reading the range.
    fn buffer_sub_data(&mut self, buffer: GpuBufferId, offset: u64, data: &[u8]);

    // fences
    fn fence_sync(&mut self) -> FenceId;
    fn client_wait_fence(&mut self, fence: FenceId, timeout: Duration) -> FenceStatus;
    fn delete_fence(&mut self, fence: FenceId);

    // vertex arrays
    fn create_vertex_array(&mut self) -> VertexArrayId;
    fn delete_vertex_array(&mut self, vao: VertexArrayId);
    /// `None` selects the default (loose) attribute set.
    fn bind_vertex_array(&mut self, vao: Option<VertexArrayId>);
    /// Records `binding` into the bound vertex array.
    fn vertex_attrib(&mut self, binding: AttributeBinding);
    fn disable_attrib(&mut self, slot: AttributeSlot);

    // draws
    fn draw_elements(
        &mut self,
        primitive: Primitive,
        indices: GpuBufferId,
        byte_offset: u64,
        count: u32,
        instances: u32,
    );
    fn draw_arrays(&mut self, primitive: Primitive, first: u32, count: u32, instances: u32);

    // frame
    fn present(&mut self);
    fn request_readback(&mut self) -> ReadbackId;
    fn poll_readback(&mut self, id: ReadbackId) -> ReadbackStatus;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_fog_falls_off_between_planes() {
        let fog = Fog::linear(Color::BLACK, 10.0, 20.0);
        assert_eq!(fog.visibility(5.0), 1.0);
        assert_eq!(fog.visibility(15.0), 0.5);
        assert_eq!(fog.visibility(40.0), 0.0);
    }

    #[test]
    fn exp2_fog_is_one_at_eye() {
        let fog = Fog::exp2(Color::BLACK, 0.1);
        assert_eq!(fog.visibility(0.0), 1.0);
        assert!(fog.visibility(10.0) < 0.5);
    }

    #[test]
    fn instance_slots_follow_vertex_slots() {
        assert_eq!(AttributeSlot::Color.location(), 3);
        assert_eq!(AttributeSlot::InstanceMatrix.location(), 4);
        assert_eq!(AttributeSlot::InstanceColor.location(), 8);
    }

    #[test]
    fn image_pixel_lookup() {
        let img = RgbaImage::filled(2, 2, [1, 2, 3, 4]);
        assert_eq!(img.pixel(1, 1), Some([1, 2, 3, 4]));
        assert_eq!(img.pixel(2, 0), None);
    }
}
