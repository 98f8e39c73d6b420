use std::mem::{offset_of, size_of};
use std::time::Duration;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3};

use crate::config::{DYNAMIC_RING_SLOTS, FENCE_WAIT_BUDGET};
use crate::coords::{Box3D, Color};
use crate::device::{
    AttributeBinding, AttributeFormat, AttributeSlot, BufferTarget, BufferUsage, FenceId,
    FenceStatus, GpuBufferId, GraphicsApi, Primitive, StepMode, VertexArrayId,
};

use super::scratch::FrameScratch;

// ── vertex layouts ────────────────────────────────────────────────────────

/// Per-element layout of a render buffer's payload.
///
/// Composite names list their fields in memory order: Position, Color,
/// Normal, Texel.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub enum ContentType {
    /// Opaque bytes. Cannot be bound or drawn.
    #[default]
    Custom,
    Vector2,
    Vector3,
    Color,
    Matrix,
    Index16,
    PC,
    PT,
    PN,
    PCT,
    PNT,
    PCN,
    PCNT,
}

macro_rules! vertex_struct {
    ($(#[$doc:meta])* $name:ident { $($field:ident : $ty:ty),+ $(,)? }) => {
        $(#[$doc])*
        #[repr(C)]
        #[derive(Debug, Copy, Clone, Default, PartialEq, Pod, Zeroable)]
        pub struct $name {
            $(pub $field: $ty),+
        }
    };
}

vertex_struct!(VertexPC { position: [f32; 3], color: Color });
vertex_struct!(VertexPT { position: [f32; 3], texel: [f32; 2] });
vertex_struct!(VertexPN { position: [f32; 3], normal: [f32; 3] });
vertex_struct!(VertexPCT { position: [f32; 3], color: Color, texel: [f32; 2] });
vertex_struct!(VertexPNT { position: [f32; 3], normal: [f32; 3], texel: [f32; 2] });
vertex_struct!(VertexPCN { position: [f32; 3], color: Color, normal: [f32; 3] });
vertex_struct!(
    /// Full vertex: the layout used by binary mesh fragments.
    VertexPCNT { position: [f32; 3], color: Color, normal: [f32; 3], texel: [f32; 2] }
);

/// Element types a `RenderBuffer` can be filled from.
pub trait VertexData: Pod {
    const CONTENT: ContentType;
}

macro_rules! vertex_data {
    ($($ty:ty => $content:ident),+ $(,)?) => {
        $(impl VertexData for $ty {
            const CONTENT: ContentType = ContentType::$content;
        })+
    };
}

vertex_data! {
    [f32; 2] => Vector2,
    Vec2 => Vector2,
    [f32; 3] => Vector3,
    Vec3 => Vector3,
    Color => Color,
    Mat4 => Matrix,
    u16 => Index16,
    VertexPC => PC,
    VertexPT => PT,
    VertexPN => PN,
    VertexPCT => PCT,
    VertexPNT => PNT,
    VertexPCN => PCN,
    VertexPCNT => PCNT,
}

/// One attribute within a vertex layout.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct VertexAttr {
    pub slot: AttributeSlot,
    pub format: AttributeFormat,
    pub offset: u64,
}

const fn attr(slot: AttributeSlot, format: AttributeFormat, offset: usize) -> VertexAttr {
    VertexAttr {
        slot,
        format,
        offset: offset as u64,
    }
}

use AttributeFormat::{Float32x2 as F2, Float32x3 as F3, Float32x4 as F4};
use AttributeSlot::{Color as SColor, Normal as SNormal, Position as SPos, Texel as STexel};

const LAYOUT_V2: &[VertexAttr] = &[attr(SPos, F2, 0)];
const LAYOUT_V3: &[VertexAttr] = &[attr(SPos, F3, 0)];
const LAYOUT_PC: &[VertexAttr] = &[
    attr(SPos, F3, 0),
    attr(SColor, F4, offset_of!(VertexPC, color)),
];
const LAYOUT_PT: &[VertexAttr] = &[
    attr(SPos, F3, 0),
    attr(STexel, F2, offset_of!(VertexPT, texel)),
];
const LAYOUT_PN: &[VertexAttr] = &[
    attr(SPos, F3, 0),
    attr(SNormal, F3, offset_of!(VertexPN, normal)),
];
const LAYOUT_PCT: &[VertexAttr] = &[
    attr(SPos, F3, 0),
    attr(SColor, F4, offset_of!(VertexPCT, color)),
    attr(STexel, F2, offset_of!(VertexPCT, texel)),
];
const LAYOUT_PNT: &[VertexAttr] = &[
    attr(SPos, F3, 0),
    attr(SNormal, F3, offset_of!(VertexPNT, normal)),
    attr(STexel, F2, offset_of!(VertexPNT, texel)),
];
const LAYOUT_PCN: &[VertexAttr] = &[
    attr(SPos, F3, 0),
    attr(SColor, F4, offset_of!(VertexPCN, color)),
    attr(SNormal, F3, offset_of!(VertexPCN, normal)),
];
const LAYOUT_PCNT: &[VertexAttr] = &[
    attr(SPos, F3, 0),
    attr(SColor, F4, offset_of!(VertexPCNT, color)),
    attr(SNormal, F3, offset_of!(VertexPCNT, normal)),
    attr(STexel, F2, offset_of!(VertexPCNT, texel)),
];

impl ContentType {
    /// Bytes per element. Zero for `Custom`.
    pub const fn stride(self) -> usize {
        match self {
            ContentType::Custom => 0,
            ContentType::Vector2 => size_of::<[f32; 2]>(),
            ContentType::Vector3 => size_of::<[f32; 3]>(),
            ContentType::Color => size_of::<Color>(),
            ContentType::Matrix => size_of::<Mat4>(),
            ContentType::Index16 => size_of::<u16>(),
            ContentType::PC => size_of::<VertexPC>(),
            ContentType::PT => size_of::<VertexPT>(),
            ContentType::PN => size_of::<VertexPN>(),
            ContentType::PCT => size_of::<VertexPCT>(),
            ContentType::PNT => size_of::<VertexPNT>(),
            ContentType::PCN => size_of::<VertexPCN>(),
            ContentType::PCNT => size_of::<VertexPCNT>(),
        }
    }

    /// Attribute layout when bound as a vertex stream. `None` for content
    /// that cannot feed per-vertex attributes.
    pub fn vertex_layout(self) -> Option<&'static [VertexAttr]> {
        Some(match self {
            ContentType::Vector2 => LAYOUT_V2,
            ContentType::Vector3 => LAYOUT_V3,
            ContentType::PC => LAYOUT_PC,
            ContentType::PT => LAYOUT_PT,
            ContentType::PN => LAYOUT_PN,
            ContentType::PCT => LAYOUT_PCT,
            ContentType::PNT => LAYOUT_PNT,
            ContentType::PCN => LAYOUT_PCN,
            ContentType::PCNT => LAYOUT_PCNT,
            ContentType::Custom | ContentType::Color | ContentType::Matrix | ContentType::Index16 => {
                return None;
            }
        })
    }

    /// Where `slot` lives in this layout when bound as a single attribute.
    fn attribute_for(self, slot: AttributeSlot) -> Option<VertexAttr> {
        match self {
            ContentType::Color => Some(attr(slot, F4, 0)),
            ContentType::Matrix => Some(attr(slot, AttributeFormat::Mat4, 0)),
            ContentType::Vector2 => Some(attr(slot, F2, 0)),
            ContentType::Vector3 => Some(attr(slot, F3, 0)),
            _ => self
                .vertex_layout()
                .and_then(|l| l.iter().copied().find(|a| a.slot == slot)),
        }
    }

    fn has(self, slot: AttributeSlot) -> bool {
        self.vertex_layout()
            .is_some_and(|l| l.iter().any(|a| a.slot == slot))
    }
}

// ── buffer ────────────────────────────────────────────────────────────────

/// Where a render buffer's data lives.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum BufferKind {
    /// Client memory only; streamed through the frame scratch at bind/draw.
    Client,
    /// One GPU buffer, written rarely.
    #[default]
    Static,
    /// A ring of GPU buffers, rewritten every frame or so.
    Dynamic,
    /// Like `Dynamic`, hinted for write-once-draw-once data.
    Stream,
}

impl BufferKind {
    fn ring_slots(self) -> usize {
        match self {
            BufferKind::Client => 0,
            BufferKind::Static => 1,
            BufferKind::Dynamic | BufferKind::Stream => DYNAMIC_RING_SLOTS,
        }
    }

    fn usage(self) -> BufferUsage {
        match self {
            BufferKind::Client | BufferKind::Static => BufferUsage::Static,
            BufferKind::Dynamic => BufferUsage::Dynamic,
            BufferKind::Stream => BufferUsage::Stream,
        }
    }
}

#[derive(Debug, Default)]
struct RingSlot {
    buffer: Option<GpuBufferId>,
    /// Size of the slot's current GPU allocation.
    bytes: usize,
    /// Outstanding GPU reads of this slot.
    fence: Option<FenceId>,
    vao: Option<VertexArrayId>,
}

/// A vertex or index payload mirrored between a client byte array and,
/// for GPU kinds, a ring of GPU buffers.
///
/// The client array grows to the largest payload ever written and never
/// shrinks; `active_bytes` is the size of the latest write. GPU buffers are
/// created on first write, and must be returned with `release`.
#[derive(Debug)]
pub struct RenderBuffer {
    kind: BufferKind,
    content: ContentType,
    array: Vec<u8>,
    active_bytes: usize,
    slots: Vec<RingSlot>,
    current: usize,
}

impl RenderBuffer {
    pub fn new(kind: BufferKind) -> Self {
        let slots = (0..kind.ring_slots()).map(|_| RingSlot::default()).collect();
        Self {
            kind,
            content: ContentType::Custom,
            array: Vec::new(),
            active_bytes: 0,
            slots,
            // First write advances to slot 0.
            current: kind.ring_slots().saturating_sub(1),
        }
    }

    #[inline]
    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    #[inline]
    pub fn content(&self) -> ContentType {
        self.content
    }

    /// Bytes reserved in the client array. Never decreases.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.array.len()
    }

    #[inline]
    pub fn active_bytes(&self) -> usize {
        self.active_bytes
    }

    #[inline]
    pub fn is_index(&self) -> bool {
        self.content == ContentType::Index16
    }

    #[inline]
    pub fn is_gpu_backed(&self) -> bool {
        !self.slots.is_empty()
    }

    /// Ring slot written last, for GPU kinds.
    #[inline]
    pub fn current_slot(&self) -> Option<usize> {
        self.is_gpu_backed().then_some(self.current)
    }

    /// GPU buffer holding the latest write.
    pub fn gpu_buffer(&self) -> Option<GpuBufferId> {
        self.slots.get(self.current).and_then(|s| s.buffer)
    }

    #[inline]
    pub fn active_data(&self) -> &[u8] {
        &self.array[..self.active_bytes]
    }

    // ── writes ────────────────────────────────────────────────────────────

    /// Replaces the payload with `data`; the content type follows `V`.
    pub fn set_array<V: VertexData>(&mut self, api: &mut dyn GraphicsApi, data: &[V]) {
        self.write(api, bytemuck::cast_slice(data), V::CONTENT);
    }

    /// Replaces the payload with raw bytes of the given layout.
    pub fn set_bytes(&mut self, api: &mut dyn GraphicsApi, bytes: &[u8], content: ContentType) {
        self.write(api, bytes, content);
    }

    fn write(&mut self, api: &mut dyn GraphicsApi, bytes: &[u8], content: ContentType) {
        assert!(!bytes.is_empty(), "render buffer: zero-length write");

        if content != self.content {
            // Cached attribute layouts describe the old content.
            for slot in &mut self.slots {
                if let Some(vao) = slot.vao.take() {
                    api.delete_vertex_array(vao);
                }
            }
            self.content = content;
        }

        if self.is_gpu_backed() {
            self.upload(api, bytes);
        }

        self.active_bytes = bytes.len();
        if self.array.len() < bytes.len() {
            self.array.resize(bytes.len(), 0);
        }
        self.array[..bytes.len()].copy_from_slice(bytes);
    }

    fn upload(&mut self, api: &mut dyn GraphicsApi, bytes: &[u8]) {
        let target = if self.content == ContentType::Index16 {
            BufferTarget::Index
        } else {
            BufferTarget::Vertex
        };
        let usage = self.kind.usage();

        self.current = (self.current + 1) % self.slots.len();
        let slot = &mut self.slots[self.current];

        if let Some(fence) = slot.fence.take() {
            wait_for_reads(api, fence);
            api.delete_fence(fence);
        }

        let buffer = *slot.buffer.get_or_insert_with(|| api.create_buffer(target));

        if bytes.len() > slot.bytes {
            api.buffer_data(buffer, bytes, usage);
            slot.bytes = bytes.len();
        } else {
            // Fence already waited: the GPU is done with this slot.
            api.buffer_sub_data(buffer, 0, bytes);
        }

        slot.fence = Some(api.fence_sync());
    }

    // ── binding ───────────────────────────────────────────────────────────

    /// Points the per-vertex attributes at this buffer.
    ///
    /// GPU kinds record the layout once per ring slot in a vertex array and
    /// rebind it afterwards. Client buffers stream their data through
    /// `scratch` into the default attribute set.
    pub fn bind(&mut self, api: &mut dyn GraphicsApi, scratch: &mut FrameScratch) {
        let Some(layout) = self.content.vertex_layout() else {
            panic!("render buffer: cannot bind {:?} content as vertices", self.content);
        };
        assert!(self.active_bytes > 0, "render buffer: bind before first write");
        let stride = self.content.stride() as u32;

        if self.is_gpu_backed() {
            let slot = &mut self.slots[self.current];
            if let Some(vao) = slot.vao {
                api.bind_vertex_array(Some(vao));
                return;
            }
            let Some(buffer) = slot.buffer else {
                panic!("render buffer: ring slot {} has no GPU buffer", self.current);
            };
            let vao = api.create_vertex_array();
            slot.vao = Some(vao);
            api.bind_vertex_array(Some(vao));
            for a in layout {
                api.vertex_attrib(AttributeBinding {
                    slot: a.slot,
                    buffer,
                    offset: a.offset,
                    stride,
                    format: a.format,
                    step: StepMode::Vertex,
                });
            }
            return;
        }

        let (buffer, base) = scratch.push_vertices(api, &self.array[..self.active_bytes]);
        api.bind_vertex_array(None);
        for slot in AttributeSlot::PER_VERTEX {
            if !self.content.has(slot) {
                api.disable_attrib(slot);
            }
        }
        for a in layout {
            api.vertex_attrib(AttributeBinding {
                slot: a.slot,
                buffer,
                offset: base + a.offset,
                stride,
                format: a.format,
                step: StepMode::Vertex,
            });
        }
    }

    /// Undoes `bind`.
    pub fn unbind(&mut self, api: &mut dyn GraphicsApi) {
        assert!(
            self.content != ContentType::Custom,
            "render buffer: unbind of custom content"
        );
        api.bind_vertex_array(None);
        if !self.is_gpu_backed() {
            for slot in AttributeSlot::PER_VERTEX {
                api.disable_attrib(slot);
            }
        }
    }

    /// Binds one attribute of this buffer into the currently bound attribute
    /// set: a whole single-field buffer (positions, colors, matrices), or the
    /// matching field of a composite vertex.
    pub fn bind_as_attribute(
        &mut self,
        api: &mut dyn GraphicsApi,
        scratch: &mut FrameScratch,
        slot: AttributeSlot,
        step: StepMode,
    ) {
        let Some(a) = self.content.attribute_for(slot) else {
            panic!("render buffer: {:?} content has no {slot:?} attribute", self.content);
        };
        assert!(
            (slot == AttributeSlot::InstanceMatrix) == (a.format == AttributeFormat::Mat4),
            "render buffer: {slot:?} cannot be fed from {:?} content",
            self.content
        );
        assert!(self.active_bytes > 0, "render buffer: bind before first write");

        let (buffer, base) = match self.gpu_buffer() {
            Some(b) => (b, 0),
            None => scratch.push_vertices(api, &self.array[..self.active_bytes]),
        };
        api.vertex_attrib(AttributeBinding {
            slot,
            buffer,
            offset: base + a.offset,
            stride: self.content.stride() as u32,
            format: a.format,
            step,
        });
    }

    // ── draws (this buffer as indices) ────────────────────────────────────

    /// Issues an indexed draw using this buffer's 16-bit indices.
    pub fn draw_indexed(
        &mut self,
        api: &mut dyn GraphicsApi,
        scratch: &mut FrameScratch,
        primitive: Primitive,
        instances: u32,
    ) {
        assert!(
            self.is_index(),
            "render buffer: {:?} content drawn as an index buffer",
            self.content
        );
        let count = self.index_count() as u32;
        assert!(count > 0, "render buffer: draw before first write");

        match self.gpu_buffer() {
            Some(buffer) => api.draw_elements(primitive, buffer, 0, count, instances),
            None => {
                let (buffer, offset) = scratch.push_indices(api, &self.array[..self.active_bytes]);
                api.draw_elements(primitive, buffer, offset, count, instances);
            }
        }
    }

    pub fn tri_list(&mut self, api: &mut dyn GraphicsApi, scratch: &mut FrameScratch, instances: u32) {
        self.draw_indexed(api, scratch, Primitive::Triangles, instances);
    }

    pub fn tri_strip(&mut self, api: &mut dyn GraphicsApi, scratch: &mut FrameScratch, instances: u32) {
        self.draw_indexed(api, scratch, Primitive::TriangleStrip, instances);
    }

    pub fn tri_fan(&mut self, api: &mut dyn GraphicsApi, scratch: &mut FrameScratch, instances: u32) {
        self.draw_indexed(api, scratch, Primitive::TriangleFan, instances);
    }

    pub fn line_list(&mut self, api: &mut dyn GraphicsApi, scratch: &mut FrameScratch, instances: u32) {
        self.draw_indexed(api, scratch, Primitive::Lines, instances);
    }

    pub fn line_strip(&mut self, api: &mut dyn GraphicsApi, scratch: &mut FrameScratch, instances: u32) {
        self.draw_indexed(api, scratch, Primitive::LineStrip, instances);
    }

    // ── reads ─────────────────────────────────────────────────────────────

    /// Elements in the latest write (vertices, matrices, colors).
    ///
    /// Panics for index and custom content.
    pub fn position_count(&self) -> usize {
        assert!(
            !matches!(self.content, ContentType::Custom | ContentType::Index16),
            "render buffer: position count of {:?} content",
            self.content
        );
        self.active_bytes / self.content.stride()
    }

    pub fn index_count(&self) -> usize {
        assert!(self.is_index(), "render buffer: index count of {:?} content", self.content);
        self.active_bytes / size_of::<u16>()
    }

    pub fn index(&self, i: usize) -> u16 {
        assert!(i < self.index_count(), "render buffer: index {i} out of range");
        self.read(i * size_of::<u16>())
    }

    pub fn position(&self, i: usize) -> Vec3 {
        assert!(i < self.position_count(), "render buffer: position {i} out of range");
        let base = i * self.content.stride();
        match self.content {
            ContentType::Vector2 => Vec2::from_array(self.read(base)).extend(0.0),
            ContentType::Matrix => self.read::<Mat4>(base).w_axis.truncate(),
            ContentType::Color => panic!("render buffer: color content has no positions"),
            _ => Vec3::from_array(self.read(base)),
        }
    }

    /// Normal of vertex `i`; `Vec3::ONE` for layouts without normals.
    pub fn normal(&self, i: usize) -> Vec3 {
        assert!(i < self.position_count(), "render buffer: normal {i} out of range");
        self.field(i, AttributeSlot::Normal)
            .map(|off| Vec3::from_array(self.read(off)))
            .unwrap_or(Vec3::ONE)
    }

    /// Texel of vertex `i`; zero for layouts without texels.
    pub fn texel(&self, i: usize) -> Vec2 {
        assert!(i < self.position_count(), "render buffer: texel {i} out of range");
        self.field(i, AttributeSlot::Texel)
            .map(|off| Vec2::from_array(self.read(off)))
            .unwrap_or(Vec2::ZERO)
    }

    /// Color of element `i`; white for layouts without colors.
    pub fn color(&self, i: usize) -> Color {
        assert!(i < self.position_count(), "render buffer: color {i} out of range");
        if self.content == ContentType::Color {
            return self.read(i * self.content.stride());
        }
        self.field(i, AttributeSlot::Color)
            .map(|off| self.read(off))
            .unwrap_or(Color::WHITE)
    }

    /// Bounds of every position in the latest write.
    pub fn bounding_box(&self) -> Box3D {
        match self.content {
            ContentType::Custom | ContentType::Index16 | ContentType::Color => Box3D::EMPTY,
            _ => Box3D::from_points((0..self.position_count()).map(|i| self.position(i))),
        }
    }

    fn field(&self, i: usize, slot: AttributeSlot) -> Option<usize> {
        let layout = self.content.vertex_layout()?;
        let a = layout.iter().find(|a| a.slot == slot)?;
        Some(i * self.content.stride() + a.offset as usize)
    }

    #[inline]
    fn read<T: Pod>(&self, offset: usize) -> T {
        bytemuck::pod_read_unaligned(&self.array[offset..offset + size_of::<T>()])
    }

    // ── teardown ──────────────────────────────────────────────────────────

    /// Returns every GPU object to `api`. The client copy survives.
    pub fn release(&mut self, api: &mut dyn GraphicsApi) {
        for slot in &mut self.slots {
            if let Some(fence) = slot.fence.take() {
                api.delete_fence(fence);
            }
            if let Some(vao) = slot.vao.take() {
                api.delete_vertex_array(vao);
            }
            if let Some(buffer) = slot.buffer.take() {
                api.delete_buffer(buffer);
            }
            slot.bytes = 0;
        }
    }
}

/// Zero-timeout poll, then a bounded wait. A miss means the caller rewrote
/// the ring faster than the GPU retires frames.
fn wait_for_reads(api: &mut dyn GraphicsApi, fence: FenceId) {
    let status = match api.client_wait_fence(fence, Duration::ZERO) {
        FenceStatus::TimedOut => {
            log::debug!("render buffer: ring slot still in flight; waiting on {fence:?}");
            api.client_wait_fence(fence, FENCE_WAIT_BUDGET)
        }
        other => other,
    };
    match status {
        FenceStatus::Signaled => {}
        FenceStatus::TimedOut => panic!("render buffer: fence {fence:?} expired"),
        FenceStatus::Failed => panic!("render buffer: wait on fence {fence:?} failed"),
    }
}
