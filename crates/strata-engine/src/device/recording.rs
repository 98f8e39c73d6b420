use std::collections::HashMap;
use std::time::Duration;

use glam::Mat4;

use crate::coords::{Color, PixelRect};

use super::api::*;

/// One call made against a `RecordingApi`.
///
/// Payloads are reduced to what assertions need: buffer writes record sizes,
/// not bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiCall {
    SetEnabled(Capability, bool),
    SetDepthMask(bool),
    SetDepthFunc(CompareFunc),
    SetCullFace(CullFace),
    SetAlphaThreshold(f32),
    SetPolygonOffset { factor: f32, units: f32 },
    SetBlend(BlendMode),
    SetStencilOps(StencilOps),
    SetStencilFunc(StencilFunc),
    SetShadeModel(ShadeModel),
    SetColorMask(bool),
    SetLineWidth(f32),
    SelectProgram(Option<ProgramSelection>),
    SetColor(Color),
    SetSpecular(Color),
    LoadProjection(Mat4),
    LoadModelView(Mat4),
    SetLight(usize, Option<Light>),
    SetFog(Option<Fog>),
    SetViewport(PixelRect),
    SetScissor(PixelRect),
    Clear(ClearTargets),
    CreateTexture(TextureResourceId),
    BindTexture { texture: Option<TextureResourceId>, clamp_u: bool, clamp_v: bool },
    DeleteTexture(TextureResourceId),
    CreateBuffer(GpuBufferId, BufferTarget),
    DeleteBuffer(GpuBufferId),
    BufferData { buffer: GpuBufferId, len: usize },
    BufferStorage { buffer: GpuBufferId, len: usize },
    BufferSubData { buffer: GpuBufferId, offset: u64, len: usize },
    FenceSync(FenceId),
    ClientWaitFence(FenceId, Duration),
    DeleteFence(FenceId),
    CreateVertexArray(VertexArrayId),
    DeleteVertexArray(VertexArrayId),
    BindVertexArray(Option<VertexArrayId>),
    VertexAttrib(AttributeBinding),
    DisableAttrib(AttributeSlot),
    DrawElements {
        primitive: Primitive,
        indices: GpuBufferId,
        byte_offset: u64,
        count: u32,
        instances: u32,
    },
    DrawArrays { primitive: Primitive, first: u32, count: u32, instances: u32 },
    Present,
    RequestReadback(ReadbackId),
}

impl ApiCall {
    #[inline]
    pub fn is_draw(&self) -> bool {
        matches!(self, ApiCall::DrawElements { .. } | ApiCall::DrawArrays { .. })
    }
}

/// In-memory `GraphicsApi` that logs every call.
///
/// Fences signal as soon as they are created unless the api was built with
/// `with_pending_fences`, in which case they stay pending until
/// `signal_fences` is called. Buffer sizes are tracked so tests can check
/// reallocation behavior.
#[derive(Debug, Default)]
pub struct RecordingApi {
    calls: Vec<ApiCall>,
    next_id: u32,
    fences_pending_by_default: bool,
    fences: HashMap<FenceId, bool>,
    buffer_sizes: HashMap<GpuBufferId, usize>,
    viewport: PixelRect,
    readbacks: HashMap<ReadbackId, u32>,
}

impl RecordingApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pending_fences() -> Self {
        Self {
            fences_pending_by_default: true,
            ..Self::default()
        }
    }

    #[inline]
    pub fn calls(&self) -> &[ApiCall] {
        &self.calls
    }

    pub fn take_calls(&mut self) -> Vec<ApiCall> {
        std::mem::take(&mut self.calls)
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    pub fn count(&self, pred: impl Fn(&ApiCall) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }

    pub fn draw_calls(&self) -> Vec<&ApiCall> {
        self.calls.iter().filter(|c| c.is_draw()).collect()
    }

    /// Marks every outstanding fence as signalled.
    pub fn signal_fences(&mut self) {
        for signalled in self.fences.values_mut() {
            *signalled = true;
        }
    }

    pub fn buffer_size(&self, buffer: GpuBufferId) -> Option<usize> {
        self.buffer_sizes.get(&buffer).copied()
    }

    pub fn live_fences(&self) -> usize {
        self.fences.len()
    }

    fn next(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    #[inline]
    fn record(&mut self, call: ApiCall) {
        self.calls.push(call);
    }
}

impl GraphicsApi for RecordingApi {
    fn set_enabled(&mut self, cap: Capability, enabled: bool) {
        self.record(ApiCall::SetEnabled(cap, enabled));
    }

    fn set_depth_mask(&mut self, write: bool) {
        self.record(ApiCall::SetDepthMask(write));
    }

    fn set_depth_func(&mut self, func: CompareFunc) {
        self.record(ApiCall::SetDepthFunc(func));
    }

    fn set_cull_face(&mut self, face: CullFace) {
        self.record(ApiCall::SetCullFace(face));
    }

    fn set_alpha_threshold(&mut self, threshold: f32) {
        self.record(ApiCall::SetAlphaThreshold(threshold));
    }

    fn set_polygon_offset(&mut self, factor: f32, units: f32) {
        self.record(ApiCall::SetPolygonOffset { factor, units });
    }

    fn set_blend(&mut self, mode: BlendMode) {
        self.record(ApiCall::SetBlend(mode));
    }

    fn set_stencil_ops(&mut self, ops: StencilOps) {
        self.record(ApiCall::SetStencilOps(ops));
    }

    fn set_stencil_func(&mut self, func: StencilFunc) {
        self.record(ApiCall::SetStencilFunc(func));
    }

    fn set_shade_model(&mut self, model: ShadeModel) {
        self.record(ApiCall::SetShadeModel(model));
    }

    fn set_color_mask(&mut self, write_color: bool) {
        self.record(ApiCall::SetColorMask(write_color));
    }

    fn set_line_width(&mut self, width: f32) {
        self.record(ApiCall::SetLineWidth(width));
    }

    fn select_program(&mut self, program: Option<ProgramSelection>) {
        self.record(ApiCall::SelectProgram(program));
    }

    fn set_color(&mut self, color: Color) {
        self.record(ApiCall::SetColor(color));
    }

    fn set_specular(&mut self, color: Color) {
        self.record(ApiCall::SetSpecular(color));
    }

    fn load_projection(&mut self, m: &Mat4) {
        self.record(ApiCall::LoadProjection(*m));
    }

    fn load_model_view(&mut self, m: &Mat4) {
        self.record(ApiCall::LoadModelView(*m));
    }

    fn set_light(&mut self, slot: usize, light: Option<&Light>) {
        self.record(ApiCall::SetLight(slot, light.copied()));
    }

    fn set_fog(&mut self, fog: Option<&Fog>) {
        self.record(ApiCall::SetFog(fog.copied()));
    }

    fn set_viewport(&mut self, rect: PixelRect) {
        self.viewport = rect;
        self.record(ApiCall::SetViewport(rect));
    }

    fn set_scissor(&mut self, rect: PixelRect) {
        self.record(ApiCall::SetScissor(rect));
    }

    fn clear(&mut self, targets: ClearTargets) {
        self.record(ApiCall::Clear(targets));
    }

    fn create_texture(&mut self, _image: &RgbaImage) -> TextureResourceId {
        let id = TextureResourceId(self.next());
        self.record(ApiCall::CreateTexture(id));
        id
    }

    fn bind_texture(&mut self, texture: Option<TextureResourceId>, clamp_u: bool, clamp_v: bool) {
        self.record(ApiCall::BindTexture { texture, clamp_u, clamp_v });
    }

    fn delete_texture(&mut self, texture: TextureResourceId) {
        self.record(ApiCall::DeleteTexture(texture));
    }

    fn create_buffer(&mut self, target: BufferTarget) -> GpuBufferId {
        let id = GpuBufferId(self.next());
        self.buffer_sizes.insert(id, 0);
        self.record(ApiCall::CreateBuffer(id, target));
        id
    }

    fn delete_buffer(&mut self, buffer: GpuBufferId) {
        self.buffer_sizes.remove(&buffer);
        self.record(ApiCall::DeleteBuffer(buffer));
    }

    fn buffer_data(&mut self, buffer: GpuBufferId, data: &[u8], _usage: BufferUsage) {
        self.buffer_sizes.insert(buffer, data.len());
        self.record(ApiCall::BufferData { buffer, len: data.len() });
    }

    fn buffer_storage(&mut self, buffer: GpuBufferId, size: usize, _usage: BufferUsage) {
        self.buffer_sizes.insert(buffer, size);
        self.record(ApiCall::BufferStorage { buffer, len: size });
    }

    fn buffer_sub_data(&mut self, buffer: GpuBufferId, offset: u64, data: &[u8]) {
        let size = self.buffer_sizes.get(&buffer).copied().unwrap_or(0);
        assert!(
            offset as usize + data.len() <= size,
            "sub-data write of {} bytes at {offset} overruns buffer {buffer:?} of {size} bytes",
            data.len()
        );
        self.record(ApiCall::BufferSubData { buffer, offset, len: data.len() });
    }

    fn fence_sync(&mut self) -> FenceId {
        let id = FenceId(self.next());
        self.fences.insert(id, !self.fences_pending_by_default);
        self.record(ApiCall::FenceSync(id));
        id
    }

    fn client_wait_fence(&mut self, fence: FenceId, timeout: Duration) -> FenceStatus {
        self.record(ApiCall::ClientWaitFence(fence, timeout));
        match self.fences.get(&fence) {
            Some(true) => FenceStatus::Signaled,
            Some(false) => FenceStatus::TimedOut,
            None => FenceStatus::Failed,
        }
    }

    fn delete_fence(&mut self, fence: FenceId) {
        self.fences.remove(&fence);
        self.record(ApiCall::DeleteFence(fence));
    }

    fn create_vertex_array(&mut self) -> VertexArrayId {
        let id = VertexArrayId(self.next());
        self.record(ApiCall::CreateVertexArray(id));
        id
    }

    fn delete_vertex_array(&mut self, vao: VertexArrayId) {
        self.record(ApiCall::DeleteVertexArray(vao));
    }

    fn bind_vertex_array(&mut self, vao: Option<VertexArrayId>) {
        self.record(ApiCall::BindVertexArray(vao));
    }

    fn vertex_attrib(&mut self, binding: AttributeBinding) {
        self.record(ApiCall::VertexAttrib(binding));
    }

    fn disable_attrib(&mut self, slot: AttributeSlot) {
        self.record(ApiCall::DisableAttrib(slot));
    }

    fn draw_elements(
        &mut self,
        primitive: Primitive,
        indices: GpuBufferId,
        byte_offset: u64,
        count: u32,
        instances: u32,
    ) {
        self.record(ApiCall::DrawElements {
            primitive,
            indices,
            byte_offset,
            count,
            instances,
        });
    }

    fn draw_arrays(&mut self, primitive: Primitive, first: u32, count: u32, instances: u32) {
        self.record(ApiCall::DrawArrays {
            primitive,
            first,
            count,
            instances,
        });
    }

    fn present(&mut self) {
        self.record(ApiCall::Present);
    }

    fn request_readback(&mut self) -> ReadbackId {
        let id = ReadbackId(self.next());
        self.readbacks.insert(id, 0);
        self.record(ApiCall::RequestReadback(id));
        id
    }

    /// Pending on the first poll, then a transparent image the size of the
    /// last viewport.
    fn poll_readback(&mut self, id: ReadbackId) -> ReadbackStatus {
        let Some(polls) = self.readbacks.get_mut(&id) else {
            return ReadbackStatus::Failed(format!("unknown readback {id:?}"));
        };
        *polls += 1;
        if *polls < 2 {
            return ReadbackStatus::Pending;
        }
        self.readbacks.remove(&id);
        ReadbackStatus::Ready(RgbaImage::filled(
            self.viewport.width,
            self.viewport.height,
            [0, 0, 0, 0],
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fences_signal_immediately_by_default() {
        let mut api = RecordingApi::new();
        let f = api.fence_sync();
        assert_eq!(api.client_wait_fence(f, Duration::ZERO), FenceStatus::Signaled);
    }

    #[test]
    fn pending_fences_wait_for_signal() {
        let mut api = RecordingApi::with_pending_fences();
        let f = api.fence_sync();
        assert_eq!(api.client_wait_fence(f, Duration::ZERO), FenceStatus::TimedOut);
        api.signal_fences();
        assert_eq!(api.client_wait_fence(f, Duration::ZERO), FenceStatus::Signaled);
        api.delete_fence(f);
        assert_eq!(api.client_wait_fence(f, Duration::ZERO), FenceStatus::Failed);
    }

    #[test]
    #[should_panic(expected = "overruns")]
    fn sub_data_past_allocation_panics() {
        let mut api = RecordingApi::new();
        let b = api.create_buffer(BufferTarget::Vertex);
        api.buffer_data(b, &[0u8; 8], BufferUsage::Static);
        api.buffer_sub_data(b, 4, &[0u8; 8]);
    }

    #[test]
    fn readback_is_pending_then_ready() {
        let mut api = RecordingApi::new();
        api.set_viewport(PixelRect::sized(4, 2));
        let id = api.request_readback();
        assert_eq!(api.poll_readback(id), ReadbackStatus::Pending);
        match api.poll_readback(id) {
            ReadbackStatus::Ready(img) => assert_eq!((img.width, img.height), (4, 2)),
            other => panic!("expected ready, got {other:?}"),
        }
    }
}
