use glam::{Mat4, Vec3};

use crate::coords::{Box3D, Color, Rect, Transform2D};
use crate::device::{Fog, Light, Primitive};
use crate::render::{BufferHandle, MaterialHandle, Resources, TextureHandle};

/// One display-list record.
///
/// Resource operands are handles into [`Resources`]; the list never owns
/// the resources it names.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    // ── color & material ──
    SetColor(Color),
    SetSpecularColor(Color),
    SetMaterial(MaterialHandle),
    /// `None` disables texturing.
    SetTexture(Option<TextureHandle>),

    // ── transform stack ──
    PushTransform(Transform2D),
    PushTranslation(Vec3),
    PushMatrix(Mat4),
    /// Pushes `m` relative to the world root rather than the current top.
    SetMatrix(Mat4),
    PopTransform,

    // ── camera ──
    SetCameraTransform(Transform2D),
    Set3DProjection { fov: f32, near: f32, far: f32 },
    SetProjectionMatrix(Mat4),
    /// Camera placement; translation column is the eye position.
    SetCameraProjection(Mat4),

    // ── vertex sources ──
    VertexBuffer(BufferHandle),
    NormalBuffer(BufferHandle),
    TexelBuffer(BufferHandle),
    ColorBuffer(BufferHandle),
    ClearVertexArray,
    ClearNormalArray,
    ClearTexelArray,
    ClearColorArray,
    ClearArrays,
    /// Binds every attribute of an interleaved buffer.
    BindBuffer(BufferHandle),
    UnbindBuffer(BufferHandle),

    // ── instancing ──
    SetInstanceMatrices(BufferHandle),
    SetInstanceColors(BufferHandle),
    ClearInstances,

    // ── draws ──
    TriangleListBuffer(BufferHandle),
    TriangleStripBuffer(BufferHandle),
    TriangleFanBuffer(BufferHandle),
    LineListBuffer(BufferHandle),
    LineStripBuffer(BufferHandle),
    DrawArrays { primitive: Primitive, first: u32, count: u32 },
    DrawPoint(Vec3),

    // ── lighting & shading ──
    Light(Light),
    ClearLights,
    Fog(Fog),
    ClearFog,
    FlatShading,
    SmoothShading,

    // ── stencil, scissor, viewport ──
    EnableStencil,
    DisableStencil,
    ClearStencil,
    /// Box in normalized viewport units, origin bottom-left.
    EnableScissor(Rect),
    DisableScissor,
    SetViewport(Rect),
    ClearViewport,

    Debug(String),
}

impl Op {
    /// Whether the op issues a draw call.
    pub fn is_draw(&self) -> bool {
        matches!(
            self,
            Op::TriangleListBuffer(_)
                | Op::TriangleStripBuffer(_)
                | Op::TriangleFanBuffer(_)
                | Op::LineListBuffer(_)
                | Op::LineStripBuffer(_)
                | Op::DrawArrays { .. }
                | Op::DrawPoint(_)
        )
    }

    /// Change in transform stack depth caused by the op.
    pub fn depth_delta(&self) -> i32 {
        match self {
            Op::PushTransform(_) | Op::PushTranslation(_) | Op::PushMatrix(_) | Op::SetMatrix(_) => 1,
            Op::PopTransform => -1,
            _ => 0,
        }
    }
}

/// Append-only op stream with a forward-only read cursor.
///
/// Producers append; the renderer drains with [`pop_ops`](Self::pop_ops).
/// Drained ops stay in place until [`clear`](Self::clear), so a list can be
/// consumed once per fill.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DisplayList {
    ops: Vec<Op>,
    cursor: usize,
}

impl DisplayList {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ops: Vec::with_capacity(capacity),
            cursor: 0,
        }
    }

    /// Empties the list and rewinds the cursor. Keeps capacity.
    pub fn clear(&mut self) {
        self.ops.clear();
        self.cursor = 0;
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    #[inline]
    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    /// Ops not yet popped.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.ops.len() - self.cursor
    }

    #[inline]
    pub fn append_op(&mut self, op: Op) {
        self.ops.push(op);
    }

    /// Copies every op of `other` onto the end of this list.
    pub fn append(&mut self, other: &DisplayList) {
        self.ops.extend_from_slice(&other.ops);
    }

    /// Next unread op, or `None` once exhausted.
    pub fn pop_op(&mut self) -> Option<&Op> {
        let op = self.ops.get(self.cursor)?;
        self.cursor += 1;
        Some(op)
    }

    /// Drains unread ops front to back.
    pub fn pop_ops(&mut self) -> PopOps<'_> {
        PopOps {
            ops: &self.ops,
            cursor: &mut self.cursor,
        }
    }

    /// Sum of push/pop deltas over the whole list.
    pub fn transform_balance(&self) -> i32 {
        self.ops.iter().map(Op::depth_delta).sum()
    }

    // ── builders ──────────────────────────────────────────────────────────

    pub fn set_color(&mut self, color: Color) {
        self.append_op(Op::SetColor(color));
    }

    pub fn set_specular_color(&mut self, color: Color) {
        self.append_op(Op::SetSpecularColor(color));
    }

    pub fn set_material(&mut self, material: MaterialHandle) {
        self.append_op(Op::SetMaterial(material));
    }

    pub fn set_texture(&mut self, texture: Option<TextureHandle>) {
        self.append_op(Op::SetTexture(texture));
    }

    pub fn push_transform(&mut self, t: Transform2D) {
        self.append_op(Op::PushTransform(t));
    }

    pub fn push_translation(&mut self, v: Vec3) {
        self.append_op(Op::PushTranslation(v));
    }

    pub fn push_matrix(&mut self, m: Mat4) {
        self.append_op(Op::PushMatrix(m));
    }

    pub fn set_matrix(&mut self, m: Mat4) {
        self.append_op(Op::SetMatrix(m));
    }

    pub fn pop_transform(&mut self) {
        self.append_op(Op::PopTransform);
    }

    pub fn set_camera_transform(&mut self, t: Transform2D) {
        self.append_op(Op::SetCameraTransform(t));
    }

    pub fn set_3d_projection(&mut self, fov: f32, near: f32, far: f32) {
        self.append_op(Op::Set3DProjection { fov, near, far });
    }

    pub fn set_projection_matrix(&mut self, m: Mat4) {
        self.append_op(Op::SetProjectionMatrix(m));
    }

    pub fn set_camera_projection(&mut self, m: Mat4) {
        self.append_op(Op::SetCameraProjection(m));
    }

    pub fn bind_buffer(&mut self, buffer: BufferHandle) {
        self.append_op(Op::BindBuffer(buffer));
    }

    pub fn unbind_buffer(&mut self, buffer: BufferHandle) {
        self.append_op(Op::UnbindBuffer(buffer));
    }

    pub fn vertex_buffer(&mut self, buffer: BufferHandle) {
        self.append_op(Op::VertexBuffer(buffer));
    }

    pub fn color_buffer(&mut self, buffer: BufferHandle) {
        self.append_op(Op::ColorBuffer(buffer));
    }

    pub fn clear_arrays(&mut self) {
        self.append_op(Op::ClearArrays);
    }

    pub fn triangle_list_buffer(&mut self, indices: BufferHandle) {
        self.append_op(Op::TriangleListBuffer(indices));
    }

    pub fn triangle_strip_buffer(&mut self, indices: BufferHandle) {
        self.append_op(Op::TriangleStripBuffer(indices));
    }

    pub fn line_list_buffer(&mut self, indices: BufferHandle) {
        self.append_op(Op::LineListBuffer(indices));
    }

    pub fn light(&mut self, light: Light) {
        self.append_op(Op::Light(light));
    }

    pub fn fog(&mut self, fog: Fog) {
        self.append_op(Op::Fog(fog));
    }

    pub fn enable_scissor(&mut self, rect: Rect) {
        self.append_op(Op::EnableScissor(rect));
    }

    pub fn set_viewport(&mut self, rect: Rect) {
        self.append_op(Op::SetViewport(rect));
    }

    pub fn debug(&mut self, message: impl Into<String>) {
        self.append_op(Op::Debug(message.into()));
    }

    // ── bounds ────────────────────────────────────────────────────────────

    /// Bounds of everything the list draws, in the list's root space.
    ///
    /// Follows the transform ops and the bound vertex source; camera ops are
    /// ignored. Draws without a readable vertex source contribute nothing.
    pub fn bounding_box(&self, res: &Resources) -> Box3D {
        let mut out = Box3D::EMPTY;
        let mut stack = vec![Mat4::IDENTITY];
        let mut vertices: Option<BufferHandle> = None;

        for op in &self.ops {
            let top = stack.last().copied().unwrap_or(Mat4::IDENTITY);
            match op {
                Op::PushTransform(t) => stack.push(top * t.matrix()),
                Op::PushTranslation(v) => stack.push(top * Mat4::from_translation(*v)),
                Op::PushMatrix(m) => stack.push(top * *m),
                Op::SetMatrix(m) => stack.push(*m),
                Op::PopTransform => {
                    if stack.len() > 1 {
                        stack.pop();
                    }
                }
                Op::VertexBuffer(b) | Op::BindBuffer(b) => vertices = Some(*b),
                Op::ClearVertexArray | Op::ClearArrays => vertices = None,
                Op::UnbindBuffer(b) if vertices == Some(*b) => vertices = None,
                Op::TriangleListBuffer(ib)
                | Op::TriangleStripBuffer(ib)
                | Op::TriangleFanBuffer(ib)
                | Op::LineListBuffer(ib)
                | Op::LineStripBuffer(ib) => {
                    let Some(vb) = vertices else { continue };
                    let vb = res.buffer(vb);
                    let ib = res.buffer(*ib);
                    let count = vb.position_count();
                    for i in 0..ib.index_count() {
                        let idx = ib.index(i) as usize;
                        if idx < count {
                            out.expand_to_point(top.transform_point3(vb.position(idx)));
                        }
                    }
                }
                Op::DrawArrays { first, count, .. } => {
                    let Some(vb) = vertices else { continue };
                    let vb = res.buffer(vb);
                    let end = (*first as usize + *count as usize).min(vb.position_count());
                    for i in (*first as usize)..end {
                        out.expand_to_point(top.transform_point3(vb.position(i)));
                    }
                }
                Op::DrawPoint(p) => out.expand_to_point(top.transform_point3(*p)),
                _ => {}
            }
        }
        out
    }
}

/// Forward-only drain over a display list's unread ops.
///
/// Each yielded op advances the list's cursor; dropping the iterator early
/// leaves the rest for a later `pop_op`.
pub struct PopOps<'a> {
    ops: &'a [Op],
    cursor: &'a mut usize,
}

impl<'a> Iterator for PopOps<'a> {
    type Item = &'a Op;

    fn next(&mut self) -> Option<&'a Op> {
        let op = self.ops.get(*self.cursor)?;
        *self.cursor += 1;
        Some(op)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.ops.len().saturating_sub(*self.cursor);
        (n, Some(n))
    }
}

impl ExactSizeIterator for PopOps<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::RecordingApi;
    use crate::render::BufferKind;

    #[test]
    fn pop_ops_is_single_pass() {
        let mut list = DisplayList::new();
        list.set_color(Color::WHITE);
        list.pop_transform();
        let n = list.pop_ops().count();
        assert_eq!(n, 2);
        assert_eq!(list.pop_ops().count(), 0);
        assert!(list.pop_op().is_none());
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn partial_drain_resumes() {
        let mut list = DisplayList::new();
        for _ in 0..3 {
            list.debug("x");
        }
        assert!(list.pop_ops().next().is_some());
        assert_eq!(list.remaining(), 2);
        assert_eq!(list.pop_ops().len(), 2);
    }

    #[test]
    fn clear_allows_reuse() {
        let mut list = DisplayList::new();
        list.debug("a");
        list.pop_ops().for_each(drop);
        list.clear();
        list.debug("b");
        assert_eq!(list.pop_op(), Some(&Op::Debug("b".into())));
    }

    #[test]
    fn append_copies_ops() {
        let mut a = DisplayList::new();
        a.push_translation(Vec3::X);
        let mut b = DisplayList::new();
        b.pop_transform();
        a.append(&b);
        assert_eq!(a.len(), 2);
        assert_eq!(a.transform_balance(), 0);
    }

    #[test]
    fn set_matrix_counts_as_push() {
        let mut list = DisplayList::new();
        list.set_matrix(Mat4::IDENTITY);
        list.push_matrix(Mat4::IDENTITY);
        list.pop_transform();
        assert_eq!(list.transform_balance(), 1);
    }

    #[test]
    fn bounding_box_follows_transforms() {
        let mut api = RecordingApi::new();
        let mut res = Resources::new();
        let vb = res.create_buffer(BufferKind::Client);
        res.buffer_mut(vb)
            .set_array(&mut api, &[Vec3::ZERO, Vec3::new(1.0, 1.0, 0.0), Vec3::new(0.0, 1.0, 0.0)]);
        let ib = res.create_buffer(BufferKind::Client);
        res.buffer_mut(ib).set_array(&mut api, &[0u16, 1, 2]);

        let mut list = DisplayList::new();
        list.push_translation(Vec3::new(10.0, 0.0, 0.0));
        list.vertex_buffer(vb);
        list.triangle_list_buffer(ib);
        list.pop_transform();
        list.append_op(Op::DrawPoint(Vec3::new(-5.0, 0.0, 0.0)));

        let bb = list.bounding_box(&res);
        assert_eq!(bb.min, Vec3::new(-5.0, 0.0, 0.0));
        assert_eq!(bb.max, Vec3::new(11.0, 1.0, 0.0));
    }
}
