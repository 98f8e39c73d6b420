use glam::{Mat4, Vec3, Vec4};

use crate::config::{MAX_LIGHTS, MAX_TRANSFORM_DEPTH, RendererSettings, ScreenInfo};
use crate::coords::{Color, PixelRect, Transform2D};
use crate::device::{
    AttributeBinding, AttributeFormat, AttributeSlot, BlendMode, ClearTargets, CompareFunc,
    CullFace, GraphicsApi, Light, LightKind, Primitive, ReadbackId, ReadbackStatus, ShadeModel,
    StencilAction, StencilFunc, StencilOps, StepMode, TextureResourceId,
};
use crate::scene::{DisplayList, Op};
use crate::time::{FrameClock, FrameTime};

use super::material::{CullMode, DrawMode, MaterialHandle, StencilMode};
use super::resources::{BufferHandle, Resources};
use super::scheme::{BASE_LINE_WIDTH, RenderScheme, make_scheme};
use super::scratch::FrameScratch;
use super::state::{BoolState, RenderStateCache};

/// Visible height of the camera every display list starts with.
const DEFAULT_CAMERA_SCALE: f32 = 1000.0;

/// Depth range of the 2D orthographic camera.
const ORTHO_DEPTH: f32 = 1000.0;

/// Screen height at which lines are drawn at the base width.
const LINE_WIDTH_BASE_HEIGHT: f32 = 384.0;

/// Where the renderer is within a frame.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum RenderPhase {
    #[default]
    Idle,
    /// Targets cleared, ready for display lists.
    PreRender,
    /// At least one display list has run this frame.
    Executing,
    /// Presenting.
    PostRender,
}

/// Counters for the frame in progress (or the last one, after `post_render`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameStats {
    pub ops: u64,
    pub draw_calls: u64,
    pub material_changes: u64,
    pub state_calls: u64,
    pub scratch_bytes: usize,
    pub scratch_orphans: usize,
    pub frame: Option<FrameTime>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct TextureBinding {
    resource: TextureResourceId,
    clamp_u: bool,
    clamp_v: bool,
}

/// What the device has bound for texturing, as far as the renderer knows.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum BoundTexture {
    Unknown,
    Disabled,
    Bound(TextureBinding),
}

/// Display-list interpreter.
///
/// Owns the graphics api, the state cache and the frame scratch allocator.
/// A frame is `pre_render`, any number of `render_display_list`, then
/// `post_render`. Calls out of that order panic.
///
/// The model-view stack has `MAX_TRANSFORM_DEPTH` levels above the root.
/// Level 0 holds the camera view; translations pushed at level 0 are made
/// relative to the 3D camera position so large world coordinates keep their
/// precision.
#[derive(Debug)]
pub struct Renderer<A: GraphicsApi> {
    api: A,
    settings: RendererSettings,
    screen: ScreenInfo,
    scheme: Box<dyn RenderScheme>,
    state: RenderStateCache,
    scratch: FrameScratch,
    phase: RenderPhase,
    clock: FrameClock,
    stats: FrameStats,

    projection: Mat4,
    stack: Vec<Mat4>,
    level: usize,
    model_view_dirty: bool,
    camera_position: Vec3,

    current_material: Option<MaterialHandle>,
    bound_texture: BoundTexture,
    instances: u32,
    light_count: usize,
    warned_light_limit: bool,

    screenshot: Option<ReadbackId>,
}

impl<A: GraphicsApi> Renderer<A> {
    pub fn new(api: A, settings: RendererSettings, screen: ScreenInfo) -> Self {
        let scheme = make_scheme(settings.scheme);
        log::info!(
            "renderer: {} scheme, {}x{} ({:?})",
            scheme.name(),
            screen.width,
            screen.height,
            screen.orientation
        );
        Self {
            api,
            settings,
            screen,
            scheme,
            state: RenderStateCache::new(),
            scratch: FrameScratch::new(),
            phase: RenderPhase::Idle,
            clock: FrameClock::new(),
            stats: FrameStats::default(),
            projection: Mat4::IDENTITY,
            stack: vec![Mat4::IDENTITY; MAX_TRANSFORM_DEPTH + 1],
            level: 0,
            model_view_dirty: true,
            camera_position: Vec3::ZERO,
            current_material: None,
            bound_texture: BoundTexture::Unknown,
            instances: 1,
            light_count: 0,
            warned_light_limit: false,
            screenshot: None,
        }
    }

    #[inline]
    pub fn api(&self) -> &A {
        &self.api
    }

    #[inline]
    pub fn api_mut(&mut self) -> &mut A {
        &mut self.api
    }

    #[inline]
    pub fn settings(&self) -> &RendererSettings {
        &self.settings
    }

    #[inline]
    pub fn screen(&self) -> &ScreenInfo {
        &self.screen
    }

    #[inline]
    pub fn phase(&self) -> RenderPhase {
        self.phase
    }

    #[inline]
    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }

    #[inline]
    pub fn scheme_name(&self) -> &'static str {
        self.scheme.name()
    }

    /// Width over height used by the cameras.
    pub fn aspect_ratio(&self) -> f32 {
        if self.settings.use_custom_aspect_ratio {
            self.settings.aspect_ratio
        } else {
            self.screen.aspect_ratio()
        }
    }

    // ── frame ─────────────────────────────────────────────────────────────

    /// Starts a frame: resets per-frame caches, clears every target and
    /// establishes the full-screen viewport.
    pub fn pre_render(&mut self) {
        assert_eq!(
            self.phase,
            RenderPhase::Idle,
            "renderer: pre_render during {:?}",
            self.phase
        );
        self.clock.begin();
        self.scratch.reset();
        self.stats = FrameStats::default();

        self.api.set_viewport(self.full_viewport());
        self.state.set(BoolState::DepthMask, true);
        self.current_material = None;
        self.bound_texture = BoundTexture::Unknown;

        self.scheme.pre_render(&mut self.api, &self.settings);

        self.api.set_color_mask(self.settings.write_color);
        self.state.set(BoolState::StencilTest, true);
        self.flush_state();
        self.api.clear(ClearTargets::all(self.settings.clear_color));

        let line_width = BASE_LINE_WIDTH.max(self.screen.height as f32 / LINE_WIDTH_BASE_HEIGHT);
        self.api.set_line_width(line_width);
        self.state.set(BoolState::LineSmooth, true);

        self.phase = RenderPhase::PreRender;
    }

    /// Runs `list` to exhaustion under a default 2D camera.
    pub fn render_display_list(&mut self, list: &mut DisplayList, res: &mut Resources) {
        assert!(
            matches!(self.phase, RenderPhase::PreRender | RenderPhase::Executing),
            "renderer: display list submitted during {:?}",
            self.phase
        );
        self.phase = RenderPhase::Executing;

        self.set_camera_transform(&Transform2D {
            scale: glam::Vec2::splat(DEFAULT_CAMERA_SCALE),
            ..Transform2D::IDENTITY
        });
        self.stack[0] = Mat4::IDENTITY;
        self.model_view_dirty = true;
        self.api.set_color(Color::WHITE);

        self.raw_render_display_list(list, res);
    }

    /// Runs `list` with whatever camera and state the previous list left.
    pub fn raw_render_display_list(&mut self, list: &mut DisplayList, res: &mut Resources) {
        self.camera_position = Vec3::ZERO;
        self.current_material = None;
        self.level = 0;
        self.instances = 1;
        self.light_count = 0;

        let mut ops = 0u64;
        for op in list.pop_ops() {
            self.execute(op, res);
            ops += 1;
        }
        self.stats.ops += ops;

        assert_eq!(
            self.level, 0,
            "renderer: transform stack imbalance at end of display list ({} unpopped)",
            self.level
        );
    }

    /// Ends the frame and presents. Returns the frame's statistics.
    pub fn post_render(&mut self) -> FrameStats {
        assert!(
            matches!(self.phase, RenderPhase::PreRender | RenderPhase::Executing),
            "renderer: post_render during {:?}",
            self.phase
        );
        self.phase = RenderPhase::PostRender;

        self.scheme.post_render(&mut self.api);
        self.api.present();

        let scratch = self.scratch.stats();
        self.stats.scratch_bytes = scratch.bytes;
        self.stats.scratch_orphans = scratch.orphans;
        self.stats.frame = Some(self.clock.end());

        self.phase = RenderPhase::Idle;
        self.stats.clone()
    }

    pub fn resize(&mut self, screen: ScreenInfo) {
        log::info!(
            "renderer: resized to {}x{} ({:?})",
            screen.width,
            screen.height,
            screen.orientation
        );
        self.screen = screen;
        self.scheme.resize(&mut self.api, &screen);
    }

    /// Asks for a copy of the last presented frame.
    pub fn request_screenshot(&mut self) {
        if let Some(old) = self.screenshot.replace(self.api.request_readback()) {
            log::debug!("renderer: screenshot {old:?} superseded");
        }
    }

    /// `None` when no screenshot was requested. A ready or failed result
    /// is handed out once.
    pub fn poll_screenshot(&mut self) -> Option<ReadbackStatus> {
        let id = self.screenshot?;
        let status = self.api.poll_readback(id);
        if status != ReadbackStatus::Pending {
            self.screenshot = None;
        }
        Some(status)
    }

    /// Returns the scratch streams to the api.
    pub fn release(&mut self) {
        self.scratch.release(&mut self.api);
    }

    // ── op dispatch ───────────────────────────────────────────────────────

    fn execute(&mut self, op: &Op, res: &mut Resources) {
        match op {
            Op::SetColor(c) => {
                self.api.set_color(*c);
                self.current_material = None;
            }
            Op::SetSpecularColor(c) => {
                self.api.set_specular(*c);
                self.current_material = None;
            }
            Op::SetMaterial(m) => self.apply_material(*m, res),
            Op::SetTexture(t) => {
                match t {
                    Some(t) => {
                        let binding = TextureBinding {
                            resource: res.textures().get(*t).resource,
                            clamp_u: false,
                            clamp_v: false,
                        };
                        if self.bound_texture != BoundTexture::Bound(binding) {
                            self.bind_texture(Some(binding));
                        }
                    }
                    None => self.bind_texture(None),
                }
                self.current_material = None;
            }

            Op::PushTransform(t) => {
                let v = self.camera_relative(t.position.extend(0.0));
                let local = Mat4::from_translation(v)
                    * Mat4::from_rotation_z(t.angle)
                    * Mat4::from_scale(t.scale.extend(1.0));
                self.push(self.top() * local);
            }
            Op::PushTranslation(v) => {
                let v = self.camera_relative(*v);
                self.push(self.top() * Mat4::from_translation(v));
            }
            Op::PushMatrix(m) => {
                let mut m = *m;
                if self.level == 0 {
                    m.w_axis -= self.camera_position.extend(0.0);
                }
                self.push(self.top() * m);
            }
            Op::SetMatrix(m) => {
                let mut m = *m;
                m.w_axis -= self.camera_position.extend(0.0);
                self.push(self.stack[0] * m);
            }
            Op::PopTransform => {
                assert!(self.level > 0, "renderer: transform stack underflow");
                self.level -= 1;
                self.model_view_dirty = true;
            }

            Op::SetCameraTransform(t) => {
                self.camera_position = Vec3::ZERO;
                self.set_camera_transform(t);
            }
            Op::Set3DProjection { fov, near, far } => self.set_3d_projection(*fov, *near, *far),
            Op::SetProjectionMatrix(m) => {
                self.projection = *m;
                self.api.load_projection(&self.projection);
                self.set_top(self.oriented_3d_base());
            }
            Op::SetCameraProjection(m) => self.set_camera_projection(m),

            Op::VertexBuffer(b) => self.bind_loose(*b, AttributeSlot::Position, res),
            Op::NormalBuffer(b) => self.bind_loose(*b, AttributeSlot::Normal, res),
            Op::TexelBuffer(b) => self.bind_loose(*b, AttributeSlot::Texel, res),
            Op::ColorBuffer(b) => {
                self.bind_loose(*b, AttributeSlot::Color, res);
                self.current_material = None;
            }
            Op::ClearVertexArray => self.api.disable_attrib(AttributeSlot::Position),
            Op::ClearNormalArray => self.api.disable_attrib(AttributeSlot::Normal),
            Op::ClearTexelArray => self.api.disable_attrib(AttributeSlot::Texel),
            Op::ClearColorArray => self.api.disable_attrib(AttributeSlot::Color),
            Op::ClearArrays => {
                self.api.bind_vertex_array(None);
                for slot in AttributeSlot::PER_VERTEX {
                    self.api.disable_attrib(slot);
                }
            }
            Op::BindBuffer(b) => res.buffer_mut(*b).bind(&mut self.api, &mut self.scratch),
            Op::UnbindBuffer(b) => res.buffer_mut(*b).unbind(&mut self.api),

            Op::SetInstanceMatrices(b) => {
                let buffer = res.buffer_mut(*b);
                buffer.bind_as_attribute(
                    &mut self.api,
                    &mut self.scratch,
                    AttributeSlot::InstanceMatrix,
                    StepMode::Instance,
                );
                self.instances = buffer.position_count() as u32;
            }
            Op::SetInstanceColors(b) => res.buffer_mut(*b).bind_as_attribute(
                &mut self.api,
                &mut self.scratch,
                AttributeSlot::InstanceColor,
                StepMode::Instance,
            ),
            Op::ClearInstances => {
                for slot in AttributeSlot::PER_INSTANCE {
                    self.api.disable_attrib(slot);
                }
                self.instances = 1;
            }

            Op::TriangleListBuffer(ib) => self.draw_indexed(*ib, Primitive::Triangles, res),
            Op::TriangleStripBuffer(ib) => self.draw_indexed(*ib, Primitive::TriangleStrip, res),
            Op::TriangleFanBuffer(ib) => self.draw_indexed(*ib, Primitive::TriangleFan, res),
            Op::LineListBuffer(ib) => self.draw_indexed(*ib, Primitive::Lines, res),
            Op::LineStripBuffer(ib) => self.draw_indexed(*ib, Primitive::LineStrip, res),
            Op::DrawArrays { primitive, first, count } => {
                self.prepare_draw();
                self.api.draw_arrays(*primitive, *first, *count, self.instances);
                self.stats.draw_calls += 1;
            }
            Op::DrawPoint(p) => self.draw_point(*p),

            Op::Light(light) => self.add_light(light),
            Op::ClearLights => {
                for slot in 0..self.light_count {
                    self.api.set_light(slot, None);
                }
                self.light_count = 0;
            }
            Op::Fog(fog) => self.api.set_fog(Some(fog)),
            Op::ClearFog => self.api.set_fog(None),
            Op::FlatShading => self.api.set_shade_model(ShadeModel::Flat),
            Op::SmoothShading => self.api.set_shade_model(ShadeModel::Smooth),

            Op::EnableStencil => self.state.set_stencil_func(StencilFunc::MASKED),
            Op::DisableStencil => self.state.set_stencil_func(StencilFunc::ALWAYS),
            Op::ClearStencil => self.api.clear(ClearTargets::stencil(0)),
            Op::EnableScissor(rect) => {
                self.state.set(BoolState::ScissorTest, true);
                self.api
                    .set_scissor(rect.to_pixels(self.screen.width, self.screen.height));
            }
            Op::DisableScissor => self.state.set(BoolState::ScissorTest, false),
            Op::SetViewport(rect) => self
                .api
                .set_viewport(rect.to_pixels(self.screen.width, self.screen.height)),
            Op::ClearViewport => self.api.set_viewport(self.full_viewport()),

            Op::Debug(message) => log::debug!("display list: {message}"),
        }
    }

    // ── materials & textures ──────────────────────────────────────────────

    fn apply_material(&mut self, handle: MaterialHandle, res: &Resources) {
        if self.current_material == Some(handle) {
            return;
        }
        let m = res.material(handle);
        self.scheme.set_material(&mut self.api, m);
        self.current_material = Some(handle);
        self.stats.material_changes += 1;

        let texture = m.texture.map(|t| TextureBinding {
            resource: res.textures().get(t).resource,
            clamp_u: m.clamp_u,
            clamp_v: m.clamp_v,
        });
        if self.bound_texture != texture.map_or(BoundTexture::Disabled, BoundTexture::Bound) {
            self.bind_texture(texture);
        }

        let s = &mut self.state;
        if m.alpha_test {
            s.set_alpha_threshold(m.alpha_ref);
        }
        if m.z_read {
            s.set_depth_func(CompareFunc::LessEqual);
        }
        if m.has_depth_bias() {
            s.set(BoolState::PolygonOffsetFill, true);
            s.set_polygon_offset(
                m.depth_bias_factor,
                m.depth_bias_constant + self.settings.polygon_offset_units,
            );
        } else {
            s.set(BoolState::PolygonOffsetFill, false);
        }

        s.set(BoolState::AlphaTest, m.alpha_test);
        s.set(BoolState::DepthTest, m.z_read);
        s.set(BoolState::DepthMask, m.z_write && self.settings.write_depth);
        s.set(BoolState::Fog, m.fog);

        match m.cull {
            CullMode::None => s.set(BoolState::CullFace, false),
            cull => {
                s.set(BoolState::CullFace, true);
                let back = (cull == CullMode::Back) != self.settings.invert_cull;
                s.set_cull_face(if back { CullFace::Back } else { CullFace::Front });
            }
        }

        s.set_stencil_ops(match m.stencil {
            StencilMode::None => StencilOps::KEEP,
            StencilMode::One => StencilOps::all(StencilAction::Replace),
            StencilMode::Zero => StencilOps::on_pass(StencilAction::Zero),
            StencilMode::Increment => StencilOps::on_pass(StencilAction::Increment),
            StencilMode::Decrement => StencilOps::on_pass(StencilAction::Decrement),
            StencilMode::Invert => StencilOps::on_pass(StencilAction::Invert),
        });

        s.set(BoolState::Blend, m.blend);
        let (blend, lit) = match m.draw_mode {
            DrawMode::Add => (BlendMode::ADDITIVE, false),
            DrawMode::Subtract => (BlendMode::SUBTRACTIVE, false),
            DrawMode::Normal => (BlendMode::ALPHA, false),
            DrawMode::Lit => (BlendMode::ALPHA, true),
        };
        s.set_blend(blend);
        s.set(BoolState::Lighting, lit);
        s.set(BoolState::ColorMaterial, lit);

        if m.has_color {
            self.api.set_color(m.color);
            if lit {
                self.api.set_specular(m.specular);
            }
        }

        self.flush_state();
    }

    fn bind_texture(&mut self, texture: Option<TextureBinding>) {
        match texture {
            Some(t) => {
                self.api.bind_texture(Some(t.resource), t.clamp_u, t.clamp_v);
                self.bound_texture = BoundTexture::Bound(t);
            }
            None => {
                self.api.bind_texture(None, false, false);
                self.bound_texture = BoundTexture::Disabled;
            }
        }
    }

    // ── transforms & cameras ──────────────────────────────────────────────

    #[inline]
    fn top(&self) -> Mat4 {
        self.stack[self.level]
    }

    fn set_top(&mut self, m: Mat4) {
        self.stack[self.level] = m;
        self.model_view_dirty = true;
    }

    fn push(&mut self, m: Mat4) {
        assert!(
            self.level < MAX_TRANSFORM_DEPTH,
            "renderer: transform stack overflow ({MAX_TRANSFORM_DEPTH} levels)"
        );
        self.level += 1;
        self.set_top(m);
    }

    #[inline]
    fn camera_relative(&self, v: Vec3) -> Vec3 {
        if self.level == 0 { v - self.camera_position } else { v }
    }

    /// 2D orthographic camera. `t.scale.x` is the visible height; +Y points
    /// down the screen.
    fn set_camera_transform(&mut self, t: &Transform2D) {
        let orientation = self.screen.orientation;
        let hh = t.scale.x * 0.5;
        let hw = self.aspect_ratio() * hh;
        let (x, y) = if orientation.is_sideways() { (hh, hw) } else { (hw, hh) };

        self.projection = Mat4::orthographic_rh_gl(-x, x, y, -y, -ORTHO_DEPTH, ORTHO_DEPTH);
        self.api.load_projection(&self.projection);

        let view = Mat4::from_rotation_z(orientation.degrees().to_radians())
            * Mat4::from_rotation_z(-t.angle)
            * Mat4::from_translation((-t.position).extend(0.0));
        self.set_top(view);

        self.state.set(BoolState::DepthTest, false);
        self.state.set(BoolState::CullFace, false);
    }

    fn set_3d_projection(&mut self, fov: f32, near: f32, far: f32) {
        let hh = (fov * 0.5).tan() * near;
        let hw = hh * self.aspect_ratio();
        let (x, y) = if self.screen.orientation.is_sideways() { (hh, hw) } else { (hw, hh) };

        self.projection = gl_frustum(-x, x, -y, y, near, far);
        self.api.load_projection(&self.projection);
        self.set_top(self.oriented_3d_base());

        self.state.set(BoolState::DepthTest, true);
        self.state.set(BoolState::DepthMask, true);
        self.state.set(BoolState::CullFace, true);
        self.state.set_cull_face(CullFace::Front);
    }

    /// Display rotation followed by the X mirror the 3D paths use.
    fn oriented_3d_base(&self) -> Mat4 {
        Mat4::from_rotation_z(self.screen.orientation.mirrored_degrees().to_radians())
            * Mat4::from_scale(Vec3::new(-1.0, 1.0, 1.0))
    }

    /// Orients the view along `m`'s basis. The eye position is applied by
    /// camera-relative pushes rather than by the view matrix.
    fn set_camera_projection(&mut self, m: &Mat4) {
        self.camera_position = m.w_axis.truncate();
        let forward = m.z_axis.truncate();
        let up = m.y_axis.truncate();
        let side = forward.cross(up);
        let view = Mat4::from_cols(
            Vec4::new(side.x, up.x, -forward.x, 0.0),
            Vec4::new(side.y, up.y, -forward.y, 0.0),
            Vec4::new(side.z, up.z, -forward.z, 0.0),
            Vec4::W,
        );
        self.set_top(self.top() * view);
    }

    // ── vertex sources & draws ────────────────────────────────────────────

    /// Single-attribute binds go to the default attribute set.
    fn bind_loose(&mut self, b: BufferHandle, slot: AttributeSlot, res: &mut Resources) {
        self.api.bind_vertex_array(None);
        res.buffer_mut(b)
            .bind_as_attribute(&mut self.api, &mut self.scratch, slot, StepMode::Vertex);
    }

    fn prepare_draw(&mut self) {
        self.flush_state();
        if self.model_view_dirty {
            let top = self.top();
            self.api.load_model_view(&top);
            self.model_view_dirty = false;
        }
    }

    fn draw_indexed(&mut self, ib: BufferHandle, primitive: Primitive, res: &mut Resources) {
        self.prepare_draw();
        res.buffer_mut(ib)
            .draw_indexed(&mut self.api, &mut self.scratch, primitive, self.instances);
        self.stats.draw_calls += 1;
    }

    /// Streams one position through the scratch allocator. Replaces the
    /// default attribute set's position binding.
    fn draw_point(&mut self, p: Vec3) {
        self.prepare_draw();
        let (buffer, offset) = self
            .scratch
            .push_vertices(&mut self.api, bytemuck::bytes_of(&p));
        self.api.bind_vertex_array(None);
        self.api.vertex_attrib(AttributeBinding {
            slot: AttributeSlot::Position,
            buffer,
            offset,
            stride: AttributeFormat::Float32x3.size() as u32,
            format: AttributeFormat::Float32x3,
            step: StepMode::Vertex,
        });
        self.api.draw_arrays(Primitive::Points, 0, 1, 1);
        self.stats.draw_calls += 1;
    }

    // ── lighting ──────────────────────────────────────────────────────────

    fn add_light(&mut self, light: &Light) {
        if self.light_count >= MAX_LIGHTS {
            if !self.warned_light_limit {
                self.warned_light_limit = true;
                log::warn!("renderer: more than {MAX_LIGHTS} lights in one list; extras ignored");
            }
            return;
        }

        let eye = self.top();
        let mut l = *light;
        match l.kind {
            LightKind::Ambient => {}
            LightKind::Point => l.position = eye.transform_point3(self.camera_relative(l.position)),
            LightKind::Directional => l.direction = eye.transform_vector3(l.direction),
        }
        self.api.set_light(self.light_count, Some(&l));
        self.light_count += 1;
    }

    // ── helpers ───────────────────────────────────────────────────────────

    fn flush_state(&mut self) {
        let n = self.state.flush(&mut self.api);
        self.stats.state_calls += n as u64;
    }

    fn full_viewport(&self) -> PixelRect {
        PixelRect::sized(self.screen.width, self.screen.height)
    }
}

/// `glFrustum`: perspective projection onto the near-plane box, GL clip depth.
fn gl_frustum(left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32) -> Mat4 {
    let w = right - left;
    let h = top - bottom;
    let d = far - near;
    Mat4::from_cols(
        Vec4::new(2.0 * near / w, 0.0, 0.0, 0.0),
        Vec4::new(0.0, 2.0 * near / h, 0.0, 0.0),
        Vec4::new((right + left) / w, (top + bottom) / h, -(far + near) / d, -1.0),
        Vec4::new(0.0, 0.0, -2.0 * far * near / d, 0.0),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Orientation, SchemeKind};
    use crate::coords::Rect;
    use crate::device::{ApiCall, Capability, RecordingApi, RgbaImage};
    use crate::render::buffer::{BufferKind, VertexPCNT};
    use crate::render::material::Material;

    fn renderer() -> Renderer<RecordingApi> {
        Renderer::new(RecordingApi::new(), RendererSettings::default(), ScreenInfo::default())
    }

    fn quad(res: &mut Resources, api: &mut RecordingApi) -> (BufferHandle, BufferHandle) {
        let vb = res.create_buffer(BufferKind::Static);
        res.buffer_mut(vb).set_array(api, &[VertexPCNT::default(); 4]);
        let ib = res.create_buffer(BufferKind::Static);
        res.buffer_mut(ib).set_array(api, &[0u16, 1, 2, 0, 2, 3]);
        (vb, ib)
    }

    fn run(r: &mut Renderer<RecordingApi>, list: &mut DisplayList, res: &mut Resources) {
        r.pre_render();
        r.api_mut().clear_calls();
        r.render_display_list(list, res);
    }

    // ── frame phases ──────────────────────────────────────────────────────

    #[test]
    fn pre_render_clears_and_sizes_lines() {
        let mut r = Renderer::new(
            RecordingApi::new(),
            RendererSettings::default(),
            ScreenInfo::new(1920, 1080),
        );
        r.pre_render();
        let calls = r.api().calls();
        assert!(calls.contains(&ApiCall::SetViewport(PixelRect::sized(1920, 1080))));
        assert!(calls.contains(&ApiCall::Clear(ClearTargets::all(Color::CLEAR))));
        assert_eq!(calls.last(), Some(&ApiCall::SetLineWidth(1080.0 / 384.0)));
        assert_eq!(r.phase(), RenderPhase::PreRender);
    }

    #[test]
    fn small_screens_keep_base_line_width() {
        let mut r = renderer();
        r.pre_render();
        assert_eq!(r.api().calls().last(), Some(&ApiCall::SetLineWidth(BASE_LINE_WIDTH)));
    }

    #[test]
    #[should_panic(expected = "submitted during Idle")]
    fn display_list_outside_frame_is_fatal() {
        let mut r = renderer();
        r.render_display_list(&mut DisplayList::new(), &mut Resources::new());
    }

    #[test]
    fn post_render_presents_and_returns_to_idle() {
        let mut r = renderer();
        r.pre_render();
        r.render_display_list(&mut DisplayList::new(), &mut Resources::new());
        let stats = r.post_render();
        assert_eq!(r.phase(), RenderPhase::Idle);
        assert_eq!(r.api().calls().last(), Some(&ApiCall::Present));
        assert!(stats.frame.is_some());
    }

    // ── transform stack ───────────────────────────────────────────────────

    #[test]
    fn balanced_list_runs() {
        let mut r = renderer();
        let mut res = Resources::new();
        let mut list = DisplayList::new();
        list.push_translation(Vec3::X);
        list.push_transform(Transform2D::IDENTITY);
        list.pop_transform();
        list.set_matrix(Mat4::IDENTITY);
        list.pop_transform();
        list.pop_transform();
        run(&mut r, &mut list, &mut res);
        assert_eq!(r.stats().ops, 6);
    }

    #[test]
    #[should_panic(expected = "underflow")]
    fn extra_pop_is_fatal() {
        let mut r = renderer();
        let mut list = DisplayList::new();
        list.push_translation(Vec3::X);
        list.pop_transform();
        list.pop_transform();
        run(&mut r, &mut list, &mut Resources::new());
    }

    #[test]
    #[should_panic(expected = "imbalance")]
    fn missing_pop_is_fatal() {
        let mut r = renderer();
        let mut list = DisplayList::new();
        list.push_translation(Vec3::X);
        run(&mut r, &mut list, &mut Resources::new());
    }

    #[test]
    #[should_panic(expected = "overflow")]
    fn stack_depth_is_bounded() {
        let mut r = renderer();
        let mut list = DisplayList::new();
        for _ in 0..=MAX_TRANSFORM_DEPTH {
            list.push_translation(Vec3::X);
        }
        run(&mut r, &mut list, &mut Resources::new());
    }

    #[test]
    fn level_zero_translation_is_camera_relative() {
        let mut api = RecordingApi::new();
        let mut res = Resources::new();
        let (vb, ib) = quad(&mut res, &mut api);
        let mut r = Renderer::new(api, RendererSettings::default(), ScreenInfo::default());

        let camera = Mat4::from_translation(Vec3::new(10.0, 0.0, 0.0));
        let mut list = DisplayList::new();
        list.set_projection_matrix(Mat4::IDENTITY);
        list.set_camera_projection(camera);
        list.push_translation(Vec3::new(10.0, 0.0, 0.0));
        list.bind_buffer(vb);
        list.triangle_list_buffer(ib);
        list.pop_transform();
        run(&mut r, &mut list, &mut res);

        let mv = r
            .api()
            .calls()
            .iter()
            .rev()
            .find_map(|c| match c {
                ApiCall::LoadModelView(m) => Some(*m),
                _ => None,
            })
            .unwrap();
        assert_eq!(mv.w_axis, Vec4::W);
    }

    // ── materials ─────────────────────────────────────────────────────────

    #[test]
    fn repeated_material_applies_once() {
        let mut r = renderer();
        let mut res = Resources::new();
        let m = res.add_material(Material::new("a", DrawMode::Add, Color::WHITE));
        let mut list = DisplayList::new();
        list.set_material(m);
        list.set_material(m);
        run(&mut r, &mut list, &mut res);
        assert_eq!(r.stats().material_changes, 1);
        assert!(r.api().calls().contains(&ApiCall::SetBlend(BlendMode::ADDITIVE)));
        assert!(
            !r.api()
                .calls()
                .contains(&ApiCall::SetEnabled(Capability::Lighting, true))
        );
    }

    #[test]
    fn explicit_color_invalidates_material() {
        let mut r = renderer();
        let mut res = Resources::new();
        let m = res.add_material(Material::default());
        let mut list = DisplayList::new();
        list.set_material(m);
        list.set_color(Color::BLACK);
        list.set_material(m);
        run(&mut r, &mut list, &mut res);
        assert_eq!(r.stats().material_changes, 2);
    }

    #[test]
    fn lit_material_sets_specular_and_lighting() {
        let mut r = renderer();
        let mut res = Resources::new();
        let mut mat = Material::solid("hull", Color::WHITE);
        mat.specular = Color::rgb(0.5, 0.5, 0.5);
        let m = res.add_material(mat);
        let mut list = DisplayList::new();
        list.set_material(m);
        run(&mut r, &mut list, &mut res);
        let calls = r.api().calls();
        assert!(calls.contains(&ApiCall::SetSpecular(Color::rgb(0.5, 0.5, 0.5))));
        assert!(calls.contains(&ApiCall::SetEnabled(Capability::Lighting, true)));
        assert!(calls.contains(&ApiCall::SetDepthFunc(CompareFunc::LessEqual)));
    }

    #[test]
    fn invert_cull_swaps_faces() {
        let settings = RendererSettings {
            invert_cull: true,
            ..RendererSettings::default()
        };
        let mut r = Renderer::new(RecordingApi::new(), settings, ScreenInfo::default());
        let mut res = Resources::new();
        let m = res.add_material(Material::default());
        let mut list = DisplayList::new();
        list.set_material(m);
        run(&mut r, &mut list, &mut res);
        assert!(r.api().calls().contains(&ApiCall::SetCullFace(CullFace::Front)));
    }

    #[test]
    fn stencil_one_replaces_everywhere() {
        let mut r = renderer();
        let mut res = Resources::new();
        let m = res.add_material(Material {
            stencil: StencilMode::One,
            ..Material::default()
        });
        let mut list = DisplayList::new();
        list.set_material(m);
        run(&mut r, &mut list, &mut res);
        assert!(
            r.api()
                .calls()
                .contains(&ApiCall::SetStencilOps(StencilOps::all(StencilAction::Replace)))
        );
    }

    #[test]
    fn depth_bias_adds_settings_units() {
        let settings = RendererSettings {
            polygon_offset_units: 1.0,
            ..RendererSettings::default()
        };
        let mut r = Renderer::new(RecordingApi::new(), settings, ScreenInfo::default());
        let mut res = Resources::new();
        let m = res.add_material(Material {
            depth_bias_constant: 2.0,
            depth_bias_factor: 0.5,
            ..Material::default()
        });
        let mut list = DisplayList::new();
        list.set_material(m);
        run(&mut r, &mut list, &mut res);
        let calls = r.api().calls();
        assert!(calls.contains(&ApiCall::SetPolygonOffset { factor: 0.5, units: 3.0 }));
        assert!(calls.contains(&ApiCall::SetEnabled(Capability::PolygonOffsetFill, true)));
    }

    #[test]
    fn shared_texture_resource_binds_once() {
        let mut r = renderer();
        let mut res = Resources::new();
        let a = res
            .textures_mut()
            .insert_image(r.api_mut(), "atlas", &RgbaImage::filled(2, 2, [0; 4]));
        let b = res.textures_mut().alias("atlas:ship", a);
        let mut list = DisplayList::new();
        list.set_texture(Some(a));
        list.set_texture(Some(b));
        list.set_texture(None);
        run(&mut r, &mut list, &mut res);
        let binds: Vec<_> = r
            .api()
            .calls()
            .iter()
            .filter(|c| matches!(c, ApiCall::BindTexture { .. }))
            .collect();
        assert_eq!(binds.len(), 2);
    }

    #[test]
    fn set_texture_drops_material_clamping() {
        let mut r = renderer();
        let mut res = Resources::new();
        let a = res
            .textures_mut()
            .insert_image(r.api_mut(), "atlas", &RgbaImage::filled(2, 2, [0; 4]));
        let resource = res.textures().get(a).resource;
        let mut mat = Material::new("clamped", DrawMode::Normal, Color::WHITE).with_texture(a);
        mat.clamp_u = true;
        mat.clamp_v = true;
        let m = res.add_material(mat);

        let mut list = DisplayList::new();
        list.set_material(m);
        list.set_texture(Some(a));
        run(&mut r, &mut list, &mut res);
        let binds: Vec<_> = r
            .api()
            .calls()
            .iter()
            .filter(|c| matches!(c, ApiCall::BindTexture { .. }))
            .collect();
        assert_eq!(
            binds,
            vec![
                &ApiCall::BindTexture { texture: Some(resource), clamp_u: true, clamp_v: true },
                &ApiCall::BindTexture { texture: Some(resource), clamp_u: false, clamp_v: false },
            ]
        );
    }

    // ── draws ─────────────────────────────────────────────────────────────

    #[test]
    fn indexed_draw_flushes_and_loads_model_view() {
        let mut api = RecordingApi::new();
        let mut res = Resources::new();
        let (vb, ib) = quad(&mut res, &mut api);
        let mut r = Renderer::new(api, RendererSettings::default(), ScreenInfo::default());
        let mut list = DisplayList::new();
        list.bind_buffer(vb);
        list.triangle_list_buffer(ib);
        list.clear_arrays();
        run(&mut r, &mut list, &mut res);

        let calls = r.api().calls();
        let draw = calls.iter().position(ApiCall::is_draw).unwrap();
        let mv = calls
            .iter()
            .position(|c| matches!(c, ApiCall::LoadModelView(_)))
            .unwrap();
        assert!(mv < draw);
        assert!(matches!(
            calls[draw],
            ApiCall::DrawElements { count: 6, instances: 1, .. }
        ));
        assert_eq!(r.stats().draw_calls, 1);
    }

    #[test]
    fn instance_matrices_set_instance_count() {
        let mut api = RecordingApi::new();
        let mut res = Resources::new();
        let (vb, ib) = quad(&mut res, &mut api);
        let mats = res.create_buffer(BufferKind::Dynamic);
        res.buffer_mut(mats).set_array(&mut api, &[Mat4::IDENTITY; 3]);
        let mut r = Renderer::new(api, RendererSettings::default(), ScreenInfo::default());

        let mut list = DisplayList::new();
        list.bind_buffer(vb);
        list.append_op(Op::SetInstanceMatrices(mats));
        list.triangle_list_buffer(ib);
        list.append_op(Op::ClearInstances);
        list.triangle_list_buffer(ib);
        run(&mut r, &mut list, &mut res);

        let instances: Vec<u32> = r
            .api()
            .draw_calls()
            .iter()
            .map(|c| match c {
                ApiCall::DrawElements { instances, .. } => *instances,
                _ => 0,
            })
            .collect();
        assert_eq!(instances, vec![3, 1]);
    }

    #[test]
    fn draw_point_streams_through_scratch() {
        let mut r = renderer();
        let mut list = DisplayList::new();
        list.append_op(Op::DrawPoint(Vec3::ONE));
        run(&mut r, &mut list, &mut Resources::new());
        assert!(r.api().calls().contains(&ApiCall::DrawArrays {
            primitive: Primitive::Points,
            first: 0,
            count: 1,
            instances: 1
        }));
        let stats = r.post_render();
        assert_eq!(stats.scratch_bytes, 12);
    }

    // ── lights, scissor, stencil ──────────────────────────────────────────

    #[test]
    fn lights_beyond_limit_are_dropped() {
        let mut r = renderer();
        let mut list = DisplayList::new();
        for _ in 0..(MAX_LIGHTS + 2) {
            list.light(Light::ambient(Color::WHITE));
        }
        list.append_op(Op::ClearLights);
        run(&mut r, &mut list, &mut Resources::new());
        let set = r.api().count(|c| matches!(c, ApiCall::SetLight(_, Some(_))));
        let cleared = r.api().count(|c| matches!(c, ApiCall::SetLight(_, None)));
        assert_eq!(set, MAX_LIGHTS);
        assert_eq!(cleared, MAX_LIGHTS);
    }

    #[test]
    fn directional_light_goes_to_eye_space() {
        let mut r = renderer();
        let mut list = DisplayList::new();
        list.set_projection_matrix(Mat4::IDENTITY);
        list.light(Light::directional(Vec3::X, Color::WHITE, Color::BLACK));
        run(&mut r, &mut list, &mut Resources::new());
        let dir = r
            .api()
            .calls()
            .iter()
            .find_map(|c| match c {
                ApiCall::SetLight(0, Some(l)) => Some(l.direction),
                _ => None,
            })
            .unwrap();
        // The 3D base mirrors X.
        assert_eq!(dir, Vec3::new(-1.0, 0.0, 0.0));
    }

    #[test]
    fn scissor_box_scales_to_pixels() {
        let mut r = renderer();
        let mut list = DisplayList::new();
        list.enable_scissor(Rect::from_xywh(0.5, 0.0, 0.5, 0.5));
        run(&mut r, &mut list, &mut Resources::new());
        assert!(
            r.api()
                .calls()
                .contains(&ApiCall::SetScissor(PixelRect::new(512, 0, 512, 384)))
        );
    }

    #[test]
    fn stencil_enable_masks_on_next_flush() {
        let mut r = renderer();
        let mut list = DisplayList::new();
        list.append_op(Op::EnableStencil);
        list.append_op(Op::DrawArrays { primitive: Primitive::Lines, first: 0, count: 2 });
        list.append_op(Op::ClearStencil);
        run(&mut r, &mut list, &mut Resources::new());
        let calls = r.api().calls();
        assert!(calls.contains(&ApiCall::SetStencilFunc(StencilFunc::MASKED)));
        assert_eq!(calls.last(), Some(&ApiCall::Clear(ClearTargets::stencil(0))));
    }

    // ── cameras ───────────────────────────────────────────────────────────

    #[test]
    fn sideways_orientation_swaps_ortho_extents() {
        let screen = ScreenInfo {
            orientation: Orientation::Three,
            ..ScreenInfo::new(200, 100)
        };
        let mut r = Renderer::new(RecordingApi::new(), RendererSettings::default(), screen);
        r.pre_render();
        r.api_mut().clear_calls();
        r.render_display_list(&mut DisplayList::new(), &mut Resources::new());
        let proj = r
            .api()
            .calls()
            .iter()
            .find_map(|c| match c {
                ApiCall::LoadProjection(m) => Some(*m),
                _ => None,
            })
            .unwrap();
        // Half extents: x = 500 (height/2), y = 1000 (aspect 2 * 500).
        assert!((proj.x_axis.x - 1.0 / 500.0).abs() < 1e-6);
        assert!((proj.y_axis.y + 1.0 / 1000.0).abs() < 1e-6);
    }

    #[test]
    fn perspective_projection_enables_depth() {
        let mut r = renderer();
        let mut list = DisplayList::new();
        list.set_3d_projection(std::f32::consts::FRAC_PI_2, 1.0, 100.0);
        list.append_op(Op::DrawArrays { primitive: Primitive::Triangles, first: 0, count: 3 });
        run(&mut r, &mut list, &mut Resources::new());
        let calls = r.api().calls();
        assert!(calls.contains(&ApiCall::SetEnabled(Capability::DepthTest, true)));
        assert!(calls.contains(&ApiCall::SetCullFace(CullFace::Front)));
    }

    #[test]
    fn shader_scheme_selects_programs() {
        let settings = RendererSettings {
            scheme: SchemeKind::Shader,
            ..RendererSettings::default()
        };
        let mut r = Renderer::new(RecordingApi::new(), settings, ScreenInfo::default());
        let mut res = Resources::new();
        let m = res.add_material(Material::solid("hull", Color::WHITE));
        let mut list = DisplayList::new();
        list.set_material(m);
        run(&mut r, &mut list, &mut res);
        assert_eq!(r.scheme_name(), "shader");
        assert!(r.api().calls().iter().any(|c| matches!(
            c,
            ApiCall::SelectProgram(Some(p)) if p.lit && !p.textured
        )));
    }

    // ── screenshots ───────────────────────────────────────────────────────

    #[test]
    fn screenshot_is_polled_until_ready() {
        let mut r = renderer();
        assert_eq!(r.poll_screenshot(), None);
        r.pre_render();
        r.post_render();
        r.request_screenshot();
        assert_eq!(r.poll_screenshot(), Some(ReadbackStatus::Pending));
        match r.poll_screenshot() {
            Some(ReadbackStatus::Ready(img)) => assert_eq!((img.width, img.height), (1024, 768)),
            other => panic!("expected a ready screenshot, got {other:?}"),
        }
        assert_eq!(r.poll_screenshot(), None);
    }
}
