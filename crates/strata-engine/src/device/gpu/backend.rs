use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::time::Duration;

use anyhow::{Context, Result};
use glam::Mat4;
use wgpu::util::DeviceExt;

use crate::config::MAX_LIGHTS;
use crate::coords::{Color, PixelRect};
use crate::device::*;

use super::init::DeviceInit;
use super::pipeline::{AttributeLayout, DEPTH_FORMAT, PipelineCache, PipelineKey};
use super::shader::{DrawState, DrawUniforms, SLOT_COUNT, slot_index};

const UNIFORM_SIZE: u64 = std::mem::size_of::<DrawUniforms>() as u64;

// ── bookkeeping ───────────────────────────────────────────────────────────

struct BufferEntry {
    target: BufferTarget,
    gpu: Option<wgpu::Buffer>,
    /// CPU copy of the contents. Feeds unaligned writes and fan conversion.
    shadow: Vec<u8>,
}

struct TextureEntry {
    _texture: wgpu::Texture,
    view: wgpu::TextureView,
}

#[derive(Debug, Copy, Clone, Default)]
struct AttributeSet {
    bindings: [Option<AttributeBinding>; SLOT_COUNT],
}

struct FenceEntry {
    signaled: Arc<AtomicBool>,
    submitted: bool,
}

struct Readback {
    buffer: wgpu::Buffer,
    width: u32,
    height: u32,
    padded_row: u32,
    bgra: bool,
    receiver: mpsc::Receiver<std::result::Result<(), wgpu::BufferAsyncError>>,
}

/// GL context state that survives between calls.
struct GlState {
    caps: HashSet<Capability>,
    depth_mask: bool,
    depth_func: CompareFunc,
    cull_face: CullFace,
    alpha_threshold: f32,
    polygon_offset: (f32, f32),
    blend: BlendMode,
    stencil_ops: StencilOps,
    stencil_func: StencilFunc,
    color_mask: bool,
    program: Option<ProgramSelection>,
    color: Color,
    specular: Color,
    projection: Mat4,
    model_view: Mat4,
    lights: [Option<Light>; MAX_LIGHTS],
    fog: Option<Fog>,
    viewport: PixelRect,
    scissor: PixelRect,
    texture: Option<(TextureResourceId, bool, bool)>,
}

impl GlState {
    fn new(width: u32, height: u32) -> Self {
        Self {
            caps: HashSet::new(),
            depth_mask: true,
            depth_func: CompareFunc::Less,
            cull_face: CullFace::Back,
            alpha_threshold: 0.0,
            polygon_offset: (0.0, 0.0),
            blend: BlendMode::ALPHA,
            stencil_ops: StencilOps::KEEP,
            stencil_func: StencilFunc::ALWAYS,
            color_mask: true,
            program: None,
            color: Color::WHITE,
            specular: Color::BLACK,
            projection: Mat4::IDENTITY,
            model_view: Mat4::IDENTITY,
            lights: [None; MAX_LIGHTS],
            fog: None,
            viewport: PixelRect::sized(width, height),
            scissor: PixelRect::sized(width, height),
            texture: None,
        }
    }

    #[inline]
    fn enabled(&self, cap: Capability) -> bool {
        self.caps.contains(&cap)
    }
}

/// Where a draw's vertices come from.
#[derive(Debug, Copy, Clone)]
enum DrawSource {
    Arrays { first: u32 },
    Elements { buffer: GpuBufferId, byte_offset: u64 },
}

struct DrawPacket {
    key: PipelineKey,
    vertex_buffers: Vec<(wgpu::Buffer, u64)>,
    index: Option<(wgpu::Buffer, wgpu::IndexFormat)>,
    range: Range<u32>,
    instances: u32,
    uniform_offset: u32,
    texture_group: wgpu::BindGroup,
    viewport: [u32; 4],
    scissor: Option<[u32; 4]>,
    stencil_reference: u32,
}

enum Packet {
    Clear(ClearTargets),
    Draw(DrawPacket),
}

// ── the backend ───────────────────────────────────────────────────────────

/// Headless wgpu implementation of `GraphicsApi`.
///
/// Renders into an offscreen color + depth/stencil target. Draw calls are
/// recorded as packets holding everything needed to encode them; `present`
/// (or any call that needs submitted work) encodes the packets into render
/// passes and submits them. A clear starts a new pass.
pub struct WgpuApi {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_info: wgpu::AdapterInfo,

    color_format: wgpu::TextureFormat,
    width: u32,
    height: u32,
    color_target: wgpu::Texture,
    color_view: wgpu::TextureView,
    depth_view: wgpu::TextureView,

    uniform_layout: wgpu::BindGroupLayout,
    texture_layout: wgpu::BindGroupLayout,
    pipelines: PipelineCache,
    /// Indexed by `clamp_u as usize * 2 + clamp_v as usize`.
    samplers: [wgpu::Sampler; 4],
    white_group: wgpu::BindGroup,
    texture_groups: HashMap<(u32, bool, bool), wgpu::BindGroup>,
    uniform_stride: u64,

    state: GlState,
    next_id: u32,
    buffers: HashMap<u32, BufferEntry>,
    textures: HashMap<u32, TextureEntry>,
    vertex_arrays: HashMap<u32, AttributeSet>,
    loose: AttributeSet,
    bound_vao: Option<VertexArrayId>,
    fences: HashMap<u32, FenceEntry>,
    readbacks: HashMap<u32, Readback>,

    packets: Vec<Packet>,
    uniforms: Vec<u8>,
    frames: u64,

    warned_line_width: bool,
    warned_flat_shading: bool,
    warned_no_position: bool,
    warned_missing_buffer: bool,
    warned_light_slot: bool,
}

impl std::fmt::Debug for WgpuApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuApi")
            .field("adapter", &self.adapter_info.name)
            .field("backend", &self.adapter_info.backend)
            .field("target", &(self.width, self.height))
            .field("pipelines", &self.pipelines.len())
            .field("frames", &self.frames)
            .finish_non_exhaustive()
    }
}

impl WgpuApi {
    /// Creates a headless device and its offscreen target.
    ///
    /// Adapter/device acquisition is asynchronous under wgpu.
    pub async fn new(init: DeviceInit) -> Result<Self> {
        anyhow::ensure!(init.width > 0 && init.height > 0, "offscreen target has zero size");
        anyhow::ensure!(
            readback_is_bgra(init.color_format).is_some(),
            "unsupported offscreen color format {:?}",
            init.color_format
        );

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let mut adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: init.power_preference,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await;
        if adapter.is_err() && init.allow_fallback_adapter {
            log::info!("gpu: no hardware adapter; trying a fallback adapter");
            adapter = instance
                .request_adapter(&wgpu::RequestAdapterOptions {
                    power_preference: init.power_preference,
                    compatible_surface: None,
                    force_fallback_adapter: true,
                })
                .await;
        }
        let adapter = adapter.context("failed to find a suitable GPU adapter")?;
        let adapter_info = adapter.get_info();

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("strata-engine device"),
                required_features: init.required_features,
                required_limits: init.required_limits,
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await
            .context("failed to create wgpu device/queue")?;

        log::info!(
            "gpu: {} ({:?}), offscreen {}x{} {:?}",
            adapter_info.name,
            adapter_info.backend,
            init.width,
            init.height,
            init.color_format
        );

        let (color_target, color_view, depth_view) =
            create_targets(&device, init.color_format, init.width, init.height);

        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("strata uniform bgl"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: wgpu::BufferSize::new(UNIFORM_SIZE),
                },
                count: None,
            }],
        });

        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("strata texture bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("strata pipeline layout"),
            bind_group_layouts: &[&uniform_layout, &texture_layout],
            immediate_size: 0,
        });

        let samplers = [
            create_sampler(&device, false, false),
            create_sampler(&device, false, true),
            create_sampler(&device, true, false),
            create_sampler(&device, true, true),
        ];

        let white = upload_texture(&device, &queue, &RgbaImage::filled(1, 1, [255; 4]));
        let white_group = texture_group(&device, &texture_layout, &white.view, &samplers[0]);

        let align = device.limits().min_uniform_buffer_offset_alignment as u64;
        let uniform_stride = UNIFORM_SIZE.div_ceil(align) * align;

        Ok(Self {
            device,
            queue,
            adapter_info,
            color_format: init.color_format,
            width: init.width,
            height: init.height,
            color_target,
            color_view,
            depth_view,
            uniform_layout,
            texture_layout,
            pipelines: PipelineCache::new(pipeline_layout),
            samplers,
            white_group,
            texture_groups: HashMap::new(),
            uniform_stride,
            state: GlState::new(init.width, init.height),
            next_id: 1,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            vertex_arrays: HashMap::new(),
            loose: AttributeSet::default(),
            bound_vao: None,
            fences: HashMap::new(),
            readbacks: HashMap::new(),
            packets: Vec::new(),
            uniforms: Vec::new(),
            frames: 0,
            warned_line_width: false,
            warned_flat_shading: false,
            warned_no_position: false,
            warned_missing_buffer: false,
            warned_light_slot: false,
        })
    }

    /// `new`, driven to completion on the calling thread.
    pub fn new_blocking(init: DeviceInit) -> Result<Self> {
        pollster::block_on(Self::new(init))
    }

    #[inline]
    pub fn adapter_info(&self) -> &wgpu::AdapterInfo {
        &self.adapter_info
    }

    #[inline]
    pub fn target_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[inline]
    pub fn frames_presented(&self) -> u64 {
        self.frames
    }

    #[inline]
    pub fn pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    /// Recreates the offscreen target. Pending work is submitted first.
    pub fn resize_target(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 || (width, height) == (self.width, self.height) {
            return;
        }
        self.flush();
        let (color, color_view, depth_view) =
            create_targets(&self.device, self.color_format, width, height);
        self.color_target = color;
        self.color_view = color_view;
        self.depth_view = depth_view;
        self.width = width;
        self.height = height;
        log::debug!("gpu: offscreen target resized to {width}x{height}");
    }

    #[inline]
    fn alloc_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn current_set(&self) -> AttributeSet {
        match self.bound_vao {
            Some(v) => self.vertex_arrays.get(&v.0).copied().unwrap_or(self.loose),
            None => self.loose,
        }
    }

    fn current_set_mut(&mut self) -> &mut AttributeSet {
        if let Some(v) = self.bound_vao
            && self.vertex_arrays.contains_key(&v.0)
        {
            return self.vertex_arrays.entry(v.0).or_default();
        }
        &mut self.loose
    }

    fn warn_missing_buffer(&mut self, what: &str) {
        if !self.warned_missing_buffer {
            self.warned_missing_buffer = true;
            log::warn!("gpu: draw references {what} with no storage; draw skipped");
        }
    }

    // ── draws ─────────────────────────────────────────────────────────────

    fn record_draw(&mut self, primitive: Primitive, source: DrawSource, count: u32, instances: u32) {
        if count == 0 || instances == 0 {
            return;
        }

        let set = self.current_set();
        if set.bindings[slot_index(AttributeSlot::Position)].is_none() {
            if !self.warned_no_position {
                self.warned_no_position = true;
                log::warn!("gpu: draw without a position attribute; skipped");
            }
            return;
        }

        let mut attributes = [None; SLOT_COUNT];
        let mut vertex_buffers = Vec::new();
        for (i, binding) in set.bindings.iter().enumerate() {
            let Some(b) = binding else { continue };
            let Some(buffer) = self.buffers.get(&b.buffer.0).and_then(|e| e.gpu.clone()) else {
                self.warn_missing_buffer("a vertex buffer");
                return;
            };
            attributes[i] = Some(AttributeLayout {
                format: b.format,
                stride: b.stride,
                step: b.step,
            });
            vertex_buffers.push((buffer, b.offset));
        }

        let Some((topology, index, range)) = self.resolve_indices(primitive, source, count) else {
            return;
        };
        let strip_index = match (topology, &index) {
            (wgpu::PrimitiveTopology::LineStrip | wgpu::PrimitiveTopology::TriangleStrip, Some((_, f))) => {
                Some(*f)
            }
            _ => None,
        };

        let Some(viewport) = flip_and_clamp(self.state.viewport, self.width, self.height) else {
            return;
        };
        let scissor = if self.state.enabled(Capability::ScissorTest) {
            match flip_and_clamp(self.state.scissor, self.width, self.height) {
                Some(r) => Some(r),
                None => return,
            }
        } else {
            None
        };

        let key = self.pipeline_key(attributes, topology, strip_index);
        let textured = self.state.texture.is_some()
            && key.shader_key().has(AttributeSlot::Texel)
            && self.state.program.is_none_or(|p| p.textured);
        let texture_group = if textured {
            self.texture_group_for_bound()
        } else {
            self.white_group.clone()
        };

        let uniform_offset = self.push_uniforms(textured);
        let stencil_reference = if self.state.enabled(Capability::StencilTest) {
            self.state.stencil_func.reference
        } else {
            0
        };

        self.packets.push(Packet::Draw(DrawPacket {
            key,
            vertex_buffers,
            index,
            range,
            instances,
            uniform_offset,
            texture_group,
            viewport,
            scissor,
            stencil_reference,
        }));
    }

    /// Topology, optional index buffer and element range for a draw. Fans
    /// become lists through a generated 32-bit index buffer.
    #[allow(clippy::type_complexity)]
    fn resolve_indices(
        &mut self,
        primitive: Primitive,
        source: DrawSource,
        count: u32,
    ) -> Option<(wgpu::PrimitiveTopology, Option<(wgpu::Buffer, wgpu::IndexFormat)>, Range<u32>)> {
        let topology = match primitive {
            Primitive::Points => wgpu::PrimitiveTopology::PointList,
            Primitive::Lines => wgpu::PrimitiveTopology::LineList,
            Primitive::LineStrip => wgpu::PrimitiveTopology::LineStrip,
            Primitive::Triangles | Primitive::TriangleFan => wgpu::PrimitiveTopology::TriangleList,
            Primitive::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
        };

        if primitive == Primitive::TriangleFan {
            let fan: Vec<u32> = match source {
                DrawSource::Arrays { first } => fan_to_list(first..first + count),
                DrawSource::Elements { buffer, byte_offset } => {
                    let Some(entry) = self.buffers.get(&buffer.0) else {
                        self.warn_missing_buffer("an index buffer");
                        return None;
                    };
                    let start = byte_offset as usize;
                    let end = start + count as usize * 2;
                    let Some(bytes) = entry.shadow.get(start..end) else {
                        log::warn!("gpu: fan indices past the end of buffer {}", buffer.0);
                        return None;
                    };
                    fan_to_list(
                        bytes
                            .chunks_exact(2)
                            .map(|b| u16::from_le_bytes([b[0], b[1]]) as u32),
                    )
                }
            };
            if fan.is_empty() {
                return None;
            }
            let len = fan.len() as u32;
            let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("strata fan indices"),
                contents: bytemuck::cast_slice(&fan),
                usage: wgpu::BufferUsages::INDEX,
            });
            return Some((topology, Some((buffer, wgpu::IndexFormat::Uint32)), 0..len));
        }

        match source {
            DrawSource::Arrays { first } => Some((topology, None, first..first + count)),
            DrawSource::Elements { buffer, byte_offset } => {
                let Some(gpu) = self.buffers.get(&buffer.0).and_then(|e| e.gpu.clone()) else {
                    self.warn_missing_buffer("an index buffer");
                    return None;
                };
                let first = (byte_offset / 2) as u32;
                Some((
                    topology,
                    Some((gpu, wgpu::IndexFormat::Uint16)),
                    first..first + count,
                ))
            }
        }
    }

    fn pipeline_key(
        &self,
        attributes: [Option<AttributeLayout>; SLOT_COUNT],
        topology: wgpu::PrimitiveTopology,
        strip_index: Option<wgpu::IndexFormat>,
    ) -> PipelineKey {
        let s = &self.state;
        let depth_test = s.enabled(Capability::DepthTest);
        let triangles = matches!(
            topology,
            wgpu::PrimitiveTopology::TriangleList | wgpu::PrimitiveTopology::TriangleStrip
        );
        let (factor, units) = s.polygon_offset;
        PipelineKey {
            attributes,
            topology,
            strip_index,
            depth_test,
            depth_write: depth_test && s.depth_mask,
            depth_func: if depth_test { s.depth_func } else { CompareFunc::Always },
            cull: s.enabled(Capability::CullFace).then_some(s.cull_face),
            blend: s.enabled(Capability::Blend).then_some(s.blend),
            stencil: s.enabled(Capability::StencilTest).then_some((
                s.stencil_ops,
                StencilFunc {
                    reference: 0,
                    ..s.stencil_func
                },
            )),
            color_write: s.color_mask,
            depth_bias: (triangles && s.enabled(Capability::PolygonOffsetFill))
                .then_some((factor.to_bits(), units as i32)),
            color_format: self.color_format,
        }
    }

    fn texture_group_for_bound(&mut self) -> wgpu::BindGroup {
        let Some((tex, clamp_u, clamp_v)) = self.state.texture else {
            return self.white_group.clone();
        };
        let key = (tex.0, clamp_u, clamp_v);
        if let Some(group) = self.texture_groups.get(&key) {
            return group.clone();
        }
        let Some(entry) = self.textures.get(&tex.0) else {
            log::warn!("gpu: texture {} is bound but was deleted", tex.0);
            return self.white_group.clone();
        };
        let sampler = &self.samplers[clamp_u as usize * 2 + clamp_v as usize];
        let group = texture_group(&self.device, &self.texture_layout, &entry.view, sampler);
        self.texture_groups.insert(key, group.clone());
        group
    }

    fn push_uniforms(&mut self, textured: bool) -> u32 {
        let s = &self.state;
        let lights: Vec<Light> = s.lights.iter().flatten().copied().collect();
        let uniforms = DrawUniforms::new(&DrawState {
            projection: &s.projection,
            model_view: &s.model_view,
            color: s.color,
            specular: s.specular,
            fog: s.fog.as_ref().filter(|_| s.enabled(Capability::Fog)),
            alpha_threshold: s
                .enabled(Capability::AlphaTest)
                .then_some(s.alpha_threshold),
            lit: s.enabled(Capability::Lighting) || s.program.is_some_and(|p| p.lit),
            textured,
            lights: &lights,
        });
        let offset = self.uniforms.len();
        self.uniforms.extend_from_slice(bytemuck::bytes_of(&uniforms));
        self.uniforms.resize(offset + self.uniform_stride as usize, 0);
        offset as u32
    }

    // ── submission ────────────────────────────────────────────────────────

    /// Encodes and submits every recorded packet, then arms fences created
    /// since the last submission.
    fn flush(&mut self) {
        let packets = std::mem::take(&mut self.packets);
        let uniforms = std::mem::take(&mut self.uniforms);

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("strata frame encoder"),
            });

        let uniform_group = (!uniforms.is_empty()).then(|| {
            let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("strata draw uniforms"),
                contents: &uniforms,
                usage: wgpu::BufferUsages::UNIFORM,
            });
            self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("strata uniform bind group"),
                layout: &self.uniform_layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: &buffer,
                        offset: 0,
                        size: wgpu::BufferSize::new(UNIFORM_SIZE),
                    }),
                }],
            })
        });

        let target = PassTarget {
            color: &self.color_view,
            depth: &self.depth_view,
            width: self.width,
            height: self.height,
        };

        let mut i = 0;
        while i < packets.len() {
            let mut clear = ClearTargets::default();
            while let Some(Packet::Clear(c)) = packets.get(i) {
                merge_clear(&mut clear, c);
                i += 1;
            }
            let start = i;
            while let Some(Packet::Draw(_)) = packets.get(i) {
                i += 1;
            }
            let draws = packets[start..i].iter().filter_map(|p| match p {
                Packet::Draw(d) => Some(d),
                Packet::Clear(_) => None,
            });
            encode_pass(
                &mut encoder,
                &self.device,
                &mut self.pipelines,
                &target,
                clear,
                draws,
                uniform_group.as_ref(),
            );
        }

        self.queue.submit(std::iter::once(encoder.finish()));

        for fence in self.fences.values_mut().filter(|f| !f.submitted) {
            fence.submitted = true;
            let flag = Arc::clone(&fence.signaled);
            self.queue
                .on_submitted_work_done(move || flag.store(true, Ordering::Release));
        }
    }
}

// ── GraphicsApi ───────────────────────────────────────────────────────────

impl GraphicsApi for WgpuApi {
    fn set_enabled(&mut self, cap: Capability, enabled: bool) {
        if enabled {
            self.state.caps.insert(cap);
        } else {
            self.state.caps.remove(&cap);
        }
    }

    fn set_depth_mask(&mut self, write: bool) {
        self.state.depth_mask = write;
    }

    fn set_depth_func(&mut self, func: CompareFunc) {
        self.state.depth_func = func;
    }

    fn set_cull_face(&mut self, face: CullFace) {
        self.state.cull_face = face;
    }

    fn set_alpha_threshold(&mut self, threshold: f32) {
        self.state.alpha_threshold = threshold;
    }

    fn set_polygon_offset(&mut self, factor: f32, units: f32) {
        self.state.polygon_offset = (factor, units);
    }

    fn set_blend(&mut self, mode: BlendMode) {
        self.state.blend = mode;
    }

    fn set_stencil_ops(&mut self, ops: StencilOps) {
        self.state.stencil_ops = ops;
    }

    fn set_stencil_func(&mut self, func: StencilFunc) {
        self.state.stencil_func = func;
    }

    fn set_shade_model(&mut self, model: ShadeModel) {
        if model == ShadeModel::Flat && !self.warned_flat_shading {
            self.warned_flat_shading = true;
            log::warn!("gpu: flat shading is not supported; using smooth shading");
        }
    }

    fn set_color_mask(&mut self, write_color: bool) {
        self.state.color_mask = write_color;
    }

    fn set_line_width(&mut self, width: f32) {
        if width != 1.0 && !self.warned_line_width {
            self.warned_line_width = true;
            log::warn!("gpu: line width {width} is not supported; lines draw 1px wide");
        }
    }

    fn select_program(&mut self, program: Option<ProgramSelection>) {
        self.state.program = program;
    }

    fn set_color(&mut self, color: Color) {
        self.state.color = color;
    }

    fn set_specular(&mut self, color: Color) {
        self.state.specular = color;
    }

    fn load_projection(&mut self, m: &Mat4) {
        self.state.projection = *m;
    }

    fn load_model_view(&mut self, m: &Mat4) {
        self.state.model_view = *m;
    }

    fn set_light(&mut self, slot: usize, light: Option<&Light>) {
        let Some(dst) = self.state.lights.get_mut(slot) else {
            if !self.warned_light_slot {
                self.warned_light_slot = true;
                log::warn!("gpu: light slot {slot} out of range; ignored");
            }
            return;
        };
        *dst = light.copied();
    }

    fn set_fog(&mut self, fog: Option<&Fog>) {
        self.state.fog = fog.copied();
    }

    fn set_viewport(&mut self, rect: PixelRect) {
        self.state.viewport = rect;
    }

    fn set_scissor(&mut self, rect: PixelRect) {
        self.state.scissor = rect;
    }

    fn clear(&mut self, targets: ClearTargets) {
        self.packets.push(Packet::Clear(targets));
    }

    fn create_texture(&mut self, image: &RgbaImage) -> TextureResourceId {
        let id = self.alloc_id();
        let entry = if image.width == 0 || image.height == 0 {
            log::warn!("gpu: empty texture image; substituting a white texel");
            upload_texture(&self.device, &self.queue, &RgbaImage::filled(1, 1, [255; 4]))
        } else {
            upload_texture(&self.device, &self.queue, image)
        };
        self.textures.insert(id, entry);
        TextureResourceId(id)
    }

    fn bind_texture(&mut self, texture: Option<TextureResourceId>, clamp_u: bool, clamp_v: bool) {
        self.state.texture = texture.map(|t| (t, clamp_u, clamp_v));
    }

    fn delete_texture(&mut self, texture: TextureResourceId) {
        self.textures.remove(&texture.0);
        self.texture_groups.retain(|&(id, _, _), _| id != texture.0);
    }

    fn create_buffer(&mut self, target: BufferTarget) -> GpuBufferId {
        let id = self.alloc_id();
        self.buffers.insert(
            id,
            BufferEntry {
                target,
                gpu: None,
                shadow: Vec::new(),
            },
        );
        GpuBufferId(id)
    }

    fn delete_buffer(&mut self, buffer: GpuBufferId) {
        self.buffers.remove(&buffer.0);
    }

    fn buffer_data(&mut self, buffer: GpuBufferId, data: &[u8], _usage: BufferUsage) {
        let Some(entry) = self.buffers.get_mut(&buffer.0) else {
            log::warn!("gpu: buffer_data on unknown buffer {}", buffer.0);
            return;
        };
        let mut contents = data.to_vec();
        contents.resize(align4(data.len()).max(4), 0);
        entry.gpu = Some(self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(buffer_label(entry.target)),
            contents: &contents,
            usage: BUFFER_USAGES,
        }));
        entry.shadow = data.to_vec();
    }

    fn buffer_storage(&mut self, buffer: GpuBufferId, size: usize, _usage: BufferUsage) {
        let Some(entry) = self.buffers.get_mut(&buffer.0) else {
            log::warn!("gpu: buffer_storage on unknown buffer {}", buffer.0);
            return;
        };
        entry.gpu = Some(self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(buffer_label(entry.target)),
            size: align4(size).max(4) as u64,
            usage: BUFFER_USAGES,
            mapped_at_creation: false,
        }));
        entry.shadow = vec![0; size];
    }

    fn buffer_sub_data(&mut self, buffer: GpuBufferId, offset: u64, data: &[u8]) {
        let Some(entry) = self.buffers.get_mut(&buffer.0) else {
            log::warn!("gpu: buffer_sub_data on unknown buffer {}", buffer.0);
            return;
        };
        let start = offset as usize;
        let end = start + data.len();
        let Some(dst) = entry.shadow.get_mut(start..end) else {
            log::warn!(
                "gpu: write of {} bytes at {offset} overruns buffer {} ({} bytes)",
                data.len(),
                buffer.0,
                entry.shadow.len()
            );
            return;
        };
        dst.copy_from_slice(data);
        let Some(gpu) = entry.gpu.as_ref() else { return };

        // wgpu copies in 4-byte units; widen the window from the shadow.
        let lo = start & !3;
        let hi = align4(end);
        let mut window = entry.shadow[lo..hi.min(entry.shadow.len())].to_vec();
        window.resize(hi - lo, 0);
        self.queue.write_buffer(gpu, lo as u64, &window);
    }

    fn fence_sync(&mut self) -> FenceId {
        let id = self.alloc_id();
        self.fences.insert(
            id,
            FenceEntry {
                signaled: Arc::new(AtomicBool::new(false)),
                submitted: false,
            },
        );
        FenceId(id)
    }

    fn client_wait_fence(&mut self, fence: FenceId, timeout: Duration) -> FenceStatus {
        let Some(entry) = self.fences.get(&fence.0) else {
            return FenceStatus::Failed;
        };
        if entry.signaled.load(Ordering::Acquire) {
            return FenceStatus::Signaled;
        }
        if !entry.submitted {
            self.flush();
        }

        let poll = if timeout.is_zero() {
            wgpu::PollType::Poll
        } else {
            wgpu::PollType::Wait {
                submission_index: None,
                timeout: Some(timeout),
            }
        };
        if let Err(e) = self.device.poll(poll) {
            log::debug!("gpu: fence wait: {e}");
        }

        match self.fences.get(&fence.0) {
            Some(f) if f.signaled.load(Ordering::Acquire) => FenceStatus::Signaled,
            Some(_) => FenceStatus::TimedOut,
            None => FenceStatus::Failed,
        }
    }

    fn delete_fence(&mut self, fence: FenceId) {
        self.fences.remove(&fence.0);
    }

    fn create_vertex_array(&mut self) -> VertexArrayId {
        let id = self.alloc_id();
        self.vertex_arrays.insert(id, AttributeSet::default());
        VertexArrayId(id)
    }

    fn delete_vertex_array(&mut self, vao: VertexArrayId) {
        self.vertex_arrays.remove(&vao.0);
        if self.bound_vao == Some(vao) {
            self.bound_vao = None;
        }
    }

    fn bind_vertex_array(&mut self, vao: Option<VertexArrayId>) {
        self.bound_vao = vao;
    }

    fn vertex_attrib(&mut self, binding: AttributeBinding) {
        self.current_set_mut().bindings[slot_index(binding.slot)] = Some(binding);
    }

    fn disable_attrib(&mut self, slot: AttributeSlot) {
        self.current_set_mut().bindings[slot_index(slot)] = None;
    }

    fn draw_elements(
        &mut self,
        primitive: Primitive,
        indices: GpuBufferId,
        byte_offset: u64,
        count: u32,
        instances: u32,
    ) {
        self.record_draw(
            primitive,
            DrawSource::Elements {
                buffer: indices,
                byte_offset,
            },
            count,
            instances,
        );
    }

    fn draw_arrays(&mut self, primitive: Primitive, first: u32, count: u32, instances: u32) {
        self.record_draw(primitive, DrawSource::Arrays { first }, count, instances);
    }

    fn present(&mut self) {
        self.flush();
        self.frames += 1;
        log::trace!("gpu: frame {} presented", self.frames);
    }

    /// Copies the current target. Recorded but unsubmitted work is flushed
    /// first.
    fn request_readback(&mut self) -> ReadbackId {
        if !self.packets.is_empty() {
            self.flush();
        }
        let id = self.alloc_id();
        let bgra = readback_is_bgra(self.color_format).unwrap_or(false);

        let unpadded_row = self.width * 4;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_row = unpadded_row.div_ceil(align) * align;

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("strata readback"),
            size: (padded_row * self.height) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("strata readback encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &self.color_target,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: Some(self.height),
                },
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let (tx, rx) = mpsc::channel();
        buffer.slice(..).map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });

        self.readbacks.insert(
            id,
            Readback {
                buffer,
                width: self.width,
                height: self.height,
                padded_row,
                bgra,
                receiver: rx,
            },
        );
        ReadbackId(id)
    }

    fn poll_readback(&mut self, id: ReadbackId) -> ReadbackStatus {
        if let Err(e) = self.device.poll(wgpu::PollType::Poll) {
            log::debug!("gpu: readback poll: {e}");
        }
        let Some(rb) = self.readbacks.get(&id.0) else {
            return ReadbackStatus::Failed(format!("unknown readback {}", id.0));
        };
        let result = match rb.receiver.try_recv() {
            Err(mpsc::TryRecvError::Empty) => return ReadbackStatus::Pending,
            Err(mpsc::TryRecvError::Disconnected) => Err("readback channel closed".to_owned()),
            Ok(Err(e)) => Err(e.to_string()),
            Ok(Ok(())) => Ok(()),
        };
        let Some(rb) = self.readbacks.remove(&id.0) else {
            return ReadbackStatus::Failed(format!("unknown readback {}", id.0));
        };
        if let Err(msg) = result {
            log::warn!("gpu: readback {} failed: {msg}", id.0);
            return ReadbackStatus::Failed(msg);
        }

        let pixels = {
            let mapped = rb.buffer.slice(..).get_mapped_range();
            unpad_rows(&mapped, rb.width, rb.height, rb.padded_row, rb.bgra)
        };
        rb.buffer.unmap();
        ReadbackStatus::Ready(RgbaImage {
            width: rb.width,
            height: rb.height,
            pixels,
        })
    }
}

// ── helpers ───────────────────────────────────────────────────────────────

const BUFFER_USAGES: wgpu::BufferUsages = wgpu::BufferUsages::VERTEX
    .union(wgpu::BufferUsages::INDEX)
    .union(wgpu::BufferUsages::COPY_DST);

fn buffer_label(target: BufferTarget) -> &'static str {
    match target {
        BufferTarget::Vertex => "strata vertex buffer",
        BufferTarget::Index => "strata index buffer",
    }
}

#[inline]
fn align4(n: usize) -> usize {
    n.div_ceil(4) * 4
}

/// `Some(true)` when readback must swap red and blue, `None` when readback
/// cannot handle the format.
fn readback_is_bgra(format: wgpu::TextureFormat) -> Option<bool> {
    match format {
        wgpu::TextureFormat::Rgba8Unorm | wgpu::TextureFormat::Rgba8UnormSrgb => Some(false),
        wgpu::TextureFormat::Bgra8Unorm | wgpu::TextureFormat::Bgra8UnormSrgb => Some(true),
        _ => None,
    }
}

fn create_targets(
    device: &wgpu::Device,
    format: wgpu::TextureFormat,
    width: u32,
    height: u32,
) -> (wgpu::Texture, wgpu::TextureView, wgpu::TextureView) {
    let size = wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    };
    let color = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("strata offscreen color"),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    });
    let depth = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("strata offscreen depth/stencil"),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: DEPTH_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    let color_view = color.create_view(&wgpu::TextureViewDescriptor::default());
    let depth_view = depth.create_view(&wgpu::TextureViewDescriptor::default());
    (color, color_view, depth_view)
}

fn create_sampler(device: &wgpu::Device, clamp_u: bool, clamp_v: bool) -> wgpu::Sampler {
    let mode = |clamp: bool| {
        if clamp {
            wgpu::AddressMode::ClampToEdge
        } else {
            wgpu::AddressMode::Repeat
        }
    };
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some("strata sampler"),
        address_mode_u: mode(clamp_u),
        address_mode_v: mode(clamp_v),
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: wgpu::FilterMode::Linear,
        min_filter: wgpu::FilterMode::Linear,
        mipmap_filter: wgpu::MipmapFilterMode::Nearest,
        ..Default::default()
    })
}

fn upload_texture(device: &wgpu::Device, queue: &wgpu::Queue, image: &RgbaImage) -> TextureEntry {
    let size = wgpu::Extent3d {
        width: image.width,
        height: image.height,
        depth_or_array_layers: 1,
    };
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("strata texture"),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8Unorm,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        &image.pixels,
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(image.width * 4),
            rows_per_image: Some(image.height),
        },
        size,
    );
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    TextureEntry {
        _texture: texture,
        view,
    }
}

fn texture_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    view: &wgpu::TextureView,
    sampler: &wgpu::Sampler,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("strata texture bind group"),
        layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(view),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(sampler),
            },
        ],
    })
}

/// GL rects count rows from the bottom, wgpu from the top. The result is
/// clamped to the target; `None` when nothing is left.
fn flip_and_clamp(rect: PixelRect, width: u32, height: u32) -> Option<[u32; 4]> {
    let (w, h) = (width as i64, height as i64);
    let x0 = (rect.x as i64).clamp(0, w);
    let x1 = (rect.x as i64 + rect.width as i64).clamp(0, w);
    let top = h - (rect.y as i64 + rect.height as i64);
    let y0 = top.clamp(0, h);
    let y1 = (top + rect.height as i64).clamp(0, h);
    (x1 > x0 && y1 > y0).then(|| [x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32])
}

/// Triangle fan indices as a triangle list.
fn fan_to_list(indices: impl IntoIterator<Item = u32>) -> Vec<u32> {
    let mut it = indices.into_iter();
    let Some(hub) = it.next() else { return Vec::new() };
    let Some(mut prev) = it.next() else { return Vec::new() };
    let mut out = Vec::new();
    for next in it {
        out.extend_from_slice(&[hub, prev, next]);
        prev = next;
    }
    out
}

/// Later clears in a run override earlier ones per target.
fn merge_clear(into: &mut ClearTargets, c: &ClearTargets) {
    if c.color.is_some() {
        into.color = c.color;
    }
    if c.depth.is_some() {
        into.depth = c.depth;
    }
    if c.stencil.is_some() {
        into.stencil = c.stencil;
    }
}

fn unpad_rows(mapped: &[u8], width: u32, height: u32, padded_row: u32, bgra: bool) -> Vec<u8> {
    let row = (width * 4) as usize;
    let mut pixels = Vec::with_capacity(row * height as usize);
    for y in 0..height as usize {
        let start = y * padded_row as usize;
        pixels.extend_from_slice(&mapped[start..start + row]);
    }
    if bgra {
        for px in pixels.chunks_exact_mut(4) {
            px.swap(0, 2);
        }
    }
    pixels
}

struct PassTarget<'a> {
    color: &'a wgpu::TextureView,
    depth: &'a wgpu::TextureView,
    width: u32,
    height: u32,
}

fn encode_pass<'a>(
    encoder: &mut wgpu::CommandEncoder,
    device: &wgpu::Device,
    pipelines: &mut PipelineCache,
    target: &PassTarget<'_>,
    clear: ClearTargets,
    draws: impl Iterator<Item = &'a DrawPacket>,
    uniforms: Option<&wgpu::BindGroup>,
) {
    let mut draws = draws.peekable();
    if clear == ClearTargets::default() && draws.peek().is_none() {
        return;
    }

    let color_load = match clear.color {
        Some(c) => wgpu::LoadOp::Clear(wgpu::Color {
            r: c.r as f64,
            g: c.g as f64,
            b: c.b as f64,
            a: c.a as f64,
        }),
        None => wgpu::LoadOp::Load,
    };

    let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some("strata pass"),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view: target.color,
            resolve_target: None,
            ops: wgpu::Operations {
                load: color_load,
                store: wgpu::StoreOp::Store,
            },
            depth_slice: None,
        })],
        depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
            view: target.depth,
            depth_ops: Some(wgpu::Operations {
                load: clear.depth.map_or(wgpu::LoadOp::Load, wgpu::LoadOp::Clear),
                store: wgpu::StoreOp::Store,
            }),
            stencil_ops: Some(wgpu::Operations {
                load: clear.stencil.map_or(wgpu::LoadOp::Load, wgpu::LoadOp::Clear),
                store: wgpu::StoreOp::Store,
            }),
        }),
        timestamp_writes: None,
        occlusion_query_set: None,
        multiview_mask: None,
    });

    let Some(uniforms) = uniforms else { return };
    for draw in draws {
        rpass.set_pipeline(pipelines.get_or_create(device, &draw.key));
        rpass.set_bind_group(0, uniforms, &[draw.uniform_offset]);
        rpass.set_bind_group(1, &draw.texture_group, &[]);
        for (slot, (buffer, offset)) in draw.vertex_buffers.iter().enumerate() {
            rpass.set_vertex_buffer(slot as u32, buffer.slice(*offset..));
        }

        let [vx, vy, vw, vh] = draw.viewport;
        rpass.set_viewport(vx as f32, vy as f32, vw as f32, vh as f32, 0.0, 1.0);
        let [sx, sy, sw, sh] = draw.scissor.unwrap_or([0, 0, target.width, target.height]);
        rpass.set_scissor_rect(sx, sy, sw, sh);
        rpass.set_stencil_reference(draw.stencil_reference);

        match &draw.index {
            Some((buffer, format)) => {
                rpass.set_index_buffer(buffer.slice(..), *format);
                rpass.draw_indexed(draw.range.clone(), 0, 0..draw.instances);
            }
            None => rpass.draw(draw.range.clone(), 0..draw.instances),
        }
    }
}
