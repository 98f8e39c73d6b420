//! GL-style state folded into cacheable render pipelines.

use std::collections::HashMap;

use crate::device::{
    AttributeFormat, AttributeSlot, BlendEquation, BlendFactor, BlendMode, CompareFunc,
    CullFace, StencilAction, StencilFunc, StencilOps, StepMode,
};

use super::shader::{ShaderKey, SLOTS, SLOT_COUNT, shader_source, slot_index};

pub(super) const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth24PlusStencil8;

/// How one attribute slot is laid out in its vertex buffer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub(super) struct AttributeLayout {
    pub format: AttributeFormat,
    pub stride: u32,
    pub step: StepMode,
}

/// Every piece of state that changes pipeline creation.
///
/// Stencil reference, viewport and scissor are dynamic and stay out.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub(super) struct PipelineKey {
    pub attributes: [Option<AttributeLayout>; SLOT_COUNT],
    pub topology: wgpu::PrimitiveTopology,
    pub strip_index: Option<wgpu::IndexFormat>,
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_func: CompareFunc,
    pub cull: Option<CullFace>,
    pub blend: Option<BlendMode>,
    /// Reference zeroed; it is set per pass.
    pub stencil: Option<(StencilOps, StencilFunc)>,
    pub color_write: bool,
    /// (slope factor bits, constant units)
    pub depth_bias: Option<(u32, i32)>,
    pub color_format: wgpu::TextureFormat,
}

impl PipelineKey {
    pub fn shader_key(&self) -> ShaderKey {
        let mut formats = [None; SLOT_COUNT];
        for (dst, src) in formats.iter_mut().zip(&self.attributes) {
            *dst = src.map(|a| a.format);
        }
        ShaderKey { formats }
    }

    /// Bound slots in vertex-buffer order.
    pub fn bound_slots(&self) -> impl Iterator<Item = (AttributeSlot, AttributeLayout)> + '_ {
        SLOTS
            .iter()
            .filter_map(|&s| self.attributes[slot_index(s)].map(|a| (s, a)))
    }
}

// ── conversions ───────────────────────────────────────────────────────────

pub(super) fn compare(func: CompareFunc) -> wgpu::CompareFunction {
    match func {
        CompareFunc::Always => wgpu::CompareFunction::Always,
        CompareFunc::Never => wgpu::CompareFunction::Never,
        CompareFunc::Equal => wgpu::CompareFunction::Equal,
        CompareFunc::Less => wgpu::CompareFunction::Less,
        CompareFunc::LessEqual => wgpu::CompareFunction::LessEqual,
    }
}

fn blend_factor(f: BlendFactor) -> wgpu::BlendFactor {
    match f {
        BlendFactor::One => wgpu::BlendFactor::One,
        BlendFactor::SrcAlpha => wgpu::BlendFactor::SrcAlpha,
        BlendFactor::OneMinusSrcAlpha => wgpu::BlendFactor::OneMinusSrcAlpha,
    }
}

fn blend_state(mode: BlendMode) -> wgpu::BlendState {
    let component = wgpu::BlendComponent {
        src_factor: blend_factor(mode.src),
        dst_factor: blend_factor(mode.dst),
        operation: match mode.equation {
            BlendEquation::Add => wgpu::BlendOperation::Add,
            BlendEquation::Subtract => wgpu::BlendOperation::Subtract,
        },
    };
    wgpu::BlendState {
        color: component,
        alpha: component,
    }
}

fn stencil_operation(a: StencilAction) -> wgpu::StencilOperation {
    match a {
        StencilAction::Keep => wgpu::StencilOperation::Keep,
        StencilAction::Zero => wgpu::StencilOperation::Zero,
        StencilAction::Replace => wgpu::StencilOperation::Replace,
        StencilAction::Increment => wgpu::StencilOperation::IncrementClamp,
        StencilAction::Decrement => wgpu::StencilOperation::DecrementClamp,
        StencilAction::Invert => wgpu::StencilOperation::Invert,
    }
}

fn stencil_state(stencil: Option<(StencilOps, StencilFunc)>) -> wgpu::StencilState {
    let Some((ops, func)) = stencil else {
        return wgpu::StencilState::default();
    };
    let face = wgpu::StencilFaceState {
        compare: compare(func.compare),
        fail_op: stencil_operation(ops.fail),
        depth_fail_op: stencil_operation(ops.depth_fail),
        pass_op: stencil_operation(ops.pass),
    };
    wgpu::StencilState {
        front: face,
        back: face,
        read_mask: func.mask,
        write_mask: 0xFF,
    }
}

fn vertex_format(format: AttributeFormat) -> wgpu::VertexFormat {
    match format {
        AttributeFormat::Float32x2 => wgpu::VertexFormat::Float32x2,
        AttributeFormat::Float32x3 => wgpu::VertexFormat::Float32x3,
        AttributeFormat::Float32x4 | AttributeFormat::Mat4 => wgpu::VertexFormat::Float32x4,
    }
}

fn vertex_attributes(slot: AttributeSlot, format: AttributeFormat) -> Vec<wgpu::VertexAttribute> {
    if slot == AttributeSlot::InstanceMatrix && format == AttributeFormat::Mat4 {
        return (0..4)
            .map(|c| wgpu::VertexAttribute {
                format: wgpu::VertexFormat::Float32x4,
                offset: 16 * c as u64,
                shader_location: slot.location() + c,
            })
            .collect();
    }
    vec![wgpu::VertexAttribute {
        format: vertex_format(format),
        offset: 0,
        shader_location: slot.location(),
    }]
}

/// Zero stride means tightly packed, as in GL.
#[inline]
pub(super) fn effective_stride(layout: &AttributeLayout) -> u64 {
    if layout.stride == 0 {
        layout.format.size()
    } else {
        layout.stride as u64
    }
}

// ── cache ─────────────────────────────────────────────────────────────────

/// Pipelines and shader modules, created on first use and kept for the
/// lifetime of the device.
pub(super) struct PipelineCache {
    layout: wgpu::PipelineLayout,
    shaders: HashMap<ShaderKey, wgpu::ShaderModule>,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
}

impl PipelineCache {
    pub fn new(layout: wgpu::PipelineLayout) -> Self {
        Self {
            layout,
            shaders: HashMap::new(),
            pipelines: HashMap::new(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn get_or_create(&mut self, device: &wgpu::Device, key: &PipelineKey) -> &wgpu::RenderPipeline {
        if !self.pipelines.contains_key(key) {
            log::debug!(
                "gpu: creating pipeline (topology {:?}, depth {}, blend {:?}, stencil {})",
                key.topology,
                key.depth_test,
                key.blend,
                key.stencil.is_some()
            );
            let pipeline = self.create(device, key);
            self.pipelines.insert(*key, pipeline);
        }
        &self.pipelines[key]
    }

    fn create(&mut self, device: &wgpu::Device, key: &PipelineKey) -> wgpu::RenderPipeline {
        let shader_key = key.shader_key();
        let shader: &wgpu::ShaderModule = self.shaders.entry(shader_key).or_insert_with(|| {
            log::debug!("gpu: generating shader variant {:?}", shader_key.formats);
            device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("strata fixed-function shader"),
                source: wgpu::ShaderSource::Wgsl(shader_source(&shader_key).into()),
            })
        });

        let attributes: Vec<(AttributeLayout, Vec<wgpu::VertexAttribute>)> = key
            .bound_slots()
            .map(|(slot, layout)| (layout, vertex_attributes(slot, layout.format)))
            .collect();
        let buffers: Vec<wgpu::VertexBufferLayout<'_>> = attributes
            .iter()
            .map(|(layout, attrs)| wgpu::VertexBufferLayout {
                array_stride: effective_stride(layout),
                step_mode: match layout.step {
                    StepMode::Vertex => wgpu::VertexStepMode::Vertex,
                    StepMode::Instance => wgpu::VertexStepMode::Instance,
                },
                attributes: attrs,
            })
            .collect();

        let bias = match key.depth_bias {
            Some((factor, units)) => wgpu::DepthBiasState {
                constant: units,
                slope_scale: f32::from_bits(factor),
                clamp: 0.0,
            },
            None => wgpu::DepthBiasState::default(),
        };

        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("strata pipeline"),
            layout: Some(&self.layout),

            vertex: wgpu::VertexState {
                module: shader,
                entry_point: Some("vs_main"),
                compilation_options: Default::default(),
                buffers: &buffers,
            },

            fragment: Some(wgpu::FragmentState {
                module: shader,
                entry_point: Some("fs_main"),
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: key.color_format,
                    blend: key.blend.map(blend_state),
                    write_mask: if key.color_write {
                        wgpu::ColorWrites::ALL
                    } else {
                        wgpu::ColorWrites::empty()
                    },
                })],
            }),

            primitive: wgpu::PrimitiveState {
                topology: key.topology,
                strip_index_format: key.strip_index,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: key.cull.map(|c| match c {
                    CullFace::Front => wgpu::Face::Front,
                    CullFace::Back => wgpu::Face::Back,
                }),
                unclipped_depth: false,
                polygon_mode: wgpu::PolygonMode::Fill,
                conservative: false,
            },

            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: key.depth_test && key.depth_write,
                depth_compare: if key.depth_test {
                    compare(key.depth_func)
                } else {
                    wgpu::CompareFunction::Always
                },
                stencil: stencil_state(key.stencil),
                bias,
            }),

            multisample: wgpu::MultisampleState::default(),
            multiview_mask: None,
            cache: None,
        })
    }
}
