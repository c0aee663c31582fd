use tracing::debug;

use crate::compile::{compile_stage, DiagnosticSink};
use crate::error::{Diagnostic, DiagnosticKind, Result};
use crate::layout::{Declaration, StructLayout};
use crate::synth::{
    synthesize, Stage, FRAG_COLOR, INPUT_PREFIX, OUTPUT_PREFIX, RENDER_FRAGMENT_BODY,
    UNIFORM_PREFIX, VERTEX_COLOR,
};
use crate::types::{ShaderCompiler, VEC4};

use super::buffers::{BufferSide, UnitBufferPair};
use super::context::GpuContext;
use super::params::ParamBlock;

/// Caller-supplied GLSL for one step.
pub(crate) struct StepSource<'a> {
    pub params: &'a ParamBlock,
    pub glsl: &'a str,
}

/// Update kernel: struct in, struct out, no rasterization.
pub(crate) struct UpdateProgram {
    pub pipeline: wgpu::ComputePipeline,
    pub params_group: wgpu::BindGroup,
    pub records_layout: wgpu::BindGroupLayout,
}

/// Point renderer: struct in, one colour out per unit.
pub(crate) struct RenderProgram {
    pub pipeline: wgpu::RenderPipeline,
    pub params_group: wgpu::BindGroup,
}

pub(crate) struct ProgramOptions {
    pub compiler: ShaderCompiler,
    pub target_format: wgpu::TextureFormat,
}

impl UpdateProgram {
    pub fn build(
        ctx: &GpuContext,
        layout: &StructLayout,
        step: StepSource<'_>,
        options: &ProgramOptions,
        sink: &mut DiagnosticSink,
    ) -> Result<Self> {
        let source = synthesize(
            Stage::Update,
            &step.params.layout().prefixed(UNIFORM_PREFIX),
            &layout.prefixed(INPUT_PREFIX),
            &layout.prefixed(OUTPUT_PREFIX),
            step.glsl,
        );
        let (module, diagnostic) =
            compile_stage(ctx, Stage::Update, Stage::Update.label(), &source, options.compiler);
        sink.report(diagnostic)?;

        let (params_layout, params_group) =
            params_binding(ctx, step.params, wgpu::ShaderStages::COMPUTE, "update params");
        let records_layout = records_bind_group_layout(ctx);

        let (pipeline, diagnostic) = capture_link(ctx, "update program", || {
            let pipeline_layout = ctx
                .device
                .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                    label: Some("update pipeline layout"),
                    bind_group_layouts: &[&params_layout, &records_layout],
                    push_constant_ranges: &[],
                });
            ctx.device
                .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some("update program"),
                    layout: Some(&pipeline_layout),
                    module: &module,
                    entry_point: Some("main"),
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    cache: None,
                })
        });
        sink.report(diagnostic)?;

        Ok(Self {
            pipeline,
            params_group,
            records_layout,
        })
    }
}

impl RenderProgram {
    pub fn build(
        ctx: &GpuContext,
        layout: &StructLayout,
        buffers: &UnitBufferPair,
        step: StepSource<'_>,
        options: &ProgramOptions,
        sink: &mut DiagnosticSink,
    ) -> Result<Self> {
        let vertex_source = synthesize(
            Stage::RenderVertex,
            &step.params.layout().prefixed(UNIFORM_PREFIX),
            &layout.prefixed(INPUT_PREFIX),
            &[Declaration::new(VERTEX_COLOR, VEC4)],
            step.glsl,
        );
        let fragment_source = synthesize(
            Stage::RenderFragment,
            &[],
            &[Declaration::new(VERTEX_COLOR, VEC4)],
            &[Declaration::new(FRAG_COLOR, VEC4)],
            RENDER_FRAGMENT_BODY,
        );

        let (vertex_module, diagnostic) = compile_stage(
            ctx,
            Stage::RenderVertex,
            Stage::RenderVertex.label(),
            &vertex_source,
            options.compiler,
        );
        sink.report(diagnostic)?;
        let (fragment_module, diagnostic) = compile_stage(
            ctx,
            Stage::RenderFragment,
            Stage::RenderFragment.label(),
            &fragment_source,
            options.compiler,
        );
        sink.report(diagnostic)?;

        let (params_layout, params_group) =
            params_binding(ctx, step.params, wgpu::ShaderStages::VERTEX, "render params");

        // Both buffers carry identical bindings; either describes the input.
        let vertex_layout = buffers.get(BufferSide::Front).vertex_layout();

        let (pipeline, diagnostic) = capture_link(ctx, "render program", || {
            let pipeline_layout = ctx
                .device
                .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                    label: Some("render pipeline layout"),
                    bind_group_layouts: &[&params_layout],
                    push_constant_ranges: &[],
                });
            ctx.device
                .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: Some("render program"),
                    layout: Some(&pipeline_layout),
                    vertex: wgpu::VertexState {
                        module: &vertex_module,
                        entry_point: Some("main"),
                        buffers: &[vertex_layout],
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                    },
                    primitive: wgpu::PrimitiveState {
                        topology: wgpu::PrimitiveTopology::PointList,
                        strip_index_format: None,
                        front_face: wgpu::FrontFace::Ccw,
                        cull_mode: None,
                        polygon_mode: wgpu::PolygonMode::Fill,
                        unclipped_depth: false,
                        conservative: false,
                    },
                    depth_stencil: None,
                    multisample: wgpu::MultisampleState {
                        count: 1,
                        mask: !0,
                        alpha_to_coverage_enabled: false,
                    },
                    fragment: Some(wgpu::FragmentState {
                        module: &fragment_module,
                        entry_point: Some("main"),
                        targets: &[Some(wgpu::ColorTargetState {
                            format: options.target_format,
                            blend: Some(additive_blend()),
                            write_mask: wgpu::ColorWrites::ALL,
                        })],
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                    }),
                    multiview: None,
                    cache: None,
                })
        });
        sink.report(diagnostic)?;

        Ok(Self {
            pipeline,
            params_group,
        })
    }
}

/// `src * src_alpha + dst`: overlapping points accumulate.
fn additive_blend() -> wgpu::BlendState {
    let component = wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::SrcAlpha,
        dst_factor: wgpu::BlendFactor::One,
        operation: wgpu::BlendOperation::Add,
    };
    wgpu::BlendState {
        color: component,
        alpha: component,
    }
}

/// Runs `build` inside a validation error scope and turns any captured error
/// into a link diagnostic.
fn capture_link<T>(
    ctx: &GpuContext,
    label: &str,
    build: impl FnOnce() -> T,
) -> (T, Option<Diagnostic>) {
    ctx.device.push_error_scope(wgpu::ErrorFilter::Validation);
    let built = build();
    let error = pollster::block_on(ctx.device.pop_error_scope());
    if error.is_none() {
        debug!(label, "linked program");
    }
    let diagnostic = error.map(|err| Diagnostic {
        kind: DiagnosticKind::ProgramLink,
        label: label.to_string(),
        message: err.to_string(),
    });
    (built, diagnostic)
}

/// Bind group layout and group for set 0; empty when the step declares no params.
fn params_binding(
    ctx: &GpuContext,
    params: &ParamBlock,
    visibility: wgpu::ShaderStages,
    label: &str,
) -> (wgpu::BindGroupLayout, wgpu::BindGroup) {
    let layout_entries: Vec<wgpu::BindGroupLayoutEntry> = params
        .buffer()
        .map(|_| wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        })
        .into_iter()
        .collect();
    let layout = ctx
        .device
        .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(label),
            entries: &layout_entries,
        });

    let group_entries: Vec<wgpu::BindGroupEntry<'_>> = params
        .buffer()
        .map(|buffer| wgpu::BindGroupEntry {
            binding: 0,
            resource: buffer.as_entire_binding(),
        })
        .into_iter()
        .collect();
    let group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout: &layout,
        entries: &group_entries,
    });

    (layout, group)
}

/// Set 1 of the update kernel: source records, destination records, unit count.
fn records_bind_group_layout(ctx: &GpuContext) -> wgpu::BindGroupLayout {
    let storage = |binding| wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: false },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    };
    ctx.device
        .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("update records layout"),
            entries: &[
                storage(0),
                storage(1),
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        })
}
