//! The feedback computer: two record buffers, an update kernel that rewrites
//! one into the other, and a point renderer that draws the freshly written
//! side.
//!
//! Buffer roles are never swapped physically. Each [`FeedbackComputer::step`]
//! derives `(source, destination)` from the parity of the iteration counter:
//!
//! ```text
//!   iteration even:  front ──update──▶ back  ──render──▶ target
//!   iteration odd:   back  ──update──▶ front ──render──▶ target
//! ```
//!
//! so a buffer is never bound as kernel input and output in the same pass.

use std::fmt;

use bytemuck::Pod;
use tracing::{debug, info, trace};
use wgpu::util::DeviceExt;

use crate::compile::DiagnosticSink;
use crate::error::{Diagnostic, DiagnosticPolicy, FeedbackError, Result};
use crate::gpu::program::{ProgramOptions, RenderProgram, StepSource, UpdateProgram};
use crate::gpu::{BufferSide, GpuContext, ParamBlock, ParamScope, UnitBufferPair};
use crate::layout::{ParamLayout, StructLayout};
use crate::synth::WORKGROUP_SIZE;
use crate::types::{FieldType, ShaderCompiler};

/// Colour format render targets use unless the description overrides it.
pub const DEFAULT_TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// GLSL body plus the uniform params it declares.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepProgram {
    glsl: String,
    params: Vec<(String, String)>,
    values: Vec<(String, Vec<u8>)>,
}

impl StepProgram {
    pub fn new(glsl: impl Into<String>) -> Self {
        Self {
            glsl: glsl.into(),
            params: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Declares a uniform `u_<name>` of GLSL type `type_name`.
    pub fn param(mut self, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.params.push((name.into(), type_name.into()));
        self
    }

    /// Uploads `value` into param `name` when the computer is built.
    pub fn value<T: Pod>(mut self, name: impl Into<String>, value: &T) -> Self {
        self.values
            .push((name.into(), bytemuck::bytes_of(value).to_vec()));
        self
    }

    pub fn glsl(&self) -> &str {
        &self.glsl
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }
}

type Initializer = Box<dyn FnMut(u32, &mut [u8])>;

/// Everything needed to build a [`FeedbackComputer`].
pub struct ComputerDescription {
    units: u32,
    fields: Vec<(String, String)>,
    initializer: Option<Initializer>,
    initial: Option<Vec<u8>>,
    update: Option<StepProgram>,
    render: Option<StepProgram>,
    target_format: wgpu::TextureFormat,
    policy: DiagnosticPolicy,
    compiler: ShaderCompiler,
}

impl ComputerDescription {
    pub fn new(units: u32) -> Self {
        Self {
            units,
            fields: Vec::new(),
            initializer: None,
            initial: None,
            update: None,
            render: None,
            target_format: DEFAULT_TARGET_FORMAT,
            policy: DiagnosticPolicy::default(),
            compiler: ShaderCompiler::default(),
        }
    }

    /// Appends a struct field; declaration order fixes the byte layout.
    pub fn field(mut self, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.fields.push((name.into(), type_name.into()));
        self
    }

    /// Called once per unit with a window of exactly one record before upload.
    pub fn initialize(mut self, init: impl FnMut(u32, &mut [u8]) + 'static) -> Self {
        self.initializer = Some(Box::new(init));
        self
    }

    /// Seeds both buffers from raw bytes instead of zeroes. The initializer,
    /// if any, still runs over these bytes afterwards.
    pub fn initial_records(mut self, bytes: Vec<u8>) -> Self {
        self.initial = Some(bytes);
        self
    }

    pub fn update_step(mut self, step: StepProgram) -> Self {
        self.update = Some(step);
        self
    }

    pub fn render_step(mut self, step: StepProgram) -> Self {
        self.render = Some(step);
        self
    }

    pub fn target_format(mut self, format: wgpu::TextureFormat) -> Self {
        self.target_format = format;
        self
    }

    pub fn diagnostics(mut self, policy: DiagnosticPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn compiler(mut self, compiler: ShaderCompiler) -> Self {
        self.compiler = compiler;
        self
    }

    pub fn units(&self) -> u32 {
        self.units
    }
}

impl fmt::Debug for ComputerDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputerDescription")
            .field("units", &self.units)
            .field("fields", &self.fields)
            .field("initializer", &self.initializer.is_some())
            .field("initial", &self.initial.as_ref().map(Vec::len))
            .field("update", &self.update)
            .field("render", &self.render)
            .field("target_format", &self.target_format)
            .field("policy", &self.policy)
            .field("compiler", &self.compiler)
            .finish()
    }
}

/// Pre-built record bindings for both directions plus the unit-count uniform.
struct FeedbackCapture {
    dispatch: wgpu::Buffer,
    front_to_back: wgpu::BindGroup,
    back_to_front: wgpu::BindGroup,
}

impl FeedbackCapture {
    fn new(
        ctx: &GpuContext,
        layout: &wgpu::BindGroupLayout,
        buffers: &UnitBufferPair,
        units: u32,
    ) -> Self {
        let uniform = [units, 0, 0, 0];
        let dispatch = ctx
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("feedback dispatch"),
                contents: bytemuck::cast_slice(&uniform),
                usage: wgpu::BufferUsages::UNIFORM,
            });

        let group = |source: BufferSide, label: &str| {
            ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(label),
                layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: buffers.get(source).buffer().as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: buffers.get(source.other()).buffer().as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: dispatch.as_entire_binding(),
                    },
                ],
            })
        };
        let front_to_back = group(BufferSide::Front, "feedback front->back");
        let back_to_front = group(BufferSide::Back, "feedback back->front");

        Self {
            dispatch,
            front_to_back,
            back_to_front,
        }
    }

    fn reading(&self, source: BufferSide) -> &wgpu::BindGroup {
        match source {
            BufferSide::Front => &self.front_to_back,
            BufferSide::Back => &self.back_to_front,
        }
    }
}

/// Owns the record buffers and both programs of one simulation.
///
/// Every GPU resource is released by [`FeedbackComputer::destroy`], which
/// consumes the computer; a second call cannot compile:
///
/// ```compile_fail
/// fn teardown(computer: feedback::FeedbackComputer) {
///     computer.destroy();
///     computer.destroy();
/// }
/// ```
pub struct FeedbackComputer {
    ctx: GpuContext,
    units: u32,
    layout: StructLayout,
    buffers: UnitBufferPair,
    update: UpdateProgram,
    render: RenderProgram,
    capture: FeedbackCapture,
    update_params: ParamBlock,
    render_params: ParamBlock,
    target_format: wgpu::TextureFormat,
    diagnostics: Vec<Diagnostic>,
    iteration: u64,
    render_source: Option<BufferSide>,
}

impl FeedbackComputer {
    /// Validates the description, compiles both programs and seeds both
    /// record buffers with the same initial data. The iteration counter
    /// starts at zero; nothing runs until the first [`step`](Self::step).
    pub fn new(ctx: &GpuContext, description: ComputerDescription) -> Result<Self> {
        let ComputerDescription {
            units,
            fields,
            mut initializer,
            initial,
            update,
            render,
            target_format,
            policy,
            compiler,
        } = description;

        if units == 0 {
            return Err(FeedbackError::ZeroUnits);
        }
        let limits = ctx.device.limits();
        let max_units = limits
            .max_compute_workgroups_per_dimension
            .saturating_mul(WORKGROUP_SIZE);
        if units > max_units {
            return Err(FeedbackError::TooManyUnits {
                units,
                max: max_units,
            });
        }
        let update = update.ok_or(FeedbackError::MissingStep("update"))?;
        let render = render.ok_or(FeedbackError::MissingStep("render"))?;

        let layout = StructLayout::new(fields)?;
        check_record_capacity(&layout, units, &limits)?;
        let update_params = ParamLayout::new(update.params.iter().cloned())?;
        let render_params = ParamLayout::new(render.params.iter().cloned())?;

        let init = initializer
            .as_deref_mut()
            .map(|init| init as &mut dyn FnMut(u32, &mut [u8]));
        let data = seed_records(&layout, units, initial, init)?;
        let buffers = UnitBufferPair::allocate(ctx, &layout, units, &data)?;

        let mut update_params = ParamBlock::new(ctx, ParamScope::Update, update_params);
        let mut render_params = ParamBlock::new(ctx, ParamScope::Render, render_params);
        for (name, bytes) in &update.values {
            update_params.set_bytes(ctx, name, bytes)?;
        }
        for (name, bytes) in &render.values {
            render_params.set_bytes(ctx, name, bytes)?;
        }

        let options = ProgramOptions {
            compiler,
            target_format,
        };
        let mut sink = DiagnosticSink::new(policy);
        let update_program = UpdateProgram::build(
            ctx,
            &layout,
            StepSource {
                params: &update_params,
                glsl: update.glsl(),
            },
            &options,
            &mut sink,
        )?;
        let render_program = RenderProgram::build(
            ctx,
            &layout,
            &buffers,
            StepSource {
                params: &render_params,
                glsl: render.glsl(),
            },
            &options,
            &mut sink,
        )?;

        let capture = FeedbackCapture::new(ctx, &update_program.records_layout, &buffers, units);
        let diagnostics = sink.into_diagnostics();

        info!(
            units,
            record_size = layout.record_size(),
            fields = layout.fields().len(),
            diagnostics = diagnostics.len(),
            "feedback computer ready"
        );

        Ok(Self {
            ctx: ctx.clone(),
            units,
            layout,
            buffers,
            update: update_program,
            render: render_program,
            capture,
            update_params,
            render_params,
            target_format,
            diagnostics,
            iteration: 0,
            render_source: None,
        })
    }

    /// Runs the update kernel `steps` times reading `source` and writing
    /// `destination`. Every pass reads the same source, so repeated passes
    /// rewrite the same result.
    pub fn advance(&mut self, source: BufferSide, destination: BufferSide, steps: u32) -> Result<()> {
        if source == destination {
            return Err(FeedbackError::AliasedBuffers(source.label()));
        }
        let mut encoder = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("feedback advance"),
            });
        let groups = self.units.div_ceil(WORKGROUP_SIZE);
        for _ in 0..steps {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("feedback update"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.update.pipeline);
            pass.set_bind_group(0, &self.update.params_group, &[]);
            pass.set_bind_group(1, self.capture.reading(source), &[]);
            pass.dispatch_workgroups(groups, 1, 1);
        }
        self.ctx.queue.submit(std::iter::once(encoder.finish()));
        trace!(
            source = source.label(),
            destination = destination.label(),
            steps,
            "advanced"
        );
        Ok(())
    }

    /// Clears `target` to transparent black and draws one additive point
    /// per unit from `source`.
    pub fn render(&mut self, source: BufferSide, target: &wgpu::TextureView) {
        let mut encoder = self
            .ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("feedback render"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("feedback points"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: target,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&self.render.pipeline);
            pass.set_bind_group(0, &self.render.params_group, &[]);
            pass.set_vertex_buffer(0, self.buffers.get(source).buffer().slice(..));
            pass.draw(0..self.units, 0..1);
        }
        self.ctx.queue.submit(std::iter::once(encoder.finish()));
    }

    /// One tick: update into the idle buffer, render it, bump the counter.
    pub fn step(&mut self, target: &wgpu::TextureView) -> Result<()> {
        let source = self.latest();
        let destination = source.other();
        self.advance(source, destination, 1)?;
        self.render(destination, target);
        self.render_source = Some(destination);
        self.iteration += 1;
        Ok(())
    }

    /// Releases both record buffers, both param blocks and the capture
    /// bindings.
    pub fn destroy(self) {
        let FeedbackComputer {
            buffers,
            capture,
            update_params,
            render_params,
            iteration,
            ..
        } = self;
        capture.dispatch.destroy();
        update_params.release();
        render_params.release();
        buffers.release();
        debug!(iteration, "feedback computer destroyed");
    }

    /// Writes a uniform param declared by the update or render step.
    pub fn set_param<T: Pod>(&mut self, scope: ParamScope, name: &str, value: &T) -> Result<()> {
        let block = match scope {
            ParamScope::Update => &mut self.update_params,
            ParamScope::Render => &mut self.render_params,
        };
        block.set(&self.ctx, name, value)
    }

    pub fn has_param(&self, scope: ParamScope, name: &str) -> bool {
        self.param_type(scope, name).is_some()
    }

    /// Declared type of a param, if the step declares it.
    pub fn param_type(&self, scope: ParamScope, name: &str) -> Option<FieldType> {
        let block = match scope {
            ParamScope::Update => &self.update_params,
            ParamScope::Render => &self.render_params,
        };
        block.layout().slot(name).map(|slot| slot.ty)
    }

    /// Blocks until the GPU is idle and returns the raw records of `side`.
    pub fn read_records(&self, side: BufferSide) -> Result<Vec<u8>> {
        self.buffers.get(side).read_back(&self.ctx)
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn units(&self) -> u32 {
        self.units
    }

    pub fn layout(&self) -> &StructLayout {
        &self.layout
    }

    pub fn buffers(&self) -> &UnitBufferPair {
        &self.buffers
    }

    pub fn context(&self) -> &GpuContext {
        &self.ctx
    }

    pub fn target_format(&self) -> wgpu::TextureFormat {
        self.target_format
    }

    /// Compiler and linker output collected under [`DiagnosticPolicy::Warn`].
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Side drawn by the most recent step; `None` before the first step.
    pub fn render_source(&self) -> Option<BufferSide> {
        self.render_source
    }

    /// Side holding the newest records.
    pub fn latest(&self) -> BufferSide {
        side_for_iteration(self.iteration)
    }
}

impl fmt::Debug for FeedbackComputer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedbackComputer")
            .field("units", &self.units)
            .field("layout", &self.layout)
            .field("iteration", &self.iteration)
            .field("render_source", &self.render_source)
            .field("diagnostics", &self.diagnostics.len())
            .finish_non_exhaustive()
    }
}

/// Each record buffer is bound whole as a storage buffer, so it must fit
/// both the binding limit and the buffer limit of the device.
pub(crate) fn check_record_capacity(
    layout: &StructLayout,
    units: u32,
    limits: &wgpu::Limits,
) -> Result<()> {
    let bytes = u64::from(units) * layout.record_size();
    let max = u64::from(limits.max_storage_buffer_binding_size).min(limits.max_buffer_size);
    if bytes > max {
        return Err(FeedbackError::RecordBufferTooLarge { units, bytes, max });
    }
    Ok(())
}

/// Front after an even number of steps, back after an odd number.
pub(crate) fn side_for_iteration(iteration: u64) -> BufferSide {
    if iteration % 2 == 0 {
        BufferSide::Front
    } else {
        BufferSide::Back
    }
}

fn seed_records(
    layout: &StructLayout,
    units: u32,
    initial: Option<Vec<u8>>,
    initializer: Option<&mut dyn FnMut(u32, &mut [u8])>,
) -> Result<Vec<u8>> {
    let Some(mut data) = initial else {
        return Ok(crate::gpu::initial_records(layout, units, initializer));
    };
    let expected = u64::from(units) * layout.record_size();
    if data.len() as u64 != expected {
        return Err(FeedbackError::InitialDataSize {
            expected,
            actual: data.len() as u64,
        });
    }
    if let Some(init) = initializer {
        let record_size = layout.record_size() as usize;
        for (index, record) in data.chunks_exact_mut(record_size).enumerate() {
            init(index as u32, record);
        }
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_capacity_honours_binding_and_buffer_limits() {
        let layout = StructLayout::new([("a", "vec4"), ("b", "vec4"), ("c", "vec4"), ("d", "vec4")])
            .unwrap();
        let limits = wgpu::Limits {
            max_storage_buffer_binding_size: 128 << 20,
            max_buffer_size: 256 << 20,
            ..wgpu::Limits::default()
        };
        let fitting = (128 << 20) / 64;
        assert!(check_record_capacity(&layout, fitting, &limits).is_ok());
        match check_record_capacity(&layout, fitting + 1, &limits) {
            Err(FeedbackError::RecordBufferTooLarge { units, bytes, max }) => {
                assert_eq!(units, fitting + 1);
                assert_eq!(bytes, 134_217_792);
                assert_eq!(max, 134_217_728);
            }
            other => panic!("expected RecordBufferTooLarge, got {other:?}"),
        }

        let small_buffers = wgpu::Limits {
            max_buffer_size: 1024,
            ..limits
        };
        assert!(check_record_capacity(&layout, 16, &small_buffers).is_ok());
        assert!(matches!(
            check_record_capacity(&layout, 17, &small_buffers),
            Err(FeedbackError::RecordBufferTooLarge { max: 1024, .. })
        ));
    }

    #[test]
    fn parity_alternates_every_iteration() {
        for k in 0..16u64 {
            let expected = if k % 2 == 0 {
                BufferSide::Front
            } else {
                BufferSide::Back
            };
            assert_eq!(side_for_iteration(k), expected);
            assert_eq!(side_for_iteration(k + 1), expected.other());
        }
    }

    #[test]
    fn seed_runs_initializer_over_explicit_bytes() {
        let layout = StructLayout::new([("v", "float")]).unwrap();
        let bytes = bytemuck::cast_slice(&[1.0f32, 2.0, 3.0]).to_vec();
        let doubled: &mut dyn FnMut(u32, &mut [u8]) = &mut |_, record| {
            let value: f32 = bytemuck::pod_read_unaligned(record);
            record.copy_from_slice(bytemuck::bytes_of(&(value * 2.0)));
        };
        let data = seed_records(&layout, 3, Some(bytes), Some(doubled)).unwrap();
        let values: Vec<f32> = data
            .chunks_exact(4)
            .map(bytemuck::pod_read_unaligned)
            .collect();
        assert_eq!(values, [2.0, 4.0, 6.0]);
    }

    #[test]
    fn seed_rejects_mismatched_lengths() {
        let layout = StructLayout::new([("pos", "vec2"), ("life", "float")]).unwrap();
        let err = seed_records(&layout, 10, Some(vec![0; 100]), None).unwrap_err();
        assert!(matches!(
            err,
            FeedbackError::InitialDataSize {
                expected: 120,
                actual: 100
            }
        ));
    }

    #[test]
    fn seed_defaults_to_zeroed_records() {
        let layout = StructLayout::new([("cell", "ivec3")]).unwrap();
        let data = seed_records(&layout, 5, None, None).unwrap();
        assert_eq!(data, vec![0u8; 60]);
    }

    #[test]
    fn step_program_keeps_param_order() {
        let step = StepProgram::new("void main() {}")
            .param("time", "float")
            .param("wind", "vec2");
        let names: Vec<_> = step.params().iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, ["time", "wind"]);
    }
}
