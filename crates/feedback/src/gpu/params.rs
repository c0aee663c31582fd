use bytemuck::Pod;

use crate::error::{FeedbackError, Result};
use crate::layout::ParamLayout;

use super::context::GpuContext;

/// Which step's uniform block a parameter belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamScope {
    Update,
    Render,
}

impl ParamScope {
    pub fn label(self) -> &'static str {
        match self {
            ParamScope::Update => "update",
            ParamScope::Render => "render",
        }
    }
}

/// Host mirror and GPU buffer of one step's `Params` uniform block.
///
/// Writes land in the mirror first and go through the queue in one
/// `write_buffer` call, so the GPU sees every slot updated together.
pub(crate) struct ParamBlock {
    scope: ParamScope,
    layout: ParamLayout,
    mirror: Vec<u8>,
    buffer: Option<wgpu::Buffer>,
}

impl ParamBlock {
    pub fn new(ctx: &GpuContext, scope: ParamScope, layout: ParamLayout) -> Self {
        let buffer = (!layout.is_empty()).then(|| {
            ctx.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(match scope {
                    ParamScope::Update => "update params",
                    ParamScope::Render => "render params",
                }),
                size: layout.size(),
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        });
        Self {
            scope,
            mirror: vec![0; layout.size() as usize],
            layout,
            buffer,
        }
    }

    pub fn layout(&self) -> &ParamLayout {
        &self.layout
    }

    pub fn buffer(&self) -> Option<&wgpu::Buffer> {
        self.buffer.as_ref()
    }

    /// Stores `value` in the slot for `name` and uploads the block.
    pub fn set<T: Pod>(&mut self, ctx: &GpuContext, name: &str, value: &T) -> Result<()> {
        self.set_bytes(ctx, name, bytemuck::bytes_of(value))
    }

    pub fn set_bytes(&mut self, ctx: &GpuContext, name: &str, bytes: &[u8]) -> Result<()> {
        self.stage(name, bytes)?;
        if let Some(buffer) = &self.buffer {
            ctx.queue.write_buffer(buffer, 0, &self.mirror);
        }
        Ok(())
    }

    fn stage(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        let slot = self
            .layout
            .slot(name)
            .ok_or_else(|| FeedbackError::UnknownParam {
                scope: self.scope.label(),
                name: name.to_string(),
            })?;
        let expected = slot.ty.total_bytes() as usize;
        if bytes.len() != expected {
            return Err(FeedbackError::ParamSize {
                name: name.to_string(),
                expected,
                actual: bytes.len(),
            });
        }
        let offset = slot.offset as usize;
        self.mirror[offset..offset + expected].copy_from_slice(bytes);
        Ok(())
    }

    pub fn release(self) {
        if let Some(buffer) = self.buffer {
            buffer.destroy();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detached(layout: ParamLayout) -> ParamBlock {
        ParamBlock {
            scope: ParamScope::Update,
            mirror: vec![0; layout.size() as usize],
            layout,
            buffer: None,
        }
    }

    #[test]
    fn stage_writes_at_std140_offsets() {
        let layout = ParamLayout::new([("time", "float"), ("gravity", "vec3")]).unwrap();
        let mut block = detached(layout);
        block.stage("time", bytemuck::bytes_of(&1.5f32)).unwrap();
        block
            .stage("gravity", bytemuck::bytes_of(&[0.0f32, -9.8, 0.0]))
            .unwrap();

        let time: f32 = bytemuck::pod_read_unaligned(&block.mirror[0..4]);
        let gravity: [f32; 3] = bytemuck::pod_read_unaligned(&block.mirror[16..28]);
        assert_eq!(time, 1.5);
        assert_eq!(gravity, [0.0, -9.8, 0.0]);
    }

    #[test]
    fn stage_rejects_unknown_names_and_wrong_sizes() {
        let layout = ParamLayout::new([("wind", "vec2")]).unwrap();
        let mut block = detached(layout);
        assert!(matches!(
            block.stage("gust", bytemuck::bytes_of(&1.0f32)),
            Err(FeedbackError::UnknownParam { scope: "update", .. })
        ));
        assert!(matches!(
            block.stage("wind", bytemuck::bytes_of(&1.0f32)),
            Err(FeedbackError::ParamSize {
                expected: 8,
                actual: 4,
                ..
            })
        ));
    }
}
