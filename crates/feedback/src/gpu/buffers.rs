use tracing::debug;
use wgpu::util::DeviceExt;

use crate::error::{FeedbackError, Result};
use crate::layout::StructLayout;

use super::context::GpuContext;

/// Which of the two record buffers an operation refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferSide {
    Front,
    Back,
}

impl BufferSide {
    pub fn other(self) -> Self {
        match self {
            BufferSide::Front => BufferSide::Back,
            BufferSide::Back => BufferSide::Front,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            BufferSide::Front => "front",
            BufferSide::Back => "back",
        }
    }
}

/// One GPU buffer of `units * record_size` bytes plus the vertex binding
/// that maps every struct field onto its input slot.
#[derive(Debug)]
pub struct UnitBuffer {
    buffer: wgpu::Buffer,
    byte_len: u64,
    stride: u64,
    attributes: Vec<wgpu::VertexAttribute>,
}

impl UnitBuffer {
    /// Creates the buffer seeded with `initial`, which must hold exactly
    /// `units * layout.record_size()` bytes.
    pub fn allocate(
        ctx: &GpuContext,
        layout: &StructLayout,
        units: u32,
        initial: &[u8],
        side: BufferSide,
    ) -> Result<Self> {
        let expected = u64::from(units) * layout.record_size();
        if initial.len() as u64 != expected {
            return Err(FeedbackError::InitialDataSize {
                expected,
                actual: initial.len() as u64,
            });
        }

        let buffer = ctx
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(match side {
                    BufferSide::Front => "front unit buffer",
                    BufferSide::Back => "back unit buffer",
                }),
                contents: initial,
                usage: wgpu::BufferUsages::VERTEX
                    | wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_SRC
                    | wgpu::BufferUsages::COPY_DST,
            });
        debug!(side = side.label(), bytes = expected, units, "allocated unit buffer");

        Ok(Self {
            buffer,
            byte_len: expected,
            stride: layout.record_size(),
            attributes: layout.vertex_attributes(),
        })
    }

    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    pub fn byte_len(&self) -> u64 {
        self.byte_len
    }

    /// Binding descriptor for this buffer: stride is always the record size.
    pub fn vertex_layout(&self) -> wgpu::VertexBufferLayout<'_> {
        wgpu::VertexBufferLayout {
            array_stride: self.stride,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &self.attributes,
        }
    }

    /// Copies the buffer contents back to the host, blocking until the GPU
    /// has finished every previously submitted write.
    pub fn read_back(&self, ctx: &GpuContext) -> Result<Vec<u8>> {
        let staging = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("unit readback staging"),
            size: self.byte_len,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("unit readback"),
            });
        encoder.copy_buffer_to_buffer(&self.buffer, 0, &staging, 0, self.byte_len);
        ctx.queue.submit(std::iter::once(encoder.finish()));

        let bytes = map_and_copy(ctx, &staging)?;
        staging.destroy();
        Ok(bytes)
    }

    pub(crate) fn release(self) {
        self.buffer.destroy();
    }
}

/// Maps a `MAP_READ` buffer and copies its full contents out.
pub(crate) fn map_and_copy(ctx: &GpuContext, staging: &wgpu::Buffer) -> Result<Vec<u8>> {
    let slice = staging.slice(..);
    let (sender, receiver) = crossbeam_channel::bounded(1);
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });
    ctx.device.poll(wgpu::PollType::Wait)?;
    receiver
        .recv()
        .map_err(|_| FeedbackError::ReadbackAborted)??;

    let bytes = slice.get_mapped_range().to_vec();
    staging.unmap();
    Ok(bytes)
}

/// Front and back record buffers, both seeded from the same initial data.
#[derive(Debug)]
pub struct UnitBufferPair {
    front: UnitBuffer,
    back: UnitBuffer,
}

impl UnitBufferPair {
    pub fn allocate(
        ctx: &GpuContext,
        layout: &StructLayout,
        units: u32,
        initial: &[u8],
    ) -> Result<Self> {
        Ok(Self {
            front: UnitBuffer::allocate(ctx, layout, units, initial, BufferSide::Front)?,
            back: UnitBuffer::allocate(ctx, layout, units, initial, BufferSide::Back)?,
        })
    }

    pub fn get(&self, side: BufferSide) -> &UnitBuffer {
        match side {
            BufferSide::Front => &self.front,
            BufferSide::Back => &self.back,
        }
    }

    pub(crate) fn release(self) {
        self.front.release();
        self.back.release();
    }
}

/// Builds the initial record bytes, calling `initializer` once per unit with
/// a window of exactly one record. Units the initializer does not touch stay
/// zeroed.
pub fn initial_records(
    layout: &StructLayout,
    units: u32,
    initializer: Option<&mut dyn FnMut(u32, &mut [u8])>,
) -> Vec<u8> {
    let record_size = layout.record_size() as usize;
    let mut data = vec![0u8; record_size * units as usize];
    if let Some(init) = initializer {
        for (index, record) in data.chunks_exact_mut(record_size).enumerate() {
            init(index as u32, record);
        }
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_other_flips() {
        assert_eq!(BufferSide::Front.other(), BufferSide::Back);
        assert_eq!(BufferSide::Back.other(), BufferSide::Front);
    }

    #[test]
    fn initial_records_cover_every_unit_once() {
        let layout = StructLayout::new([("pos", "vec2"), ("life", "float")]).unwrap();
        let mut calls = Vec::new();
        let init: &mut dyn FnMut(u32, &mut [u8]) = &mut |index, record| {
            assert_eq!(record.len(), 12);
            calls.push(index);
            record[8..12].copy_from_slice(&(index as f32).to_le_bytes());
        };
        let data = initial_records(&layout, 4, Some(init));
        assert_eq!(data.len(), 48);
        assert_eq!(calls, [0, 1, 2, 3]);
        let lives: Vec<f32> = data
            .chunks_exact(12)
            .map(|record| f32::from_le_bytes(record[8..12].try_into().unwrap()))
            .collect();
        assert_eq!(lives, [0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn initial_records_default_to_zero() {
        let layout = StructLayout::new([("v", "vec4")]).unwrap();
        for units in [1u32, 7, 100] {
            let data = initial_records(&layout, units, None);
            assert_eq!(data.len() as u64, u64::from(units) * layout.record_size());
            assert!(data.iter().all(|byte| *byte == 0));
        }
    }
}
