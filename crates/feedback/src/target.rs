use std::path::Path;

use tracing::info;

use crate::error::{FeedbackError, Result};
use crate::gpu::{map_and_copy, GpuContext};

const BYTES_PER_PIXEL: u32 = 4;

/// Headless colour target a computer can render into and read back.
#[derive(Debug)]
pub struct OffscreenTarget {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
    format: wgpu::TextureFormat,
}

impl OffscreenTarget {
    pub fn new(ctx: &GpuContext, width: u32, height: u32, format: wgpu::TextureFormat) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        let texture = ctx.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("offscreen target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            texture,
            view,
            width,
            height,
            format,
        }
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.format
    }

    /// Copies the target back as tightly packed RGBA8 rows, top row first.
    pub fn read_pixels(&self, ctx: &GpuContext) -> Result<Vec<u8>> {
        let swap_red_blue = match self.format {
            wgpu::TextureFormat::Rgba8Unorm | wgpu::TextureFormat::Rgba8UnormSrgb => false,
            wgpu::TextureFormat::Bgra8Unorm | wgpu::TextureFormat::Bgra8UnormSrgb => true,
            other => return Err(FeedbackError::UnsupportedReadback(other)),
        };

        let row_bytes = self.width * BYTES_PER_PIXEL;
        let padded_row = row_bytes.next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
        let staging = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("offscreen readback"),
            size: u64::from(padded_row) * u64::from(self.height),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("offscreen readback"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
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
        ctx.queue.submit(std::iter::once(encoder.finish()));

        let padded = map_and_copy(ctx, &staging)?;
        staging.destroy();

        let mut pixels = strip_row_padding(&padded, row_bytes as usize, padded_row as usize);
        if swap_red_blue {
            for pixel in pixels.chunks_exact_mut(BYTES_PER_PIXEL as usize) {
                pixel.swap(0, 2);
            }
        }
        Ok(pixels)
    }

    /// Reads the target back and writes it to `path` as PNG.
    pub fn export_png(&self, ctx: &GpuContext, path: &Path) -> Result<()> {
        let pixels = self.read_pixels(ctx)?;
        image::save_buffer_with_format(
            path,
            &pixels,
            self.width,
            self.height,
            image::ExtendedColorType::Rgba8,
            image::ImageFormat::Png,
        )?;
        info!(path = %path.display(), width = self.width, height = self.height, "exported frame");
        Ok(())
    }
}

fn strip_row_padding(padded: &[u8], row_bytes: usize, padded_row: usize) -> Vec<u8> {
    padded
        .chunks_exact(padded_row)
        .flat_map(|row| &row[..row_bytes])
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_row_padding_keeps_visible_bytes() {
        let padded: Vec<u8> = (0..2)
            .flat_map(|row| {
                let mut line = vec![row as u8 + 1; 8];
                line.extend(std::iter::repeat(0xAA).take(248));
                line
            })
            .collect();
        let rows = strip_row_padding(&padded, 8, 256);
        assert_eq!(rows.len(), 16);
        assert!(rows[..8].iter().all(|byte| *byte == 1));
        assert!(rows[8..].iter().all(|byte| *byte == 2));
    }
}
