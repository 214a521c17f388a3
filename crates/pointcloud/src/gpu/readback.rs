//! Blocking GPU-to-host transfers and host-to-GPU uploads.

use anyhow::{anyhow, bail, Context, Result};
use half::f16;
use wgpu::util::DeviceExt;

use super::context::GpuContext;

/// Staging buffer reused across readbacks of the same size.
#[derive(Default)]
pub struct Readback {
    staging: Option<wgpu::Buffer>,
}

impl Readback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies the first `count` elements of `source` to the host, blocking until
    /// the GPU has finished every submitted command.
    pub fn read<T: bytemuck::Pod>(
        &mut self,
        gpu: &GpuContext,
        source: &wgpu::Buffer,
        count: usize,
    ) -> Result<Vec<T>> {
        let size = (count * std::mem::size_of::<T>()) as u64;
        if size == 0 {
            return Ok(Vec::new());
        }
        if size > source.size() {
            return Err(anyhow!(
                "readback of {size} bytes exceeds source buffer of {} bytes",
                source.size()
            ));
        }

        let reuse = self
            .staging
            .as_ref()
            .is_some_and(|staging| staging.size() == size);
        if !reuse {
            if let Some(previous) = self.staging.take() {
                previous.destroy();
            }
            self.staging = Some(gpu.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("readback staging"),
                size,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }));
        }
        let staging = self
            .staging
            .as_ref()
            .ok_or_else(|| anyhow!("readback staging buffer missing"))?;

        let mut encoder = gpu.create_encoder("readback encoder");
        encoder.copy_buffer_to_buffer(source, 0, staging, 0, size);
        gpu.submit(encoder);

        map_blocking(gpu, staging)?;
        let data = staging.slice(..).get_mapped_range();
        let result: Vec<T> = bytemuck::cast_slice(&data).to_vec();
        drop(data);
        staging.unmap();

        Ok(result)
    }

    pub fn release(&mut self) {
        if let Some(staging) = self.staging.take() {
            staging.destroy();
        }
    }
}

/// One-shot readback through a temporary staging buffer.
pub fn read_buffer<T: bytemuck::Pod>(
    gpu: &GpuContext,
    source: &wgpu::Buffer,
    count: usize,
) -> Result<Vec<T>> {
    let mut readback = Readback::new();
    let result = readback.read(gpu, source, count);
    readback.release();
    result
}

/// Uploads `data` into a new buffer of exactly its size.
pub fn create_buffer_init<T: bytemuck::Pod>(
    gpu: &GpuContext,
    label: &str,
    data: &[T],
    usage: wgpu::BufferUsages,
) -> wgpu::Buffer {
    gpu.device
        .create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytemuck::cast_slice(data),
            usage,
        })
}

/// Reads a 2D texture back row by row, stripping the copy row padding.
///
/// The texture must carry `COPY_SRC` and use an uncompressed format.
pub fn read_texture(gpu: &GpuContext, texture: &wgpu::Texture) -> Result<Vec<u8>> {
    let format = texture.format();
    let bytes_per_texel = format
        .block_copy_size(None)
        .ok_or_else(|| anyhow!("texture format {format:?} cannot be read back"))?;
    let width = texture.width();
    let height = texture.height();
    let unpadded = width * bytes_per_texel;
    let padded = unpadded.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
        * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

    let staging = gpu.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("texture readback staging"),
        size: u64::from(padded) * u64::from(height),
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = gpu.create_encoder("texture readback encoder");
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &staging,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    gpu.submit(encoder);

    map_blocking(gpu, &staging)?;
    let data = staging.slice(..).get_mapped_range();
    let mut pixels = Vec::with_capacity((unpadded * height) as usize);
    for row in data.chunks(padded as usize) {
        pixels.extend_from_slice(&row[..unpadded as usize]);
    }
    drop(data);
    staging.unmap();
    staging.destroy();

    Ok(pixels)
}

/// Reads a single-channel float texture (the demux depth surface) back as
/// `f32` values in row-major order.
pub fn read_depth_texture(gpu: &GpuContext, texture: &wgpu::Texture) -> Result<Vec<f32>> {
    let raw = read_texture(gpu, texture)?;
    depth_texels(texture.format(), &raw)
}

fn depth_texels(format: wgpu::TextureFormat, raw: &[u8]) -> Result<Vec<f32>> {
    match format {
        wgpu::TextureFormat::R16Float => Ok(raw
            .chunks_exact(2)
            .map(|bytes| f16::from_le_bytes([bytes[0], bytes[1]]).to_f32())
            .collect()),
        wgpu::TextureFormat::R32Float => Ok(raw
            .chunks_exact(4)
            .map(|bytes| f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            .collect()),
        other => bail!("texture format {other:?} is not a depth surface"),
    }
}

fn map_blocking(gpu: &GpuContext, staging: &wgpu::Buffer) -> Result<()> {
    let (sender, receiver) = crossbeam_channel::bounded(1);
    staging
        .slice(..)
        .map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
    gpu.device
        .poll(wgpu::PollType::Wait)
        .context("failed to wait for GPU readback")?;
    receiver
        .recv()
        .context("readback callback was dropped")?
        .context("failed to map readback buffer")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_float_texels_widen_to_f32() {
        let raw: Vec<u8> = [0.5f32, 1.0, 3.75, 0.0]
            .iter()
            .flat_map(|value| f16::from_f32(*value).to_le_bytes())
            .collect();
        let values = depth_texels(wgpu::TextureFormat::R16Float, &raw).unwrap();
        assert_eq!(values, vec![0.5, 1.0, 3.75, 0.0]);
    }

    #[test]
    fn color_formats_are_not_depth_surfaces() {
        assert!(depth_texels(wgpu::TextureFormat::Rgba8Unorm, &[0; 8]).is_err());
    }
}
