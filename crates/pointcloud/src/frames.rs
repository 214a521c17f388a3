use std::path::Path;

use anyhow::{Context, Result};
use image::RgbaImage;
use wgpu::util::{DeviceExt, TextureDataOrder};

use crate::demux::COLOR_FORMAT;
use crate::gpu::GpuContext;

/// Uploads a composite frame into a new texture usable as a [`crate::FrameSource`].
pub fn upload_frame(gpu: &GpuContext, label: &str, frame: &RgbaImage) -> wgpu::Texture {
    gpu.device.create_texture_with_data(
        &gpu.queue,
        &wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: frame.width(),
                height: frame.height(),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: COLOR_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        },
        TextureDataOrder::LayerMajor,
        frame.as_raw(),
    )
}

/// Overwrites an existing frame texture in place. Frames of another size are
/// ignored with a warning.
pub fn write_frame(gpu: &GpuContext, texture: &wgpu::Texture, frame: &RgbaImage) {
    if (texture.width(), texture.height()) != frame.dimensions() {
        tracing::warn!(
            texture = ?(texture.width(), texture.height()),
            frame = ?frame.dimensions(),
            "frame update ignored due to mismatched size"
        );
        return;
    }

    gpu.queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        frame.as_raw(),
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(frame.width() * 4),
            rows_per_image: Some(frame.height()),
        },
        wgpu::Extent3d {
            width: frame.width(),
            height: frame.height(),
            depth_or_array_layers: 1,
        },
    );
}

pub fn load_frame_image(path: &Path) -> Result<RgbaImage> {
    let image = image::open(path)
        .with_context(|| format!("failed to open frame at {}", path.display()))?;
    Ok(image.to_rgba8())
}
