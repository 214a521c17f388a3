use bytemuck::{Pod, Zeroable};

use crate::compile::{compile_vertex_shader, FullscreenProgram};
use crate::gpu::fullscreen::FullscreenPass;
use crate::gpu::{Allocation, GpuContext, ResizePolicy, ResourceCache, Surface};
use crate::layout::CompositeLayout;
use crate::types::Metadata;

pub const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
/// Half-float depth surface; renderable on downlevel and software adapters.
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R16Float;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum SurfaceKind {
    Color,
    Depth,
}

/// std140 mirror of the `DemuxParams` uniform block.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub(crate) struct DemuxParams {
    pub depth_range: [f32; 4],
}

struct DemuxPasses {
    color: FullscreenPass,
    depth: FullscreenPass,
    params: wgpu::Buffer,
}

/// Splits a composite frame into its color and depth surfaces.
///
/// Surfaces are sized from the first frame demuxed and kept for the lifetime
/// of the demuxer; frames of another size are still demuxed into them.
#[derive(Default)]
pub struct TextureDemuxer {
    passes: Option<DemuxPasses>,
    surfaces: ResourceCache<SurfaceKind, (u32, u32), Surface>,
    size_warned: bool,
}

impl TextureDemuxer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn color_texture(&self) -> Option<&wgpu::Texture> {
        self.surfaces.get(SurfaceKind::Color).map(|surface| &surface.texture)
    }

    pub fn depth_texture(&self) -> Option<&wgpu::Texture> {
        self.surfaces.get(SurfaceKind::Depth).map(|surface| &surface.texture)
    }

    pub fn demux(&mut self, gpu: &GpuContext, source: &wgpu::Texture, metadata: &Metadata) {
        if source.width() < 2 || source.height() < 2 {
            tracing::debug!(
                width = source.width(),
                height = source.height(),
                "source too small to demux"
            );
            return;
        }

        let layout = CompositeLayout::new(source.width(), source.height());
        let usage = wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC;
        let (_, color_allocation) = self.surfaces.ensure(
            SurfaceKind::Color,
            layout.color_extent(),
            ResizePolicy::Pinned,
            |size| Surface::new(&gpu.device, "demux color", size, COLOR_FORMAT, usage),
        );
        self.surfaces.ensure(
            SurfaceKind::Depth,
            layout.depth_extent(),
            ResizePolicy::Pinned,
            |size| Surface::new(&gpu.device, "demux depth", size, DEPTH_FORMAT, usage),
        );
        match color_allocation {
            Allocation::Created => tracing::debug!(
                color = ?layout.color_extent(),
                depth = ?layout.depth_extent(),
                "allocated demux surfaces"
            ),
            Allocation::SizeMismatch if !self.size_warned => {
                self.size_warned = true;
                tracing::warn!(
                    source = ?(source.width(), source.height()),
                    surfaces = ?self.surfaces.size_of(SurfaceKind::Color),
                    "source resolution changed; demux surfaces keep their first size"
                );
            }
            _ => {}
        }

        let passes = self.passes.get_or_insert_with(|| {
            let vertex_module = compile_vertex_shader(&gpu.device);
            DemuxPasses {
                color: FullscreenPass::new(
                    &gpu.device,
                    &vertex_module,
                    FullscreenProgram::DemuxColor,
                    COLOR_FORMAT,
                    wgpu::FilterMode::Nearest,
                ),
                depth: FullscreenPass::new(
                    &gpu.device,
                    &vertex_module,
                    FullscreenProgram::DemuxDepth,
                    DEPTH_FORMAT,
                    wgpu::FilterMode::Nearest,
                ),
                params: gpu.device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("demux params"),
                    size: std::mem::size_of::<DemuxParams>() as u64,
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                }),
            }
        });

        let [near, far] = metadata.depth_range;
        let params = DemuxParams {
            depth_range: [near, far, 0.0, 0.0],
        };
        gpu.queue
            .write_buffer(&passes.params, 0, bytemuck::bytes_of(&params));

        let (Some(color), Some(depth)) = (
            self.surfaces.get(SurfaceKind::Color),
            self.surfaces.get(SurfaceKind::Depth),
        ) else {
            return;
        };

        let source_view = source.create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = gpu.create_encoder("demux encoder");
        passes
            .color
            .encode(&gpu.device, &mut encoder, &source_view, &passes.params, &color.view);
        passes
            .depth
            .encode(&gpu.device, &mut encoder, &source_view, &passes.params, &depth.view);
        gpu.submit(encoder);
    }

    /// Releases both surfaces. The next demux allocates them again.
    pub fn release(&mut self) {
        self.surfaces.clear();
        self.size_warned = false;
    }
}

impl Drop for TextureDemuxer {
    fn drop(&mut self) {
        self.release();
    }
}
