use crate::compile::{compile_vertex_shader, FullscreenProgram};
use crate::decoder::MetadataDecoder;
use crate::demux::{TextureDemuxer, COLOR_FORMAT};
use crate::gpu::fullscreen::FullscreenPass;
use crate::gpu::{GpuContext, GpuResource, Surface};
use crate::types::Metadata;

pub const DEFAULT_DELAY_SIZE: (u32, u32) = (1920, 1080);

/// Anything that can present the composite frame of the current tick.
///
/// Frames must be `Rgba8Unorm` textures created with `TEXTURE_BINDING`.
pub trait FrameSource {
    fn current_frame(&self) -> Option<&wgpu::Texture>;
}

impl FrameSource for Option<wgpu::Texture> {
    fn current_frame(&self) -> Option<&wgpu::Texture> {
        self.as_ref()
    }
}

impl FrameSource for wgpu::Texture {
    fn current_frame(&self) -> Option<&wgpu::Texture> {
        Some(self)
    }
}

/// Depth-1 queue holding a copy of the previous tick's frame.
pub struct FrameDelay {
    size: (u32, u32),
    surface: Option<Surface>,
    filled: bool,
    blit: Option<(FullscreenPass, wgpu::Buffer)>,
}

impl FrameDelay {
    pub fn new(size: (u32, u32)) -> Self {
        Self {
            size: (size.0.max(1), size.1.max(1)),
            surface: None,
            filled: false,
            blit: None,
        }
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        !self.filled
    }

    /// Frame pushed on the previous tick, if any.
    pub fn previous(&self) -> Option<&wgpu::Texture> {
        if !self.filled {
            return None;
        }
        self.surface.as_ref().map(|surface| &surface.texture)
    }

    /// Copies `frame` into the delay surface, rescaling when sizes differ.
    pub fn push(&mut self, gpu: &GpuContext, frame: &wgpu::Texture) {
        let size = self.size;
        let surface = self.surface.get_or_insert_with(|| {
            Surface::new(
                &gpu.device,
                "frame delay",
                size,
                COLOR_FORMAT,
                wgpu::TextureUsages::RENDER_ATTACHMENT
                    | wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_SRC,
            )
        });
        let (blit, params) = self.blit.get_or_insert_with(|| {
            let vertex_module = compile_vertex_shader(&gpu.device);
            let pass = FullscreenPass::new(
                &gpu.device,
                &vertex_module,
                FullscreenProgram::Blit,
                COLOR_FORMAT,
                wgpu::FilterMode::Linear,
            );
            let params = gpu.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("blit params"),
                size: std::mem::size_of::<crate::demux::DemuxParams>() as u64,
                usage: wgpu::BufferUsages::UNIFORM,
                mapped_at_creation: false,
            });
            (pass, params)
        });

        let source_view = frame.create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = gpu.create_encoder("frame delay encoder");
        blit.encode(&gpu.device, &mut encoder, &source_view, params, &surface.view);
        gpu.submit(encoder);
        self.filled = true;
    }

    pub fn clear(&mut self) {
        self.filled = false;
    }

    pub fn release(&mut self) {
        if let Some(surface) = self.surface.take() {
            surface.release();
        }
        self.filled = false;
    }
}

/// Outcome of one [`VideoFeeder::update`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeedOutcome {
    /// The source had no frame; nothing changed.
    NoFrame,
    /// Metadata decoded and the frame queued; nothing was demuxed yet.
    Primed,
    /// The previous frame was demuxed with the current metadata.
    Demuxed,
}

/// Per-tick driver: decode the current frame, demux the delayed one.
///
/// Demuxing lags decoding by one tick so the metadata readback of the current
/// frame is available before the frame it describes reaches the demuxer.
pub struct VideoFeeder {
    decoder: MetadataDecoder,
    demuxer: TextureDemuxer,
    delay: FrameDelay,
}

impl Default for VideoFeeder {
    fn default() -> Self {
        Self::new(DEFAULT_DELAY_SIZE)
    }
}

impl VideoFeeder {
    pub fn new(delay_size: (u32, u32)) -> Self {
        Self {
            decoder: MetadataDecoder::new(),
            demuxer: TextureDemuxer::new(),
            delay: FrameDelay::new(delay_size),
        }
    }

    pub fn update<S>(&mut self, gpu: &GpuContext, source: &S) -> FeedOutcome
    where
        S: FrameSource + ?Sized,
    {
        let Some(frame) = source.current_frame() else {
            tracing::trace!("no current frame; skipping tick");
            return FeedOutcome::NoFrame;
        };

        self.decoder.decode(gpu, frame);

        let outcome = match self.delay.previous() {
            Some(previous) => {
                let metadata = self.decoder.metadata();
                self.demuxer.demux(gpu, previous, &metadata);
                FeedOutcome::Demuxed
            }
            None => FeedOutcome::Primed,
        };

        self.delay.push(gpu, frame);
        outcome
    }

    /// Runs two updates so the demuxed surfaces reflect `source`'s current
    /// frame, e.g. right after a seek.
    pub fn settle<S>(&mut self, gpu: &GpuContext, source: &S) -> FeedOutcome
    where
        S: FrameSource + ?Sized,
    {
        self.update(gpu, source);
        self.update(gpu, source)
    }

    /// Forgets the delayed frame; the next update only primes the queue.
    pub fn reset(&mut self) {
        self.delay.clear();
    }

    pub fn metadata(&self) -> Metadata {
        self.decoder.metadata()
    }

    pub fn decoder(&self) -> &MetadataDecoder {
        &self.decoder
    }

    pub fn demuxer(&self) -> &TextureDemuxer {
        &self.demuxer
    }

    pub fn delay(&self) -> &FrameDelay {
        &self.delay
    }

    pub fn release(&mut self) {
        self.decoder.release();
        self.demuxer.release();
        self.delay.release();
    }
}
