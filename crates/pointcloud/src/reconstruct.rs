use anyhow::{anyhow, Result};
use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use crate::compile::{compile_wgsl, RECONSTRUCT_KERNEL_WGSL};
use crate::demux::TextureDemuxer;
use crate::gpu::{
    read_buffer, Allocation, Binding, BindingKind, DispatchDescriptor, GpuContext, KernelProgram,
    ResizePolicy, ResourceCache,
};
use crate::render::{PointRenderer, RenderOutcome, RenderView};
use crate::types::{Camera, Diagnostics};
use crate::POINT_STRIDE;

/// Edge length of the reconstruction workgroup grid before quality scaling.
const WORKGROUP_TILE: f32 = 32.0;

/// Number of points produced for a `width x height` depth map.
pub fn expected_point_count(quality: f32, width: u32, height: u32) -> u32 {
    if !(quality > 0.0) {
        return 0;
    }
    (quality.min(1.0) * width as f32 * height as f32).ceil() as u32
}

/// Workgroups dispatched for a `width x height` depth map.
pub fn dispatch_extents(quality: f32, width: u32, height: u32) -> [u32; 3] {
    if !(quality > 0.0) {
        return [0, 0, 1];
    }
    let quality = quality.min(1.0);
    let x = (width as f32 / WORKGROUP_TILE * quality).ceil() as u32;
    let y = (height as f32 / WORKGROUP_TILE * quality).ceil() as u32;
    [x.max(1), y.max(1), 1]
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum PointBuffer {
    Points,
    Colors,
}

/// Uniform block of the reconstruction kernel.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct UnprojectParams {
    inverse_view: [[f32; 4]; 4],
    ray_params: [f32; 4],
    quality: f32,
    height_ratio: f32,
    point_count: u32,
    _padding: u32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ReconstructOptions {
    /// Fraction of depth texels turned into points, `(0, 1]`.
    pub quality: f32,
    pub point_size: f32,
}

impl ReconstructOptions {
    pub fn new(quality: f32, point_size: f32) -> Self {
        Self {
            quality,
            point_size,
        }
    }
}

/// Demuxed surfaces and the camera a sample is reconstructed with.
#[derive(Clone, Copy)]
pub struct SampleInputs<'a> {
    pub color: &'a wgpu::Texture,
    pub depth: &'a wgpu::Texture,
    pub camera: &'a Camera,
}

impl<'a> SampleInputs<'a> {
    /// `None` until the demuxer has produced its first surfaces.
    pub fn from_demuxer(demuxer: &'a TextureDemuxer, camera: &'a Camera) -> Option<Self> {
        Some(Self {
            color: demuxer.color_texture()?,
            depth: demuxer.depth_texture()?,
            camera,
        })
    }
}

/// Host copy of the point buffer, captured only on request.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DebugSnapshot {
    pub points: Vec<Vec3>,
}

impl DebugSnapshot {
    /// Points for debug markers: at most `cap`, starting at `offset` and
    /// wrapping around the snapshot.
    pub fn gizmo_points(&self, offset: usize, cap: usize) -> impl Iterator<Item = Vec3> + '_ {
        let len = self.points.len();
        (0..len.min(cap)).map(move |index| self.points[(index + offset) % len])
    }
}

/// Result of one reconstruction pass.
#[derive(Clone, Debug, PartialEq)]
pub struct Sampled {
    pub points: u32,
    pub reallocated: bool,
    pub snapshot: Option<DebugSnapshot>,
}

/// Turns demuxed color/depth surfaces into world-space point and color buffers
/// and draws them.
pub struct PointCloudReconstructor {
    options: ReconstructOptions,
    program: Option<KernelProgram>,
    params: Option<wgpu::Buffer>,
    buffers: ResourceCache<PointBuffer, u32, wgpu::Buffer>,
    renderer: PointRenderer,
}

impl PointCloudReconstructor {
    pub fn new(options: ReconstructOptions) -> Self {
        Self {
            options,
            program: None,
            params: None,
            buffers: ResourceCache::new(),
            renderer: PointRenderer::new(options.point_size),
        }
    }

    pub fn options(&self) -> ReconstructOptions {
        self.options
    }

    pub fn set_quality(&mut self, quality: f32) {
        self.options.quality = quality;
    }

    pub fn set_point_size(&mut self, point_size: f32) {
        self.options.point_size = point_size;
        self.renderer.set_point_size(point_size);
    }

    pub fn points(&self) -> Option<&wgpu::Buffer> {
        self.buffers.get(PointBuffer::Points)
    }

    pub fn colors(&self) -> Option<&wgpu::Buffer> {
        self.buffers.get(PointBuffer::Colors)
    }

    /// Element count of the current point buffer.
    pub fn point_count(&self) -> u32 {
        self.buffers.size_of(PointBuffer::Points).unwrap_or(0)
    }

    /// Runs the unprojection kernel. Returns `None` when the pass was skipped.
    pub fn sample(
        &mut self,
        gpu: &GpuContext,
        inputs: &SampleInputs<'_>,
        diagnostics: Diagnostics,
    ) -> Option<Sampled> {
        let quality = self.options.quality;
        if !(quality > 0.0) {
            tracing::trace!(quality, "quality is not positive; skipping sample");
            return None;
        }

        let (width, height) = (inputs.depth.width(), inputs.depth.height());
        let expected = expected_point_count(quality, width, height);
        if expected == 0 {
            return None;
        }
        if u64::from(expected) > gpu.max_point_binding() {
            tracing::warn!(
                expected,
                limit = gpu.max_point_binding(),
                "point count exceeds the device storage binding limit; skipping sample"
            );
            return None;
        }

        let usage = wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC;
        let mut reallocated = false;
        for (kind, label) in [
            (PointBuffer::Points, "point positions"),
            (PointBuffer::Colors, "point colors"),
        ] {
            let (_, allocation) =
                self.buffers
                    .ensure(kind, expected, ResizePolicy::Recreate, |count| {
                        gpu.device.create_buffer(&wgpu::BufferDescriptor {
                            label: Some(label),
                            size: u64::from(count) * POINT_STRIDE,
                            usage,
                            mapped_at_creation: false,
                        })
                    });
            reallocated |= allocation != Allocation::Reused;
        }
        if reallocated {
            tracing::debug!(points = expected, width, height, quality, "allocated point buffers");
        }

        let camera = inputs.camera;
        let params = UnprojectParams {
            inverse_view: camera.inverse_view().to_cols_array_2d(),
            ray_params: camera.ray_params().to_array(),
            quality: quality.min(1.0),
            height_ratio: inputs.color.height() as f32 / height.max(1) as f32,
            point_count: expected,
            _padding: 0,
        };
        let params_buffer = self.params.get_or_insert_with(|| {
            gpu.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("unproject params"),
                size: std::mem::size_of::<UnprojectParams>() as u64,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        });
        gpu.queue
            .write_buffer(params_buffer, 0, bytemuck::bytes_of(&params));

        let program = self.program.get_or_insert_with(|| {
            let module = compile_wgsl(&gpu.device, "reconstruct kernel", RECONSTRUCT_KERNEL_WGSL);
            KernelProgram::new(
                &gpu.device,
                "reconstruct kernel",
                &module,
                &[
                    BindingKind::Texture,
                    BindingKind::Texture,
                    BindingKind::Storage { read_only: false },
                    BindingKind::Storage { read_only: false },
                    BindingKind::Uniform,
                ],
            )
        });

        let (Some(points), Some(colors)) = (
            self.buffers.get(PointBuffer::Points),
            self.buffers.get(PointBuffer::Colors),
        ) else {
            return None;
        };

        let depth_view = inputs
            .depth
            .create_view(&wgpu::TextureViewDescriptor::default());
        let color_view = inputs
            .color
            .create_view(&wgpu::TextureViewDescriptor::default());
        let dispatch = DispatchDescriptor {
            label: "reconstruct points",
            program,
            bindings: vec![
                Binding::Texture(&depth_view),
                Binding::Texture(&color_view),
                Binding::Buffer(points),
                Binding::Buffer(colors),
                Binding::Buffer(params_buffer),
            ],
            workgroups: dispatch_extents(quality, width, height),
        };
        if let Err(err) = dispatch.submit(gpu) {
            tracing::warn!(error = %err, "reconstruction dispatch failed");
            return None;
        }

        let snapshot = match diagnostics {
            Diagnostics::Off => None,
            Diagnostics::Snapshot => match read_buffer::<[f32; 3]>(gpu, points, expected as usize) {
                Ok(raw) => Some(DebugSnapshot {
                    points: raw.into_iter().map(Vec3::from).collect(),
                }),
                Err(err) => {
                    tracing::warn!(error = %err, "debug snapshot readback failed");
                    None
                }
            },
        };

        Some(Sampled {
            points: expected,
            reallocated,
            snapshot,
        })
    }

    /// Blocking copy of the current point and color buffers.
    pub fn read_back(&self, gpu: &GpuContext) -> Result<(Vec<[f32; 3]>, Vec<[f32; 3]>)> {
        let (Some(points), Some(colors)) = (self.points(), self.colors()) else {
            return Err(anyhow!("no point buffers allocated"));
        };
        let count = self.point_count() as usize;
        Ok((
            read_buffer(gpu, points, count)?,
            read_buffer(gpu, colors, count)?,
        ))
    }

    /// Draws an arbitrary point/color buffer pair with this reconstructor's
    /// material.
    pub fn render(
        &mut self,
        gpu: &GpuContext,
        points: &wgpu::Buffer,
        colors: &wgpu::Buffer,
        view: &RenderView<'_>,
    ) -> RenderOutcome {
        self.renderer.render(gpu, points, colors, view)
    }

    /// Draws the buffers produced by the last [`sample`](Self::sample).
    pub fn render_current(&mut self, gpu: &GpuContext, view: &RenderView<'_>) -> RenderOutcome {
        let (Some(points), Some(colors)) = (
            self.buffers.get(PointBuffer::Points),
            self.buffers.get(PointBuffer::Colors),
        ) else {
            return RenderOutcome::Empty;
        };
        self.renderer.render(gpu, points, colors, view)
    }

    /// Samples and immediately draws the fresh buffers.
    pub fn update(
        &mut self,
        gpu: &GpuContext,
        inputs: &SampleInputs<'_>,
        view: Option<&RenderView<'_>>,
        diagnostics: Diagnostics,
    ) -> Option<Sampled> {
        let sampled = self.sample(gpu, inputs, diagnostics)?;
        if let Some(view) = view {
            self.render_current(gpu, view);
        }
        Some(sampled)
    }

    /// Releases the point, color and indirect args buffers. Safe to call
    /// repeatedly and before anything was allocated.
    pub fn dispose(&mut self) {
        self.buffers.clear();
        self.renderer.release();
        if let Some(params) = self.params.take() {
            params.destroy();
        }
    }
}

impl Drop for PointCloudReconstructor {
    fn drop(&mut self) {
        self.dispose();
    }
}
