//! Drives the reconstruction pipeline for the `live` and `capture` subcommands: resolves
//! configuration and CLI overrides, opens a headless GPU context and a frame source, then
//! either ticks the live loop or hands a capture session to the sampling driver.
//!
//! Types:
//!
//! - `Pipeline` bundles the GPU context, feeder and capture sampler shared by both modes.
//! - `CaptureSession` adapts the pipeline to the driver's `CaptureTarget` seam.
//!
//! Functions:
//!
//! - `run_live` and `run_capture` back the subcommands.
//! - `initialise_tracing` configures logging.

use std::path::Path;

use anyhow::{Context, Result};
use cloudconfig::CloudConfig;
use glam::{Mat4, Vec3};
use pointcloud::{
    Camera, CaptureSampler, Diagnostics, FeedOutcome, GpuContext, GpuOptions, OffscreenTarget,
    PointCloudReconstructor, ReconstructOptions, SampleInputs, VideoFeeder,
};
use sampling::{CaptureDriver, CaptureTarget, DriverSettings};
use tracing_subscriber::EnvFilter;

use crate::bootstrap::load_config;
use crate::cli::{CaptureArgs, GpuArgs, LiveArgs, ReconstructArgs};
use crate::export;
use crate::paths::AppPaths;
use crate::sources::{recorded_camera, Playback, Source};

const BACKGROUND: wgpu::Color = wgpu::Color {
    r: 0.02,
    g: 0.02,
    b: 0.03,
    a: 1.0,
};

pub fn initialise_tracing() {
    let default_filter = "warn,cloudcast=info,pointcloud=info,sampling=info,naga=error,wgpu=error,wgpu_core=error,wgpu_hal=error";
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

pub fn run_live(config_path: Option<&Path>, args: LiveArgs) -> Result<()> {
    let paths = AppPaths::discover()?;
    let mut config = load_config(&paths, config_path)?;
    apply_reconstruct_overrides(&mut config, &args.reconstruct);
    if args.diagnostics {
        config.diagnostics.enabled = true;
    }
    config.validate()?;

    let mut pipeline = Pipeline::new(&config, &args.gpu)?;
    let mut source = Source::new(&pipeline.gpu, Playback::from_args(&args.source)?);
    let target = OffscreenTarget::new(&pipeline.gpu, args.reconstruct.view_size);
    let viewer = viewer_camera(target.aspect());
    let diagnostics = if config.diagnostics.enabled {
        Diagnostics::Snapshot
    } else {
        Diagnostics::Off
    };

    tracing::info!(
        ticks = args.ticks,
        frame = ?source.frame_size(),
        fps = source.fps(),
        quality = config.reconstruction.quality,
        "starting live reconstruction"
    );

    let mut demuxed = 0u32;
    for tick in 0..args.ticks {
        source.present(&pipeline.gpu);
        if pipeline.feeder.update(&pipeline.gpu, &source) == FeedOutcome::Demuxed {
            demuxed += 1;
        }

        let recorded = recorded_camera(&pipeline.feeder.metadata(), source.frame_size());
        let inputs = SampleInputs::from_demuxer(pipeline.feeder.demuxer(), &recorded);
        let view = target.view(&viewer, Some(BACKGROUND));
        let snapshot =
            pipeline
                .sampler
                .update(&pipeline.gpu, inputs.as_ref(), Some(&view), diagnostics);

        if let Some(snapshot) = snapshot {
            let markers: Vec<Vec3> = snapshot
                .gizmo_points(config.diagnostics.gizmo_offset, config.diagnostics.gizmo_cap)
                .collect();
            let centroid = markers.iter().copied().sum::<Vec3>() / markers.len().max(1) as f32;
            tracing::debug!(
                tick,
                points = snapshot.points.len(),
                markers = markers.len(),
                centroid = ?centroid,
                "point snapshot"
            );
        }
        source.advance();
    }

    tracing::info!(
        ticks = args.ticks,
        demuxed,
        points = pipeline.sampler.reconstructor().point_count(),
        "live run finished"
    );

    if let Some(still) = args.reconstruct.still.as_deref() {
        let image = target.read_image(&pipeline.gpu)?;
        export::save_still(&paths.resolve_output(still), &image)?;
    }

    pipeline.release();
    Ok(())
}

pub fn run_capture(config_path: Option<&Path>, args: CaptureArgs) -> Result<()> {
    let paths = AppPaths::discover()?;
    let mut config = load_config(&paths, config_path)?;
    apply_reconstruct_overrides(&mut config, &args.reconstruct);
    if let Some(samples) = args.samples {
        config.capture.sample_count = samples;
    }
    if let Some(tolerance) = args.tolerance {
        config.capture.seek_tolerance = tolerance;
    }
    if let Some(policy) = args.missed_seek {
        config.capture.missed_seek = policy;
    }
    config.validate()?;

    let mut pipeline = Pipeline::new(&config, &args.gpu)?;
    let mut source = Source::new(&pipeline.gpu, Playback::from_args(&args.source)?);
    let driver = CaptureDriver::new(DriverSettings::from(&config.capture));

    let report = {
        let mut session = CaptureSession::new(&mut pipeline);
        driver
            .run(&mut source, &mut session)
            .context("capture session failed")?
    };

    println!(
        "captured {} points from {} frames ({} poses, {} missed seeks, {} unposed frames)",
        report.total_points,
        report.frames_sampled,
        report.poses.len(),
        report.missed.len(),
        report.skipped.len()
    );

    if let Some(path) = args.report.as_deref() {
        export::write_report(&paths.resolve_output(path), &report)?;
    }

    if let Some(path) = args.ply.as_deref() {
        if pipeline.sampler.replay().is_some() {
            let (points, colors) = pipeline.sampler.read_replay(&pipeline.gpu)?;
            export::write_ply(&paths.resolve_output(path), &points, &colors)?;
        } else {
            tracing::warn!("capture produced no replayable cloud; PLY export skipped");
        }
    }

    if let Some(still) = args.reconstruct.still.as_deref() {
        let target = OffscreenTarget::new(&pipeline.gpu, args.reconstruct.view_size);
        let viewer = viewer_camera(target.aspect());
        let view = target.view(&viewer, Some(BACKGROUND));
        pipeline
            .sampler
            .update(&pipeline.gpu, None, Some(&view), Diagnostics::Off);
        let image = target.read_image(&pipeline.gpu)?;
        export::save_still(&paths.resolve_output(still), &image)?;
    }

    pipeline.release();
    Ok(())
}

fn apply_reconstruct_overrides(config: &mut CloudConfig, args: &ReconstructArgs) {
    if let Some(quality) = args.quality {
        config.reconstruction.quality = quality;
    }
    if let Some(point_size) = args.point_size {
        config.reconstruction.point_size = point_size;
    }
}

fn gpu_options(args: &GpuArgs) -> GpuOptions {
    GpuOptions {
        power: args.gpu_power,
        memory: args.gpu_memory,
        allow_fallback: args.allow_software,
    }
}

/// Fixed observer looking at the origin from above and in front.
fn viewer_camera(aspect: f32) -> Camera {
    let world = Mat4::look_at_rh(Vec3::new(0.0, 1.6, 4.0), Vec3::ZERO, Vec3::Y).inverse();
    Camera::new(50f32.to_radians(), aspect, 0.05, 100.0).with_world(world)
}

struct Pipeline {
    gpu: GpuContext,
    feeder: VideoFeeder,
    sampler: CaptureSampler,
}

impl Pipeline {
    fn new(config: &CloudConfig, gpu_args: &GpuArgs) -> Result<Self> {
        let gpu = GpuContext::new_headless(gpu_options(gpu_args))?;
        tracing::info!(
            adapter = %gpu.adapter_profile.name,
            backend = ?gpu.adapter_profile.backend,
            software = gpu.adapter_profile.is_software(),
            "using GPU adapter"
        );
        let feeder = VideoFeeder::new((config.feeder.delay_width, config.feeder.delay_height));
        let reconstructor = PointCloudReconstructor::new(ReconstructOptions::new(
            config.reconstruction.quality,
            config.reconstruction.point_size,
        ));
        Ok(Self {
            gpu,
            feeder,
            sampler: CaptureSampler::new(reconstructor),
        })
    }

    fn release(&mut self) {
        self.sampler.dispose();
        self.feeder.release();
    }
}

/// Reconstruction side of an offline capture.
struct CaptureSession<'a> {
    pipeline: &'a mut Pipeline,
    camera: Option<Camera>,
}

impl<'a> CaptureSession<'a> {
    fn new(pipeline: &'a mut Pipeline) -> Self {
        Self {
            pipeline,
            camera: None,
        }
    }
}

impl CaptureTarget<Source> for CaptureSession<'_> {
    fn begin_sample(&mut self) {
        self.pipeline.sampler.begin_sample();
    }

    fn frame_ready(&mut self, source: &Source) {
        let pipeline = &mut *self.pipeline;
        source.present(&pipeline.gpu);
        self.camera = match pipeline.feeder.settle(&pipeline.gpu, source) {
            FeedOutcome::Demuxed => Some(recorded_camera(
                &pipeline.feeder.metadata(),
                source.frame_size(),
            )),
            outcome => {
                tracing::debug!(?outcome, "frame not demuxed after seek");
                None
            }
        };
    }

    fn camera_world(&self) -> Option<Mat4> {
        self.camera.map(|camera| camera.world)
    }

    fn sample_frame(&mut self) -> Option<usize> {
        let camera = self.camera?;
        let pipeline = &mut *self.pipeline;
        let inputs = SampleInputs::from_demuxer(pipeline.feeder.demuxer(), &camera)?;
        pipeline.sampler.sample_frame(&pipeline.gpu, &inputs)
    }

    fn end_sample(&mut self) -> usize {
        let pipeline = &mut *self.pipeline;
        pipeline
            .sampler
            .end_sample(&pipeline.gpu)
            .map(|summary| summary.points)
            .unwrap_or(0)
    }

    fn abort_sample(&mut self) {
        self.pipeline.sampler.abort_sample();
    }
}
