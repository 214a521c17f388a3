//! Composite frame sources the CLI can drive: a procedural orbit around a small scene
//! and a directory of pre-rendered frames. Both are seekable and keep their current
//! frame on the host; `Source` mirrors it into a GPU texture for the feeder.
//!
//! Types:
//!
//! - `SyntheticVideo` renders composite frames of a sphere over a checkered floor.
//! - `ImageSequence` plays numbered frames from disk at a fixed rate.
//! - `Source` pairs either playback with the texture the pipeline reads.
//!
//! Functions:
//!
//! - `recorded_camera` rebuilds the camera a composite frame was captured with.

use std::f32::consts::TAU;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use glam::{Mat4, Vec2, Vec3};
use image::RgbaImage;
use pointcloud::layout::{compose_frame, CompositeLayout};
use pointcloud::{
    load_frame_image, upload_frame, write_frame, Camera, FrameSource, GpuContext, Metadata,
};
use sampling::SeekableSource;

use crate::cli::SourceArgs;

const FRAME_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp"];

const ORBIT_RADIUS: f32 = 2.5;
const ORBIT_HEIGHT: f32 = 0.8;
const SPHERE_RADIUS: f32 = 0.6;
const FLOOR_HEIGHT: f32 = -0.6;
const FLOOR_EXTENT: f32 = 3.0;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("no composite frames found in {0}")]
    NoFrames(PathBuf),
    #[error("invalid playback timing (fps {fps}, duration {duration})")]
    InvalidTiming { fps: f64, duration: f64 },
    #[error("{width}x{height} is too small to carry a metadata block")]
    FrameTooSmall { width: u32, height: u32 },
}

/// Camera described by a decoded record for a composite of `frame_size`.
///
/// The aspect follows the color half of the frame.
pub fn recorded_camera(metadata: &Metadata, frame_size: (u32, u32)) -> Camera {
    let (width, height) = CompositeLayout::new(frame_size.0, frame_size.1).color_extent();
    let [near, far] = metadata.depth_range;
    metadata.camera(width as f32 / height.max(1) as f32, near, far)
}

#[derive(Debug, Clone, Copy)]
struct PendingSeek {
    target: f64,
    polls_left: u32,
}

/// Procedural composite video: the camera orbits the origin once per duration.
#[derive(Debug)]
pub struct SyntheticVideo {
    size: (u32, u32),
    fps: f64,
    duration: f64,
    seek_latency: u32,
    position: f64,
    pending: Option<PendingSeek>,
    frame: RgbaImage,
}

impl SyntheticVideo {
    pub fn new(size: (u32, u32), fps: f64, duration: f64, seek_latency: u32) -> Result<Self> {
        if !(fps > 0.0 && duration > 0.0 && fps.is_finite() && duration.is_finite()) {
            return Err(SourceError::InvalidTiming { fps, duration }.into());
        }
        if !CompositeLayout::new(size.0, size.1).fits_metadata() {
            return Err(SourceError::FrameTooSmall {
                width: size.0,
                height: size.1,
            }
            .into());
        }
        Ok(Self {
            size,
            fps,
            duration,
            seek_latency,
            position: 0.0,
            pending: None,
            frame: synthetic_frame(size, 0.0, duration),
        })
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn frame(&self) -> &RgbaImage {
        &self.frame
    }

    /// Snaps `time` to the frame grid inside `[0, duration)`.
    pub fn quantize(&self, time: f64) -> f64 {
        let last = ((self.duration * self.fps).ceil() - 1.0).max(0.0);
        (time * self.fps).round().clamp(0.0, last) / self.fps
    }

    /// Steps playback forward one frame, wrapping at the end.
    pub fn advance(&mut self) {
        let next = self.position + 1.0 / self.fps;
        self.position = if next >= self.duration { 0.0 } else { self.quantize(next) };
        self.frame = synthetic_frame(self.size, self.position, self.duration);
    }
}

impl SeekableSource for SyntheticVideo {
    fn duration(&self) -> f64 {
        self.duration
    }

    fn request_seek(&mut self, time: f64) {
        self.pending = Some(PendingSeek {
            target: self.quantize(time),
            polls_left: self.seek_latency,
        });
    }

    fn poll_seek(&mut self) -> Option<f64> {
        let pending = self.pending.as_mut()?;
        if pending.polls_left > 0 {
            pending.polls_left -= 1;
            return None;
        }
        let target = pending.target;
        self.pending = None;
        if target != self.position {
            self.position = target;
            self.frame = synthetic_frame(self.size, target, self.duration);
        }
        Some(target)
    }
}

/// Pose of the orbiting camera at `time`.
pub fn orbit_metadata(time: f64, duration: f64) -> Metadata {
    let angle = TAU * (time / duration) as f32;
    let eye = Vec3::new(
        ORBIT_RADIUS * angle.sin(),
        ORBIT_HEIGHT,
        ORBIT_RADIUS * angle.cos(),
    );
    let world = Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Y).inverse();
    let (_, rotation, _) = world.to_scale_rotation_translation();
    Metadata {
        camera_position: eye.to_array(),
        camera_rotation: rotation.normalize().to_array(),
        ..Metadata::default()
    }
}

fn synthetic_frame(size: (u32, u32), time: f64, duration: f64) -> RgbaImage {
    let record = orbit_metadata(time, duration);
    let camera = recorded_camera(&record, size);
    let layout = CompositeLayout::new(size.0, size.1);
    let (color_width, color_height) = layout.color_extent();
    let (depth_width, depth_height) = layout.depth_extent();

    compose_frame(
        size.0,
        size.1,
        &record,
        |x, y| match trace(&camera, pixel_uv(x, y, color_width, color_height)) {
            Some(hit) => hit.color,
            None => [24, 24, 32],
        },
        |x, y| {
            trace(&camera, pixel_uv(x, y, depth_width, depth_height))
                .map(|hit| hit.depth)
                .unwrap_or(0.0)
        },
    )
}

fn pixel_uv(x: u32, y: u32, width: u32, height: u32) -> Vec2 {
    Vec2::new(
        (x as f32 + 0.5) / width as f32,
        1.0 - (y as f32 + 0.5) / height as f32,
    )
}

struct Hit {
    depth: f32,
    color: [u8; 3],
}

/// Casts the camera ray through `uv`; `depth` is the distance along the view axis.
fn trace(camera: &Camera, uv: Vec2) -> Option<Hit> {
    let params = camera.ray_params();
    let ndc = uv * 2.0 - Vec2::ONE;
    let ray = Vec3::new((ndc.x + params.x) * params.z, (ndc.y + params.y) * params.w, 1.0);
    let origin = camera.position();
    let direction = camera.inverse_view().transform_vector3(ray);

    let sphere = {
        let a = direction.length_squared();
        let b = 2.0 * origin.dot(direction);
        let c = origin.length_squared() - SPHERE_RADIUS * SPHERE_RADIUS;
        let disc = b * b - 4.0 * a * c;
        (disc >= 0.0)
            .then(|| (-b - disc.sqrt()) / (2.0 * a))
            .filter(|t| *t > 0.0)
    };
    let floor = (direction.y < 0.0)
        .then(|| (FLOOR_HEIGHT - origin.y) / direction.y)
        .filter(|t| *t > 0.0)
        .filter(|t| {
            let p = origin + direction * *t;
            p.x.abs() < FLOOR_EXTENT && p.z.abs() < FLOOR_EXTENT
        });

    match (sphere, floor) {
        (Some(t), floor) if floor.map_or(true, |f| t <= f) => {
            let normal = (origin + direction * t).normalize();
            let rgb = (normal * 0.5 + Vec3::splat(0.5)) * 255.0;
            Some(Hit {
                depth: t,
                color: [rgb.x as u8, rgb.y as u8, rgb.z as u8],
            })
        }
        (_, Some(t)) => {
            let p = origin + direction * t;
            let checker = ((p.x * 2.0).floor() + (p.z * 2.0).floor()) as i32 & 1;
            let shade = if checker == 0 { 200 } else { 90 };
            Some(Hit {
                depth: t,
                color: [shade, shade, shade],
            })
        }
        _ => None,
    }
}

/// Directory of composite frames played back at a fixed rate.
#[derive(Debug)]
pub struct ImageSequence {
    paths: Vec<PathBuf>,
    fps: f64,
    index: usize,
    pending: Option<usize>,
    frame: RgbaImage,
}

impl ImageSequence {
    pub fn open(dir: &Path, fps: f64) -> Result<Self> {
        if !(fps > 0.0 && fps.is_finite()) {
            return Err(SourceError::InvalidTiming { fps, duration: 0.0 }.into());
        }
        let mut paths: Vec<PathBuf> = fs::read_dir(dir)
            .with_context(|| format!("failed to read frame directory {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| is_frame_file(path))
            .collect();
        paths.sort();

        let first = paths
            .first()
            .ok_or_else(|| SourceError::NoFrames(dir.to_path_buf()))?;
        let frame = load_frame_image(first)?;
        tracing::debug!(
            frames = paths.len(),
            size = ?frame.dimensions(),
            dir = %dir.display(),
            "opened frame sequence"
        );

        Ok(Self {
            paths,
            fps,
            index: 0,
            pending: None,
            frame,
        })
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn frame(&self) -> &RgbaImage {
        &self.frame
    }

    pub fn advance(&mut self) {
        self.show((self.index + 1) % self.paths.len());
    }

    fn show(&mut self, index: usize) {
        if index == self.index {
            return;
        }
        match load_frame_image(&self.paths[index]) {
            Ok(frame) => {
                self.frame = frame;
                self.index = index;
            }
            Err(err) => tracing::warn!(error = %err, index, "keeping previous frame"),
        }
    }
}

impl SeekableSource for ImageSequence {
    fn duration(&self) -> f64 {
        self.paths.len() as f64 / self.fps
    }

    fn request_seek(&mut self, time: f64) {
        let index = (time.max(0.0) * self.fps).floor() as usize;
        self.pending = Some(index.min(self.paths.len() - 1));
    }

    fn poll_seek(&mut self) -> Option<f64> {
        let index = self.pending.take()?;
        self.show(index);
        Some(self.index as f64 / self.fps)
    }
}

fn is_frame_file(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| FRAME_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false)
}

pub enum Playback {
    Synthetic(SyntheticVideo),
    Sequence(ImageSequence),
}

impl Playback {
    pub fn from_args(args: &SourceArgs) -> Result<Self> {
        match &args.frames {
            Some(dir) => Ok(Playback::Sequence(ImageSequence::open(dir, args.fps)?)),
            None => Ok(Playback::Synthetic(SyntheticVideo::new(
                args.frame_size,
                args.fps,
                args.duration,
                args.seek_latency,
            )?)),
        }
    }

    fn frame(&self) -> &RgbaImage {
        match self {
            Playback::Synthetic(video) => video.frame(),
            Playback::Sequence(sequence) => sequence.frame(),
        }
    }
}

/// A playback plus the texture its current frame is mirrored into.
pub struct Source {
    playback: Playback,
    texture: wgpu::Texture,
}

impl Source {
    pub fn new(gpu: &GpuContext, playback: Playback) -> Self {
        let texture = upload_frame(gpu, "composite frame", playback.frame());
        Self { playback, texture }
    }

    pub fn frame_size(&self) -> (u32, u32) {
        (self.texture.width(), self.texture.height())
    }

    pub fn fps(&self) -> f64 {
        match &self.playback {
            Playback::Synthetic(video) => video.fps,
            Playback::Sequence(sequence) => sequence.fps,
        }
    }

    pub fn advance(&mut self) {
        match &mut self.playback {
            Playback::Synthetic(video) => video.advance(),
            Playback::Sequence(sequence) => sequence.advance(),
        }
    }

    /// Uploads the host frame so the next feeder update sees it.
    pub fn present(&self, gpu: &GpuContext) {
        write_frame(gpu, &self.texture, self.playback.frame());
    }
}

impl FrameSource for Source {
    fn current_frame(&self) -> Option<&wgpu::Texture> {
        Some(&self.texture)
    }
}

impl SeekableSource for Source {
    fn duration(&self) -> f64 {
        match &self.playback {
            Playback::Synthetic(video) => video.duration(),
            Playback::Sequence(sequence) => sequence.duration(),
        }
    }

    fn request_seek(&mut self, time: f64) {
        match &mut self.playback {
            Playback::Synthetic(video) => video.request_seek(time),
            Playback::Sequence(sequence) => sequence.request_seek(time),
        }
    }

    fn poll_seek(&mut self) -> Option<f64> {
        match &mut self.playback {
            Playback::Synthetic(video) => video.poll_seek(),
            Playback::Sequence(sequence) => sequence.poll_seek(),
        }
    }
}

impl Drop for Source {
    fn drop(&mut self) {
        self.texture.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Quat;
    use pointcloud::layout::{decode_depth, read_metadata};
    use tempfile::TempDir;

    #[test]
    fn synthetic_frames_embed_the_orbit_pose() {
        let video = SyntheticVideo::new((640, 360), 30.0, 10.0, 0).unwrap();
        let record = read_metadata(video.frame()).expect("metadata block");
        assert_eq!(record, orbit_metadata(0.0, 10.0));
        assert!((Vec3::from(record.camera_position) - Vec3::new(0.0, 0.8, 2.5)).length() < 1e-5);
    }

    #[test]
    fn synthetic_depth_hits_the_sphere_at_the_center() {
        let video = SyntheticVideo::new((640, 360), 30.0, 10.0, 0).unwrap();
        let layout = CompositeLayout::new(640, 360);
        let (depth_width, depth_height) = layout.depth_extent();
        let (x, y) = (layout.color_extent().0 + depth_width / 2, depth_height / 2);
        let pixel = video.frame().get_pixel(x, y);
        let depth = decode_depth([pixel[0], pixel[1], pixel[2]], Metadata::default().depth_range);

        let expected = Vec3::new(0.0, 0.8, 2.5).length() - SPHERE_RADIUS;
        assert!((depth - expected).abs() < 0.1, "depth {depth} vs {expected}");
    }

    #[test]
    fn recorded_camera_matches_orbit() {
        let record = orbit_metadata(2.5, 10.0);
        let camera = recorded_camera(&record, (640, 360));
        assert!((camera.aspect - 320.0 / 360.0).abs() < 1e-6);
        assert!((camera.position() - Vec3::new(2.5, 0.8, 0.0)).length() < 1e-4);
        let forward = camera.world.transform_vector3(-Vec3::Z).normalize();
        let to_origin = (-camera.position()).normalize();
        assert!(forward.dot(to_origin) > 0.999);
        assert!(Quat::from_array(record.camera_rotation).is_normalized());
    }

    #[test]
    fn seeks_complete_after_latency_on_the_frame_grid() {
        let mut video = SyntheticVideo::new((512, 256), 30.0, 10.0, 2).unwrap();
        video.request_seek(1.01);
        assert_eq!(video.poll_seek(), None);
        assert_eq!(video.poll_seek(), None);
        assert_eq!(video.poll_seek(), Some(1.0));
        assert_eq!(video.poll_seek(), None);
        assert_eq!(video.position(), 1.0);

        video.request_seek(25.0);
        while video.poll_seek().is_none() {}
        assert!((video.position() - 299.0 / 30.0).abs() < 1e-12);
    }

    #[test]
    fn synthetic_rejects_bad_timing_and_tiny_frames() {
        assert!(SyntheticVideo::new((640, 360), 0.0, 10.0, 0).is_err());
        assert!(SyntheticVideo::new((640, 360), 30.0, -1.0, 0).is_err());
        let err = SyntheticVideo::new((64, 64), 30.0, 10.0, 0).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SourceError>(),
            Some(SourceError::FrameTooSmall { width: 64, height: 64 })
        ));
    }

    #[test]
    fn advance_wraps_at_the_end() {
        let mut video = SyntheticVideo::new((512, 256), 2.0, 1.0, 0).unwrap();
        video.advance();
        assert_eq!(video.position(), 0.5);
        video.advance();
        assert_eq!(video.position(), 0.0);
    }

    fn write_sequence(dir: &Path, count: u8) {
        for index in 0..count {
            let frame = RgbaImage::from_pixel(8, 8, image::Rgba([index * 10, 0, 0, 255]));
            frame.save(dir.join(format!("frame_{index:03}.png"))).unwrap();
        }
        fs::write(dir.join("notes.txt"), "ignored").unwrap();
    }

    #[test]
    fn sequence_maps_time_onto_sorted_frames() {
        let dir = TempDir::new().unwrap();
        write_sequence(dir.path(), 5);

        let mut sequence = ImageSequence::open(dir.path(), 10.0).unwrap();
        assert_eq!(sequence.len(), 5);
        assert!((sequence.duration() - 0.5).abs() < 1e-12);

        sequence.request_seek(0.25);
        assert_eq!(sequence.poll_seek(), Some(0.2));
        assert_eq!(sequence.index(), 2);
        assert_eq!(sequence.frame().get_pixel(0, 0)[0], 20);

        sequence.request_seek(9.0);
        assert_eq!(sequence.poll_seek(), Some(0.4));
        assert_eq!(sequence.poll_seek(), None);

        sequence.advance();
        assert_eq!(sequence.index(), 0);
    }

    #[test]
    fn empty_directory_is_rejected() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("readme.md"), "no frames").unwrap();
        let err = ImageSequence::open(dir.path(), 30.0).unwrap_err();
        assert!(err.downcast_ref::<SourceError>().is_some());
    }
}
