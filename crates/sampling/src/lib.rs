//! Offline capture driver: seeks a video source to evenly spaced timestamps
//! and samples one point cloud frame at each.
//!
//! The driver is transport agnostic. A [`SeekableSource`] answers seek
//! requests asynchronously and is polled until it reports the time it landed
//! on; a [`CaptureTarget`] owns the reconstruction side and is told when a
//! frame is ready, when to sample it and when the session ends.

use std::thread;
use std::time::{Duration, Instant};

use cloudconfig::{CaptureSettings, MissedSeekPolicy};
use glam::Mat4;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("source has no playable duration ({0})")]
    EmptySource(f64),
    #[error("seek to {requested:.3} did not complete within {waited:?}")]
    SeekTimeout { requested: f64, waited: Duration },
}

/// Playback whose position can be moved; seeks complete asynchronously.
pub trait SeekableSource {
    /// Total playable length in the source's time unit.
    fn duration(&self) -> f64;

    fn request_seek(&mut self, time: f64);

    /// `Some(achieved)` once the last requested seek has completed.
    fn poll_seek(&mut self) -> Option<f64>;
}

/// Reconstruction side of a capture session.
pub trait CaptureTarget<S: ?Sized> {
    fn begin_sample(&mut self);

    /// Called once per completed seek so the target can pull the new frame
    /// and refresh its camera.
    fn frame_ready(&mut self, source: &S);

    /// Camera-to-world pose for the frame made ready last.
    fn camera_world(&self) -> Option<Mat4>;

    /// Samples the ready frame; returns the number of points appended.
    fn sample_frame(&mut self) -> Option<usize>;

    /// Ends the session; returns the aggregated point count.
    fn end_sample(&mut self) -> usize;

    fn abort_sample(&mut self);
}

#[derive(Debug, Clone, PartialEq)]
pub struct DriverSettings {
    pub sample_count: u32,
    pub tolerance: f64,
    pub poll_interval: Duration,
    pub seek_timeout: Option<Duration>,
    pub missed_seek: MissedSeekPolicy,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self::from(&CaptureSettings::default())
    }
}

impl From<&CaptureSettings> for DriverSettings {
    fn from(settings: &CaptureSettings) -> Self {
        Self {
            sample_count: settings.sample_count,
            tolerance: settings.seek_tolerance,
            poll_interval: settings.poll_interval,
            seek_timeout: settings.seek_timeout,
            missed_seek: settings.missed_seek,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoseSample {
    pub requested: f64,
    pub achieved: f64,
    pub world: Mat4,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissedSeek {
    pub requested: f64,
    pub achieved: f64,
    /// Whether the frame was still sampled under [`MissedSeekPolicy::KeepPoints`].
    pub sampled: bool,
}

/// Seek that landed within tolerance on a frame the target could not pose,
/// e.g. one that was not demuxed yet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedFrame {
    pub requested: f64,
    pub achieved: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptureReport {
    pub requested: u32,
    pub tolerance: f64,
    pub policy: MissedSeekPolicy,
    pub poses: Vec<PoseSample>,
    pub missed: Vec<MissedSeek>,
    pub skipped: Vec<SkippedFrame>,
    pub frames_sampled: usize,
    pub points_sampled: usize,
    pub total_points: usize,
}

impl CaptureReport {
    /// Whether the recorded poses and sampled frames no longer pair up.
    pub fn diverged(&self) -> bool {
        self.poses.len() != self.frames_sampled
    }
}

/// `count` evenly spaced timestamps `i * duration / count`.
pub fn timestamps(duration: f64, count: u32) -> Vec<f64> {
    (0..count)
        .map(|index| f64::from(index) * duration / f64::from(count))
        .collect()
}

pub struct CaptureDriver {
    settings: DriverSettings,
}

impl CaptureDriver {
    pub fn new(settings: DriverSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &DriverSettings {
        &self.settings
    }

    /// Runs a full session and rewinds the source to 0 afterwards, also on
    /// failure.
    pub fn run<S, T>(&self, source: &mut S, target: &mut T) -> Result<CaptureReport, CaptureError>
    where
        S: SeekableSource + ?Sized,
        T: CaptureTarget<S> + ?Sized,
    {
        let duration = source.duration();
        if !(duration > 0.0) || !duration.is_finite() {
            return Err(CaptureError::EmptySource(duration));
        }

        let settings = &self.settings;
        let mut report = CaptureReport {
            requested: settings.sample_count,
            tolerance: settings.tolerance,
            policy: settings.missed_seek,
            poses: Vec::new(),
            missed: Vec::new(),
            skipped: Vec::new(),
            frames_sampled: 0,
            points_sampled: 0,
            total_points: 0,
        };

        tracing::info!(
            samples = settings.sample_count,
            duration,
            tolerance = settings.tolerance,
            "starting capture"
        );
        target.begin_sample();

        for requested in timestamps(duration, settings.sample_count) {
            let achieved = match self.seek(source, requested) {
                Ok(achieved) => achieved,
                Err(err) => {
                    tracing::warn!(error = %err, "aborting capture");
                    target.abort_sample();
                    self.rewind(source);
                    return Err(err);
                }
            };
            target.frame_ready(source);

            let error = (achieved - requested).abs();
            let sample = if error >= settings.tolerance {
                let sampled = settings.missed_seek == MissedSeekPolicy::KeepPoints;
                tracing::debug!(
                    requested,
                    achieved,
                    error,
                    sampled,
                    "seek missed tolerance; pose dropped"
                );
                report.missed.push(MissedSeek {
                    requested,
                    achieved,
                    sampled,
                });
                sampled
            } else if let Some(world) = target.camera_world() {
                report.poses.push(PoseSample {
                    requested,
                    achieved,
                    world,
                });
                true
            } else {
                tracing::debug!(requested, achieved, "frame produced no camera pose; skipped");
                report.skipped.push(SkippedFrame {
                    requested,
                    achieved,
                });
                false
            };

            if sample {
                if let Some(points) = target.sample_frame() {
                    report.frames_sampled += 1;
                    report.points_sampled += points;
                }
            }
        }

        report.total_points = target.end_sample();
        self.rewind(source);

        tracing::info!(
            poses = report.poses.len(),
            missed = report.missed.len(),
            skipped = report.skipped.len(),
            frames = report.frames_sampled,
            points = report.total_points,
            "capture complete"
        );
        if report.diverged() {
            tracing::warn!(
                poses = report.poses.len(),
                frames = report.frames_sampled,
                "pose and frame counts diverged"
            );
        }
        Ok(report)
    }

    fn seek<S>(&self, source: &mut S, time: f64) -> Result<f64, CaptureError>
    where
        S: SeekableSource + ?Sized,
    {
        source.request_seek(time);
        let started = Instant::now();
        loop {
            if let Some(achieved) = source.poll_seek() {
                return Ok(achieved);
            }
            if let Some(timeout) = self.settings.seek_timeout {
                let waited = started.elapsed();
                if waited >= timeout {
                    return Err(CaptureError::SeekTimeout {
                        requested: time,
                        waited,
                    });
                }
            }
            thread::sleep(self.settings.poll_interval);
        }
    }

    fn rewind<S>(&self, source: &mut S)
    where
        S: SeekableSource + ?Sized,
    {
        if let Err(err) = self.seek(source, 0.0) {
            tracing::warn!(error = %err, "failed to rewind source");
        }
    }
}
