use std::time::Duration;

use cloudconfig::MissedSeekPolicy;
use glam::{Mat4, Vec3};
use sampling::{CaptureDriver, CaptureError, CaptureTarget, DriverSettings, SeekableSource};

/// Source whose seeks land with a repeating error pattern after a few polls.
struct JitteryVideo {
    duration: f64,
    jitter: Vec<f64>,
    polls_per_seek: u32,
    stall: bool,
    pending: Option<(f64, u32)>,
    position: f64,
    requests: Vec<f64>,
}

impl JitteryVideo {
    fn new(duration: f64, jitter: Vec<f64>) -> Self {
        Self {
            duration,
            jitter,
            polls_per_seek: 2,
            stall: false,
            pending: None,
            position: 0.0,
            requests: Vec::new(),
        }
    }
}

impl SeekableSource for JitteryVideo {
    fn duration(&self) -> f64 {
        self.duration
    }

    fn request_seek(&mut self, time: f64) {
        let offset = self.jitter[self.requests.len() % self.jitter.len()];
        self.requests.push(time);
        self.pending = Some(((time + offset).clamp(0.0, self.duration), self.polls_per_seek));
    }

    fn poll_seek(&mut self) -> Option<f64> {
        if self.stall {
            return None;
        }
        let (target, remaining) = self.pending?;
        if remaining > 0 {
            self.pending = Some((target, remaining - 1));
            return None;
        }
        self.pending = None;
        self.position = target;
        Some(target)
    }
}

#[derive(Default)]
struct RecordingTarget {
    began: u32,
    ended: u32,
    aborted: u32,
    ready_at: Vec<f64>,
    sampled: usize,
    points_per_frame: usize,
    /// Every n-th ready frame has no camera, as if it was never demuxed.
    unposed_every: Option<usize>,
}

impl CaptureTarget<JitteryVideo> for RecordingTarget {
    fn begin_sample(&mut self) {
        self.began += 1;
    }

    fn frame_ready(&mut self, source: &JitteryVideo) {
        self.ready_at.push(source.position);
    }

    fn camera_world(&self) -> Option<Mat4> {
        if let Some(every) = self.unposed_every {
            if (self.ready_at.len() - 1) % every == 0 {
                return None;
            }
        }
        let t = *self.ready_at.last()? as f32;
        Some(Mat4::from_translation(Vec3::new(t, 0.0, 0.0)))
    }

    fn sample_frame(&mut self) -> Option<usize> {
        self.sampled += 1;
        Some(self.points_per_frame)
    }

    fn end_sample(&mut self) -> usize {
        self.ended += 1;
        self.sampled * self.points_per_frame
    }

    fn abort_sample(&mut self) {
        self.aborted += 1;
    }
}

fn settings(policy: MissedSeekPolicy) -> DriverSettings {
    DriverSettings {
        sample_count: 100,
        tolerance: 0.1,
        poll_interval: Duration::from_micros(50),
        seek_timeout: Some(Duration::from_secs(5)),
        missed_seek: policy,
    }
}

#[test]
fn poses_are_recorded_only_within_tolerance() {
    let mut video = JitteryVideo::new(10.0, vec![0.0, 0.05, 0.15, -0.2]);
    let mut target = RecordingTarget {
        points_per_frame: 7,
        ..RecordingTarget::default()
    };

    let report = CaptureDriver::new(settings(MissedSeekPolicy::Drop))
        .run(&mut video, &mut target)
        .expect("capture");

    assert!(report.poses.len() <= 100);
    assert_eq!(report.poses.len(), 50);
    assert!(report
        .poses
        .iter()
        .all(|pose| (pose.achieved - pose.requested).abs() < 0.1));
    assert_eq!(report.missed.len(), 50);
    assert!(report.missed.iter().all(|miss| !miss.sampled));
    assert!(report.skipped.is_empty());
    assert_eq!(report.frames_sampled, 50);
    assert_eq!(report.points_sampled, 350);
    assert_eq!(report.total_points, 350);
    assert!(!report.diverged());

    assert_eq!((target.began, target.ended, target.aborted), (1, 1, 0));
    assert_eq!(target.ready_at.len(), 100);
    assert_eq!(video.requests.len(), 101);
    assert_eq!(video.requests.last(), Some(&0.0));
}

#[test]
fn keep_points_policy_samples_every_frame() {
    let mut video = JitteryVideo::new(10.0, vec![0.0, 0.05, 0.15, -0.2]);
    let mut target = RecordingTarget {
        points_per_frame: 3,
        ..RecordingTarget::default()
    };

    let report = CaptureDriver::new(settings(MissedSeekPolicy::KeepPoints))
        .run(&mut video, &mut target)
        .expect("capture");

    assert_eq!(report.poses.len(), 50);
    assert_eq!(report.frames_sampled, 100);
    assert_eq!(report.total_points, 300);
    assert!(report.missed.iter().all(|miss| miss.sampled));
    assert!(report.diverged());
}

#[test]
fn unposed_frames_are_skipped_not_missed() {
    let mut video = JitteryVideo::new(10.0, vec![0.0, 0.02]);
    let mut target = RecordingTarget {
        points_per_frame: 5,
        unposed_every: Some(4),
        ..RecordingTarget::default()
    };

    let report = CaptureDriver::new(settings(MissedSeekPolicy::KeepPoints))
        .run(&mut video, &mut target)
        .expect("capture");

    assert!(report.missed.is_empty());
    assert_eq!(report.skipped.len(), 25);
    assert!(report
        .skipped
        .iter()
        .all(|skip| (skip.achieved - skip.requested).abs() < 0.1));
    assert_eq!(report.poses.len(), 75);
    assert_eq!(report.frames_sampled, 75);
    assert_eq!(target.sampled, 75);
    assert!(!report.diverged());
}

#[test]
fn stalled_seek_times_out_and_aborts() {
    let mut video = JitteryVideo::new(10.0, vec![0.0]);
    video.stall = true;
    let mut target = RecordingTarget::default();
    let driver = CaptureDriver::new(DriverSettings {
        seek_timeout: Some(Duration::from_millis(20)),
        ..settings(MissedSeekPolicy::Drop)
    });

    let err = driver.run(&mut video, &mut target).unwrap_err();
    assert!(matches!(err, CaptureError::SeekTimeout { requested, .. } if requested == 0.0));
    assert_eq!((target.began, target.ended, target.aborted), (1, 0, 1));
    assert_eq!(video.requests, vec![0.0, 0.0]);
}

#[test]
fn empty_source_is_rejected() {
    let mut video = JitteryVideo::new(0.0, vec![0.0]);
    let mut target = RecordingTarget::default();
    let err = CaptureDriver::new(settings(MissedSeekPolicy::Drop))
        .run(&mut video, &mut target)
        .unwrap_err();
    assert!(matches!(err, CaptureError::EmptySource(_)));
    assert_eq!(target.began, 0);
}

#[test]
fn report_serialises_to_json() {
    let mut video = JitteryVideo::new(1.0, vec![0.0]);
    let mut target = RecordingTarget {
        points_per_frame: 1,
        ..RecordingTarget::default()
    };
    let report = CaptureDriver::new(DriverSettings {
        sample_count: 4,
        ..settings(MissedSeekPolicy::Drop)
    })
    .run(&mut video, &mut target)
    .expect("capture");

    let json = serde_json::to_value(&report).expect("serialise report");
    assert_eq!(json["requested"], 4);
    assert_eq!(json["policy"], "drop");
    assert_eq!(json["poses"].as_array().map(Vec::len), Some(4));
    assert_eq!(json["total_points"], 4);
}
