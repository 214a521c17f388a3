use anyhow::{anyhow, Result};

use crate::gpu::{create_buffer_init, read_buffer, GpuContext};
use crate::reconstruct::{DebugSnapshot, PointCloudReconstructor, SampleInputs};
use crate::render::{element_count, RenderOutcome, RenderView};
use crate::types::Diagnostics;
use crate::POINT_STRIDE;

/// Host-side accumulation of one capture session.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionBuffers {
    pub points: Vec<[f32; 3]>,
    pub colors: Vec<[f32; 3]>,
    pub frames: usize,
}

impl SessionBuffers {
    /// Appends one frame worth of samples, keeping indices parallel.
    pub fn append(&mut self, points: &[[f32; 3]], colors: &[[f32; 3]]) -> usize {
        let count = points.len().min(colors.len());
        if points.len() != colors.len() {
            tracing::warn!(
                points = points.len(),
                colors = colors.len(),
                "point and color samples differ in length; truncating"
            );
        }
        self.points.extend_from_slice(&points[..count]);
        self.colors.extend_from_slice(&colors[..count]);
        self.frames += 1;
        count
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Static cloud uploaded at the end of a session and drawn until the next one.
pub struct ReplayBuffers {
    pub points: wgpu::Buffer,
    pub colors: wgpu::Buffer,
}

impl ReplayBuffers {
    pub fn len(&self) -> u32 {
        element_count(&self.points)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self) {
        self.points.destroy();
        self.colors.destroy();
    }
}

pub enum CaptureState {
    Idle { replay: Option<ReplayBuffers> },
    Sampling(SessionBuffers),
}

impl Default for CaptureState {
    fn default() -> Self {
        CaptureState::Idle { replay: None }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CaptureSummary {
    pub frames: usize,
    pub points: usize,
    /// Whether the aggregate was uploaded for replay.
    pub replaying: bool,
}

/// Live reconstruction with an optional multi-frame capture session on top.
pub struct CaptureSampler {
    reconstructor: PointCloudReconstructor,
    state: CaptureState,
}

impl CaptureSampler {
    pub fn new(reconstructor: PointCloudReconstructor) -> Self {
        Self {
            reconstructor,
            state: CaptureState::default(),
        }
    }

    pub fn state(&self) -> &CaptureState {
        &self.state
    }

    pub fn reconstructor(&self) -> &PointCloudReconstructor {
        &self.reconstructor
    }

    pub fn reconstructor_mut(&mut self) -> &mut PointCloudReconstructor {
        &mut self.reconstructor
    }

    pub fn is_sampling(&self) -> bool {
        matches!(self.state, CaptureState::Sampling(_))
    }

    pub fn replay(&self) -> Option<&ReplayBuffers> {
        match &self.state {
            CaptureState::Idle { replay } => replay.as_ref(),
            CaptureState::Sampling(_) => None,
        }
    }

    pub fn session(&self) -> Option<&SessionBuffers> {
        match &self.state {
            CaptureState::Sampling(session) => Some(session),
            CaptureState::Idle { .. } => None,
        }
    }

    /// Starts a new session, dropping any replay.
    pub fn begin_sample(&mut self) {
        if self.is_sampling() {
            tracing::warn!("capture session already running; begin ignored");
            return;
        }
        if let CaptureState::Idle { replay: Some(replay) } = &self.state {
            replay.release();
        }
        self.state = CaptureState::Sampling(SessionBuffers::default());
        tracing::info!("capture session started");
    }

    /// Reconstructs one frame and appends it to the session. Returns the
    /// number of points appended, or `None` when idle or skipped.
    pub fn sample_frame(&mut self, gpu: &GpuContext, inputs: &SampleInputs<'_>) -> Option<usize> {
        let CaptureState::Sampling(session) = &mut self.state else {
            tracing::debug!("no capture session; sample_frame ignored");
            return None;
        };

        self.reconstructor.sample(gpu, inputs, Diagnostics::Off)?;
        let (points, colors) = match self.reconstructor.read_back(gpu) {
            Ok(data) => data,
            Err(err) => {
                tracing::warn!(error = %err, "capture readback failed; frame skipped");
                return None;
            }
        };
        let appended = session.append(&points, &colors);
        tracing::debug!(
            appended,
            total = session.len(),
            frames = session.frames,
            "captured frame"
        );
        Some(appended)
    }

    /// Ends the session and uploads the aggregate for replay.
    pub fn end_sample(&mut self, gpu: &GpuContext) -> Option<CaptureSummary> {
        let state = std::mem::take(&mut self.state);
        let session = match state {
            CaptureState::Sampling(session) => session,
            idle => {
                self.state = idle;
                tracing::warn!("no capture session; end ignored");
                return None;
            }
        };

        let mut summary = CaptureSummary {
            frames: session.frames,
            points: session.len(),
            replaying: false,
        };
        tracing::info!(frames = summary.frames, points = summary.points, "capture session finished");

        let replay = if session.is_empty() {
            None
        } else if session.len() as u64 > gpu.max_point_binding() {
            tracing::warn!(
                points = summary.points,
                limit = gpu.max_point_binding(),
                "captured cloud exceeds the device storage binding limit; replay disabled"
            );
            None
        } else {
            let usage = wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC;
            Some(ReplayBuffers {
                points: create_buffer_init(gpu, "replay positions", &session.points, usage),
                colors: create_buffer_init(gpu, "replay colors", &session.colors, usage),
            })
        };
        summary.replaying = replay.is_some();
        self.state = CaptureState::Idle { replay };
        Some(summary)
    }

    /// Discards the running session and returns to live sampling.
    pub fn abort_sample(&mut self) {
        if let CaptureState::Sampling(session) = &self.state {
            tracing::info!(
                frames = session.frames,
                points = session.len(),
                "capture session aborted"
            );
            self.state = CaptureState::Idle { replay: None };
        }
    }

    /// One live tick: draw the replay when present, otherwise sample and draw.
    pub fn update(
        &mut self,
        gpu: &GpuContext,
        inputs: Option<&SampleInputs<'_>>,
        view: Option<&RenderView<'_>>,
        diagnostics: Diagnostics,
    ) -> Option<DebugSnapshot> {
        if let CaptureState::Idle { replay: Some(replay) } = &self.state {
            if let Some(view) = view {
                let outcome = self
                    .reconstructor
                    .render(gpu, &replay.points, &replay.colors, view);
                tracing::trace!(?outcome, "replayed capture");
            }
            return None;
        }

        let inputs = inputs?;
        let sampled = self.reconstructor.sample(gpu, inputs, diagnostics)?;
        if let Some(view) = view {
            if let RenderOutcome::Drawn { instances } = self.reconstructor.render_current(gpu, view) {
                tracing::trace!(instances, "drew live cloud");
            }
        }
        sampled.snapshot
    }

    /// Blocking copy of the replay buffers.
    pub fn read_replay(&self, gpu: &GpuContext) -> Result<(Vec<[f32; 3]>, Vec<[f32; 3]>)> {
        let replay = self
            .replay()
            .ok_or_else(|| anyhow!("no capture replay available"))?;
        let count = (replay.points.size() / POINT_STRIDE) as usize;
        Ok((
            read_buffer(gpu, &replay.points, count)?,
            read_buffer(gpu, &replay.colors, count)?,
        ))
    }

    pub fn dispose(&mut self) {
        if let CaptureState::Idle { replay: Some(replay) } = &self.state {
            replay.release();
        }
        self.state = CaptureState::default();
        self.reconstructor.dispose();
    }
}
