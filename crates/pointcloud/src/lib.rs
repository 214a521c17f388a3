//! Point cloud reconstruction from composite RGB-D video frames.
//!
//! A composite frame packs color, hue-encoded depth and a binary metadata
//! record into one texture. Each tick flows through:
//!
//! ```text
//!   FrameSource ──▶ VideoFeeder ──┬─▶ MetadataDecoder (current frame, blocking readback)
//!                                 └─▶ FrameDelay ──▶ TextureDemuxer (previous frame)
//!                                                        │ color + depth surfaces
//!                                                        ▼
//!   Camera ──────────────────────────────▶ PointCloudReconstructor ──▶ indirect draw
//!                                                        │
//!                                                        └─▶ CaptureSampler (session / replay)
//! ```
//!
//! All GPU work runs on a caller-owned [`GpuContext`]; nothing here spawns
//! threads or keeps a frame loop of its own.

mod capture;
mod compile;
mod decoder;
mod demux;
mod feeder;
mod frames;
pub mod gpu;
pub mod layout;
mod reconstruct;
mod render;
mod types;

/// Byte stride of one element in the point and color buffers.
pub const POINT_STRIDE: u64 = std::mem::size_of::<[f32; 3]>() as u64;

pub use capture::{CaptureSampler, CaptureState, CaptureSummary, ReplayBuffers, SessionBuffers};
pub use decoder::MetadataDecoder;
pub use demux::{TextureDemuxer, COLOR_FORMAT, DEPTH_FORMAT};
pub use feeder::{FeedOutcome, FrameDelay, FrameSource, VideoFeeder, DEFAULT_DELAY_SIZE};
pub use frames::{load_frame_image, upload_frame, write_frame};
pub use gpu::{GpuContext, GpuOptions};
pub use reconstruct::{
    dispatch_extents, expected_point_count, DebugSnapshot, PointCloudReconstructor,
    ReconstructOptions, SampleInputs, Sampled,
};
pub use render::{
    element_count, MeshTemplate, OffscreenTarget, PointRenderer, RenderBounds, RenderOutcome,
    RenderView, RENDER_DEPTH_FORMAT,
};
pub use types::{
    AdapterProfile, Camera, Diagnostics, GpuMemoryMode, GpuPowerPreference, Metadata,
    METADATA_WORDS,
};
