//! GPU plumbing shared by the pipeline stages.
//!
//! - `context` owns the headless device/queue pair and adapter selection.
//! - `dispatch` describes compute kernels and their per-call bindings.
//! - `cache` tracks allocations by kind and the size they were created at.
//! - `readback` moves buffers and textures back to the host, blocking.
//! - `fullscreen` draws one sampled triangle per pass for demux and blit.

mod cache;
mod context;
mod dispatch;
pub(crate) mod fullscreen;
mod readback;

pub use cache::{Allocation, GpuResource, ResizePolicy, ResourceCache, Surface};
pub use context::{GpuContext, GpuOptions};
pub use dispatch::{Binding, BindingKind, DispatchDescriptor, KernelProgram};
pub use readback::{create_buffer_init, read_buffer, read_depth_texture, read_texture, Readback};
