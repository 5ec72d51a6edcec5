//! gpucap captures rendered GPU frames without stalling the render loop and encodes them into an
//! animated image on a background thread.
//!
//! - [`CaptureSession`] copies textures into pooled staging buffers and maps them asynchronously
//! - completed frames are converted to RGBA and pushed into a drop-oldest [`FrameQueue`]
//! - [`VideoEncoderSession`] drains the queue into a GIF and optionally transcodes it with ffmpeg
//! - [`Recorder`] ties both together and implements the stop sequence
//!
//! GPU access goes through the [`ReadbackDevice`] trait. [`SoftDevice`] is a host-memory
//! implementation; the `gpu` feature adds a `wgpu`-backed device.
#![forbid(unsafe_code)]

mod foundation;

pub mod backend;
pub mod capture;
pub mod config;
pub mod encode;
pub mod frame;
pub mod queue;
pub mod recorder;

pub use crate::foundation::core::{
    BYTES_PER_PIXEL, COPY_BYTES_PER_ROW_ALIGNMENT, Fps, FrameNumber, aligned_row_bytes,
    readback_layout,
};
pub use crate::foundation::error::{GpucapError, GpucapResult};

pub use crate::backend::soft::{SoftBuffer, SoftDevice, SoftDeviceOpts, SoftTexture};
#[cfg(feature = "gpu")]
pub use crate::backend::wgpu::WgpuDevice;
pub use crate::capture::buffer::{BufferState, ReadbackBuffer};
pub use crate::capture::completion::{CompletionBridge, MapCallback, MapCompletion, MapConvention};
pub use crate::capture::device::ReadbackDevice;
pub use crate::capture::pool::{BufferPool, BufferSlot};
pub use crate::capture::session::{CaptureSession, DropReason, FlushReport, SubmitOutcome};
pub use crate::config::{Backpressure, CaptureConfig, RecordingConfig};
pub use crate::encode::animation::{
    AnimationEncoder, EncoderFactory, GifAnimationEncoder, gif_factory,
};
pub use crate::encode::session::{EncodeOutput, VideoEncoderSession};
pub use crate::frame::CapturedFrame;
pub use crate::queue::{CaptureStats, FrameQueue, StatsSnapshot};
pub use crate::recorder::{Recorder, RecordingSummary};
