use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::capture::device::ReadbackDevice;
use crate::capture::session::{CaptureSession, FlushReport, SubmitOutcome};
use crate::config::{CaptureConfig, RecordingConfig};
use crate::encode::animation::{EncoderFactory, gif_factory};
use crate::encode::session::{EncodeOutput, VideoEncoderSession};
use crate::foundation::core::FrameNumber;
use crate::foundation::error::{GpucapError, GpucapResult};
use crate::queue::StatsSnapshot;

/// Everything a finished recording produced.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct RecordingSummary {
    pub output: EncodeOutput,
    pub stats: StatsSnapshot,
    pub flush: FlushReport,
}

/// Recording lifecycle over a [`CaptureSession`] and at most one [`VideoEncoderSession`].
///
/// Lives on the GPU submission thread. `capture_frame` and `tick` are called from the render
/// loop; `stop` flushes in-flight maps, drains the encoder and writes the output, in that order.
pub struct Recorder<D: ReadbackDevice> {
    capture: CaptureSession<D>,
    encoder: Option<VideoEncoderSession>,
    recording: Arc<AtomicBool>,
    next_frame: FrameNumber,
}

impl<D: ReadbackDevice> Recorder<D> {
    pub fn new(device: D, cfg: CaptureConfig) -> GpucapResult<Self> {
        Ok(Self {
            capture: CaptureSession::new(device, cfg)?,
            encoder: None,
            recording: Arc::new(AtomicBool::new(false)),
            next_frame: FrameNumber(0),
        })
    }

    pub fn capture(&self) -> &CaptureSession<D> {
        &self.capture
    }

    pub fn capture_mut(&mut self) -> &mut CaptureSession<D> {
        &mut self.capture
    }

    /// Start recording into a GIF at `cfg.output_path`.
    pub fn start(&mut self, cfg: RecordingConfig) -> GpucapResult<()> {
        let factory = gif_factory(cfg.quality);
        self.start_with_encoder(cfg, factory)
    }

    /// Start recording with a custom animation encoder.
    ///
    /// Clears any frames left in the queue and zeroes the frame counters.
    #[tracing::instrument(skip(self, factory), fields(output = %cfg.output_path.display()))]
    pub fn start_with_encoder(
        &mut self,
        cfg: RecordingConfig,
        factory: EncoderFactory,
    ) -> GpucapResult<()> {
        if self.encoder.is_some() {
            return Err(GpucapError::validation("a recording is already active"));
        }
        cfg.validate()?;

        let queue = self.capture.queue();
        let stats = self.capture.stats();
        let discarded = queue.clear();
        if discarded > 0 {
            tracing::debug!(discarded, "discarding frames queued before the recording started");
        }
        stats.reset();
        self.next_frame = FrameNumber(0);

        self.encoder = Some(VideoEncoderSession::start(cfg, queue, stats, factory)?);
        self.recording.store(true, Ordering::Release);
        tracing::info!("recording started");
        Ok(())
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::Acquire)
    }

    /// Shared recording flag. Clearing it makes `capture_frame` refuse new frames.
    pub fn recording_flag(&self) -> Arc<AtomicBool> {
        self.recording.clone()
    }

    /// Submit the next frame of the recording. Never blocks.
    pub fn capture_frame(
        &mut self,
        texture: &D::Texture,
        width: u32,
        height: u32,
    ) -> GpucapResult<SubmitOutcome> {
        if !self.is_recording() || self.encoder.is_none() {
            return Ok(SubmitOutcome::NotRecording);
        }
        let frame = self.next_frame;
        self.next_frame = frame.next();
        self.capture.submit_capture(texture, width, height, frame)
    }

    /// Move completed readbacks into the queue. Call once per rendered frame.
    pub fn tick(&mut self) -> usize {
        self.capture.process_async()
    }

    pub fn pause_encoder(&self) {
        if let Some(encoder) = &self.encoder {
            encoder.pause();
        }
    }

    pub fn resume_encoder(&self) {
        if let Some(encoder) = &self.encoder {
            encoder.resume();
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.capture.snapshot()
    }

    /// End the recording: refuse new frames, flush in-flight readbacks (destroying whatever is
    /// still pending after the bound), drain and join the encoder, then write the output.
    #[tracing::instrument(skip(self))]
    pub fn stop(&mut self) -> GpucapResult<RecordingSummary> {
        self.recording.store(false, Ordering::Release);
        let Some(encoder) = self.encoder.take() else {
            return Err(GpucapError::validation("no active recording"));
        };

        let flush = self.capture.flush();
        let output = encoder.finish()?;
        let stats = self.capture.snapshot();
        tracing::info!(
            captured = stats.captured_frames,
            dropped = stats.dropped_frames,
            encoded = stats.encoded_frames,
            "recording stopped"
        );
        Ok(RecordingSummary {
            output,
            stats,
            flush,
        })
    }
}
