use std::path::{Path, PathBuf};

use crate::foundation::{
    core::Fps,
    error::{GpucapError, GpucapResult},
};

/// What the producer does when the frame queue is full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backpressure {
    /// Evict the oldest queued frame (counted as dropped) and push the new one.
    #[default]
    DropOldest,
    /// Block the producer until the encoder makes room.
    ///
    /// Reserved: blocking the thread that also submits GPU work can deadlock the render loop
    /// against the encoder, so [`CaptureConfig::validate`] rejects it.
    BlockProducer,
}

/// Capture-side limits: staging buffer pool, frame queue and poll bounds.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Upper bound on pooled readback buffers (frames in flight on the GPU).
    pub max_buffer_count: usize,
    /// Upper bound on converted frames waiting for the encoder.
    pub max_queued_frames: usize,
    pub backpressure: Backpressure,
    /// `process_events` rounds a synchronous capture may wait before timing out.
    pub sync_poll_iterations: u32,
    /// `process_events` rounds spent flushing pending maps when recording stops.
    pub flush_iterations: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            max_buffer_count: 3,
            max_queued_frames: 8,
            backpressure: Backpressure::DropOldest,
            sync_poll_iterations: 1000,
            flush_iterations: 100,
        }
    }
}

impl CaptureConfig {
    pub fn validate(&self) -> GpucapResult<()> {
        if self.max_buffer_count == 0 {
            return Err(GpucapError::validation("max_buffer_count must be non-zero"));
        }
        if self.max_queued_frames == 0 {
            return Err(GpucapError::validation(
                "max_queued_frames must be non-zero",
            ));
        }
        if self.sync_poll_iterations == 0 {
            return Err(GpucapError::validation(
                "sync_poll_iterations must be non-zero",
            ));
        }
        if self.backpressure == Backpressure::BlockProducer {
            return Err(GpucapError::validation(
                "backpressure 'block_producer' is not supported; use 'drop_oldest'",
            ));
        }
        Ok(())
    }

    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> GpucapResult<Self> {
        let cfg: Self = serde_json::from_str(json)
            .map_err(|e| GpucapError::serde(format!("capture config: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn with_max_buffer_count(mut self, n: usize) -> Self {
        self.max_buffer_count = n;
        self
    }

    pub fn with_max_queued_frames(mut self, n: usize) -> Self {
        self.max_queued_frames = n;
        self
    }

    pub fn with_flush_iterations(mut self, n: u32) -> Self {
        self.flush_iterations = n;
        self
    }

    pub fn with_sync_poll_iterations(mut self, n: u32) -> Self {
        self.sync_poll_iterations = n;
        self
    }
}

/// Output settings for one recording.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Animated-image (GIF) output path.
    pub output_path: PathBuf,
    /// Optional MP4 transcode target; skipped when `ffmpeg` is not on PATH.
    pub video_path: Option<PathBuf>,
    pub fps: Fps,
    /// 0 (fastest quantizer) ..= 100 (best palette).
    pub quality: u8,
    /// Keep the animated image after a successful transcode.
    pub keep_intermediate: bool,
    pub overwrite: bool,
    /// Encoder thread back-off when the queue is empty.
    pub idle_sleep_ms: u64,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            output_path: PathBuf::from("capture.gif"),
            video_path: None,
            fps: Fps::default(),
            quality: 80,
            keep_intermediate: false,
            overwrite: true,
            idle_sleep_ms: 1,
        }
    }
}

impl RecordingConfig {
    pub fn new(output_path: impl Into<PathBuf>, fps: Fps) -> Self {
        Self {
            output_path: output_path.into(),
            fps,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> GpucapResult<()> {
        self.fps.validate()?;
        if self.quality > 100 {
            return Err(GpucapError::validation(format!(
                "quality must be in 0..=100, got {}",
                self.quality
            )));
        }
        if self.output_path.as_os_str().is_empty() {
            return Err(GpucapError::validation("output_path must not be empty"));
        }
        if self.video_path.as_deref() == Some(self.output_path.as_path()) {
            return Err(GpucapError::validation(
                "video_path must differ from output_path",
            ));
        }
        if !self.overwrite {
            for path in self.output_paths() {
                if path.exists() {
                    return Err(GpucapError::validation(format!(
                        "output file '{}' already exists",
                        path.display()
                    )));
                }
            }
        }
        Ok(())
    }

    fn output_paths(&self) -> impl Iterator<Item = &Path> {
        std::iter::once(self.output_path.as_path()).chain(self.video_path.as_deref())
    }

    pub fn with_video_path(mut self, video_path: impl Into<PathBuf>) -> Self {
        self.video_path = Some(video_path.into());
        self
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn with_keep_intermediate(mut self, keep: bool) -> Self {
        self.keep_intermediate = keep;
        self
    }
}
