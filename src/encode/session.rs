use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::Context as _;

use crate::config::RecordingConfig;
use crate::encode::animation::{AnimationEncoder, EncoderFactory};
use crate::encode::ffmpeg::{is_ffmpeg_on_path, transcode_to_mp4};
use crate::encode::output::write_atomic;
use crate::foundation::error::{GpucapError, GpucapResult};
use crate::frame::CapturedFrame;
use crate::queue::{CaptureStats, FrameQueue};

/// Files produced by a finished encoder session.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct EncodeOutput {
    /// Animated-image file, `None` when it was replaced by the transcoded video.
    pub animation_path: Option<PathBuf>,
    /// Transcoded video, present only when the transcode succeeded.
    pub video_path: Option<PathBuf>,
    pub encoded_frames: u64,
    /// Presentation length of the animation.
    pub duration_ms: u64,
    /// Size of the assembled animation container.
    pub bytes_written: u64,
}

#[derive(Default)]
struct Signals {
    finishing: AtomicBool,
    paused: AtomicBool,
    abort: AtomicBool,
}

/// State owned by the encoder thread and handed back on join.
struct EncoderState {
    factory: EncoderFactory,
    encoder: Option<Box<dyn AnimationEncoder>>,
    timestamp_ms: u64,
    frame_duration_ms: u64,
    encoded: u64,
    failed: u64,
}

impl EncoderState {
    fn encode_frame(&mut self, frame: &CapturedFrame, stats: &CaptureStats) {
        if self.encoder.is_none() {
            match (self.factory)(frame.width, frame.height) {
                Ok(enc) => {
                    tracing::debug!(width = frame.width, height = frame.height, "created encoder");
                    self.encoder = Some(enc);
                }
                Err(e) => {
                    self.failed += 1;
                    tracing::warn!(
                        frame = frame.frame_number.0,
                        error = %e,
                        "encoder creation failed"
                    );
                    return;
                }
            }
        }
        let Some(enc) = self.encoder.as_mut() else {
            return;
        };

        match enc.add_frame(frame, self.timestamp_ms) {
            Ok(()) => {
                self.timestamp_ms += self.frame_duration_ms;
                self.encoded += 1;
                stats.record_encoded();
            }
            Err(e) => {
                self.failed += 1;
                tracing::warn!(frame = frame.frame_number.0, error = %e, "failed to encode frame");
            }
        }
    }
}

/// Background consumer: drains the frame queue into an animation encoder on its own thread.
///
/// The thread never touches the GPU. `finish` drains whatever is still queued, joins the thread
/// and only then writes the output, so finalization cannot race an in-flight encode. Dropping an
/// unfinished session abandons the queued frames and writes nothing.
pub struct VideoEncoderSession {
    cfg: RecordingConfig,
    queue: Arc<FrameQueue>,
    stats: Arc<CaptureStats>,
    signals: Arc<Signals>,
    worker: Option<JoinHandle<EncoderState>>,
}

impl VideoEncoderSession {
    pub fn start(
        cfg: RecordingConfig,
        queue: Arc<FrameQueue>,
        stats: Arc<CaptureStats>,
        factory: EncoderFactory,
    ) -> GpucapResult<Self> {
        cfg.validate()?;
        let signals = Arc::new(Signals::default());
        let state = EncoderState {
            factory,
            encoder: None,
            timestamp_ms: 0,
            frame_duration_ms: cfg.fps.frame_duration_ms(),
            encoded: 0,
            failed: 0,
        };

        let worker = {
            let queue = queue.clone();
            let stats = stats.clone();
            let signals = signals.clone();
            let idle = Duration::from_millis(cfg.idle_sleep_ms);
            std::thread::Builder::new()
                .name("gpucap-encoder".to_owned())
                .spawn(move || run_encoder(state, &queue, &stats, &signals, idle))
                .context("failed to spawn encoder thread")?
        };

        Ok(Self {
            cfg,
            queue,
            stats,
            signals,
            worker: Some(worker),
        })
    }

    pub fn config(&self) -> &RecordingConfig {
        &self.cfg
    }

    /// Stall the consumer; queued frames accumulate under the queue's drop-oldest policy.
    pub fn pause(&self) {
        self.signals.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.signals.paused.store(false, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.signals.paused.load(Ordering::Acquire)
    }

    /// Drain the queue, join the encoder thread and write the output file(s).
    ///
    /// A pause is overridden so every queued frame is encoded. Fails when no frame was encoded
    /// or the container could not be assembled or written.
    #[tracing::instrument(skip(self), fields(output = %self.cfg.output_path.display()))]
    pub fn finish(mut self) -> GpucapResult<EncodeOutput> {
        self.signals.finishing.store(true, Ordering::Release);
        let state = self.join()?;
        tracing::info!(
            encoded = state.encoded,
            failed = state.failed,
            "encoder thread finished"
        );
        finalize(&self.cfg, state)
    }

    fn join(&mut self) -> GpucapResult<EncoderState> {
        let Some(worker) = self.worker.take() else {
            return Err(GpucapError::encode("encoder thread already joined"));
        };
        worker
            .join()
            .map_err(|_| GpucapError::encode("encoder thread panicked"))
    }
}

impl Drop for VideoEncoderSession {
    fn drop(&mut self) {
        if self.worker.is_none() {
            return;
        }
        self.signals.abort.store(true, Ordering::Release);
        let _ = self.join();
        let abandoned = self.queue.clear();
        if abandoned > 0 {
            self.stats.record_dropped(abandoned as u64);
            tracing::warn!(abandoned, "encoder session dropped with frames still queued");
        }
    }
}

fn run_encoder(
    mut state: EncoderState,
    queue: &FrameQueue,
    stats: &CaptureStats,
    signals: &Signals,
    idle: Duration,
) -> EncoderState {
    loop {
        if signals.abort.load(Ordering::Acquire) {
            break;
        }
        let finishing = signals.finishing.load(Ordering::Acquire);
        if signals.paused.load(Ordering::Acquire) && !finishing {
            idle_wait(idle);
            continue;
        }

        match queue.try_get_frame() {
            Some(frame) => state.encode_frame(&frame, stats),
            None if finishing => break,
            None => idle_wait(idle),
        }
    }
    state
}

fn idle_wait(idle: Duration) {
    if idle.is_zero() {
        std::thread::yield_now();
    } else {
        std::thread::sleep(idle);
    }
}

fn finalize(cfg: &RecordingConfig, state: EncoderState) -> GpucapResult<EncodeOutput> {
    let encoder = match state.encoder {
        Some(encoder) if state.encoded > 0 => encoder,
        _ => return Err(GpucapError::encode("no frames were encoded")),
    };

    let bytes = encoder.assemble(state.timestamp_ms)?;
    write_atomic(&cfg.output_path, &bytes)?;
    tracing::info!(
        path = %cfg.output_path.display(),
        bytes = bytes.len(),
        frames = state.encoded,
        "wrote animation"
    );

    let mut out = EncodeOutput {
        animation_path: Some(cfg.output_path.clone()),
        video_path: None,
        encoded_frames: state.encoded,
        duration_ms: state.timestamp_ms,
        bytes_written: bytes.len() as u64,
    };

    let Some(video_path) = &cfg.video_path else {
        return Ok(out);
    };
    if !is_ffmpeg_on_path() {
        tracing::warn!("ffmpeg not found on PATH; keeping the animation as the final output");
        return Ok(out);
    }
    match transcode_to_mp4(&cfg.output_path, video_path, cfg.overwrite) {
        Ok(()) => {
            out.video_path = Some(video_path.clone());
            if !cfg.keep_intermediate {
                match std::fs::remove_file(&cfg.output_path) {
                    Ok(()) => out.animation_path = None,
                    Err(e) => tracing::warn!(error = %e, "failed to remove intermediate animation"),
                }
            }
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                "transcode failed; keeping the animation as the final output"
            );
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::core::{Fps, FrameNumber};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Log {
        sizes: Vec<(u32, u32)>,
        timestamps: Vec<u64>,
        end: Option<u64>,
    }

    struct LoggingEncoder {
        log: Arc<Mutex<Log>>,
        fail_frame: Option<u64>,
    }

    impl AnimationEncoder for LoggingEncoder {
        fn add_frame(&mut self, frame: &CapturedFrame, timestamp_ms: u64) -> GpucapResult<()> {
            if Some(frame.frame_number.0) == self.fail_frame {
                return Err(GpucapError::encode("injected"));
            }
            self.log.lock().unwrap().timestamps.push(timestamp_ms);
            Ok(())
        }

        fn assemble(self: Box<Self>, end_timestamp_ms: u64) -> GpucapResult<Vec<u8>> {
            self.log.lock().unwrap().end = Some(end_timestamp_ms);
            Ok(b"ANIM".to_vec())
        }
    }

    fn logging_factory(log: Arc<Mutex<Log>>, fail_frame: Option<u64>) -> EncoderFactory {
        Box::new(move |w, h| {
            log.lock().unwrap().sizes.push((w, h));
            Ok(Box::new(LoggingEncoder {
                log: log.clone(),
                fail_frame,
            }) as Box<dyn AnimationEncoder>)
        })
    }

    fn frame(n: u64, w: u32, h: u32) -> CapturedFrame {
        CapturedFrame {
            width: w,
            height: h,
            frame_number: FrameNumber(n),
            timestamp: Duration::ZERO,
            data: vec![0; (w * h * 4) as usize],
        }
    }

    fn out_path(name: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir()
            .join(format!("gpucap_session_{}_{nanos}", std::process::id()))
            .join(name)
    }

    #[test]
    fn encodes_every_queued_frame_with_fixed_step_timestamps() {
        let queue = Arc::new(FrameQueue::new(16));
        let stats = Arc::new(CaptureStats::default());
        let log = Arc::new(Mutex::new(Log::default()));
        let path = out_path("a.gif");
        let cfg = RecordingConfig::new(&path, Fps::integer(60).unwrap());

        let session = VideoEncoderSession::start(
            cfg,
            queue.clone(),
            stats.clone(),
            logging_factory(log.clone(), None),
        )
        .unwrap();
        for n in 0..5 {
            queue.push(frame(n, 6, 4));
        }
        let out = session.finish().unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log.sizes, vec![(6, 4)]);
        assert_eq!(log.timestamps, vec![0, 16, 32, 48, 64]);
        assert_eq!(log.end, Some(80));
        assert_eq!(out.encoded_frames, 5);
        assert_eq!(out.duration_ms, 80);
        assert_eq!(out.bytes_written, 4);
        assert_eq!(stats.encoded_frames(), 5);
        assert_eq!(std::fs::read(&path).unwrap(), b"ANIM");
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn failed_frame_is_skipped_without_advancing_time() {
        let queue = Arc::new(FrameQueue::new(16));
        let stats = Arc::new(CaptureStats::default());
        let log = Arc::new(Mutex::new(Log::default()));
        let path = out_path("b.gif");
        let session = VideoEncoderSession::start(
            RecordingConfig::new(&path, Fps::integer(10).unwrap()),
            queue.clone(),
            stats.clone(),
            logging_factory(log.clone(), Some(1)),
        )
        .unwrap();
        session.pause();
        for n in 0..3 {
            queue.push(frame(n, 2, 2));
        }
        let out = session.finish().unwrap();

        assert_eq!(log.lock().unwrap().timestamps, vec![0, 100]);
        assert_eq!(out.encoded_frames, 2);
        assert_eq!(stats.encoded_frames(), 2);
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn paused_session_leaves_frames_queued_until_finish() {
        let queue = Arc::new(FrameQueue::new(4));
        let stats = Arc::new(CaptureStats::default());
        let log = Arc::new(Mutex::new(Log::default()));
        let path = out_path("c.gif");
        let session = VideoEncoderSession::start(
            RecordingConfig::new(&path, Fps::integer(30).unwrap()),
            queue.clone(),
            stats.clone(),
            logging_factory(log.clone(), None),
        )
        .unwrap();
        session.pause();
        assert!(session.is_paused());
        queue.push(frame(0, 2, 2));
        queue.push(frame(1, 2, 2));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(queue.len(), 2);
        assert_eq!(stats.encoded_frames(), 0);

        let out = session.finish().unwrap();
        assert_eq!(out.encoded_frames, 2);
        assert!(queue.is_empty());
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn finishing_without_frames_fails_and_writes_nothing() {
        let path = out_path("d.gif");
        let session = VideoEncoderSession::start(
            RecordingConfig::new(&path, Fps::integer(30).unwrap()),
            Arc::new(FrameQueue::new(2)),
            Arc::new(CaptureStats::default()),
            logging_factory(Arc::new(Mutex::new(Log::default())), None),
        )
        .unwrap();
        let err = session.finish().unwrap_err();
        assert!(err.to_string().contains("no frames"), "{err}");
        assert!(!path.exists());
    }

    #[test]
    fn dropping_unfinished_session_abandons_queue() {
        let queue = Arc::new(FrameQueue::new(4));
        let stats = Arc::new(CaptureStats::default());
        let path = out_path("e.gif");
        let session = VideoEncoderSession::start(
            RecordingConfig::new(&path, Fps::integer(30).unwrap()),
            queue.clone(),
            stats.clone(),
            logging_factory(Arc::new(Mutex::new(Log::default())), None),
        )
        .unwrap();
        session.pause();
        queue.push(frame(0, 2, 2));
        queue.push(frame(1, 2, 2));
        drop(session);

        assert!(queue.is_empty());
        assert_eq!(stats.dropped_frames(), 2);
        assert!(!path.exists());
    }

    #[test]
    fn missing_video_transcoder_keeps_animation() {
        if is_ffmpeg_on_path() {
            return;
        }
        let queue = Arc::new(FrameQueue::new(4));
        let path = out_path("f.gif");
        let video = path.with_extension("mp4");
        let session = VideoEncoderSession::start(
            RecordingConfig::new(&path, Fps::integer(30).unwrap()).with_video_path(&video),
            queue.clone(),
            Arc::new(CaptureStats::default()),
            logging_factory(Arc::new(Mutex::new(Log::default())), None),
        )
        .unwrap();
        queue.push(frame(0, 2, 2));
        let out = session.finish().unwrap();
        assert_eq!(out.animation_path.as_deref(), Some(path.as_path()));
        assert_eq!(out.video_path, None);
        assert!(!video.exists());
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
