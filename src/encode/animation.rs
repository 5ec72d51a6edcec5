use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

use image::codecs::gif::{GifEncoder, Repeat};
use image::{Delay, Frame, RgbaImage};

use crate::foundation::error::{GpucapError, GpucapResult};
use crate::frame::CapturedFrame;

/// Timestamped animated-image encoder driven by the encoder thread.
///
/// Frames arrive in display order with strictly increasing timestamps. `assemble` closes the
/// animation with a terminating null frame at `end_timestamp_ms`, which fixes how long the last
/// real frame is shown, and returns the complete container bytes.
pub trait AnimationEncoder: Send {
    fn add_frame(&mut self, frame: &CapturedFrame, timestamp_ms: u64) -> GpucapResult<()>;

    fn assemble(self: Box<Self>, end_timestamp_ms: u64) -> GpucapResult<Vec<u8>>;
}

/// Builds an encoder once the first frame reveals the output size.
pub type EncoderFactory =
    Box<dyn FnMut(u32, u32) -> GpucapResult<Box<dyn AnimationEncoder>> + Send>;

/// Factory for [`GifAnimationEncoder`] at the given quality.
pub fn gif_factory(quality: u8) -> EncoderFactory {
    Box::new(move |width, height| {
        Ok(Box::new(GifAnimationEncoder::new(width, height, quality)?) as Box<dyn AnimationEncoder>)
    })
}

/// Shared in-memory sink: the GIF writer emits its trailer on drop, after which the bytes are
/// taken back out.
#[derive(Clone, Default)]
struct SharedBytes(Arc<Mutex<Vec<u8>>>);

impl SharedBytes {
    fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.0.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl Write for SharedBytes {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Looping GIF built through `image::codecs::gif`.
///
/// Each frame is held until the next timestamp is known, since GIF stores per-frame delays
/// rather than presentation times. Delays are whole centiseconds taken against a running
/// position, so rounding never accumulates across frames.
pub struct GifAnimationEncoder {
    width: u32,
    height: u32,
    sink: SharedBytes,
    encoder: GifEncoder<SharedBytes>,
    pending: Option<(RgbaImage, u64)>,
    frames: u64,
    /// Centiseconds of animation written so far, counted from the first timestamp.
    written_cs: u64,
}

impl GifAnimationEncoder {
    pub fn new(width: u32, height: u32, quality: u8) -> GpucapResult<Self> {
        if width == 0 || height == 0 || width > u32::from(u16::MAX) || height > u32::from(u16::MAX)
        {
            return Err(GpucapError::validation(format!(
                "gif dimensions must be in 1..=65535, got {width}x{height}"
            )));
        }
        let sink = SharedBytes::default();
        let mut encoder = GifEncoder::new_with_speed(sink.clone(), quality_to_speed(quality));
        encoder
            .set_repeat(Repeat::Infinite)
            .map_err(|e| GpucapError::encode(format!("gif repeat: {e}")))?;
        Ok(Self {
            width,
            height,
            sink,
            encoder,
            pending: None,
            frames: 0,
            written_cs: 0,
        })
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Write `image` so it is shown until `until_ms`. A frame is never shorter than 1 cs.
    fn write_frame(&mut self, image: RgbaImage, until_ms: u64) -> GpucapResult<()> {
        let delay_cs = to_centis(until_ms).saturating_sub(self.written_cs).max(1);
        self.written_cs += delay_cs;
        let ms = u32::try_from(delay_cs.saturating_mul(10)).unwrap_or(u32::MAX);
        let frame = Frame::from_parts(image, 0, 0, Delay::from_numer_denom_ms(ms, 1));
        self.encoder
            .encode_frame(frame)
            .map_err(|e| GpucapError::encode(format!("gif frame: {e}")))
    }
}

impl AnimationEncoder for GifAnimationEncoder {
    fn add_frame(&mut self, frame: &CapturedFrame, timestamp_ms: u64) -> GpucapResult<()> {
        if frame.width != self.width || frame.height != self.height {
            return Err(GpucapError::encode(format!(
                "frame size mismatch: got {}x{}, expected {}x{}",
                frame.width, frame.height, self.width, self.height
            )));
        }
        if let Some((_, prev)) = &self.pending
            && timestamp_ms <= *prev
        {
            return Err(GpucapError::encode(format!(
                "timestamp {timestamp_ms}ms does not advance past {prev}ms"
            )));
        }

        let image = RgbaImage::from_raw(frame.width, frame.height, frame.data.clone())
            .ok_or_else(|| GpucapError::encode("frame data size mismatch with width*height*4"))?;

        match self.pending.take() {
            Some((prev_image, _)) => self.write_frame(prev_image, timestamp_ms)?,
            None => self.written_cs = to_centis(timestamp_ms),
        }
        self.pending = Some((image, timestamp_ms));
        self.frames += 1;
        Ok(())
    }

    fn assemble(mut self: Box<Self>, end_timestamp_ms: u64) -> GpucapResult<Vec<u8>> {
        let Some((image, ts)) = self.pending.take() else {
            return Err(GpucapError::encode("animation has no frames"));
        };
        if end_timestamp_ms <= ts {
            return Err(GpucapError::encode(format!(
                "end timestamp {end_timestamp_ms}ms does not advance past last frame at {ts}ms"
            )));
        }
        self.write_frame(image, end_timestamp_ms)?;

        let Self { sink, encoder, .. } = *self;
        drop(encoder);
        Ok(sink.take())
    }
}

/// Nearest GIF delay unit.
fn to_centis(ms: u64) -> u64 {
    ms.saturating_add(5) / 10
}

/// Map 0..=100 quality onto the GIF quantizer speed (30 = fastest, 1 = best).
fn quality_to_speed(quality: u8) -> i32 {
    let q = i32::from(quality.min(100));
    30 - (q * 29) / 100
}
