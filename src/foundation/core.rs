use crate::foundation::error::{GpucapError, GpucapResult};

/// Row pitch alignment required for texture-to-buffer copies.
pub const COPY_BYTES_PER_ROW_ALIGNMENT: u32 = 256;

/// Bytes per pixel of every 4-channel 8-bit format the pipeline handles.
pub const BYTES_PER_PIXEL: u32 = 4;

/// Caller-assigned, monotonically increasing capture index.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct FrameNumber(pub u64);

impl FrameNumber {
    /// The frame number following this one.
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

/// Frames-per-second represented as a rational `num/den`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Fps {
    /// Numerator (frames).
    pub num: u32,
    /// Denominator (seconds), must be non-zero.
    pub den: u32,
}

impl Fps {
    /// Create a validated FPS value.
    ///
    /// Rates above 1000 fps are rejected because frame timestamps have millisecond resolution.
    pub fn new(num: u32, den: u32) -> GpucapResult<Self> {
        let fps = Self { num, den };
        fps.validate()?;
        Ok(fps)
    }

    /// Whole-number rate, e.g. `Fps::integer(60)`.
    pub fn integer(fps: u32) -> GpucapResult<Self> {
        Self::new(fps, 1)
    }

    pub fn validate(self) -> GpucapResult<()> {
        if self.den == 0 {
            return Err(GpucapError::validation("Fps den must be > 0"));
        }
        if self.num == 0 {
            return Err(GpucapError::validation("Fps num must be > 0"));
        }
        if self.frame_duration_ms() == 0 {
            return Err(GpucapError::validation(
                "Fps must not exceed 1000 frames per second",
            ));
        }
        Ok(())
    }

    /// Convert to floating-point FPS.
    pub fn as_f64(self) -> f64 {
        f64::from(self.num) / f64::from(self.den)
    }

    /// Duration of one frame in whole milliseconds (`1000 / fps`, truncated).
    pub fn frame_duration_ms(self) -> u64 {
        if self.num == 0 {
            return 0;
        }
        (1000u64 * u64::from(self.den)) / u64::from(self.num)
    }
}

impl Default for Fps {
    fn default() -> Self {
        Self { num: 30, den: 1 }
    }
}

/// Round `value` up to the next multiple of `alignment` (a power of two).
pub fn align_to(value: u32, alignment: u32) -> u32 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

/// Padded row stride of a `width`-pixel, 4-byte-per-pixel copy: `((w*4) + 255) & !255`.
pub fn aligned_row_bytes(width: u32) -> GpucapResult<u32> {
    let unpadded = width
        .checked_mul(BYTES_PER_PIXEL)
        .filter(|b| b.checked_add(COPY_BYTES_PER_ROW_ALIGNMENT - 1).is_some())
        .ok_or_else(|| GpucapError::validation("capture width overflows row stride"))?;
    Ok(align_to(unpadded, COPY_BYTES_PER_ROW_ALIGNMENT))
}

/// Validate capture dimensions, returning `(stride, total_bytes)` of the staging buffer.
pub fn readback_layout(width: u32, height: u32) -> GpucapResult<(u32, u64)> {
    if width == 0 || height == 0 {
        return Err(GpucapError::validation(format!(
            "capture dimensions must be non-zero, got {width}x{height}"
        )));
    }
    let stride = aligned_row_bytes(width)?;
    Ok((stride, u64::from(stride) * u64::from(height)))
}
