use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;

use crate::foundation::{
    core::FrameNumber,
    error::{GpucapError, GpucapResult},
};

/// One frame read back from the GPU, tightly packed, red before blue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CapturedFrame {
    pub width: u32,
    pub height: u32,
    pub frame_number: FrameNumber,
    /// Time since the owning capture session was created when the readback completed.
    pub timestamp: Duration,
    /// `width * height * 4` bytes, RGBA8.
    pub data: Vec<u8>,
}

impl CapturedFrame {
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// RGBA value at `(x, y)`, or `None` outside the frame.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = ((y as usize) * (self.width as usize) + (x as usize)) * 4;
        let px = self.data.get(i..i + 4)?;
        Some([px[0], px[1], px[2], px[3]])
    }

    pub fn to_rgba_image(&self) -> GpucapResult<image::RgbaImage> {
        image::RgbaImage::from_raw(self.width, self.height, self.data.clone()).ok_or_else(|| {
            GpucapError::validation(format!(
                "frame {:?} holds {} bytes, expected {}x{}x4",
                self.frame_number,
                self.data.len(),
                self.width,
                self.height
            ))
        })
    }

    pub fn save_png(&self, path: &Path) -> GpucapResult<()> {
        crate::encode::output::ensure_parent_dir(path)?;
        image::save_buffer_with_format(
            path,
            &self.data,
            self.width,
            self.height,
            image::ColorType::Rgba8,
            image::ImageFormat::Png,
        )
        .with_context(|| format!("write png '{}'", path.display()))?;
        Ok(())
    }
}
