use std::sync::Arc;

use crate::capture::completion::MapCompletion;
use crate::capture::device::ReadbackDevice;
use crate::foundation::core::{FrameNumber, readback_layout};
use crate::foundation::error::GpucapResult;

/// Lifecycle of a pooled staging buffer: `Free -> MapPending -> Mapped -> Free`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferState {
    Free,
    MapPending,
    Mapped,
}

/// A host-mappable staging buffer plus the bookkeeping of the capture it serves.
pub struct ReadbackBuffer<B> {
    gpu: Option<B>,
    width: u32,
    height: u32,
    stride: u32,
    size: u64,
    state: BufferState,
    completion: Arc<MapCompletion>,
    frame: Option<FrameNumber>,
}

impl<B> Default for ReadbackBuffer<B> {
    fn default() -> Self {
        Self {
            gpu: None,
            width: 0,
            height: 0,
            stride: 0,
            size: 0,
            state: BufferState::Free,
            completion: MapCompletion::new(),
            frame: None,
        }
    }
}

impl<B> ReadbackBuffer<B> {
    pub fn state(&self) -> BufferState {
        self.state
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Padded row stride in bytes.
    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Frame being captured, `None` while idle.
    pub fn frame(&self) -> Option<FrameNumber> {
        self.frame
    }

    pub fn has_allocation(&self) -> bool {
        self.gpu.is_some()
    }

    pub(crate) fn gpu(&self) -> Option<&B> {
        self.gpu.as_ref()
    }

    pub(crate) fn completion(&self) -> &Arc<MapCompletion> {
        &self.completion
    }

    /// (Re)allocate the GPU buffer unless it already matches `width x height`.
    ///
    /// Returns `true` when a new allocation was made.
    pub fn create_or_resize<D>(
        &mut self,
        device: &mut D,
        width: u32,
        height: u32,
    ) -> GpucapResult<bool>
    where
        D: ReadbackDevice<Buffer = B>,
    {
        if self.gpu.is_some() && self.width == width && self.height == height {
            return Ok(false);
        }

        let (stride, size) = readback_layout(width, height)?;
        if let Some(old) = self.gpu.take() {
            device.destroy_buffer(old);
        }
        self.gpu = Some(device.create_buffer(size, "gpucap_readback")?);
        self.width = width;
        self.height = height;
        self.stride = stride;
        self.size = size;
        Ok(true)
    }

    /// Enter `MapPending` for `frame` with a fresh completion record.
    pub(crate) fn begin_map(&mut self, frame: FrameNumber) -> Arc<MapCompletion> {
        self.state = BufferState::MapPending;
        self.frame = Some(frame);
        self.completion = MapCompletion::new();
        self.completion.clone()
    }

    pub(crate) fn mark_mapped(&mut self) {
        self.state = BufferState::Mapped;
    }

    /// Back to `Free`. The GPU buffer must already be unmapped.
    pub fn release(&mut self) {
        self.state = BufferState::Free;
        self.frame = None;
        self.completion = MapCompletion::new();
    }

    /// Drop the GPU allocation and return to `Free`; the next use reallocates.
    pub fn destroy<D>(&mut self, device: &mut D)
    where
        D: ReadbackDevice<Buffer = B>,
    {
        if let Some(gpu) = self.gpu.take() {
            device.destroy_buffer(gpu);
        }
        self.width = 0;
        self.height = 0;
        self.stride = 0;
        self.size = 0;
        self.release();
    }
}
