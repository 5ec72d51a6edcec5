//! Host-memory readback device.
//!
//! Textures are plain BGRA byte arrays and buffer maps complete after a configurable number of
//! [`ReadbackDevice::process_events`] rounds, through either callback convention. Used for
//! headless runs and as the device behind the pipeline tests (failure injection, stalls and
//! leak accounting).

use std::collections::BTreeMap;

use crate::capture::completion::{MapCallback, MapConvention};
use crate::capture::device::ReadbackDevice;
use crate::foundation::core::BYTES_PER_PIXEL;
use crate::foundation::error::{GpucapError, GpucapResult};

/// Byte written into row padding so conversions that read it are caught.
const PADDING_FILL: u8 = 0xCD;

/// A rendered frame held in host memory, channels in B, G, R, A order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SoftTexture {
    width: u32,
    height: u32,
    bgra: Vec<u8>,
}

impl SoftTexture {
    pub fn from_bgra(width: u32, height: u32, bgra: Vec<u8>) -> GpucapResult<Self> {
        let expected = (width as usize) * (height as usize) * (BYTES_PER_PIXEL as usize);
        if bgra.len() != expected {
            return Err(GpucapError::validation(format!(
                "texture data is {} bytes, expected {expected} for {width}x{height}",
                bgra.len()
            )));
        }
        Ok(Self {
            width,
            height,
            bgra,
        })
    }

    /// Every pixel set to `bgra`.
    pub fn solid(width: u32, height: u32, bgra: [u8; 4]) -> Self {
        let px = (width as usize) * (height as usize);
        Self {
            width,
            height,
            bgra: bgra.repeat(px),
        }
    }

    /// Pixels produced by `f(x, y) -> [b, g, r, a]`.
    pub fn from_fn(width: u32, height: u32, f: impl Fn(u32, u32) -> [u8; 4]) -> Self {
        let mut bgra = Vec::with_capacity((width as usize) * (height as usize) * 4);
        for y in 0..height {
            for x in 0..width {
                bgra.extend_from_slice(&f(x, y));
            }
        }
        Self {
            width,
            height,
            bgra,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bgra(&self) -> &[u8] {
        &self.bgra
    }
}

/// Handle to a [`SoftDevice`] buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SoftBuffer(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoftDeviceOpts {
    pub convention: MapConvention,
    /// `process_events` rounds before a map completes; `0` completes inside `map_read_async`.
    pub map_latency: u32,
}

impl Default for SoftDeviceOpts {
    fn default() -> Self {
        Self {
            convention: MapConvention::Descriptor,
            map_latency: 1,
        }
    }
}

struct PendingMap {
    rounds_left: u32,
    callback: MapCallback,
    fail: bool,
}

struct Allocation {
    data: Vec<u8>,
    mapped: bool,
    pending: Option<PendingMap>,
}

#[derive(Default)]
pub struct SoftDevice {
    opts: SoftDeviceOpts,
    next_id: u64,
    allocations: BTreeMap<SoftBuffer, Allocation>,
    fail_next_maps: u32,
    stalled: bool,
    created: u64,
    process_rounds: u64,
}

impl SoftDevice {
    pub fn new(opts: SoftDeviceOpts) -> Self {
        Self {
            opts,
            ..Self::default()
        }
    }

    pub fn with_convention(convention: MapConvention) -> Self {
        Self::new(SoftDeviceOpts {
            convention,
            ..SoftDeviceOpts::default()
        })
    }

    /// The next `n` map requests complete with a failure status.
    pub fn fail_next_maps(&mut self, n: u32) {
        self.fail_next_maps = n;
    }

    /// While stalled, pending maps never complete.
    pub fn set_stalled(&mut self, stalled: bool) {
        self.stalled = stalled;
    }

    pub fn set_map_latency(&mut self, rounds: u32) {
        self.opts.map_latency = rounds;
    }

    /// Buffers created and not yet destroyed.
    pub fn live_buffers(&self) -> usize {
        self.allocations.len()
    }

    pub fn created_buffers(&self) -> u64 {
        self.created
    }

    pub fn pending_maps(&self) -> usize {
        self.allocations
            .values()
            .filter(|a| a.pending.is_some())
            .count()
    }

    pub fn process_rounds(&self) -> u64 {
        self.process_rounds
    }

    fn allocation_mut(&mut self, buffer: &SoftBuffer) -> GpucapResult<&mut Allocation> {
        self.allocations
            .get_mut(buffer)
            .ok_or_else(|| GpucapError::gpu(format!("unknown buffer {buffer:?}")))
    }

    fn deliver(alloc: &mut Allocation, pending: PendingMap) {
        if pending.fail {
            pending
                .callback
                .complete(Err("injected map failure".to_string()));
        } else {
            alloc.mapped = true;
            pending.callback.complete(Ok(()));
        }
    }
}

impl ReadbackDevice for SoftDevice {
    type Texture = SoftTexture;
    type Buffer = SoftBuffer;

    fn convention(&self) -> MapConvention {
        self.opts.convention
    }

    fn create_buffer(&mut self, size: u64, _label: &str) -> GpucapResult<SoftBuffer> {
        let len = usize::try_from(size)
            .map_err(|_| GpucapError::gpu(format!("buffer size {size} exceeds address space")))?;
        let id = SoftBuffer(self.next_id);
        self.next_id += 1;
        self.created += 1;
        self.allocations.insert(
            id,
            Allocation {
                data: vec![0u8; len],
                mapped: false,
                pending: None,
            },
        );
        Ok(id)
    }

    fn destroy_buffer(&mut self, buffer: SoftBuffer) {
        if let Some(alloc) = self.allocations.remove(&buffer)
            && let Some(pending) = alloc.pending
        {
            pending
                .callback
                .complete(Err("buffer destroyed before callback".to_string()));
        }
    }

    fn copy_texture_to_buffer(
        &mut self,
        texture: &SoftTexture,
        buffer: &SoftBuffer,
        width: u32,
        height: u32,
        bytes_per_row: u32,
    ) -> GpucapResult<()> {
        if texture.width != width || texture.height != height {
            return Err(GpucapError::validation(format!(
                "copy extent {width}x{height} does not match texture {}x{}",
                texture.width, texture.height
            )));
        }
        if width == 0 || height == 0 {
            return Err(GpucapError::validation("copy extent must be non-zero"));
        }
        let row_bytes = (width as usize) * (BYTES_PER_PIXEL as usize);
        let stride = bytes_per_row as usize;
        if stride < row_bytes {
            return Err(GpucapError::validation("bytes_per_row smaller than a row"));
        }

        let alloc = self.allocation_mut(buffer)?;
        if alloc.mapped || alloc.pending.is_some() {
            return Err(GpucapError::gpu("copy into a mapped or map-pending buffer"));
        }
        if alloc.data.len() < stride * (height as usize) {
            return Err(GpucapError::gpu("copy exceeds buffer size"));
        }

        alloc.data.fill(PADDING_FILL);
        for (y, src_row) in texture.bgra.chunks_exact(row_bytes).enumerate() {
            let start = y * stride;
            alloc.data[start..start + row_bytes].copy_from_slice(src_row);
        }
        Ok(())
    }

    fn map_read_async(&mut self, buffer: &SoftBuffer, callback: MapCallback) -> GpucapResult<()> {
        if callback.convention() != self.opts.convention {
            return Err(GpucapError::gpu(format!(
                "device expects {:?} map callbacks, got {:?}",
                self.opts.convention,
                callback.convention()
            )));
        }

        let fail = self.fail_next_maps > 0;
        if fail {
            self.fail_next_maps -= 1;
        }
        let latency = self.opts.map_latency;
        let stalled = self.stalled;

        let alloc = self.allocation_mut(buffer)?;
        if alloc.mapped || alloc.pending.is_some() {
            callback.complete(Err("mapping already pending".to_string()));
            return Ok(());
        }

        let pending = PendingMap {
            rounds_left: latency,
            callback,
            fail,
        };
        if latency == 0 && !stalled {
            Self::deliver(alloc, pending);
        } else {
            alloc.pending = Some(pending);
        }
        Ok(())
    }

    fn process_events(&mut self) -> GpucapResult<()> {
        self.process_rounds += 1;
        if self.stalled {
            return Ok(());
        }
        for alloc in self.allocations.values_mut() {
            let Some(pending) = alloc.pending.as_mut() else {
                continue;
            };
            pending.rounds_left = pending.rounds_left.saturating_sub(1);
            if pending.rounds_left == 0
                && let Some(pending) = alloc.pending.take()
            {
                Self::deliver(alloc, pending);
            }
        }
        Ok(())
    }

    fn read_mapped(&self, buffer: &SoftBuffer, read: &mut dyn FnMut(&[u8])) -> GpucapResult<()> {
        let alloc = self
            .allocations
            .get(buffer)
            .ok_or_else(|| GpucapError::gpu(format!("unknown buffer {buffer:?}")))?;
        if !alloc.mapped {
            return Err(GpucapError::gpu("buffer is not mapped"));
        }
        read(&alloc.data);
        Ok(())
    }

    fn unmap(&mut self, buffer: &SoftBuffer) {
        if let Some(alloc) = self.allocations.get_mut(buffer) {
            alloc.mapped = false;
        }
    }
}
