use std::sync::Arc;
use std::time::Instant;

use crate::capture::buffer::BufferState;
use crate::capture::completion::{CompletionBridge, MapCompletion};
use crate::capture::convert::bgra_rows_to_rgba;
use crate::capture::device::ReadbackDevice;
use crate::capture::pool::{BufferPool, BufferSlot};
use crate::config::CaptureConfig;
use crate::foundation::core::{FrameNumber, readback_layout};
use crate::foundation::error::{GpucapError, GpucapResult};
use crate::frame::CapturedFrame;
use crate::queue::{CaptureStats, FrameQueue, StatsSnapshot};

/// Result of a non-blocking capture request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Copy and map are in flight; the frame reaches the queue from a later `process_async`.
    Submitted,
    /// The frame was not captured and was counted as dropped.
    Dropped(DropReason),
    /// Not recording; nothing was submitted and nothing was counted.
    NotRecording,
}

impl SubmitOutcome {
    pub fn is_submitted(self) -> bool {
        self == Self::Submitted
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// Every pooled buffer is in flight and the pool is at capacity.
    PoolExhausted,
    /// The device rejected the allocation, copy or map request.
    DeviceError,
}

/// What a bounded flush of in-flight maps achieved.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct FlushReport {
    /// `process_events` rounds driven.
    pub rounds: u32,
    /// Frames that reached the queue during the flush.
    pub completed: usize,
    /// Buffers still map-pending after the bound, destroyed and counted as dropped.
    pub abandoned: usize,
}

/// Producer side of the pipeline: pooled asynchronous GPU readback into a [`FrameQueue`].
///
/// Owns the device; every method must be called from the thread that submits GPU work.
pub struct CaptureSession<D: ReadbackDevice> {
    device: D,
    cfg: CaptureConfig,
    bridge: CompletionBridge,
    pool: BufferPool<D::Buffer>,
    queue: Arc<FrameQueue>,
    stats: Arc<CaptureStats>,
    epoch: Instant,
}

impl<D: ReadbackDevice> CaptureSession<D> {
    pub fn new(device: D, cfg: CaptureConfig) -> GpucapResult<Self> {
        cfg.validate()?;
        let bridge = CompletionBridge::new(device.convention());
        Ok(Self {
            pool: BufferPool::new(cfg.max_buffer_count),
            queue: Arc::new(FrameQueue::new(cfg.max_queued_frames)),
            stats: Arc::new(CaptureStats::default()),
            epoch: Instant::now(),
            device,
            cfg,
            bridge,
        })
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.cfg
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn pool(&self) -> &BufferPool<D::Buffer> {
        &self.pool
    }

    /// Consumer handle of the frame queue.
    pub fn queue(&self) -> Arc<FrameQueue> {
        self.queue.clone()
    }

    pub fn stats(&self) -> Arc<CaptureStats> {
        self.stats.clone()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot(&self.queue)
    }

    /// Non-blocking pop, for callers that consume frames without an encoder session.
    pub fn try_get_frame(&self) -> Option<CapturedFrame> {
        self.queue.try_get_frame()
    }

    fn sync_pool_stats(&self) {
        self.stats.set_pool(self.pool.len(), self.pool.active_count());
    }

    fn drop_frame(&self, frame: FrameNumber, reason: &str) {
        self.stats.record_dropped(1);
        tracing::debug!(frame = frame.0, reason, "dropped frame");
    }

    /// Start copying `texture` into a pooled buffer and request an asynchronous map.
    ///
    /// Never blocks. A full pool or a device failure drops the frame; only invalid dimensions
    /// return an error.
    pub fn submit_capture(
        &mut self,
        texture: &D::Texture,
        width: u32,
        height: u32,
        frame: FrameNumber,
    ) -> GpucapResult<SubmitOutcome> {
        readback_layout(width, height)?;

        let Some(slot) = self.pool.acquire() else {
            self.drop_frame(frame, "buffer pool exhausted");
            return Ok(SubmitOutcome::Dropped(DropReason::PoolExhausted));
        };

        let outcome = match self.start_readback(slot, texture, width, height, frame) {
            Ok(()) => SubmitOutcome::Submitted,
            Err(e) => {
                tracing::warn!(frame = frame.0, error = %e, "capture submission failed");
                self.pool.get_mut(slot).destroy(&mut self.device);
                self.drop_frame(frame, "device error");
                SubmitOutcome::Dropped(DropReason::DeviceError)
            }
        };
        self.sync_pool_stats();
        Ok(outcome)
    }

    fn start_readback(
        &mut self,
        slot: BufferSlot,
        texture: &D::Texture,
        width: u32,
        height: u32,
        frame: FrameNumber,
    ) -> GpucapResult<()> {
        let buf = self.pool.get_mut(slot);
        buf.create_or_resize(&mut self.device, width, height)?;
        let stride = buf.stride();
        let completion = buf.begin_map(frame);
        let gpu = buf
            .gpu()
            .ok_or_else(|| GpucapError::gpu("readback buffer has no allocation"))?;

        self.device
            .copy_texture_to_buffer(texture, gpu, width, height, stride)?;

        let callback = self.bridge.callback_for(&completion, frame);
        self.device.map_read_async(gpu, callback)
    }

    /// Drain map completions: one round of device events, then convert and enqueue every
    /// completed buffer (oldest frame first). Returns the number of frames enqueued.
    pub fn process_async(&mut self) -> usize {
        if let Err(e) = self.device.process_events() {
            tracing::warn!(error = %e, "device event processing failed");
        }

        let mut enqueued = 0;
        for slot in self.pool.completed_slots() {
            let buf = self.pool.get(slot);
            let frame = buf.frame().unwrap_or(FrameNumber(0));
            match self.bridge.outcome(buf.completion()) {
                Some(true) => {
                    self.pool.get_mut(slot).mark_mapped();
                    if self.convert_and_enqueue(slot) {
                        enqueued += 1;
                    }
                }
                Some(false) => {
                    let status = buf.completion().status().unwrap_or_default();
                    tracing::warn!(
                        frame = frame.0,
                        status = self.bridge.convention().describe(status),
                        "buffer map failed"
                    );
                    self.pool.release(slot);
                    self.drop_frame(frame, "map failed");
                }
                None => {}
            }
        }
        self.sync_pool_stats();
        enqueued
    }

    fn convert_and_enqueue(&mut self, slot: BufferSlot) -> bool {
        let buf = self.pool.get(slot);
        debug_assert_eq!(buf.state(), BufferState::Mapped);
        let frame = buf.frame().unwrap_or(FrameNumber(0));
        let (width, height, stride) = (buf.width(), buf.height(), buf.stride());

        let converted = match buf.gpu() {
            Some(gpu) => {
                let converted = read_converted(&self.device, gpu, width, height, stride);
                self.device.unmap(gpu);
                converted
            }
            None => Err(GpucapError::gpu("mapped buffer has no allocation")),
        };
        self.pool.release(slot);

        match converted {
            Ok(data) => {
                self.enqueue(CapturedFrame {
                    width,
                    height,
                    frame_number: frame,
                    timestamp: self.epoch.elapsed(),
                    data,
                });
                true
            }
            Err(e) => {
                tracing::warn!(frame = frame.0, error = %e, "reading mapped buffer failed");
                self.drop_frame(frame, "mapped read failed");
                false
            }
        }
    }

    fn enqueue(&self, frame: CapturedFrame) {
        self.stats.record_captured();
        if let Some(evicted) = self.queue.push(frame) {
            self.drop_frame(evicted.frame_number, "frame queue full");
        }
    }

    /// Blocking capture of a single frame into the queue.
    ///
    /// Uses a one-off buffer outside the pool and polls the device until the map completes or
    /// `sync_poll_iterations` rounds pass. Any failure counts the frame as dropped.
    pub fn submit_capture_sync(
        &mut self,
        texture: &D::Texture,
        width: u32,
        height: u32,
        frame: FrameNumber,
    ) -> GpucapResult<()> {
        let captured = self.readback_blocking(texture, width, height, frame)?;
        self.enqueue(captured);
        Ok(())
    }

    /// Blocking capture that returns the frame instead of queueing it.
    pub fn capture_still(
        &mut self,
        texture: &D::Texture,
        width: u32,
        height: u32,
        frame: FrameNumber,
    ) -> GpucapResult<CapturedFrame> {
        let captured = self.readback_blocking(texture, width, height, frame)?;
        self.stats.record_captured();
        Ok(captured)
    }

    fn readback_blocking(
        &mut self,
        texture: &D::Texture,
        width: u32,
        height: u32,
        frame: FrameNumber,
    ) -> GpucapResult<CapturedFrame> {
        let (stride, size) = readback_layout(width, height)?;
        let buffer = match self.device.create_buffer(size, "gpucap_sync_readback") {
            Ok(b) => b,
            Err(e) => {
                self.drop_frame(frame, "sync buffer allocation failed");
                return Err(e);
            }
        };

        let result = self.readback_into(&buffer, texture, width, height, stride, frame);
        self.device.destroy_buffer(buffer);
        if let Err(e) = &result {
            self.drop_frame(frame, if e.is_timeout() { "sync timeout" } else { "sync failed" });
        }
        result
    }

    fn readback_into(
        &mut self,
        buffer: &D::Buffer,
        texture: &D::Texture,
        width: u32,
        height: u32,
        stride: u32,
        frame: FrameNumber,
    ) -> GpucapResult<CapturedFrame> {
        self.device
            .copy_texture_to_buffer(texture, buffer, width, height, stride)?;

        let completion = MapCompletion::new();
        let callback = self.bridge.callback_for(&completion, frame);
        self.device.map_read_async(buffer, callback)?;

        let mut rounds = 0;
        while !completion.is_complete() && rounds < self.cfg.sync_poll_iterations {
            self.device.process_events()?;
            rounds += 1;
        }

        match self.bridge.outcome(&completion) {
            None => Err(GpucapError::timeout(format!(
                "frame {} not mapped after {rounds} device polls",
                frame.0
            ))),
            Some(false) => {
                let status = completion.status().unwrap_or_default();
                Err(GpucapError::gpu(format!(
                    "map of frame {} failed: {}",
                    frame.0,
                    self.bridge.convention().describe(status)
                )))
            }
            Some(true) => {
                let data = read_converted(&self.device, buffer, width, height, stride);
                self.device.unmap(buffer);
                Ok(CapturedFrame {
                    width,
                    height,
                    frame_number: frame,
                    timestamp: self.epoch.elapsed(),
                    data: data?,
                })
            }
        }
    }

    /// Drive up to `flush_iterations` event rounds until no buffer is map-pending, then destroy
    /// whatever is still pending and count it as dropped.
    pub fn flush(&mut self) -> FlushReport {
        let mut report = FlushReport::default();
        while self.pool.has_pending() && report.rounds < self.cfg.flush_iterations {
            report.completed += self.process_async();
            report.rounds += 1;
        }

        for slot in self.pool.pending_slots() {
            let buf = self.pool.get_mut(slot);
            let frame = buf.frame().unwrap_or(FrameNumber(0));
            buf.destroy(&mut self.device);
            self.drop_frame(frame, "still pending at shutdown");
            report.abandoned += 1;
        }
        self.sync_pool_stats();

        if report.abandoned > 0 {
            tracing::warn!(
                abandoned = report.abandoned,
                rounds = report.rounds,
                "abandoned in-flight captures"
            );
        }
        report
    }

    /// Flush in-flight maps and release every pooled GPU buffer.
    pub fn shutdown(&mut self) -> FlushReport {
        let report = self.flush();
        self.pool.destroy_all(&mut self.device);
        self.sync_pool_stats();
        report
    }
}

impl<D: ReadbackDevice> Drop for CaptureSession<D> {
    fn drop(&mut self) {
        self.pool.destroy_all(&mut self.device);
    }
}

fn read_converted<D: ReadbackDevice>(
    device: &D,
    buffer: &D::Buffer,
    width: u32,
    height: u32,
    stride: u32,
) -> GpucapResult<Vec<u8>> {
    let mut converted = None;
    device.read_mapped(buffer, &mut |mapped: &[u8]| {
        converted = Some(bgra_rows_to_rgba(mapped, width, height, stride));
    })?;
    converted.unwrap_or_else(|| Err(GpucapError::gpu("mapped range was not provided")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::soft::{SoftDevice, SoftDeviceOpts, SoftTexture};
    use crate::capture::completion::MapConvention;

    fn session(cfg: CaptureConfig) -> CaptureSession<SoftDevice> {
        CaptureSession::new(SoftDevice::default(), cfg).unwrap()
    }

    #[test]
    fn submit_is_non_blocking_until_processed() {
        let mut s = session(CaptureConfig::default());
        let tex = SoftTexture::solid(4, 4, [1, 2, 3, 4]);
        let out = s.submit_capture(&tex, 4, 4, FrameNumber(0)).unwrap();
        assert_eq!(out, SubmitOutcome::Submitted);
        assert!(s.queue().is_empty());
        assert_eq!(s.pool().active_count(), 1);

        assert_eq!(s.process_async(), 1);
        let frame = s.try_get_frame().unwrap();
        assert_eq!(frame.frame_number, FrameNumber(0));
        assert_eq!(frame.pixel(3, 3), Some([3, 2, 1, 4]));
        assert_eq!(s.pool().active_count(), 0);
    }

    #[test]
    fn exhausted_pool_drops_exactly_one_per_submission() {
        let mut s = session(CaptureConfig::default().with_max_buffer_count(2));
        let tex = SoftTexture::solid(2, 2, [0, 0, 0, 255]);
        for n in 0..2 {
            assert!(
                s.submit_capture(&tex, 2, 2, FrameNumber(n))
                    .unwrap()
                    .is_submitted()
            );
        }
        for n in 2..5 {
            assert_eq!(
                s.submit_capture(&tex, 2, 2, FrameNumber(n)).unwrap(),
                SubmitOutcome::Dropped(DropReason::PoolExhausted)
            );
            assert_eq!(s.snapshot().dropped_frames, n - 1);
        }
        assert_eq!(s.snapshot().pool_size, 2);
        assert_eq!(s.snapshot().active_buffers, 2);
    }

    #[test]
    fn failed_map_releases_buffer_without_frame() {
        let mut s = session(CaptureConfig::default());
        s.device_mut().fail_next_maps(1);
        let tex = SoftTexture::solid(2, 2, [0, 0, 0, 255]);
        s.submit_capture(&tex, 2, 2, FrameNumber(0)).unwrap();
        assert_eq!(s.process_async(), 0);
        let snap = s.snapshot();
        assert_eq!(snap.dropped_frames, 1);
        assert_eq!(snap.captured_frames, 0);
        assert_eq!(snap.active_buffers, 0);
        assert!(s.queue().is_empty());
    }

    #[test]
    fn resize_reallocates_pooled_buffer() {
        let mut s = session(CaptureConfig::default().with_max_buffer_count(1));
        let small = SoftTexture::solid(2, 2, [0, 0, 0, 255]);
        let large = SoftTexture::solid(80, 2, [0, 0, 0, 255]);
        s.submit_capture(&small, 2, 2, FrameNumber(0)).unwrap();
        s.process_async();
        s.submit_capture(&large, 80, 2, FrameNumber(1)).unwrap();
        s.process_async();

        assert_eq!(s.device().created_buffers(), 2);
        assert_eq!(s.device().live_buffers(), 1);
        assert_eq!(s.try_get_frame().unwrap().width, 2);
        assert_eq!(s.try_get_frame().unwrap().width, 80);
    }

    #[test]
    fn zero_dimensions_are_rejected() {
        let mut s = session(CaptureConfig::default());
        let tex = SoftTexture::solid(1, 1, [0, 0, 0, 255]);
        assert!(s.submit_capture(&tex, 0, 1, FrameNumber(0)).is_err());
        assert!(s.submit_capture_sync(&tex, 1, 0, FrameNumber(0)).is_err());
    }

    #[test]
    fn sync_capture_uses_one_off_buffer() {
        let mut s = session(CaptureConfig::default());
        let tex = SoftTexture::solid(3, 3, [10, 20, 30, 255]);
        s.submit_capture_sync(&tex, 3, 3, FrameNumber(0)).unwrap();

        assert_eq!(s.pool().len(), 0);
        assert_eq!(s.device().live_buffers(), 0);
        let frame = s.try_get_frame().unwrap();
        assert_eq!(frame.pixel(1, 1), Some([30, 20, 10, 255]));
    }

    #[test]
    fn sync_capture_times_out_and_destroys_buffer() {
        let mut s = session(CaptureConfig::default().with_sync_poll_iterations(5));
        s.device_mut().set_stalled(true);
        let tex = SoftTexture::solid(2, 2, [0, 0, 0, 255]);

        let err = s.submit_capture_sync(&tex, 2, 2, FrameNumber(0)).unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(s.device().process_rounds(), 5);
        assert_eq!(s.device().live_buffers(), 0);
        assert_eq!(s.snapshot().dropped_frames, 1);
        assert!(s.queue().is_empty());
    }

    #[test]
    fn sync_capture_reports_map_failure() {
        let mut s = CaptureSession::new(
            SoftDevice::with_convention(MapConvention::Bare),
            CaptureConfig::default(),
        )
        .unwrap();
        s.device_mut().fail_next_maps(1);
        let tex = SoftTexture::solid(2, 2, [0, 0, 0, 255]);
        let err = s.capture_still(&tex, 2, 2, FrameNumber(0)).unwrap_err();
        assert!(matches!(err, GpucapError::Gpu(_)));
        assert_eq!(s.snapshot().dropped_frames, 1);
    }

    #[test]
    fn flush_destroys_still_pending_buffers() {
        let mut s = session(CaptureConfig::default().with_flush_iterations(4));
        let tex = SoftTexture::solid(2, 2, [0, 0, 0, 255]);
        s.submit_capture(&tex, 2, 2, FrameNumber(0)).unwrap();
        s.device_mut().set_stalled(true);
        s.submit_capture(&tex, 2, 2, FrameNumber(1)).unwrap();

        let report = s.flush();
        assert_eq!(report.rounds, 4);
        assert_eq!(report.abandoned, 2);
        assert_eq!(s.snapshot().dropped_frames, 2);
        assert_eq!(s.snapshot().active_buffers, 0);
        assert_eq!(s.device().live_buffers(), 0);
    }

    #[test]
    fn flush_completes_slow_maps_within_bound() {
        let device = SoftDevice::new(SoftDeviceOpts {
            convention: MapConvention::Descriptor,
            map_latency: 3,
        });
        let mut s = CaptureSession::new(device, CaptureConfig::default()).unwrap();
        let tex = SoftTexture::solid(2, 2, [0, 0, 0, 255]);
        s.submit_capture(&tex, 2, 2, FrameNumber(0)).unwrap();
        s.submit_capture(&tex, 2, 2, FrameNumber(1)).unwrap();

        let report = s.flush();
        assert_eq!(report.completed, 2);
        assert_eq!(report.abandoned, 0);
        assert_eq!(report.rounds, 3);
        assert_eq!(s.queue().len(), 2);
    }

    #[test]
    fn drop_releases_every_gpu_buffer() {
        let mut s = session(CaptureConfig::default());
        let tex = SoftTexture::solid(2, 2, [0, 0, 0, 255]);
        s.submit_capture(&tex, 2, 2, FrameNumber(0)).unwrap();
        s.submit_capture(&tex, 2, 2, FrameNumber(1)).unwrap();
        let report = s.shutdown();
        assert_eq!(report.completed, 2);
        assert_eq!(s.device().live_buffers(), 0);
        assert_eq!(s.snapshot().pool_size, 0);
    }
}
