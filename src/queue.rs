use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::frame::CapturedFrame;

/// Bounded FIFO of captured frames shared by the render thread and the encoder thread.
///
/// The queue is drop-oldest: pushing into a full queue evicts the front frame first, so the
/// producer never blocks. Evicted frames are handed back to the caller for accounting.
pub struct FrameQueue {
    capacity: usize,
    inner: Mutex<QueueInner>,
}

#[derive(Default)]
struct QueueInner {
    frames: VecDeque<CapturedFrame>,
    high_water: usize,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            inner: Mutex::new(QueueInner {
                frames: VecDeque::with_capacity(capacity),
                high_water: 0,
            }),
        }
    }

    // Frames are plain data, so a panic while holding the lock cannot leave them half-written.
    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append `frame`, returning the evicted front frame when the queue was full.
    pub fn push(&self, frame: CapturedFrame) -> Option<CapturedFrame> {
        let mut inner = self.lock();
        let evicted = if inner.frames.len() >= self.capacity {
            inner.frames.pop_front()
        } else {
            None
        };
        inner.frames.push_back(frame);
        inner.high_water = inner.high_water.max(inner.frames.len());
        evicted
    }

    /// Non-blocking pop of the oldest frame.
    pub fn try_get_frame(&self) -> Option<CapturedFrame> {
        self.lock().frames.pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().frames.is_empty()
    }

    /// Largest length ever observed after a push.
    pub fn high_water(&self) -> usize {
        self.lock().high_water
    }

    /// Discard every queued frame, returning how many were abandoned.
    pub fn clear(&self) -> usize {
        let mut inner = self.lock();
        let n = inner.frames.len();
        inner.frames.clear();
        n
    }
}

/// Counters shared between the producer, the encoder thread and observers.
#[derive(Debug, Default)]
pub struct CaptureStats {
    captured: AtomicU64,
    dropped: AtomicU64,
    encoded: AtomicU64,
    pool_size: AtomicUsize,
    active_buffers: AtomicUsize,
}

impl CaptureStats {
    pub(crate) fn record_captured(&self) {
        self.captured.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self, n: u64) {
        self.dropped.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn record_encoded(&self) {
        self.encoded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_pool(&self, pool_size: usize, active_buffers: usize) {
        self.pool_size.store(pool_size, Ordering::Relaxed);
        self.active_buffers.store(active_buffers, Ordering::Relaxed);
    }

    /// Zero the frame counters for a new recording. Pool gauges are left alone.
    pub(crate) fn reset(&self) {
        self.captured.store(0, Ordering::Relaxed);
        self.dropped.store(0, Ordering::Relaxed);
        self.encoded.store(0, Ordering::Relaxed);
    }

    pub fn captured_frames(&self) -> u64 {
        self.captured.load(Ordering::Relaxed)
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn encoded_frames(&self) -> u64 {
        self.encoded.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self, queue: &FrameQueue) -> StatsSnapshot {
        StatsSnapshot {
            captured_frames: self.captured_frames(),
            dropped_frames: self.dropped_frames(),
            encoded_frames: self.encoded_frames(),
            pool_size: self.pool_size.load(Ordering::Relaxed),
            active_buffers: self.active_buffers.load(Ordering::Relaxed),
            queued_frames: queue.len(),
        }
    }
}

/// Point-in-time copy of the pipeline counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct StatsSnapshot {
    pub captured_frames: u64,
    pub dropped_frames: u64,
    pub encoded_frames: u64,
    pub pool_size: usize,
    pub active_buffers: usize,
    pub queued_frames: usize,
}
