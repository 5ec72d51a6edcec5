use crate::capture::buffer::{BufferState, ReadbackBuffer};
use crate::capture::device::ReadbackDevice;

/// Index of a buffer inside its [`BufferPool`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferSlot(pub usize);

/// Bounded set of staging buffers; never holds more than `capacity`.
pub struct BufferPool<B> {
    capacity: usize,
    buffers: Vec<ReadbackBuffer<B>>,
}

impl<B> BufferPool<B> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            buffers: Vec::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Buffers not in `Free`.
    pub fn active_count(&self) -> usize {
        self.buffers
            .iter()
            .filter(|b| b.state() != BufferState::Free)
            .count()
    }

    /// First `Free` buffer, growing the pool while below capacity.
    ///
    /// `None` means every buffer is in flight and the pool is full; the caller drops the frame.
    pub fn acquire(&mut self) -> Option<BufferSlot> {
        if let Some(i) = self
            .buffers
            .iter()
            .position(|b| b.state() == BufferState::Free)
        {
            return Some(BufferSlot(i));
        }
        if self.buffers.len() >= self.capacity {
            return None;
        }
        self.buffers.push(ReadbackBuffer::default());
        Some(BufferSlot(self.buffers.len() - 1))
    }

    pub fn get(&self, slot: BufferSlot) -> &ReadbackBuffer<B> {
        &self.buffers[slot.0]
    }

    pub fn get_mut(&mut self, slot: BufferSlot) -> &mut ReadbackBuffer<B> {
        &mut self.buffers[slot.0]
    }

    /// Reset a buffer to `Free`. The GPU buffer must already be unmapped.
    pub fn release(&mut self, slot: BufferSlot) {
        self.buffers[slot.0].release();
    }

    /// Slots in `MapPending` whose completion has been signalled, oldest frame first.
    pub fn completed_slots(&self) -> Vec<BufferSlot> {
        let mut ready: Vec<(BufferSlot, _)> = self
            .buffers
            .iter()
            .enumerate()
            .filter(|(_, b)| b.state() == BufferState::MapPending && b.completion().is_complete())
            .map(|(i, b)| (BufferSlot(i), b.frame()))
            .collect();
        ready.sort_by_key(|&(_, frame)| frame);
        ready.into_iter().map(|(slot, _)| slot).collect()
    }

    pub fn pending_slots(&self) -> Vec<BufferSlot> {
        self.buffers
            .iter()
            .enumerate()
            .filter(|(_, b)| b.state() == BufferState::MapPending)
            .map(|(i, _)| BufferSlot(i))
            .collect()
    }

    pub fn has_pending(&self) -> bool {
        self.buffers
            .iter()
            .any(|b| b.state() == BufferState::MapPending)
    }

    /// Destroy every GPU allocation and empty the pool.
    pub fn destroy_all<D>(&mut self, device: &mut D)
    where
        D: ReadbackDevice<Buffer = B>,
    {
        for buf in &mut self.buffers {
            buf.destroy(device);
        }
        self.buffers.clear();
    }
}
