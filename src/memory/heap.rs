use crate::device::{BufferHandle, BufferUsage, Device, HeapHandle, StorageMode};
use crate::foundation::core::align_up;
use crate::foundation::error::FrameResult;

/// Placement alignment for buffers carved out of a heap.
pub const HEAP_ALIGNMENT: u64 = 256;

/// Bump allocator that hands out individually bindable buffers placed inside one device heap.
///
/// Same policy as [`super::BumpAllocator`]: no per-allocation free, [`Self::reset`] reclaims
/// everything at once. Buffers handed out are owned by the allocator and released on reset.
pub struct HeapAllocator {
    heap: HeapHandle,
    capacity: u64,
    offset: u64,
    live: Vec<BufferHandle>,
}

impl HeapAllocator {
    pub fn new<D: Device>(device: &D, capacity: u64, label: &str) -> FrameResult<Self> {
        let heap = device.create_heap(label, capacity)?;
        Ok(Self {
            heap,
            capacity,
            offset: 0,
            live: Vec::new(),
        })
    }

    pub fn heap(&self) -> HeapHandle {
        self.heap
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Buffers handed out since the last reset.
    pub fn live_buffers(&self) -> &[BufferHandle] {
        &self.live
    }

    /// Carve a `size`-byte buffer at the next aligned offset.
    ///
    /// Returns `Ok(None)` when the heap is exhausted; device errors are propagated.
    pub fn allocate_buffer<D: Device>(
        &mut self,
        device: &D,
        size: u64,
        usage: BufferUsage,
        mode: StorageMode,
    ) -> FrameResult<Option<BufferHandle>> {
        let start = align_up(self.offset, HEAP_ALIGNMENT);
        if size == 0 || start.saturating_add(size) > self.capacity {
            return Ok(None);
        }
        let buffer = device.create_heap_buffer(self.heap, start, size, usage, mode)?;
        self.offset = start + size;
        self.live.push(buffer);
        Ok(Some(buffer))
    }

    /// Release every carved buffer and rewind to the start of the heap.
    ///
    /// The device must be done with all of them.
    pub fn reset<D: Device>(&mut self, device: &D) {
        for buffer in self.live.drain(..) {
            device.release_buffer(buffer);
        }
        self.offset = 0;
    }

    pub fn release<D: Device>(mut self, device: &D) {
        self.reset(device);
        device.release_heap(self.heap);
    }
}

#[cfg(test)]
#[path = "../../tests/unit/memory/heap.rs"]
mod tests;
