use bytemuck::Pod;

use crate::device::{BufferDesc, BufferHandle, BufferUsage, Device, StorageMode};
use crate::foundation::core::align_up;
use crate::foundation::error::{FrameResult, LifeframeError};

/// Every allocation size is rounded up to this many bytes.
pub const ARENA_ALIGNMENT: u64 = 8;

/// Linear per-frame arena over one GPU-visible buffer.
///
/// Allocations are written into a host-side staging copy and uploaded with [`Self::flush`]
/// before the frame is submitted. Slices returned by [`Self::allocate`] borrow the arena, so
/// they cannot be held across [`Self::reset`].
///
/// Not meant for concurrent encoders: use one arena per encoding thread per frame.
pub struct BumpAllocator {
    buffer: BufferHandle,
    capacity: u64,
    offset: u64,
    // u64 words keep the staging bytes 8-aligned for casting.
    staging: Vec<u64>,
}

impl std::fmt::Debug for BumpAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BumpAllocator")
            .field("buffer", &self.buffer)
            .field("capacity", &self.capacity)
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}

impl BumpAllocator {
    /// Create an arena backed by a new buffer of `capacity` bytes.
    ///
    /// `StorageMode::Private` is rejected: the host writes into the arena every frame.
    pub fn new<D: Device>(
        device: &D,
        capacity: u64,
        mode: StorageMode,
        label: &str,
    ) -> FrameResult<Self> {
        if mode == StorageMode::Private {
            return Err(LifeframeError::setup(format!(
                "arena '{label}' needs host-visible memory, got {mode:?}"
            )));
        }
        let capacity = align_up(capacity, ARENA_ALIGNMENT);
        let buffer = device.create_buffer(&BufferDesc {
            label: label.to_owned(),
            size: capacity,
            usage: BufferUsage::STORAGE | BufferUsage::UNIFORM,
            mode,
        })?;
        Ok(Self {
            buffer,
            capacity,
            offset: 0,
            staging: vec![0u64; (capacity / ARENA_ALIGNMENT) as usize],
        })
    }

    pub fn base_buffer(&self) -> BufferHandle {
        self.buffer
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn remaining(&self) -> u64 {
        self.capacity - self.offset
    }

    /// O(1); does not clear memory.
    pub fn reset(&mut self) {
        self.offset = 0;
    }

    /// Allocate `count` zeroed values of `T`, returning the slice and its byte offset.
    ///
    /// # Panics
    ///
    /// When the aligned size does not fit in the remaining capacity. Arena capacity is sized
    /// for a known per-frame workload, so an overrun is a programming error.
    pub fn allocate<T: Pod>(&mut self, count: usize) -> (&mut [T], u64) {
        let capacity = self.capacity;
        let offset = self.offset;
        self.try_allocate(count).unwrap_or_else(|e| {
            panic!("bump allocator overrun at offset {offset} (capacity {capacity}): {e}")
        })
    }

    /// Non-panicking form of [`Self::allocate`].
    pub fn try_allocate<T: Pod>(&mut self, count: usize) -> FrameResult<(&mut [T], u64)> {
        if std::mem::align_of::<T>() as u64 > ARENA_ALIGNMENT {
            return Err(LifeframeError::precondition(format!(
                "type alignment {} exceeds arena alignment {ARENA_ALIGNMENT}",
                std::mem::align_of::<T>()
            )));
        }
        let byte_len = (std::mem::size_of::<T>() as u64)
            .checked_mul(count as u64)
            .ok_or_else(|| LifeframeError::precondition("allocation size overflow"))?;
        let alloc_size = align_up(byte_len, ARENA_ALIGNMENT);
        if self.offset + alloc_size > self.capacity {
            return Err(LifeframeError::precondition(format!(
                "{alloc_size} bytes requested, {} of {} remaining",
                self.remaining(),
                self.capacity
            )));
        }

        let start = self.offset;
        self.offset += alloc_size;

        let words = &mut self.staging
            [(start / ARENA_ALIGNMENT) as usize..(self.offset / ARENA_ALIGNMENT) as usize];
        words.fill(0);
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(words);
        let data = bytemuck::try_cast_slice_mut(&mut bytes[..byte_len as usize])
            .map_err(|e| LifeframeError::precondition(format!("arena cast failed: {e}")))?;
        Ok((data, start))
    }

    /// Move the cursor up to the next multiple of `alignment` so the next allocation can be
    /// bound at a device-aligned offset.
    pub fn align_offset(&mut self, alignment: u64) -> FrameResult<()> {
        let aligned = align_up(self.offset, alignment.max(ARENA_ALIGNMENT));
        // Landing exactly on the end is fine; the next allocation reports the overrun.
        if aligned > self.capacity {
            return Err(LifeframeError::precondition(format!(
                "aligning arena offset to {alignment} exceeds capacity {}",
                self.capacity
            )));
        }
        self.offset = aligned;
        Ok(())
    }

    /// Bytes written this cycle.
    pub fn contents(&self) -> &[u8] {
        &bytemuck::cast_slice::<u64, u8>(&self.staging)[..self.offset as usize]
    }

    /// Upload everything allocated this cycle into the backing buffer.
    pub fn flush<D: Device>(&self, device: &D) -> FrameResult<()> {
        if self.offset == 0 {
            return Ok(());
        }
        device.write_buffer(self.buffer, 0, self.contents())
    }

    pub fn release<D: Device>(self, device: &D) {
        device.release_buffer(self.buffer);
    }
}

#[cfg(test)]
#[path = "../../tests/unit/memory/arena.rs"]
mod tests;
