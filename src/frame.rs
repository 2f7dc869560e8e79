//! Per-frame resource rotation.
//!
//! One [`FrameSlot`] per frame in flight, addressed by `frame mod N`. Slots are allocated once,
//! reset on reuse and released at teardown. The pacing monitor guarantees a slot is only
//! re-acquired after the device finished the submission that last used it.

use crate::device::{BufferDesc, BufferHandle, BufferUsage, CommandList, Device, StorageMode};
use crate::foundation::core::align_up;
use crate::foundation::error::{FrameResult, LifeframeError};
use crate::memory::{ARENA_ALIGNMENT, BumpAllocator};
use crate::primitives::{GridView, TriangleData};
use crate::simulation::{GridBinding, SimulationState};

/// Arena bytes one frame needs when every bound allocation starts at a multiple of
/// `binding_alignment`: the triangle first, then the grid view.
pub fn frame_workload_bytes(binding_alignment: u64) -> u64 {
    let alignment = binding_alignment.max(ARENA_ALIGNMENT);
    align_up(align_up(TriangleData::SIZE, ARENA_ALIGNMENT), alignment)
        + align_up(GridView::SIZE, ARENA_ALIGNMENT)
}

pub struct FrameSlot {
    index: usize,
    commands: CommandList,
    state_buffer: BufferHandle,
    arena: BumpAllocator,
    grid: Option<GridBinding>,
    last_frame: Option<u64>,
}

impl FrameSlot {
    fn new<D: Device>(device: &D, index: usize, arena_capacity: u64) -> FrameResult<Self> {
        let state_buffer = device.create_buffer(&BufferDesc {
            label: format!("frame_state_{index}"),
            size: SimulationState::SIZE,
            usage: BufferUsage::UNIFORM,
            mode: StorageMode::Shared,
        })?;
        let arena = match BumpAllocator::new(
            device,
            arena_capacity,
            StorageMode::Shared,
            &format!("frame_arena_{index}"),
        ) {
            Ok(arena) => arena,
            Err(e) => {
                device.release_buffer(state_buffer);
                return Err(e);
            }
        };
        Ok(Self {
            index,
            commands: CommandList::new(),
            state_buffer,
            arena,
            grid: None,
            last_frame: None,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn commands(&self) -> &CommandList {
        &self.commands
    }

    pub fn state_buffer(&self) -> BufferHandle {
        self.state_buffer
    }

    pub fn arena(&self) -> &BumpAllocator {
        &self.arena
    }

    /// Command list and arena borrowed together for encoding.
    pub fn encoder(&mut self) -> (&mut CommandList, &mut BumpAllocator) {
        (&mut self.commands, &mut self.arena)
    }

    /// Grid pair bound by this slot's most recent encode.
    pub fn grid(&self) -> Option<GridBinding> {
        self.grid
    }

    pub fn set_grid(&mut self, grid: GridBinding) {
        self.grid = Some(grid);
    }

    pub fn last_frame(&self) -> Option<u64> {
        self.last_frame
    }

    pub fn write_state<D: Device>(&self, device: &D, state: &SimulationState) -> FrameResult<()> {
        device.write_buffer(self.state_buffer, 0, bytemuck::bytes_of(state))
    }

    fn release<D: Device>(self, device: &D) {
        self.arena.release(device);
        device.release_buffer(self.state_buffer);
    }
}

/// The N rotating slots.
pub struct FrameResources {
    slots: Vec<FrameSlot>,
}

impl FrameResources {
    pub fn new<D: Device>(
        device: &D,
        frames_in_flight: u32,
        arena_capacity: u64,
    ) -> FrameResult<Self> {
        if frames_in_flight == 0 {
            return Err(LifeframeError::config("frames in flight must be at least 1"));
        }
        let mut slots = Vec::with_capacity(frames_in_flight as usize);
        for index in 0..frames_in_flight as usize {
            match FrameSlot::new(device, index, arena_capacity) {
                Ok(slot) => slots.push(slot),
                Err(e) => {
                    for slot in slots {
                        slot.release(device);
                    }
                    return Err(e);
                }
            }
        }
        Ok(Self { slots })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot_index(&self, frame: u64) -> usize {
        (frame % self.slots.len() as u64) as usize
    }

    pub fn slot(&self, index: usize) -> Option<&FrameSlot> {
        self.slots.get(index)
    }

    /// Reset the slot for `frame` and hand it out for encoding.
    ///
    /// The caller must have waited for the slot's previous submission.
    pub fn acquire(&mut self, frame: u64) -> FrameResult<&mut FrameSlot> {
        let index = self.slot_index(frame);
        let slot = &mut self.slots[index];
        if let Some(last) = slot.last_frame
            && last >= frame
        {
            return Err(LifeframeError::precondition(format!(
                "slot {index} already encoded frame {last}, cannot encode frame {frame}"
            )));
        }
        slot.commands.reset(format!("Frame: {frame}"));
        slot.arena.reset();
        slot.last_frame = Some(frame);
        tracing::debug!(frame, slot = index, "acquired frame slot");
        Ok(slot)
    }

    /// Long-lived buffers owned by the slots, for residency registration.
    pub fn allocations(&self) -> Vec<BufferHandle> {
        self.slots
            .iter()
            .flat_map(|s| [s.state_buffer, s.arena.base_buffer()])
            .collect()
    }

    pub fn release<D: Device>(self, device: &D) {
        for slot in self.slots {
            slot.release(device);
        }
    }
}

#[cfg(test)]
#[path = "../tests/unit/frame.rs"]
mod tests;
