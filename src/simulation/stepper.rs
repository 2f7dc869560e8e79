use smallvec::smallvec;

use crate::device::{
    BindingAccess, BufferBinding, BufferDesc, BufferHandle, BufferUsage, CommandList, ComputePass,
    Device, StorageMode,
};
use crate::foundation::core::GridSize;
use crate::foundation::error::{FrameResult, LifeframeError};
use crate::pipeline::{ComputePipeline, slot};
use crate::simulation::rules::{BoundaryMode, LifeRule};
use crate::simulation::seed::SeedPattern;
use crate::simulation::state::SimulationState;

/// Which physical buffer is read by the next encoded step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GridRole {
    ASource,
    BSource,
}

impl GridRole {
    pub fn flipped(self) -> Self {
        match self {
            Self::ASource => Self::BSource,
            Self::BSource => Self::ASource,
        }
    }
}

/// Source/destination pair bound by one encoded step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GridBinding {
    pub source: BufferHandle,
    pub destination: BufferHandle,
}

/// Ping-pong stepper over two equally sized grid buffers.
///
/// Roles flip when a step is *encoded*, not when it completes: frame F+1 reads exactly the
/// buffer frame F wrote, and the device orders the two submissions. CPU-side safety across
/// frames comes from the frame pacing bound, not from the stepper.
pub struct GridStepper {
    size: GridSize,
    rule: LifeRule,
    boundary: BoundaryMode,
    /// `[A, B]`.
    buffers: [BufferHandle; 2],
    role: GridRole,
    steps_encoded: u64,
}

impl GridStepper {
    /// Create both grid buffers, write `seed` centered into A and zero B.
    pub fn new<D: Device>(
        device: &D,
        size: GridSize,
        rule: LifeRule,
        boundary: BoundaryMode,
        seed: SeedPattern,
    ) -> FrameResult<Self> {
        let initial = seed.centered_grid(size)?;
        let desc = |label: &str| BufferDesc {
            label: label.to_owned(),
            size: size.byte_len(),
            usage: BufferUsage::STORAGE,
            mode: StorageMode::Shared,
        };

        let a = device.create_buffer(&desc("life_grid_a"))?;
        let b = match device.create_buffer(&desc("life_grid_b")) {
            Ok(b) => b,
            Err(e) => {
                device.release_buffer(a);
                return Err(e);
            }
        };
        let seeded = device
            .write_buffer(a, 0, bytemuck::cast_slice(&initial))
            .and_then(|_| device.write_buffer(b, 0, &vec![0u8; size.byte_len() as usize]));
        if let Err(e) = seeded {
            device.release_buffer(a);
            device.release_buffer(b);
            return Err(e);
        }

        tracing::info!(
            width = size.width,
            height = size.height,
            %rule,
            ?boundary,
            ?seed,
            "grid stepper seeded"
        );
        Ok(Self {
            size,
            rule,
            boundary,
            buffers: [a, b],
            role: GridRole::ASource,
            steps_encoded: 0,
        })
    }

    pub fn size(&self) -> GridSize {
        self.size
    }

    pub fn rule(&self) -> LifeRule {
        self.rule
    }

    pub fn boundary(&self) -> BoundaryMode {
        self.boundary
    }

    pub fn role(&self) -> GridRole {
        self.role
    }

    pub fn steps_encoded(&self) -> u64 {
        self.steps_encoded
    }

    /// Both grid buffers, `[A, B]`.
    pub fn buffers(&self) -> [BufferHandle; 2] {
        self.buffers
    }

    /// Buffer the next step reads (after `k` steps: the buffer step `k` wrote).
    pub fn source(&self) -> BufferHandle {
        self.binding().source
    }

    pub fn destination(&self) -> BufferHandle {
        self.binding().destination
    }

    pub fn binding(&self) -> GridBinding {
        let [a, b] = self.buffers;
        match self.role {
            GridRole::ASource => GridBinding {
                source: a,
                destination: b,
            },
            GridRole::BSource => GridBinding {
                source: b,
                destination: a,
            },
        }
    }

    /// Workgroups covering the grid; partial edge groups are included and the kernel
    /// bounds-checks the extra threads.
    pub fn workgroups(&self, pipeline: &ComputePipeline) -> [u32; 3] {
        let [tx, ty, _] = pipeline.workgroup_size();
        let [gx, _] = self.size.groups_for_tile(tx.max(1));
        let [_, gy] = self.size.groups_for_tile(ty.max(1));
        [gx, gy, 1]
    }

    pub fn simulation_state(&self, frame: u64, elapsed_seconds: f32) -> SimulationState {
        SimulationState::new(self.size, frame, elapsed_seconds, self.rule, self.boundary)
    }

    /// Record one generation into `commands` and flip roles. Returns the pair that was bound.
    pub fn encode_step(
        &mut self,
        commands: &mut CommandList,
        state_buffer: BufferHandle,
        pipeline: &ComputePipeline,
    ) -> GridBinding {
        let binding = self.binding();
        commands.push_compute(ComputePass {
            label: format!("life step {}", self.steps_encoded + 1),
            pipeline: pipeline.handle(),
            bindings: smallvec![
                BufferBinding::whole(slot::SOURCE_GRID, binding.source, BindingAccess::Read),
                BufferBinding::whole(
                    slot::DESTINATION_GRID,
                    binding.destination,
                    BindingAccess::ReadWrite
                ),
                BufferBinding::range(
                    slot::SIMULATION_STATE,
                    state_buffer,
                    0,
                    SimulationState::SIZE,
                    BindingAccess::Uniform
                ),
            ],
            workgroups: self.workgroups(pipeline),
        });

        self.role = self.role.flipped();
        self.steps_encoded += 1;
        binding
    }

    /// Read the current source grid. The device must be idle.
    pub fn read_source<D: Device>(&self, device: &D) -> FrameResult<Vec<u32>> {
        let bytes = device.read_buffer(self.source(), 0, self.size.byte_len())?;
        if bytes.len() as u64 != self.size.byte_len() {
            return Err(LifeframeError::device(format!(
                "grid readback returned {} bytes, expected {}",
                bytes.len(),
                self.size.byte_len()
            )));
        }
        Ok(bytemuck::pod_collect_to_vec(&bytes))
    }

    pub fn release<D: Device>(self, device: &D) {
        for buffer in self.buffers {
            device.release_buffer(buffer);
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/simulation/stepper.rs"]
mod tests;
