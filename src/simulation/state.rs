use bytemuck::{Pod, Zeroable};

use crate::foundation::core::GridSize;
use crate::simulation::rules::{BoundaryMode, LifeRule};

/// Per-frame parameters read by the simulation kernel. Layout matches the WGSL
/// `SimulationState` struct (32 bytes, uniform-compatible).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct SimulationState {
    pub width: u32,
    pub height: u32,
    pub frame: u32,
    pub elapsed_seconds: f32,
    pub birth_mask: u32,
    pub survive_mask: u32,
    pub boundary: u32,
    pub _pad: u32,
}

impl SimulationState {
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;

    pub fn new(
        size: GridSize,
        frame: u64,
        elapsed_seconds: f32,
        rule: LifeRule,
        boundary: BoundaryMode,
    ) -> Self {
        Self {
            width: size.width,
            height: size.height,
            // The kernel only needs the low bits for animation.
            frame: frame as u32,
            elapsed_seconds,
            birth_mask: rule.birth_mask(),
            survive_mask: rule.survive_mask(),
            boundary: boundary.as_u32(),
            _pad: 0,
        }
    }

    pub fn grid_size(&self) -> GridSize {
        GridSize {
            width: self.width,
            height: self.height,
        }
    }

    pub fn rule(&self) -> LifeRule {
        LifeRule::from_masks(self.birth_mask, self.survive_mask)
    }

    pub fn boundary_mode(&self) -> BoundaryMode {
        BoundaryMode::from_u32(self.boundary)
    }
}
