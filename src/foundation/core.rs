use crate::foundation::error::{FrameResult, LifeframeError};

/// Round `n` up to the next multiple of `alignment` (a power of two).
pub const fn align_up(n: u64, alignment: u64) -> u64 {
    (n + alignment - 1) & !(alignment - 1)
}

/// Grid dimensions in cells.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GridSize {
    /// Cells per row.
    pub width: u32,
    /// Rows.
    pub height: u32,
}

impl GridSize {
    /// Create a validated size with both dimensions non-zero.
    pub fn new(width: u32, height: u32) -> FrameResult<Self> {
        if width == 0 || height == 0 {
            return Err(LifeframeError::config("grid dimensions must be non-zero"));
        }
        Ok(Self { width, height })
    }

    pub fn cell_count(self) -> usize {
        (self.width as usize).saturating_mul(self.height as usize)
    }

    /// Size in bytes of one grid buffer (one `u32` per cell).
    pub fn byte_len(self) -> u64 {
        (self.cell_count() as u64).saturating_mul(std::mem::size_of::<u32>() as u64)
    }

    /// Number of `tile × tile` groups covering the grid, partial edge groups included.
    pub fn groups_for_tile(self, tile: u32) -> [u32; 2] {
        [self.width.div_ceil(tile), self.height.div_ceil(tile)]
    }

    /// Linear index of `(x, y)` in row-major order.
    pub fn index(self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/core.rs"]
mod tests;
