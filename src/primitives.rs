//! Transient per-frame draw data. Written into the slot arena every frame and bound by offset.

use bytemuck::{Pod, Zeroable};

use crate::foundation::core::GridSize;

/// One vertex of the primary triangle. Clip-space position, linear RGBA color.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct VertexData {
    pub position: [f32; 4],
    pub color: [f32; 4],
}

/// The primary draw: one colored triangle.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct TriangleData {
    pub vertices: [VertexData; 3],
}

impl TriangleData {
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;

    /// The reference triangle rotated by `angle` radians about the origin.
    pub fn rotated(angle: f32) -> Self {
        const BASE: [([f32; 2], [f32; 4]); 3] = [
            ([0.0, 0.5], [1.0, 0.0, 0.0, 1.0]),
            ([-0.5, -0.5], [0.0, 1.0, 0.0, 1.0]),
            ([0.5, -0.5], [0.0, 0.0, 1.0, 1.0]),
        ];
        let (sin, cos) = angle.sin_cos();
        let vertices = BASE.map(|([x, y], color)| VertexData {
            position: [x * cos - y * sin, x * sin + y * cos, 0.0, 1.0],
            color,
        });
        Self { vertices }
    }
}

/// Viewport parameters for the grid visualisation: each cell covers `cell_size²` pixels
/// starting at the top-left corner of the target.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct GridView {
    pub grid_width: u32,
    pub grid_height: u32,
    pub cell_size: u32,
    pub _pad: u32,
}

impl GridView {
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;

    pub fn new(size: GridSize, cell_size: u32) -> Self {
        Self {
            grid_width: size.width,
            grid_height: size.height,
            cell_size,
            _pad: 0,
        }
    }

    pub fn grid_size(&self) -> GridSize {
        GridSize {
            width: self.grid_width,
            height: self.grid_height,
        }
    }

    /// Cell under pixel `(px, py)`, if any.
    pub fn cell_at(&self, px: u32, py: u32) -> Option<(u32, u32)> {
        if self.cell_size == 0 {
            return None;
        }
        let (cx, cy) = (px / self.cell_size, py / self.cell_size);
        (cx < self.grid_width && cy < self.grid_height).then_some((cx, cy))
    }
}

/// Color of a live cell in the grid visualisation.
pub const ALIVE_RGBA8: [u8; 4] = [242, 242, 217, 255];

/// Clear color of every frame.
pub const CLEAR_COLOR: [f64; 4] = [0.1, 0.1, 0.1, 1.0];
