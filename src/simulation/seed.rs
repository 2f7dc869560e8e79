use crate::foundation::core::GridSize;
use crate::foundation::error::{FrameResult, LifeframeError};

/// Fixed patterns the grid can be seeded with at startup.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SeedPattern {
    /// 2×2 still life.
    Block,
    /// 3×1 period-2 oscillator.
    Blinker,
    Glider,
    /// Long-lived methuselah; the default seed.
    #[default]
    RPentomino,
}

impl SeedPattern {
    /// Live cells relative to the pattern's top-left corner.
    pub fn cells(self) -> &'static [(u32, u32)] {
        match self {
            Self::Block => &[(0, 0), (1, 0), (0, 1), (1, 1)],
            Self::Blinker => &[(0, 0), (1, 0), (2, 0)],
            Self::Glider => &[(1, 0), (2, 1), (0, 2), (1, 2), (2, 2)],
            Self::RPentomino => &[(1, 0), (2, 0), (0, 1), (1, 1), (1, 2)],
        }
    }

    /// Bounding box `(width, height)`.
    pub fn extent(self) -> (u32, u32) {
        self.cells()
            .iter()
            .fold((0, 0), |(w, h), &(x, y)| (w.max(x + 1), h.max(y + 1)))
    }

    /// Top-left corner that centers the pattern in `size`.
    pub fn centered_origin(self, size: GridSize) -> FrameResult<(u32, u32)> {
        let (pw, ph) = self.extent();
        if pw > size.width || ph > size.height {
            return Err(LifeframeError::config(format!(
                "seed pattern {self:?} ({pw}x{ph}) does not fit a {}x{} grid",
                size.width, size.height
            )));
        }
        Ok(((size.width - pw) / 2, (size.height - ph) / 2))
    }

    /// Build a full grid with only this pattern alive, centered.
    pub fn centered_grid(self, size: GridSize) -> FrameResult<Vec<u32>> {
        let (ox, oy) = self.centered_origin(size)?;
        let mut cells = vec![0u32; size.cell_count()];
        for &(x, y) in self.cells() {
            cells[size.index(ox + x, oy + y)] = 1;
        }
        Ok(cells)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/simulation/seed.rs"]
mod tests;
