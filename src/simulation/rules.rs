use std::fmt;
use std::str::FromStr;

use crate::foundation::core::GridSize;
use crate::foundation::error::{FrameResult, LifeframeError};

/// How neighbors outside the grid are resolved. Fixed when the stepper is created.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BoundaryMode {
    /// Toroidal: the left edge neighbors the right edge, the top neighbors the bottom.
    #[default]
    Wrap,
    /// Hard wall: cells outside the grid count as dead.
    Clamp,
}

impl BoundaryMode {
    /// Value written into `SimulationState::boundary`.
    pub fn as_u32(self) -> u32 {
        match self {
            Self::Wrap => 0,
            Self::Clamp => 1,
        }
    }

    pub fn from_u32(v: u32) -> Self {
        if v == 0 { Self::Wrap } else { Self::Clamp }
    }
}

/// Two-state birth/survival rule over the 8-neighborhood.
///
/// Bit `n` of `birth` (resp. `survive`) is set when a dead (resp. live) cell with `n` live
/// neighbors is alive in the next generation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LifeRule {
    birth: u16,
    survive: u16,
}

impl LifeRule {
    /// Conway's rule, `B3/S23`.
    pub const CONWAY: Self = Self {
        birth: 1 << 3,
        survive: (1 << 2) | (1 << 3),
    };

    pub fn new(birth: &[u8], survive: &[u8]) -> FrameResult<Self> {
        Ok(Self {
            birth: mask_of(birth)?,
            survive: mask_of(survive)?,
        })
    }

    pub fn birth_mask(self) -> u32 {
        self.birth as u32
    }

    pub fn survive_mask(self) -> u32 {
        self.survive as u32
    }

    pub fn from_masks(birth: u32, survive: u32) -> Self {
        Self {
            birth: (birth & 0x1ff) as u16,
            survive: (survive & 0x1ff) as u16,
        }
    }

    #[inline]
    pub fn next_state(self, alive: bool, live_neighbors: u32) -> bool {
        let bit = 1u16 << live_neighbors.min(8);
        if alive {
            self.survive & bit != 0
        } else {
            self.birth & bit != 0
        }
    }
}

impl Default for LifeRule {
    fn default() -> Self {
        Self::CONWAY
    }
}

fn mask_of(counts: &[u8]) -> FrameResult<u16> {
    let mut mask = 0u16;
    for &n in counts {
        if n > 8 {
            return Err(LifeframeError::config(format!(
                "neighbor count {n} out of range 0..=8"
            )));
        }
        mask |= 1 << n;
    }
    Ok(mask)
}

fn digits(mask: u16) -> String {
    (0..=8u8)
        .filter(|n| mask & (1 << n) != 0)
        .map(|n| char::from(b'0' + n))
        .collect()
}

impl fmt::Display for LifeRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}/S{}", digits(self.birth), digits(self.survive))
    }
}

impl FromStr for LifeRule {
    type Err = LifeframeError;

    /// Parse `B<digits>/S<digits>` (case-insensitive), e.g. `B36/S23`.
    fn from_str(s: &str) -> FrameResult<Self> {
        let bad = || LifeframeError::config(format!("invalid rule '{s}', expected B<n..>/S<n..>"));
        let (b, sv) = s.trim().split_once('/').ok_or_else(bad)?;
        let b = b
            .strip_prefix('B')
            .or_else(|| b.strip_prefix('b'))
            .ok_or_else(bad)?;
        let sv = sv
            .strip_prefix('S')
            .or_else(|| sv.strip_prefix('s'))
            .ok_or_else(bad)?;

        let parse = |part: &str| -> FrameResult<Vec<u8>> {
            part.chars()
                .map(|c| {
                    c.to_digit(10)
                        .map(|d| d as u8)
                        .ok_or_else(|| bad())
                })
                .collect()
        };
        Self::new(&parse(b)?, &parse(sv)?)
    }
}

impl TryFrom<String> for LifeRule {
    type Error = LifeframeError;

    fn try_from(s: String) -> FrameResult<Self> {
        s.parse()
    }
}

impl From<LifeRule> for String {
    fn from(rule: LifeRule) -> Self {
        rule.to_string()
    }
}

/// Live neighbors of `(x, y)` in the 8-neighborhood.
pub fn live_neighbors(
    cells: &[u32],
    size: GridSize,
    x: u32,
    y: u32,
    boundary: BoundaryMode,
) -> u32 {
    let w = size.width as i64;
    let h = size.height as i64;
    let mut n = 0;
    for dy in -1i64..=1 {
        for dx in -1i64..=1 {
            if dx == 0 && dy == 0 {
                continue;
            }
            let (mut nx, mut ny) = (x as i64 + dx, y as i64 + dy);
            match boundary {
                BoundaryMode::Wrap => {
                    nx = nx.rem_euclid(w);
                    ny = ny.rem_euclid(h);
                }
                BoundaryMode::Clamp => {
                    if nx < 0 || ny < 0 || nx >= w || ny >= h {
                        continue;
                    }
                }
            }
            if cells[(ny * w + nx) as usize] != 0 {
                n += 1;
            }
        }
    }
    n
}

/// Advance `src` by one generation into `dst`, only touching cells with
/// `x < limit_x && y < limit_y` (the region covered by dispatched threads).
pub fn step_region(
    src: &[u32],
    dst: &mut [u32],
    size: GridSize,
    rule: LifeRule,
    boundary: BoundaryMode,
    limit_x: u32,
    limit_y: u32,
) {
    debug_assert_eq!(src.len(), size.cell_count());
    debug_assert_eq!(dst.len(), size.cell_count());
    for y in 0..size.height.min(limit_y) {
        for x in 0..size.width.min(limit_x) {
            let i = size.index(x, y);
            let n = live_neighbors(src, size, x, y, boundary);
            dst[i] = rule.next_state(src[i] != 0, n) as u32;
        }
    }
}

/// Advance the whole grid by one generation.
pub fn step_cells(
    src: &[u32],
    dst: &mut [u32],
    size: GridSize,
    rule: LifeRule,
    boundary: BoundaryMode,
) {
    step_region(src, dst, size, rule, boundary, size.width, size.height);
}

#[cfg(test)]
#[path = "../../tests/unit/simulation/rules.rs"]
mod tests;
