use std::path::Path;
use std::time::Duration;

use crate::device::PixelFormat;
use crate::foundation::core::GridSize;
use crate::foundation::error::{FrameResult, LifeframeError};
use crate::frame::frame_workload_bytes;
use crate::simulation::{BoundaryMode, LifeRule, SeedPattern};

/// Largest grid edge accepted by [`CoordinatorConfig::validate`].
pub const MAX_GRID_EDGE: u32 = 4096;

/// Largest supported frames-in-flight bound.
pub const MAX_FRAMES_IN_FLIGHT: u32 = 8;

/// Binding-offset alignment assumed when sizing arenas without a device at hand. No supported
/// backend requires more.
pub const WORST_CASE_BINDING_ALIGNMENT: u64 = 256;

/// Coordinator settings. JSON keys are camelCase; missing keys take their defaults.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct CoordinatorConfig {
    pub grid_width: u32,
    pub grid_height: u32,
    /// Edge of one cell in pixels.
    pub cell_size: u32,
    pub frames_in_flight: u32,
    /// Capacity of each slot's bump arena.
    pub arena_capacity_bytes: u64,
    pub boundary: BoundaryMode,
    pub rule: LifeRule,
    pub seed: SeedPattern,
    /// `None` waits on frame completion forever.
    pub pacing_timeout_ms: Option<u64>,
    /// Attach the grid simulation. Without it only the primary triangle is drawn.
    pub simulation: bool,
    pub color_format: PixelFormat,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            grid_width: 256,
            grid_height: 256,
            cell_size: 4,
            frames_in_flight: 3,
            arena_capacity_bytes: 1024,
            boundary: BoundaryMode::Wrap,
            rule: LifeRule::CONWAY,
            seed: SeedPattern::default(),
            pacing_timeout_ms: None,
            simulation: true,
            color_format: PixelFormat::Bgra8Unorm,
        }
    }
}

impl CoordinatorConfig {
    pub fn from_json_str(s: &str) -> FrameResult<Self> {
        let config: Self = serde_json::from_str(s)
            .map_err(|e| LifeframeError::config(format!("parse config JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> FrameResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            LifeframeError::config(format!("read config '{}': {e}", path.display()))
        })?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> FrameResult<()> {
        let grid = self.grid_size()?;
        if grid.width > MAX_GRID_EDGE || grid.height > MAX_GRID_EDGE {
            return Err(LifeframeError::config(format!(
                "grid {}x{} exceeds {MAX_GRID_EDGE}x{MAX_GRID_EDGE}",
                grid.width, grid.height
            )));
        }
        if self.cell_size == 0 {
            return Err(LifeframeError::config("cellSize must be non-zero"));
        }
        let (w, h) = (
            u64::from(grid.width) * u64::from(self.cell_size),
            u64::from(grid.height) * u64::from(self.cell_size),
        );
        if w > u64::from(u32::MAX) || h > u64::from(u32::MAX) {
            return Err(LifeframeError::config("surface size overflows"));
        }
        if !(1..=MAX_FRAMES_IN_FLIGHT).contains(&self.frames_in_flight) {
            return Err(LifeframeError::config(format!(
                "framesInFlight must be in 1..={MAX_FRAMES_IN_FLIGHT}, got {}",
                self.frames_in_flight
            )));
        }
        let min = Self::min_arena_capacity();
        if self.arena_capacity_bytes < min {
            return Err(LifeframeError::config(format!(
                "arenaCapacityBytes {} is below the per-frame workload of {min}",
                self.arena_capacity_bytes
            )));
        }
        if self.pacing_timeout_ms == Some(0) {
            return Err(LifeframeError::config(
                "pacingTimeoutMs must be positive (omit it to wait forever)",
            ));
        }
        Ok(())
    }

    /// Smallest arena that holds one frame's transient data on any supported backend.
    pub fn min_arena_capacity() -> u64 {
        frame_workload_bytes(WORST_CASE_BINDING_ALIGNMENT)
    }

    pub fn grid_size(&self) -> FrameResult<GridSize> {
        GridSize::new(self.grid_width, self.grid_height)
    }

    /// Pixel size of the surface that shows the whole grid.
    pub fn surface_size(&self) -> (u32, u32) {
        (
            self.grid_width.saturating_mul(self.cell_size),
            self.grid_height.saturating_mul(self.cell_size),
        )
    }

    pub fn pacing_timeout(&self) -> Option<Duration> {
        self.pacing_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
#[path = "../tests/unit/config.rs"]
mod tests;
