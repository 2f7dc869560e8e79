//! The frame coordinator: per-frame orchestration of slots, simulation, rendering and pacing.
//!
//! Construction is all-or-nothing. Once built, [`FrameCoordinator::draw`] runs one frame:
//!
//! 1. pick the next frame index;
//! 2. past the first N frames, wait until frame `index - N` completed;
//! 3. acquire slot `index mod N`, resetting its command list and arena;
//! 4. write the frame's [`SimulationState`];
//! 5. encode the simulation step (when a stepper is attached);
//! 6. encode the render pass: grid visualisation reading the freshly written destination,
//!    then the primary triangle from arena data;
//! 7. upload the arena, check residency and submit everything as one unit that signals the
//!    pacing timeline with the frame index;
//! 8. record the submission with the pacing monitor.
//!
//! Device errors are surfaced, never retried. An error after step 3 leaves the slot and the
//! grid roles in a state no later frame can build on, so the coordinator refuses further
//! frames; the caller tears it down.

use smallvec::smallvec;

use crate::config::CoordinatorConfig;
use crate::device::{
    BindingAccess, BufferBinding, BufferHandle, Device, DrawCall, PixelFormat, RenderPass,
};
use crate::foundation::error::{FrameResult, LifeframeError};
use crate::frame::{FrameResources, FrameSlot, frame_workload_bytes};
use crate::pacing::PacingMonitor;
use crate::pipeline::{GRID_TILE, PipelineSet, slot};
use crate::primitives::{CLEAR_COLOR, GridView, TriangleData};
use crate::residency::ResidencyRegistry;
use crate::simulation::{GridBinding, GridStepper, SimulationState};
use crate::surface::{Drawable, Surface};

/// What one [`FrameCoordinator::draw`] call did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameReport {
    pub frame: u64,
    pub slot: usize,
    /// Whether pacing had to block before encoding.
    pub waited: bool,
    /// Grid pair the simulation step bound, if simulating.
    pub grid: Option<GridBinding>,
    /// Arena bytes used by the frame.
    pub arena_bytes: u64,
    pub passes: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    pub frames_submitted: u64,
    pub frames_completed: u64,
    pub in_flight: u64,
    pub pacing_waits: u64,
}

struct Resources {
    pipelines: PipelineSet,
    frames: FrameResources,
    stepper: Option<GridStepper>,
    residency: ResidencyRegistry,
    pacing: PacingMonitor,
}

impl Resources {
    fn release<D: Device>(self, device: &D) {
        if let Some(stepper) = self.stepper {
            stepper.release(device);
        }
        self.frames.release(device);
        self.pipelines.release(device);
        self.residency.release(device);
        self.pacing.release(device);
    }
}

/// Objects created so far during construction.
#[derive(Default)]
struct Partial {
    pipelines: Option<PipelineSet>,
    frames: Option<FrameResources>,
    stepper: Option<GridStepper>,
    residency: Option<ResidencyRegistry>,
    pacing: Option<PacingMonitor>,
}

impl Partial {
    fn finish(self) -> Result<Resources, Self> {
        match self {
            Partial {
                pipelines: Some(pipelines),
                frames: Some(frames),
                stepper,
                residency: Some(residency),
                pacing: Some(pacing),
            } => Ok(Resources {
                pipelines,
                frames,
                stepper,
                residency,
                pacing,
            }),
            incomplete => Err(incomplete),
        }
    }

    fn release<D: Device>(self, device: &D) {
        if let Some(pacing) = self.pacing {
            pacing.release(device);
        }
        if let Some(residency) = self.residency {
            residency.release(device);
        }
        if let Some(stepper) = self.stepper {
            stepper.release(device);
        }
        if let Some(frames) = self.frames {
            frames.release(device);
        }
        if let Some(pipelines) = self.pipelines {
            pipelines.release(device);
        }
    }
}

pub struct FrameCoordinator<D: Device> {
    device: D,
    config: CoordinatorConfig,
    color_format: PixelFormat,
    binding_alignment: u64,
    /// `None` once shut down.
    resources: Option<Resources>,
    frame_index: u64,
    pacing_waits: u64,
    poisoned: Option<String>,
}

impl<D: Device> FrameCoordinator<D> {
    /// Validate `config`, check the device, compile pipelines, allocate slots, seed the grid,
    /// commit residency and create the pacing timeline. On error everything created so far is
    /// released and no coordinator exists.
    ///
    /// Pipelines render into `config.color_format`; drawables must match it.
    #[tracing::instrument(skip_all, fields(color_format = ?config.color_format))]
    pub fn new(device: D, config: CoordinatorConfig) -> FrameResult<Self> {
        config.validate()?;
        let color_format = config.color_format;
        let binding_alignment = check_capabilities(&device, &config)?;

        let mut partial = Partial::default();
        if let Err(e) = build(&device, &config, color_format, &mut partial) {
            partial.release(&device);
            return Err(e);
        }
        let resources = match partial.finish() {
            Ok(r) => r,
            Err(partial) => {
                partial.release(&device);
                return Err(LifeframeError::setup(
                    "coordinator setup left resources missing",
                ));
            }
        };

        tracing::info!(
            device = %device.capabilities().name,
            frames_in_flight = config.frames_in_flight,
            simulation = resources.stepper.is_some(),
            resident = resources.residency.committed().count(),
            "frame coordinator ready"
        );
        Ok(Self {
            device,
            config,
            color_format,
            binding_alignment,
            resources: Some(resources),
            frame_index: 0,
            pacing_waits: 0,
            poisoned: None,
        })
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn color_format(&self) -> PixelFormat {
        self.color_format
    }

    /// Index of the last submitted frame; 0 before the first.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn stepper(&self) -> Option<&GridStepper> {
        self.resources.as_ref()?.stepper.as_ref()
    }

    pub fn pipelines(&self) -> Option<&PipelineSet> {
        self.resources.as_ref().map(|r| &r.pipelines)
    }

    pub fn residency(&self) -> Option<&ResidencyRegistry> {
        self.resources.as_ref().map(|r| &r.residency)
    }

    pub fn slot(&self, index: usize) -> Option<&FrameSlot> {
        self.resources.as_ref()?.frames.slot(index)
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.is_some()
    }

    pub fn stats(&self) -> CoordinatorStats {
        let Some(res) = &self.resources else {
            return CoordinatorStats {
                frames_submitted: self.frame_index,
                frames_completed: self.frame_index,
                pacing_waits: self.pacing_waits,
                ..CoordinatorStats::default()
            };
        };
        CoordinatorStats {
            frames_submitted: res.pacing.last_submitted(),
            frames_completed: res.pacing.completed(&self.device),
            in_flight: res.pacing.in_flight(&self.device),
            pacing_waits: self.pacing_waits,
        }
    }

    /// Register more long-lived buffers and commit them. Must happen before any frame binds
    /// them.
    pub fn amend_residency(
        &mut self,
        buffers: impl IntoIterator<Item = BufferHandle>,
    ) -> FrameResult<()> {
        let Some(res) = self.resources.as_mut() else {
            return Err(shut_down());
        };
        res.residency.add_allocations(buffers);
        res.residency.commit(&self.device)
    }

    /// Encode and submit one frame into `drawable`.
    #[tracing::instrument(skip_all, fields(frame = self.frame_index + 1))]
    pub fn draw(
        &mut self,
        drawable: &Drawable,
        elapsed_seconds: f32,
    ) -> FrameResult<FrameReport> {
        if let Some(reason) = &self.poisoned {
            return Err(LifeframeError::device(format!(
                "coordinator unusable after an earlier frame failed: {reason}"
            )));
        }
        if drawable.format != self.color_format {
            return Err(LifeframeError::precondition(format!(
                "drawable is {:?}, pipelines render {:?}",
                drawable.format, self.color_format
            )));
        }
        let frame = self.frame_index + 1;
        let Some(res) = self.resources.as_mut() else {
            return Err(shut_down());
        };

        let waited = res.pacing.wait_for_frame(&self.device, frame)?;
        if waited {
            self.pacing_waits += 1;
        }

        match encode_and_submit(
            &self.device,
            res,
            self.binding_alignment,
            &self.config,
            drawable,
            frame,
            elapsed_seconds,
        ) {
            Ok(mut report) => {
                self.frame_index = frame;
                report.waited = waited;
                Ok(report)
            }
            Err(e) => {
                tracing::error!(frame, error = %e, "frame failed, refusing further frames");
                self.poisoned = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Acquire a drawable from `surface`, draw into it and present it.
    ///
    /// When the frame fails the drawable goes back to `surface` unpresented, so a retry after a
    /// [`LifeframeError::PacingTimeout`] can acquire it again.
    pub fn render_to<S: Surface<D>>(
        &mut self,
        surface: &mut S,
        elapsed_seconds: f32,
    ) -> FrameResult<FrameReport> {
        let drawable = surface.next_drawable(&self.device)?;
        match self.draw(&drawable, elapsed_seconds) {
            Ok(report) => {
                surface.present(&self.device, drawable)?;
                Ok(report)
            }
            Err(e) => {
                if let Err(discard) = surface.discard(&self.device, drawable) {
                    tracing::warn!(error = %discard, "failed to return an unpresented drawable");
                }
                Err(e)
            }
        }
    }

    /// Block until every submitted frame completed.
    pub fn wait_idle(&self) -> FrameResult<()> {
        match &self.resources {
            Some(res) => res.pacing.wait_idle(&self.device).map(|_| ()),
            None => Ok(()),
        }
    }

    /// Current source grid: the generation written by the last submitted frame.
    pub fn read_grid(&self) -> FrameResult<Vec<u32>> {
        let stepper = self
            .stepper()
            .ok_or_else(|| LifeframeError::precondition("simulation is disabled"))?;
        self.wait_idle()?;
        stepper.read_source(&self.device)
    }

    pub fn read_target(&self, drawable: &Drawable) -> FrameResult<Vec<u8>> {
        self.wait_idle()?;
        self.device.read_render_target(drawable.target)
    }

    /// Wait for the device, then release every owned device object exactly once.
    ///
    /// When the wait fails the objects are leaked rather than freed under the device.
    pub fn shutdown(mut self) -> FrameResult<()> {
        self.teardown()
    }

    fn teardown(&mut self) -> FrameResult<()> {
        let Some(res) = self.resources.take() else {
            return Ok(());
        };
        if let Err(e) = res.pacing.wait_idle(&self.device) {
            tracing::warn!(error = %e, "device did not go idle; leaking frame resources");
            return Err(e);
        }
        res.release(&self.device);
        tracing::info!(frames = self.frame_index, "frame coordinator shut down");
        Ok(())
    }
}

impl<D: Device> Drop for FrameCoordinator<D> {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            tracing::warn!(error = %e, "frame coordinator dropped without a clean shutdown");
        }
    }
}

fn shut_down() -> LifeframeError {
    LifeframeError::precondition("coordinator has been shut down")
}

/// Returns the binding-offset alignment the arena must honor.
fn check_capabilities<D: Device>(device: &D, config: &CoordinatorConfig) -> FrameResult<u64> {
    let caps = device.capabilities();
    if !caps.supports_residency_sets {
        return Err(LifeframeError::setup(format!(
            "device '{}' has no residency sets",
            caps.name
        )));
    }
    let alignment = caps.min_binding_offset_alignment.max(1);
    if !alignment.is_power_of_two() {
        return Err(LifeframeError::setup(format!(
            "device '{}' reports binding alignment {alignment}, not a power of two",
            caps.name
        )));
    }
    let workload = frame_workload_bytes(alignment);
    if config.arena_capacity_bytes < workload {
        return Err(LifeframeError::setup(format!(
            "arena of {} bytes cannot hold a frame \
             ({workload} bytes at {alignment}-byte binding alignment)",
            config.arena_capacity_bytes
        )));
    }
    if config.simulation {
        if !caps.supports_compute {
            return Err(LifeframeError::setup(format!(
                "device '{}' cannot run compute passes",
                caps.name
            )));
        }
        if caps.max_compute_invocations_per_workgroup < GRID_TILE * GRID_TILE {
            return Err(LifeframeError::setup(format!(
                "device '{}' allows {} invocations per workgroup, the simulation needs {}",
                caps.name,
                caps.max_compute_invocations_per_workgroup,
                GRID_TILE * GRID_TILE
            )));
        }
        let grid_bytes = config.grid_size()?.byte_len();
        if grid_bytes > caps.max_buffer_size {
            return Err(LifeframeError::setup(format!(
                "grid buffer of {grid_bytes} bytes exceeds the device limit of {}",
                caps.max_buffer_size
            )));
        }
    }
    Ok(alignment)
}

fn build<D: Device>(
    device: &D,
    config: &CoordinatorConfig,
    color_format: PixelFormat,
    partial: &mut Partial,
) -> FrameResult<()> {
    let pipelines = partial.pipelines.insert(PipelineSet::build(
        device,
        color_format,
        config.simulation,
    )?);
    let simulating = pipelines.life.is_some();

    let frames = partial.frames.insert(FrameResources::new(
        device,
        config.frames_in_flight,
        config.arena_capacity_bytes,
    )?);
    let mut resident = frames.allocations();

    if simulating {
        let stepper = partial.stepper.insert(GridStepper::new(
            device,
            config.grid_size()?,
            config.rule,
            config.boundary,
            config.seed,
        )?);
        resident.extend(stepper.buffers());
    }

    let residency = partial
        .residency
        .insert(ResidencyRegistry::create(device, "frame coordinator")?);
    residency.add_allocations(resident);
    residency.commit(device)?;

    partial.pacing = Some(PacingMonitor::new(
        device,
        config.frames_in_flight,
        config.pacing_timeout(),
    )?);
    Ok(())
}

/// Steps 3 to 8 for one frame.
fn encode_and_submit<D: Device>(
    device: &D,
    res: &mut Resources,
    binding_alignment: u64,
    config: &CoordinatorConfig,
    drawable: &Drawable,
    frame: u64,
    elapsed_seconds: f32,
) -> FrameResult<FrameReport> {
    let Resources {
        pipelines,
        frames,
        stepper,
        residency,
        pacing,
    } = res;

    let slot = frames.acquire(frame)?;
    let slot_index = slot.index();
    let state_buffer = slot.state_buffer();

    let grid_size = config.grid_size()?;
    let state = match stepper {
        Some(s) => s.simulation_state(frame, elapsed_seconds),
        None => SimulationState::new(
            grid_size,
            frame,
            elapsed_seconds,
            config.rule,
            config.boundary,
        ),
    };
    slot.write_state(device, &state)?;

    let (commands, arena) = slot.encoder();
    let grid = match (stepper.as_mut(), pipelines.life.as_ref()) {
        (Some(stepper), Some(life)) => {
            Some(stepper.encode_step(commands, state_buffer, &life.compute))
        }
        _ => None,
    };

    // Triangle first: the arena is sized for this order.
    arena.align_offset(binding_alignment)?;
    let (triangle, triangle_offset) = arena.try_allocate::<TriangleData>(1)?;
    triangle[0] = TriangleData::rotated(elapsed_seconds);
    let triangle_draw = DrawCall {
        pipeline: pipelines.triangle.handle(),
        bindings: smallvec![BufferBinding::range(
            slot::TRIANGLE,
            arena.base_buffer(),
            triangle_offset,
            TriangleData::SIZE,
            BindingAccess::Uniform
        )],
        vertex_count: 3,
        instance_count: 1,
    };

    // The grid is drawn underneath the triangle.
    let mut draws = Vec::with_capacity(2);
    if let (Some(grid), Some(life)) = (grid, pipelines.life.as_ref()) {
        arena.align_offset(binding_alignment)?;
        let (view, view_offset) = arena.try_allocate::<GridView>(1)?;
        view[0] = GridView::new(grid_size, config.cell_size);
        draws.push(DrawCall {
            pipeline: life.render.handle(),
            bindings: smallvec![
                BufferBinding::whole(slot::VISIBLE_GRID, grid.destination, BindingAccess::Read),
                BufferBinding::range(
                    slot::GRID_VIEW,
                    arena.base_buffer(),
                    view_offset,
                    GridView::SIZE,
                    BindingAccess::Uniform
                ),
            ],
            vertex_count: 3,
            instance_count: 1,
        });
    }
    draws.push(triangle_draw);

    commands.push_render(RenderPass {
        label: format!("frame {frame} render"),
        target: drawable.target,
        clear_color: CLEAR_COLOR,
        draws,
    });

    arena.flush(device)?;
    let arena_bytes = arena.offset();
    residency.ensure_resident(commands.referenced_buffers())?;
    device.submit(commands, pacing.signal_for(frame))?;
    let passes = commands.passes().len();
    pacing.advance(frame)?;

    if let Some(grid) = grid {
        slot.set_grid(grid);
    }
    tracing::debug!(frame, slot = slot_index, arena_bytes, passes, "frame submitted");
    Ok(FrameReport {
        frame,
        slot: slot_index,
        waited: false,
        grid,
        arena_bytes,
        passes,
    })
}

#[cfg(test)]
#[path = "../tests/unit/coordinator.rs"]
mod tests;
