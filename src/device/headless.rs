//! CPU reference device.
//!
//! Executes the simulation kernel and both render pipelines on the host, enforces residency on
//! every submission, and can hold completions back so callers observe real in-flight latency.
//! Execution happens in submission order; passes within one submission run in recording order.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::device::{
    BindingAccess, BufferBinding, BufferDesc, BufferHandle, BufferUsage, CommandList,
    ComputePipelineDesc, Device, DeviceCapabilities, DrawCall, HeapHandle, Pass, PipelineHandle,
    PixelFormat, RenderPipelineDesc, ResidencySetHandle, ShaderStage, Signal, StorageMode,
    TargetHandle, TimelineHandle,
};
use crate::foundation::core::GridSize;
use crate::foundation::error::{FrameResult, LifeframeError};
use crate::pipeline::{entry, slot};
use crate::primitives::{ALIVE_RGBA8, GridView, TriangleData};
use crate::simulation::rules::step_region;
use crate::simulation::state::SimulationState;

/// When submitted work executes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CompletionMode {
    /// Execute and signal inside `submit`.
    #[default]
    Immediate,
    /// Queue work until [`HeadlessDevice::complete_through`] or
    /// [`HeadlessDevice::complete_all`] runs it.
    Manual,
}

#[derive(Clone, Debug)]
pub struct HeadlessOpts {
    pub completion: CompletionMode,
    pub capabilities: DeviceCapabilities,
    /// Shader library contents.
    pub entry_points: Vec<(String, ShaderStage)>,
}

impl Default for HeadlessOpts {
    fn default() -> Self {
        Self {
            completion: CompletionMode::Immediate,
            capabilities: DeviceCapabilities {
                name: "headless".to_owned(),
                supports_compute: true,
                supports_residency_sets: true,
                max_buffer_size: 1 << 30,
                min_binding_offset_alignment: 8,
                max_compute_invocations_per_workgroup: 1024,
            },
            entry_points: vec![
                (entry::LIFE_COMPUTE.to_owned(), ShaderStage::Compute),
                (entry::LIFE_VERTEX.to_owned(), ShaderStage::Vertex),
                (entry::LIFE_FRAGMENT.to_owned(), ShaderStage::Fragment),
                (entry::TRIANGLE_VERTEX.to_owned(), ShaderStage::Vertex),
                (entry::TRIANGLE_FRAGMENT.to_owned(), ShaderStage::Fragment),
            ],
        }
    }
}

impl HeadlessOpts {
    pub fn manual() -> Self {
        Self {
            completion: CompletionMode::Manual,
            ..Self::default()
        }
    }

    /// Drop `name` from the shader library.
    pub fn without_entry_point(mut self, name: &str) -> Self {
        self.entry_points.retain(|(n, _)| n != name);
        self
    }
}

/// Counters accumulated since the device was created.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeadlessStats {
    pub submissions: u64,
    pub executed: u64,
    pub dispatches: u64,
    pub draws: u64,
    /// Submissions accepted but not yet executed.
    pub pending: usize,
    /// Buffers, heaps, pipelines, residency sets, timelines and targets not yet released.
    pub live_objects: usize,
}

struct BufferRecord {
    label: String,
    data: Vec<u8>,
    usage: BufferUsage,
    mode: StorageMode,
    heap: Option<HeapHandle>,
}

struct HeapRecord {
    size: u64,
}

enum PipelineRecord {
    Render {
        vertex: String,
        format: PixelFormat,
    },
    Compute {
        entry: String,
        workgroup_size: [u32; 3],
    },
}

struct TargetRecord {
    width: u32,
    height: u32,
    format: PixelFormat,
    /// RGBA8 regardless of `format`.
    pixels: Vec<u8>,
}

struct Submission {
    commands: CommandList,
    signal: Signal,
    buffers: BTreeSet<BufferHandle>,
}

#[derive(Default)]
struct State {
    next_id: u32,
    buffers: HashMap<BufferHandle, BufferRecord>,
    heaps: HashMap<HeapHandle, HeapRecord>,
    pipelines: HashMap<PipelineHandle, PipelineRecord>,
    residency_sets: HashMap<ResidencySetHandle, BTreeSet<BufferHandle>>,
    timelines: HashMap<TimelineHandle, u64>,
    /// Highest value each timeline has been promised by an accepted submission.
    promised: HashMap<TimelineHandle, u64>,
    targets: HashMap<TargetHandle, TargetRecord>,
    pending: VecDeque<Submission>,
    stats: HeadlessStats,
    hazards: Vec<String>,
    lost: bool,
}

struct Inner {
    opts: HeadlessOpts,
    state: Mutex<State>,
    completed: Condvar,
}

/// Cloning shares the device, so a completion thread can drive a `Manual` device while
/// another thread encodes and waits.
#[derive(Clone)]
pub struct HeadlessDevice {
    inner: Arc<Inner>,
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self::with_opts(HeadlessOpts::default())
    }

    pub fn with_opts(opts: HeadlessOpts) -> Self {
        Self {
            inner: Arc::new(Inner {
                opts,
                state: Mutex::new(State::default()),
                completed: Condvar::new(),
            }),
        }
    }

    pub fn stats(&self) -> HeadlessStats {
        let st = self.inner.state.lock();
        HeadlessStats {
            pending: st.pending.len(),
            live_objects: st.buffers.len()
                + st.heaps.len()
                + st.pipelines.len()
                + st.residency_sets.len()
                + st.timelines.len()
                + st.targets.len(),
            ..st.stats
        }
    }

    /// Host accesses that raced pending device work, and releases of unknown handles.
    pub fn hazards(&self) -> Vec<String> {
        self.inner.state.lock().hazards.clone()
    }

    pub fn pending_submissions(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    /// Simulate device loss: pending work is dropped and every later call fails.
    pub fn set_lost(&self) {
        let mut st = self.inner.state.lock();
        st.lost = true;
        st.pending.clear();
        self.inner.completed.notify_all();
    }

    pub fn is_lost(&self) -> bool {
        self.inner.state.lock().lost
    }

    /// Execute queued submissions whose signal value is `<= value`, in order.
    ///
    /// An execution failure marks the device lost.
    pub fn complete_through(&self, value: u64) -> FrameResult<usize> {
        self.complete_while(|s| s.signal.value <= value)
    }

    pub fn complete_all(&self) -> FrameResult<usize> {
        self.complete_while(|_| true)
    }

    fn complete_while(&self, mut ready: impl FnMut(&Submission) -> bool) -> FrameResult<usize> {
        let mut st = self.inner.state.lock();
        let mut done = 0;
        while st.pending.front().is_some_and(&mut ready) {
            let Some(submission) = st.pending.pop_front() else {
                break;
            };
            if let Err(e) = st.execute(&submission.commands) {
                st.lost = true;
                st.pending.clear();
                self.inner.completed.notify_all();
                return Err(e);
            }
            st.signal(submission.signal);
            done += 1;
        }
        if done > 0 {
            self.inner.completed.notify_all();
        }
        Ok(done)
    }

    fn caps(&self) -> &DeviceCapabilities {
        &self.inner.opts.capabilities
    }
}

impl State {
    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn ensure_alive(&self) -> FrameResult<()> {
        if self.lost {
            return Err(LifeframeError::device("device lost"));
        }
        Ok(())
    }

    fn buffer(&self, buffer: BufferHandle) -> FrameResult<&BufferRecord> {
        self.buffers
            .get(&buffer)
            .ok_or_else(|| LifeframeError::precondition(format!("unknown {buffer}")))
    }

    fn referenced_by_pending(&self, buffer: BufferHandle) -> bool {
        self.pending.iter().any(|s| s.buffers.contains(&buffer))
    }

    fn resident(&self) -> BTreeSet<BufferHandle> {
        self.residency_sets.values().flatten().copied().collect()
    }

    fn signal(&mut self, signal: Signal) {
        if let Some(v) = self.timelines.get_mut(&signal.timeline) {
            *v = (*v).max(signal.value);
        }
        self.stats.executed += 1;
    }

    fn validate_binding(
        &self,
        binding: &BufferBinding,
        resident: &BTreeSet<BufferHandle>,
        alignment: u64,
    ) -> FrameResult<()> {
        let record = self
            .buffers
            .get(&binding.buffer)
            .ok_or_else(|| LifeframeError::device(format!("{} is not alive", binding.buffer)))?;
        if !resident.contains(&binding.buffer) {
            return Err(LifeframeError::device(format!(
                "{} ('{}') is not in any committed residency set",
                binding.buffer, record.label
            )));
        }
        if binding.offset % alignment != 0 {
            return Err(LifeframeError::device(format!(
                "binding offset {} of {} is not a multiple of {alignment}",
                binding.offset, binding.buffer
            )));
        }
        let len = record.data.len() as u64;
        let end = binding
            .size
            .map_or(len, |s| binding.offset.saturating_add(s));
        if binding.offset > len || end > len {
            return Err(LifeframeError::device(format!(
                "binding [{}, {end}) exceeds {} of {len} bytes",
                binding.offset, binding.buffer
            )));
        }
        let needed = match binding.access {
            BindingAccess::Uniform => BufferUsage::UNIFORM,
            BindingAccess::Read | BindingAccess::ReadWrite => BufferUsage::STORAGE,
        };
        if !record.usage.contains(needed) {
            return Err(LifeframeError::device(format!(
                "{} bound as {:?} without matching usage",
                binding.buffer, binding.access
            )));
        }
        Ok(())
    }

    /// Everything checkable before execution: object liveness, residency, binding ranges and
    /// render target formats.
    fn validate(
        &self,
        commands: &CommandList,
        signal: Signal,
        alignment: u64,
    ) -> FrameResult<BTreeSet<BufferHandle>> {
        let current = *self.timelines.get(&signal.timeline).ok_or_else(|| {
            LifeframeError::device(format!("signal on unknown {}", signal.timeline))
        })?;
        let promised = self
            .promised
            .get(&signal.timeline)
            .copied()
            .unwrap_or(current)
            .max(current);
        if signal.value <= promised {
            return Err(LifeframeError::device(format!(
                "signal value {} on {} does not exceed {promised}",
                signal.value, signal.timeline
            )));
        }

        let resident = self.resident();
        for pass in commands.passes() {
            match pass {
                Pass::Compute(c) => {
                    match self.pipelines.get(&c.pipeline) {
                        Some(PipelineRecord::Compute { .. }) => {}
                        _ => {
                            return Err(LifeframeError::device(format!(
                                "pass '{}' uses {} which is not a live compute pipeline",
                                c.label, c.pipeline
                            )));
                        }
                    }
                    for b in &c.bindings {
                        self.validate_binding(b, &resident, alignment)?;
                    }
                }
                Pass::Render(r) => {
                    let target = self.targets.get(&r.target).ok_or_else(|| {
                        LifeframeError::device(format!(
                            "pass '{}' targets dead {}",
                            r.label, r.target
                        ))
                    })?;
                    for draw in &r.draws {
                        match self.pipelines.get(&draw.pipeline) {
                            Some(PipelineRecord::Render { format, .. })
                                if *format == target.format => {}
                            Some(PipelineRecord::Render { format, .. }) => {
                                return Err(LifeframeError::device(format!(
                                    "{} renders {format:?} into a {:?} target",
                                    draw.pipeline, target.format
                                )));
                            }
                            _ => {
                                return Err(LifeframeError::device(format!(
                                    "pass '{}' uses {} which is not a live render pipeline",
                                    r.label, draw.pipeline
                                )));
                            }
                        }
                        for b in &draw.bindings {
                            self.validate_binding(b, &resident, alignment)?;
                        }
                    }
                }
            }
        }
        Ok(commands.referenced_buffers().into_iter().collect())
    }

    fn bound_bytes(&self, bindings: &[BufferBinding], slot: u32) -> FrameResult<&[u8]> {
        let b = bindings
            .iter()
            .find(|b| b.slot == slot)
            .ok_or_else(|| LifeframeError::device(format!("nothing bound at slot {slot}")))?;
        let data = &self.buffer(b.buffer)?.data;
        let end = b.size.map_or(data.len(), |s| (b.offset + s) as usize);
        Ok(&data[b.offset as usize..end])
    }

    fn bound_pod<T: bytemuck::Pod>(&self, bindings: &[BufferBinding], slot: u32) -> FrameResult<T> {
        let bytes = self.bound_bytes(bindings, slot)?;
        let n = std::mem::size_of::<T>();
        if bytes.len() < n {
            return Err(LifeframeError::device(format!(
                "slot {slot} binds {} bytes, {n} needed",
                bytes.len()
            )));
        }
        Ok(bytemuck::pod_read_unaligned(&bytes[..n]))
    }

    fn execute(&mut self, commands: &CommandList) -> FrameResult<()> {
        for pass in commands.passes() {
            match pass {
                Pass::Compute(c) => {
                    self.stats.dispatches += 1;
                    let (entry_name, wg) = match self.pipelines.get(&c.pipeline) {
                        Some(PipelineRecord::Compute {
                            entry,
                            workgroup_size,
                        }) => (entry.clone(), *workgroup_size),
                        _ => return Err(LifeframeError::device(format!("{} vanished", c.pipeline))),
                    };
                    // An empty dispatch runs no threads.
                    if entry_name == entry::LIFE_COMPUTE && !c.workgroups.contains(&0) {
                        self.run_life_kernel(&c.bindings, c.workgroups, wg)?;
                    }
                }
                Pass::Render(r) => {
                    let clear = r.clear_color.map(unorm8);
                    let mut target = self
                        .targets
                        .remove(&r.target)
                        .ok_or_else(|| LifeframeError::device(format!("{} vanished", r.target)))?;
                    for px in target.pixels.chunks_exact_mut(4) {
                        px.copy_from_slice(&clear);
                    }
                    let drawn = r
                        .draws
                        .iter()
                        .try_for_each(|draw| self.run_draw(draw, &mut target));
                    self.targets.insert(r.target, target);
                    drawn?;
                }
            }
        }
        Ok(())
    }

    fn run_life_kernel(
        &mut self,
        bindings: &[BufferBinding],
        workgroups: [u32; 3],
        workgroup_size: [u32; 3],
    ) -> FrameResult<()> {
        let state: SimulationState = self.bound_pod(bindings, slot::SIMULATION_STATE)?;
        let size = state.grid_size();
        let cells = size.cell_count();

        let src: Vec<u32> = {
            let bytes = self.bound_bytes(bindings, slot::SOURCE_GRID)?;
            if bytes.len() < cells * 4 {
                return Err(grid_too_small("source", bytes.len(), size));
            }
            bytemuck::pod_collect_to_vec(&bytes[..cells * 4])
        };
        let dst_binding = bindings
            .iter()
            .find(|b| b.slot == slot::DESTINATION_GRID)
            .ok_or_else(|| LifeframeError::device("destination grid not bound"))?;
        let dst_bytes = {
            let record = self
                .buffers
                .get_mut(&dst_binding.buffer)
                .ok_or_else(|| LifeframeError::device(format!("{} vanished", dst_binding.buffer)))?;
            let start = dst_binding.offset as usize;
            if record.data.len() < start + cells * 4 {
                return Err(grid_too_small(
                    "destination",
                    record.data.len().saturating_sub(start),
                    size,
                ));
            }
            &mut record.data[start..start + cells * 4]
        };

        let mut dst: Vec<u32> = bytemuck::pod_collect_to_vec(dst_bytes);
        step_region(
            &src,
            &mut dst,
            size,
            state.rule(),
            state.boundary_mode(),
            workgroups[0].saturating_mul(workgroup_size[0]),
            workgroups[1].saturating_mul(workgroup_size[1]),
        );
        dst_bytes.copy_from_slice(bytemuck::cast_slice(&dst));
        Ok(())
    }

    fn run_draw(&mut self, draw: &DrawCall, target: &mut TargetRecord) -> FrameResult<()> {
        self.stats.draws += 1;
        let vertex = match self.pipelines.get(&draw.pipeline) {
            Some(PipelineRecord::Render { vertex, .. }) => vertex.clone(),
            _ => return Err(LifeframeError::device(format!("{} vanished", draw.pipeline))),
        };
        match vertex.as_str() {
            entry::TRIANGLE_VERTEX => {
                let tri: TriangleData = self.bound_pod(&draw.bindings, slot::TRIANGLE)?;
                rasterize_triangle(&tri, target);
            }
            entry::LIFE_VERTEX => {
                let view: GridView = self.bound_pod(&draw.bindings, slot::GRID_VIEW)?;
                let size = view.grid_size();
                let bytes = self.bound_bytes(&draw.bindings, slot::VISIBLE_GRID)?;
                if bytes.len() < size.cell_count() * 4 {
                    return Err(grid_too_small("visible", bytes.len(), size));
                }
                let grid: Vec<u32> = bytemuck::pod_collect_to_vec(&bytes[..size.cell_count() * 4]);
                draw_grid(&view, &grid, target);
            }
            _ => {}
        }
        Ok(())
    }
}

fn grid_too_small(which: &str, len: usize, size: GridSize) -> LifeframeError {
    LifeframeError::device(format!(
        "{which} grid binding has {len} bytes, {}x{} grid needs {}",
        size.width,
        size.height,
        size.byte_len()
    ))
}

fn unorm8(c: f64) -> u8 {
    (c.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn rasterize_triangle(tri: &TriangleData, target: &mut TargetRecord) {
    let (w, h) = (target.width as f32, target.height as f32);
    // Clip space to pixel space, y down.
    let p = tri
        .vertices
        .map(|v| [(v.position[0] + 1.0) * 0.5 * w, (1.0 - v.position[1]) * 0.5 * h]);
    let edge = |a: [f32; 2], b: [f32; 2], c: [f32; 2]| {
        (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0])
    };
    let area = edge(p[0], p[1], p[2]);
    if area.abs() <= f32::EPSILON {
        return;
    }

    let min_x = p.iter().map(|q| q[0]).fold(f32::INFINITY, f32::min).max(0.0) as u32;
    let min_y = p.iter().map(|q| q[1]).fold(f32::INFINITY, f32::min).max(0.0) as u32;
    let max_x = (p.iter().map(|q| q[0]).fold(f32::NEG_INFINITY, f32::max).ceil() as u32)
        .min(target.width);
    let max_y = (p.iter().map(|q| q[1]).fold(f32::NEG_INFINITY, f32::max).ceil() as u32)
        .min(target.height);

    for y in min_y..max_y {
        for x in min_x..max_x {
            let c = [x as f32 + 0.5, y as f32 + 0.5];
            let w0 = edge(p[1], p[2], c) / area;
            let w1 = edge(p[2], p[0], c) / area;
            let w2 = edge(p[0], p[1], c) / area;
            if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                continue;
            }
            let mut rgba = [0u8; 4];
            for (ch, out) in rgba.iter_mut().enumerate() {
                let v = w0 * tri.vertices[0].color[ch]
                    + w1 * tri.vertices[1].color[ch]
                    + w2 * tri.vertices[2].color[ch];
                *out = unorm8(v as f64);
            }
            let i = (y as usize * target.width as usize + x as usize) * 4;
            target.pixels[i..i + 4].copy_from_slice(&rgba);
        }
    }
}

fn draw_grid(view: &GridView, grid: &[u32], target: &mut TargetRecord) {
    let size = view.grid_size();
    for y in 0..target.height {
        for x in 0..target.width {
            let Some((cx, cy)) = view.cell_at(x, y) else {
                continue;
            };
            if grid[size.index(cx, cy)] != 0 {
                let i = (y as usize * target.width as usize + x as usize) * 4;
                target.pixels[i..i + 4].copy_from_slice(&ALIVE_RGBA8);
            }
        }
    }
}

impl Device for HeadlessDevice {
    fn capabilities(&self) -> DeviceCapabilities {
        self.caps().clone()
    }

    fn has_entry_point(&self, name: &str, stage: ShaderStage) -> bool {
        self.inner
            .opts
            .entry_points
            .iter()
            .any(|(n, s)| n == name && *s == stage)
    }

    fn create_buffer(&self, desc: &BufferDesc) -> FrameResult<BufferHandle> {
        if desc.size == 0 {
            return Err(LifeframeError::precondition(format!(
                "buffer '{}' has zero size",
                desc.label
            )));
        }
        if desc.size > self.caps().max_buffer_size {
            return Err(LifeframeError::setup(format!(
                "buffer '{}' of {} bytes exceeds the device limit of {}",
                desc.label,
                desc.size,
                self.caps().max_buffer_size
            )));
        }
        let mut st = self.inner.state.lock();
        st.ensure_alive()?;
        let handle = BufferHandle(st.next_id());
        st.buffers.insert(
            handle,
            BufferRecord {
                label: desc.label.clone(),
                data: vec![0; desc.size as usize],
                usage: desc.usage,
                mode: desc.mode,
                heap: None,
            },
        );
        Ok(handle)
    }

    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]) -> FrameResult<()> {
        let mut st = self.inner.state.lock();
        st.ensure_alive()?;
        if st.referenced_by_pending(buffer) {
            let label = st.buffer(buffer)?.label.clone();
            st.hazards
                .push(format!("host write to {buffer} ('{label}') while the device may read it"));
        }
        let record = st
            .buffers
            .get_mut(&buffer)
            .ok_or_else(|| LifeframeError::precondition(format!("write to unknown {buffer}")))?;
        if record.mode == StorageMode::Private {
            return Err(LifeframeError::precondition(format!(
                "{buffer} ('{}') is not host-visible",
                record.label
            )));
        }
        let start = offset as usize;
        let end = start.saturating_add(data.len());
        if end > record.data.len() {
            return Err(LifeframeError::precondition(format!(
                "write [{start}, {end}) exceeds {buffer} of {} bytes",
                record.data.len()
            )));
        }
        record.data[start..end].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&self, buffer: BufferHandle, offset: u64, len: u64) -> FrameResult<Vec<u8>> {
        let st = self.inner.state.lock();
        st.ensure_alive()?;
        let record = st.buffer(buffer)?;
        if record.mode == StorageMode::Private {
            return Err(LifeframeError::precondition(format!(
                "{buffer} ('{}') is not host-visible",
                record.label
            )));
        }
        let start = offset as usize;
        let end = start.saturating_add(len as usize);
        if end > record.data.len() {
            return Err(LifeframeError::precondition(format!(
                "read [{start}, {end}) exceeds {buffer} of {} bytes",
                record.data.len()
            )));
        }
        Ok(record.data[start..end].to_vec())
    }

    fn release_buffer(&self, buffer: BufferHandle) {
        let mut st = self.inner.state.lock();
        if st.referenced_by_pending(buffer) {
            st.hazards
                .push(format!("{buffer} released while pending work references it"));
        }
        if st.buffers.remove(&buffer).is_none() {
            st.hazards.push(format!("release of unknown {buffer}"));
        }
    }

    fn create_heap(&self, label: &str, size: u64) -> FrameResult<HeapHandle> {
        if size == 0 || size > self.caps().max_buffer_size {
            return Err(LifeframeError::setup(format!(
                "heap '{label}' size {size} is outside (0, {}]",
                self.caps().max_buffer_size
            )));
        }
        let mut st = self.inner.state.lock();
        st.ensure_alive()?;
        let handle = HeapHandle(st.next_id());
        st.heaps.insert(handle, HeapRecord { size });
        Ok(handle)
    }

    fn create_heap_buffer(
        &self,
        heap: HeapHandle,
        offset: u64,
        size: u64,
        usage: BufferUsage,
        mode: StorageMode,
    ) -> FrameResult<BufferHandle> {
        let mut st = self.inner.state.lock();
        st.ensure_alive()?;
        let heap_size = st
            .heaps
            .get(&heap)
            .ok_or_else(|| LifeframeError::precondition(format!("unknown {heap}")))?
            .size;
        if size == 0 || offset.saturating_add(size) > heap_size {
            return Err(LifeframeError::precondition(format!(
                "placement [{offset}, {}) does not fit {heap} of {heap_size} bytes",
                offset.saturating_add(size)
            )));
        }
        let handle = BufferHandle(st.next_id());
        st.buffers.insert(
            handle,
            BufferRecord {
                label: format!("{heap}+{offset}"),
                data: vec![0; size as usize],
                usage,
                mode,
                heap: Some(heap),
            },
        );
        Ok(handle)
    }

    fn release_heap(&self, heap: HeapHandle) {
        let mut st = self.inner.state.lock();
        if st.buffers.values().any(|b| b.heap == Some(heap)) {
            st.hazards
                .push(format!("{heap} released with buffers still placed in it"));
        }
        if st.heaps.remove(&heap).is_none() {
            st.hazards.push(format!("release of unknown {heap}"));
        }
    }

    fn compile_render_pipeline(
        &self,
        desc: &RenderPipelineDesc<'_>,
    ) -> FrameResult<PipelineHandle> {
        for (name, stage) in [
            (desc.vertex_entry, ShaderStage::Vertex),
            (desc.fragment_entry, ShaderStage::Fragment),
        ] {
            if !self.has_entry_point(name, stage) {
                return Err(LifeframeError::setup(format!(
                    "'{}': no {stage:?} function '{name}'",
                    desc.label
                )));
            }
        }
        let mut st = self.inner.state.lock();
        st.ensure_alive()?;
        let handle = PipelineHandle(st.next_id());
        st.pipelines.insert(
            handle,
            PipelineRecord::Render {
                vertex: desc.vertex_entry.to_owned(),
                format: desc.color_format,
            },
        );
        Ok(handle)
    }

    fn compile_compute_pipeline(
        &self,
        desc: &ComputePipelineDesc<'_>,
    ) -> FrameResult<PipelineHandle> {
        if !self.has_entry_point(desc.entry, ShaderStage::Compute) {
            return Err(LifeframeError::setup(format!(
                "'{}': no compute function '{}'",
                desc.label, desc.entry
            )));
        }
        let invocations: u32 = desc.workgroup_size.iter().product();
        if invocations > self.caps().max_compute_invocations_per_workgroup {
            return Err(LifeframeError::setup(format!(
                "'{}': workgroup of {invocations} invocations exceeds {}",
                desc.label,
                self.caps().max_compute_invocations_per_workgroup
            )));
        }
        let mut st = self.inner.state.lock();
        st.ensure_alive()?;
        let handle = PipelineHandle(st.next_id());
        st.pipelines.insert(
            handle,
            PipelineRecord::Compute {
                entry: desc.entry.to_owned(),
                workgroup_size: desc.workgroup_size,
            },
        );
        Ok(handle)
    }

    fn release_pipeline(&self, pipeline: PipelineHandle) {
        let mut st = self.inner.state.lock();
        if st.pipelines.remove(&pipeline).is_none() {
            st.hazards.push(format!("release of unknown {pipeline}"));
        }
    }

    fn create_residency_set(&self, _label: &str) -> FrameResult<ResidencySetHandle> {
        if !self.caps().supports_residency_sets {
            return Err(LifeframeError::setup("device has no residency sets"));
        }
        let mut st = self.inner.state.lock();
        st.ensure_alive()?;
        let handle = ResidencySetHandle(st.next_id());
        st.residency_sets.insert(handle, BTreeSet::new());
        Ok(handle)
    }

    fn commit_residency_set(
        &self,
        set: ResidencySetHandle,
        allocations: &[BufferHandle],
    ) -> FrameResult<()> {
        let mut st = self.inner.state.lock();
        st.ensure_alive()?;
        if let Some(missing) = allocations.iter().find(|b| !st.buffers.contains_key(b)) {
            return Err(LifeframeError::precondition(format!(
                "cannot make dead {missing} resident"
            )));
        }
        let members = st
            .residency_sets
            .get_mut(&set)
            .ok_or_else(|| LifeframeError::precondition(format!("unknown {set}")))?;
        *members = allocations.iter().copied().collect();
        Ok(())
    }

    fn release_residency_set(&self, set: ResidencySetHandle) {
        let mut st = self.inner.state.lock();
        if !st.pending.is_empty() {
            st.hazards
                .push(format!("{set} released with submissions in flight"));
        }
        if st.residency_sets.remove(&set).is_none() {
            st.hazards.push(format!("release of unknown {set}"));
        }
    }

    fn create_timeline(&self, _label: &str, initial: u64) -> FrameResult<TimelineHandle> {
        let mut st = self.inner.state.lock();
        st.ensure_alive()?;
        let handle = TimelineHandle(st.next_id());
        st.timelines.insert(handle, initial);
        Ok(handle)
    }

    fn timeline_value(&self, timeline: TimelineHandle) -> u64 {
        self.inner
            .state
            .lock()
            .timelines
            .get(&timeline)
            .copied()
            .unwrap_or(0)
    }

    fn wait_timeline(
        &self,
        timeline: TimelineHandle,
        value: u64,
        timeout: Option<Duration>,
    ) -> FrameResult<bool> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut st = self.inner.state.lock();
        loop {
            st.ensure_alive()?;
            let current = *st
                .timelines
                .get(&timeline)
                .ok_or_else(|| LifeframeError::precondition(format!("unknown {timeline}")))?;
            if current >= value {
                return Ok(true);
            }
            match deadline {
                Some(deadline) => {
                    if self.inner.completed.wait_until(&mut st, deadline).timed_out() {
                        st.ensure_alive()?;
                        return Ok(st.timelines.get(&timeline).is_some_and(|v| *v >= value));
                    }
                }
                None => self.inner.completed.wait(&mut st),
            }
        }
    }

    fn release_timeline(&self, timeline: TimelineHandle) {
        let mut st = self.inner.state.lock();
        st.promised.remove(&timeline);
        if st.timelines.remove(&timeline).is_none() {
            st.hazards.push(format!("release of unknown {timeline}"));
        }
    }

    fn create_render_target(
        &self,
        _label: &str,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> FrameResult<TargetHandle> {
        if width == 0 || height == 0 {
            return Err(LifeframeError::precondition("render target must be non-empty"));
        }
        let mut st = self.inner.state.lock();
        st.ensure_alive()?;
        let handle = TargetHandle(st.next_id());
        st.targets.insert(
            handle,
            TargetRecord {
                width,
                height,
                format,
                pixels: vec![0; width as usize * height as usize * 4],
            },
        );
        Ok(handle)
    }

    fn read_render_target(&self, target: TargetHandle) -> FrameResult<Vec<u8>> {
        let st = self.inner.state.lock();
        st.ensure_alive()?;
        let record = st
            .targets
            .get(&target)
            .ok_or_else(|| LifeframeError::precondition(format!("unknown {target}")))?;
        match record.format {
            PixelFormat::Rgba8Unorm => Ok(record.pixels.clone()),
            PixelFormat::Bgra8Unorm => Ok(record
                .pixels
                .chunks_exact(4)
                .flat_map(|p| [p[2], p[1], p[0], p[3]])
                .collect()),
            other => Err(LifeframeError::precondition(format!(
                "readback of {other:?} targets is not supported"
            ))),
        }
    }

    fn release_render_target(&self, target: TargetHandle) {
        let mut st = self.inner.state.lock();
        if st.targets.remove(&target).is_none() {
            st.hazards.push(format!("release of unknown {target}"));
        }
    }

    fn submit(&self, commands: &CommandList, signal: Signal) -> FrameResult<()> {
        let mut st = self.inner.state.lock();
        st.ensure_alive()?;
        let buffers = st.validate(commands, signal, self.caps().min_binding_offset_alignment)?;
        st.stats.submissions += 1;
        st.promised.insert(signal.timeline, signal.value);
        tracing::trace!(label = commands.label(), value = signal.value, "headless submit");

        match self.inner.opts.completion {
            CompletionMode::Immediate => {
                st.execute(commands)?;
                st.signal(signal);
                self.inner.completed.notify_all();
            }
            CompletionMode::Manual => st.pending.push_back(Submission {
                commands: commands.clone(),
                signal,
                buffers,
            }),
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "../../tests/unit/device/headless.rs"]
mod tests;
