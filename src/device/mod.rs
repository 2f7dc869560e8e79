//! Device service seam.
//!
//! The coordinator records work into a backend-agnostic [`CommandList`] and hands it to a
//! [`Device`] for execution. Every device object is addressed by a small copyable handle;
//! ownership of the underlying object belongs to whichever component created it, and that
//! component releases it exactly once at teardown.
//!
//! Two implementations ship with the crate:
//!
//! - [`headless::HeadlessDevice`], a CPU reference device that executes the simulation kernel,
//!   rasterizes the two render pipelines, enforces residency, and can hold completions back to
//!   emulate device latency.
//! - `gpu::WgpuDevice` (feature `gpu`), backed by a real adapter.

use std::time::Duration;

use smallvec::SmallVec;

use crate::foundation::error::FrameResult;

pub mod headless;
#[cfg(feature = "gpu")]
pub mod gpu;

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident, $tag:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub(crate) u32);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($tag, "#{}"), self.0)
            }
        }
    };
}

handle!(
    /// A linear GPU-visible allocation.
    BufferHandle,
    "buffer"
);
handle!(
    /// A device heap that buffers can be carved from.
    HeapHandle,
    "heap"
);
handle!(
    /// A compiled render or compute pipeline.
    PipelineHandle,
    "pipeline"
);
handle!(
    /// A residency set attached to the submission queue.
    ResidencySetHandle,
    "residency-set"
);
handle!(
    /// A monotonically increasing completion counter signalled by the device.
    TimelineHandle,
    "timeline"
);
handle!(
    /// A color render target.
    TargetHandle,
    "target"
);

/// Where a buffer's memory lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StorageMode {
    /// Host-visible and device-visible.
    Shared,
    /// Device-only; the host cannot write it directly.
    Private,
}

/// How a buffer may be bound.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferUsage(u8);

impl BufferUsage {
    pub const STORAGE: Self = Self(1);
    pub const UNIFORM: Self = Self(1 << 1);

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for BufferUsage {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Color attachment pixel formats understood by the pipelines.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PixelFormat {
    Rgba8Unorm,
    Bgra8Unorm,
    Rgba16Float,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            Self::Rgba8Unorm | Self::Bgra8Unorm => 4,
            Self::Rgba16Float => 8,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

#[derive(Clone, Debug)]
pub struct BufferDesc {
    pub label: String,
    pub size: u64,
    pub usage: BufferUsage,
    pub mode: StorageMode,
}

#[derive(Clone, Debug)]
pub struct RenderPipelineDesc<'a> {
    pub label: &'a str,
    pub vertex_entry: &'a str,
    pub fragment_entry: &'a str,
    pub color_format: PixelFormat,
}

#[derive(Clone, Debug)]
pub struct ComputePipelineDesc<'a> {
    pub label: &'a str,
    pub entry: &'a str,
    pub workgroup_size: [u32; 3],
}

/// What a device can do, queried once during setup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceCapabilities {
    pub name: String,
    pub supports_compute: bool,
    pub supports_residency_sets: bool,
    pub max_buffer_size: u64,
    /// Required alignment of buffer binding offsets.
    pub min_binding_offset_alignment: u64,
    pub max_compute_invocations_per_workgroup: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindingAccess {
    Read,
    ReadWrite,
    Uniform,
}

/// One buffer bound at a fixed binding slot of group 0.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferBinding {
    pub slot: u32,
    pub buffer: BufferHandle,
    pub offset: u64,
    /// `None` binds the rest of the buffer.
    pub size: Option<u64>,
    pub access: BindingAccess,
}

impl BufferBinding {
    pub fn whole(slot: u32, buffer: BufferHandle, access: BindingAccess) -> Self {
        Self {
            slot,
            buffer,
            offset: 0,
            size: None,
            access,
        }
    }

    pub fn range(
        slot: u32,
        buffer: BufferHandle,
        offset: u64,
        size: u64,
        access: BindingAccess,
    ) -> Self {
        Self {
            slot,
            buffer,
            offset,
            size: Some(size),
            access,
        }
    }
}

pub type Bindings = SmallVec<[BufferBinding; 4]>;

#[derive(Clone, Debug)]
pub struct ComputePass {
    pub label: String,
    pub pipeline: PipelineHandle,
    pub bindings: Bindings,
    pub workgroups: [u32; 3],
}

#[derive(Clone, Debug)]
pub struct DrawCall {
    pub pipeline: PipelineHandle,
    pub bindings: Bindings,
    pub vertex_count: u32,
    pub instance_count: u32,
}

#[derive(Clone, Debug)]
pub struct RenderPass {
    pub label: String,
    pub target: TargetHandle,
    pub clear_color: [f64; 4],
    pub draws: Vec<DrawCall>,
}

#[derive(Clone, Debug)]
pub enum Pass {
    Compute(ComputePass),
    Render(RenderPass),
}

/// A reusable command-recording context.
///
/// Passes execute in recording order; a pass observes every write made by earlier passes in the
/// same list.
#[derive(Clone, Debug, Default)]
pub struct CommandList {
    label: String,
    passes: Vec<Pass>,
}

impl CommandList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear recorded passes and relabel, keeping allocated capacity.
    pub fn reset(&mut self, label: impl Into<String>) {
        self.label = label.into();
        self.passes.clear();
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn push_compute(&mut self, pass: ComputePass) {
        self.passes.push(Pass::Compute(pass));
    }

    pub fn push_render(&mut self, pass: RenderPass) {
        self.passes.push(Pass::Render(pass));
    }

    pub fn passes(&self) -> &[Pass] {
        &self.passes
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Every buffer bound anywhere in the list, in recording order (duplicates included).
    pub fn referenced_buffers(&self) -> Vec<BufferHandle> {
        let mut out = Vec::new();
        for pass in &self.passes {
            match pass {
                Pass::Compute(c) => out.extend(c.bindings.iter().map(|b| b.buffer)),
                Pass::Render(r) => {
                    for draw in &r.draws {
                        out.extend(draw.bindings.iter().map(|b| b.buffer));
                    }
                }
            }
        }
        out
    }
}

/// Timeline value the device sets once a submission has finished executing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Signal {
    pub timeline: TimelineHandle,
    pub value: u64,
}

/// Opaque device capabilities the coordinator depends on.
///
/// Methods take `&self`; implementations synchronize internally so a completion thread can
/// observe the same device as the encoding thread.
pub trait Device {
    fn capabilities(&self) -> DeviceCapabilities;

    /// Shader library lookup by entry point name.
    fn has_entry_point(&self, name: &str, stage: ShaderStage) -> bool;

    fn create_buffer(&self, desc: &BufferDesc) -> FrameResult<BufferHandle>;
    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]) -> FrameResult<()>;
    /// Read back `len` bytes. Callers wait for the device to go idle first.
    fn read_buffer(&self, buffer: BufferHandle, offset: u64, len: u64) -> FrameResult<Vec<u8>>;
    fn release_buffer(&self, buffer: BufferHandle);

    fn create_heap(&self, label: &str, size: u64) -> FrameResult<HeapHandle>;
    /// Place a buffer at a fixed byte offset inside `heap`.
    fn create_heap_buffer(
        &self,
        heap: HeapHandle,
        offset: u64,
        size: u64,
        usage: BufferUsage,
        mode: StorageMode,
    ) -> FrameResult<BufferHandle>;
    fn release_heap(&self, heap: HeapHandle);

    fn compile_render_pipeline(&self, desc: &RenderPipelineDesc<'_>)
    -> FrameResult<PipelineHandle>;
    fn compile_compute_pipeline(
        &self,
        desc: &ComputePipelineDesc<'_>,
    ) -> FrameResult<PipelineHandle>;
    fn release_pipeline(&self, pipeline: PipelineHandle);

    fn create_residency_set(&self, label: &str) -> FrameResult<ResidencySetHandle>;
    /// Replace the active membership of `set` and attach it to the queue.
    fn commit_residency_set(
        &self,
        set: ResidencySetHandle,
        allocations: &[BufferHandle],
    ) -> FrameResult<()>;
    fn release_residency_set(&self, set: ResidencySetHandle);

    fn create_timeline(&self, label: &str, initial: u64) -> FrameResult<TimelineHandle>;
    fn timeline_value(&self, timeline: TimelineHandle) -> u64;
    /// Block until `timeline >= value`. Returns `Ok(false)` when `timeout` elapsed first.
    fn wait_timeline(
        &self,
        timeline: TimelineHandle,
        value: u64,
        timeout: Option<Duration>,
    ) -> FrameResult<bool>;
    fn release_timeline(&self, timeline: TimelineHandle);

    fn create_render_target(
        &self,
        label: &str,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> FrameResult<TargetHandle>;
    /// Read back a target as tightly packed rows. Callers wait for the device to go idle first.
    fn read_render_target(&self, target: TargetHandle) -> FrameResult<Vec<u8>>;
    fn release_render_target(&self, target: TargetHandle);

    /// Queue `commands` as one unit of work; `signal` fires once it has executed.
    fn submit(&self, commands: &CommandList, signal: Signal) -> FrameResult<()>;
}
