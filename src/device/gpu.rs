//! wgpu-backed [`Device`].
//!
//! wgpu has no placement heaps or residency sets. Heaps are emulated with one backing buffer
//! per heap, and placed buffers are views into it. Residency membership is tracked on the host
//! and enforced at submit the same way the headless device enforces it. Timelines advance from
//! `Queue::on_submitted_work_done` callbacks, and waits poll the device for the submission that
//! signals the requested value.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::device::{
    BindingAccess, BufferBinding, BufferDesc, BufferHandle, BufferUsage, CommandList,
    ComputePipelineDesc, Device, DeviceCapabilities, HeapHandle, Pass, PipelineHandle,
    PixelFormat, RenderPipelineDesc, ResidencySetHandle, ShaderStage, Signal, StorageMode,
    TargetHandle, TimelineHandle,
};
use crate::foundation::core::align_up;
use crate::foundation::error::{FrameResult, LifeframeError};
use crate::pipeline::entry;

const SHADER_SOURCE: &str = include_str!("../shaders/life.wgsl");

const ENTRY_POINTS: [(&str, ShaderStage); 5] = [
    (entry::LIFE_COMPUTE, ShaderStage::Compute),
    (entry::LIFE_VERTEX, ShaderStage::Vertex),
    (entry::LIFE_FRAGMENT, ShaderStage::Fragment),
    (entry::TRIANGLE_VERTEX, ShaderStage::Vertex),
    (entry::TRIANGLE_FRAGMENT, ShaderStage::Fragment),
];

/// `@workgroup_size` of the compute entry point in `life.wgsl`.
const SHADER_WORKGROUP_SIZE: [u32; 3] = [16, 16, 1];

struct BufferRecord {
    label: String,
    backing: Arc<wgpu::Buffer>,
    /// Byte offset of this buffer inside `backing`. Non-zero only for heap placements.
    base: u64,
    size: u64,
    usage: BufferUsage,
    mode: StorageMode,
    heap: Option<HeapHandle>,
}

struct HeapRecord {
    label: String,
    backing: Arc<wgpu::Buffer>,
    size: u64,
}

enum PipelineRecord {
    Render {
        pipeline: wgpu::RenderPipeline,
        layout: wgpu::BindGroupLayout,
        format: PixelFormat,
    },
    Compute {
        pipeline: wgpu::ComputePipeline,
        layout: wgpu::BindGroupLayout,
    },
}

struct TargetRecord {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
    format: PixelFormat,
}

struct TimelineRecord {
    label: String,
    completed: Arc<AtomicU64>,
    promised: u64,
    submissions: BTreeMap<u64, wgpu::SubmissionIndex>,
}

#[derive(Default)]
struct State {
    next_id: u32,
    buffers: HashMap<BufferHandle, BufferRecord>,
    heaps: HashMap<HeapHandle, HeapRecord>,
    pipelines: HashMap<PipelineHandle, PipelineRecord>,
    residency_sets: HashMap<ResidencySetHandle, Vec<BufferHandle>>,
    timelines: HashMap<TimelineHandle, TimelineRecord>,
    targets: HashMap<TargetHandle, TargetRecord>,
}

impl State {
    fn next_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn buffer(&self, handle: BufferHandle) -> FrameResult<&BufferRecord> {
        self.buffers
            .get(&handle)
            .ok_or_else(|| LifeframeError::precondition(format!("unknown {handle}")))
    }

    fn timeline(&self, handle: TimelineHandle) -> FrameResult<&TimelineRecord> {
        self.timelines
            .get(&handle)
            .ok_or_else(|| LifeframeError::precondition(format!("unknown {handle}")))
    }

    fn resident(&self) -> HashSet<BufferHandle> {
        self.residency_sets.values().flatten().copied().collect()
    }
}

/// A [`Device`] on the first high-performance adapter wgpu finds.
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    module: wgpu::ShaderModule,
    capabilities: DeviceCapabilities,
    lost: Arc<AtomicBool>,
    state: Mutex<State>,
}

impl std::fmt::Debug for WgpuDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuDevice")
            .field("adapter", &self.capabilities.name)
            .field("lost", &self.lost.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl WgpuDevice {
    /// Open an adapter and compile the shader library.
    ///
    /// Fails with a [`LifeframeError::Setup`] whose message contains `no gpu adapter available`
    /// when the machine has no usable adapter.
    pub fn new() -> FrameResult<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| match e {
            wgpu::RequestAdapterError::NotFound { .. } => {
                LifeframeError::setup("no gpu adapter available")
            }
            other => LifeframeError::setup(format!("wgpu request_adapter failed: {other:?}")),
        })?;

        let info = adapter.get_info();
        let supports_compute = adapter
            .get_downlevel_capabilities()
            .flags
            .contains(wgpu::DownlevelFlags::COMPUTE_SHADERS);

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("lifeframe"),
            required_features: wgpu::Features::empty(),
            required_limits: adapter.limits(),
            experimental_features: wgpu::ExperimentalFeatures::default(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::Off,
        }))
        .map_err(|e| LifeframeError::setup(format!("wgpu request_device failed: {e:?}")))?;

        let lost = Arc::new(AtomicBool::new(false));
        {
            let lost = Arc::clone(&lost);
            device.set_device_lost_callback(move |reason, message| {
                tracing::warn!(?reason, %message, "gpu device lost");
                lost.store(true, Ordering::SeqCst);
            });
        }

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("lifeframe_shaders"),
            source: wgpu::ShaderSource::Wgsl(SHADER_SOURCE.into()),
        });
        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(LifeframeError::setup(format!(
                "shader library failed to compile: {err}"
            )));
        }

        let limits = device.limits();
        let capabilities = DeviceCapabilities {
            name: info.name.clone(),
            supports_compute,
            supports_residency_sets: true,
            max_buffer_size: limits.max_buffer_size,
            min_binding_offset_alignment: u64::from(
                limits
                    .min_uniform_buffer_offset_alignment
                    .max(limits.min_storage_buffer_offset_alignment),
            ),
            max_compute_invocations_per_workgroup: limits.max_compute_invocations_per_workgroup,
        };
        tracing::info!(
            adapter = %info.name,
            backend = ?info.backend,
            alignment = capabilities.min_binding_offset_alignment,
            "gpu device ready"
        );

        Ok(Self {
            device,
            queue,
            module,
            capabilities,
            lost,
            state: Mutex::new(State::default()),
        })
    }

    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    fn ensure_alive(&self) -> FrameResult<()> {
        if self.is_lost() {
            return Err(LifeframeError::device("gpu device lost"));
        }
        Ok(())
    }

    fn bind_group(
        &self,
        st: &State,
        resident: &HashSet<BufferHandle>,
        layout: &wgpu::BindGroupLayout,
        label: &str,
        bindings: &[BufferBinding],
    ) -> FrameResult<wgpu::BindGroup> {
        let alignment = self.capabilities.min_binding_offset_alignment;
        let mut entries = Vec::with_capacity(bindings.len());
        for binding in bindings {
            let buffer = binding.buffer;
            let record = st.buffer(buffer)?;
            if !resident.contains(&buffer) {
                return Err(LifeframeError::device(format!(
                    "{buffer} ('{}') is not in a committed residency set",
                    record.label
                )));
            }
            if binding.offset % alignment != 0 {
                return Err(LifeframeError::device(format!(
                    "binding offset {} of {buffer} is not a multiple of {alignment}",
                    binding.offset
                )));
            }
            let size = binding
                .size
                .unwrap_or(record.size.saturating_sub(binding.offset));
            if size == 0 || binding.offset.saturating_add(size) > record.size {
                return Err(LifeframeError::device(format!(
                    "binding [{}, +{size}) exceeds {buffer} of {} bytes",
                    binding.offset, record.size
                )));
            }
            let needed = match binding.access {
                BindingAccess::Uniform => BufferUsage::UNIFORM,
                BindingAccess::Read | BindingAccess::ReadWrite => BufferUsage::STORAGE,
            };
            if !record.usage.contains(needed) {
                return Err(LifeframeError::device(format!(
                    "{buffer} ('{}') cannot be bound as {:?}",
                    record.label, binding.access
                )));
            }
            entries.push(wgpu::BindGroupEntry {
                binding: binding.slot,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: record.backing.as_ref(),
                    offset: record.base + binding.offset,
                    size: wgpu::BufferSize::new(size),
                }),
            });
        }
        Ok(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout,
            entries: &entries,
        }))
    }

    /// Record `commands` after checking every handle, binding and format on the host.
    fn encode(&self, st: &State, commands: &CommandList) -> FrameResult<wgpu::CommandEncoder> {
        let resident = st.resident();
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(commands.label()),
            });

        for pass in commands.passes() {
            match pass {
                Pass::Compute(compute) => {
                    let Some(PipelineRecord::Compute { pipeline, layout }) =
                        st.pipelines.get(&compute.pipeline)
                    else {
                        return Err(LifeframeError::device(format!(
                            "pass '{}' needs a compute pipeline, got {}",
                            compute.label, compute.pipeline
                        )));
                    };
                    let group =
                        self.bind_group(st, &resident, layout, &compute.label, &compute.bindings)?;
                    if compute.workgroups.contains(&0) {
                        continue;
                    }
                    let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                        label: Some(&compute.label),
                        timestamp_writes: None,
                    });
                    cpass.set_pipeline(pipeline);
                    cpass.set_bind_group(0, &group, &[]);
                    let [x, y, z] = compute.workgroups;
                    cpass.dispatch_workgroups(x, y, z);
                }
                Pass::Render(render) => {
                    let target = st.targets.get(&render.target).ok_or_else(|| {
                        LifeframeError::device(format!(
                            "pass '{}' renders to unknown {}",
                            render.label, render.target
                        ))
                    })?;
                    let mut draws = Vec::with_capacity(render.draws.len());
                    for draw in &render.draws {
                        let Some(PipelineRecord::Render {
                            pipeline,
                            layout,
                            format,
                        }) = st.pipelines.get(&draw.pipeline)
                        else {
                            return Err(LifeframeError::device(format!(
                                "pass '{}' needs a render pipeline, got {}",
                                render.label, draw.pipeline
                            )));
                        };
                        if *format != target.format {
                            return Err(LifeframeError::device(format!(
                                "{} renders {format:?} but {} is {:?}",
                                draw.pipeline, render.target, target.format
                            )));
                        }
                        let group =
                            self.bind_group(st, &resident, layout, &render.label, &draw.bindings)?;
                        draws.push((pipeline, group, draw.vertex_count, draw.instance_count));
                    }

                    let [r, g, b, a] = render.clear_color;
                    let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                        label: Some(&render.label),
                        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                            view: &target.view,
                            depth_slice: None,
                            resolve_target: None,
                            ops: wgpu::Operations {
                                load: wgpu::LoadOp::Clear(wgpu::Color { r, g, b, a }),
                                store: wgpu::StoreOp::Store,
                            },
                        })],
                        depth_stencil_attachment: None,
                        timestamp_writes: None,
                        occlusion_query_set: None,
                    });
                    for (pipeline, group, vertices, instances) in &draws {
                        rpass.set_pipeline(pipeline);
                        rpass.set_bind_group(0, group, &[]);
                        rpass.draw(0..*vertices, 0..*instances);
                    }
                }
            }
        }
        Ok(encoder)
    }

    /// Submit `encoder`, wait for it, and copy `staging` back to the host.
    fn download(
        &self,
        encoder: wgpu::CommandEncoder,
        staging: &wgpu::Buffer,
    ) -> FrameResult<Vec<u8>> {
        self.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |res| {
            let _ = tx.send(res);
        });
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|e| LifeframeError::device(format!("wgpu poll failed: {e:?}")))?;
        rx.recv()
            .map_err(|_| LifeframeError::device("readback channel closed"))?
            .map_err(|e| LifeframeError::device(format!("readback map failed: {e:?}")))?;

        let bytes = slice.get_mapped_range().to_vec();
        staging.unmap();
        Ok(bytes)
    }

    fn staging_buffer(&self, size: u64) -> wgpu::Buffer {
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("lifeframe_readback"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }
}

fn texture_format(format: PixelFormat) -> wgpu::TextureFormat {
    match format {
        PixelFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        PixelFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
        PixelFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
    }
}

fn buffer_usages(usage: BufferUsage) -> wgpu::BufferUsages {
    let mut out = wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC;
    if usage.contains(BufferUsage::STORAGE) {
        out |= wgpu::BufferUsages::STORAGE;
    }
    if usage.contains(BufferUsage::UNIFORM) {
        out |= wgpu::BufferUsages::UNIFORM;
    }
    out
}

fn check_copy_alignment(what: &str, offset: u64, len: u64) -> FrameResult<()> {
    let align = wgpu::COPY_BUFFER_ALIGNMENT;
    if offset % align != 0 || len % align != 0 {
        return Err(LifeframeError::precondition(format!(
            "{what} at offset {offset} of {len} bytes must be a multiple of {align}"
        )));
    }
    Ok(())
}

impl Device for WgpuDevice {
    fn capabilities(&self) -> DeviceCapabilities {
        self.capabilities.clone()
    }

    fn has_entry_point(&self, name: &str, stage: ShaderStage) -> bool {
        ENTRY_POINTS.iter().any(|&(n, s)| n == name && s == stage)
    }

    fn create_buffer(&self, desc: &BufferDesc) -> FrameResult<BufferHandle> {
        self.ensure_alive()?;
        if desc.size == 0 {
            return Err(LifeframeError::precondition(format!(
                "buffer '{}' has zero size",
                desc.label
            )));
        }
        if desc.size > self.capabilities.max_buffer_size {
            return Err(LifeframeError::setup(format!(
                "buffer '{}' of {} bytes exceeds the device limit of {}",
                desc.label, desc.size, self.capabilities.max_buffer_size
            )));
        }
        let backing = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&desc.label),
            size: align_up(desc.size, wgpu::COPY_BUFFER_ALIGNMENT),
            usage: buffer_usages(desc.usage),
            mapped_at_creation: false,
        });

        let mut st = self.state.lock();
        let handle = BufferHandle(st.next_id());
        st.buffers.insert(
            handle,
            BufferRecord {
                label: desc.label.clone(),
                backing: Arc::new(backing),
                base: 0,
                size: desc.size,
                usage: desc.usage,
                mode: desc.mode,
                heap: None,
            },
        );
        tracing::debug!(%handle, label = %desc.label, size = desc.size, "created buffer");
        Ok(handle)
    }

    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]) -> FrameResult<()> {
        self.ensure_alive()?;
        let st = self.state.lock();
        let record = st.buffer(buffer)?;
        if record.mode == StorageMode::Private {
            return Err(LifeframeError::precondition(format!(
                "{buffer} ('{}') is not host-visible",
                record.label
            )));
        }
        let len = data.len() as u64;
        if offset.saturating_add(len) > record.size {
            return Err(LifeframeError::precondition(format!(
                "write [{offset}, {}) exceeds {buffer} of {} bytes",
                offset.saturating_add(len),
                record.size
            )));
        }
        check_copy_alignment("write", offset, len)?;
        // Queue writes land before the next submission, after every earlier one.
        self.queue
            .write_buffer(&record.backing, record.base + offset, data);
        Ok(())
    }

    fn read_buffer(&self, buffer: BufferHandle, offset: u64, len: u64) -> FrameResult<Vec<u8>> {
        self.ensure_alive()?;
        let (backing, start) = {
            let st = self.state.lock();
            let record = st.buffer(buffer)?;
            if record.mode == StorageMode::Private {
                return Err(LifeframeError::precondition(format!(
                    "{buffer} ('{}') is not host-visible",
                    record.label
                )));
            }
            if offset.saturating_add(len) > record.size {
                return Err(LifeframeError::precondition(format!(
                    "read [{offset}, {}) exceeds {buffer} of {} bytes",
                    offset.saturating_add(len),
                    record.size
                )));
            }
            (Arc::clone(&record.backing), record.base + offset)
        };
        if len == 0 {
            return Ok(Vec::new());
        }
        let padded = align_up(len, wgpu::COPY_BUFFER_ALIGNMENT);
        check_copy_alignment("read", start, padded)?;

        let staging = self.staging_buffer(padded);
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("lifeframe_buffer_readback"),
            });
        encoder.copy_buffer_to_buffer(&backing, start, &staging, 0, padded);
        let mut bytes = self.download(encoder, &staging)?;
        bytes.truncate(len as usize);
        Ok(bytes)
    }

    fn release_buffer(&self, buffer: BufferHandle) {
        if self.state.lock().buffers.remove(&buffer).is_none() {
            tracing::warn!(%buffer, "release of unknown buffer");
        }
    }

    fn create_heap(&self, label: &str, size: u64) -> FrameResult<HeapHandle> {
        self.ensure_alive()?;
        if size == 0 || size > self.capabilities.max_buffer_size {
            return Err(LifeframeError::setup(format!(
                "heap '{label}' of {size} bytes is outside (0, {}]",
                self.capabilities.max_buffer_size
            )));
        }
        let size = align_up(size, wgpu::COPY_BUFFER_ALIGNMENT);
        let backing = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: buffer_usages(BufferUsage::STORAGE | BufferUsage::UNIFORM),
            mapped_at_creation: false,
        });
        let mut st = self.state.lock();
        let handle = HeapHandle(st.next_id());
        st.heaps.insert(
            handle,
            HeapRecord {
                label: label.to_owned(),
                backing: Arc::new(backing),
                size,
            },
        );
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
        self.ensure_alive()?;
        let mut st = self.state.lock();
        let record = st
            .heaps
            .get(&heap)
            .ok_or_else(|| LifeframeError::precondition(format!("unknown {heap}")))?;
        if size == 0 || offset.saturating_add(size) > record.size {
            return Err(LifeframeError::precondition(format!(
                "placement [{offset}, +{size}) does not fit {heap} ('{}') of {} bytes",
                record.label, record.size
            )));
        }
        check_copy_alignment("placement", offset, 0)?;
        let buffer = BufferRecord {
            label: format!("{}@{offset}", record.label),
            backing: Arc::clone(&record.backing),
            base: offset,
            size,
            usage,
            mode,
            heap: Some(heap),
        };
        let handle = BufferHandle(st.next_id());
        st.buffers.insert(handle, buffer);
        Ok(handle)
    }

    fn release_heap(&self, heap: HeapHandle) {
        let mut st = self.state.lock();
        let placed = st.buffers.values().filter(|b| b.heap == Some(heap)).count();
        if placed > 0 {
            tracing::warn!(%heap, placed, "heap released with live placed buffers");
        }
        if st.heaps.remove(&heap).is_none() {
            tracing::warn!(%heap, "release of unknown heap");
        }
    }

    fn compile_render_pipeline(
        &self,
        desc: &RenderPipelineDesc<'_>,
    ) -> FrameResult<PipelineHandle> {
        self.ensure_alive()?;
        for (name, stage) in [
            (desc.vertex_entry, ShaderStage::Vertex),
            (desc.fragment_entry, ShaderStage::Fragment),
        ] {
            if !self.has_entry_point(name, stage) {
                return Err(LifeframeError::setup(format!(
                    "shader library has no {stage:?} entry point named '{name}'"
                )));
            }
        }

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(desc.label),
                layout: None,
                vertex: wgpu::VertexState {
                    module: &self.module,
                    entry_point: Some(desc.vertex_entry),
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    buffers: &[],
                },
                fragment: Some(wgpu::FragmentState {
                    module: &self.module,
                    entry_point: Some(desc.fragment_entry),
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: texture_format(desc.color_format),
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            });
        let layout = pipeline.get_bind_group_layout(0);
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(LifeframeError::setup(format!(
                "render pipeline '{}' rejected: {err}",
                desc.label
            )));
        }

        let mut st = self.state.lock();
        let handle = PipelineHandle(st.next_id());
        st.pipelines.insert(
            handle,
            PipelineRecord::Render {
                pipeline,
                layout,
                format: desc.color_format,
            },
        );
        Ok(handle)
    }

    fn compile_compute_pipeline(
        &self,
        desc: &ComputePipelineDesc<'_>,
    ) -> FrameResult<PipelineHandle> {
        self.ensure_alive()?;
        if !self.has_entry_point(desc.entry, ShaderStage::Compute) {
            return Err(LifeframeError::setup(format!(
                "shader library has no Compute entry point named '{}'",
                desc.entry
            )));
        }
        if desc.workgroup_size != SHADER_WORKGROUP_SIZE {
            return Err(LifeframeError::setup(format!(
                "'{}' is compiled for workgroups of {SHADER_WORKGROUP_SIZE:?}, not {:?}",
                desc.entry, desc.workgroup_size
            )));
        }
        let invocations: u32 = desc.workgroup_size.iter().product();
        let max = self.capabilities.max_compute_invocations_per_workgroup;
        if invocations > max {
            return Err(LifeframeError::setup(format!(
                "'{}' needs {invocations} invocations per workgroup, device allows {max}",
                desc.entry
            )));
        }

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = self
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(desc.label),
                layout: None,
                module: &self.module,
                entry_point: Some(desc.entry),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            });
        let layout = pipeline.get_bind_group_layout(0);
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(LifeframeError::setup(format!(
                "compute pipeline '{}' rejected: {err}",
                desc.label
            )));
        }

        let mut st = self.state.lock();
        let handle = PipelineHandle(st.next_id());
        st.pipelines
            .insert(handle, PipelineRecord::Compute { pipeline, layout });
        Ok(handle)
    }

    fn release_pipeline(&self, pipeline: PipelineHandle) {
        if self.state.lock().pipelines.remove(&pipeline).is_none() {
            tracing::warn!(%pipeline, "release of unknown pipeline");
        }
    }

    fn create_residency_set(&self, label: &str) -> FrameResult<ResidencySetHandle> {
        self.ensure_alive()?;
        let mut st = self.state.lock();
        let handle = ResidencySetHandle(st.next_id());
        st.residency_sets.insert(handle, Vec::new());
        tracing::debug!(%handle, label, "created residency set");
        Ok(handle)
    }

    fn commit_residency_set(
        &self,
        set: ResidencySetHandle,
        allocations: &[BufferHandle],
    ) -> FrameResult<()> {
        self.ensure_alive()?;
        let mut st = self.state.lock();
        if let Some(missing) = allocations.iter().find(|b| !st.buffers.contains_key(b)) {
            return Err(LifeframeError::precondition(format!(
                "cannot commit released {missing} to {set}"
            )));
        }
        let members = st
            .residency_sets
            .get_mut(&set)
            .ok_or_else(|| LifeframeError::precondition(format!("unknown {set}")))?;
        members.clear();
        members.extend_from_slice(allocations);
        Ok(())
    }

    fn release_residency_set(&self, set: ResidencySetHandle) {
        if self.state.lock().residency_sets.remove(&set).is_none() {
            tracing::warn!(%set, "release of unknown residency set");
        }
    }

    fn create_timeline(&self, label: &str, initial: u64) -> FrameResult<TimelineHandle> {
        self.ensure_alive()?;
        let mut st = self.state.lock();
        let handle = TimelineHandle(st.next_id());
        st.timelines.insert(
            handle,
            TimelineRecord {
                label: label.to_owned(),
                completed: Arc::new(AtomicU64::new(initial)),
                promised: initial,
                submissions: BTreeMap::new(),
            },
        );
        Ok(handle)
    }

    fn timeline_value(&self, timeline: TimelineHandle) -> u64 {
        let st = self.state.lock();
        st.timelines
            .get(&timeline)
            .map_or(0, |t| t.completed.load(Ordering::Acquire))
    }

    fn wait_timeline(
        &self,
        timeline: TimelineHandle,
        value: u64,
        timeout: Option<Duration>,
    ) -> FrameResult<bool> {
        let (completed, index, label) = {
            let st = self.state.lock();
            let record = st.timeline(timeline)?;
            let index = record
                .submissions
                .range(value..)
                .next()
                .map(|(_, index)| index.clone());
            (Arc::clone(&record.completed), index, record.label.clone())
        };
        if completed.load(Ordering::Acquire) >= value {
            return Ok(true);
        }
        self.ensure_alive()?;
        let Some(index) = index else {
            return Err(LifeframeError::precondition(format!(
                "{timeline} ('{label}') has no submission signalling {value}"
            )));
        };

        match self.device.poll(wgpu::PollType::Wait {
            submission_index: Some(index),
            timeout,
        }) {
            Ok(_) | Err(wgpu::PollError::Timeout) => {}
            Err(e) => return Err(LifeframeError::device(format!("wgpu poll failed: {e}"))),
        }
        self.ensure_alive()?;
        Ok(completed.load(Ordering::Acquire) >= value)
    }

    fn release_timeline(&self, timeline: TimelineHandle) {
        if self.state.lock().timelines.remove(&timeline).is_none() {
            tracing::warn!(%timeline, "release of unknown timeline");
        }
    }

    fn create_render_target(
        &self,
        label: &str,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> FrameResult<TargetHandle> {
        self.ensure_alive()?;
        if width == 0 || height == 0 {
            return Err(LifeframeError::precondition(format!(
                "render target '{label}' has zero size"
            )));
        }
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: texture_format(format),
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let mut st = self.state.lock();
        let handle = TargetHandle(st.next_id());
        st.targets.insert(
            handle,
            TargetRecord {
                texture,
                view,
                width,
                height,
                format,
            },
        );
        Ok(handle)
    }

    /// Rows come back in the target's native byte order: BGRA for `Bgra8Unorm`, half floats
    /// for `Rgba16Float`.
    fn read_render_target(&self, target: TargetHandle) -> FrameResult<Vec<u8>> {
        self.ensure_alive()?;
        let st = self.state.lock();
        let record = st
            .targets
            .get(&target)
            .ok_or_else(|| LifeframeError::precondition(format!("unknown {target}")))?;

        let row_bytes = record.width * record.format.bytes_per_pixel();
        let padded_row_bytes = align_up(
            u64::from(row_bytes),
            u64::from(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT),
        ) as u32;
        let staging = self.staging_buffer(u64::from(padded_row_bytes) * u64::from(record.height));

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("lifeframe_target_readback"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &record.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row_bytes),
                    rows_per_image: Some(record.height),
                },
            },
            wgpu::Extent3d {
                width: record.width,
                height: record.height,
                depth_or_array_layers: 1,
            },
        );
        let mapped = self.download(encoder, &staging)?;

        let (row, padded) = (row_bytes as usize, padded_row_bytes as usize);
        let mut out = Vec::with_capacity(row * record.height as usize);
        for y in 0..record.height as usize {
            let start = y * padded;
            out.extend_from_slice(&mapped[start..start + row]);
        }
        Ok(out)
    }

    fn release_render_target(&self, target: TargetHandle) {
        if self.state.lock().targets.remove(&target).is_none() {
            tracing::warn!(%target, "release of unknown render target");
        }
    }

    fn submit(&self, commands: &CommandList, signal: Signal) -> FrameResult<()> {
        self.ensure_alive()?;
        let mut st = self.state.lock();
        {
            let timeline = st.timeline(signal.timeline)?;
            let floor = timeline
                .completed
                .load(Ordering::Acquire)
                .max(timeline.promised);
            if signal.value <= floor {
                return Err(LifeframeError::device(format!(
                    "signal value {} on {} does not exceed {floor}",
                    signal.value, signal.timeline
                )));
            }
        }

        let encoder = self.encode(&st, commands)?;
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let index = self.queue.submit(Some(encoder.finish()));
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(LifeframeError::device(format!(
                "submission '{}' rejected: {err}",
                commands.label()
            )));
        }

        let timeline = st
            .timelines
            .get_mut(&signal.timeline)
            .ok_or_else(|| LifeframeError::precondition(format!("unknown {}", signal.timeline)))?;
        let completed = timeline.completed.load(Ordering::Acquire);
        timeline.submissions.retain(|&v, _| v > completed);
        timeline.submissions.insert(signal.value, index);
        timeline.promised = signal.value;

        let counter = Arc::clone(&timeline.completed);
        let value = signal.value;
        self.queue.on_submitted_work_done(move || {
            counter.fetch_max(value, Ordering::AcqRel);
        });
        tracing::trace!(label = commands.label(), value, "submitted");
        Ok(())
    }
}
