//! Pipeline compilation.
//!
//! Pipelines are compiled once during setup from named entry points in the device shader
//! library and are shared read-only by every frame slot afterwards. A failed compile is a
//! [`LifeframeError::Setup`] and aborts construction of the coordinator.

use crate::device::{
    ComputePipelineDesc, Device, PipelineHandle, PixelFormat, RenderPipelineDesc, ShaderStage,
};
use crate::foundation::error::{FrameResult, LifeframeError};

/// Entry point names in the shader library.
pub mod entry {
    pub const LIFE_COMPUTE: &str = "JDLVCompute";
    pub const LIFE_VERTEX: &str = "JDLVVertex";
    pub const LIFE_FRAGMENT: &str = "JDLVFragment";
    pub const TRIANGLE_VERTEX: &str = "vertexShaderTriangle";
    pub const TRIANGLE_FRAGMENT: &str = "fragmentShaderTriangle";
}

/// Binding slots in group 0. Each entry point family owns distinct slots so all of them can
/// live in one shader module.
pub mod slot {
    pub const SOURCE_GRID: u32 = 0;
    pub const DESTINATION_GRID: u32 = 1;
    pub const SIMULATION_STATE: u32 = 2;
    pub const VISIBLE_GRID: u32 = 3;
    pub const GRID_VIEW: u32 = 4;
    pub const TRIANGLE: u32 = 5;
}

/// Threads per simulation workgroup along x and y.
pub const GRID_TILE: u32 = 16;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderPipeline {
    handle: PipelineHandle,
    color_format: PixelFormat,
    label: String,
}

impl RenderPipeline {
    pub fn handle(&self) -> PipelineHandle {
        self.handle
    }

    pub fn color_format(&self) -> PixelFormat {
        self.color_format
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComputePipeline {
    handle: PipelineHandle,
    workgroup_size: [u32; 3],
    label: String,
}

impl ComputePipeline {
    pub fn handle(&self) -> PipelineHandle {
        self.handle
    }

    pub fn workgroup_size(&self) -> [u32; 3] {
        self.workgroup_size
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

/// Resolves entry points and drives the device compiler.
pub struct PipelineCompiler<'d, D: Device> {
    device: &'d D,
}

impl<'d, D: Device> PipelineCompiler<'d, D> {
    pub fn new(device: &'d D) -> Self {
        Self { device }
    }

    fn resolve(&self, name: &str, stage: ShaderStage) -> FrameResult<()> {
        if self.device.has_entry_point(name, stage) {
            return Ok(());
        }
        Err(LifeframeError::setup(format!(
            "shader library has no {stage:?} entry point named '{name}'"
        )))
    }

    pub fn compile_render_pipeline(
        &self,
        color_format: PixelFormat,
        vertex_entry: &str,
        fragment_entry: &str,
    ) -> FrameResult<RenderPipeline> {
        self.resolve(vertex_entry, ShaderStage::Vertex)?;
        self.resolve(fragment_entry, ShaderStage::Fragment)?;

        let label = format!("{vertex_entry}+{fragment_entry}");
        let handle = self
            .device
            .compile_render_pipeline(&RenderPipelineDesc {
                label: &label,
                vertex_entry,
                fragment_entry,
                color_format,
            })
            .map_err(|e| compile_failure(&label, e))?;
        tracing::debug!(%handle, %label, ?color_format, "compiled render pipeline");
        Ok(RenderPipeline {
            handle,
            color_format,
            label,
        })
    }

    pub fn compile_compute_pipeline(&self, entry: &str) -> FrameResult<ComputePipeline> {
        self.resolve(entry, ShaderStage::Compute)?;

        let workgroup_size = [GRID_TILE, GRID_TILE, 1];
        let handle = self
            .device
            .compile_compute_pipeline(&ComputePipelineDesc {
                label: entry,
                entry,
                workgroup_size,
            })
            .map_err(|e| compile_failure(entry, e))?;
        tracing::debug!(%handle, entry, "compiled compute pipeline");
        Ok(ComputePipeline {
            handle,
            workgroup_size,
            label: entry.to_owned(),
        })
    }
}

fn compile_failure(label: &str, err: LifeframeError) -> LifeframeError {
    match err {
        LifeframeError::Setup(msg) => LifeframeError::setup(msg),
        other => LifeframeError::setup(format!("compiling pipeline '{label}' failed: {other}")),
    }
}

/// Pipelines used by the simulation.
#[derive(Clone, Debug)]
pub struct LifePipelines {
    pub compute: ComputePipeline,
    pub render: RenderPipeline,
}

/// Every pipeline the coordinator draws with.
#[derive(Clone, Debug)]
pub struct PipelineSet {
    pub triangle: RenderPipeline,
    pub life: Option<LifePipelines>,
}

impl PipelineSet {
    /// Compile the primary triangle pipeline and, when `with_simulation`, the grid pipelines.
    ///
    /// Nothing is leaked on failure: pipelines compiled before the failing one are released.
    pub fn build<D: Device>(
        device: &D,
        color_format: PixelFormat,
        with_simulation: bool,
    ) -> FrameResult<Self> {
        let compiler = PipelineCompiler::new(device);
        let triangle = compiler.compile_render_pipeline(
            color_format,
            entry::TRIANGLE_VERTEX,
            entry::TRIANGLE_FRAGMENT,
        )?;
        if !with_simulation {
            return Ok(Self {
                triangle,
                life: None,
            });
        }

        let compute = match compiler.compile_compute_pipeline(entry::LIFE_COMPUTE) {
            Ok(c) => c,
            Err(e) => {
                device.release_pipeline(triangle.handle);
                return Err(e);
            }
        };
        let render = match compiler.compile_render_pipeline(
            color_format,
            entry::LIFE_VERTEX,
            entry::LIFE_FRAGMENT,
        ) {
            Ok(r) => r,
            Err(e) => {
                device.release_pipeline(compute.handle);
                device.release_pipeline(triangle.handle);
                return Err(e);
            }
        };

        Ok(Self {
            triangle,
            life: Some(LifePipelines { compute, render }),
        })
    }

    pub fn release<D: Device>(self, device: &D) {
        if let Some(life) = self.life {
            device.release_pipeline(life.render.handle);
            device.release_pipeline(life.compute.handle);
        }
        device.release_pipeline(self.triangle.handle);
    }
}

#[cfg(test)]
#[path = "../tests/unit/pipeline.rs"]
mod tests;
