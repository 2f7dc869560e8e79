use super::*;
use crate::device::headless::{HeadlessDevice, HeadlessOpts};

#[test]
fn builds_all_three_pipelines_when_simulating() {
    let device = HeadlessDevice::new();
    let set = PipelineSet::build(&device, PixelFormat::Bgra8Unorm, true).unwrap();
    let life = set.life.as_ref().unwrap();
    assert_eq!(life.compute.workgroup_size(), [GRID_TILE, GRID_TILE, 1]);
    assert_eq!(life.render.color_format(), PixelFormat::Bgra8Unorm);
    assert_eq!(set.triangle.label(), "vertexShaderTriangle+fragmentShaderTriangle");
    assert_eq!(device.stats().live_objects, 3);

    set.release(&device);
    assert_eq!(device.stats().live_objects, 0);
}

#[test]
fn triangle_only_without_simulation() {
    let device = HeadlessDevice::new();
    let set = PipelineSet::build(&device, PixelFormat::Rgba8Unorm, false).unwrap();
    assert!(set.life.is_none());
    assert_eq!(device.stats().live_objects, 1);
}

#[test]
fn missing_entry_point_is_a_descriptive_setup_error() {
    let device =
        HeadlessDevice::with_opts(HeadlessOpts::default().without_entry_point(entry::LIFE_COMPUTE));
    let err = PipelineCompiler::new(&device)
        .compile_compute_pipeline(entry::LIFE_COMPUTE)
        .unwrap_err();
    assert!(matches!(err, LifeframeError::Setup(_)));
    assert!(err.to_string().contains("'JDLVCompute'"));
}

#[test]
fn wrong_stage_does_not_resolve() {
    let device = HeadlessDevice::new();
    let err = PipelineCompiler::new(&device)
        .compile_render_pipeline(
            PixelFormat::Rgba8Unorm,
            entry::LIFE_FRAGMENT,
            entry::LIFE_FRAGMENT,
        )
        .unwrap_err();
    assert!(err.to_string().contains("Vertex entry point named 'JDLVFragment'"));
}

#[test]
fn partial_failure_releases_compiled_pipelines() {
    let device = HeadlessDevice::with_opts(
        HeadlessOpts::default().without_entry_point(entry::LIFE_FRAGMENT),
    );
    assert!(PipelineSet::build(&device, PixelFormat::Rgba8Unorm, true).is_err());
    assert_eq!(device.stats().live_objects, 0);
    assert!(device.hazards().is_empty());
}

#[test]
fn oversized_workgroups_fail_in_the_device_compiler() {
    let mut opts = HeadlessOpts::default();
    opts.capabilities.max_compute_invocations_per_workgroup = 64;
    let device = HeadlessDevice::with_opts(opts);
    let err = PipelineCompiler::new(&device)
        .compile_compute_pipeline(entry::LIFE_COMPUTE)
        .unwrap_err();
    assert!(err.to_string().contains("256 invocations"));
}
