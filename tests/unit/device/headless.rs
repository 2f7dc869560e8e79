use super::*;
use crate::device::{ComputePass, RenderPass};
use crate::pipeline::PipelineSet;
use smallvec::smallvec;

fn storage(device: &HeadlessDevice, label: &str, size: u64) -> BufferHandle {
    device
        .create_buffer(&BufferDesc {
            label: label.to_owned(),
            size,
            usage: BufferUsage::STORAGE,
            mode: StorageMode::Shared,
        })
        .unwrap()
}

fn noop_compute(device: &HeadlessDevice, buffer: BufferHandle) -> CommandList {
    let pipelines = PipelineSet::build(device, PixelFormat::Rgba8Unorm, true).unwrap();
    let life = pipelines.life.unwrap();
    let mut commands = CommandList::new();
    commands.reset("probe");
    commands.push_compute(ComputePass {
        label: "probe".to_owned(),
        pipeline: life.compute.handle(),
        bindings: smallvec![BufferBinding::whole(0, buffer, BindingAccess::Read)],
        // Zero groups: validation only.
        workgroups: [0, 0, 1],
    });
    commands
}

#[test]
fn submission_referencing_uncommitted_buffer_is_rejected() {
    let device = HeadlessDevice::new();
    let buffer = storage(&device, "loose", 64);
    let timeline = device.create_timeline("t", 0).unwrap();
    let commands = noop_compute(&device, buffer);

    let err = device
        .submit(&commands, Signal { timeline, value: 1 })
        .unwrap_err();
    assert!(matches!(err, LifeframeError::DeviceExecution(_)));
    assert!(err.to_string().contains("residency"));
    assert_eq!(device.timeline_value(timeline), 0);

    let set = device.create_residency_set("rs").unwrap();
    device.commit_residency_set(set, &[buffer]).unwrap();
    device
        .submit(&commands, Signal { timeline, value: 1 })
        .unwrap();
    assert_eq!(device.timeline_value(timeline), 1);
}

#[test]
fn signal_values_must_increase() {
    let device = HeadlessDevice::new();
    let timeline = device.create_timeline("t", 4).unwrap();
    let empty = CommandList::new();
    assert!(device.submit(&empty, Signal { timeline, value: 4 }).is_err());
    device.submit(&empty, Signal { timeline, value: 5 }).unwrap();
    assert!(device.submit(&empty, Signal { timeline, value: 5 }).is_err());
}

#[test]
fn manual_completion_holds_the_timeline_back() {
    let device = HeadlessDevice::with_opts(HeadlessOpts::manual());
    let timeline = device.create_timeline("t", 0).unwrap();
    let empty = CommandList::new();
    device.submit(&empty, Signal { timeline, value: 1 }).unwrap();
    device.submit(&empty, Signal { timeline, value: 2 }).unwrap();

    assert_eq!(device.pending_submissions(), 2);
    assert!(
        !device
            .wait_timeline(timeline, 1, Some(Duration::from_millis(10)))
            .unwrap()
    );

    assert_eq!(device.complete_through(1).unwrap(), 1);
    assert_eq!(device.timeline_value(timeline), 1);
    assert!(device.wait_timeline(timeline, 1, None).unwrap());

    assert_eq!(device.complete_all().unwrap(), 1);
    assert_eq!(device.timeline_value(timeline), 2);
    assert_eq!(device.stats().executed, 2);
}

#[test]
fn waiter_is_released_by_completion_on_another_thread() {
    let device = HeadlessDevice::with_opts(HeadlessOpts::manual());
    let timeline = device.create_timeline("t", 0).unwrap();
    device
        .submit(&CommandList::new(), Signal { timeline, value: 1 })
        .unwrap();

    let completer = device.clone();
    let handle = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(20));
        completer.complete_all().unwrap();
    });
    assert!(device.wait_timeline(timeline, 1, None).unwrap());
    handle.join().unwrap();
}

#[test]
fn host_write_during_pending_read_is_a_hazard() {
    let device = HeadlessDevice::with_opts(HeadlessOpts::manual());
    let buffer = storage(&device, "shared", 64);
    let set = device.create_residency_set("rs").unwrap();
    device.commit_residency_set(set, &[buffer]).unwrap();
    let timeline = device.create_timeline("t", 0).unwrap();

    device
        .submit(&noop_compute(&device, buffer), Signal { timeline, value: 1 })
        .unwrap();
    device.write_buffer(buffer, 0, &[1, 2, 3, 4]).unwrap();
    assert_eq!(device.hazards().len(), 1);

    device.complete_all().unwrap();
    device.write_buffer(buffer, 0, &[1, 2, 3, 4]).unwrap();
    assert_eq!(device.hazards().len(), 1);
}

#[test]
fn double_release_is_recorded() {
    let device = HeadlessDevice::new();
    let buffer = storage(&device, "b", 16);
    device.release_buffer(buffer);
    assert!(device.hazards().is_empty());
    device.release_buffer(buffer);
    assert_eq!(device.hazards(), vec![format!("release of unknown {buffer}")]);
}

#[test]
fn misaligned_binding_offset_is_rejected() {
    let device = HeadlessDevice::new();
    let buffer = device
        .create_buffer(&BufferDesc {
            label: "u".to_owned(),
            size: 64,
            usage: BufferUsage::STORAGE | BufferUsage::UNIFORM,
            mode: StorageMode::Shared,
        })
        .unwrap();
    let set = device.create_residency_set("rs").unwrap();
    device.commit_residency_set(set, &[buffer]).unwrap();
    let timeline = device.create_timeline("t", 0).unwrap();
    let life = PipelineSet::build(&device, PixelFormat::Rgba8Unorm, true)
        .unwrap()
        .life
        .unwrap();

    let mut commands = CommandList::new();
    commands.push_compute(ComputePass {
        label: "misaligned".to_owned(),
        pipeline: life.compute.handle(),
        bindings: smallvec![BufferBinding::range(2, buffer, 4, 32, BindingAccess::Uniform)],
        workgroups: [0, 0, 1],
    });
    let err = device
        .submit(&commands, Signal { timeline, value: 1 })
        .unwrap_err();
    assert!(err.to_string().contains("not a multiple of 8"));
}

#[test]
fn render_pass_clears_and_draws_live_cells() {
    let device = HeadlessDevice::new();
    let pipelines = PipelineSet::build(&device, PixelFormat::Rgba8Unorm, true).unwrap();
    let life = pipelines.life.unwrap();
    let target = device
        .create_render_target("t", 4, 2, PixelFormat::Rgba8Unorm)
        .unwrap();

    // 2x1 grid, cell size 2: left cell alive.
    let grid = storage(&device, "grid", 8);
    device
        .write_buffer(grid, 0, bytemuck::cast_slice(&[1u32, 0]))
        .unwrap();
    let view = device
        .create_buffer(&BufferDesc {
            label: "view".to_owned(),
            size: GridView::SIZE,
            usage: BufferUsage::UNIFORM,
            mode: StorageMode::Shared,
        })
        .unwrap();
    let size = GridSize::new(2, 1).unwrap();
    device
        .write_buffer(view, 0, bytemuck::bytes_of(&GridView::new(size, 2)))
        .unwrap();
    let set = device.create_residency_set("rs").unwrap();
    device.commit_residency_set(set, &[grid, view]).unwrap();
    let timeline = device.create_timeline("t", 0).unwrap();

    let mut commands = CommandList::new();
    commands.push_render(RenderPass {
        label: "grid".to_owned(),
        target,
        clear_color: [0.0, 0.0, 1.0, 1.0],
        draws: vec![DrawCall {
            pipeline: life.render.handle(),
            bindings: smallvec![
                BufferBinding::whole(slot::VISIBLE_GRID, grid, BindingAccess::Read),
                BufferBinding::whole(slot::GRID_VIEW, view, BindingAccess::Uniform),
            ],
            vertex_count: 3,
            instance_count: 1,
        }],
    });
    device
        .submit(&commands, Signal { timeline, value: 1 })
        .unwrap();

    let pixels = device.read_render_target(target).unwrap();
    let px = |x: usize, y: usize| &pixels[(y * 4 + x) * 4..(y * 4 + x) * 4 + 4];
    assert_eq!(px(0, 0), ALIVE_RGBA8);
    assert_eq!(px(1, 1), ALIVE_RGBA8);
    assert_eq!(px(2, 0), [0, 0, 255, 255]);
    assert_eq!(px(3, 1), [0, 0, 255, 255]);
    assert_eq!(device.stats().draws, 1);
}

#[test]
fn pipeline_format_must_match_target() {
    let device = HeadlessDevice::new();
    let pipelines = PipelineSet::build(&device, PixelFormat::Bgra8Unorm, false).unwrap();
    let target = device
        .create_render_target("t", 2, 2, PixelFormat::Rgba8Unorm)
        .unwrap();
    let timeline = device.create_timeline("t", 0).unwrap();

    let mut commands = CommandList::new();
    commands.push_render(RenderPass {
        label: "mismatch".to_owned(),
        target,
        clear_color: [0.0; 4],
        draws: vec![DrawCall {
            pipeline: pipelines.triangle.handle(),
            bindings: smallvec![],
            vertex_count: 3,
            instance_count: 1,
        }],
    });
    let err = device
        .submit(&commands, Signal { timeline, value: 1 })
        .unwrap_err();
    assert!(err.to_string().contains("Bgra8Unorm"));
}

#[test]
fn lost_device_fails_every_call() {
    let device = HeadlessDevice::new();
    let timeline = device.create_timeline("t", 0).unwrap();
    device.set_lost();
    assert!(device.is_lost());
    let err = device
        .submit(&CommandList::new(), Signal { timeline, value: 1 })
        .unwrap_err();
    assert!(err.is_device_loss());
    assert!(device.wait_timeline(timeline, 1, None).is_err());
}

#[test]
fn heap_placements_must_fit() {
    let device = HeadlessDevice::new();
    let heap = device.create_heap("h", 512).unwrap();
    device
        .create_heap_buffer(heap, 256, 256, BufferUsage::STORAGE, StorageMode::Shared)
        .unwrap();
    assert!(
        device
            .create_heap_buffer(heap, 256, 257, BufferUsage::STORAGE, StorageMode::Shared)
            .is_err()
    );
}
