use super::*;
use crate::device::headless::HeadlessDevice;
use crate::device::{Pass, PixelFormat, Signal};
use crate::pipeline::PipelineSet;
use crate::residency::ResidencyRegistry;

struct Rig {
    device: HeadlessDevice,
    stepper: GridStepper,
    compute: ComputePipeline,
    state: BufferHandle,
    residency: ResidencyRegistry,
    timeline: crate::device::TimelineHandle,
    submitted: u64,
}

impl Rig {
    fn new(width: u32, height: u32, boundary: BoundaryMode, seed: SeedPattern) -> Self {
        let device = HeadlessDevice::new();
        let size = GridSize::new(width, height).unwrap();
        let stepper = GridStepper::new(&device, size, LifeRule::CONWAY, boundary, seed).unwrap();
        let compute = PipelineSet::build(&device, PixelFormat::Rgba8Unorm, true)
            .unwrap()
            .life
            .unwrap()
            .compute;
        let state = device
            .create_buffer(&BufferDesc {
                label: "state".to_owned(),
                size: SimulationState::SIZE,
                usage: BufferUsage::UNIFORM,
                mode: StorageMode::Shared,
            })
            .unwrap();
        let mut residency = ResidencyRegistry::create(&device, "rs").unwrap();
        residency.add_allocations(stepper.buffers());
        residency.add_allocation(state);
        residency.commit(&device).unwrap();
        let timeline = device.create_timeline("t", 0).unwrap();
        Self {
            device,
            stepper,
            compute,
            state,
            residency,
            timeline,
            submitted: 0,
        }
    }

    fn step(&mut self) {
        self.submitted += 1;
        let state = self.stepper.simulation_state(self.submitted, 0.0);
        self.device
            .write_buffer(self.state, 0, bytemuck::bytes_of(&state))
            .unwrap();
        let mut commands = CommandList::new();
        self.stepper
            .encode_step(&mut commands, self.state, &self.compute);
        self.residency
            .ensure_resident(commands.referenced_buffers())
            .unwrap();
        self.device
            .submit(
                &commands,
                Signal {
                    timeline: self.timeline,
                    value: self.submitted,
                },
            )
            .unwrap();
    }

    fn alive(&self) -> Vec<(u32, u32)> {
        let size = self.stepper.size();
        let cells = self.stepper.read_source(&self.device).unwrap();
        let mut out = Vec::new();
        for y in 0..size.height {
            for x in 0..size.width {
                if cells[size.index(x, y)] != 0 {
                    out.push((x, y));
                }
            }
        }
        out
    }
}

#[test]
fn even_step_counts_return_to_the_initial_source() {
    let device = HeadlessDevice::new();
    let size = GridSize::new(32, 32).unwrap();
    let mut stepper = GridStepper::new(
        &device,
        size,
        LifeRule::CONWAY,
        BoundaryMode::Wrap,
        SeedPattern::Block,
    )
    .unwrap();
    let compute = PipelineSet::build(&device, PixelFormat::Rgba8Unorm, true)
        .unwrap()
        .life
        .unwrap()
        .compute;
    let [a, b] = stepper.buffers();
    assert_eq!(stepper.source(), a);

    let mut commands = CommandList::new();
    for k in 1..=10u64 {
        let bound = stepper.encode_step(&mut commands, a, &compute);
        assert_ne!(bound.source, bound.destination);
        if k % 2 == 0 {
            assert_eq!(stepper.source(), a);
            assert_eq!(stepper.role(), GridRole::ASource);
        } else {
            assert_eq!(stepper.source(), b);
        }
    }
    assert_eq!(stepper.steps_encoded(), 10);
}

#[test]
fn each_step_reads_what_the_previous_step_wrote() {
    let device = HeadlessDevice::new();
    let size = GridSize::new(16, 16).unwrap();
    let mut stepper = GridStepper::new(
        &device,
        size,
        LifeRule::CONWAY,
        BoundaryMode::Wrap,
        SeedPattern::Glider,
    )
    .unwrap();
    let compute = PipelineSet::build(&device, PixelFormat::Rgba8Unorm, true)
        .unwrap()
        .life
        .unwrap()
        .compute;

    let mut commands = CommandList::new();
    let first = stepper.encode_step(&mut commands, stepper.source(), &compute);
    let second = stepper.encode_step(&mut commands, stepper.source(), &compute);
    assert_eq!(second.source, first.destination);
    assert_eq!(second.destination, first.source);

    let Pass::Compute(pass) = &commands.passes()[0] else {
        panic!("expected a compute pass");
    };
    assert_eq!(pass.bindings[0].buffer, first.source);
    assert_eq!(pass.bindings[1].buffer, first.destination);
    assert_eq!(pass.bindings[2].size, Some(SimulationState::SIZE));
}

#[test]
fn dispatch_covers_partial_edge_groups() {
    let device = HeadlessDevice::new();
    let compute = PipelineSet::build(&device, PixelFormat::Rgba8Unorm, true)
        .unwrap()
        .life
        .unwrap()
        .compute;
    let make = |w, h| {
        GridStepper::new(
            &device,
            GridSize::new(w, h).unwrap(),
            LifeRule::CONWAY,
            BoundaryMode::Wrap,
            SeedPattern::Block,
        )
        .unwrap()
    };
    assert_eq!(make(256, 256).workgroups(&compute), [16, 16, 1]);
    assert_eq!(make(20, 20).workgroups(&compute), [2, 2, 1]);
    assert_eq!(make(16, 17).workgroups(&compute), [1, 2, 1]);
}

#[test]
fn seed_lands_in_buffer_a_and_b_starts_dead() {
    let device = HeadlessDevice::new();
    let size = GridSize::new(5, 3).unwrap();
    let stepper = GridStepper::new(
        &device,
        size,
        LifeRule::CONWAY,
        BoundaryMode::Wrap,
        SeedPattern::Blinker,
    )
    .unwrap();
    let [a, b] = stepper.buffers();
    let read = |h| -> Vec<u32> {
        bytemuck::pod_collect_to_vec(&device.read_buffer(h, 0, size.byte_len()).unwrap())
    };
    assert_eq!(read(a), vec![0, 0, 0, 0, 0, 0, 1, 1, 1, 0, 0, 0, 0, 0, 0]);
    assert!(read(b).iter().all(|&c| c == 0));
}

#[test]
fn block_is_a_still_life() {
    let mut rig = Rig::new(8, 8, BoundaryMode::Wrap, SeedPattern::Block);
    let before = rig.alive();
    assert_eq!(before.len(), 4);
    rig.step();
    assert_eq!(rig.alive(), before);
}

#[test]
fn blinker_has_period_two() {
    let mut rig = Rig::new(5, 3, BoundaryMode::Clamp, SeedPattern::Blinker);
    let horizontal = rig.alive();
    assert_eq!(horizontal, vec![(1, 1), (2, 1), (3, 1)]);

    rig.step();
    assert_eq!(rig.alive(), vec![(2, 0), (2, 1), (2, 2)]);

    rig.step();
    assert_eq!(rig.alive(), horizontal);
}

#[test]
fn release_frees_both_buffers() {
    let device = HeadlessDevice::new();
    let stepper = GridStepper::new(
        &device,
        GridSize::new(4, 4).unwrap(),
        LifeRule::CONWAY,
        BoundaryMode::Wrap,
        SeedPattern::Block,
    )
    .unwrap();
    stepper.release(&device);
    assert_eq!(device.stats().live_objects, 0);
}
