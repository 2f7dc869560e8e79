use super::*;
use crate::device::headless::HeadlessDevice;

#[test]
fn workload_accounts_for_binding_alignment() {
    assert_eq!(frame_workload_bytes(8), 96 + 16);
    assert_eq!(frame_workload_bytes(1), 96 + 16);
    assert_eq!(frame_workload_bytes(256), 256 + 16);
}

#[test]
fn slots_rotate_by_frame_modulo_n() {
    let device = HeadlessDevice::new();
    let mut frames = FrameResources::new(&device, 3, 512).unwrap();
    assert_eq!(frames.len(), 3);

    let visited: Vec<usize> = (1..=7)
        .map(|frame| frames.acquire(frame).unwrap().index())
        .collect();
    assert_eq!(visited, vec![1, 2, 0, 1, 2, 0, 1]);
    assert_eq!(frames.slot(1).unwrap().last_frame(), Some(7));
    assert_eq!(frames.slot(1).unwrap().commands().label(), "Frame: 7");
}

#[test]
fn acquire_resets_the_arena() {
    let device = HeadlessDevice::new();
    let mut frames = FrameResources::new(&device, 2, 512).unwrap();

    let slot = frames.acquire(1).unwrap();
    let (_, arena) = slot.encoder();
    arena.allocate::<u32>(10);
    assert_eq!(slot.arena().offset(), 40);

    frames.acquire(2).unwrap();
    assert_eq!(frames.acquire(3).unwrap().arena().offset(), 0);
}

#[test]
fn slot_cannot_go_backwards() {
    let device = HeadlessDevice::new();
    let mut frames = FrameResources::new(&device, 2, 512).unwrap();
    frames.acquire(4).unwrap();
    assert!(frames.acquire(2).is_err());
}

#[test]
fn every_slot_buffer_is_listed_and_released() {
    let device = HeadlessDevice::new();
    let frames = FrameResources::new(&device, 3, 512).unwrap();
    let allocations = frames.allocations();
    assert_eq!(allocations.len(), 6);

    frames.release(&device);
    assert_eq!(device.stats().live_objects, 0);
    assert!(device.hazards().is_empty());
}

#[test]
fn failed_setup_releases_earlier_slots() {
    let device = HeadlessDevice::new();
    // Larger than the device limit, so the first arena fails after its state buffer.
    assert!(FrameResources::new(&device, 3, 1 << 31).is_err());
    assert_eq!(device.stats().live_objects, 0);
}
