use super::*;
use crate::device::headless::HeadlessDevice;

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct Vertex {
    position: [f32; 3],
}

fn arena(device: &HeadlessDevice, capacity: u64) -> BumpAllocator {
    BumpAllocator::new(device, capacity, StorageMode::Shared, "test_arena").unwrap()
}

#[test]
fn sizes_are_rounded_to_eight_bytes() {
    let device = HeadlessDevice::new();
    let mut a = arena(&device, 64);

    let (v, off0) = a.allocate::<Vertex>(1);
    assert_eq!(v.len(), 1);
    assert_eq!(off0, 0);
    assert_eq!(a.offset(), 16);

    let (bytes, off1) = a.allocate::<u8>(3);
    assert_eq!(bytes.len(), 3);
    assert_eq!(off1, 16);
    assert_eq!(a.offset(), 24);
}

#[test]
fn exact_fit_succeeds_and_one_more_byte_fails() {
    let device = HeadlessDevice::new();
    let mut a = arena(&device, 32);
    a.allocate::<u64>(4);
    assert_eq!(a.remaining(), 0);
    assert!(a.try_allocate::<u8>(1).is_err());
}

#[test]
#[should_panic(expected = "bump allocator overrun")]
fn overrun_panics_before_writing() {
    let device = HeadlessDevice::new();
    let mut a = arena(&device, 16);
    a.allocate::<u32>(2);
    a.allocate::<u32>(3);
}

#[test]
fn failed_allocation_leaves_offset_untouched() {
    let device = HeadlessDevice::new();
    let mut a = arena(&device, 16);
    a.allocate::<u32>(1);
    let err = a.try_allocate::<u32>(4).unwrap_err();
    assert!(err.to_string().contains("precondition violated"));
    assert_eq!(a.offset(), 8);
}

#[test]
fn reset_replays_identical_offsets() {
    let device = HeadlessDevice::new();
    let mut a = arena(&device, 256);
    let sizes = [1usize, 7, 3, 12, 2];

    let mut first = Vec::new();
    for &n in &sizes {
        first.push(a.allocate::<u32>(n).1);
    }
    a.reset();
    assert_eq!(a.offset(), 0);

    let mut second = Vec::new();
    for &n in &sizes {
        second.push(a.allocate::<u32>(n).1);
    }
    assert_eq!(first, second);
    assert_eq!(first, vec![0, 8, 40, 56, 104]);
}

#[test]
fn allocations_come_back_zeroed_after_reset() {
    let device = HeadlessDevice::new();
    let mut a = arena(&device, 32);
    a.allocate::<u32>(4).0.fill(0xdead_beef);
    a.reset();
    let (again, _) = a.allocate::<u32>(4);
    assert!(again.iter().all(|&w| w == 0));
}

#[test]
fn align_offset_respects_capacity() {
    let device = HeadlessDevice::new();
    let mut a = arena(&device, 512);
    a.allocate::<u8>(1);
    a.align_offset(256).unwrap();
    assert_eq!(a.offset(), 256);
    a.allocate::<u8>(1);
    assert!(a.align_offset(1024).is_err());
    assert_eq!(a.offset(), 264);

    a.align_offset(512).unwrap();
    assert_eq!(a.offset(), 512);
    assert_eq!(a.remaining(), 0);
    assert!(a.try_allocate::<u8>(1).is_err());
}

#[test]
fn private_storage_is_rejected() {
    let device = HeadlessDevice::new();
    let err = BumpAllocator::new(&device, 64, StorageMode::Private, "private").unwrap_err();
    assert!(err.to_string().contains("host-visible"));
}

#[test]
fn flush_uploads_only_used_bytes() {
    let device = HeadlessDevice::new();
    let mut a = arena(&device, 64);
    a.allocate::<u32>(2).0.copy_from_slice(&[1, 2]);
    a.flush(&device).unwrap();

    let bytes = device.read_buffer(a.base_buffer(), 0, 8).unwrap();
    let words: Vec<u32> = bytemuck::pod_collect_to_vec(&bytes);
    assert_eq!(words, vec![1, 2]);
    assert_eq!(a.contents().len(), 8);
}
