use super::*;
use crate::device::headless::HeadlessDevice;
use crate::device::{BufferDesc, BufferUsage, StorageMode};

fn buffer(device: &HeadlessDevice, label: &str) -> BufferHandle {
    device
        .create_buffer(&BufferDesc {
            label: label.to_owned(),
            size: 16,
            usage: BufferUsage::STORAGE,
            mode: StorageMode::Shared,
        })
        .unwrap()
}

#[test]
fn nothing_is_resident_before_commit() {
    let device = HeadlessDevice::new();
    let mut registry = ResidencyRegistry::create(&device, "rs").unwrap();
    let a = buffer(&device, "a");
    registry.add_allocation(a);

    assert!(registry.has_uncommitted());
    let err = registry.ensure_resident([a]).unwrap_err();
    assert!(
        err.to_string()
            .contains("is not in the committed residency set")
    );
    assert!(err.to_string().contains("after the last commit"));

    registry.commit(&device).unwrap();
    registry.ensure_resident([a]).unwrap();
    assert!(!registry.has_uncommitted());
}

#[test]
fn recommit_amends_the_active_set() {
    let device = HeadlessDevice::new();
    let mut registry = ResidencyRegistry::create(&device, "rs").unwrap();
    let a = buffer(&device, "a");
    let b = buffer(&device, "b");
    registry.add_allocation(a);
    registry.commit(&device).unwrap();

    registry.add_allocation(b);
    assert!(registry.ensure_resident([a, b]).is_err());
    registry.commit(&device).unwrap();
    registry.ensure_resident([a, b]).unwrap();
    assert_eq!(registry.commits(), 2);
    assert_eq!(registry.committed().collect::<Vec<_>>(), vec![a, b]);
}

#[test]
fn add_allocation_is_idempotent() {
    let device = HeadlessDevice::new();
    let mut registry = ResidencyRegistry::create(&device, "rs").unwrap();
    let a = buffer(&device, "a");
    registry.add_allocations([a, a]);
    registry.add_allocation(a);
    registry.commit(&device).unwrap();
    assert_eq!(registry.committed().count(), 1);
}

#[test]
fn unknown_buffers_are_reported_without_hint() {
    let device = HeadlessDevice::new();
    let registry = ResidencyRegistry::create(&device, "rs").unwrap();
    let stray = buffer(&device, "stray");
    let err = registry.ensure_resident([stray]).unwrap_err();
    assert!(!err.to_string().contains("after the last commit"));
    registry.release(&device);
}
