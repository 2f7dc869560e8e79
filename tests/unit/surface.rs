use super::*;
use crate::device::headless::HeadlessDevice;

#[test]
fn drawables_rotate_through_the_ring() {
    let device = HeadlessDevice::new();
    let mut surface = OffscreenSurface::new(&device, 8, 4, PixelFormat::Rgba8Unorm, 2).unwrap();

    let mut seen = Vec::new();
    for _ in 0..4 {
        let d = surface.next_drawable(&device).unwrap();
        assert_eq!((d.width, d.height), (8, 4));
        seen.push(d.target);
        surface.present(&device, d).unwrap();
    }
    assert_eq!(seen[0], seen[2]);
    assert_eq!(seen[1], seen[3]);
    assert_ne!(seen[0], seen[1]);
    assert_eq!(surface.presented(), 4);
    assert_eq!(surface.last_presented().map(|d| d.target), Some(seen[3]));
}

#[test]
fn drawable_must_be_presented_before_the_next() {
    let device = HeadlessDevice::new();
    let mut surface = OffscreenSurface::new(&device, 2, 2, PixelFormat::Rgba8Unorm, 3).unwrap();
    let d = surface.next_drawable(&device).unwrap();
    assert!(Surface::<HeadlessDevice>::next_drawable(&mut surface, &device).is_err());
    surface.present(&device, d).unwrap();
    assert!(surface.present(&device, d).is_err());

    surface.release(&device);
    assert_eq!(device.stats().live_objects, 0);
}

#[test]
fn discarded_drawable_is_handed_out_again() {
    let device = HeadlessDevice::new();
    let mut surface = OffscreenSurface::new(&device, 2, 2, PixelFormat::Rgba8Unorm, 3).unwrap();
    let first = surface.next_drawable(&device).unwrap();
    surface.present(&device, first).unwrap();

    let d = surface.next_drawable(&device).unwrap();
    surface.discard(&device, d).unwrap();
    assert!(surface.discard(&device, d).is_err());
    assert_eq!(surface.presented(), 1);
    assert_eq!(surface.last_presented(), Some(first));

    let again = surface.next_drawable(&device).unwrap();
    assert_eq!(again.target, d.target);
    surface.present(&device, again).unwrap();
    assert_eq!(surface.presented(), 2);
}
