use super::*;
use crate::device::CommandList;
use crate::device::headless::{HeadlessDevice, HeadlessOpts};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

fn submit_empty(device: &HeadlessDevice, monitor: &mut PacingMonitor, frame: u64) {
    device
        .submit(&CommandList::new(), monitor.signal_for(frame))
        .unwrap();
    monitor.advance(frame).unwrap();
}

#[test]
fn first_n_frames_never_wait() {
    let device = HeadlessDevice::with_opts(HeadlessOpts::manual());
    let mut monitor = PacingMonitor::new(&device, 3, Some(Duration::from_millis(1))).unwrap();
    for frame in 1..=3 {
        assert!(!monitor.wait_for_frame(&device, frame).unwrap());
        submit_empty(&device, &mut monitor, frame);
    }
    assert_eq!(monitor.in_flight(&device), 3);
}

#[test]
fn frame_past_the_bound_times_out_without_completion() {
    let device = HeadlessDevice::with_opts(HeadlessOpts::manual());
    let mut monitor = PacingMonitor::new(&device, 2, Some(Duration::from_millis(5))).unwrap();
    submit_empty(&device, &mut monitor, 1);
    submit_empty(&device, &mut monitor, 2);

    let err = monitor.wait_for_frame(&device, 3).unwrap_err();
    assert!(matches!(err, LifeframeError::PacingTimeout { frame: 1, .. }));
    assert!(err.is_device_loss());

    device.complete_through(1).unwrap();
    assert!(!monitor.wait_for_frame(&device, 3).unwrap());
}

#[test]
fn wait_does_not_return_before_the_completion_signal() {
    let device = HeadlessDevice::with_opts(HeadlessOpts::manual());
    let mut monitor = PacingMonitor::new(&device, 1, None).unwrap();
    submit_empty(&device, &mut monitor, 1);

    let signalled = Arc::new(AtomicBool::new(false));
    let completer = {
        let device = device.clone();
        let signalled = Arc::clone(&signalled);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            signalled.store(true, Ordering::SeqCst);
            device.complete_all().unwrap();
        })
    };

    assert!(monitor.wait_for_frame(&device, 2).unwrap());
    assert!(signalled.load(Ordering::SeqCst));
    assert_eq!(monitor.completed(&device), 1);
    completer.join().unwrap();
}

#[test]
fn advance_must_strictly_increase() {
    let device = HeadlessDevice::new();
    let mut monitor = PacingMonitor::new(&device, 3, None).unwrap();
    monitor.advance(1).unwrap();
    monitor.advance(3).unwrap();
    assert!(monitor.advance(3).is_err());
    assert!(monitor.advance(2).is_err());
    assert_eq!(monitor.last_submitted(), 3);
}

#[test]
fn wait_idle_drains_everything() {
    let device = HeadlessDevice::with_opts(HeadlessOpts::manual());
    let mut monitor = PacingMonitor::new(&device, 3, None).unwrap();
    assert!(!monitor.wait_idle(&device).unwrap());
    for frame in 1..=3 {
        submit_empty(&device, &mut monitor, frame);
    }
    let completer = {
        let device = device.clone();
        std::thread::spawn(move || device.complete_all().unwrap())
    };
    monitor.wait_idle(&device).unwrap();
    assert_eq!(monitor.in_flight(&device), 0);
    assert_eq!(completer.join().unwrap(), 3);
}

#[test]
fn zero_frames_in_flight_is_rejected() {
    let device = HeadlessDevice::new();
    assert!(PacingMonitor::new(&device, 0, None).is_err());
}
