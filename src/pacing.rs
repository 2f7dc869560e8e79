use std::time::{Duration, Instant};

use crate::device::{Device, Signal, TimelineHandle};
use crate::foundation::error::{FrameResult, LifeframeError};

/// Bounds how far encoding runs ahead of device execution.
///
/// Frames are numbered from 1. Submission of frame `f` signals the timeline with `f` once the
/// device has executed it, so the timeline value is the highest completed frame.
pub struct PacingMonitor {
    timeline: TimelineHandle,
    frames_in_flight: u64,
    last_submitted: u64,
    timeout: Option<Duration>,
}

impl PacingMonitor {
    /// `timeout: None` waits forever.
    pub fn new<D: Device>(
        device: &D,
        frames_in_flight: u32,
        timeout: Option<Duration>,
    ) -> FrameResult<Self> {
        if frames_in_flight == 0 {
            return Err(LifeframeError::config("frames in flight must be at least 1"));
        }
        let timeline = device.create_timeline("frame pacing", 0)?;
        Ok(Self {
            timeline,
            frames_in_flight: u64::from(frames_in_flight),
            last_submitted: 0,
            timeout,
        })
    }

    pub fn timeline(&self) -> TimelineHandle {
        self.timeline
    }

    pub fn frames_in_flight(&self) -> u64 {
        self.frames_in_flight
    }

    pub fn last_submitted(&self) -> u64 {
        self.last_submitted
    }

    pub fn completed<D: Device>(&self, device: &D) -> u64 {
        device.timeline_value(self.timeline)
    }

    pub fn in_flight<D: Device>(&self, device: &D) -> u64 {
        self.last_submitted.saturating_sub(self.completed(device))
    }

    /// Signal to attach to the submission of `frame`.
    pub fn signal_for(&self, frame: u64) -> Signal {
        Signal {
            timeline: self.timeline,
            value: frame,
        }
    }

    /// Block until encoding `frame` is safe: a no-op for the first N frames, afterwards waits
    /// for frame `frame - N` to complete. Returns whether the call had to wait.
    pub fn wait_for_frame<D: Device>(&self, device: &D, frame: u64) -> FrameResult<bool> {
        if frame <= self.frames_in_flight {
            return Ok(false);
        }
        self.wait_until(device, frame - self.frames_in_flight)
    }

    /// Block until every submitted frame completed.
    pub fn wait_idle<D: Device>(&self, device: &D) -> FrameResult<bool> {
        if self.last_submitted == 0 {
            return Ok(false);
        }
        self.wait_until(device, self.last_submitted)
    }

    fn wait_until<D: Device>(&self, device: &D, frame: u64) -> FrameResult<bool> {
        if self.completed(device) >= frame {
            return Ok(false);
        }
        let started = Instant::now();
        tracing::debug!(frame, timeout = ?self.timeout, "waiting on frame completion");
        if device.wait_timeline(self.timeline, frame, self.timeout)? {
            tracing::debug!(
                frame,
                waited_us = started.elapsed().as_micros() as u64,
                "frame completed"
            );
            return Ok(true);
        }
        Err(LifeframeError::PacingTimeout {
            frame,
            waited_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Record that `frame` was submitted. Frame indices must strictly increase.
    pub fn advance(&mut self, frame: u64) -> FrameResult<()> {
        if frame <= self.last_submitted {
            return Err(LifeframeError::precondition(format!(
                "frame {frame} submitted after frame {}",
                self.last_submitted
            )));
        }
        self.last_submitted = frame;
        Ok(())
    }

    pub fn release<D: Device>(self, device: &D) {
        device.release_timeline(self.timeline);
    }
}

#[cfg(test)]
#[path = "../tests/unit/pacing.rs"]
mod tests;
