//! Lifeframe coordinates per-frame GPU work for a real-time renderer.
//!
//! A [`FrameCoordinator`] keeps N frames in flight. Every frame it rotates to the next
//! [`frame::FrameSlot`], advances a ping-pong cellular-automaton grid with one compute pass,
//! renders the fresh generation plus a primary triangle in the same submission, and paces
//! encoding against device completion. Device work goes through the [`Device`] trait:
//!
//! - [`HeadlessDevice`] runs everything on the CPU and is always available.
//! - `WgpuDevice` (feature `gpu`) drives a real adapter.
#![forbid(unsafe_code)]

pub mod config;
pub mod coordinator;
pub mod device;
pub mod foundation;
pub mod frame;
pub mod memory;
pub mod pacing;
pub mod pipeline;
pub mod primitives;
pub mod residency;
pub mod simulation;
pub mod surface;

pub use config::CoordinatorConfig;
pub use coordinator::{CoordinatorStats, FrameCoordinator, FrameReport};
pub use device::headless::{CompletionMode, HeadlessDevice, HeadlessOpts};
#[cfg(feature = "gpu")]
pub use device::gpu::WgpuDevice;
pub use device::{Device, PixelFormat};
pub use foundation::core::GridSize;
pub use foundation::error::{FrameResult, LifeframeError};
pub use simulation::{BoundaryMode, GridRole, LifeRule, SeedPattern};
pub use surface::{Drawable, OffscreenSurface, Surface};
