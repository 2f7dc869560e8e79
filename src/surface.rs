//! Presentation seam: where each frame's render pass lands.

use crate::device::{Device, PixelFormat, TargetHandle};
use crate::foundation::error::{FrameResult, LifeframeError};

/// The color target a frame renders into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Drawable {
    pub target: TargetHandle,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

/// Supplies drawables and takes them back for presentation.
pub trait Surface<D: Device> {
    fn next_drawable(&mut self, device: &D) -> FrameResult<Drawable>;
    fn present(&mut self, device: &D, drawable: Drawable) -> FrameResult<()>;
    /// Give back a drawable that will not be presented, e.g. because its frame failed.
    fn discard(&mut self, device: &D, drawable: Drawable) -> FrameResult<()>;
}

/// A swapchain-like ring of render targets with nowhere to show them.
pub struct OffscreenSurface {
    targets: Vec<TargetHandle>,
    width: u32,
    height: u32,
    format: PixelFormat,
    next: usize,
    outstanding: Option<TargetHandle>,
    last_presented: Option<TargetHandle>,
    presented: u64,
}

impl OffscreenSurface {
    pub fn new<D: Device>(
        device: &D,
        width: u32,
        height: u32,
        format: PixelFormat,
        image_count: usize,
    ) -> FrameResult<Self> {
        if image_count == 0 {
            return Err(LifeframeError::config("surface needs at least one image"));
        }
        let mut targets = Vec::with_capacity(image_count);
        for i in 0..image_count {
            match device.create_render_target(&format!("offscreen_{i}"), width, height, format) {
                Ok(t) => targets.push(t),
                Err(e) => {
                    for t in targets {
                        device.release_render_target(t);
                    }
                    return Err(e);
                }
            }
        }
        Ok(Self {
            targets,
            width,
            height,
            format,
            next: 0,
            outstanding: None,
            last_presented: None,
            presented: 0,
        })
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn presented(&self) -> u64 {
        self.presented
    }

    pub fn last_presented(&self) -> Option<Drawable> {
        self.last_presented.map(|target| self.drawable(target))
    }

    fn drawable(&self, target: TargetHandle) -> Drawable {
        Drawable {
            target,
            width: self.width,
            height: self.height,
            format: self.format,
        }
    }

    pub fn release<D: Device>(self, device: &D) {
        for t in self.targets {
            device.release_render_target(t);
        }
    }
}

impl<D: Device> Surface<D> for OffscreenSurface {
    fn next_drawable(&mut self, _device: &D) -> FrameResult<Drawable> {
        if let Some(target) = self.outstanding {
            return Err(LifeframeError::precondition(format!(
                "{target} was acquired but never presented"
            )));
        }
        let target = self.targets[self.next];
        self.next = (self.next + 1) % self.targets.len();
        self.outstanding = Some(target);
        Ok(self.drawable(target))
    }

    fn present(&mut self, _device: &D, drawable: Drawable) -> FrameResult<()> {
        if self.outstanding != Some(drawable.target) {
            return Err(LifeframeError::precondition(format!(
                "{} is not the outstanding drawable",
                drawable.target
            )));
        }
        self.outstanding = None;
        self.last_presented = Some(drawable.target);
        self.presented += 1;
        Ok(())
    }

    fn discard(&mut self, _device: &D, drawable: Drawable) -> FrameResult<()> {
        if self.outstanding != Some(drawable.target) {
            return Err(LifeframeError::precondition(format!(
                "{} is not the outstanding drawable",
                drawable.target
            )));
        }
        self.outstanding = None;
        // Hand the same target out again next time.
        self.next = (self.next + self.targets.len() - 1) % self.targets.len();
        Ok(())
    }
}

#[cfg(test)]
#[path = "../tests/unit/surface.rs"]
mod tests;
