// Frame module - presentation loop independent of the graphics backend
//
// The loop only talks to a `PresentTarget`. The Vulkan renderer implements it
// for real frames, and the tests implement it with a scripted driver.

pub mod groups;
pub mod presenter;
pub mod ring;
pub mod status;

#[cfg(test)]
mod tests;

pub use groups::{GroupSet, RebuildPlan};
pub use presenter::{FrameLoop, FrameOutcome, Phase};
pub use ring::FrameRing;
pub use status::{classify_acquire, classify_present, FrameError, Staleness, Status};

/// Framebuffer size reported by the window system, in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SurfaceSize {
    pub width: u32,
    pub height: u32,
}

impl SurfaceSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Minimized windows report a zero-area framebuffer
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl From<winit::dpi::PhysicalSize<u32>> for SurfaceSize {
    fn from(size: winit::dpi::PhysicalSize<u32>) -> Self {
        Self::new(size.width, size.height)
    }
}

/// Everything the frame loop needs from a graphics backend.
///
/// `slot` indexes the frames-in-flight ring. Each slot owns an "image ready"
/// semaphore, a "render finished" semaphore and a fence. `image` is a
/// swapchain image index returned by `acquire`.
pub trait PresentTarget {
    /// Number of images in the current swapchain
    fn image_count(&self) -> usize;

    /// Number of pre-recorded command sequences
    fn recorded_count(&self) -> usize;

    /// Block until the GPU work last submitted from `slot` has finished
    fn wait_slot(&mut self, slot: usize) -> Result<(), FrameError>;

    /// Acquire the next image, signaling the slot's "image ready" semaphore
    fn acquire(&mut self, slot: usize) -> Result<Status<u32>, FrameError>;

    /// Update per-image data (uniforms) before submission
    fn prepare(&mut self, image: u32) -> Result<(), FrameError>;

    /// Submit the recorded commands for `image`, waiting on "image ready"
    /// and signaling "render finished" and the slot fence
    fn submit(&mut self, slot: usize, image: u32) -> Result<(), FrameError>;

    /// Queue `image` for presentation once "render finished" is signaled
    fn present(&mut self, slot: usize, image: u32) -> Result<Status<()>, FrameError>;

    /// Block until the device has no outstanding work
    fn wait_idle(&mut self) -> Result<(), FrameError>;

    /// Tear down and rebuild every size-dependent object for `size`.
    ///
    /// Returns `false` without touching anything when the surface itself
    /// reports zero area, which can happen before the window's resize event
    /// arrives.
    fn rebuild(&mut self, size: SurfaceSize) -> Result<bool, FrameError>;
}
