// Driver result classification
//
// Presentation calls return a mix of success codes, recoverable staleness and
// real failures. They are sorted here once, so the loop only ever sees
// `Status` for things it can handle and `FrameError` for things it cannot.

use ash::prelude::VkResult;
use ash::vk;
use thiserror::Error;

/// Why the surface needs to be rebuilt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staleness {
    /// Still presentable, but no longer matches the surface exactly
    Suboptimal,
    /// Unusable until recreated
    OutOfDate,
}

/// Outcome of an acquire or present call that did not fail fatally
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status<T> {
    Success(T),
    /// Proceed with `T`, recreate afterwards
    Suboptimal(T),
    /// No value available, recreate now
    OutOfDate,
}

impl<T> Status<T> {
    pub fn staleness(&self) -> Option<Staleness> {
        match self {
            Status::Success(_) => None,
            Status::Suboptimal(_) => Some(Staleness::Suboptimal),
            Status::OutOfDate => Some(Staleness::OutOfDate),
        }
    }
}

/// Failures that end the application
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("failed to acquire swapchain image: {0}")]
    Acquire(vk::Result),

    #[error("failed to update frame uniforms: {0:#}")]
    Prepare(anyhow::Error),

    #[error("failed to submit draw command buffer: {0}")]
    Submit(vk::Result),

    #[error("failed to present swapchain image: {0}")]
    Present(vk::Result),

    #[error("failed to wait for GPU work: {0}")]
    Sync(vk::Result),

    #[error("failed to rebuild presentation surface: {0:#}")]
    Rebuild(anyhow::Error),

    #[error("recorded {recorded} command sequences for {images} swapchain images")]
    Invariant { recorded: usize, images: usize },
}

/// Map the result of `vkAcquireNextImageKHR`
pub fn classify_acquire(result: VkResult<(u32, bool)>) -> Result<Status<u32>, FrameError> {
    match result {
        Ok((index, false)) => Ok(Status::Success(index)),
        Ok((index, true)) => Ok(Status::Suboptimal(index)),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Status::OutOfDate),
        Err(e) => Err(FrameError::Acquire(e)),
    }
}

/// Map the result of `vkQueuePresentKHR`
pub fn classify_present(result: VkResult<bool>) -> Result<Status<()>, FrameError> {
    match result {
        Ok(false) => Ok(Status::Success(())),
        Ok(true) => Ok(Status::Suboptimal(())),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Status::OutOfDate),
        Err(e) => Err(FrameError::Present(e)),
    }
}
