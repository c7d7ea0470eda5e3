// =============================================================================
// FRAME PRESENTATION LOOP
// =============================================================================
//
// One `tick` renders one frame:
//
//   Idle -> Acquiring -> Submitting -> Presenting -> Idle
//     \________________________________________________\
//                     any stale state -> Recreating -> Idle
//
// Staleness comes from resize events and from acquire/present results.
// Zero-area surfaces (minimized windows) defer both rendering and
// recreation until the window and the surface report a real size again.
//
// =============================================================================

use super::{FrameError, FrameRing, PresentTarget, Status, SurfaceSize};

/// Where the loop is inside the current iteration. After a fatal error it
/// names the step that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Acquiring,
    Submitting,
    Presenting,
    Recreating,
}

/// What a single `tick` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// A frame was submitted and queued for presentation
    Presented { image: u32 },
    /// The surface was out of date; it was rebuilt and nothing was submitted
    Skipped,
    /// The surface has zero area; nothing was submitted
    Deferred,
}

pub struct FrameLoop<T: PresentTarget> {
    target: T,
    ring: FrameRing,
    size: SurfaceSize,
    stale: bool,
    phase: Phase,
    recreations: u64,
    frames_presented: u64,
}

impl<T: PresentTarget> FrameLoop<T> {
    /// Wrap a target that's already built for `size`
    pub fn new(target: T, size: SurfaceSize, frames_in_flight: usize) -> Self {
        let mut ring = FrameRing::new(frames_in_flight);
        ring.reset_images(target.image_count());

        Self {
            target,
            ring,
            size,
            stale: false,
            phase: Phase::Idle,
            recreations: 0,
            frames_presented: 0,
        }
    }

    /// Window framebuffer changed size
    pub fn resize(&mut self, size: SurfaceSize) {
        self.size = size;
        if size.is_empty() {
            log::debug!("Surface is zero-area, deferring frames");
        } else {
            self.stale = true;
        }
    }

    /// Render one frame
    pub fn tick(&mut self) -> Result<FrameOutcome, FrameError> {
        if self.size.is_empty() {
            return Ok(FrameOutcome::Deferred);
        }

        if self.stale && !self.recreate()? {
            return Ok(FrameOutcome::Deferred);
        }

        let slot = self.ring.slot();

        // ─────────────────────────────────────────────────────────────────────
        // ACQUIRE
        // ─────────────────────────────────────────────────────────────────────
        self.phase = Phase::Acquiring;
        // The slot's semaphores are free again once its last submission retired
        self.target.wait_slot(slot)?;

        let image = match self.target.acquire(slot)? {
            Status::Success(image) => image,
            Status::Suboptimal(image) => {
                log::debug!("Acquired image {} from a suboptimal swapchain", image);
                self.stale = true;
                image
            }
            Status::OutOfDate => {
                log::debug!("Swapchain out of date on acquire");
                self.stale = true;
                self.phase = Phase::Idle;
                return Ok(if self.recreate()? {
                    FrameOutcome::Skipped
                } else {
                    FrameOutcome::Deferred
                });
            }
        };

        if let Some(owner) = self.ring.claim(image, slot) {
            self.target.wait_slot(owner)?;
        }
        self.target.prepare(image)?;

        // ─────────────────────────────────────────────────────────────────────
        // SUBMIT
        // ─────────────────────────────────────────────────────────────────────
        self.phase = Phase::Submitting;
        self.target.submit(slot, image)?;

        // ─────────────────────────────────────────────────────────────────────
        // PRESENT
        // ─────────────────────────────────────────────────────────────────────
        self.phase = Phase::Presenting;
        let presented = self.target.present(slot, image)?;
        if let Some(staleness) = presented.staleness() {
            log::debug!("Present reported {:?}", staleness);
            self.stale = true;
        }

        self.frames_presented += 1;
        self.ring.advance();
        self.phase = Phase::Idle;

        if self.stale {
            self.recreate()?;
        }

        Ok(FrameOutcome::Presented { image })
    }

    /// Rebuild the surface state for the current size.
    ///
    /// Returns `false` when deferred because the window or the surface has
    /// zero area; the loop stays stale and retries on the next tick.
    pub fn recreate(&mut self) -> Result<bool, FrameError> {
        if self.size.is_empty() {
            return Ok(false);
        }

        self.phase = Phase::Recreating;
        log::info!(
            "Recreating swapchain for {}x{}",
            self.size.width,
            self.size.height
        );

        self.target.wait_idle()?;
        if !self.target.rebuild(self.size)? {
            log::debug!("Surface reports zero area, recreation deferred");
            self.phase = Phase::Idle;
            return Ok(false);
        }

        let images = self.target.image_count();
        let recorded = self.target.recorded_count();
        if recorded != images {
            return Err(FrameError::Invariant { recorded, images });
        }

        self.ring.reset_images(images);
        self.stale = false;
        self.recreations += 1;
        self.phase = Phase::Idle;
        log::info!("Swapchain rebuilt with {} images", images);

        Ok(true)
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn is_deferred(&self) -> bool {
        self.size.is_empty()
    }

    pub fn recreations(&self) -> u64 {
        self.recreations
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    pub fn frames_in_flight(&self) -> usize {
        self.ring.frames_in_flight()
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    #[cfg(test)]
    pub fn target_mut(&mut self) -> &mut T {
        &mut self.target
    }
}
