// Frames-in-flight ring
//
// Each slot owns one synchronization pair plus a fence. A slot may only be
// reused after its fence signals, which replaces a global idle wait per frame.
// Swapchain images can come back in any order, so the ring also remembers
// which slot last rendered each image.

/// Slot rotation and swapchain image ownership
#[derive(Debug, Clone)]
pub struct FrameRing {
    slots: usize,
    current: usize,
    image_owner: Vec<Option<usize>>,
}

impl FrameRing {
    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            slots: frames_in_flight.max(1),
            current: 0,
            image_owner: Vec::new(),
        }
    }

    pub fn frames_in_flight(&self) -> usize {
        self.slots
    }

    /// Slot used by the frame being built
    pub fn slot(&self) -> usize {
        self.current
    }

    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.slots;
    }

    /// Record that `slot` now renders `image`.
    ///
    /// Returns the previous owner if it's another slot whose work may still
    /// reference the image's resources.
    pub fn claim(&mut self, image: u32, slot: usize) -> Option<usize> {
        let index = image as usize;
        if index >= self.image_owner.len() {
            self.image_owner.resize(index + 1, None);
        }
        let previous = self.image_owner[index].replace(slot);
        previous.filter(|&owner| owner != slot)
    }

    /// Forget ownership after the swapchain was rebuilt
    pub fn reset_images(&mut self, image_count: usize) {
        self.image_owner.clear();
        self.image_owner.resize(image_count, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_wrap_around() {
        let mut ring = FrameRing::new(3);
        let visited: Vec<_> = (0..7)
            .map(|_| {
                let slot = ring.slot();
                ring.advance();
                slot
            })
            .collect();
        assert_eq!(visited, vec![0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn zero_slots_behaves_as_one() {
        let mut ring = FrameRing::new(0);
        assert_eq!(ring.frames_in_flight(), 1);
        ring.advance();
        assert_eq!(ring.slot(), 0);
    }

    #[test]
    fn claim_reports_foreign_owner_only() {
        let mut ring = FrameRing::new(2);
        ring.reset_images(3);

        assert_eq!(ring.claim(1, 0), None);
        // Same slot coming back to its own image needs no extra wait
        assert_eq!(ring.claim(1, 0), None);
        assert_eq!(ring.claim(1, 1), Some(0));
        assert_eq!(ring.claim(2, 1), None);
    }

    #[test]
    fn reset_forgets_owners() {
        let mut ring = FrameRing::new(2);
        ring.reset_images(2);
        ring.claim(0, 1);
        ring.reset_images(4);
        assert_eq!(ring.image_owner.len(), 4);
        assert_eq!(ring.claim(0, 0), None);
    }
}
