// Synchronization primitives
//
// One semaphore pair and one fence per frame slot

use anyhow::Result;
use ash::vk;

use super::VulkanDevice;
use crate::frame::FrameError;

/// Frame synchronization - one per frame in flight
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
}

impl FrameSync {
    pub fn new(device: &VulkanDevice) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        // Start signaled so the first wait on each slot returns immediately
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        let mut sync = Self {
            image_available: vk::Semaphore::null(),
            render_finished: vk::Semaphore::null(),
            in_flight_fence: vk::Fence::null(),
        };
        let created = unsafe {
            (|| -> Result<()> {
                sync.image_available = device.device.create_semaphore(&semaphore_info, None)?;
                sync.render_finished = device.device.create_semaphore(&semaphore_info, None)?;
                sync.in_flight_fence = device.device.create_fence(&fence_info, None)?;
                Ok(())
            })()
        };

        match created {
            Ok(()) => Ok(sync),
            Err(e) => {
                sync.destroy(&device.device);
                Err(e)
            }
        }
    }

    /// Block until the slot's last submission has retired
    pub fn wait(&self, device: &ash::Device) -> Result<(), FrameError> {
        unsafe { device.wait_for_fences(&[self.in_flight_fence], true, u64::MAX) }
            .map_err(FrameError::Sync)
    }

    /// Unsignal the fence right before it's handed to a new submission
    pub fn reset(&self, device: &ash::Device) -> Result<(), FrameError> {
        unsafe { device.reset_fences(&[self.in_flight_fence]) }.map_err(FrameError::Sync)
    }

    // Null handles are ignored by the destroy calls
    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_fence(self.in_flight_fence, None);
        }
    }
}
