// Swapchain - Window presentation
//
// Owns the chain of images we render to and present to the screen.
// Image views, framebuffers and everything else sized after the swapchain
// live in `SurfaceState` and are rebuilt with it.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::VulkanDevice;
use crate::frame::{classify_acquire, classify_present, FrameError, Status, SurfaceSize};

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    device: Arc<VulkanDevice>,
}

impl Swapchain {
    pub fn new(
        device: Arc<VulkanDevice>,
        size: SurfaceSize,
        preferred_mode: vk::PresentModeKHR,
    ) -> Result<Self> {
        log::info!("Creating swapchain: {}x{}", size.width, size.height);

        let surface_loader = &device.surface_loader;

        // Query surface capabilities
        let surface_caps = unsafe {
            surface_loader
                .get_physical_device_surface_capabilities(device.physical_device, device.surface)
        }?;

        // Query supported formats
        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(device.physical_device, device.surface)
        }?;

        // Query supported present modes
        let present_modes = unsafe {
            surface_loader
                .get_physical_device_surface_present_modes(device.physical_device, device.surface)
        }?;

        let surface_format = choose_surface_format(&formats).context("No suitable surface format")?;
        let present_mode = choose_present_mode(&present_modes, preferred_mode);
        log::info!("Present mode: {:?}", present_mode);

        let extent = choose_extent(&surface_caps, size).context("Surface has zero area")?;

        let mut image_count = surface_caps.min_image_count + 1;
        if surface_caps.max_image_count > 0 && image_count > surface_caps.max_image_count {
            image_count = surface_caps.max_image_count;
        }

        // Graphics and present on different families share images concurrently
        let families = [device.families.graphics, device.families.present];
        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(device.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(surface_caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);
        let create_info = if families[0] != families[1] {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&families)
        } else {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        };

        let swapchain = unsafe { device.swapchain_loader.create_swapchain(&create_info, None) }
            .context("Failed to create swapchain")?;

        let images = match unsafe { device.swapchain_loader.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { device.swapchain_loader.destroy_swapchain(swapchain, None) };
                return Err(e).context("Failed to query swapchain images");
            }
        };

        log::info!(
            "Created swapchain with {} images ({:?}, {}x{})",
            images.len(),
            surface_format.format,
            extent.width,
            extent.height
        );

        Ok(Self {
            swapchain,
            images,
            format: surface_format.format,
            extent,
            device,
        })
    }

    /// Extent a swapchain would get right now, `None` while the surface is
    /// zero-area
    pub fn surface_extent(device: &VulkanDevice, size: SurfaceSize) -> Result<Option<vk::Extent2D>> {
        let caps = unsafe {
            device
                .surface_loader
                .get_physical_device_surface_capabilities(device.physical_device, device.surface)
        }
        .context("Failed to query surface capabilities")?;
        Ok(choose_extent(&caps, size))
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Acquire next image for rendering
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> Result<Status<u32>, FrameError> {
        let result = unsafe {
            self.device.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };
        classify_acquire(result)
    }

    /// Present rendered image to screen
    pub fn present(
        &self,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> Result<Status<()>, FrameError> {
        let wait_semaphores = [wait_semaphore];
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe {
            self.device
                .swapchain_loader
                .queue_present(self.device.present_queue, &present_info)
        };
        classify_present(result)
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            self.device
                .swapchain_loader
                .destroy_swapchain(self.swapchain, None);
        }
    }
}

/// Prefer 8-bit sRGB, otherwise take whatever the surface lists first
fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
}

// FIFO is always supported
fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if available.contains(&preferred) {
        preferred
    } else {
        vk::PresentModeKHR::FIFO
    }
}

// Minimized windows can report a 0x0 current extent, which no swapchain accepts
fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, size: SurfaceSize) -> Option<vk::Extent2D> {
    let extent = if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: size
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: size
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    };
    (extent.width > 0 && extent.height > 0).then_some(extent)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    #[test]
    fn srgb_format_is_preferred() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(
            choose_surface_format(&formats).unwrap().format,
            vk::Format::B8G8R8A8_SRGB
        );
    }

    #[test]
    fn first_format_is_the_fallback() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(
            choose_surface_format(&formats).unwrap().format,
            vk::Format::R8G8B8A8_UNORM
        );
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn unsupported_present_mode_falls_back_to_fifo() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(
            choose_present_mode(&modes, vk::PresentModeKHR::IMMEDIATE),
            vk::PresentModeKHR::IMMEDIATE
        );
        assert_eq!(
            choose_present_mode(&modes, vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn extent_follows_surface_unless_undefined() {
        let mut caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 640,
                height: 480,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 1920,
                height: 1080,
            },
            ..Default::default()
        };
        let size = SurfaceSize::new(4000, 300);
        assert_eq!(choose_extent(&caps, size).unwrap().width, 640);

        caps.current_extent.width = u32::MAX;
        let extent = choose_extent(&caps, size).unwrap();
        assert_eq!((extent.width, extent.height), (1920, 300));
    }

    #[test]
    fn minimized_surface_has_no_extent() {
        let mut caps = vk::SurfaceCapabilitiesKHR {
            max_image_extent: vk::Extent2D {
                width: 1920,
                height: 1080,
            },
            ..Default::default()
        };

        // The window still thinks it is 800x600
        let size = SurfaceSize::new(800, 600);
        assert_eq!(choose_extent(&caps, size), None);

        caps.current_extent = vk::Extent2D {
            width: 800,
            height: 0,
        };
        assert_eq!(choose_extent(&caps, size), None);

        // Undefined current extent with a zero maximum clamps to zero
        caps.current_extent.width = u32::MAX;
        caps.max_image_extent.height = 0;
        assert_eq!(choose_extent(&caps, size), None);
    }
}
