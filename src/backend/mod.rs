// Backend module - Vulkan abstraction layer
//
// Thin wrappers around ash. GPU memory goes through gpu-allocator, and the
// presentation side is exposed to the frame loop as a `PresentTarget`.

pub mod buffer;
pub mod device;
pub mod pipeline;
pub mod renderer;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod texture;

pub use device::VulkanDevice;
pub use renderer::VulkanRenderer;
