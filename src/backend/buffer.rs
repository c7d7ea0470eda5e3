// GPU memory - buffers and images backed by gpu-allocator
//
// Both wrappers free their allocation on drop, so a failed setup step never
// leaks memory. Uploads go through a host-visible staging buffer and a
// one-shot command buffer.

use anyhow::{Context, Result};
use ash::vk;
use bytemuck::Pod;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

use super::VulkanDevice;

pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub size: vk::DeviceSize,
    allocation: Option<Allocation>,
    device: Arc<VulkanDevice>,
}

impl GpuBuffer {
    /// Create a buffer and bind fresh memory to it.
    ///
    /// `families` lists the queue families that touch the buffer. More than
    /// one distinct family switches the buffer to concurrent sharing.
    pub fn new(
        device: &Arc<VulkanDevice>,
        name: &str,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        families: &[u32],
    ) -> Result<Self> {
        let mut unique = families.to_vec();
        unique.sort_unstable();
        unique.dedup();

        let buffer_info = vk::BufferCreateInfo::builder().size(size).usage(usage);
        let buffer_info = if unique.len() > 1 {
            buffer_info
                .sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&unique)
        } else {
            buffer_info.sharing_mode(vk::SharingMode::EXCLUSIVE)
        };

        let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }
            .with_context(|| format!("Failed to create buffer {}", name))?;

        // From here on Drop cleans up whatever exists
        let mut this = Self {
            buffer,
            size,
            allocation: None,
            device: Arc::clone(device),
        };

        let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };
        let allocation = device
            .allocator
            .lock()
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .with_context(|| format!("Failed to allocate memory for buffer {}", name))?;

        unsafe {
            device
                .device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        }
        .with_context(|| format!("Failed to bind memory for buffer {}", name))?;
        this.allocation = Some(allocation);

        Ok(this)
    }

    /// Copy `data` to the start of a host-visible buffer
    pub fn write<T: Pod>(&mut self, data: &[T]) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let mapped = self
            .allocation
            .as_mut()
            .and_then(|a| a.mapped_slice_mut())
            .context("Buffer is not host visible")?;

        let target = mapped
            .get_mut(..bytes.len())
            .with_context(|| format!("{} bytes do not fit in buffer of {}", bytes.len(), self.size))?;
        target.copy_from_slice(bytes);
        Ok(())
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_buffer(self.buffer, None) };
        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = self.device.allocator.lock().free(allocation) {
                log::error!("Failed to free buffer memory: {}", e);
            }
        }
    }
}

/// 2D image in device-local memory
pub struct GpuImage {
    pub image: vk::Image,
    allocation: Option<Allocation>,
    device: Arc<VulkanDevice>,
}

impl GpuImage {
    pub fn new(
        device: &Arc<VulkanDevice>,
        name: &str,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
    ) -> Result<Self> {
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(usage)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let image = unsafe { device.device.create_image(&image_info, None) }
            .with_context(|| format!("Failed to create image {}", name))?;

        let mut this = Self {
            image,
            allocation: None,
            device: Arc::clone(device),
        };

        let requirements = unsafe { device.device.get_image_memory_requirements(image) };
        let allocation = device
            .allocator
            .lock()
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .with_context(|| format!("Failed to allocate memory for image {}", name))?;

        unsafe {
            device
                .device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        }
        .with_context(|| format!("Failed to bind memory for image {}", name))?;
        this.allocation = Some(allocation);

        Ok(this)
    }
}

impl Drop for GpuImage {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_image(self.image, None) };
        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = self.device.allocator.lock().free(allocation) {
                log::error!("Failed to free image memory: {}", e);
            }
        }
    }
}

/// Record commands into a throwaway command buffer and wait for them.
///
/// Only used at setup time, so blocking on the queue is fine.
pub fn submit_one_shot<F>(device: &VulkanDevice, family: u32, queue: vk::Queue, record: F) -> Result<()>
where
    F: FnOnce(&ash::Device, vk::CommandBuffer),
{
    let pool_info = vk::CommandPoolCreateInfo::builder()
        .queue_family_index(family)
        .flags(vk::CommandPoolCreateFlags::TRANSIENT);
    let pool = unsafe { device.device.create_command_pool(&pool_info, None) }
        .context("Failed to create one-shot command pool")?;

    // Destroying the pool frees the command buffer with it
    let result = (|| -> Result<()> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffer = unsafe { device.device.allocate_command_buffers(&alloc_info) }?
            .into_iter()
            .next()
            .context("Driver returned no command buffer")?;

        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe {
            device
                .device
                .begin_command_buffer(command_buffer, &begin_info)?;
            record(&device.device, command_buffer);
            device.device.end_command_buffer(command_buffer)?;

            let command_buffers = [command_buffer];
            let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);
            device
                .device
                .queue_submit(queue, &[submit_info.build()], vk::Fence::null())?;
            device.device.queue_wait_idle(queue)?;
        }
        Ok(())
    })();

    unsafe { device.device.destroy_command_pool(pool, None) };
    result.context("One-shot command submission failed")
}

/// Host-visible buffer pre-filled with `data`, read by queue `family`
pub fn create_staging_buffer<T: Pod>(
    device: &Arc<VulkanDevice>,
    name: &str,
    family: u32,
    data: &[T],
) -> Result<GpuBuffer> {
    let size = std::mem::size_of_val(data) as vk::DeviceSize;
    let mut staging = GpuBuffer::new(
        device,
        name,
        size,
        vk::BufferUsageFlags::TRANSFER_SRC,
        MemoryLocation::CpuToGpu,
        &[family],
    )?;
    staging.write(data)?;
    Ok(staging)
}

/// Device-local buffer filled through the transfer queue.
///
/// The buffer is shared with the graphics family so no ownership transfer
/// is needed before drawing from it.
pub fn upload_device_local<T: Pod>(
    device: &Arc<VulkanDevice>,
    name: &str,
    usage: vk::BufferUsageFlags,
    data: &[T],
) -> Result<GpuBuffer> {
    let staging = create_staging_buffer(
        device,
        &format!("{} staging", name),
        device.families.transfer,
        data,
    )?;

    let buffer = GpuBuffer::new(
        device,
        name,
        staging.size,
        usage | vk::BufferUsageFlags::TRANSFER_DST,
        MemoryLocation::GpuOnly,
        &[device.families.graphics, device.families.transfer],
    )?;

    submit_one_shot(
        device,
        device.families.transfer,
        device.transfer_queue,
        |d, command_buffer| {
            let region = vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size: staging.size,
            };
            unsafe { d.cmd_copy_buffer(command_buffer, staging.buffer, buffer.buffer, &[region]) };
        },
    )?;

    log::debug!("Uploaded {} ({} bytes)", name, buffer.size);
    Ok(buffer)
}
