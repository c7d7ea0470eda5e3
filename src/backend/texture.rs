// Textures, image views and depth resources

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::buffer::{create_staging_buffer, submit_one_shot, GpuImage};
use super::VulkanDevice;
use crate::assets::TextureData;

/// Depth formats in order of preference
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

pub fn find_depth_format(device: &VulkanDevice) -> Result<vk::Format> {
    device
        .find_supported_format(
            &DEPTH_FORMAT_CANDIDATES,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        )
        .context("No supported depth format")
}

pub fn create_image_view(
    device: &VulkanDevice,
    image: vk::Image,
    format: vk::Format,
    aspect_mask: vk::ImageAspectFlags,
) -> Result<vk::ImageView> {
    let create_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::IDENTITY,
        })
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        });

    unsafe {
        device
            .device
            .create_image_view(&create_info, None)
            .context("Failed to create image view")
    }
}

/// Sampled RGBA texture with its view and sampler
pub struct Texture {
    pub image: GpuImage,
    pub view: vk::ImageView,
    pub sampler: vk::Sampler,
    device: Arc<VulkanDevice>,
}

impl Texture {
    /// Upload decoded pixels and leave the image ready for fragment sampling
    pub fn upload(device: &Arc<VulkanDevice>, data: &TextureData) -> Result<Self> {
        let extent = vk::Extent2D {
            width: data.width,
            height: data.height,
        };
        let format = vk::Format::R8G8B8A8_SRGB;

        let staging = create_staging_buffer(
            device,
            "texture staging",
            device.families.graphics,
            &data.pixels,
        )?;
        let image = GpuImage::new(
            device,
            "texture",
            extent,
            format,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
        )?;

        // Layout transitions need the graphics queue's shader stages
        submit_one_shot(
            device,
            device.families.graphics,
            device.graphics_queue,
            |d, command_buffer| unsafe {
                transition_layout(
                    d,
                    command_buffer,
                    image.image,
                    vk::ImageLayout::UNDEFINED,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                );

                let region = vk::BufferImageCopy::builder()
                    .buffer_offset(0)
                    .buffer_row_length(0)
                    .buffer_image_height(0)
                    .image_subresource(vk::ImageSubresourceLayers {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        mip_level: 0,
                        base_array_layer: 0,
                        layer_count: 1,
                    })
                    .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
                    .image_extent(vk::Extent3D {
                        width: extent.width,
                        height: extent.height,
                        depth: 1,
                    })
                    .build();
                d.cmd_copy_buffer_to_image(
                    command_buffer,
                    staging.buffer,
                    image.image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                );

                transition_layout(
                    d,
                    command_buffer,
                    image.image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                );
            },
        )
        .context("Failed to upload texture")?;

        let view = create_image_view(device, image.image, format, vk::ImageAspectFlags::COLOR)?;
        let sampler = match create_sampler(device) {
            Ok(sampler) => sampler,
            Err(e) => {
                unsafe { device.device.destroy_image_view(view, None) };
                return Err(e);
            }
        };

        log::info!(
            "Texture uploaded: {}x{} ({} bytes)",
            extent.width,
            extent.height,
            data.size_bytes()
        );

        Ok(Self {
            image,
            view,
            sampler,
            device: Arc::clone(device),
        })
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_sampler(self.sampler, None);
            self.device.device.destroy_image_view(self.view, None);
        }
    }
}

fn create_sampler(device: &VulkanDevice) -> Result<vk::Sampler> {
    let sampler_info = vk::SamplerCreateInfo::builder()
        .mag_filter(vk::Filter::LINEAR)
        .min_filter(vk::Filter::LINEAR)
        .address_mode_u(vk::SamplerAddressMode::REPEAT)
        .address_mode_v(vk::SamplerAddressMode::REPEAT)
        .address_mode_w(vk::SamplerAddressMode::REPEAT)
        .anisotropy_enable(true)
        .max_anisotropy(device.properties.limits.max_sampler_anisotropy)
        .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
        .unnormalized_coordinates(false)
        .compare_enable(false)
        .compare_op(vk::CompareOp::ALWAYS)
        .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
        .mip_lod_bias(0.0)
        .min_lod(0.0)
        .max_lod(0.0);

    unsafe {
        device
            .device
            .create_sampler(&sampler_info, None)
            .context("Failed to create texture sampler")
    }
}

/// Access masks and stages for the two transitions a texture goes through
fn transition_masks(
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> (
    vk::AccessFlags,
    vk::AccessFlags,
    vk::PipelineStageFlags,
    vk::PipelineStageFlags,
) {
    match (old_layout, new_layout) {
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => (
            vk::AccessFlags::empty(),
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::TRANSFER,
        ),
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => (
            vk::AccessFlags::TRANSFER_WRITE,
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
        ),
        _ => (
            vk::AccessFlags::MEMORY_WRITE,
            vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
            vk::PipelineStageFlags::ALL_COMMANDS,
            vk::PipelineStageFlags::ALL_COMMANDS,
        ),
    }
}

unsafe fn transition_layout(
    device: &ash::Device,
    command_buffer: vk::CommandBuffer,
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) {
    let (src_access, dst_access, src_stage, dst_stage) = transition_masks(old_layout, new_layout);

    let barrier = vk::ImageMemoryBarrier::builder()
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        })
        .src_access_mask(src_access)
        .dst_access_mask(dst_access)
        .build();

    device.cmd_pipeline_barrier(
        command_buffer,
        src_stage,
        dst_stage,
        vk::DependencyFlags::empty(),
        &[],
        &[],
        &[barrier],
    );
}

/// Depth attachment shared by every framebuffer
pub struct DepthBuffer {
    pub image: GpuImage,
    pub view: vk::ImageView,
    device: Arc<VulkanDevice>,
}

impl DepthBuffer {
    pub fn new(device: &Arc<VulkanDevice>, extent: vk::Extent2D, format: vk::Format) -> Result<Self> {
        let image = GpuImage::new(
            device,
            "depth",
            extent,
            format,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        )?;
        // The render pass takes it from UNDEFINED, no explicit transition needed
        let view = create_image_view(device, image.image, format, vk::ImageAspectFlags::DEPTH)?;

        Ok(Self {
            image,
            view,
            device: Arc::clone(device),
        })
    }
}

impl Drop for DepthBuffer {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_image_view(self.view, None) };
    }
}
