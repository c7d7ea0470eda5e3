// =============================================================================
// SURFACE STATE - everything sized after the swapchain
// =============================================================================
//
// The objects below are torn down and rebuilt whenever the window surface
// goes stale. Each `SurfaceGroup` builds from the groups it depends on, and
// `SURFACE_GROUPS` is the single place that dependency graph is written down.
//
// =============================================================================

use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

use super::buffer::GpuBuffer;
use super::pipeline;
use super::renderer::UniformBufferObject;
use super::swapchain::Swapchain;
use super::texture::{create_image_view, DepthBuffer};
use super::VulkanDevice;
use crate::frame::{GroupSet, SurfaceSize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceGroup {
    Swapchain,
    ImageViews,
    RenderPass,
    PipelineLayout,
    Pipeline,
    DepthResources,
    Framebuffers,
    UniformBuffers,
    DescriptorSets,
    CommandBuffers,
}

pub const SURFACE_GROUPS: &[(SurfaceGroup, &[SurfaceGroup])] = &[
    (SurfaceGroup::Swapchain, &[]),
    (SurfaceGroup::ImageViews, &[SurfaceGroup::Swapchain]),
    (SurfaceGroup::RenderPass, &[SurfaceGroup::Swapchain]),
    (SurfaceGroup::PipelineLayout, &[]),
    (
        SurfaceGroup::Pipeline,
        &[SurfaceGroup::RenderPass, SurfaceGroup::PipelineLayout],
    ),
    (SurfaceGroup::DepthResources, &[SurfaceGroup::Swapchain]),
    (
        SurfaceGroup::Framebuffers,
        &[
            SurfaceGroup::ImageViews,
            SurfaceGroup::DepthResources,
            SurfaceGroup::RenderPass,
        ],
    ),
    (SurfaceGroup::UniformBuffers, &[SurfaceGroup::Swapchain]),
    (SurfaceGroup::DescriptorSets, &[SurfaceGroup::UniformBuffers]),
    (
        SurfaceGroup::CommandBuffers,
        &[
            SurfaceGroup::Framebuffers,
            SurfaceGroup::Pipeline,
            SurfaceGroup::DescriptorSets,
        ],
    ),
];

/// Long-lived objects the surface groups read but never own
#[derive(Debug, Clone, Copy)]
pub struct SceneRefs {
    pub set_layout: vk::DescriptorSetLayout,
    pub vert_shader: vk::ShaderModule,
    pub frag_shader: vk::ShaderModule,
    pub texture_view: vk::ImageView,
    pub sampler: vk::Sampler,
    pub vertex_buffer: vk::Buffer,
    pub index_buffer: vk::Buffer,
    pub index_count: u32,
    pub command_pool: vk::CommandPool,
    pub depth_format: vk::Format,
    pub present_mode: vk::PresentModeKHR,
    pub clear_color: [f32; 4],
}

impl Default for SceneRefs {
    fn default() -> Self {
        Self {
            set_layout: vk::DescriptorSetLayout::null(),
            vert_shader: vk::ShaderModule::null(),
            frag_shader: vk::ShaderModule::null(),
            texture_view: vk::ImageView::null(),
            sampler: vk::Sampler::null(),
            vertex_buffer: vk::Buffer::null(),
            index_buffer: vk::Buffer::null(),
            index_count: 0,
            command_pool: vk::CommandPool::null(),
            depth_format: vk::Format::UNDEFINED,
            present_mode: vk::PresentModeKHR::FIFO,
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

/// Size-dependent presentation objects, built group by group
pub struct SurfaceState {
    pub size: SurfaceSize,
    pub scene: SceneRefs,

    pub swapchain: Option<Swapchain>,
    pub image_views: Vec<vk::ImageView>,
    pub render_pass: vk::RenderPass,
    pub pipeline_layout: vk::PipelineLayout,
    pub pipeline: vk::Pipeline,
    pub depth: Option<DepthBuffer>,
    pub framebuffers: Vec<vk::Framebuffer>,
    pub uniform_buffers: Vec<GpuBuffer>,
    pub descriptor_pool: vk::DescriptorPool,
    pub descriptor_sets: Vec<vk::DescriptorSet>,
    pub command_buffers: Vec<vk::CommandBuffer>,

    device: Arc<VulkanDevice>,
}

impl SurfaceState {
    /// Empty state; nothing exists until the groups are built
    pub fn new(device: Arc<VulkanDevice>, size: SurfaceSize) -> Self {
        Self {
            size,
            scene: SceneRefs::default(),
            swapchain: None,
            image_views: Vec::new(),
            render_pass: vk::RenderPass::null(),
            pipeline_layout: vk::PipelineLayout::null(),
            pipeline: vk::Pipeline::null(),
            depth: None,
            framebuffers: Vec::new(),
            uniform_buffers: Vec::new(),
            descriptor_pool: vk::DescriptorPool::null(),
            descriptor_sets: Vec::new(),
            command_buffers: Vec::new(),
            device,
        }
    }

    pub fn image_count(&self) -> usize {
        self.swapchain.as_ref().map_or(0, Swapchain::image_count)
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.as_ref().map_or(
            vk::Extent2D {
                width: self.size.width,
                height: self.size.height,
            },
            |s| s.extent,
        )
    }

    fn swapchain(&self) -> Result<&Swapchain> {
        self.swapchain.as_ref().context("Swapchain has not been built")
    }

    fn build_image_views(&mut self) -> Result<()> {
        let swapchain = self.swapchain()?;
        let (images, format) = (swapchain.images.clone(), swapchain.format);

        for image in images {
            let view = create_image_view(&self.device, image, format, vk::ImageAspectFlags::COLOR)?;
            self.image_views.push(view);
        }
        Ok(())
    }

    fn build_render_pass(&mut self) -> Result<()> {
        let format = self.swapchain()?.format;
        self.render_pass =
            pipeline::create_render_pass(&self.device, format, self.scene.depth_format)?;
        Ok(())
    }

    fn build_pipeline(&mut self) -> Result<()> {
        self.pipeline = pipeline::create_graphics_pipeline(
            &self.device,
            self.render_pass,
            self.pipeline_layout,
            self.extent(),
            self.scene.vert_shader,
            self.scene.frag_shader,
        )?;
        Ok(())
    }

    fn build_depth(&mut self) -> Result<()> {
        let extent = self.swapchain()?.extent;
        self.depth = Some(DepthBuffer::new(
            &self.device,
            extent,
            self.scene.depth_format,
        )?);
        Ok(())
    }

    fn build_framebuffers(&mut self) -> Result<()> {
        let depth_view = self.depth.as_ref().context("Depth buffer has not been built")?.view;
        self.framebuffers = pipeline::create_framebuffers(
            &self.device,
            &self.image_views,
            depth_view,
            self.render_pass,
            self.extent(),
        )?;
        Ok(())
    }

    fn build_uniform_buffers(&mut self) -> Result<()> {
        let size = std::mem::size_of::<UniformBufferObject>() as vk::DeviceSize;
        for i in 0..self.image_count() {
            let buffer = GpuBuffer::new(
                &self.device,
                &format!("uniform buffer {}", i),
                size,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                MemoryLocation::CpuToGpu,
                &[self.device.families.graphics],
            )?;
            self.uniform_buffers.push(buffer);
        }
        Ok(())
    }

    fn build_descriptor_sets(&mut self) -> Result<()> {
        let count = self.uniform_buffers.len() as u32;
        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: count,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: count,
            },
        ];
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(&pool_sizes)
            .max_sets(count);
        self.descriptor_pool = unsafe { self.device.device.create_descriptor_pool(&pool_info, None) }
            .context("Failed to create descriptor pool")?;

        let layouts = vec![self.scene.set_layout; count as usize];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.descriptor_pool)
            .set_layouts(&layouts);
        self.descriptor_sets = unsafe { self.device.device.allocate_descriptor_sets(&alloc_info) }
            .context("Failed to allocate descriptor sets")?;

        for (set, uniform) in self.descriptor_sets.iter().zip(&self.uniform_buffers) {
            let buffer_info = [vk::DescriptorBufferInfo {
                buffer: uniform.buffer,
                offset: 0,
                range: uniform.size,
            }];
            let image_info = [vk::DescriptorImageInfo {
                sampler: self.scene.sampler,
                image_view: self.scene.texture_view,
                image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            }];

            let writes = [
                vk::WriteDescriptorSet::builder()
                    .dst_set(*set)
                    .dst_binding(0)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .buffer_info(&buffer_info)
                    .build(),
                vk::WriteDescriptorSet::builder()
                    .dst_set(*set)
                    .dst_binding(1)
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .image_info(&image_info)
                    .build(),
            ];
            unsafe { self.device.device.update_descriptor_sets(&writes, &[]) };
        }
        Ok(())
    }

    fn build_command_buffers(&mut self) -> Result<()> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.scene.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(self.framebuffers.len() as u32);
        self.command_buffers = unsafe { self.device.device.allocate_command_buffers(&alloc_info) }
            .context("Failed to allocate command buffers")?;

        for i in 0..self.command_buffers.len() {
            self.record(i)
                .with_context(|| format!("Failed to record command buffer {}", i))?;
        }
        log::debug!("Recorded {} command buffers", self.command_buffers.len());
        Ok(())
    }

    /// Record the whole frame for swapchain image `i` once
    fn record(&self, i: usize) -> Result<()> {
        let device = &self.device.device;
        let command_buffer = self.command_buffers[i];
        let scene = &self.scene;

        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: scene.clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];
        let render_pass_info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.render_pass)
            .framebuffer(self.framebuffers[i])
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: self.extent(),
            })
            .clear_values(&clear_values);

        unsafe {
            device.begin_command_buffer(command_buffer, &vk::CommandBufferBeginInfo::builder())?;
            device.cmd_begin_render_pass(
                command_buffer,
                &render_pass_info,
                vk::SubpassContents::INLINE,
            );
            device.cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::GRAPHICS, self.pipeline);
            device.cmd_bind_vertex_buffers(command_buffer, 0, &[scene.vertex_buffer], &[0]);
            device.cmd_bind_index_buffer(command_buffer, scene.index_buffer, 0, vk::IndexType::UINT32);
            device.cmd_bind_descriptor_sets(
                command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline_layout,
                0,
                &[self.descriptor_sets[i]],
                &[],
            );
            device.cmd_draw_indexed(command_buffer, scene.index_count, 1, 0, 0, 0);
            device.cmd_end_render_pass(command_buffer);
            device.end_command_buffer(command_buffer)?;
        }
        Ok(())
    }
}

impl GroupSet for SurfaceState {
    type Group = SurfaceGroup;

    fn build(&mut self, group: SurfaceGroup) -> Result<()> {
        let result = match group {
            SurfaceGroup::Swapchain => {
                Swapchain::new(Arc::clone(&self.device), self.size, self.scene.present_mode)
                    .map(|swapchain| self.swapchain = Some(swapchain))
            }
            SurfaceGroup::ImageViews => self.build_image_views(),
            SurfaceGroup::RenderPass => self.build_render_pass(),
            SurfaceGroup::PipelineLayout => {
                pipeline::create_pipeline_layout(&self.device, self.scene.set_layout)
                    .map(|layout| self.pipeline_layout = layout)
            }
            SurfaceGroup::Pipeline => self.build_pipeline(),
            SurfaceGroup::DepthResources => self.build_depth(),
            SurfaceGroup::Framebuffers => self.build_framebuffers(),
            SurfaceGroup::UniformBuffers => self.build_uniform_buffers(),
            SurfaceGroup::DescriptorSets => self.build_descriptor_sets(),
            SurfaceGroup::CommandBuffers => self.build_command_buffers(),
        };

        // A group that fails halfway cleans up its own pieces
        if result.is_err() {
            self.destroy(group);
        }
        result
    }

    fn destroy(&mut self, group: SurfaceGroup) {
        let device = &self.device.device;
        unsafe {
            match group {
                SurfaceGroup::Swapchain => self.swapchain = None,
                SurfaceGroup::ImageViews => {
                    for view in self.image_views.drain(..) {
                        device.destroy_image_view(view, None);
                    }
                }
                SurfaceGroup::RenderPass => {
                    device.destroy_render_pass(self.render_pass, None);
                    self.render_pass = vk::RenderPass::null();
                }
                SurfaceGroup::PipelineLayout => {
                    device.destroy_pipeline_layout(self.pipeline_layout, None);
                    self.pipeline_layout = vk::PipelineLayout::null();
                }
                SurfaceGroup::Pipeline => {
                    device.destroy_pipeline(self.pipeline, None);
                    self.pipeline = vk::Pipeline::null();
                }
                SurfaceGroup::DepthResources => self.depth = None,
                SurfaceGroup::Framebuffers => {
                    for framebuffer in self.framebuffers.drain(..) {
                        device.destroy_framebuffer(framebuffer, None);
                    }
                }
                SurfaceGroup::UniformBuffers => self.uniform_buffers.clear(),
                SurfaceGroup::DescriptorSets => {
                    // Sets go back to the pool with it
                    device.destroy_descriptor_pool(self.descriptor_pool, None);
                    self.descriptor_pool = vk::DescriptorPool::null();
                    self.descriptor_sets.clear();
                }
                SurfaceGroup::CommandBuffers => {
                    if !self.command_buffers.is_empty() {
                        device.free_command_buffers(self.scene.command_pool, &self.command_buffers);
                        self.command_buffers.clear();
                    }
                }
            }
        }
    }
}
