// Graphics pipeline creation and management
//
// The graphics pipeline defines how vertices are processed and rasterized.
// It includes: vertex input, shaders, rasterization, depth/stencil, blending.

use anyhow::{Context, Result};
use ash::vk;
use std::mem::{offset_of, size_of};

use super::VulkanDevice;
use crate::assets::Vertex;

/// Create a render pass with one color and one depth attachment
pub fn create_render_pass(
    device: &VulkanDevice,
    color_format: vk::Format,
    depth_format: vk::Format,
) -> Result<vk::RenderPass> {
    // Color attachment (the swapchain image)
    let color_attachment = vk::AttachmentDescription::builder()
        .format(color_format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .build();

    // Depth attachment, never read back
    let depth_attachment = vk::AttachmentDescription::builder()
        .format(depth_format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::DONT_CARE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
        .build();

    let color_attachment_ref = vk::AttachmentReference::builder()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .build();

    let depth_attachment_ref = vk::AttachmentReference::builder()
        .attachment(1)
        .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
        .build();

    let color_attachments = &[color_attachment_ref];
    let subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(color_attachments)
        .depth_stencil_attachment(&depth_attachment_ref)
        .build();

    // Wait for the acquired image before writing color
    let dependency = vk::SubpassDependency::builder()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        )
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        )
        .dst_access_mask(
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        )
        .build();

    let attachments = &[color_attachment, depth_attachment];
    let subpasses = &[subpass];
    let dependencies = &[dependency];

    let render_pass_info = vk::RenderPassCreateInfo::builder()
        .attachments(attachments)
        .subpasses(subpasses)
        .dependencies(dependencies);

    unsafe {
        device
            .device
            .create_render_pass(&render_pass_info, None)
            .context("Failed to create render pass")
    }
}

/// Uniform buffer for the vertex stage, texture sampler for the fragment stage
pub fn create_descriptor_set_layout(device: &VulkanDevice) -> Result<vk::DescriptorSetLayout> {
    let bindings = [
        vk::DescriptorSetLayoutBinding::builder()
            .binding(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::VERTEX)
            .build(),
        vk::DescriptorSetLayoutBinding::builder()
            .binding(1)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::FRAGMENT)
            .build(),
    ];

    let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);

    unsafe {
        device
            .device
            .create_descriptor_set_layout(&layout_info, None)
            .context("Failed to create descriptor set layout")
    }
}

pub fn create_pipeline_layout(
    device: &VulkanDevice,
    set_layout: vk::DescriptorSetLayout,
) -> Result<vk::PipelineLayout> {
    let set_layouts = [set_layout];
    let layout_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(&set_layouts);

    unsafe {
        device
            .device
            .create_pipeline_layout(&layout_info, None)
            .context("Failed to create pipeline layout")
    }
}

/// Wrap SPIR-V words in a shader module
pub fn create_shader_module(device: &VulkanDevice, code: &[u32]) -> Result<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::builder().code(code);

    unsafe {
        device
            .device
            .create_shader_module(&create_info, None)
            .context("Failed to create shader module")
    }
}

/// Vertex input description matching `assets::Vertex`
pub fn vertex_input_description() -> (
    [vk::VertexInputBindingDescription; 1],
    [vk::VertexInputAttributeDescription; 3],
) {
    let binding = vk::VertexInputBindingDescription::builder()
        .binding(0)
        .stride(size_of::<Vertex>() as u32)
        .input_rate(vk::VertexInputRate::VERTEX)
        .build();

    let attribute = |location: u32, format: vk::Format, offset: usize| {
        vk::VertexInputAttributeDescription::builder()
            .binding(0)
            .location(location)
            .format(format)
            .offset(offset as u32)
            .build()
    };

    (
        [binding],
        [
            attribute(0, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, pos)),
            attribute(1, vk::Format::R32G32B32_SFLOAT, offset_of!(Vertex, color)),
            attribute(2, vk::Format::R32G32_SFLOAT, offset_of!(Vertex, tex_coord)),
        ],
    )
}

/// Create the model pipeline with a fixed full-extent viewport
pub fn create_graphics_pipeline(
    device: &VulkanDevice,
    render_pass: vk::RenderPass,
    layout: vk::PipelineLayout,
    extent: vk::Extent2D,
    vert_shader: vk::ShaderModule,
    frag_shader: vk::ShaderModule,
) -> Result<vk::Pipeline> {
    let vert_stage = vk::PipelineShaderStageCreateInfo::builder()
        .stage(vk::ShaderStageFlags::VERTEX)
        .module(vert_shader)
        .name(c"main")
        .build();

    let frag_stage = vk::PipelineShaderStageCreateInfo::builder()
        .stage(vk::ShaderStageFlags::FRAGMENT)
        .module(frag_shader)
        .name(c"main")
        .build();

    let shader_stages = &[vert_stage, frag_stage];

    let (bindings, attributes) = vertex_input_description();
    let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder()
        .vertex_binding_descriptions(&bindings)
        .vertex_attribute_descriptions(&attributes);

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
        .primitive_restart_enable(false);

    let viewport = vk::Viewport::builder()
        .x(0.0)
        .y(0.0)
        .width(extent.width as f32)
        .height(extent.height as f32)
        .min_depth(0.0)
        .max_depth(1.0)
        .build();

    let scissor = vk::Rect2D::builder()
        .offset(vk::Offset2D { x: 0, y: 0 })
        .extent(extent)
        .build();

    let viewports = &[viewport];
    let scissors = &[scissor];
    let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
        .viewports(viewports)
        .scissors(scissors);

    // The projection flips Y, which turns the winding around
    let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(vk::CullModeFlags::BACK)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .depth_bias_enable(false);

    let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
        .sample_shading_enable(false)
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);

    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
        .depth_test_enable(true)
        .depth_write_enable(true)
        .depth_compare_op(vk::CompareOp::LESS)
        .depth_bounds_test_enable(false)
        .stencil_test_enable(false);

    // Opaque
    let color_blend_attachment = vk::PipelineColorBlendAttachmentState::builder()
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .blend_enable(false)
        .build();

    let color_blend_attachments = &[color_blend_attachment];
    let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
        .logic_op_enable(false)
        .attachments(color_blend_attachments);

    let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
        .stages(shader_stages)
        .vertex_input_state(&vertex_input_info)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterizer)
        .multisample_state(&multisampling)
        .depth_stencil_state(&depth_stencil)
        .color_blend_state(&color_blending)
        .layout(layout)
        .render_pass(render_pass)
        .subpass(0)
        .build();

    let pipelines = unsafe {
        device
            .device
            .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
            .map_err(|(_, e)| e)
            .context("Failed to create graphics pipeline")?
    };

    pipelines
        .into_iter()
        .next()
        .context("Driver returned no pipeline")
}

/// Create one framebuffer per swapchain image view, all sharing the depth view
pub fn create_framebuffers(
    device: &VulkanDevice,
    image_views: &[vk::ImageView],
    depth_image_view: vk::ImageView,
    render_pass: vk::RenderPass,
    extent: vk::Extent2D,
) -> Result<Vec<vk::Framebuffer>> {
    let mut framebuffers = Vec::with_capacity(image_views.len());

    for &image_view in image_views {
        let attachments = &[image_view, depth_image_view];
        let framebuffer_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        match unsafe { device.device.create_framebuffer(&framebuffer_info, None) } {
            Ok(framebuffer) => framebuffers.push(framebuffer),
            Err(e) => {
                for framebuffer in framebuffers {
                    unsafe { device.device.destroy_framebuffer(framebuffer, None) };
                }
                return Err(e).context("Failed to create framebuffer");
            }
        }
    }

    Ok(framebuffers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_layout_matches_shader_inputs() {
        let (bindings, attributes) = vertex_input_description();

        assert_eq!(bindings[0].stride, 32);
        assert_eq!(bindings[0].input_rate, vk::VertexInputRate::VERTEX);

        let layout: Vec<_> = attributes
            .iter()
            .map(|a| (a.location, a.format, a.offset))
            .collect();
        assert_eq!(
            layout,
            vec![
                (0, vk::Format::R32G32B32_SFLOAT, 0),
                (1, vk::Format::R32G32B32_SFLOAT, 12),
                (2, vk::Format::R32G32_SFLOAT, 24),
            ]
        );
    }
}
