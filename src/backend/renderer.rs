// =============================================================================
// VULKAN RENDERER - static scene + presentation target
// =============================================================================
//
// Owns what lives for the whole run (mesh buffers, texture, shaders,
// descriptor layout, per-slot sync) and the rebuildable `SurfaceState`.
// The frame loop drives it through `PresentTarget`.
//
// =============================================================================

use anyhow::{Context, Result};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use std::sync::Arc;
use std::time::Instant;

use super::buffer::{upload_device_local, GpuBuffer};
use super::surface::{SceneRefs, SurfaceGroup, SurfaceState, SURFACE_GROUPS};
use super::swapchain::Swapchain;
use super::sync::FrameSync;
use super::texture::{find_depth_format, Texture};
use super::{pipeline, VulkanDevice};
use crate::assets::{load_spirv, Mesh, TextureData};
use crate::config::Config;
use crate::frame::{FrameError, PresentTarget, RebuildPlan, Status, SurfaceSize};

/// Per-image uniform block, matches `shaders/shader.vert`
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct UniformBufferObject {
    pub model: Mat4,
    pub view: Mat4,
    pub proj: Mat4,
}

impl UniformBufferObject {
    /// Degrees per second the model spins about Z
    pub const SPIN_RATE: f32 = 90.0;

    /// Transforms `elapsed` seconds into the run
    pub fn at(elapsed: f32, aspect: f32) -> Self {
        let model = Mat4::from_rotation_z((elapsed * Self::SPIN_RATE).to_radians());
        let view = Mat4::look_at_rh(Vec3::splat(2.0), Vec3::ZERO, Vec3::Z);

        // Vulkan clip space has Y pointing down
        let mut proj = Mat4::perspective_rh(45f32.to_radians(), aspect, 0.1, 10.0);
        proj.y_axis.y *= -1.0;

        Self { model, view, proj }
    }
}

pub struct VulkanRenderer {
    // Rebuilt on resize; torn down explicitly in Drop
    surface: SurfaceState,
    plan: RebuildPlan<SurfaceGroup>,

    // Per-slot synchronization
    frames: Vec<FrameSync>,

    // Static scene
    command_pool: vk::CommandPool,
    set_layout: vk::DescriptorSetLayout,
    vert_shader: vk::ShaderModule,
    frag_shader: vk::ShaderModule,
    texture: Texture,
    vertex_buffer: GpuBuffer,
    index_buffer: GpuBuffer,

    start: Instant,
    device: Arc<VulkanDevice>,
}

impl VulkanRenderer {
    /// Load the scene and build the surface objects for `size`.
    ///
    /// A zero-area window or surface leaves the surface unbuilt; the frame
    /// loop builds it once both report a real size.
    pub fn new(device: Arc<VulkanDevice>, config: &Config, size: SurfaceSize) -> Result<Self> {
        let assets = &config.assets;
        let mesh = Mesh::load_obj(&assets.model)?;
        let texture_data = TextureData::load(&assets.texture)?;
        let vert_code = load_spirv(&assets.vertex_shader)?;
        let frag_code = load_spirv(&assets.fragment_shader)?;

        let vertex_buffer = upload_device_local(
            &device,
            "vertex buffer",
            vk::BufferUsageFlags::VERTEX_BUFFER,
            &mesh.vertices,
        )?;
        let index_buffer = upload_device_local(
            &device,
            "index buffer",
            vk::BufferUsageFlags::INDEX_BUFFER,
            &mesh.indices,
        )?;
        let texture = Texture::upload(&device, &texture_data)?;
        let depth_format = find_depth_format(&device)?;
        log::info!("Depth format: {:?}", depth_format);

        // Raw handles start null so Drop can run at any point below
        let mut renderer = Self {
            surface: SurfaceState::new(Arc::clone(&device), size),
            plan: RebuildPlan::new(SURFACE_GROUPS)?,
            frames: Vec::new(),
            command_pool: vk::CommandPool::null(),
            set_layout: vk::DescriptorSetLayout::null(),
            vert_shader: vk::ShaderModule::null(),
            frag_shader: vk::ShaderModule::null(),
            texture,
            vertex_buffer,
            index_buffer,
            start: Instant::now(),
            device,
        };

        renderer.set_layout = pipeline::create_descriptor_set_layout(&renderer.device)?;
        renderer.vert_shader = pipeline::create_shader_module(&renderer.device, &vert_code)?;
        renderer.frag_shader = pipeline::create_shader_module(&renderer.device, &frag_code)?;

        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(renderer.device.families.graphics);
        renderer.command_pool =
            unsafe { renderer.device.device.create_command_pool(&pool_info, None) }
                .context("Failed to create command pool")?;

        for _ in 0..config.graphics.frames_in_flight.max(1) {
            let sync = FrameSync::new(&renderer.device)?;
            renderer.frames.push(sync);
        }

        renderer.surface.scene = SceneRefs {
            set_layout: renderer.set_layout,
            vert_shader: renderer.vert_shader,
            frag_shader: renderer.frag_shader,
            texture_view: renderer.texture.view,
            sampler: renderer.texture.sampler,
            vertex_buffer: renderer.vertex_buffer.buffer,
            index_buffer: renderer.index_buffer.buffer,
            index_count: mesh.indices.len() as u32,
            command_pool: renderer.command_pool,
            depth_format,
            present_mode: config.get_present_mode(),
            clear_color: config.graphics.clear_color,
        };

        if !size.is_empty() && Swapchain::surface_extent(&renderer.device, size)?.is_some() {
            renderer.plan.build_all(&mut renderer.surface)?;
        }

        log::info!(
            "Renderer ready: {} images, {} frames in flight",
            renderer.surface.image_count(),
            renderer.frames.len()
        );
        Ok(renderer)
    }

    pub fn device(&self) -> &Arc<VulkanDevice> {
        &self.device
    }

    fn frame(&self, slot: usize) -> &FrameSync {
        &self.frames[slot % self.frames.len()]
    }
}

impl PresentTarget for VulkanRenderer {
    fn image_count(&self) -> usize {
        self.surface.image_count()
    }

    fn recorded_count(&self) -> usize {
        self.surface.command_buffers.len()
    }

    fn wait_slot(&mut self, slot: usize) -> Result<(), FrameError> {
        self.frame(slot).wait(&self.device.device)
    }

    fn acquire(&mut self, slot: usize) -> Result<Status<u32>, FrameError> {
        match &self.surface.swapchain {
            Some(swapchain) => swapchain.acquire_next_image(self.frame(slot).image_available),
            // Not built yet, same as a surface that went out of date
            None => Ok(Status::OutOfDate),
        }
    }

    fn prepare(&mut self, image: u32) -> Result<(), FrameError> {
        let extent = self.surface.extent();
        let aspect = extent.width as f32 / extent.height.max(1) as f32;
        let ubo = UniformBufferObject::at(self.start.elapsed().as_secs_f32(), aspect);

        self.surface
            .uniform_buffers
            .get_mut(image as usize)
            .context("No uniform buffer for acquired image")
            .and_then(|buffer| buffer.write(&[ubo]))
            .map_err(FrameError::Prepare)
    }

    fn submit(&mut self, slot: usize, image: u32) -> Result<(), FrameError> {
        let frame = self.frame(slot);
        let command_buffer = *self
            .surface
            .command_buffers
            .get(image as usize)
            .ok_or(FrameError::Invariant {
                recorded: self.surface.command_buffers.len(),
                images: self.surface.image_count(),
            })?;

        // Only unsignal once we know work is going to signal it again
        frame.reset(&self.device.device)?;

        let wait_semaphores = [frame.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [command_buffer];
        let signal_semaphores = [frame.render_finished];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        unsafe {
            self.device.device.queue_submit(
                self.device.graphics_queue,
                &[submit_info],
                frame.in_flight_fence,
            )
        }
        .map_err(FrameError::Submit)
    }

    fn present(&mut self, slot: usize, image: u32) -> Result<Status<()>, FrameError> {
        match &self.surface.swapchain {
            Some(swapchain) => swapchain.present(image, self.frame(slot).render_finished),
            None => Ok(Status::OutOfDate),
        }
    }

    fn wait_idle(&mut self) -> Result<(), FrameError> {
        self.device.wait_idle().map_err(FrameError::Sync)
    }

    fn rebuild(&mut self, size: SurfaceSize) -> Result<bool, FrameError> {
        // Keep the old objects while the surface has nothing to present to
        if Swapchain::surface_extent(&self.device, size)
            .map_err(FrameError::Rebuild)?
            .is_none()
        {
            return Ok(false);
        }

        self.plan.destroy_all(&mut self.surface);
        self.surface.size = size;
        self.plan
            .build_all(&mut self.surface)
            .map_err(FrameError::Rebuild)?;
        Ok(true)
    }
}

impl Drop for VulkanRenderer {
    fn drop(&mut self) {
        log::info!("Destroying renderer...");
        if let Err(e) = self.device.wait_idle() {
            log::warn!("Device did not go idle before teardown: {}", e);
        }

        self.plan.destroy_all(&mut self.surface);

        let device = &self.device.device;
        unsafe {
            for frame in self.frames.drain(..) {
                frame.destroy(device);
            }
            device.destroy_command_pool(self.command_pool, None);
            device.destroy_shader_module(self.vert_shader, None);
            device.destroy_shader_module(self.frag_shader, None);
            device.destroy_descriptor_set_layout(self.set_layout, None);
        }
        // Texture and buffers free their memory as the fields drop
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    fn approx(a: Vec4, b: Vec4) -> bool {
        (a - b).abs().max_element() < 1e-5
    }

    #[test]
    fn uniform_block_is_three_matrices() {
        assert_eq!(std::mem::size_of::<UniformBufferObject>(), 3 * 64);
    }

    #[test]
    fn model_spins_ninety_degrees_per_second() {
        let ubo = UniformBufferObject::at(1.0, 1.0);
        let x = ubo.model * Vec4::new(1.0, 0.0, 0.0, 1.0);
        assert!(approx(x, Vec4::new(0.0, 1.0, 0.0, 1.0)), "{:?}", x);

        let start = UniformBufferObject::at(0.0, 1.0);
        assert_eq!(start.model, Mat4::IDENTITY);
    }

    #[test]
    fn camera_looks_at_origin_from_two_two_two() {
        let ubo = UniformBufferObject::at(0.0, 1.0);
        let eye = ubo.view * Vec4::new(2.0, 2.0, 2.0, 1.0);
        assert!(approx(eye, Vec4::new(0.0, 0.0, 0.0, 1.0)), "{:?}", eye);

        // The origin sits straight ahead, down -Z in view space
        let origin = ubo.view * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert!(origin.x.abs() < 1e-5 && origin.y.abs() < 1e-5);
        assert!((origin.z + 12f32.sqrt()).abs() < 1e-4);
    }

    #[test]
    fn projection_flips_y_and_maps_depth_to_unit_range() {
        let ubo = UniformBufferObject::at(0.0, 4.0 / 3.0);
        assert!(ubo.proj.y_axis.y < 0.0);

        let project = |z: f32| {
            let clip = ubo.proj * Vec4::new(0.0, 0.0, z, 1.0);
            clip.z / clip.w
        };
        assert!(project(-0.1).abs() < 1e-5);
        assert!((project(-10.0) - 1.0).abs() < 1e-5);
    }
}
