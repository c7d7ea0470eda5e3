// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Instance creation with validation layers
// - Window surface creation
// - Physical device selection (prefer discrete GPU)
// - Logical device + graphics/present/transfer queues
// - Memory allocator setup

use anyhow::{Context, Result};
use ash::{vk, Entry};
use parking_lot::Mutex;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::collections::BTreeSet;
use std::ffi::{c_char, CStr, CString};
use std::mem::ManuallyDrop;
use std::sync::Arc;
use winit::window::Window;

/// Queue family indices chosen for a physical device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
    /// Dedicated transfer family when the GPU has one, else `graphics`
    pub transfer: u32,
}

impl QueueFamilies {
    /// Distinct families, for queue creation and concurrent sharing
    pub fn unique(&self) -> Vec<u32> {
        let set: BTreeSet<u32> = [self.graphics, self.present, self.transfer]
            .into_iter()
            .collect();
        set.into_iter().collect()
    }
}

/// Vulkan device wrapper with automatic cleanup
pub struct VulkanDevice {
    // Must be dropped before `device`
    pub allocator: ManuallyDrop<Mutex<gpu_allocator::vulkan::Allocator>>,
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub instance: ash::Instance,
    _entry: Entry,

    // Presentation
    pub surface: vk::SurfaceKHR,
    pub surface_loader: ash::extensions::khr::Surface,
    pub swapchain_loader: ash::extensions::khr::Swapchain,

    // Queue handles
    pub families: QueueFamilies,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub transfer_queue: vk::Queue,

    // Debug utils (if validation enabled)
    debug_utils: Option<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,

    // Device properties (cached)
    pub properties: vk::PhysicalDeviceProperties,
}

impl VulkanDevice {
    /// Create Vulkan device for presenting into `window`
    ///
    /// # Arguments
    /// * `app_name` - Application name for debugging
    /// * `enable_validation` - Enable Vulkan validation layers (debug only)
    pub fn new(app_name: &str, enable_validation: bool, window: &Window) -> Result<Arc<Self>> {
        log::info!("Creating Vulkan device: {}", app_name);

        // Step 1: Load Vulkan library
        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        // Step 2: Create instance with the window system's surface extensions
        let display_handle = window.raw_display_handle();
        let surface_extensions = ash_window::enumerate_required_extensions(display_handle)
            .context("Window system has no Vulkan surface support")?;
        let instance =
            Self::create_instance(&entry, app_name, enable_validation, surface_extensions)?;

        // Step 3: Setup debug messenger if validation enabled
        let debug_utils = if enable_validation {
            Some(Self::setup_debug_messenger(&entry, &instance)?)
        } else {
            None
        };

        // Step 4: Create surface
        let surface = unsafe {
            ash_window::create_surface(
                &entry,
                &instance,
                display_handle,
                window.raw_window_handle(),
                None,
            )
        }
        .context("Failed to create window surface")?;
        let surface_loader = ash::extensions::khr::Surface::new(&entry, &instance);

        // Step 5: Pick physical device (GPU)
        let (physical_device, families) =
            Self::pick_physical_device(&instance, &surface_loader, surface)?;

        // Step 6: Create logical device
        let device = Self::create_logical_device(&instance, physical_device, &families)?;
        let (graphics_queue, present_queue, transfer_queue) = unsafe {
            (
                device.get_device_queue(families.graphics, 0),
                device.get_device_queue(families.present, 0),
                device.get_device_queue(families.transfer, 0),
            )
        };

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };

        log::info!(
            "Selected GPU: {}",
            unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy()
        );
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );
        log::info!("Queue families: {:?}", families);

        // Step 7: Create memory allocator
        let allocator = Self::create_allocator(&instance, physical_device, &device)?;
        let swapchain_loader = ash::extensions::khr::Swapchain::new(&instance, &device);

        Ok(Arc::new(Self {
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            device,
            physical_device,
            instance,
            _entry: entry,
            surface,
            surface_loader,
            swapchain_loader,
            families,
            graphics_queue,
            present_queue,
            transfer_queue,
            debug_utils,
            properties,
        }))
    }

    fn create_instance(
        entry: &Entry,
        app_name: &str,
        enable_validation: bool,
        surface_extensions: &[*const c_char],
    ) -> Result<ash::Instance> {
        let app_name_cstr = CString::new(app_name)?;
        let engine_name = CString::new("No Engine")?;

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        let mut extensions = surface_extensions.to_vec();
        if enable_validation {
            extensions.push(ash::extensions::ext::DebugUtils::name().as_ptr());
        }

        // Validation layers
        let layer_names = if enable_validation {
            Self::check_validation_layer(entry)?;
            vec![c"VK_LAYER_KHRONOS_validation".as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .context("Failed to create Vulkan instance")?;

        Ok(instance)
    }

    fn check_validation_layer(entry: &Entry) -> Result<()> {
        let layers = entry.enumerate_instance_layer_properties()?;
        let found = layers.iter().any(|layer| {
            let name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
            name == c"VK_LAYER_KHRONOS_validation"
        });

        if !found {
            anyhow::bail!("Validation layers requested, but VK_LAYER_KHRONOS_validation is not available");
        }
        Ok(())
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ash::extensions::ext::DebugUtils::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }?;

        Ok((debug_utils, messenger))
    }

    fn pick_physical_device(
        instance: &ash::Instance,
        surface_loader: &ash::extensions::khr::Surface,
        surface: vk::SurfaceKHR,
    ) -> Result<(vk::PhysicalDevice, QueueFamilies)> {
        let devices = unsafe { instance.enumerate_physical_devices() }?;

        if devices.is_empty() {
            anyhow::bail!("No Vulkan-capable GPU found");
        }

        // Score each device
        let mut best_device = None;
        let mut best_score = 0;

        for device in devices {
            let props = unsafe { instance.get_physical_device_properties(device) };
            let name = unsafe { CStr::from_ptr(props.device_name.as_ptr()) }.to_string_lossy();

            let Some(families) = Self::find_queue_families(instance, surface_loader, surface, device)?
            else {
                log::debug!("Skipping {}: missing graphics or present queue", name);
                continue;
            };

            if !Self::is_device_suitable(instance, surface_loader, surface, device)? {
                log::debug!("Skipping {}: missing swapchain support or anisotropy", name);
                continue;
            }

            // Score device (prefer discrete GPU)
            let score = match props.device_type {
                vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
                vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
                _ => 1,
            };

            if score > best_score {
                best_score = score;
                best_device = Some((device, families));
            }
        }

        best_device.ok_or_else(|| anyhow::anyhow!("No suitable GPU found"))
    }

    fn find_queue_families(
        instance: &ash::Instance,
        surface_loader: &ash::extensions::khr::Surface,
        surface: vk::SurfaceKHR,
        device: vk::PhysicalDevice,
    ) -> Result<Option<QueueFamilies>> {
        let queue_families =
            unsafe { instance.get_physical_device_queue_family_properties(device) };

        let mut graphics = None;
        let mut present = None;
        let mut transfer = None;

        for (index, family) in queue_families.iter().enumerate() {
            let index = index as u32;
            if family.queue_count == 0 {
                continue;
            }

            let flags = family.queue_flags;
            if graphics.is_none() && flags.contains(vk::QueueFlags::GRAPHICS) {
                graphics = Some(index);
            }

            let supports_present = unsafe {
                surface_loader.get_physical_device_surface_support(device, index, surface)
            }?;
            if present.is_none() && supports_present {
                present = Some(index);
            }

            // A transfer-only family can copy while the graphics queue renders
            if transfer.is_none()
                && flags.contains(vk::QueueFlags::TRANSFER)
                && !flags.contains(vk::QueueFlags::GRAPHICS)
            {
                transfer = Some(index);
            }
        }

        Ok(match (graphics, present) {
            (Some(graphics), Some(present)) => Some(QueueFamilies {
                graphics,
                present,
                transfer: transfer.unwrap_or(graphics),
            }),
            _ => None,
        })
    }

    fn is_device_suitable(
        instance: &ash::Instance,
        surface_loader: &ash::extensions::khr::Surface,
        surface: vk::SurfaceKHR,
        device: vk::PhysicalDevice,
    ) -> Result<bool> {
        let extensions = unsafe { instance.enumerate_device_extension_properties(device) }?;
        let has_swapchain = extensions.iter().any(|ext| {
            let name = unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) };
            name == ash::extensions::khr::Swapchain::name()
        });
        if !has_swapchain {
            return Ok(false);
        }

        let formats =
            unsafe { surface_loader.get_physical_device_surface_formats(device, surface) }?;
        let present_modes =
            unsafe { surface_loader.get_physical_device_surface_present_modes(device, surface) }?;
        if formats.is_empty() || present_modes.is_empty() {
            return Ok(false);
        }

        let features = unsafe { instance.get_physical_device_features(device) };
        Ok(features.sampler_anisotropy == vk::TRUE)
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        families: &QueueFamilies,
    ) -> Result<ash::Device> {
        let queue_priorities = [1.0];
        let queue_create_infos: Vec<_> = families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
                    .build()
            })
            .collect();

        let extensions = [ash::extensions::khr::Swapchain::name().as_ptr()];
        let features = vk::PhysicalDeviceFeatures::builder().sampler_anisotropy(true);

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = unsafe { instance.create_device(physical_device, &create_info, None) }
            .context("Failed to create logical device")?;

        Ok(device)
    }

    fn create_allocator(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: &ash::Device,
    ) -> Result<gpu_allocator::vulkan::Allocator> {
        let allocator =
            gpu_allocator::vulkan::Allocator::new(&gpu_allocator::vulkan::AllocatorCreateDesc {
                instance: instance.clone(),
                device: device.clone(),
                physical_device,
                debug_settings: Default::default(),
                buffer_device_address: false,
                allocation_sizes: Default::default(),
            })?;

        Ok(allocator)
    }

    /// First candidate format supporting `features` with optimal tiling
    pub fn find_supported_format(
        &self,
        candidates: &[vk::Format],
        features: vk::FormatFeatureFlags,
    ) -> Result<vk::Format> {
        candidates
            .iter()
            .copied()
            .find(|&format| {
                let props = unsafe {
                    self.instance
                        .get_physical_device_format_properties(self.physical_device, format)
                };
                props.optimal_tiling_features.contains(features)
            })
            .with_context(|| format!("None of {:?} supports {:?}", candidates, features))
    }

    /// Wait for device to be idle (e.g., before recreation or cleanup)
    pub fn wait_idle(&self) -> Result<(), vk::Result> {
        unsafe { self.device.device_wait_idle() }
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        // Wait for device to finish
        let _ = self.wait_idle();

        // Cleanup in reverse order
        unsafe {
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);

            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}
