//! Device Context
//!
//! [`Device`] owns the Vulkan instance, the selected physical adapter, the
//! logical device with its graphics/compute/present queues, the GPU memory
//! allocator, and the driver pipeline cache. Every other component in the
//! crate borrows it; it is created first and destroyed last.
//!
//! Adapter selection ranks discrete GPUs over integrated, virtual, and CPU
//! adapters, with ties broken by enumeration order. When validation is
//! requested, a debug-utils messenger routes driver messages into the `log`
//! facade by severity; message delivery never blocks the render thread.

use std::borrow::Cow;
use std::ffi::{CStr, CString, c_void};
use std::mem::ManuallyDrop;

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use parking_lot::Mutex;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::errors::{Result, TalosError, VkResultExt};
use crate::settings::RenderSettings;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";
const ENGINE_NAME: &CStr = c"talos";

struct DebugUtils {
    instance: ash::ext::debug_utils::Instance,
    device: ash::ext::debug_utils::Device,
    messenger: vk::DebugUtilsMessengerEXT,
}

/// Process-wide GPU device context.
///
/// Exclusively owned by the render thread. [`Device::destroy`] consumes the
/// context and must run strictly after every dependent component has
/// released its resources; [`Device::wait_idle`] drains in-flight GPU work
/// first.
pub struct Device {
    #[allow(dead_code)]
    entry: ash::Entry,
    instance: ash::Instance,
    debug_utils: Option<DebugUtils>,
    surface_loader: ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,

    physical_device: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    memory_properties: vk::PhysicalDeviceMemoryProperties,

    device: ash::Device,
    graphics_queue: vk::Queue,
    compute_queue: vk::Queue,
    present_queue: vk::Queue,
    graphics_family_index: u32,
    compute_family_index: u32,
    present_family_index: u32,

    // Dropped explicitly before the logical device in `destroy`.
    allocator: ManuallyDrop<Mutex<Allocator>>,
    pipeline_cache: vk::PipelineCache,
}

impl Device {
    /// Creates the device context for the given window surface.
    ///
    /// Fails fatally when no adapter exists, when the chosen adapter lacks a
    /// graphics-capable queue family, or when any underlying Vulkan call
    /// errors.
    pub fn new(
        settings: &RenderSettings,
        window: &(impl HasWindowHandle + HasDisplayHandle),
    ) -> Result<Self> {
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| TalosError::EntryLoad(e.to_string()))?;

        let validation = settings.validation && Self::validation_layer_available(&entry)?;
        if settings.validation && !validation {
            log::warn!("validation requested but {VALIDATION_LAYER:?} is not installed");
        }

        let display_handle = window.display_handle()?.as_raw();
        let window_handle = window.window_handle()?.as_raw();

        let instance = Self::create_instance(&entry, &settings.app_name, validation, display_handle)?;

        let debug_messenger = if validation {
            let loader = ash::ext::debug_utils::Instance::new(&entry, &instance);
            let messenger = unsafe {
                loader.create_debug_utils_messenger(&debug_messenger_create_info(), None)
            }
            .vk_err()?;
            Some((loader, messenger))
        } else {
            None
        };

        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);
        let surface = unsafe {
            ash_window::create_surface(&entry, &instance, display_handle, window_handle, None)
        }
        .vk_err()?;

        let physical_device = Self::select_physical_device(&instance)?;
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };

        let adapter_name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) };
        log::info!(
            "selected adapter {:?} ({:?})",
            adapter_name,
            properties.device_type
        );

        let (graphics_family_index, compute_family_index, present_family_index) =
            Self::select_queue_families(&instance, &surface_loader, physical_device, surface)?;

        let device = Self::create_logical_device(
            &instance,
            physical_device,
            &[graphics_family_index, compute_family_index, present_family_index],
        )?;

        let graphics_queue = unsafe { device.get_device_queue(graphics_family_index, 0) };
        let compute_queue = unsafe { device.get_device_queue(compute_family_index, 0) };
        let present_queue = unsafe { device.get_device_queue(present_family_index, 0) };

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: gpu_allocator::AllocatorDebugSettings::default(),
            buffer_device_address: false,
            allocation_sizes: gpu_allocator::AllocationSizes::default(),
        })?;

        let pipeline_cache = unsafe {
            device.create_pipeline_cache(&vk::PipelineCacheCreateInfo::default(), None)
        }
        .vk_err()?;

        let debug_utils = debug_messenger.map(|(loader, messenger)| DebugUtils {
            device: ash::ext::debug_utils::Device::new(&instance, &device),
            instance: loader,
            messenger,
        });

        Ok(Self {
            entry,
            instance,
            debug_utils,
            surface_loader,
            surface,
            physical_device,
            properties,
            memory_properties,
            device,
            graphics_queue,
            compute_queue,
            present_queue,
            graphics_family_index,
            compute_family_index,
            present_family_index,
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            pipeline_cache,
        })
    }

    fn validation_layer_available(entry: &ash::Entry) -> Result<bool> {
        let layers = unsafe { entry.enumerate_instance_layer_properties() }.vk_err()?;
        Ok(layers.iter().any(|layer| {
            (unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) }) == VALIDATION_LAYER
        }))
    }

    fn create_instance(
        entry: &ash::Entry,
        app_name: &str,
        validation: bool,
        display_handle: raw_window_handle::RawDisplayHandle,
    ) -> Result<ash::Instance> {
        let app_name = CString::new(app_name).unwrap_or_default();
        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(1)
            .engine_name(ENGINE_NAME)
            .engine_version(1)
            .api_version(vk::API_VERSION_1_2);

        let mut extensions =
            ash_window::enumerate_required_extensions(display_handle).vk_err()?.to_vec();
        let mut layers = Vec::new();
        if validation {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
            layers.push(VALIDATION_LAYER.as_ptr());
        }

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        unsafe { entry.create_instance(&create_info, None) }.vk_err()
    }

    fn select_physical_device(instance: &ash::Instance) -> Result<vk::PhysicalDevice> {
        let adapters = unsafe { instance.enumerate_physical_devices() }.vk_err()?;
        if adapters.is_empty() {
            return Err(TalosError::NoAdapter);
        }

        // Ties keep the first adapter in enumeration order.
        let mut best: Option<(u32, vk::PhysicalDevice)> = None;
        for &adapter in &adapters {
            let props = unsafe { instance.get_physical_device_properties(adapter) };
            let score = adapter_score(props.device_type);
            if best.is_none_or(|(best_score, _)| score > best_score) {
                best = Some((score, adapter));
            }
        }
        Ok(best.expect("adapter list verified non-empty").1)
    }

    fn select_queue_families(
        instance: &ash::Instance,
        surface_loader: &ash::khr::surface::Instance,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> Result<(u32, u32, u32)> {
        let families =
            unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

        let graphics = families
            .iter()
            .position(|f| f.queue_flags.contains(vk::QueueFlags::GRAPHICS))
            .ok_or(TalosError::NoGraphicsQueue)? as u32;

        let compute = families
            .iter()
            .position(|f| f.queue_flags.contains(vk::QueueFlags::COMPUTE))
            .map_or(graphics, |index| index as u32);

        let mut present = None;
        for index in 0..families.len() as u32 {
            let supported = unsafe {
                surface_loader.get_physical_device_surface_support(physical_device, index, surface)
            }
            .vk_err()?;
            if supported {
                present = Some(index);
                break;
            }
        }
        let present = present.ok_or(TalosError::NoGraphicsQueue)?;

        Ok((graphics, compute, present))
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        family_indices: &[u32],
    ) -> Result<ash::Device> {
        let mut unique_families: Vec<u32> = family_indices.to_vec();
        unique_families.sort_unstable();
        unique_families.dedup();

        let priorities = [1.0f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
            })
            .collect();

        let extensions = [ash::khr::swapchain::NAME.as_ptr()];
        let features = vk::PhysicalDeviceFeatures::default();
        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        unsafe { instance.create_device(physical_device, &create_info, None) }.vk_err()
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// The logical device handle.
    #[inline]
    #[must_use]
    pub fn raw(&self) -> &ash::Device {
        &self.device
    }

    #[inline]
    #[must_use]
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    #[inline]
    #[must_use]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    #[inline]
    #[must_use]
    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    #[inline]
    #[must_use]
    pub fn surface_loader(&self) -> &ash::khr::surface::Instance {
        &self.surface_loader
    }

    #[inline]
    #[must_use]
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    #[inline]
    #[must_use]
    pub fn compute_queue(&self) -> vk::Queue {
        self.compute_queue
    }

    #[inline]
    #[must_use]
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    #[inline]
    #[must_use]
    pub fn graphics_family_index(&self) -> u32 {
        self.graphics_family_index
    }

    #[inline]
    #[must_use]
    pub fn compute_family_index(&self) -> u32 {
        self.compute_family_index
    }

    #[inline]
    #[must_use]
    pub fn present_family_index(&self) -> u32 {
        self.present_family_index
    }

    /// The GPU memory allocator. Uncontended on the single render thread;
    /// the mutex exists because allocation requires `&mut` access through a
    /// shared context.
    #[inline]
    #[must_use]
    pub fn allocator(&self) -> &Mutex<Allocator> {
        &self.allocator
    }

    #[inline]
    #[must_use]
    pub fn pipeline_cache(&self) -> vk::PipelineCache {
        self.pipeline_cache
    }

    #[inline]
    #[must_use]
    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }

    #[inline]
    #[must_use]
    pub fn limits(&self) -> &vk::PhysicalDeviceLimits {
        &self.properties.limits
    }

    #[inline]
    #[must_use]
    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    // ------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------

    /// Attaches a debug name to a Vulkan object when validation is active.
    pub fn set_object_name<H: vk::Handle>(&self, handle: H, name: &str) {
        let Some(debug) = &self.debug_utils else {
            return;
        };
        let Ok(name) = CString::new(name) else {
            return;
        };
        let info = vk::DebugUtilsObjectNameInfoEXT::default()
            .object_handle(handle)
            .object_name(&name);
        if let Err(result) = unsafe { debug.device.set_debug_utils_object_name(&info) } {
            log::debug!("failed to name object: {result:?}");
        }
    }

    /// Blocks until the GPU has finished all submitted work. Used before
    /// resize and before destruction.
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.vk_err()
    }

    /// Destroys the context. Consuming `self` makes use-after-destroy and
    /// double-destroy unrepresentable; callers must destroy every dependent
    /// component first and drain the GPU via [`Device::wait_idle`].
    pub fn destroy(mut self) {
        unsafe {
            // The allocator frees its memory blocks against the live device.
            drop(ManuallyDrop::take(&mut self.allocator));
            self.device.destroy_pipeline_cache(self.pipeline_cache, None);
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
            if let Some(debug) = self.debug_utils.take() {
                debug
                    .instance
                    .destroy_debug_utils_messenger(debug.messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

fn adapter_score(device_type: vk::PhysicalDeviceType) -> u32 {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 10_000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 1_000,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 100,
        vk::PhysicalDeviceType::CPU => 10,
        _ => 0,
    }
}

fn debug_messenger_create_info() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(vulkan_debug_callback))
}

/// Routes driver messages to the `log` facade. Log delivery is off the
/// correctness path: losing a message is acceptable, blocking the render
/// thread is not, so the callback does nothing beyond formatting.
unsafe extern "system" fn vulkan_debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    let message: Cow<'_, str> = if callback_data.is_null() {
        Cow::Borrowed("<no message>")
    } else {
        let p_message = unsafe { (*callback_data).p_message };
        if p_message.is_null() {
            Cow::Borrowed("<no message>")
        } else {
            unsafe { CStr::from_ptr(p_message) }.to_string_lossy()
        }
    };

    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::error!("[vulkan {message_type:?}] {message}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::warn!("[vulkan {message_type:?}] {message}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        log::info!("[vulkan {message_type:?}] {message}");
    } else {
        log::debug!("[vulkan {message_type:?}] {message}");
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_score_ordering() {
        assert!(
            adapter_score(vk::PhysicalDeviceType::DISCRETE_GPU)
                > adapter_score(vk::PhysicalDeviceType::INTEGRATED_GPU)
        );
        assert!(
            adapter_score(vk::PhysicalDeviceType::INTEGRATED_GPU)
                > adapter_score(vk::PhysicalDeviceType::VIRTUAL_GPU)
        );
        assert!(
            adapter_score(vk::PhysicalDeviceType::VIRTUAL_GPU)
                > adapter_score(vk::PhysicalDeviceType::CPU)
        );
        assert!(adapter_score(vk::PhysicalDeviceType::CPU) > adapter_score(vk::PhysicalDeviceType::OTHER));
    }
}
