//! The root Vulkan object and the queries that hang directly off it.
//!
//! [`Instance`] owns the loader entry, the `VkInstance`, an optional debug
//! messenger and the surface extension loader. Physical device and surface
//! support queries live here because they dispatch through the instance.

use std::ffi::{CStr, CString, c_char};
use std::fmt::Debug;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use thiserror::Error;

use crate::log::VulkanLogLevel;
use crate::surface::{CreateSurfaceError, SurfaceQueryError, SurfaceSupportError};

pub struct Instance {
    entry: ash::Entry,
    handle: ash::Instance,
    debug_messenger: Option<(
        vk::DebugUtilsMessengerEXT,
        ash::ext::debug_utils::Instance,
    )>,
    surface_instance: ash::khr::surface::Instance,
    api_version: u32,
}

impl Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("handle", &self.handle.handle())
            .field("debug_messenger", &self.debug_messenger.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error)]
pub enum InstanceCreationError {
    #[error("Could not load libvulkan: {0}")]
    LibraryLoading(libloading::Error),
    #[error("Could not load vkGetInstanceProcAddr from libvulkan")]
    MissingEntryPoint,
    #[error("Couldn't get display handle from passed value: {0}")]
    InvalidDisplayHandle(raw_window_handle::HandleError),
    #[error("Missing mandatory instance extensions: {0:?}")]
    MissingExtensions(Vec<String>),
    #[error("Unknown Vulkan Error {0}")]
    UnknownVulkan(vk::Result),
    #[error("Invalid app name was passed to Instance::new")]
    InvalidAppName,
}

impl From<vk::Result> for InstanceCreationError {
    fn from(value: vk::Result) -> Self {
        InstanceCreationError::UnknownVulkan(value)
    }
}

#[derive(Debug, Error)]
pub enum FetchPhysicalDeviceError {
    #[error("Error fetching physical devices, memory exhaustion")]
    MemoryExhaustion,
    #[error("Error fetching physical devices, Unknown vulkan: {0}")]
    UnknownVulkan(vk::Result),
}

impl Drop for Instance {
    fn drop(&mut self) {
        if let Some((debug_messenger, debug_utils_instance)) =
            self.debug_messenger.take()
        {
            tracing::debug!("Dropping debug messenger {:?}", debug_messenger);
            //SAFETY: last use of this debug messenger. We made it from this
            //instance and debug_utils_instance is derived from this instance
            unsafe {
                debug_utils_instance.destroy_debug_utils_messenger(debug_messenger, None)
            };
        }
        tracing::debug!("Dropping instance {:?}", self.handle.handle());
        //SAFETY: We are in drop so this is the last use of instance. Every
        //derived object holds an Arc to us so they are all gone
        unsafe { self.handle.destroy_instance(None) };
    }
}

fn message_type_label(message_type: vk::DebugUtilsMessageTypeFlagsEXT) -> &'static str {
    match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "GENERAL",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "VALIDATION",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "PERFORMANCE",
        _ => "UNKNOWN",
    }
}

unsafe extern "system" fn vulkan_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    //SAFETY: Vulkan guarantees p_callback_data and its message are valid for
    //the duration of the callback
    let message =
        unsafe { CStr::from_ptr((*p_callback_data).p_message) }.to_string_lossy();
    let kind = message_type_label(message_type);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE => {
            tracing::trace!(target: "rgpu-debug-messenger", "[{}] {}", kind, message);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => {
            tracing::info!(target: "rgpu-debug-messenger", "[{}] {}", kind, message);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            tracing::warn!(target: "rgpu-debug-messenger", "[{}] {}", kind, message);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            tracing::error!(target: "rgpu-debug-messenger", "[{}] {}", kind, message);
        }
        _ => {
            tracing::debug!(target: "rgpu-debug-messenger", "[{}] {}", kind, message);
        }
    }

    vk::FALSE
}

impl Instance {
    /// Load Vulkan and create an instance able to present to windows from
    /// `display_source`.
    ///
    /// When `max_log_level` is `Some` and both `VK_EXT_debug_utils` and the
    /// Khronos validation layer are available, a debug messenger is installed
    /// that forwards messages at or above that level into `tracing`. Missing
    /// debug support is logged and otherwise ignored.
    ///
    /// # Safety
    /// This loads vulkan using libloading, meaning that arbitrary code from the
    /// system loader is executed.
    pub unsafe fn new(
        app_name: impl AsRef<str>,
        max_log_level: Option<VulkanLogLevel>,
        display_source: &impl HasDisplayHandle,
    ) -> Result<Self, InstanceCreationError> {
        use InstanceCreationError as Error;

        let app_name_cstring = CString::new(app_name.as_ref()).map_err(|_| Error::InvalidAppName)?;

        //SAFETY: The caller takes on the burden of loading the library. Entry
        //outlives every other vulkan object because it's dropped last in
        //Instance
        let entry = unsafe { ash::Entry::load() }.map_err(|e| match e {
            ash::LoadingError::LibraryLoadFailure(error) => Error::LibraryLoading(error),
            ash::LoadingError::MissingEntryPoint(_) => Error::MissingEntryPoint,
        })?;

        //SAFETY: No preconditions beyond a loaded entry
        let api_version = unsafe { entry.try_enumerate_instance_version() }?
            .unwrap_or(vk::API_VERSION_1_0);

        let display_handle = display_source
            .display_handle()
            .map_err(Error::InvalidDisplayHandle)?;
        let surface_exts = ash_window::enumerate_required_extensions(display_handle.as_raw())?;
        let mandatory_exts: Vec<&CStr> = surface_exts
            .iter()
            //SAFETY: ash_window hands out null terminated static C strings
            .map(|ext_cstr_ptr| unsafe { CStr::from_ptr(*ext_cstr_ptr) })
            .collect();

        //SAFETY: No preconditions beyond a loaded entry
        let instance_exts_avail = unsafe { entry.enumerate_instance_extension_properties(None) }?;
        //SAFETY: No preconditions beyond a loaded entry
        let instance_layers_avail = unsafe { entry.enumerate_instance_layer_properties() };

        let missing_exts: Vec<_> = mandatory_exts
            .iter()
            .filter(|mandatory_ext| {
                !instance_exts_avail
                    .iter()
                    .any(|avail| avail.extension_name_as_c_str() == Ok(**mandatory_ext))
            })
            .map(|ext| ext.to_string_lossy().into_owned())
            .collect();
        if !missing_exts.is_empty() {
            return Err(Error::MissingExtensions(missing_exts));
        }

        let debug_utils_ext_name = ash::ext::debug_utils::NAME;
        let validation_layer_name = c"VK_LAYER_KHRONOS_validation";

        let debug_utils_available = instance_exts_avail
            .iter()
            .any(|ext| ext.extension_name_as_c_str() == Ok(debug_utils_ext_name));
        let validation_layer_available = instance_layers_avail
            .as_ref()
            .map(|layers| {
                layers
                    .iter()
                    .any(|layer| layer.layer_name_as_c_str() == Ok(validation_layer_name))
            })
            .unwrap_or(false);

        let debug_level = match max_log_level {
            Some(level) if debug_utils_available && validation_layer_available => Some(level),
            Some(level) => {
                tracing::warn!(
                    "Debug output requested at {level:?} but debug utils ({debug_utils_available}) \
                     or validation layer ({validation_layer_available}) is unavailable"
                );
                None
            }
            None => None,
        };

        let mut enabled_exts: Vec<*const c_char> =
            mandatory_exts.iter().map(|ext| ext.as_ptr()).collect();
        let mut enabled_layers: Vec<*const c_char> = Vec::new();

        let mut debug_messenger_create_info = debug_level.map(|level| {
            enabled_exts.push(debug_utils_ext_name.as_ptr());
            enabled_layers.push(validation_layer_name.as_ptr());
            vk::DebugUtilsMessengerCreateInfoEXT::default()
                .message_severity(level.message_severity())
                .message_type(
                    vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                )
                .pfn_user_callback(Some(vulkan_debug_callback))
        });

        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name_cstring)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"rgpu")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(api_version);

        let mut instance_create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&enabled_exts)
            .enabled_layer_names(&enabled_layers);
        if let Some(ref mut debug_info) = debug_messenger_create_info {
            instance_create_info = instance_create_info.push_next(debug_info);
        }

        //SAFETY: instance_create_info and everything it points at lives until
        //the end of this function
        let instance = unsafe { entry.create_instance(&instance_create_info, None) }?;

        let debug_messenger = match debug_messenger_create_info {
            Some(mut create_info) => {
                create_info.p_next = std::ptr::null();
                let debug_utils_instance =
                    ash::ext::debug_utils::Instance::new(&entry, &instance);
                //SAFETY: Valid create info, instance was just created
                match unsafe {
                    debug_utils_instance
                        .create_debug_utils_messenger(&create_info, None)
                } {
                    Ok(messenger) => Some((messenger, debug_utils_instance)),
                    Err(e) => {
                        tracing::error!("Continuing without a debug messenger: {e}");
                        None
                    }
                }
            }
            None => None,
        };

        let surface_instance = ash::khr::surface::Instance::new(&entry, &instance);
        tracing::info!(
            "Created Vulkan instance (api {}.{}.{}, debug messenger: {})",
            vk::api_version_major(api_version),
            vk::api_version_minor(api_version),
            vk::api_version_patch(api_version),
            debug_messenger.is_some(),
        );

        Ok(Instance {
            entry,
            handle: instance,
            debug_messenger,
            surface_instance,
            api_version,
        })
    }

    pub fn api_version(&self) -> u32 {
        self.api_version
    }

    pub fn has_debug_messenger(&self) -> bool {
        self.debug_messenger.is_some()
    }

    pub fn raw_instance(&self) -> vk::Instance {
        self.handle.handle()
    }

    pub fn ash_instance(&self) -> &ash::Instance {
        &self.handle
    }
}

// ---------------------------------------------------------------------------
// Physical device queries
// ---------------------------------------------------------------------------

impl Instance {
    /// Get the physical devices visible to this instance, in driver order.
    pub fn fetch_raw_physical_devices(
        &self,
    ) -> Result<Vec<vk::PhysicalDevice>, FetchPhysicalDeviceError> {
        //SAFETY: No preconditions beyond a live instance
        match unsafe { self.handle.enumerate_physical_devices() } {
            Ok(v) => Ok(v),
            Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)
            | Err(vk::Result::ERROR_OUT_OF_HOST_MEMORY) => {
                Err(FetchPhysicalDeviceError::MemoryExhaustion)
            }
            Err(e) => Err(FetchPhysicalDeviceError::UnknownVulkan(e)),
        }
    }

    /// # Safety
    /// `physical_device` must be a valid handle derived from this instance.
    pub unsafe fn get_raw_physical_device_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> vk::PhysicalDeviceProperties {
        //SAFETY: physical_device was derived from this instance
        unsafe { self.handle.get_physical_device_properties(physical_device) }
    }

    /// # Safety
    /// `physical_device` must be a valid handle derived from this instance.
    pub unsafe fn get_raw_physical_device_queue_family_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Vec<vk::QueueFamilyProperties> {
        //SAFETY: physical_device was derived from this instance
        unsafe {
            self.handle
                .get_physical_device_queue_family_properties(physical_device)
        }
    }

    /// # Safety
    /// `physical_device` must be a valid handle derived from this instance.
    pub unsafe fn enumerate_raw_device_extension_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Vec<vk::ExtensionProperties>, vk::Result> {
        //SAFETY: physical_device was derived from this instance
        unsafe { self.handle.enumerate_device_extension_properties(physical_device) }
    }

    /// # Safety
    /// `physical_device` must be a valid handle derived from this instance and
    /// any handles referenced by `create_info` must remain valid for the call.
    pub unsafe fn create_ash_device(
        &self,
        physical_device: vk::PhysicalDevice,
        create_info: &vk::DeviceCreateInfo<'_>,
    ) -> Result<ash::Device, vk::Result> {
        //SAFETY: Caller guarantees provenance and create_info validity
        unsafe { self.handle.create_device(physical_device, create_info, None) }
    }

    pub fn create_swapchain_loader(&self, device: &ash::Device) -> ash::khr::swapchain::Device {
        ash::khr::swapchain::Device::new(&self.handle, device)
    }
}

// ---------------------------------------------------------------------------
// Surface functionality
// ---------------------------------------------------------------------------

impl Instance {
    /// Create a raw VkSurfaceKHR.
    ///
    /// # Safety
    /// The returned surface must be destroyed before `source` is dropped and
    /// must only be used with this instance.
    pub unsafe fn create_raw_surface<T: HasDisplayHandle + HasWindowHandle>(
        &self,
        source: &T,
    ) -> Result<vk::SurfaceKHR, CreateSurfaceError> {
        use CreateSurfaceError as Error;
        let display_handle = source
            .display_handle()
            .map_err(Error::InvalidDisplayHandle)?;
        let window_handle = source
            .window_handle()
            .map_err(Error::InvalidWindowHandle)?;
        //SAFETY: Both handles come from a live source, which the caller keeps
        //alive for as long as the surface
        unsafe {
            ash_window::create_surface(
                &self.entry,
                &self.handle,
                display_handle.as_raw(),
                window_handle.as_raw(),
                None,
            )
        }
        .map_err(Error::VulkanError)
    }

    /// # Safety
    /// `surf` must be derived from this instance and every object derived from
    /// it (swapchains) must already be destroyed.
    pub unsafe fn destroy_raw_surface(&self, surf: vk::SurfaceKHR) {
        //SAFETY: Caller guarantees provenance and drop ordering
        unsafe { self.surface_instance.destroy_surface(surf, None) };
    }

    /// # Safety
    /// `physical_device` and `surface` must both be derived from this instance.
    pub unsafe fn get_raw_physical_device_surface_support(
        &self,
        physical_device: vk::PhysicalDevice,
        queue_family_index: u32,
        surface: vk::SurfaceKHR,
    ) -> Result<bool, SurfaceSupportError> {
        //SAFETY: Caller guarantees provenance
        unsafe {
            self.surface_instance.get_physical_device_surface_support(
                physical_device,
                queue_family_index,
                surface,
            )
        }
        .map_err(SurfaceSupportError::Vulkan)
    }

    /// # Safety
    /// `physical_device` and `surface` must both be derived from this instance.
    pub unsafe fn get_surface_capabilities(
        &self,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> Result<vk::SurfaceCapabilitiesKHR, SurfaceQueryError> {
        //SAFETY: Caller guarantees provenance
        unsafe {
            self.surface_instance
                .get_physical_device_surface_capabilities(physical_device, surface)
        }
        .map_err(SurfaceQueryError::Vulkan)
    }

    /// # Safety
    /// `physical_device` and `surface` must both be derived from this instance.
    pub unsafe fn get_surface_formats(
        &self,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> Result<Vec<vk::SurfaceFormatKHR>, SurfaceQueryError> {
        //SAFETY: Caller guarantees provenance
        unsafe {
            self.surface_instance
                .get_physical_device_surface_formats(physical_device, surface)
        }
        .map_err(SurfaceQueryError::Vulkan)
    }

    /// # Safety
    /// `physical_device` and `surface` must both be derived from this instance.
    pub unsafe fn get_surface_present_modes(
        &self,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> Result<Vec<vk::PresentModeKHR>, SurfaceQueryError> {
        //SAFETY: Caller guarantees provenance
        unsafe {
            self.surface_instance
                .get_physical_device_surface_present_modes(physical_device, surface)
        }
        .map_err(SurfaceQueryError::Vulkan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_labels_match_single_flags() {
        assert_eq!(
            message_type_label(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION),
            "VALIDATION"
        );
        assert_eq!(
            message_type_label(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE
            ),
            "UNKNOWN"
        );
    }
}
