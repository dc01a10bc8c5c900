//! Logical device wrapper ([`Device`]).
//!
//! `Device` owns the `VkDevice`, the swapchain extension loader and the
//! graphics and present queues. Physical device selection takes the first
//! device, in driver order, that has a graphics family, a family able to
//! present to the target surface, and `VK_KHR_swapchain`.
//!
//! Raw Vulkan operations are surfaced as `unsafe fn` methods with `raw_` in
//! their name. The wrappers in sibling modules go through these rather than
//! touching `ash::Device` directly.

use std::ffi::CStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use thiserror::Error;

use crate::instance::{FetchPhysicalDeviceError, Instance};
use crate::surface::{Surface, SurfaceSupportError};

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Device and surface were created from different instances")]
    MismatchedParams,

    #[error("Could not enumerate physical devices: {0}")]
    Enumerate(#[from] FetchPhysicalDeviceError),

    #[error("No physical device has graphics and present queue families for this surface")]
    NoSuitableDevice,

    #[error("Error checking surface support: {0}")]
    SurfaceSupport(#[from] SurfaceSupportError),

    #[error("Failed to create logical device: {0}")]
    DeviceCreationFailed(vk::Result),
}

/// The queue families a [`Device`] was opened with. The two may be equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilyIndices {
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// Distinct family indices, graphics first.
    pub fn unique(&self) -> Vec<u32> {
        if self.is_shared() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// Pick the first graphics-capable family and the first present-capable
/// family. `supports_present` is asked about every family in index order
/// until one answers `true`.
pub fn find_queue_families<E>(
    families: &[vk::QueueFamilyProperties],
    mut supports_present: impl FnMut(u32) -> Result<bool, E>,
) -> Result<Option<QueueFamilyIndices>, E> {
    let graphics = families
        .iter()
        .position(|family| {
            family.queue_count > 0
                && family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
        })
        .map(|idx| idx as u32);

    let mut present = None;
    for (idx, family) in families.iter().enumerate() {
        if family.queue_count > 0 && supports_present(idx as u32)? {
            present = Some(idx as u32);
            break;
        }
    }

    Ok(graphics
        .zip(present)
        .map(|(graphics, present)| QueueFamilyIndices { graphics, present }))
}

/// Walk `candidates` in order and return the first one `qualify` accepts.
pub fn select_first_suitable<D: Copy, E>(
    candidates: &[D],
    mut qualify: impl FnMut(D) -> Result<Option<QueueFamilyIndices>, E>,
) -> Result<Option<(D, QueueFamilyIndices)>, E> {
    for &candidate in candidates {
        if let Some(families) = qualify(candidate)? {
            return Ok(Some((candidate, families)));
        }
    }
    Ok(None)
}

fn has_extension(available: &[vk::ExtensionProperties], name: &CStr) -> bool {
    available
        .iter()
        .any(|ext| ext.extension_name_as_c_str() == Ok(name))
}

/// Whether `physical_device` advertises `VK_KHR_swapchain`. A device whose
/// extensions can't be enumerated is logged and treated as unsuitable.
fn supports_swapchain(
    physical_device: impl std::fmt::Debug,
    extensions: Result<Vec<vk::ExtensionProperties>, vk::Result>,
) -> bool {
    match extensions {
        Ok(extensions) => has_extension(&extensions, ash::khr::swapchain::NAME),
        Err(e) => {
            tracing::warn!(
                "Skipping physical device {:?}: couldn't enumerate extensions: {e}",
                physical_device
            );
            false
        }
    }
}

/// A logical Vulkan device and the queues it was opened with.
///
/// When the graphics and present families coincide both roles share one
/// `Arc<Mutex<vk::Queue>>`, so locking either serializes on the same queue.
pub struct Device {
    parent: Arc<Instance>,
    handle: ash::Device,
    swapchain_device: ash::khr::swapchain::Device,
    physical_device: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    graphics_queue: (Arc<Mutex<vk::Queue>>, u32),
    present_queue: (Arc<Mutex<vk::Queue>>, u32),
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("handle", &self.handle.handle())
            .field("graphics_family", &self.graphics_queue.1)
            .field("present_family", &self.present_queue.1)
            .finish_non_exhaustive()
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        tracing::debug!("Dropping device {:?}", self.handle.handle());
        //SAFETY: Every object derived from this device holds an Arc to it, so
        //they have all been destroyed already
        unsafe { self.handle.destroy_device(None) };
    }
}

fn lock_queue(queue: &Mutex<vk::Queue>) -> MutexGuard<'_, vk::Queue> {
    queue.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Device {
    /// Select a physical device able to render to and present on `surf` and
    /// open a logical device on it with `VK_KHR_swapchain` enabled.
    pub fn create_compatible<T: HasDisplayHandle + HasWindowHandle>(
        instance: &Arc<Instance>,
        surf: &Surface<T>,
    ) -> Result<Self, DeviceError> {
        if !Arc::ptr_eq(surf.get_parent(), instance) {
            return Err(DeviceError::MismatchedParams);
        }
        let _span = tracing::debug_span!("create_device").entered();

        let physical_devices = instance.fetch_raw_physical_devices()?;
        tracing::debug!("Found {} physical device(s)", physical_devices.len());

        let selected = select_first_suitable(&physical_devices, |physical_device| {
            //SAFETY: physical_device was enumerated from instance
            let extensions = unsafe {
                instance.enumerate_raw_device_extension_properties(physical_device)
            };
            if !supports_swapchain(physical_device, extensions) {
                return Ok(None);
            }
            //SAFETY: physical_device was enumerated from instance
            let families = unsafe {
                instance.get_raw_physical_device_queue_family_properties(physical_device)
            };
            find_queue_families(&families, |idx| {
                //SAFETY: physical_device and surf share instance (checked above)
                unsafe { surf.supports_queue_family(physical_device, idx) }
            })
        })?;
        let (physical_device, families) = selected.ok_or(DeviceError::NoSuitableDevice)?;

        //SAFETY: physical_device was enumerated from instance
        let properties =
            unsafe { instance.get_raw_physical_device_properties(physical_device) };
        tracing::info!(
            "Selected physical device: {:?} (type: {:?})",
            properties.device_name_as_c_str().unwrap_or(c"unknown"),
            properties.device_type,
        );
        tracing::info!(
            "Queue families: graphics {}, present {}",
            families.graphics,
            families.present
        );

        let priorities = [1.0f32];
        let unique_families = families.unique();
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo<'_>> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
            })
            .collect();

        let ext_ptrs = [ash::khr::swapchain::NAME.as_ptr()];
        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&ext_ptrs);

        //SAFETY: physical_device was derived from instance, device_create_info
        //and the arrays it points at outlive the call
        let device = unsafe {
            instance.create_ash_device(physical_device, &device_create_info)
        }
        .map_err(DeviceError::DeviceCreationFailed)?;

        //SAFETY: device was just created with one queue in this family
        let graphics = Arc::new(Mutex::new(unsafe {
            device.get_device_queue(families.graphics, 0)
        }));
        let present = if families.is_shared() {
            Arc::clone(&graphics)
        } else {
            //SAFETY: device was just created with one queue in this family
            Arc::new(Mutex::new(unsafe {
                device.get_device_queue(families.present, 0)
            }))
        };

        Ok(Self {
            parent: Arc::clone(instance),
            swapchain_device: instance.create_swapchain_loader(&device),
            handle: device,
            physical_device,
            properties,
            graphics_queue: (graphics, families.graphics),
            present_queue: (present, families.present),
        })
    }

    pub fn get_parent(&self) -> &Arc<Instance> {
        &self.parent
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }

    pub fn ash_device(&self) -> &ash::Device {
        &self.handle
    }

    pub fn raw_device(&self) -> vk::Device {
        self.handle.handle()
    }

    pub fn queue_families(&self) -> QueueFamilyIndices {
        QueueFamilyIndices {
            graphics: self.graphics_queue.1,
            present: self.present_queue.1,
        }
    }

    /// Block until every queue on this device is idle.
    pub fn wait_idle(&self) -> Result<(), vk::Result> {
        let _span = tracing::debug_span!("device_wait_idle").entered();
        // vkDeviceWaitIdle requires every queue to be externally synchronized.
        let _graphics = lock_queue(&self.graphics_queue.0);
        let _present = (!self.queue_families().is_shared())
            .then(|| lock_queue(&self.present_queue.0));
        // SAFETY: `self.handle` is valid for the lifetime of `self` and both
        // queue locks are held.
        unsafe { self.handle.device_wait_idle() }
    }
}

// Queue submission and presentation
impl Device {
    /// # Safety
    /// Every handle in `submits` must be valid and derived from this device.
    /// Command buffers must be executable, signal semaphores unsignaled and
    /// `fence`, when not null, unsignaled.
    pub unsafe fn graphics_queue_submit(
        &self,
        submits: &[vk::SubmitInfo<'_>],
        fence: vk::Fence,
    ) -> Result<(), vk::Result> {
        let queue = lock_queue(&self.graphics_queue.0);
        // SAFETY: Caller guarantees handle validity and sync state.
        unsafe { self.handle.queue_submit(*queue, submits, fence) }
    }

    /// Present via the present queue.
    ///
    /// Returns `Ok(true)` when the swapchain is suboptimal for the surface.
    ///
    /// # Safety
    /// All handles in `present_info` must be valid and derived from this
    /// device, and the presented images must be in `PRESENT_SRC_KHR`.
    pub unsafe fn queue_present(
        &self,
        present_info: &vk::PresentInfoKHR<'_>,
    ) -> Result<bool, vk::Result> {
        let queue = lock_queue(&self.present_queue.0);
        // SAFETY: Caller guarantees all handles and synchronization state.
        unsafe { self.swapchain_device.queue_present(*queue, present_info) }
    }
}

// Swapchain functionality
impl Device {
    /// # Safety
    /// `create_info` must reference valid objects derived from this device and
    /// its parent instance.
    pub unsafe fn create_raw_swapchain(
        &self,
        create_info: &vk::SwapchainCreateInfoKHR<'_>,
    ) -> Result<vk::SwapchainKHR, vk::Result> {
        // SAFETY: Caller guarantees create_info validity and handle provenance.
        unsafe { self.swapchain_device.create_swapchain(create_info, None) }
    }

    /// # Safety
    /// `swapchain` must be a live swapchain created from this device.
    pub unsafe fn get_raw_swapchain_images(
        &self,
        swapchain: vk::SwapchainKHR,
    ) -> Result<Vec<vk::Image>, vk::Result> {
        // SAFETY: Caller guarantees swapchain validity.
        unsafe { self.swapchain_device.get_swapchain_images(swapchain) }
    }

    /// # Safety
    /// `swapchain` must be created from this device, all of its image views
    /// destroyed and no in-flight work may reference it.
    pub unsafe fn destroy_raw_swapchain(&self, swapchain: vk::SwapchainKHR) {
        // SAFETY: Caller guarantees provenance and drop ordering.
        unsafe { self.swapchain_device.destroy_swapchain(swapchain, None) };
    }

    /// Returns `(image_index, is_suboptimal)`.
    ///
    /// # Safety
    /// `swapchain` must be created from this device. `semaphore` and `fence`,
    /// when not null, must be unsignaled handles from this device.
    pub unsafe fn acquire_next_swapchain_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout_ns: u64,
        semaphore: vk::Semaphore,
        fence: vk::Fence,
    ) -> Result<(u32, bool), vk::Result> {
        // SAFETY: Caller guarantees swapchain, semaphore, and fence validity.
        unsafe {
            self.swapchain_device
                .acquire_next_image(swapchain, timeout_ns, semaphore, fence)
        }
    }

    /// # Safety
    /// `create_info` must reference an image owned by this device.
    pub unsafe fn create_raw_image_view(
        &self,
        create_info: &vk::ImageViewCreateInfo<'_>,
    ) -> Result<vk::ImageView, vk::Result> {
        // SAFETY: Caller guarantees create_info validity.
        unsafe { self.handle.create_image_view(create_info, None) }
    }

    /// # Safety
    /// `image_view` must be created from this device and every framebuffer
    /// using it destroyed first.
    pub unsafe fn destroy_raw_image_view(&self, image_view: vk::ImageView) {
        // SAFETY: Caller guarantees provenance and drop ordering.
        unsafe { self.handle.destroy_image_view(image_view, None) };
    }
}

// Render pass and framebuffer functionality
impl Device {
    /// # Safety
    /// `create_info` and the arrays it points at must be valid for the call.
    pub unsafe fn create_raw_render_pass(
        &self,
        create_info: &vk::RenderPassCreateInfo<'_>,
    ) -> Result<vk::RenderPass, vk::Result> {
        // SAFETY: Caller guarantees create_info validity.
        unsafe { self.handle.create_render_pass(create_info, None) }
    }

    /// # Safety
    /// `render_pass` must be created from this device. No pipeline or
    /// framebuffer still in use may depend on it.
    pub unsafe fn destroy_raw_render_pass(&self, render_pass: vk::RenderPass) {
        // SAFETY: Caller guarantees provenance and drop ordering.
        unsafe { self.handle.destroy_render_pass(render_pass, None) };
    }

    /// # Safety
    /// `create_info` must reference a render pass and image views created
    /// from this device.
    pub unsafe fn create_raw_framebuffer(
        &self,
        create_info: &vk::FramebufferCreateInfo<'_>,
    ) -> Result<vk::Framebuffer, vk::Result> {
        // SAFETY: Caller guarantees create_info validity and provenance.
        unsafe { self.handle.create_framebuffer(create_info, None) }
    }

    /// # Safety
    /// `framebuffer` must be created from this device and unused by pending
    /// GPU work.
    pub unsafe fn destroy_raw_framebuffer(&self, framebuffer: vk::Framebuffer) {
        // SAFETY: Caller guarantees provenance and drop ordering.
        unsafe { self.handle.destroy_framebuffer(framebuffer, None) };
    }
}

// Shader module and pipeline functionality
impl Device {
    /// # Safety
    /// `create_info` must contain valid SPIR-V code.
    pub unsafe fn create_raw_shader_module(
        &self,
        create_info: &vk::ShaderModuleCreateInfo<'_>,
    ) -> Result<vk::ShaderModule, vk::Result> {
        // SAFETY: Caller guarantees create_info validity.
        unsafe { self.handle.create_shader_module(create_info, None) }
    }

    /// # Safety
    /// `shader_module` must be created from this device and not yet destroyed.
    pub unsafe fn destroy_raw_shader_module(&self, shader_module: vk::ShaderModule) {
        // SAFETY: Caller guarantees provenance.
        unsafe { self.handle.destroy_shader_module(shader_module, None) };
    }

    /// # Safety
    /// `create_info` must be a valid pipeline layout create info.
    pub unsafe fn create_raw_pipeline_layout(
        &self,
        create_info: &vk::PipelineLayoutCreateInfo<'_>,
    ) -> Result<vk::PipelineLayout, vk::Result> {
        // SAFETY: Caller guarantees create_info validity.
        unsafe { self.handle.create_pipeline_layout(create_info, None) }
    }

    /// # Safety
    /// `layout` must be created from this device and no pipeline using it may
    /// still be in use.
    pub unsafe fn destroy_raw_pipeline_layout(&self, layout: vk::PipelineLayout) {
        // SAFETY: Caller guarantees provenance and drop ordering.
        unsafe { self.handle.destroy_pipeline_layout(layout, None) };
    }

    /// Create a single graphics pipeline.
    ///
    /// Any handles ash hands back alongside an error are destroyed so callers
    /// never see a partially created pipeline.
    ///
    /// # Safety
    /// `create_info` must reference valid shader stages, layout and render
    /// pass derived from this device.
    pub unsafe fn create_raw_graphics_pipeline(
        &self,
        create_info: &vk::GraphicsPipelineCreateInfo<'_>,
    ) -> Result<vk::Pipeline, vk::Result> {
        // SAFETY: Caller guarantees create_info validity.
        let created = unsafe {
            self.handle.create_graphics_pipelines(
                vk::PipelineCache::null(),
                std::slice::from_ref(create_info),
                None,
            )
        };
        match created {
            Ok(pipelines) => pipelines
                .into_iter()
                .next()
                .ok_or(vk::Result::ERROR_UNKNOWN),
            Err((partial, result)) => {
                let created = partial
                    .into_iter()
                    .filter(|p| *p != vk::Pipeline::null());
                for pipeline in created {
                    // SAFETY: pipeline was just created by this device.
                    unsafe { self.handle.destroy_pipeline(pipeline, None) };
                }
                Err(result)
            }
        }
    }

    /// # Safety
    /// `pipeline` must be created from this device and unused by pending work.
    pub unsafe fn destroy_raw_pipeline(&self, pipeline: vk::Pipeline) {
        // SAFETY: Caller guarantees provenance and drop ordering.
        unsafe { self.handle.destroy_pipeline(pipeline, None) };
    }
}

// Command pool and buffer functionality
impl Device {
    /// # Safety
    /// `create_info` must name a queue family this device was opened with.
    pub unsafe fn create_raw_command_pool(
        &self,
        create_info: &vk::CommandPoolCreateInfo<'_>,
    ) -> Result<vk::CommandPool, vk::Result> {
        // SAFETY: Caller guarantees create_info validity.
        unsafe { self.handle.create_command_pool(create_info, None) }
    }

    /// # Safety
    /// `pool` must be created from this device and none of its command
    /// buffers may be pending execution.
    pub unsafe fn destroy_raw_command_pool(&self, pool: vk::CommandPool) {
        // SAFETY: Caller guarantees provenance and drop ordering.
        unsafe { self.handle.destroy_command_pool(pool, None) };
    }

    /// # Safety
    /// `allocate_info.command_pool` must be a pool created from this device.
    pub unsafe fn allocate_raw_command_buffers(
        &self,
        allocate_info: &vk::CommandBufferAllocateInfo<'_>,
    ) -> Result<Vec<vk::CommandBuffer>, vk::Result> {
        // SAFETY: Caller guarantees allocate_info validity.
        unsafe { self.handle.allocate_command_buffers(allocate_info) }
    }

    /// # Safety
    /// `command_buffer` must be in the initial state.
    pub unsafe fn begin_raw_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        begin_info: &vk::CommandBufferBeginInfo<'_>,
    ) -> Result<(), vk::Result> {
        // SAFETY: Caller guarantees command_buffer state.
        unsafe { self.handle.begin_command_buffer(command_buffer, begin_info) }
    }

    /// # Safety
    /// `command_buffer` must be in the recording state.
    pub unsafe fn end_raw_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
    ) -> Result<(), vk::Result> {
        // SAFETY: Caller guarantees command_buffer state.
        unsafe { self.handle.end_command_buffer(command_buffer) }
    }

    /// # Safety
    /// `command_buffer` must not be pending execution and its pool must allow
    /// individual resets.
    pub unsafe fn reset_raw_command_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        flags: vk::CommandBufferResetFlags,
    ) -> Result<(), vk::Result> {
        // SAFETY: Caller guarantees command_buffer is idle.
        unsafe { self.handle.reset_command_buffer(command_buffer, flags) }
    }
}

// Recording commands
impl Device {
    /// # Safety
    /// `command_buffer` must be recording outside a render pass and
    /// `begin_info` must reference a render pass and framebuffer from this
    /// device.
    pub unsafe fn cmd_begin_render_pass(
        &self,
        command_buffer: vk::CommandBuffer,
        begin_info: &vk::RenderPassBeginInfo<'_>,
    ) {
        // SAFETY: Caller guarantees recording state and begin_info validity.
        unsafe {
            self.handle.cmd_begin_render_pass(
                command_buffer,
                begin_info,
                vk::SubpassContents::INLINE,
            )
        }
    }

    /// # Safety
    /// `command_buffer` must be inside a render pass.
    pub unsafe fn cmd_end_render_pass(&self, command_buffer: vk::CommandBuffer) {
        // SAFETY: Caller guarantees render pass state.
        unsafe { self.handle.cmd_end_render_pass(command_buffer) }
    }

    /// # Safety
    /// `command_buffer` must be recording and `pipeline` must be a graphics
    /// pipeline from this device.
    pub unsafe fn cmd_bind_graphics_pipeline(
        &self,
        command_buffer: vk::CommandBuffer,
        pipeline: vk::Pipeline,
    ) {
        // SAFETY: Caller guarantees recording state and pipeline validity.
        unsafe {
            self.handle.cmd_bind_pipeline(
                command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline,
            )
        }
    }

    /// # Safety
    /// `command_buffer` must be inside a render pass with a compatible graphics
    /// pipeline bound.
    pub unsafe fn cmd_draw(
        &self,
        command_buffer: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        // SAFETY: Caller guarantees render pass and pipeline state.
        unsafe {
            self.handle.cmd_draw(
                command_buffer,
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            )
        }
    }
}

// Fence and semaphore functionality
impl Device {
    /// # Safety
    /// `create_info` must be a valid fence create info.
    pub unsafe fn create_raw_fence(
        &self,
        create_info: &vk::FenceCreateInfo<'_>,
    ) -> Result<vk::Fence, vk::Result> {
        // SAFETY: Caller guarantees create_info validity.
        unsafe { self.handle.create_fence(create_info, None) }
    }

    /// # Safety
    /// `fence` must be created from this device and unused by pending work.
    pub unsafe fn destroy_raw_fence(&self, fence: vk::Fence) {
        // SAFETY: Caller guarantees provenance and drop ordering.
        unsafe { self.handle.destroy_fence(fence, None) };
    }

    /// # Safety
    /// All handles in `fences` must be fences created from this device.
    pub unsafe fn wait_for_raw_fences(
        &self,
        fences: &[vk::Fence],
        wait_all: bool,
        timeout_ns: u64,
    ) -> Result<(), vk::Result> {
        // SAFETY: Caller guarantees fence handle validity.
        unsafe { self.handle.wait_for_fences(fences, wait_all, timeout_ns) }
    }

    /// # Safety
    /// All handles in `fences` must be created from this device and not
    /// pending on any queue submission.
    pub unsafe fn reset_raw_fences(
        &self,
        fences: &[vk::Fence],
    ) -> Result<(), vk::Result> {
        // SAFETY: Caller guarantees fence validity and non-pending state.
        unsafe { self.handle.reset_fences(fences) }
    }

    /// # Safety
    /// `create_info` must be a valid semaphore create info.
    pub unsafe fn create_raw_semaphore(
        &self,
        create_info: &vk::SemaphoreCreateInfo<'_>,
    ) -> Result<vk::Semaphore, vk::Result> {
        // SAFETY: Caller guarantees create_info validity.
        unsafe { self.handle.create_semaphore(create_info, None) }
    }

    /// # Safety
    /// `semaphore` must be created from this device and no pending work may
    /// wait on or signal it.
    pub unsafe fn destroy_raw_semaphore(&self, semaphore: vk::Semaphore) {
        // SAFETY: Caller guarantees provenance and drop ordering.
        unsafe { self.handle.destroy_semaphore(semaphore, None) };
    }
}
