use std::sync::Arc;

use ash::vk;
use thiserror::Error;

use crate::device::Device;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CreateCommandPoolError {
    #[error("Vulkan error creating command pool: {0}")]
    Vulkan(vk::Result),
}

#[derive(Debug, Error)]
pub enum AllocateCommandBufferError {
    #[error("Vulkan error allocating command buffer: {0}")]
    Vulkan(vk::Result),
}

// ---------------------------------------------------------------------------
// CommandPoolShared
// ---------------------------------------------------------------------------

/// Raw pool handle co-owned by [`ResettableCommandPool`] and every
/// [`ResettableCommandBuffer`] allocated from it. The Vulkan pool lives until
/// the last of them is dropped.
struct CommandPoolShared {
    parent: Arc<Device>,
    pool: vk::CommandPool,
}

impl Drop for CommandPoolShared {
    fn drop(&mut self) {
        tracing::debug!("Dropping command pool {:?}", self.pool);
        // SAFETY: Runs once the pool wrapper and all of its buffers are gone.
        // vkDestroyCommandPool frees the buffers allocated from it.
        unsafe { self.parent.destroy_raw_command_pool(self.pool) };
    }
}

// ---------------------------------------------------------------------------
// ResettableCommandPool
// ---------------------------------------------------------------------------

/// A command pool created with `RESET_COMMAND_BUFFER`, so each buffer can be
/// reset on its own between submissions.
pub struct ResettableCommandPool {
    shared: Arc<CommandPoolShared>,
}

impl std::fmt::Debug for ResettableCommandPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResettableCommandPool")
            .field("pool", &self.shared.pool)
            .finish_non_exhaustive()
    }
}

impl ResettableCommandPool {
    pub fn new(
        device: &Arc<Device>,
        queue_family: u32,
    ) -> Result<Self, CreateCommandPoolError> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        // SAFETY: queue_family is one the device was opened with.
        let pool = unsafe { device.create_raw_command_pool(&create_info) }
            .map_err(CreateCommandPoolError::Vulkan)?;

        Ok(Self {
            shared: Arc::new(CommandPoolShared {
                parent: Arc::clone(device),
                pool,
            }),
        })
    }

    /// Allocate a single primary command buffer.
    pub fn allocate_command_buffer(
        &self,
    ) -> Result<ResettableCommandBuffer, AllocateCommandBufferError> {
        let allocate_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.shared.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        // SAFETY: allocate_info references a pool created from parent and
        // &self keeps other allocations on this pool off this thread.
        let handle = unsafe {
            self.shared
                .parent
                .allocate_raw_command_buffers(&allocate_info)
        }
        .map_err(AllocateCommandBufferError::Vulkan)?
            .into_iter()
            .next()
            .ok_or(AllocateCommandBufferError::Vulkan(vk::Result::ERROR_UNKNOWN))?;

        Ok(ResettableCommandBuffer {
            pool: Arc::clone(&self.shared),
            handle,
        })
    }

    pub fn raw_command_pool(&self) -> vk::CommandPool {
        self.shared.pool
    }
}

// ---------------------------------------------------------------------------
// ResettableCommandBuffer
// ---------------------------------------------------------------------------

/// A primary command buffer from a [`ResettableCommandPool`].
///
/// Recording operations are `unsafe`: the caller sequences Vulkan state.
pub struct ResettableCommandBuffer {
    pool: Arc<CommandPoolShared>,
    handle: vk::CommandBuffer,
}

impl std::fmt::Debug for ResettableCommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResettableCommandBuffer")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl ResettableCommandBuffer {
    fn device(&self) -> &Device {
        &self.pool.parent
    }

    /// Return the buffer to the initial state.
    ///
    /// # Safety
    /// The buffer must not be pending execution on the GPU.
    pub unsafe fn reset(&mut self) -> Result<(), vk::Result> {
        // SAFETY: Caller guarantees the buffer is not pending.
        unsafe {
            self.device().reset_raw_command_buffer(
                self.handle,
                vk::CommandBufferResetFlags::empty(),
            )
        }
    }

    /// # Safety
    /// The buffer must be in the initial state.
    pub unsafe fn begin(&mut self) -> Result<(), vk::Result> {
        let begin_info = vk::CommandBufferBeginInfo::default();
        // SAFETY: Caller guarantees the buffer is in the initial state.
        unsafe { self.device().begin_raw_command_buffer(self.handle, &begin_info) }
    }

    /// # Safety
    /// The buffer must be recording, outside any render pass.
    pub unsafe fn end(&mut self) -> Result<(), vk::Result> {
        // SAFETY: Caller guarantees the recording state.
        unsafe { self.device().end_raw_command_buffer(self.handle) }
    }

    /// Begin `render_pass` on `framebuffer` covering `extent`, clearing the
    /// single color attachment to `clear_color`.
    ///
    /// # Safety
    /// The buffer must be recording outside a render pass. `render_pass` and
    /// `framebuffer` must be compatible and created from the same device.
    pub unsafe fn begin_render_pass(
        &mut self,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_color: [f32; 4],
    ) {
        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue { float32: clear_color },
        }];
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .clear_values(&clear_values);
        // SAFETY: Caller guarantees recording state and handle compatibility.
        unsafe { self.device().cmd_begin_render_pass(self.handle, &begin_info) }
    }

    /// # Safety
    /// The buffer must be inside a render pass.
    pub unsafe fn end_render_pass(&mut self) {
        // SAFETY: Caller guarantees the render pass state.
        unsafe { self.device().cmd_end_render_pass(self.handle) }
    }

    /// # Safety
    /// The buffer must be recording. `pipeline` must be a graphics pipeline
    /// from the same device.
    pub unsafe fn bind_graphics_pipeline(&mut self, pipeline: vk::Pipeline) {
        // SAFETY: Caller guarantees recording state and pipeline validity.
        unsafe { self.device().cmd_bind_graphics_pipeline(self.handle, pipeline) }
    }

    /// # Safety
    /// The buffer must be inside a render pass with a compatible graphics
    /// pipeline bound.
    pub unsafe fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        // SAFETY: Caller guarantees render pass and pipeline state.
        unsafe {
            self.device().cmd_draw(
                self.handle,
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            )
        }
    }

    pub fn raw_command_buffer(&self) -> vk::CommandBuffer {
        self.handle
    }
}
