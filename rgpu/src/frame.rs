//! Per-frame synchronization objects and the tick protocol that drives them.
//!
//! One frame is ever in flight. Each [`RenderLoop::tick`] runs:
//!
//! ```text
//! wait fence -> reset fence -> acquire -> record -> submit -> present
//! ```
//!
//! The GPU side sits behind [`FrameOps`], so the ordering can be exercised
//! without a device. [`VulkanFrame`] is the real implementation.
//!
//! A tick that fails after resetting the fence but before submitting leaves
//! nothing to signal it again. The loop is abandoned at that point and every
//! later tick fails with [`TickError::Abandoned`] instead of waiting forever.

use std::sync::Arc;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use thiserror::Error;

use crate::command::{
    AllocateCommandBufferError, CreateCommandPoolError, ResettableCommandBuffer,
    ResettableCommandPool,
};
use crate::device::Device;
use crate::pipeline::{PipelineError, PipelineState};
use crate::surface::Surface;
use crate::swapchain::{SurfaceError, Swapchain};
use crate::sync::{
    CreateFenceError, CreateSemaphoreError, Fence, Semaphore, WaitFenceError,
};

pub const CLEAR_COLOR: [f32; 4] = [1.0, 0.5, 0.25, 1.0];
pub const TRIANGLE_VERTEX_COUNT: u32 = 3;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum FrameResourcesError {
    #[error("Failed to create frame command pool: {0}")]
    CommandPool(#[from] CreateCommandPoolError),

    #[error("Failed to allocate frame command buffer: {0}")]
    CommandBuffer(#[from] AllocateCommandBufferError),

    #[error("Failed to create frame semaphore: {0}")]
    Semaphore(#[from] CreateSemaphoreError),

    #[error("Failed to create in-flight fence: {0}")]
    Fence(#[from] CreateFenceError),
}

#[derive(Debug, Error)]
pub enum FrameSetupError {
    #[error("Failed to create presentation chain: {0}")]
    Surface(#[from] SurfaceError),

    #[error("Failed to create pipeline state: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Failed to create frame resources: {0}")]
    Resources(#[from] FrameResourcesError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordingError {
    #[error("Failed to reset command buffer: {0}")]
    ResetFailed(vk::Result),

    #[error("Failed to begin command buffer: {0}")]
    BeginFailed(vk::Result),

    #[error("Failed to end command buffer: {0}")]
    EndFailed(vk::Result),

    #[error("No framebuffer for swapchain image {0}")]
    MissingFramebuffer(u32),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("Queue submission failed: {0}")]
    QueueSubmitFailed(vk::Result),
}

/// Why a tick stopped.
///
/// [`Throttle`](TickError::Throttle) and [`Present`](TickError::Present)
/// leave the loop usable. The other variants mean the fence was reset with
/// no submission to signal it, so the loop is abandoned.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TickError {
    #[error("Waiting for the previous frame failed: {0}")]
    Throttle(WaitFenceError),

    #[error("Failed to reset in-flight fence: {0}")]
    ResetFence(vk::Result),

    #[error("Failed to acquire swapchain image: {0}")]
    Acquire(vk::Result),

    #[error(transparent)]
    Recording(#[from] RecordingError),

    #[error(transparent)]
    Submit(#[from] SubmitError),

    #[error("Failed to present swapchain image: {0}")]
    Present(vk::Result),

    #[error("An earlier tick stopped in {0:?} with the in-flight fence reset")]
    Abandoned(FrameState),
}

// ---------------------------------------------------------------------------
// FrameResources
// ---------------------------------------------------------------------------

/// The command buffer and sync objects reused by every tick.
pub struct FrameResources {
    command_buffer: ResettableCommandBuffer,
    command_pool: ResettableCommandPool,
    image_available: Semaphore,
    render_finished: Semaphore,
    in_flight: Fence,
}

impl std::fmt::Debug for FrameResources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameResources")
            .field("command_buffer", &self.command_buffer)
            .field("command_pool", &self.command_pool)
            .field("image_available", &self.image_available)
            .field("render_finished", &self.render_finished)
            .field("in_flight", &self.in_flight)
            .finish()
    }
}

impl FrameResources {
    /// The fence starts signaled so the first throttle does not block.
    pub fn new(device: &Arc<Device>) -> Result<Self, FrameResourcesError> {
        let command_pool =
            ResettableCommandPool::new(device, device.queue_families().graphics)?;
        let command_buffer = command_pool.allocate_command_buffer()?;
        Ok(Self {
            command_buffer,
            command_pool,
            image_available: Semaphore::new(device)?,
            render_finished: Semaphore::new(device)?,
            in_flight: Fence::new(device, true)?,
        })
    }

    pub fn command_buffer(&self) -> &ResettableCommandBuffer {
        &self.command_buffer
    }

    pub fn command_pool(&self) -> &ResettableCommandPool {
        &self.command_pool
    }

    pub fn image_available(&self) -> &Semaphore {
        &self.image_available
    }

    pub fn render_finished(&self) -> &Semaphore {
        &self.render_finished
    }

    pub fn in_flight(&self) -> &Fence {
        &self.in_flight
    }
}

// ---------------------------------------------------------------------------
// FrameOps
// ---------------------------------------------------------------------------

/// The GPU operations a tick is made of.
///
/// # Safety
/// Every method is `unsafe` because implementations may assume they are called
/// in [`RenderLoop::tick`]'s order: the fence wait completes before the fence
/// or command buffer is reset, recording only happens between
/// `begin_commands` and `end_commands`, and `present` only follows a
/// successful `submit` for the same image.
pub trait FrameOps {
    unsafe fn wait_in_flight(&mut self, timeout_ns: u64) -> Result<(), WaitFenceError>;
    unsafe fn reset_in_flight(&mut self) -> Result<(), vk::Result>;
    /// Returns `(image_index, suboptimal)`.
    unsafe fn acquire_image(&mut self) -> Result<(u32, bool), vk::Result>;
    unsafe fn reset_commands(&mut self) -> Result<(), vk::Result>;
    unsafe fn begin_commands(&mut self) -> Result<(), vk::Result>;
    unsafe fn begin_render_pass(
        &mut self,
        image_index: u32,
        clear_color: [f32; 4],
    ) -> Result<(), RecordingError>;
    unsafe fn bind_pipeline(&mut self);
    unsafe fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    );
    unsafe fn end_render_pass(&mut self);
    unsafe fn end_commands(&mut self) -> Result<(), vk::Result>;
    unsafe fn submit(&mut self) -> Result<(), vk::Result>;
    /// Returns `true` when the presentation target is suboptimal.
    unsafe fn present(&mut self, image_index: u32) -> Result<bool, vk::Result>;
    fn wait_idle(&self) -> Result<(), vk::Result>;
}

// ---------------------------------------------------------------------------
// RenderLoop
// ---------------------------------------------------------------------------

/// Where the current (or last failed) tick is in the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// Between ticks, or throttling on the fence.
    Idle,
    /// The fence was reset and an image is being acquired.
    Acquiring,
    Recording,
    /// The submission was accepted and the image is being presented.
    Presenting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    pub image_index: u32,
    /// 1 for the first successful tick.
    pub tick: u64,
    pub suboptimal: bool,
}

/// Drives a [`FrameOps`] one frame at a time. Dropping it waits for the
/// device to go idle before the ops (and the GPU objects they own) drop.
pub struct RenderLoop<O: FrameOps> {
    ops: O,
    state: FrameState,
    fence_timeout_ns: u64,
    ticks: u64,
}

impl<O: FrameOps + std::fmt::Debug> std::fmt::Debug for RenderLoop<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderLoop")
            .field("ops", &self.ops)
            .field("state", &self.state)
            .field("fence_timeout_ns", &self.fence_timeout_ns)
            .field("ticks", &self.ticks)
            .finish()
    }
}

impl<O: FrameOps> RenderLoop<O> {
    pub fn new(ops: O) -> Self {
        Self {
            ops,
            state: FrameState::Idle,
            fence_timeout_ns: u64::MAX,
            ticks: 0,
        }
    }

    /// Bound the in-flight fence wait. A wait that runs out reports
    /// [`WaitFenceError::Timeout`] and the tick records nothing.
    pub fn with_fence_timeout(mut self, timeout_ns: u64) -> Self {
        self.fence_timeout_ns = timeout_ns;
        self
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn ops(&self) -> &O {
        &self.ops
    }

    /// Whether an earlier tick reset the fence and never submitted.
    pub fn is_abandoned(&self) -> bool {
        matches!(self.state, FrameState::Acquiring | FrameState::Recording)
    }

    /// Render and present one frame.
    ///
    /// On success the loop is back in [`FrameState::Idle`]. On error
    /// [`state`](Self::state) keeps the phase the tick stopped in and nothing
    /// is retried. A throttle failure or a failed present can be followed by
    /// another tick. Any failure in between abandons the loop and later
    /// ticks return [`TickError::Abandoned`] without touching the GPU.
    pub fn tick(&mut self) -> Result<FrameInfo, TickError> {
        if self.is_abandoned() {
            return Err(TickError::Abandoned(self.state));
        }
        self.state = FrameState::Idle;

        let result = self.run_tick();
        match &result {
            Ok(info) => {
                self.state = FrameState::Idle;
                self.ticks = info.tick;
            }
            Err(e) if self.is_abandoned() => {
                tracing::error!("Render loop abandoned in {:?}: {e}", self.state);
            }
            Err(_) => {}
        }
        result
    }

    fn run_tick(&mut self) -> Result<FrameInfo, TickError> {
        let _span = tracing::trace_span!("tick", tick = self.ticks + 1).entered();

        // SAFETY: first step of the protocol.
        unsafe { self.ops.wait_in_flight(self.fence_timeout_ns) }
            .map_err(TickError::Throttle)?;

        self.state = FrameState::Acquiring;
        // SAFETY: the wait above returned, so the previous submission is done
        // with the fence.
        unsafe { self.ops.reset_in_flight() }.map_err(TickError::ResetFence)?;
        // SAFETY: the previous submission finished, so "image available" has
        // been waited on and is unsignaled again.
        let (image_index, acquire_suboptimal) =
            unsafe { self.ops.acquire_image() }.map_err(TickError::Acquire)?;

        self.state = FrameState::Recording;
        self.record(image_index)?;

        // SAFETY: recording ended successfully for image_index.
        unsafe { self.ops.submit() }.map_err(SubmitError::QueueSubmitFailed)?;

        self.state = FrameState::Presenting;
        // SAFETY: image_index was acquired and submitted this tick.
        let present_suboptimal = unsafe { self.ops.present(image_index) }
            .map_err(TickError::Present)?;

        let suboptimal = acquire_suboptimal || present_suboptimal;
        if suboptimal {
            tracing::warn!(
                "Swapchain is suboptimal for the surface (image {image_index})"
            );
        }

        Ok(FrameInfo {
            image_index,
            tick: self.ticks + 1,
            suboptimal,
        })
    }

    fn record(&mut self, image_index: u32) -> Result<(), RecordingError> {
        // SAFETY: the fence wait completed, so the command buffer is no longer
        // pending and can be reset and recorded.
        unsafe {
            self.ops.reset_commands().map_err(RecordingError::ResetFailed)?;
            self.ops.begin_commands().map_err(RecordingError::BeginFailed)?;
            self.ops.begin_render_pass(image_index, CLEAR_COLOR)?;
            self.ops.bind_pipeline();
            self.ops.draw(TRIANGLE_VERTEX_COUNT, 1, 0, 0);
            self.ops.end_render_pass();
            self.ops.end_commands().map_err(RecordingError::EndFailed)?;
        }
        Ok(())
    }
}

impl<O: FrameOps> Drop for RenderLoop<O> {
    fn drop(&mut self) {
        tracing::debug!("Dropping render loop after {} tick(s)", self.ticks);
        if let Err(e) = self.ops.wait_idle() {
            tracing::error!("Device wait idle failed during teardown: {e}");
        }
    }
}

// ---------------------------------------------------------------------------
// VulkanFrame
// ---------------------------------------------------------------------------

/// [`FrameOps`] over real Vulkan objects.
///
/// Fields are declared in release order: frame resources, pipeline state,
/// the chain, then the device and surface references.
pub struct VulkanFrame<T: HasDisplayHandle + HasWindowHandle> {
    resources: FrameResources,
    pipeline: PipelineState,
    swapchain: Swapchain<T>,
    device: Arc<Device>,
    surface: Arc<Surface<T>>,
}

impl<T: HasDisplayHandle + HasWindowHandle> std::fmt::Debug for VulkanFrame<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanFrame")
            .field("resources", &self.resources)
            .field("pipeline", &self.pipeline)
            .field("swapchain", &self.swapchain)
            .finish_non_exhaustive()
    }
}

impl<T: HasDisplayHandle + HasWindowHandle> VulkanFrame<T> {
    /// Build the chain, pipeline state and frame resources for `surface`.
    pub fn new(
        device: &Arc<Device>,
        surface: &Arc<Surface<T>>,
        desired_extent: vk::Extent2D,
        vertex_spirv: &[u8],
        fragment_spirv: &[u8],
    ) -> Result<Self, FrameSetupError> {
        let mut swapchain = Swapchain::new(device, surface, desired_extent)?;
        let pipeline = PipelineState::new(
            device,
            vertex_spirv,
            fragment_spirv,
            swapchain.extent(),
            swapchain.format(),
        )?;
        swapchain.create_framebuffers(pipeline.render_pass())?;
        let resources = FrameResources::new(device)?;

        Ok(Self {
            resources,
            pipeline,
            swapchain,
            device: Arc::clone(device),
            surface: Arc::clone(surface),
        })
    }

    pub fn swapchain(&self) -> &Swapchain<T> {
        &self.swapchain
    }

    pub fn pipeline(&self) -> &PipelineState {
        &self.pipeline
    }

    pub fn resources(&self) -> &FrameResources {
        &self.resources
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn surface(&self) -> &Arc<Surface<T>> {
        &self.surface
    }
}

impl<T: HasDisplayHandle + HasWindowHandle> FrameOps for VulkanFrame<T> {
    unsafe fn wait_in_flight(&mut self, timeout_ns: u64) -> Result<(), WaitFenceError> {
        self.resources.in_flight.wait(timeout_ns)
    }

    unsafe fn reset_in_flight(&mut self) -> Result<(), vk::Result> {
        // SAFETY: the caller waited on the fence first.
        unsafe { self.resources.in_flight.reset() }
    }

    unsafe fn acquire_image(&mut self) -> Result<(u32, bool), vk::Result> {
        // SAFETY: "image available" was consumed by the previous submission,
        // which the fence wait has seen complete.
        unsafe {
            self.swapchain
                .acquire_next_image(u64::MAX, self.resources.image_available.raw_handle())
        }
    }

    unsafe fn reset_commands(&mut self) -> Result<(), vk::Result> {
        // SAFETY: the fence wait guarantees the buffer is not pending.
        unsafe { self.resources.command_buffer.reset() }
    }

    unsafe fn begin_commands(&mut self) -> Result<(), vk::Result> {
        // SAFETY: the caller reset the buffer just before.
        unsafe { self.resources.command_buffer.begin() }
    }

    unsafe fn begin_render_pass(
        &mut self,
        image_index: u32,
        clear_color: [f32; 4],
    ) -> Result<(), RecordingError> {
        let framebuffer = self
            .swapchain
            .frame(image_index)
            .and_then(|frame| frame.framebuffer())
            .ok_or(RecordingError::MissingFramebuffer(image_index))?;
        // SAFETY: the buffer is recording, and the framebuffer was built
        // against this render pass.
        unsafe {
            self.resources.command_buffer.begin_render_pass(
                self.pipeline.render_pass().raw_handle(),
                framebuffer.raw_handle(),
                self.swapchain.extent(),
                clear_color,
            )
        };
        Ok(())
    }

    unsafe fn bind_pipeline(&mut self) {
        // SAFETY: the buffer is recording and the pipeline comes from the
        // same device.
        unsafe {
            self.resources
                .command_buffer
                .bind_graphics_pipeline(self.pipeline.pipeline().raw_handle())
        }
    }

    unsafe fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        // SAFETY: the caller is inside the render pass with the pipeline bound.
        unsafe {
            self.resources
                .command_buffer
                .draw(vertex_count, instance_count, first_vertex, first_instance)
        }
    }

    unsafe fn end_render_pass(&mut self) {
        // SAFETY: the caller began the render pass.
        unsafe { self.resources.command_buffer.end_render_pass() }
    }

    unsafe fn end_commands(&mut self) -> Result<(), vk::Result> {
        // SAFETY: the caller ended the render pass.
        unsafe { self.resources.command_buffer.end() }
    }

    unsafe fn submit(&mut self) -> Result<(), vk::Result> {
        let wait_semaphores = [self.resources.image_available.raw_handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [self.resources.command_buffer.raw_command_buffer()];
        let signal_semaphores = [self.resources.render_finished.raw_handle()];
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        // SAFETY: the command buffer finished recording, "render finished"
        // was waited on by the previous present, and the fence was reset.
        unsafe {
            self.device.graphics_queue_submit(
                std::slice::from_ref(&submit_info),
                self.resources.in_flight.raw_handle(),
            )
        }
    }

    unsafe fn present(&mut self, image_index: u32) -> Result<bool, vk::Result> {
        // SAFETY: the caller submitted rendering for image_index, signaling
        // "render finished".
        unsafe {
            self.swapchain
                .present(image_index, self.resources.render_finished.raw_handle())
        }
    }

    fn wait_idle(&self) -> Result<(), vk::Result> {
        self.device.wait_idle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Condvar, Mutex};
    use std::time::Duration;

    const TEST_TIMEOUT_NS: u64 = 5_000_000_000;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        WaitFence,
        ResetFence,
        Acquire,
        ResetCommands,
        BeginCommands,
        BeginRenderPass(u32, [f32; 4]),
        BindPipeline,
        Draw(u32, u32, u32, u32),
        EndRenderPass,
        EndCommands,
        Submit,
        Present(u32),
        GpuSignal,
        WaitIdle,
        Destroyed,
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum FailAt {
        Acquire,
        Reset,
        Begin,
        End,
        Submit,
        Present,
    }

    type EventLog = Arc<Mutex<Vec<Event>>>;
    type FenceCell = Arc<(Mutex<bool>, Condvar)>;

    /// Records every call and models the in-flight fence. Submissions leave
    /// the fence unsignaled until the test signals it.
    #[derive(Debug)]
    struct FakeFrame {
        log: EventLog,
        fence: FenceCell,
        next_image: u32,
        image_count: u32,
        fail_at: Option<FailAt>,
        suboptimal_acquire: bool,
        suboptimal_present: bool,
    }

    impl FakeFrame {
        fn new() -> Self {
            Self {
                log: Arc::new(Mutex::new(Vec::new())),
                fence: Arc::new((Mutex::new(true), Condvar::new())),
                next_image: 0,
                image_count: 3,
                fail_at: None,
                suboptimal_acquire: false,
                suboptimal_present: false,
            }
        }

        fn push(&self, event: Event) {
            self.log.lock().unwrap().push(event);
        }

        fn fail(&self, at: FailAt) -> Result<(), vk::Result> {
            match at {
                _ if self.fail_at != Some(at) => Ok(()),
                FailAt::Acquire | FailAt::Present => {
                    Err(vk::Result::ERROR_OUT_OF_DATE_KHR)
                }
                _ => Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY),
            }
        }
    }

    fn signal_fence(fence: &FenceCell, log: &EventLog) {
        let (lock, cvar) = &**fence;
        let mut signaled = lock.lock().unwrap();
        log.lock().unwrap().push(Event::GpuSignal);
        *signaled = true;
        cvar.notify_all();
    }

    fn fence_signaled(fence: &FenceCell) -> bool {
        *fence.0.lock().unwrap()
    }

    impl FrameOps for FakeFrame {
        unsafe fn wait_in_flight(
            &mut self,
            timeout_ns: u64,
        ) -> Result<(), WaitFenceError> {
            self.push(Event::WaitFence);
            let (lock, cvar) = &*self.fence;
            let guard = lock.lock().unwrap();
            let timeout = Duration::from_nanos(timeout_ns);
            let (_guard, result) = cvar
                .wait_timeout_while(guard, timeout, |signaled| !*signaled)
                .unwrap();
            if result.timed_out() {
                Err(WaitFenceError::Timeout)
            } else {
                Ok(())
            }
        }

        unsafe fn reset_in_flight(&mut self) -> Result<(), vk::Result> {
            *self.fence.0.lock().unwrap() = false;
            self.push(Event::ResetFence);
            Ok(())
        }

        unsafe fn acquire_image(&mut self) -> Result<(u32, bool), vk::Result> {
            self.push(Event::Acquire);
            self.fail(FailAt::Acquire)?;
            let index = self.next_image;
            self.next_image = (self.next_image + 1) % self.image_count;
            Ok((index, self.suboptimal_acquire))
        }

        unsafe fn reset_commands(&mut self) -> Result<(), vk::Result> {
            self.push(Event::ResetCommands);
            self.fail(FailAt::Reset)
        }

        unsafe fn begin_commands(&mut self) -> Result<(), vk::Result> {
            self.push(Event::BeginCommands);
            self.fail(FailAt::Begin)
        }

        unsafe fn begin_render_pass(
            &mut self,
            image_index: u32,
            clear_color: [f32; 4],
        ) -> Result<(), RecordingError> {
            self.push(Event::BeginRenderPass(image_index, clear_color));
            Ok(())
        }

        unsafe fn bind_pipeline(&mut self) {
            self.push(Event::BindPipeline);
        }

        unsafe fn draw(
            &mut self,
            vertex_count: u32,
            instance_count: u32,
            first_vertex: u32,
            first_instance: u32,
        ) {
            self.push(Event::Draw(
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            ));
        }

        unsafe fn end_render_pass(&mut self) {
            self.push(Event::EndRenderPass);
        }

        unsafe fn end_commands(&mut self) -> Result<(), vk::Result> {
            self.push(Event::EndCommands);
            self.fail(FailAt::End)
        }

        unsafe fn submit(&mut self) -> Result<(), vk::Result> {
            self.push(Event::Submit);
            self.fail(FailAt::Submit)
        }

        unsafe fn present(&mut self, image_index: u32) -> Result<bool, vk::Result> {
            self.push(Event::Present(image_index));
            self.fail(FailAt::Present)?;
            Ok(self.suboptimal_present)
        }

        fn wait_idle(&self) -> Result<(), vk::Result> {
            self.push(Event::WaitIdle);
            Ok(())
        }
    }

    impl Drop for FakeFrame {
        fn drop(&mut self) {
            self.push(Event::Destroyed);
        }
    }

    fn events(log: &EventLog) -> Vec<Event> {
        log.lock().unwrap().clone()
    }

    fn position(events: &[Event], event: &Event) -> usize {
        events
            .iter()
            .position(|e| e == event)
            .unwrap_or_else(|| panic!("{event:?} not found in {events:?}"))
    }

    #[test]
    fn tick_follows_frame_protocol() {
        let ops = FakeFrame::new();
        let log = Arc::clone(&ops.log);
        let mut render_loop =
            RenderLoop::new(ops).with_fence_timeout(TEST_TIMEOUT_NS);

        let info = render_loop.tick().expect("tick should succeed");

        assert_eq!(
            info,
            FrameInfo {
                image_index: 0,
                tick: 1,
                suboptimal: false
            }
        );
        assert_eq!(render_loop.state(), FrameState::Idle);
        assert_eq!(
            events(&log),
            vec![
                Event::WaitFence,
                Event::ResetFence,
                Event::Acquire,
                Event::ResetCommands,
                Event::BeginCommands,
                Event::BeginRenderPass(0, [1.0, 0.5, 0.25, 1.0]),
                Event::BindPipeline,
                Event::Draw(3, 1, 0, 0),
                Event::EndRenderPass,
                Event::EndCommands,
                Event::Submit,
                Event::Present(0),
            ]
        );
    }

    #[test]
    fn consecutive_ticks_leave_fence_unsignaled_after_throttle() {
        let ops = FakeFrame::new();
        let log = Arc::clone(&ops.log);
        let fence = Arc::clone(&ops.fence);
        let mut render_loop =
            RenderLoop::new(ops).with_fence_timeout(TEST_TIMEOUT_NS);

        render_loop.tick().expect("first tick");
        signal_fence(&fence, &log);
        let second = render_loop.tick().expect("second tick");

        assert_eq!(second.tick, 2);
        assert_eq!(second.image_index, 1);
        assert_eq!(render_loop.ticks(), 2);
        // The second submission has not been signaled yet.
        assert!(!fence_signaled(&fence));
    }

    #[test]
    fn throttle_blocks_until_gpu_signals() {
        let ops = FakeFrame::new();
        let log = Arc::clone(&ops.log);
        let fence = Arc::clone(&ops.fence);
        let mut render_loop =
            RenderLoop::new(ops).with_fence_timeout(TEST_TIMEOUT_NS);

        render_loop.tick().expect("first tick");
        log.lock().unwrap().clear();

        let gpu = {
            let fence = Arc::clone(&fence);
            let log = Arc::clone(&log);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(50));
                signal_fence(&fence, &log);
            })
        };
        render_loop.tick().expect("second tick");
        gpu.join().unwrap();

        let events = events(&log);
        assert_eq!(events[0], Event::WaitFence);
        let signaled = position(&events, &Event::GpuSignal);
        assert!(signaled < position(&events, &Event::ResetCommands));
        assert!(signaled < position(&events, &Event::ResetFence));
    }

    #[test]
    fn throttle_timeout_records_nothing() {
        let ops = FakeFrame::new();
        let log = Arc::clone(&ops.log);
        let mut render_loop =
            RenderLoop::new(ops).with_fence_timeout(10_000_000);

        render_loop.tick().expect("first tick");
        log.lock().unwrap().clear();

        let err = render_loop.tick().expect_err("fence never signaled");

        assert_eq!(err, TickError::Throttle(WaitFenceError::Timeout));
        assert_eq!(events(&log), vec![Event::WaitFence]);
        assert_eq!(render_loop.state(), FrameState::Idle);
        assert_eq!(render_loop.ticks(), 1);
    }

    #[test]
    fn drop_waits_for_idle_before_destroying() {
        let ops = FakeFrame::new();
        let log = Arc::clone(&ops.log);
        let mut render_loop =
            RenderLoop::new(ops).with_fence_timeout(TEST_TIMEOUT_NS);

        // Leaves a submission outstanding.
        render_loop.tick().expect("tick");
        drop(render_loop);

        let events = events(&log);
        let tail = &events[events.len() - 2..];
        assert_eq!(tail, &[Event::WaitIdle, Event::Destroyed]);
    }

    #[test]
    fn recording_failures_map_and_skip_submit() {
        let oom = vk::Result::ERROR_OUT_OF_DEVICE_MEMORY;
        let cases = [
            (FailAt::Reset, RecordingError::ResetFailed(oom)),
            (FailAt::Begin, RecordingError::BeginFailed(oom)),
            (FailAt::End, RecordingError::EndFailed(oom)),
        ];

        for (fail_at, expected) in cases {
            let mut ops = FakeFrame::new();
            ops.fail_at = Some(fail_at);
            let log = Arc::clone(&ops.log);
            let mut render_loop =
            RenderLoop::new(ops).with_fence_timeout(TEST_TIMEOUT_NS);

            let err = render_loop.tick().expect_err("recording should fail");

            assert_eq!(err, TickError::Recording(expected));
            assert!(
                !events(&log).contains(&Event::Submit),
                "{fail_at:?} still submitted"
            );
            assert_eq!(render_loop.state(), FrameState::Recording);
            assert_eq!(render_loop.ticks(), 0);
        }
    }

    #[test]
    fn submit_failure_maps_and_skips_present() {
        let mut ops = FakeFrame::new();
        ops.fail_at = Some(FailAt::Submit);
        let log = Arc::clone(&ops.log);
        let mut render_loop =
            RenderLoop::new(ops).with_fence_timeout(TEST_TIMEOUT_NS);

        let err = render_loop.tick().expect_err("submit should fail");

        let oom = vk::Result::ERROR_OUT_OF_DEVICE_MEMORY;
        assert_eq!(err, TickError::Submit(SubmitError::QueueSubmitFailed(oom)));
        assert!(!events(&log).iter().any(|e| matches!(e, Event::Present(_))));
        assert!(render_loop.is_abandoned());
    }

    #[test]
    fn tick_after_unsubmitted_failure_does_not_wait() {
        let mut ops = FakeFrame::new();
        ops.fail_at = Some(FailAt::Begin);
        let log = Arc::clone(&ops.log);
        let mut render_loop =
            RenderLoop::new(ops).with_fence_timeout(TEST_TIMEOUT_NS);

        let first = render_loop.tick().expect_err("begin should fail");
        assert_eq!(
            first,
            TickError::Recording(RecordingError::BeginFailed(
                vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
            ))
        );
        assert!(render_loop.is_abandoned());
        log.lock().unwrap().clear();

        let second = render_loop.tick().expect_err("loop is abandoned");
        assert_eq!(second, TickError::Abandoned(FrameState::Recording));
        assert!(events(&log).is_empty());
        assert_eq!(render_loop.ticks(), 0);
    }

    #[test]
    fn acquire_failure_maps_and_abandons_loop() {
        let mut ops = FakeFrame::new();
        ops.fail_at = Some(FailAt::Acquire);
        let log = Arc::clone(&ops.log);
        let mut render_loop =
            RenderLoop::new(ops).with_fence_timeout(TEST_TIMEOUT_NS);

        let err = render_loop.tick().expect_err("acquire should fail");

        assert_eq!(err, TickError::Acquire(vk::Result::ERROR_OUT_OF_DATE_KHR));
        assert_eq!(
            events(&log),
            vec![Event::WaitFence, Event::ResetFence, Event::Acquire]
        );
        assert_eq!(render_loop.state(), FrameState::Acquiring);
        assert_eq!(
            render_loop.tick(),
            Err(TickError::Abandoned(FrameState::Acquiring))
        );
    }

    #[test]
    fn present_failure_maps_and_loop_continues() {
        let mut ops = FakeFrame::new();
        ops.fail_at = Some(FailAt::Present);
        let log = Arc::clone(&ops.log);
        let fence = Arc::clone(&ops.fence);
        let mut render_loop =
            RenderLoop::new(ops).with_fence_timeout(TEST_TIMEOUT_NS);

        let err = render_loop.tick().expect_err("present should fail");

        assert_eq!(err, TickError::Present(vk::Result::ERROR_OUT_OF_DATE_KHR));
        assert_eq!(render_loop.state(), FrameState::Presenting);
        assert!(!render_loop.is_abandoned());
        assert_eq!(render_loop.ticks(), 0);

        // The submission still signals the fence, so the next tick proceeds
        // as far as present again.
        signal_fence(&fence, &log);
        log.lock().unwrap().clear();
        let again = render_loop.tick().expect_err("present fails again");
        assert_eq!(again, TickError::Present(vk::Result::ERROR_OUT_OF_DATE_KHR));
        assert!(events(&log).contains(&Event::Submit));
        assert_eq!(events(&log).last(), Some(&Event::Present(1)));
    }

    #[test]
    fn suboptimal_acquire_or_present_is_reported() {
        for (acquire, present) in [(true, false), (false, true), (true, true)] {
            let mut ops = FakeFrame::new();
            ops.suboptimal_acquire = acquire;
            ops.suboptimal_present = present;
            let mut render_loop =
                RenderLoop::new(ops).with_fence_timeout(TEST_TIMEOUT_NS);

            let info = render_loop.tick().expect("suboptimal is not an error");

            assert!(info.suboptimal, "acquire {acquire}, present {present}");
            assert_eq!(render_loop.state(), FrameState::Idle);
        }
    }
}
