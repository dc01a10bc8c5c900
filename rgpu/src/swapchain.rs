//! The presentation chain: a fixed-size swapchain plus one view and (once the
//! render pass is known) one framebuffer per image.
//!
//! All of the choices made from the surface's reported support live in small
//! pure `choose_*` functions so they can be tested without a device.

use std::sync::Arc;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use thiserror::Error;

use crate::device::{Device, QueueFamilyIndices};
use crate::render_pass::{CreateFramebufferError, Framebuffer, RenderPass};
use crate::surface::{Surface, SurfaceQueryError};

#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("Device and surface were created from different instances")]
    MismatchedParams,

    #[error("No supported surface formats were reported")]
    NoSurfaceFormats,

    #[error("No supported present modes were reported")]
    NoPresentModes,

    #[error("Invalid requested swapchain extent ({width}x{height})")]
    InvalidExtent { width: u32, height: u32 },

    #[error("Failed while querying surface support details: {0}")]
    SurfaceQuery(#[from] SurfaceQueryError),

    #[error("Vulkan error creating swapchain: {0}")]
    ChainCreationFailed(vk::Result),

    #[error("Vulkan error fetching swapchain images: {0}")]
    ImageQueryFailed(vk::Result),

    #[error("Vulkan error creating swapchain image view: {0}")]
    ImageViewCreationFailed(vk::Result),

    #[error("Failed to create swapchain framebuffer: {0}")]
    FramebufferCreationFailed(#[from] CreateFramebufferError),
}

// ---------------------------------------------------------------------------
// Surface support choices
// ---------------------------------------------------------------------------

/// `B8G8R8A8_UNORM` in `SRGB_NONLINEAR` if listed, else the first format.
pub fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_UNORM
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first().copied())
}

/// `MAILBOX` if listed, else `FIFO` (which every surface supports).
pub fn choose_present_mode(present_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    present_modes
        .iter()
        .copied()
        .find(|m| *m == vk::PresentModeKHR::MAILBOX)
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// The surface's current extent when it dictates one, otherwise `desired`
/// clamped per axis into the supported range.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    desired: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }
    let min = capabilities.min_image_extent;
    let max = capabilities.max_image_extent;
    // max/min rather than clamp: a driver reporting min > max must not panic.
    vk::Extent2D {
        width: desired.width.max(min.width).min(max.width),
        height: desired.height.max(min.height).min(max.height),
    }
}

/// One more than the minimum, capped at the maximum. A maximum of 0 means the
/// surface sets no upper bound.
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let image_count = capabilities.min_image_count.saturating_add(1);
    if capabilities.max_image_count > 0 {
        image_count.min(capabilities.max_image_count)
    } else {
        image_count
    }
}

pub fn choose_composite_alpha(
    capabilities: &vk::SurfaceCapabilitiesKHR,
) -> vk::CompositeAlphaFlagsKHR {
    [
        vk::CompositeAlphaFlagsKHR::OPAQUE,
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
    ]
    .into_iter()
    .find(|mode| capabilities.supported_composite_alpha.contains(*mode))
    .unwrap_or(vk::CompositeAlphaFlagsKHR::INHERIT)
}

/// Exclusive ownership when one family does both jobs, otherwise concurrent
/// sharing between the graphics and present families.
pub fn choose_sharing(families: QueueFamilyIndices) -> (vk::SharingMode, Vec<u32>) {
    if families.is_shared() {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    } else {
        (vk::SharingMode::CONCURRENT, families.unique())
    }
}

fn log_surface_support(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    formats: &[vk::SurfaceFormatKHR],
    present_modes: &[vk::PresentModeKHR],
) {
    tracing::debug!(
        "Surface image count: min {}, max {}",
        capabilities.min_image_count,
        capabilities.max_image_count
    );
    tracing::debug!(
        "Surface extent: current {:?}, min {:?}, max {:?}",
        capabilities.current_extent,
        capabilities.min_image_extent,
        capabilities.max_image_extent
    );
    tracing::debug!(
        "Surface transforms: supported {:?}, current {:?}",
        capabilities.supported_transforms,
        capabilities.current_transform
    );
    tracing::debug!(
        "Surface composite alpha: {:?}",
        capabilities.supported_composite_alpha
    );
    tracing::debug!("Surface image usage: {:?}", capabilities.supported_usage_flags);
    for format in formats {
        tracing::debug!("Surface format: {:?} / {:?}", format.format, format.color_space);
    }
    tracing::debug!("Surface present modes: {:?}", present_modes);
}

fn create_default_swapchain_image_views<FCreate, FDestroy>(
    images: &[vk::Image],
    format: vk::Format,
    mut create_image_view: FCreate,
    mut destroy_image_view: FDestroy,
) -> Result<Vec<vk::ImageView>, SurfaceError>
where
    FCreate: FnMut(&vk::ImageViewCreateInfo<'_>) -> Result<vk::ImageView, vk::Result>,
    FDestroy: FnMut(vk::ImageView),
{
    let mut image_views: Vec<vk::ImageView> = Vec::with_capacity(images.len());
    for image in images.iter().copied() {
        let create_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping::default())
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1),
            );

        match create_image_view(&create_info) {
            Ok(view) => image_views.push(view),
            Err(e) => {
                for created_view in image_views.drain(..) {
                    destroy_image_view(created_view);
                }
                return Err(SurfaceError::ImageViewCreationFailed(e));
            }
        }
    }

    Ok(image_views)
}

// ---------------------------------------------------------------------------
// Swapchain
// ---------------------------------------------------------------------------

/// One presentable image with its view and, after
/// [`Swapchain::create_framebuffers`], its framebuffer.
#[derive(Debug)]
pub struct SwapchainFrame {
    framebuffer: Option<Framebuffer>,
    view: vk::ImageView,
    image: vk::Image,
}

impl SwapchainFrame {
    pub fn image(&self) -> vk::Image {
        self.image
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn framebuffer(&self) -> Option<&Framebuffer> {
        self.framebuffer.as_ref()
    }
}

pub struct Swapchain<T: HasDisplayHandle + HasWindowHandle> {
    parent_device: Arc<Device>,
    parent_surface: Arc<Surface<T>>,
    handle: vk::SwapchainKHR,
    surface_format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
    frames: Vec<SwapchainFrame>,
}

impl<T: HasDisplayHandle + HasWindowHandle> std::fmt::Debug for Swapchain<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Swapchain")
            .field("handle", &self.handle)
            .field("format", &self.surface_format.format)
            .field("present_mode", &self.present_mode)
            .field("extent", &self.extent)
            .field("image_count", &self.frames.len())
            .finish_non_exhaustive()
    }
}

impl<T: HasDisplayHandle + HasWindowHandle> Swapchain<T> {
    /// Build the chain for `parent_surface` at (about) `desired_extent`.
    ///
    /// The chain is never recreated, so the extent chosen here is final.
    pub fn new(
        parent_device: &Arc<Device>,
        parent_surface: &Arc<Surface<T>>,
        desired_extent: vk::Extent2D,
    ) -> Result<Self, SurfaceError> {
        if desired_extent.width == 0 || desired_extent.height == 0 {
            return Err(SurfaceError::InvalidExtent {
                width: desired_extent.width,
                height: desired_extent.height,
            });
        }
        if !Arc::ptr_eq(parent_surface.get_parent(), parent_device.get_parent()) {
            return Err(SurfaceError::MismatchedParams);
        }
        let _span = tracing::debug_span!(
            "create_swapchain",
            requested_width = desired_extent.width,
            requested_height = desired_extent.height
        )
        .entered();

        let physical_device = parent_device.physical_device();
        // SAFETY: physical_device belongs to parent_device's instance, and
        // parent_surface comes from the same instance (checked above).
        let capabilities = unsafe { parent_surface.query_capabilities(physical_device) }?;
        // SAFETY: same as above.
        let formats = unsafe { parent_surface.query_formats(physical_device) }?;
        // SAFETY: same as above.
        let present_modes =
            unsafe { parent_surface.query_present_modes(physical_device) }?;
        log_surface_support(&capabilities, &formats, &present_modes);

        let surface_format =
            choose_surface_format(&formats).ok_or(SurfaceError::NoSurfaceFormats)?;
        if present_modes.is_empty() {
            return Err(SurfaceError::NoPresentModes);
        }
        let present_mode = choose_present_mode(&present_modes);
        let extent = choose_extent(&capabilities, desired_extent);
        let image_count = choose_image_count(&capabilities);
        let composite_alpha = choose_composite_alpha(&capabilities);
        let (sharing_mode, queue_family_indices) =
            choose_sharing(parent_device.queue_families());

        tracing::info!(
            "Swapchain: {:?}/{:?}, {:?}, {}x{}, {} image(s), {:?}",
            surface_format.format,
            surface_format.color_space,
            present_mode,
            extent.width,
            extent.height,
            image_count,
            sharing_mode,
        );

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(parent_surface.raw_handle())
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(&queue_family_indices)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(composite_alpha)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());

        // SAFETY: create_info references a live surface and values picked
        // from what that surface reported.
        let handle = unsafe { parent_device.create_raw_swapchain(&create_info) }
            .map_err(SurfaceError::ChainCreationFailed)?;

        // SAFETY: handle was just created from parent_device.
        let images = match unsafe { parent_device.get_raw_swapchain_images(handle) } {
            Ok(images) => images,
            Err(e) => {
                // SAFETY: handle has no children yet.
                unsafe { parent_device.destroy_raw_swapchain(handle) };
                return Err(SurfaceError::ImageQueryFailed(e));
            }
        };

        let views = create_default_swapchain_image_views(
            &images,
            surface_format.format,
            // SAFETY: create_info references a swapchain image owned by
            // parent_device.
            |create_info| unsafe { parent_device.create_raw_image_view(create_info) },
            // SAFETY: the view was created above and nothing uses it yet.
            |view| unsafe { parent_device.destroy_raw_image_view(view) },
        )
        .inspect_err(|_| {
            // SAFETY: the helper already destroyed every view it made.
            unsafe { parent_device.destroy_raw_swapchain(handle) };
        })?;

        let frames = images
            .into_iter()
            .zip(views)
            .map(|(image, view)| SwapchainFrame {
                framebuffer: None,
                view,
                image,
            })
            .collect();

        Ok(Self {
            parent_device: Arc::clone(parent_device),
            parent_surface: Arc::clone(parent_surface),
            handle,
            surface_format,
            present_mode,
            extent,
            frames,
        })
    }

    /// Build one framebuffer per frame against `render_pass` at the chain's
    /// extent. Any framebuffers from an earlier call are replaced.
    pub fn create_framebuffers(
        &mut self,
        render_pass: &RenderPass,
    ) -> Result<(), SurfaceError> {
        let mut framebuffers = Vec::with_capacity(self.frames.len());
        for frame in &self.frames {
            // SAFETY: frame.view was created from parent_device and lives
            // until this swapchain drops, after its framebuffer.
            let framebuffer = unsafe {
                Framebuffer::new(
                    &self.parent_device,
                    render_pass,
                    frame.view,
                    self.extent,
                )
            }?;
            framebuffers.push(framebuffer);
        }
        for (frame, framebuffer) in self.frames.iter_mut().zip(framebuffers) {
            frame.framebuffer = Some(framebuffer);
        }
        Ok(())
    }

    /// Returns `(image_index, suboptimal)`.
    ///
    /// # Safety
    /// `signal` must be an unsignaled semaphore from this chain's device with
    /// no pending wait.
    pub unsafe fn acquire_next_image(
        &self,
        timeout_ns: u64,
        signal: vk::Semaphore,
    ) -> Result<(u32, bool), vk::Result> {
        // SAFETY: Caller guarantees semaphore state; self.handle is live.
        unsafe {
            self.parent_device.acquire_next_swapchain_image(
                self.handle,
                timeout_ns,
                signal,
                vk::Fence::null(),
            )
        }
    }

    /// Queue `image_index` for display once `wait` is signaled. Returns
    /// `Ok(true)` when the chain is suboptimal.
    ///
    /// # Safety
    /// `image_index` must have been acquired and rendered into, with the
    /// rendering submission signaling `wait`.
    pub unsafe fn present(
        &self,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> Result<bool, vk::Result> {
        let wait_semaphores = [wait];
        let swapchains = [self.handle];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);
        // SAFETY: Caller guarantees the image was acquired and the semaphore
        // will be signaled.
        unsafe { self.parent_device.queue_present(&present_info) }
    }

    pub fn frames(&self) -> &[SwapchainFrame] {
        &self.frames
    }

    pub fn frame(&self, image_index: u32) -> Option<&SwapchainFrame> {
        self.frames.get(image_index as usize)
    }

    pub fn format(&self) -> vk::Format {
        self.surface_format.format
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn raw_handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    pub fn surface(&self) -> &Arc<Surface<T>> {
        &self.parent_surface
    }
}

impl<T: HasDisplayHandle + HasWindowHandle> Drop for Swapchain<T> {
    fn drop(&mut self) {
        tracing::debug!("Dropping swapchain {:?}", self.handle);
        for mut frame in self.frames.drain(..) {
            drop(frame.framebuffer.take());
            tracing::debug!("Dropping image view {:?}", frame.view);
            // SAFETY: the framebuffer using this view was just dropped, and
            // owners wait for device idle before dropping the chain.
            unsafe { self.parent_device.destroy_raw_image_view(frame.view) };
        }
        // SAFETY: every view is gone; this is the final use of the handle.
        unsafe { self.parent_device.destroy_raw_swapchain(self.handle) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;
    use std::cell::RefCell;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    fn surface_format(
        format: vk::Format,
        color_space: vk::ColorSpaceKHR,
    ) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR { format, color_space }
    }

    #[test]
    fn choose_surface_format_prefers_bgra_srgb() {
        let srgb = vk::ColorSpaceKHR::SRGB_NONLINEAR;
        let fallback = surface_format(vk::Format::R8G8B8A8_UNORM, srgb);
        let preferred = surface_format(vk::Format::B8G8R8A8_UNORM, srgb);

        assert_eq!(
            choose_surface_format(&[fallback, preferred]),
            Some(preferred)
        );
    }

    #[test]
    fn choose_surface_format_falls_back_to_first() {
        let first = surface_format(
            vk::Format::R8G8B8A8_SRGB,
            vk::ColorSpaceKHR::SRGB_NONLINEAR,
        );
        // Right format, wrong color space.
        let second = surface_format(
            vk::Format::B8G8R8A8_UNORM,
            vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT,
        );

        assert_eq!(choose_surface_format(&[first, second]), Some(first));
        assert_eq!(choose_surface_format(&[]), None);
    }

    #[test]
    fn choose_present_mode_prefers_mailbox() {
        let chosen = choose_present_mode(&[
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::MAILBOX,
        ]);
        assert_eq!(chosen, vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn choose_present_mode_never_picks_a_third_mode() {
        let chosen = choose_present_mode(&[
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::FIFO_RELAXED,
        ]);
        assert_eq!(chosen, vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn choose_extent_uses_current_when_fixed() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: extent(1280, 720),
            ..Default::default()
        };

        let chosen = choose_extent(&capabilities, extent(1920, 1080));
        assert_eq!(chosen, extent(1280, 720));
        // Feeding the answer back in gives the same answer.
        assert_eq!(choose_extent(&capabilities, chosen), chosen);
    }

    #[test]
    fn choose_extent_clamps_each_axis_when_variable() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: extent(640, 480),
            max_image_extent: extent(1920, 1080),
            ..Default::default()
        };

        let chosen = choose_extent(&capabilities, extent(4000, 200));
        assert_eq!(chosen, extent(1920, 480));

        let inside = choose_extent(&capabilities, extent(800, 600));
        assert_eq!(inside, extent(800, 600));
    }

    #[test]
    fn choose_image_count_adds_one_within_bounds() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 4,
            ..Default::default()
        };
        assert_eq!(choose_image_count(&capabilities), 3);
    }

    #[test]
    fn choose_image_count_respects_max_when_set() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 3,
            max_image_count: 3,
            ..Default::default()
        };
        assert_eq!(choose_image_count(&capabilities), 3);
    }

    #[test]
    fn choose_image_count_treats_zero_max_as_unbounded() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(choose_image_count(&capabilities), 3);
    }

    #[test]
    fn choose_composite_alpha_prefers_opaque_then_pre_multiplied() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            supported_composite_alpha: vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED
                | vk::CompositeAlphaFlagsKHR::OPAQUE,
            ..Default::default()
        };
        assert_eq!(
            choose_composite_alpha(&capabilities),
            vk::CompositeAlphaFlagsKHR::OPAQUE
        );

        let capabilities = vk::SurfaceCapabilitiesKHR {
            supported_composite_alpha: vk::CompositeAlphaFlagsKHR::INHERIT,
            ..Default::default()
        };
        assert_eq!(
            choose_composite_alpha(&capabilities),
            vk::CompositeAlphaFlagsKHR::INHERIT
        );
    }

    #[test]
    fn choose_sharing_is_exclusive_for_one_family() {
        let (mode, indices) = choose_sharing(QueueFamilyIndices {
            graphics: 1,
            present: 1,
        });
        assert_eq!(mode, vk::SharingMode::EXCLUSIVE);
        assert!(indices.is_empty());
    }

    #[test]
    fn choose_sharing_is_concurrent_across_families() {
        let (mode, indices) = choose_sharing(QueueFamilyIndices {
            graphics: 0,
            present: 2,
        });
        assert_eq!(mode, vk::SharingMode::CONCURRENT);
        assert_eq!(indices, vec![0, 2]);
    }

    #[test]
    fn image_view_helper_cleans_up_on_partial_failure() {
        let images = [
            vk::Image::from_raw(1),
            vk::Image::from_raw(2),
            vk::Image::from_raw(3),
        ];
        let created_views = [vk::ImageView::from_raw(10), vk::ImageView::from_raw(11)];
        let create_calls = RefCell::new(0usize);
        let destroyed = RefCell::new(Vec::<vk::ImageView>::new());

        let result = create_default_swapchain_image_views(
            &images,
            vk::Format::B8G8R8A8_UNORM,
            |_| {
                let mut call = create_calls.borrow_mut();
                let ret = match *call {
                    0 | 1 => Ok(created_views[*call]),
                    _ => Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY),
                };
                *call += 1;
                ret
            },
            |view| destroyed.borrow_mut().push(view),
        );

        assert!(matches!(
            result,
            Err(SurfaceError::ImageViewCreationFailed(
                vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
            ))
        ));
        assert_eq!(destroyed.borrow().as_slice(), &created_views);
    }

    #[test]
    fn image_view_helper_builds_identity_2d_color_views() {
        let images = [vk::Image::from_raw(1), vk::Image::from_raw(2)];
        let seen = RefCell::new(Vec::new());

        let result = create_default_swapchain_image_views(
            &images,
            vk::Format::B8G8R8A8_UNORM,
            |create_info| {
                let range = create_info.subresource_range;
                assert_eq!(create_info.view_type, vk::ImageViewType::TYPE_2D);
                assert_eq!(create_info.format, vk::Format::B8G8R8A8_UNORM);
                assert_eq!(create_info.components.r, vk::ComponentSwizzle::IDENTITY);
                assert_eq!(range.aspect_mask, vk::ImageAspectFlags::COLOR);
                assert_eq!((range.level_count, range.layer_count), (1, 1));
                seen.borrow_mut().push(create_info.image);
                Ok(vk::ImageView::from_raw(100 + seen.borrow().len() as u64))
            },
            |_view| panic!("destroy callback should not be called on success"),
        )
        .expect("helper should succeed");

        assert_eq!(result, [vk::ImageView::from_raw(101), vk::ImageView::from_raw(102)]);
        assert_eq!(seen.borrow().as_slice(), &images);
    }

    #[test]
    fn surface_query_failure_keeps_vulkan_result() {
        let lost = vk::Result::ERROR_SURFACE_LOST_KHR;
        let err = SurfaceError::from(SurfaceQueryError::Vulkan(lost));
        assert!(matches!(
            err,
            SurfaceError::SurfaceQuery(SurfaceQueryError::Vulkan(r)) if r == lost
        ));
    }
}
