//! Thin RAII wrappers over `ash` for drawing a single triangle per frame.
//!
//! Object hierarchy (each arrow is an `Arc` to the parent):
//!
//! ```text
//! Instance <- Surface<T> <- Swapchain<T>
//!    ^                         |
//!    +------- Device <---------+ <- RenderPass, PipelineState,
//!                                   FrameResources, ...
//! ```
//!
//! [`frame::RenderLoop`] drives a [`frame::FrameOps`] one tick at a time and
//! waits for the device to go idle before anything is released.
//!
//! `rgpu` naming conventions:
//! - `raw_*` accessors return the Vulkan handle type from `ash::vk`.
//! - `ash_*` accessors return the corresponding `ash` wrapper object.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::undocumented_unsafe_blocks)]

pub mod command;
pub mod device;
pub mod frame;
pub mod instance;
pub mod log;
pub mod pipeline;
pub mod render_pass;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use ash;
pub use raw_window_handle::HandleError as RWHHandleError;
