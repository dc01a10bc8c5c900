use std::sync::Arc;

use ash::vk;
use thiserror::Error;

use crate::device::Device;
use crate::render_pass::{CreateRenderPassError, RenderPass};
use crate::shader::{EntryPoint, ShaderError, ShaderModule, ShaderStage};

pub const VERTEX_ENTRY_POINT: &str = "vertexMain";
pub const FRAGMENT_ENTRY_POINT: &str = "fragmentMain";

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Shader error: {0}")]
    Shader(#[from] ShaderError),

    #[error("Invalid shader entry point name: {0}")]
    EntryPointName(#[from] std::ffi::NulError),

    #[error("Failed to create render pass: {0}")]
    RenderPassCreation(#[from] CreateRenderPassError),

    #[error("Vulkan error creating empty pipeline layout: {0}")]
    LayoutCreation(vk::Result),

    #[error("Vulkan error creating graphics pipeline: {0}")]
    PipelineCreation(vk::Result),
}

// ---------------------------------------------------------------------------
// PipelineLayout
// ---------------------------------------------------------------------------

/// An owned `VkPipelineLayout`, shareable between pipelines through an `Arc`.
pub struct PipelineLayout {
    parent: Arc<Device>,
    handle: vk::PipelineLayout,
}

impl std::fmt::Debug for PipelineLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineLayout")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl PipelineLayout {
    /// No descriptor sets, no push constants.
    pub fn new_empty(device: &Arc<Device>) -> Result<Self, vk::Result> {
        let create_info = vk::PipelineLayoutCreateInfo::default();
        // SAFETY: create_info is default-initialised and borrows nothing.
        let handle = unsafe { device.create_raw_pipeline_layout(&create_info) }?;
        Ok(Self {
            parent: Arc::clone(device),
            handle,
        })
    }

    pub fn raw_handle(&self) -> vk::PipelineLayout {
        self.handle
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        tracing::debug!("Dropping pipeline layout {:?}", self.handle);
        // SAFETY: handle was created from parent. Pipelines hold an Arc to
        // their layout, so none remain.
        unsafe { self.parent.destroy_raw_pipeline_layout(self.handle) };
    }
}

// ---------------------------------------------------------------------------
// GraphicsPipelineDesc
// ---------------------------------------------------------------------------

/// Description of a [`GraphicsPipeline`] drawn inside subpass 0 of
/// `render_pass` with a viewport fixed at `extent`.
///
/// [`GraphicsPipelineDesc::new`] fills the rasterizer settings with `FILL`,
/// no culling and clockwise front faces.
pub struct GraphicsPipelineDesc<'a> {
    pub stages: &'a [EntryPoint<'a>],

    pub render_pass: &'a RenderPass,

    /// Viewport and scissor size. Baked in; there is no dynamic state.
    pub extent: vk::Extent2D,

    /// `None` creates an empty layout owned by the pipeline.
    pub layout: Option<Arc<PipelineLayout>>,

    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
}

impl<'a> GraphicsPipelineDesc<'a> {
    pub fn new(
        stages: &'a [EntryPoint<'a>],
        render_pass: &'a RenderPass,
        extent: vk::Extent2D,
    ) -> Self {
        Self {
            stages,
            render_pass,
            extent,
            layout: None,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::NONE,
            front_face: vk::FrontFace::CLOCKWISE,
        }
    }
}

/// Full-target viewport and scissor for `extent`.
fn fixed_viewport(extent: vk::Extent2D) -> (vk::Viewport, vk::Rect2D) {
    let viewport = vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    };
    let scissor = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    };
    (viewport, scissor)
}

fn opaque_color_blend_attachment() -> vk::PipelineColorBlendAttachmentState {
    vk::PipelineColorBlendAttachmentState::default()
        .blend_enable(false)
        .color_write_mask(vk::ColorComponentFlags::RGBA)
}

// ---------------------------------------------------------------------------
// GraphicsPipeline
// ---------------------------------------------------------------------------

/// A render-pass graphics pipeline with fixed viewport state.
///
/// Fixed state:
/// - Vertex input: none, the vertex shader generates positions
/// - Input assembly: `TRIANGLE_LIST`
/// - Viewport/scissor: static, covering the whole extent
/// - Multisample: single sample
/// - Color blend: one attachment, blending off, full RGBA write mask
pub struct GraphicsPipeline {
    parent: Arc<Device>,
    handle: vk::Pipeline,
    layout: Arc<PipelineLayout>,
}

impl std::fmt::Debug for GraphicsPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicsPipeline")
            .field("handle", &self.handle)
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

impl GraphicsPipeline {
    pub fn new(
        device: &Arc<Device>,
        desc: &GraphicsPipelineDesc<'_>,
    ) -> Result<Self, PipelineError> {
        let layout = match &desc.layout {
            Some(l) => Arc::clone(l),
            None => Arc::new(
                PipelineLayout::new_empty(device)
                    .map_err(PipelineError::LayoutCreation)?,
            ),
        };

        let stage_create_infos: Vec<vk::PipelineShaderStageCreateInfo<'_>> = desc
            .stages
            .iter()
            .map(|ep| ep.as_pipeline_stage_create_info())
            .collect();

        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default();

        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        let (viewport, scissor) = fixed_viewport(desc.extent);
        let viewports = [viewport];
        let scissors = [scissor];
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewports(&viewports)
            .scissors(&scissors);

        let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(desc.polygon_mode)
            .cull_mode(desc.cull_mode)
            .front_face(desc.front_face)
            .line_width(1.0);

        let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let color_blend_attachments = [opaque_color_blend_attachment()];
        let color_blend_state = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let create_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stage_create_infos)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .color_blend_state(&color_blend_state)
            .layout(layout.raw_handle())
            .render_pass(desc.render_pass.raw_handle())
            .subpass(0);

        // SAFETY: create_info borrows shader stages, a layout and a render
        // pass that all come from device and outlive this call.
        let handle = unsafe { device.create_raw_graphics_pipeline(&create_info) }
            .map_err(PipelineError::PipelineCreation)?;

        Ok(Self {
            parent: Arc::clone(device),
            handle,
            layout,
        })
    }

    pub fn raw_handle(&self) -> vk::Pipeline {
        self.handle
    }

    pub fn layout(&self) -> &Arc<PipelineLayout> {
        &self.layout
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        tracing::debug!("Dropping pipeline {:?}", self.handle);
        // SAFETY: handle was created from parent and the owner waited for
        // device idle. The layout Arc is released after this.
        unsafe { self.parent.destroy_raw_pipeline(self.handle) };
    }
}

// ---------------------------------------------------------------------------
// PipelineState
// ---------------------------------------------------------------------------

/// The render pass and the triangle pipeline built against it.
pub struct PipelineState {
    // Declared first: the pipeline must go before its render pass.
    pipeline: GraphicsPipeline,
    render_pass: RenderPass,
    extent: vk::Extent2D,
}

impl std::fmt::Debug for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineState")
            .field("pipeline", &self.pipeline)
            .field("render_pass", &self.render_pass)
            .field("extent", &self.extent)
            .finish()
    }
}

impl PipelineState {
    /// Build the render pass for `format` and a pipeline from the
    /// `vertexMain`/`fragmentMain` entry points of the given SPIR-V.
    ///
    /// The shader modules only live for the duration of this call.
    pub fn new(
        device: &Arc<Device>,
        vertex_spirv: &[u8],
        fragment_spirv: &[u8],
        extent: vk::Extent2D,
        format: vk::Format,
    ) -> Result<Self, PipelineError> {
        let _span = tracing::debug_span!("create_pipeline_state").entered();

        let render_pass = RenderPass::new_present_color(device, format)?;

        let vertex_module = ShaderModule::new(device, vertex_spirv)?;
        let fragment_module = ShaderModule::new(device, fragment_spirv)?;
        let stages = [
            vertex_module.entry_point(VERTEX_ENTRY_POINT, ShaderStage::Vertex)?,
            fragment_module.entry_point(FRAGMENT_ENTRY_POINT, ShaderStage::Fragment)?,
        ];

        let desc = GraphicsPipelineDesc::new(&stages, &render_pass, extent);
        let pipeline = GraphicsPipeline::new(device, &desc)?;
        tracing::debug!(
            "Created pipeline {:?} for {:?} at {}x{}",
            pipeline.raw_handle(),
            format,
            extent.width,
            extent.height
        );

        Ok(Self {
            pipeline,
            render_pass,
            extent,
        })
    }

    pub fn pipeline(&self) -> &GraphicsPipeline {
        &self.pipeline
    }

    pub fn render_pass(&self) -> &RenderPass {
        &self.render_pass
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewport_covers_extent_with_unit_depth() {
        let extent = vk::Extent2D {
            width: 640,
            height: 480,
        };
        let (viewport, scissor) = fixed_viewport(extent);

        assert_eq!((viewport.x, viewport.y), (0.0, 0.0));
        assert_eq!((viewport.width, viewport.height), (640.0, 480.0));
        assert_eq!((viewport.min_depth, viewport.max_depth), (0.0, 1.0));
        assert_eq!(scissor.offset, vk::Offset2D { x: 0, y: 0 });
        assert_eq!(scissor.extent, extent);
    }

    #[test]
    fn blend_attachment_writes_rgba_without_blending() {
        let attachment = opaque_color_blend_attachment();
        assert_eq!(attachment.blend_enable, vk::FALSE);
        assert_eq!(attachment.color_write_mask, vk::ColorComponentFlags::RGBA);
    }
}
