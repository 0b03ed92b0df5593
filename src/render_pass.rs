//! Render-pass compiler (spec §4.3) and the compiled [`RenderPass`] that
//! derives from a [`RenderPassLayout`] (spec §3 data model: "Render-Pass
//! Layout" and "Render-Pass" are two distinct entities).
//!
//! A [`RenderPassLayout`] is immutable once compiled: it fixes the ordered
//! attachment formats and the subpass topology (which attachments each
//! subpass writes/reads as input attachments) and is shared by every
//! [`RenderPass`] built against it — the thing a [`crate::shader::Shader`]
//! is compiled against for pipeline-render-pass *compatibility* (spec §3:
//! a shader references "a render-pass layout + subpass index", not a full
//! render pass). A [`RenderPass`] layers per-attachment load/store ops,
//! initial/final layouts and clear values onto that topology, producing its
//! own driver render pass plus the framebuffers it owns; `update_attachments`
//! rebuilds those framebuffers lazily without touching the layout.
//!
//! Subpass dependencies are not left to the caller to specify: the compiler
//! always inserts
//!
//!   - `VK_SUBPASS_EXTERNAL` → subpass 0, srcStage/dstStage both
//!     `COLOR_ATTACHMENT_OUTPUT`/`EARLY_FRAGMENT_TESTS`/`LATE_FRAGMENT_TESTS`,
//!     srcAccess/dstAccess both `COLOR_ATTACHMENT_WRITE`/
//!     `DEPTH_STENCIL_ATTACHMENT_WRITE`, making the first subpass wait for
//!     any prior writer of these attachments (a previous pass, or a
//!     presentation engine finishing its read) rather than for the whole
//!     pipeline to drain;
//!   - subpass `i-1` → `i` for every consecutive pair, dstStage the same
//!     attachment-output stages, srcAccess `COLOR_ATTACHMENT_WRITE`/
//!     `DEPTH_STENCIL_ATTACHMENT_WRITE`, dstAccess `*_READ | *_WRITE` so a
//!     later subpass reading an earlier one's input attachment is ordered
//!     correctly;
//!   - last subpass → `VK_SUBPASS_EXTERNAL`, so a subsequent
//!     presentation/sampling of the attachment waits for the pass to finish
//!     writing.
//!
//! This is the one dependency shape spec §4.3 asks for; passes needing
//! anything more exotic (e.g. a dependency skipping a subpass) are out of
//! scope, same as the original only ever built single-dependency-chain
//! render passes.

use ash::vk;
use smallvec::SmallVec;

use crate::device::Device;
use crate::error::{GfxError, GfxResult};
use crate::handle::Handle;
use crate::texture::{is_depth_format, TextureView};

/// A subpass rarely writes more than a few color attachments or reads more
/// than a few as input attachments, so both stay inline.
pub type AttachmentIndexList = SmallVec<[u32; 4]>;

#[derive(Debug, Clone)]
pub struct SubpassDesc {
    /// Indices into the layout's `attachment_formats`.
    pub color_attachments: AttachmentIndexList,
    pub depth_stencil_attachment: Option<u32>,
    pub input_attachments: AttachmentIndexList,
}

/// Input to [`Device::create_render_pass_layout`]: attachment formats in
/// order (depth/stencil identified by format class, spec §4.3 step 1) plus
/// ordered subpasses.
#[derive(Debug, Clone)]
pub struct RenderPassLayoutDesc {
    pub attachment_formats: Vec<vk::Format>,
    pub subpasses: Vec<SubpassDesc>,
}

#[derive(Default, Clone, Copy)]
pub struct RenderPassLayout {
    /// Compiled with placeholder `LOAD`/`STORE` ops and a generic layout
    /// per attachment class — never used to record into directly, only for
    /// `vkCreateGraphicsPipelines`' render-pass-compatibility check (any
    /// `RenderPass` built from this layout is compatible with it) and as
    /// the thing `destroy_render_pass_layout` actually frees.
    pub(crate) raw: vk::RenderPass,
}

#[derive(Default, Clone)]
pub struct RenderPassLayoutCold {
    pub(crate) attachment_formats: Vec<vk::Format>,
    pub(crate) subpasses: Vec<SubpassDesc>,
}

/// Per-attachment load/store ops and initial/final layout a [`RenderPass`]
/// overlays onto its layout's topology (spec §4.3: "which overwrite the
/// layout's attachment init/final fields on the fly").
#[derive(Debug, Clone, Copy)]
pub struct AttachmentOps {
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub initial_layout: vk::ImageLayout,
    pub final_layout: vk::ImageLayout,
}

/// How many framebuffers a [`RenderPass`] owns and how its "current"
/// framebuffer is selected in `begin_render_pass` (spec §4.3).
#[derive(Debug, Clone, Copy)]
pub enum RenderPassTarget {
    /// One framebuffer per frame-in-flight, selected by the current frame
    /// index.
    Offscreen { frames_in_flight: u8 },
    /// One framebuffer per swapchain image, selected by the swapchain's
    /// current image index.
    Swapchain { image_count: u32 },
}

impl RenderPassTarget {
    fn framebuffer_count(self) -> u32 {
        match self {
            RenderPassTarget::Offscreen { frames_in_flight } => frames_in_flight as u32,
            RenderPassTarget::Swapchain { image_count } => image_count,
        }
    }

    fn is_swapchain(self) -> bool {
        matches!(self, RenderPassTarget::Swapchain { .. })
    }
}

#[derive(Default, Clone, Copy)]
pub struct RenderPass {
    pub(crate) raw: vk::RenderPass,
}

#[derive(Default)]
pub struct RenderPassCold {
    pub(crate) layout: Handle<RenderPassLayout>,
    pub(crate) subpass_count: u32,
    pub(crate) clear_values: Vec<vk::ClearValue>,
    pub(crate) dimensions: vk::Extent2D,
    pub(crate) framebuffers: Vec<vk::Framebuffer>,
    pub(crate) is_swapchain_target: bool,
}

fn color_depth_stages() -> vk::PipelineStageFlags {
    vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
        | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS
}

fn color_depth_write() -> vk::AccessFlags {
    vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
}

fn color_depth_read_write() -> vk::AccessFlags {
    vk::AccessFlags::COLOR_ATTACHMENT_READ
        | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
        | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
        | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
}

/// Builds the fixed dependency chain spec §4.3 requires: `EXTERNAL` into
/// subpass 0, one dependency between every consecutive pair of subpasses,
/// and the last subpass out to `EXTERNAL` — `subpass_count + 1` total. A
/// render pass rarely has more than a couple of subpasses, so the list
/// stays inline rather than spilling to the heap for the common case.
fn build_dependencies(subpass_count: u32) -> SmallVec<[vk::SubpassDependency; 4]> {
    let mut deps = SmallVec::with_capacity(subpass_count as usize + 1);

    deps.push(vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: color_depth_stages(),
        dst_stage_mask: color_depth_stages(),
        src_access_mask: color_depth_write(),
        dst_access_mask: color_depth_write(),
        dependency_flags: vk::DependencyFlags::empty(),
    });

    for i in 1..subpass_count {
        deps.push(vk::SubpassDependency {
            src_subpass: i - 1,
            dst_subpass: i,
            src_stage_mask: color_depth_stages(),
            dst_stage_mask: color_depth_stages() | vk::PipelineStageFlags::FRAGMENT_SHADER,
            src_access_mask: color_depth_write(),
            dst_access_mask: vk::AccessFlags::INPUT_ATTACHMENT_READ | color_depth_write(),
            dependency_flags: vk::DependencyFlags::BY_REGION,
        });
    }

    deps.push(vk::SubpassDependency {
        src_subpass: subpass_count - 1,
        dst_subpass: vk::SUBPASS_EXTERNAL,
        src_stage_mask: color_depth_stages() | vk::PipelineStageFlags::FRAGMENT_SHADER,
        dst_stage_mask: color_depth_stages() | vk::PipelineStageFlags::FRAGMENT_SHADER,
        src_access_mask: color_depth_read_write(),
        dst_access_mask: color_depth_read_write(),
        dependency_flags: vk::DependencyFlags::BY_REGION,
    });

    deps
}

/// Shared by layout compilation and render-pass compilation: both build a
/// `VkRenderPass` from the same subpass topology, differing only in the
/// `vk::AttachmentDescription`s passed in (placeholder ops for the layout,
/// caller-supplied ops for the pass).
fn compile_driver_render_pass(
    device: &ash::Device,
    attachments: &[vk::AttachmentDescription],
    subpasses: &[SubpassDesc],
) -> GfxResult<vk::RenderPass> {
    let mut color_refs_storage = Vec::with_capacity(subpasses.len());
    let mut input_refs_storage = Vec::with_capacity(subpasses.len());
    let mut depth_refs_storage: Vec<Option<vk::AttachmentReference>> = Vec::with_capacity(subpasses.len());

    for subpass in subpasses {
        color_refs_storage.push(
            subpass
                .color_attachments
                .iter()
                .map(|&i| vk::AttachmentReference { attachment: i, layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL })
                .collect::<SmallVec<[vk::AttachmentReference; 4]>>(),
        );
        input_refs_storage.push(
            subpass
                .input_attachments
                .iter()
                .map(|&i| vk::AttachmentReference { attachment: i, layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL })
                .collect::<SmallVec<[vk::AttachmentReference; 4]>>(),
        );
        depth_refs_storage.push(subpass.depth_stencil_attachment.map(|i| vk::AttachmentReference {
            attachment: i,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        }));
    }

    let subpass_descriptions: Vec<vk::SubpassDescription> = (0..subpasses.len())
        .map(|i| {
            let mut builder = vk::SubpassDescription::builder()
                .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
                .color_attachments(&color_refs_storage[i])
                .input_attachments(&input_refs_storage[i]);
            if let Some(depth_ref) = depth_refs_storage[i].as_ref() {
                builder = builder.depth_stencil_attachment(depth_ref);
            }
            builder.build()
        })
        .collect();

    let dependencies = build_dependencies(subpasses.len() as u32);

    let create_info = vk::RenderPassCreateInfo::builder()
        .attachments(attachments)
        .subpasses(&subpass_descriptions)
        .dependencies(&dependencies);

    Ok(unsafe { device.create_render_pass(&create_info, None)? })
}

impl Device {
    /// Compiles a [`RenderPassLayoutDesc`] into a [`RenderPassLayout`] (spec
    /// §4.3 steps 1-4). Immutable: every [`RenderPass`] built from it shares
    /// the same attachment formats and subpass topology.
    pub fn create_render_pass_layout(&mut self, desc: &RenderPassLayoutDesc) -> GfxResult<Handle<RenderPassLayout>> {
        let attachment_descriptions: Vec<vk::AttachmentDescription> = desc
            .attachment_formats
            .iter()
            .map(|&format| {
                let layout = if is_depth_format(format) {
                    vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
                } else {
                    vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
                };
                vk::AttachmentDescription::builder()
                    .format(format)
                    .samples(vk::SampleCountFlags::TYPE_1)
                    .load_op(vk::AttachmentLoadOp::LOAD)
                    .store_op(vk::AttachmentStoreOp::STORE)
                    .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                    .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .initial_layout(layout)
                    .final_layout(layout)
                    .build()
            })
            .collect();

        let raw = compile_driver_render_pass(&self.raw, &attachment_descriptions, &desc.subpasses)?;

        Ok(self.render_pass_layouts.insert(
            RenderPassLayout { raw },
            RenderPassLayoutCold {
                attachment_formats: desc.attachment_formats.clone(),
                subpasses: desc.subpasses.clone(),
            },
        ))
    }

    /// Enumerates a compiled layout's attachment formats in order (spec §8
    /// round-trip property: compiling then enumerating yields the same
    /// format sequence).
    pub fn render_pass_layout_attachment_formats(&self, handle: Handle<RenderPassLayout>) -> Option<&[vk::Format]> {
        self.render_pass_layouts.resolve_cold(handle).map(|cold| cold.attachment_formats.as_slice())
    }

    pub fn destroy_render_pass_layout(&mut self, handle: Handle<RenderPassLayout>) -> GfxResult<()> {
        let (hot, _cold) = self
            .render_pass_layouts
            .queue_free(handle)
            .ok_or_else(|| GfxError::Validation("stale render pass layout handle".into()))?;
        self.frames.current_mut().garbage.push_render_pass(hot.raw);
        Ok(())
    }

    /// Derives a [`RenderPass`] from `layout`, overlaying `attachment_ops`
    /// (one per layout attachment, in order) and `clear_values` (spec §4.3:
    /// "the derived RenderPass additionally stores per-attachment
    /// load/store ops ... which overwrite the layout's attachment
    /// init/final fields on the fly"). Framebuffers are not built here —
    /// call [`Device::update_attachments`] once views/dimensions are known.
    pub fn create_render_pass(
        &mut self,
        layout: Handle<RenderPassLayout>,
        attachment_ops: &[AttachmentOps],
        clear_values: Vec<vk::ClearValue>,
        target: RenderPassTarget,
    ) -> GfxResult<Handle<RenderPass>> {
        let layout_cold = self
            .render_pass_layouts
            .resolve_cold(layout)
            .ok_or_else(|| GfxError::Validation("stale render pass layout handle".into()))?;
        if attachment_ops.len() != layout_cold.attachment_formats.len() {
            return Err(GfxError::Validation(
                "attachment_ops length must match the layout's attachment count".into(),
            ));
        }

        let attachment_descriptions: Vec<vk::AttachmentDescription> = layout_cold
            .attachment_formats
            .iter()
            .zip(attachment_ops.iter())
            .map(|(&format, ops)| {
                vk::AttachmentDescription::builder()
                    .format(format)
                    .samples(vk::SampleCountFlags::TYPE_1)
                    .load_op(ops.load_op)
                    .store_op(ops.store_op)
                    .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                    .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .initial_layout(ops.initial_layout)
                    .final_layout(ops.final_layout)
                    .build()
            })
            .collect();
        let subpass_count = layout_cold.subpasses.len() as u32;
        let subpasses = layout_cold.subpasses.clone();

        let raw = compile_driver_render_pass(&self.raw, &attachment_descriptions, &subpasses)?;
        let framebuffer_count = target.framebuffer_count() as usize;

        Ok(self.render_passes.insert(
            RenderPass { raw },
            RenderPassCold {
                layout,
                subpass_count,
                clear_values,
                dimensions: vk::Extent2D { width: 0, height: 0 },
                framebuffers: vec![vk::Framebuffer::null(); framebuffer_count],
                is_swapchain_target: target.is_swapchain(),
            },
        ))
    }

    pub fn render_pass_subpass_count(&self, handle: Handle<RenderPass>) -> u32 {
        self.render_passes.resolve_cold(handle).map(|cold| cold.subpass_count).unwrap_or(1)
    }

    pub fn render_pass_is_swapchain_target(&self, handle: Handle<RenderPass>) -> bool {
        self.render_passes.resolve_cold(handle).map(|cold| cold.is_swapchain_target).unwrap_or(false)
    }

    /// Rebuilds `handle`'s framebuffers against `new_views` (one entry per
    /// framebuffer, each the attachment list in the layout's order) and
    /// `new_dimensions` (spec §4.3 `update_attachments`). The rebuild is
    /// synchronous; the *old* framebuffers are only queued into the current
    /// frame's garbage, so they survive until the GC pass N frames later
    /// confirms no in-flight frame can still be using them.
    pub fn update_attachments(
        &mut self,
        handle: Handle<RenderPass>,
        new_dimensions: vk::Extent2D,
        new_views: &[Vec<Handle<TextureView>>],
    ) -> GfxResult<()> {
        let old_framebuffers = {
            let cold = self
                .render_passes
                .resolve_cold_mut(handle)
                .ok_or_else(|| GfxError::Validation("stale render pass handle".into()))?;
            if new_views.len() != cold.framebuffers.len() {
                return Err(GfxError::Validation(
                    "new_views length must match the render pass's framebuffer count".into(),
                ));
            }
            std::mem::replace(&mut cold.framebuffers, Vec::new())
        };

        let mut rebuilt = Vec::with_capacity(new_views.len());
        for views in new_views {
            rebuilt.push(self.create_framebuffer(handle, views, new_dimensions.width, new_dimensions.height)?);
        }

        for old in old_framebuffers {
            if old != vk::Framebuffer::null() {
                self.frames.current_mut().garbage.push_framebuffer(old);
            }
        }

        let cold = self.render_passes.resolve_cold_mut(handle).unwrap();
        cold.framebuffers = rebuilt;
        cold.dimensions = new_dimensions;
        Ok(())
    }

    /// Returns the framebuffer `begin_render_pass` should bind for `index`
    /// — the current frame index for an offscreen target, the swapchain's
    /// current image index for a swapchain target (spec §4.3).
    pub fn render_pass_framebuffer(&self, handle: Handle<RenderPass>, index: u32) -> Option<vk::Framebuffer> {
        let cold = self.render_passes.resolve_cold(handle)?;
        cold.framebuffers.get(index as usize).copied()
    }

    pub fn render_pass_dimensions(&self, handle: Handle<RenderPass>) -> Option<vk::Extent2D> {
        self.render_passes.resolve_cold(handle).map(|cold| cold.dimensions)
    }

    pub fn render_pass_clear_values(&self, handle: Handle<RenderPass>) -> Option<&[vk::ClearValue]> {
        self.render_passes.resolve_cold(handle).map(|cold| cold.clear_values.as_slice())
    }

    pub fn destroy_render_pass(&mut self, handle: Handle<RenderPass>) -> GfxResult<()> {
        let (hot, cold) = self
            .render_passes
            .queue_free(handle)
            .ok_or_else(|| GfxError::Validation("stale render pass handle".into()))?;
        let frame_garbage = &mut self.frames.current_mut().garbage;
        frame_garbage.push_render_pass(hot.raw);
        for fb in cold.framebuffers {
            if fb != vk::Framebuffer::null() {
                frame_garbage.push_framebuffer(fb);
            }
        }
        Ok(())
    }

    pub fn create_framebuffer(
        &self,
        render_pass: Handle<RenderPass>,
        attachments: &[Handle<TextureView>],
        width: u32,
        height: u32,
    ) -> GfxResult<vk::Framebuffer> {
        let pass_hot = self
            .render_passes
            .resolve_hot(render_pass)
            .ok_or_else(|| GfxError::Validation("stale render pass handle".into()))?;

        let views: Vec<vk::ImageView> = attachments
            .iter()
            .map(|&h| {
                self.texture_views
                    .resolve_hot(h)
                    .map(|hot| hot.raw)
                    .ok_or_else(|| GfxError::Validation("stale texture view handle".into()))
            })
            .collect::<GfxResult<_>>()?;

        let create_info = vk::FramebufferCreateInfo::builder()
            .render_pass(pass_hot.raw)
            .attachments(&views)
            .width(width)
            .height(height)
            .layers(1);

        Ok(unsafe { self.raw.create_framebuffer(&create_info, None)? })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_subpasses_produce_exactly_three_dependencies() {
        let deps = build_dependencies(2);
        assert_eq!(deps.len(), 3);
        assert_eq!(deps[0].src_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(deps[0].dst_subpass, 0);
        assert_eq!(deps[1].src_subpass, 0);
        assert_eq!(deps[1].dst_subpass, 1);
        assert_eq!(deps[2].src_subpass, 1);
        assert_eq!(deps[2].dst_subpass, vk::SUBPASS_EXTERNAL);
    }

    #[test]
    fn single_subpass_still_gets_external_in_and_out() {
        let deps = build_dependencies(1);
        assert_eq!(deps.len(), 2);
    }

    #[test]
    fn external_in_dependency_carries_no_region_flag() {
        let deps = build_dependencies(2);
        assert_eq!(deps[0].dependency_flags, vk::DependencyFlags::empty());
        assert_eq!(deps[2].dependency_flags, vk::DependencyFlags::BY_REGION);
    }

    #[test]
    fn render_pass_target_framebuffer_count() {
        assert_eq!(RenderPassTarget::Offscreen { frames_in_flight: 3 }.framebuffer_count(), 3);
        assert_eq!(RenderPassTarget::Swapchain { image_count: 4 }.framebuffer_count(), 4);
        assert!(!RenderPassTarget::Offscreen { frames_in_flight: 2 }.is_swapchain());
        assert!(RenderPassTarget::Swapchain { image_count: 2 }.is_swapchain());
    }
}
