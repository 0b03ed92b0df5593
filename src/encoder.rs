//! Typed command encoders (spec §4.4).
//!
//! Each encoder kind wraps the same `VkCommandBuffer` but only exposes the
//! commands valid inside that kind of pass, and inserts the barrier that
//! kind of pass always needs on entry/exit:
//!
//!   - render passes transition attachments via the render pass's own
//!     subpass dependencies (`render_pass.rs`) — no manual barrier needed
//!     at `begin`/`end_render_pass`; `end_render_pass` auto-advances through
//!     any subpasses the caller didn't explicitly visit via `next_subpass`,
//!     so the driver always sees the declared subpass count;
//!   - compute passes get a `VERTEX|COMPUTE → COMPUTE` barrier
//!     (`SHADER_READ → SHADER_WRITE`) on entry and its inverse on exit;
//!   - blit passes get `VERTEX|COMPUTE|TRANSFER → TRANSFER`
//!     (`SHADER_READ|TRANSFER_READ → TRANSFER_WRITE`) on entry and its
//!     inverse on exit.
//!
//! None of this submits anything: encoders only record into the command
//! buffer handed to them by `Device::begin_command_recording`. Submission
//! happens in `Device::submit_command_buffer`/`Device::present`.

use ash::vk;

use crate::bind_group::BindGroup;
use crate::buffer::Buffer;
use crate::device::Device;
use crate::handle::Handle;
use crate::render_pass::RenderPass;
use crate::shader::{ComputeShader, Shader};
use crate::texture::Texture;

pub struct CommandBuffer {
    pub(crate) raw: vk::CommandBuffer,
}

fn compute_entry_barrier() -> vk::MemoryBarrier {
    vk::MemoryBarrier::builder()
        .src_access_mask(vk::AccessFlags::SHADER_READ)
        .dst_access_mask(vk::AccessFlags::SHADER_WRITE)
        .build()
}

fn compute_stage_masks() -> (vk::PipelineStageFlags, vk::PipelineStageFlags) {
    (vk::PipelineStageFlags::VERTEX_SHADER | vk::PipelineStageFlags::COMPUTE_SHADER, vk::PipelineStageFlags::COMPUTE_SHADER)
}

fn blit_entry_barrier() -> vk::MemoryBarrier {
    vk::MemoryBarrier::builder()
        .src_access_mask(vk::AccessFlags::SHADER_READ | vk::AccessFlags::TRANSFER_READ)
        .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
        .build()
}

fn blit_stage_masks() -> (vk::PipelineStageFlags, vk::PipelineStageFlags) {
    (
        vk::PipelineStageFlags::VERTEX_SHADER | vk::PipelineStageFlags::COMPUTE_SHADER | vk::PipelineStageFlags::TRANSFER,
        vk::PipelineStageFlags::TRANSFER,
    )
}

impl Device {
    /// Begins `render_pass`'s subpass 0 on `cmd`. `framebuffer_index`
    /// selects which of the pass's owned framebuffers to bind — the current
    /// frame index for an offscreen target, the swapchain's current image
    /// index for a swapchain target (spec §4.3) — and the render area,
    /// clear values and viewport/scissor all come from the render pass
    /// itself rather than the caller, since spec §4.4 has `begin_render_pass`
    /// set those from the pass's own dimensions.
    pub fn begin_render_pass(&self, cmd: &CommandBuffer, render_pass: Handle<RenderPass>, framebuffer_index: u32) -> RenderEncoder<'_> {
        let pass_hot = self.render_passes.resolve_hot(render_pass).expect("stale render pass handle");
        let dimensions = self.render_pass_dimensions(render_pass).expect("stale render pass handle");
        let framebuffer = self
            .render_pass_framebuffer(render_pass, framebuffer_index)
            .expect("framebuffer index out of range for this render pass");
        let clear_values = self.render_pass_clear_values(render_pass).expect("stale render pass handle");
        let render_area = vk::Rect2D { offset: vk::Offset2D { x: 0, y: 0 }, extent: dimensions };

        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(pass_hot.raw)
            .framebuffer(framebuffer)
            .render_area(render_area)
            .clear_values(clear_values);

        unsafe {
            self.raw.cmd_begin_render_pass(cmd.raw, &begin_info, vk::SubpassContents::INLINE);
            let viewport = vk::Viewport {
                x: render_area.offset.x as f32,
                y: render_area.offset.y as f32,
                width: render_area.extent.width as f32,
                height: render_area.extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            };
            self.raw.cmd_set_viewport(cmd.raw, 0, &[viewport]);
            self.raw.cmd_set_scissor(cmd.raw, 0, &[render_area]);
        };

        RenderEncoder {
            device: self,
            raw: cmd.raw,
            subpass: 0,
            subpass_count: self.render_pass_subpass_count(render_pass),
        }
    }

    pub fn begin_compute_pass(&self, cmd: &CommandBuffer) -> ComputeEncoder<'_> {
        let barrier = compute_entry_barrier();
        let (src, dst) = compute_stage_masks();
        unsafe {
            self.raw.cmd_pipeline_barrier(cmd.raw, src, dst, vk::DependencyFlags::empty(), std::slice::from_ref(&barrier), &[], &[]);
        }
        ComputeEncoder { device: self, raw: cmd.raw }
    }

    pub fn begin_blit_pass(&self, cmd: &CommandBuffer) -> BlitEncoder<'_> {
        let barrier = blit_entry_barrier();
        let (src, dst) = blit_stage_masks();
        unsafe {
            self.raw.cmd_pipeline_barrier(cmd.raw, src, dst, vk::DependencyFlags::empty(), std::slice::from_ref(&barrier), &[], &[]);
        }
        BlitEncoder { device: self, raw: cmd.raw }
    }
}

pub struct RenderEncoder<'a> {
    device: &'a Device,
    raw: vk::CommandBuffer,
    subpass: u32,
    subpass_count: u32,
}

impl<'a> RenderEncoder<'a> {
    pub fn bind_pipeline(&mut self, pipeline: vk::Pipeline) {
        unsafe { self.device.raw.cmd_bind_pipeline(self.raw, vk::PipelineBindPoint::GRAPHICS, pipeline) };
    }

    /// Resolves `shader` through the device's pool and binds its pipeline
    /// (spec §6 `bind_shader`).
    pub fn bind_shader(&mut self, shader: Handle<Shader>) {
        if let Some(hot) = self.device.shaders.resolve_hot(shader) {
            self.bind_pipeline(hot.pipeline);
        }
    }

    pub fn bind_vertex_buffer(&mut self, binding: u32, buffer: vk::Buffer, offset: u64) {
        unsafe { self.device.raw.cmd_bind_vertex_buffers(self.raw, binding, &[buffer], &[offset]) };
    }

    /// Resolves `buffer` through the device's pool (spec §6 `bind_vertex_buffer`).
    pub fn bind_vertex_buffer_handle(&mut self, binding: u32, buffer: Handle<Buffer>, offset: u64) {
        if let Some(hot) = self.device.buffers.resolve_hot(buffer) {
            self.bind_vertex_buffer(binding, hot.raw, offset);
        }
    }

    pub fn bind_index_buffer(&mut self, buffer: vk::Buffer, offset: u64, index_type: vk::IndexType) {
        unsafe { self.device.raw.cmd_bind_index_buffer(self.raw, buffer, offset, index_type) };
    }

    pub fn bind_index_buffer_handle(&mut self, buffer: Handle<Buffer>, offset: u64, index_type: vk::IndexType) {
        if let Some(hot) = self.device.buffers.resolve_hot(buffer) {
            self.bind_index_buffer(hot.raw, offset, index_type);
        }
    }

    pub fn bind_descriptor_set(&mut self, pipeline_layout: vk::PipelineLayout, set_index: u32, set: vk::DescriptorSet, dynamic_offsets: &[u32]) {
        unsafe {
            self.device.raw.cmd_bind_descriptor_sets(self.raw, vk::PipelineBindPoint::GRAPHICS, pipeline_layout, set_index, &[set], dynamic_offsets)
        };
    }

    /// Binds up to three persistent bind groups at once against `shader`'s
    /// pipeline layout (spec §6 `bind_graphics_bind_groups`), one dynamic
    /// offset per group (`0` when the group carries no dynamic binding).
    pub fn bind_graphics_bind_groups(&mut self, shader: Handle<Shader>, groups: &[(u32, Handle<BindGroup>, u32)]) {
        let pipeline_layout = match self.device.shaders.resolve_hot(shader) {
            Some(hot) => hot.pipeline_layout,
            None => return,
        };
        for &(set_index, group, dynamic_offset) in groups {
            if let Some(hot) = self.device.bind_groups.resolve_hot(group) {
                self.bind_descriptor_set(pipeline_layout, set_index, hot.raw, &[dynamic_offset]);
            }
        }
    }

    pub fn set_viewport(&mut self, viewport: vk::Viewport) {
        unsafe { self.device.raw.cmd_set_viewport(self.raw, 0, &[viewport]) };
    }

    pub fn set_scissor(&mut self, scissor: vk::Rect2D) {
        unsafe { self.device.raw.cmd_set_scissor(self.raw, 0, &[scissor]) };
    }

    pub fn set_depth_bias(&mut self, constant_factor: f32, clamp: f32, slope_factor: f32) {
        unsafe { self.device.raw.cmd_set_depth_bias(self.raw, constant_factor, clamp, slope_factor) };
    }

    pub fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        unsafe { self.device.raw.cmd_draw(self.raw, vertex_count, instance_count, first_vertex, first_instance) };
    }

    pub fn draw_indexed(&mut self, index_count: u32, instance_count: u32, first_index: u32, vertex_offset: i32, first_instance: u32) {
        unsafe {
            self.device.raw.cmd_draw_indexed(self.raw, index_count, instance_count, first_index, vertex_offset, first_instance)
        };
    }

    /// Advances to the next declared subpass (spec §4.4 `next_subpass`).
    pub fn next_subpass(&mut self) {
        unsafe { self.device.raw.cmd_next_subpass(self.raw, vk::SubpassContents::INLINE) };
        self.subpass += 1;
    }

    /// Advances through any remaining declared subpasses the caller didn't
    /// visit explicitly, then ends the pass (spec §4.4) — drivers always see
    /// exactly the number of subpasses the render pass was compiled with.
    pub fn end_render_pass(mut self) {
        while self.subpass + 1 < self.subpass_count {
            self.next_subpass();
        }
        unsafe { self.device.raw.cmd_end_render_pass(self.raw) };
    }
}

pub struct ComputeEncoder<'a> {
    device: &'a Device,
    raw: vk::CommandBuffer,
}

impl<'a> ComputeEncoder<'a> {
    pub fn bind_pipeline(&mut self, pipeline: vk::Pipeline) {
        unsafe { self.device.raw.cmd_bind_pipeline(self.raw, vk::PipelineBindPoint::COMPUTE, pipeline) };
    }

    pub fn bind_compute_shader(&mut self, shader: Handle<ComputeShader>) {
        if let Some(hot) = self.device.compute_shaders.resolve_hot(shader) {
            self.bind_pipeline(hot.pipeline);
        }
    }

    pub fn bind_descriptor_set(&mut self, pipeline_layout: vk::PipelineLayout, set_index: u32, set: vk::DescriptorSet, dynamic_offsets: &[u32]) {
        unsafe {
            self.device.raw.cmd_bind_descriptor_sets(self.raw, vk::PipelineBindPoint::COMPUTE, pipeline_layout, set_index, &[set], dynamic_offsets)
        };
    }

    pub fn bind_compute_bind_groups(&mut self, shader: Handle<ComputeShader>, groups: &[(u32, Handle<BindGroup>, u32)]) {
        let pipeline_layout = match self.device.compute_shaders.resolve_hot(shader) {
            Some(hot) => hot.pipeline_layout,
            None => return,
        };
        for &(set_index, group, dynamic_offset) in groups {
            if let Some(hot) = self.device.bind_groups.resolve_hot(group) {
                self.bind_descriptor_set(pipeline_layout, set_index, hot.raw, &[dynamic_offset]);
            }
        }
    }

    pub fn dispatch(&mut self, group_count_x: u32, group_count_y: u32, group_count_z: u32) {
        unsafe { self.device.raw.cmd_dispatch(self.raw, group_count_x, group_count_y, group_count_z) };
    }

    pub fn end_compute_pass(self) {
        let barrier = vk::MemoryBarrier::builder()
            .src_access_mask(vk::AccessFlags::SHADER_WRITE)
            .dst_access_mask(vk::AccessFlags::SHADER_READ);
        let (entry_src, entry_dst) = compute_stage_masks();
        unsafe {
            self.device.raw.cmd_pipeline_barrier(
                self.raw,
                entry_dst,
                entry_src,
                vk::DependencyFlags::empty(),
                std::slice::from_ref(&barrier),
                &[],
                &[],
            );
        }
    }
}

pub struct BlitEncoder<'a> {
    device: &'a Device,
    raw: vk::CommandBuffer,
}

impl<'a> BlitEncoder<'a> {
    pub(crate) fn transition_mip_level(&mut self, image: vk::Image, aspect_mask: vk::ImageAspectFlags, level: u32, old_layout: vk::ImageLayout, new_layout: vk::ImageLayout) {
        let (src_access, src_stage) = access_and_stage_for_layout(old_layout);
        let (dst_access, dst_stage) = access_and_stage_for_layout(new_layout);

        let barrier = vk::ImageMemoryBarrier::builder()
            .old_layout(old_layout)
            .new_layout(new_layout)
            .src_access_mask(src_access)
            .dst_access_mask(dst_access)
            .image(image)
            .subresource_range(vk::ImageSubresourceRange { aspect_mask, base_mip_level: level, level_count: 1, base_array_layer: 0, layer_count: 1 });

        unsafe {
            self.device.raw.cmd_pipeline_barrier(self.raw, src_stage, dst_stage, vk::DependencyFlags::empty(), &[], &[], std::slice::from_ref(&barrier));
        }
    }

    pub(crate) fn blit_mip_level(&mut self, image: vk::Image, aspect_mask: vk::ImageAspectFlags, src_level: u32, src_offsets: [vk::Offset3D; 2], dst_level: u32, dst_offsets: [vk::Offset3D; 2]) {
        let region = vk::ImageBlit {
            src_subresource: vk::ImageSubresourceLayers { aspect_mask, mip_level: src_level, base_array_layer: 0, layer_count: 1 },
            src_offsets,
            dst_subresource: vk::ImageSubresourceLayers { aspect_mask, mip_level: dst_level, base_array_layer: 0, layer_count: 1 },
            dst_offsets,
        };

        unsafe {
            self.device.raw.cmd_blit_image(
                self.raw,
                image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                std::slice::from_ref(&region),
                vk::Filter::LINEAR,
            )
        };
    }

    /// Copies a byte range between two buffers (spec §6 `copy_buffer`).
    pub fn copy_buffer(&mut self, src: Handle<Buffer>, src_offset: u64, dst: Handle<Buffer>, dst_offset: u64, size: u64) {
        let src_raw = match self.device.buffers.resolve_hot(src) {
            Some(hot) => hot.raw,
            None => return,
        };
        let dst_raw = match self.device.buffers.resolve_hot(dst) {
            Some(hot) => hot.raw,
            None => return,
        };
        let region = vk::BufferCopy { src_offset, dst_offset, size };
        unsafe { self.device.raw.cmd_copy_buffer(self.raw, src_raw, dst_raw, std::slice::from_ref(&region)) };
    }

    /// Copies a buffer's contents into a texture's base mip level, assuming
    /// the texture is already in `TRANSFER_DST_OPTIMAL` (spec §6
    /// `copy_buffer_to_texture`).
    pub fn copy_buffer_to_texture(&mut self, src: Handle<Buffer>, dst: Handle<Texture>, width: u32, height: u32, aspect_mask: vk::ImageAspectFlags) {
        let src_raw = match self.device.buffers.resolve_hot(src) {
            Some(hot) => hot.raw,
            None => return,
        };
        let dst_raw = match self.device.textures.resolve_hot(dst) {
            Some(hot) => hot.raw,
            None => return,
        };
        let region = vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers { aspect_mask, mip_level: 0, base_array_layer: 0, layer_count: 1 },
            image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
            image_extent: vk::Extent3D { width, height, depth: 1 },
        };
        unsafe {
            self.device.raw.cmd_copy_buffer_to_image(
                self.raw,
                src_raw,
                dst_raw,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                std::slice::from_ref(&region),
            )
        };
    }

    /// Copies a texture's base mip level into a buffer, assuming the
    /// texture is already in `TRANSFER_SRC_OPTIMAL` (spec §6
    /// `copy_texture_to_buffer`).
    pub fn copy_texture_to_buffer(&mut self, src: Handle<Texture>, dst: Handle<Buffer>, width: u32, height: u32, aspect_mask: vk::ImageAspectFlags) {
        let src_raw = match self.device.textures.resolve_hot(src) {
            Some(hot) => hot.raw,
            None => return,
        };
        let dst_raw = match self.device.buffers.resolve_hot(dst) {
            Some(hot) => hot.raw,
            None => return,
        };
        let region = vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers { aspect_mask, mip_level: 0, base_array_layer: 0, layer_count: 1 },
            image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
            image_extent: vk::Extent3D { width, height, depth: 1 },
        };
        unsafe {
            self.device.raw.cmd_copy_image_to_buffer(
                self.raw,
                src_raw,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst_raw,
                std::slice::from_ref(&region),
            )
        };
    }

    /// A caller-driven layout transition on a texture's full mip/array
    /// range, for transitions the automatic entry/exit barriers don't cover
    /// — e.g. a texture that was last written by a render pass and now needs
    /// `TRANSFER_SRC_OPTIMAL` before a blit (spec §6 `pipeline_barrier_*`).
    pub fn pipeline_barrier_texture(&mut self, texture: Handle<Texture>, aspect_mask: vk::ImageAspectFlags, old_layout: vk::ImageLayout, new_layout: vk::ImageLayout) {
        let (image, mip_levels, array_layers) = match (
            self.device.textures.resolve_hot(texture),
            self.device.textures.resolve_cold(texture),
        ) {
            (Some(hot), Some(cold)) => (hot.raw, cold.mip_levels, cold.array_layers),
            _ => return,
        };
        let (src_access, src_stage) = access_and_stage_for_layout(old_layout);
        let (dst_access, dst_stage) = access_and_stage_for_layout(new_layout);

        let barrier = vk::ImageMemoryBarrier::builder()
            .old_layout(old_layout)
            .new_layout(new_layout)
            .src_access_mask(src_access)
            .dst_access_mask(dst_access)
            .image(image)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask,
                base_mip_level: 0,
                level_count: mip_levels,
                base_array_layer: 0,
                layer_count: array_layers,
            });

        unsafe {
            self.device.raw.cmd_pipeline_barrier(self.raw, src_stage, dst_stage, vk::DependencyFlags::empty(), &[], &[], std::slice::from_ref(&barrier));
        }
    }

    /// A caller-driven full-range buffer barrier (spec §6
    /// `pipeline_barrier_*`), for ordering a write against a later read that
    /// the automatic entry/exit barriers don't express — e.g. a compute
    /// write that a subsequent blit-pass copy must wait on.
    pub fn pipeline_barrier_buffer(&mut self, buffer: Handle<Buffer>, src_access: vk::AccessFlags, dst_access: vk::AccessFlags, src_stage: vk::PipelineStageFlags, dst_stage: vk::PipelineStageFlags) {
        let raw = match self.device.buffers.resolve_hot(buffer) {
            Some(hot) => hot.raw,
            None => return,
        };
        let barrier = vk::BufferMemoryBarrier::builder()
            .src_access_mask(src_access)
            .dst_access_mask(dst_access)
            .buffer(raw)
            .offset(0)
            .size(vk::WHOLE_SIZE);
        unsafe {
            self.device.raw.cmd_pipeline_barrier(self.raw, src_stage, dst_stage, vk::DependencyFlags::empty(), &[], std::slice::from_ref(&barrier), &[]);
        }
    }

    pub fn end_blit_pass(self) {
        let barrier = vk::MemoryBarrier::builder()
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::SHADER_READ | vk::AccessFlags::TRANSFER_READ);
        let (entry_src, entry_dst) = blit_stage_masks();
        unsafe {
            self.device.raw.cmd_pipeline_barrier(
                self.raw,
                entry_dst,
                entry_src,
                vk::DependencyFlags::empty(),
                std::slice::from_ref(&barrier),
                &[],
                &[],
            );
        }
    }
}

fn access_and_stage_for_layout(layout: vk::ImageLayout) -> (vk::AccessFlags, vk::PipelineStageFlags) {
    match layout {
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => (vk::AccessFlags::TRANSFER_WRITE, vk::PipelineStageFlags::TRANSFER),
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => (vk::AccessFlags::TRANSFER_READ, vk::PipelineStageFlags::TRANSFER),
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => (vk::AccessFlags::SHADER_READ, vk::PipelineStageFlags::FRAGMENT_SHADER),
        _ => (vk::AccessFlags::empty(), vk::PipelineStageFlags::TOP_OF_PIPE),
    }
}
