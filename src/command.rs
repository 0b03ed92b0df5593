//! Frame loop and command-buffer lifecycle (spec §4.2/§4.4/§6).
//!
//! `begin_frame` advances the frame ring; callers record into command
//! buffers obtained from `begin_command_recording`, submit them with
//! `submit_command_buffer`, and end the frame with `present`. The ring itself
//! (`frame.rs`) owns the `ready`/`pending` bookkeeping this module drives.

use ash::vk;

use crate::bind_group::BindGroup;
use crate::buffer::Buffer;
use crate::device::Device;
use crate::encoder::CommandBuffer;
use crate::error::GfxResult;
use crate::handle::Handle;
use crate::render_pass::RenderPass;
use crate::sampler::Sampler;
use crate::semaphore::TimelineSemaphore;
use crate::shader::{ComputeShader, Shader};
use crate::swapchain::Swapchain;
use crate::texture::{Texture, TextureView};

/// A caller-supplied timeline-semaphore wait, attached to a submission
/// alongside the frame ring's own binary semaphores (spec §4.4 `present`).
#[derive(Debug, Clone, Copy)]
pub struct SemaphoreWait {
    pub semaphore: Handle<TimelineSemaphore>,
    pub value: u64,
    pub stage: vk::PipelineStageFlags,
}

/// A caller-supplied timeline-semaphore signal.
#[derive(Debug, Clone, Copy)]
pub struct SemaphoreSignal {
    pub semaphore: Handle<TimelineSemaphore>,
    pub value: u64,
}

/// Extra waits/signals layered onto a submission via
/// `VkTimelineSemaphoreSubmitInfo`, on top of whatever binary semaphores the
/// frame ring itself needs (spec §4.4).
#[derive(Debug, Clone, Default)]
pub struct SubmitInfo {
    pub waits: Vec<SemaphoreWait>,
    pub signals: Vec<SemaphoreSignal>,
}

impl Device {
    /// Advances the frame ring: waits on the next context's in-flight fence,
    /// garbage-collects it, and resets its transient state (spec §4.2
    /// `begin_frame`). This is the call's only blocking point per spec §5.
    pub fn begin_frame(&mut self) -> GfxResult<()> {
        self.frames.advance(&self.raw, self.allocator.as_ref())
    }

    pub fn get_current_frame_index(&self) -> u64 {
        self.frames.frame_number()
    }

    pub fn get_frames_in_flight(&self) -> u8 {
        self.config.frames_in_flight
    }

    /// Acquires the next swapchain image, signaling the current frame's
    /// `image_available` semaphore. Returns `Ok(None)` when the swapchain
    /// was out of date and has already been recreated internally — the
    /// caller should skip rendering this iteration (spec §4.7).
    pub fn acquire_swapchain_image(
        &mut self,
        swapchain: &mut Swapchain,
        fallback_extent: vk::Extent2D,
    ) -> GfxResult<Option<u32>> {
        let image_available = self.frames.current().image_available;
        swapchain.acquire_next_image(self, fallback_extent, image_available)
    }

    /// Pops a reusable buffer from the current frame's `ready` list, else
    /// allocates a new one, and begins recording (spec §4.4
    /// `begin_command_recording`). `one_time_submit` should be `true` for
    /// standalone commands recorded outside the steady frame loop (setup
    /// uploads before the first `begin_frame`, for instance) and `false` for
    /// the common per-frame recording path, where the buffer may be
    /// resubmitted under careful scheduling.
    pub fn begin_command_recording(&mut self, one_time_submit: bool) -> GfxResult<CommandBuffer> {
        let cmd = self.frames.current_mut().acquire_command_buffer(&self.raw)?;
        let flags = if one_time_submit {
            vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT
        } else {
            vk::CommandBufferUsageFlags::empty()
        };
        let begin_info = vk::CommandBufferBeginInfo::builder().flags(flags);
        unsafe { self.raw.begin_command_buffer(cmd, &begin_info)? };
        Ok(CommandBuffer { raw: cmd })
    }

    pub fn end_command_recording(&self, cmd: &CommandBuffer) -> GfxResult<()> {
        unsafe { self.raw.end_command_buffer(cmd.raw)? };
        Ok(())
    }

    fn timeline_submit_info<'a>(
        &self,
        submit_info: &SubmitInfo,
        wait_values: &'a mut Vec<u64>,
        signal_values: &'a mut Vec<u64>,
        wait_semaphores: &mut Vec<vk::Semaphore>,
        wait_stages: &mut Vec<vk::PipelineStageFlags>,
        signal_semaphores: &mut Vec<vk::Semaphore>,
    ) {
        for wait in &submit_info.waits {
            if let Some(hot) = self.semaphores.resolve_hot(wait.semaphore) {
                wait_semaphores.push(hot.raw);
                wait_stages.push(wait.stage);
                wait_values.push(wait.value);
            }
        }
        for signal in &submit_info.signals {
            if let Some(hot) = self.semaphores.resolve_hot(signal.semaphore) {
                signal_semaphores.push(hot.raw);
                signal_values.push(signal.value);
            }
        }
    }

    /// Submits `cmd` with no fence of its own; it moves into the current
    /// frame's `pending` list until the frame's own in-flight fence proves
    /// it retired (spec §4.4 `submit_command_buffer`).
    pub fn submit_command_buffer(&mut self, cmd: &CommandBuffer, submit_info: &SubmitInfo) -> GfxResult<()> {
        let mut wait_semaphores = Vec::new();
        let mut wait_stages = Vec::new();
        let mut signal_semaphores = Vec::new();
        let mut wait_values = Vec::new();
        let mut signal_values = Vec::new();
        self.timeline_submit_info(
            submit_info,
            &mut wait_values,
            &mut signal_values,
            &mut wait_semaphores,
            &mut wait_stages,
            &mut signal_semaphores,
        );

        let command_buffers = [cmd.raw];
        let mut timeline_info = vk::TimelineSemaphoreSubmitInfo::builder()
            .wait_semaphore_values(&wait_values)
            .signal_semaphore_values(&signal_values);
        let submit = vk::SubmitInfo::builder()
            .command_buffers(&command_buffers)
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .signal_semaphores(&signal_semaphores)
            .push_next(&mut timeline_info);

        unsafe { self.raw.queue_submit(self.queue.raw, std::slice::from_ref(&submit), vk::Fence::null())? };
        self.frames.current_mut().retire_to_pending(cmd.raw);
        Ok(())
    }

    /// Blocks until every submission on this device's queue has retired,
    /// then reclaims `cmd` into the current frame's `ready` list if it was
    /// pending. There is no per-submission fence to wait on selectively
    /// (spec §4.4 submits with none), so this is as coarse as a
    /// `vkQueueWaitIdle` — callers that need finer-grained waits should use
    /// a timeline semaphore instead.
    pub fn wait_on_command_buffer(&mut self, cmd: &CommandBuffer) -> GfxResult<()> {
        unsafe { self.raw.queue_wait_idle(self.queue.raw)? };
        let frame = self.frames.current_mut();
        if frame.take_pending(cmd.raw) {
            frame.return_to_ready(cmd.raw);
        }
        Ok(())
    }

    /// Returns a recorded-but-never-submitted buffer directly to the
    /// current frame's `ready` list (spec §4.4 `return_command_buffer`).
    pub fn return_command_buffer(&mut self, cmd: CommandBuffer) {
        self.frames.current_mut().return_to_ready(cmd.raw);
    }

    /// Explicitly resets one command buffer's recorded state without
    /// touching the rest of the pool (spec §4.4 `reset_command_buffer`).
    pub fn reset_command_buffer(&self, cmd: &CommandBuffer) -> GfxResult<()> {
        unsafe { self.raw.reset_command_buffer(cmd.raw, vk::CommandBufferResetFlags::empty())? };
        Ok(())
    }

    /// Submits `cmd` using the current frame's in-flight fence, waiting on
    /// `image_available` plus any caller timeline waits and signaling
    /// `render_finished` plus any caller timeline signals, then queues a
    /// present (spec §4.4 `present`). Returns `false` (having already
    /// recreated the swapchain internally) if the present came back
    /// out-of-date/suboptimal, matching `acquire_swapchain_image`'s policy.
    pub fn present(
        &mut self,
        cmd: &CommandBuffer,
        submit_info: &SubmitInfo,
        swapchain: &mut Swapchain,
        fallback_extent: vk::Extent2D,
        image_index: u32,
    ) -> GfxResult<bool> {
        let frame = self.frames.current();
        let image_available = frame.image_available;
        let render_finished = frame.render_finished;
        let in_flight_fence = frame.in_flight_fence;

        let mut wait_semaphores = vec![image_available];
        let mut wait_stages = vec![vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let mut signal_semaphores = vec![render_finished];
        // Binary semaphores carry no meaningful "value" for
        // VkTimelineSemaphoreSubmitInfo; padded with 0 so the wait/signal
        // arrays stay the same length as their semaphore arrays.
        let mut wait_values = vec![0u64];
        let mut signal_values = vec![0u64];
        self.timeline_submit_info(
            submit_info,
            &mut wait_values,
            &mut signal_values,
            &mut wait_semaphores,
            &mut wait_stages,
            &mut signal_semaphores,
        );

        let command_buffers = [cmd.raw];
        let mut timeline_info = vk::TimelineSemaphoreSubmitInfo::builder()
            .wait_semaphore_values(&wait_values)
            .signal_semaphore_values(&signal_values);
        let submit = vk::SubmitInfo::builder()
            .command_buffers(&command_buffers)
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .signal_semaphores(&signal_semaphores)
            .push_next(&mut timeline_info);

        unsafe {
            self.raw.queue_submit(self.queue.raw, std::slice::from_ref(&submit), in_flight_fence)?;
        }
        self.frames.current_mut().retire_to_pending(cmd.raw);

        swapchain.present(self, fallback_extent, render_finished, image_index)
    }

    pub fn get_buffer(&self, handle: Handle<Buffer>) -> Option<vk::Buffer> {
        self.buffers.resolve_hot(handle).map(|hot| hot.raw)
    }

    pub fn get_texture(&self, handle: Handle<Texture>) -> Option<vk::Image> {
        self.textures.resolve_hot(handle).map(|hot| hot.raw)
    }

    pub fn get_texture_view(&self, handle: Handle<TextureView>) -> Option<vk::ImageView> {
        self.texture_views.resolve_hot(handle).map(|hot| hot.raw)
    }

    pub fn get_sampler(&self, handle: Handle<Sampler>) -> Option<vk::Sampler> {
        self.samplers.resolve_hot(handle).map(|hot| hot.raw)
    }

    pub fn get_shader(&self, handle: Handle<Shader>) -> Option<vk::Pipeline> {
        self.shaders.resolve_hot(handle).map(|hot| hot.pipeline)
    }

    pub fn get_compute_shader(&self, handle: Handle<ComputeShader>) -> Option<vk::Pipeline> {
        self.compute_shaders.resolve_hot(handle).map(|hot| hot.pipeline)
    }

    pub fn get_render_pass(&self, handle: Handle<RenderPass>) -> Option<vk::RenderPass> {
        self.render_passes.resolve_hot(handle).map(|hot| hot.raw)
    }

    pub fn get_bind_group(&self, handle: Handle<BindGroup>) -> Option<vk::DescriptorSet> {
        self.bind_groups.resolve_hot(handle).map(|hot| hot.raw)
    }

    pub fn get_semaphore(&self, handle: Handle<TimelineSemaphore>) -> Option<vk::Semaphore> {
        self.semaphores.resolve_hot(handle).map(|hot| hot.raw)
    }
}
