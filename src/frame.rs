//! Frame Context Ring (spec §2 item 4, §4.2).
//!
//! `N` frame contexts (2 or 3, `GraphicsConfig::frames_in_flight`) cycle in
//! round-robin as `begin_frame` is called. Each context owns everything a
//! frame's recording touches that must not be shared with another
//! in-flight frame: a command pool, a transient descriptor pool, a dynamic
//! uniform ring, a garbage list, and the semaphore/fence triple the
//! swapchain's acquire/present pair waits on.
//!
//! Reacquiring a context blocks on its in-flight fence — the whole point of
//! the ring is that this wait is normally already satisfied by the time the
//! caller gets back around to it, `N` frames later.

use ash::vk;
use smallvec::SmallVec;

use crate::dynamic_uniform::DynamicUniformRing;
use crate::error::GfxResult;
use crate::garbage::GarbageList;
use crate::memory::MemoryAllocator;

/// A frame rarely has more than a handful of command buffers open at once
/// (one per encoder-bearing renderer pass), so both lists stay inline
/// until a renderer does something unusual.
type CommandBufferList = SmallVec<[vk::CommandBuffer; 4]>;

pub struct FrameContext {
    pub(crate) command_pool: vk::CommandPool,
    pub(crate) transient_descriptor_pool: vk::DescriptorPool,
    pub(crate) dynamic_uniforms: DynamicUniformRing,
    pub(crate) garbage: GarbageList,
    pub(crate) image_available: vk::Semaphore,
    pub(crate) render_finished: vk::Semaphore,
    pub(crate) in_flight_fence: vk::Fence,
    /// Previously submitted buffers now safe to record into again.
    ready: CommandBufferList,
    /// Submitted this frame via `submit_command_buffer` (no fence of their
    /// own — spec §4.4), not yet known safe to reuse. Becomes safe exactly
    /// when this context's `in_flight_fence` next signals, since every
    /// submission made through this context executes in queue order no
    /// later than the submission that fence guards (spec §5).
    pending: CommandBufferList,
}

pub struct FrameRing {
    frames: Vec<FrameContext>,
    current: usize,
    /// Monotonically increasing frame counter, surfaced for diagnostics and
    /// for callers correlating frame index with external timeline
    /// semaphores.
    pub(crate) frame_number: u64,
}

fn create_transient_pool(device: &ash::Device, max_sets: u32) -> GfxResult<vk::DescriptorPool> {
    let pool_sizes = [
        vk::DescriptorPoolSize { ty: vk::DescriptorType::UNIFORM_BUFFER, descriptor_count: max_sets },
        vk::DescriptorPoolSize { ty: vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC, descriptor_count: max_sets },
        vk::DescriptorPoolSize { ty: vk::DescriptorType::STORAGE_BUFFER, descriptor_count: max_sets },
        vk::DescriptorPoolSize { ty: vk::DescriptorType::SAMPLED_IMAGE, descriptor_count: max_sets },
        vk::DescriptorPoolSize { ty: vk::DescriptorType::SAMPLER, descriptor_count: max_sets },
    ];
    let create_info = vk::DescriptorPoolCreateInfo::builder().max_sets(max_sets).pool_sizes(&pool_sizes);
    Ok(unsafe { device.create_descriptor_pool(&create_info, None)? })
}

impl FrameContext {
    fn new(
        device: &ash::Device,
        queue_family_index: u32,
        transient_descriptor_pool_size: u32,
        dynamic_buffer_block_size: u64,
        dynamic_data_max_size: u64,
    ) -> GfxResult<FrameContext> {
        let pool_create_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(queue_family_index)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);
        let command_pool = unsafe { device.create_command_pool(&pool_create_info, None)? };

        let transient_descriptor_pool =
            create_transient_pool(device, transient_descriptor_pool_size)?;

        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        let image_available = unsafe { device.create_semaphore(&semaphore_info, None)? };
        let render_finished = unsafe { device.create_semaphore(&semaphore_info, None)? };

        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);
        let in_flight_fence = unsafe { device.create_fence(&fence_info, None)? };

        Ok(FrameContext {
            command_pool,
            transient_descriptor_pool,
            dynamic_uniforms: DynamicUniformRing::new(dynamic_buffer_block_size, dynamic_data_max_size),
            garbage: GarbageList::default(),
            image_available,
            render_finished,
            in_flight_fence,
            ready: SmallVec::new(),
            pending: SmallVec::new(),
        })
    }

    /// Pops a reusable buffer from `ready`, else allocates a fresh primary
    /// command buffer from this context's pool (spec §4.4
    /// `begin_command_recording`).
    pub(crate) fn acquire_command_buffer(&mut self, device: &ash::Device) -> GfxResult<vk::CommandBuffer> {
        if let Some(cmd) = self.ready.pop() {
            return Ok(cmd);
        }
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let bufs = unsafe { device.allocate_command_buffers(&alloc_info)? };
        Ok(bufs[0])
    }

    /// Moves `cmd` into `pending` (spec §4.4 `submit_command_buffer`).
    pub(crate) fn retire_to_pending(&mut self, cmd: vk::CommandBuffer) {
        self.pending.push(cmd);
    }

    /// Returns `cmd` directly to `ready` without going through `pending` —
    /// e.g. a caller recorded it but decided not to submit it
    /// (`return_command_buffer`).
    pub(crate) fn return_to_ready(&mut self, cmd: vk::CommandBuffer) {
        self.ready.push(cmd);
    }

    /// Removes `cmd` from `pending` if present, returning whether it was
    /// found there. Used by `wait_on_command_buffer`, which blocks the
    /// queue first and so can promise the buffer is retired regardless.
    pub(crate) fn take_pending(&mut self, cmd: vk::CommandBuffer) -> bool {
        if let Some(position) = self.pending.iter().position(|&c| c == cmd) {
            self.pending.swap_remove(position);
            true
        } else {
            false
        }
    }

    fn destroy(&mut self, device: &ash::Device, allocator: &dyn MemoryAllocator) {
        self.garbage.drain(device, allocator);
        self.dynamic_uniforms.destroy(device, allocator);
        unsafe {
            device.destroy_command_pool(self.command_pool, None);
            device.destroy_descriptor_pool(self.transient_descriptor_pool, None);
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_fence(self.in_flight_fence, None);
        }
    }
}

impl FrameRing {
    pub fn new(device: &ash::Device, queue_family_index: u32, frames_in_flight: u8) -> GfxResult<FrameRing> {
        Self::with_config(
            device,
            queue_family_index,
            frames_in_flight,
            1024,
            crate::config::DEFAULT_DYNAMIC_BUFFER_BLOCK_SIZE,
            crate::config::DEFAULT_DYNAMIC_DATA_MAX_SIZE,
        )
    }

    pub fn with_config(
        device: &ash::Device,
        queue_family_index: u32,
        frames_in_flight: u8,
        transient_descriptor_pool_size: u32,
        dynamic_buffer_block_size: u64,
        dynamic_data_max_size: u64,
    ) -> GfxResult<FrameRing> {
        let mut frames = Vec::with_capacity(frames_in_flight as usize);
        for _ in 0..frames_in_flight {
            frames.push(FrameContext::new(
                device,
                queue_family_index,
                transient_descriptor_pool_size,
                dynamic_buffer_block_size,
                dynamic_data_max_size,
            )?);
        }
        Ok(FrameRing { frames, current: 0, frame_number: 0 })
    }

    pub fn current(&self) -> &FrameContext {
        &self.frames[self.current]
    }

    pub fn current_mut(&mut self) -> &mut FrameContext {
        &mut self.frames[self.current]
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Waits on the next context's in-flight fence, garbage-collects it,
    /// resets its transient pool and dynamic uniform ring, and advances the
    /// ring cursor (spec §4.2 `begin_frame`'s frame-context half).
    pub fn advance(&mut self, device: &ash::Device, allocator: &dyn MemoryAllocator) -> GfxResult<()> {
        self.current = (self.current + 1) % self.frames.len();
        self.frame_number += 1;

        let frame = &mut self.frames[self.current];
        let fences = [frame.in_flight_fence];
        unsafe { device.wait_for_fences(&fences, true, u64::MAX)? };

        frame.garbage.drain(device, allocator);
        frame.dynamic_uniforms.reset();
        // Every buffer submitted through this context executed in queue
        // order no later than the submission this fence guards, so all of
        // them are retired too.
        frame.ready.append(&mut frame.pending);
        unsafe {
            device.reset_command_pool(frame.command_pool, vk::CommandPoolResetFlags::empty())?;
            device.reset_descriptor_pool(frame.transient_descriptor_pool, vk::DescriptorPoolResetFlags::empty())?;
            device.reset_fences(&fences)?;
        }
        Ok(())
    }

    pub fn destroy(&mut self, device: &ash::Device, allocator: &dyn MemoryAllocator) {
        for frame in &mut self.frames {
            frame.destroy(device, allocator);
        }
    }
}
