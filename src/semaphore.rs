//! Timeline semaphores (spec §4.1/§4.4), used by encoders for
//! cross-queue/cross-frame synchronization beyond the frame ring's own
//! image-available/render-finished pair.

use ash::vk;

use crate::device::Device;
use crate::error::GfxResult;
use crate::handle::Handle;

#[derive(Default, Clone, Copy)]
pub struct TimelineSemaphore {
    pub(crate) raw: vk::Semaphore,
}

impl Device {
    pub fn create_timeline_semaphore(&mut self, initial_value: u64) -> GfxResult<Handle<TimelineSemaphore>> {
        let mut type_create_info = vk::SemaphoreTypeCreateInfo::builder()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(initial_value);
        let create_info = vk::SemaphoreCreateInfo::builder().push_next(&mut type_create_info);

        let raw = unsafe { self.raw.create_semaphore(&create_info, None)? };
        Ok(self.semaphores.insert(TimelineSemaphore { raw }, ()))
    }

    pub fn destroy_timeline_semaphore(&mut self, handle: Handle<TimelineSemaphore>) -> GfxResult<()> {
        let (hot, _cold) = self
            .semaphores
            .queue_free(handle)
            .ok_or_else(|| crate::error::GfxError::Validation("stale semaphore handle".into()))?;
        self.frames.current_mut().garbage.push_semaphore(hot.raw);
        Ok(())
    }

    pub fn get_semaphore_value(&self, handle: Handle<TimelineSemaphore>) -> GfxResult<u64> {
        let hot = self
            .semaphores
            .resolve_hot(handle)
            .ok_or_else(|| crate::error::GfxError::Validation("stale semaphore handle".into()))?;
        Ok(unsafe { self.raw.get_semaphore_counter_value(hot.raw)? })
    }

    pub fn signal_semaphore(&self, handle: Handle<TimelineSemaphore>, value: u64) -> GfxResult<()> {
        let hot = self
            .semaphores
            .resolve_hot(handle)
            .ok_or_else(|| crate::error::GfxError::Validation("stale semaphore handle".into()))?;
        let signal_info = vk::SemaphoreSignalInfo::builder().semaphore(hot.raw).value(value);
        unsafe { self.raw.signal_semaphore(&signal_info)? };
        Ok(())
    }

    pub fn wait_semaphore(&self, handle: Handle<TimelineSemaphore>, value: u64, timeout_ns: u64) -> GfxResult<bool> {
        let hot = self
            .semaphores
            .resolve_hot(handle)
            .ok_or_else(|| crate::error::GfxError::Validation("stale semaphore handle".into()))?;
        let semaphores = [hot.raw];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::builder()
            .semaphores(&semaphores)
            .values(&values);
        match unsafe { self.raw.wait_semaphores(&wait_info, timeout_ns) } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
