//! Buffers (spec §4.1).

use ash::vk;
use bitflags::bitflags;

use crate::device::Device;
use crate::error::GfxResult;
use crate::handle::Handle;
use crate::memory::{Allocation, AllocationRequest, MemoryMode};

bitflags! {
    pub struct BufferUsage: u32 {
        const VERTEX = 0b0000_0001;
        const INDEX = 0b0000_0010;
        const UNIFORM = 0b0000_0100;
        const STORAGE = 0b0000_1000;
        const INDIRECT = 0b0001_0000;
        const TRANSFER_SRC = 0b0010_0000;
        const TRANSFER_DST = 0b0100_0000;
    }
}

impl BufferUsage {
    fn to_vk(self) -> vk::BufferUsageFlags {
        let mut flags = vk::BufferUsageFlags::empty();
        if self.contains(BufferUsage::VERTEX) {
            flags |= vk::BufferUsageFlags::VERTEX_BUFFER;
        }
        if self.contains(BufferUsage::INDEX) {
            flags |= vk::BufferUsageFlags::INDEX_BUFFER;
        }
        if self.contains(BufferUsage::UNIFORM) {
            flags |= vk::BufferUsageFlags::UNIFORM_BUFFER;
        }
        if self.contains(BufferUsage::STORAGE) {
            flags |= vk::BufferUsageFlags::STORAGE_BUFFER;
        }
        if self.contains(BufferUsage::INDIRECT) {
            flags |= vk::BufferUsageFlags::INDIRECT_BUFFER;
        }
        if self.contains(BufferUsage::TRANSFER_SRC) {
            flags |= vk::BufferUsageFlags::TRANSFER_SRC;
        }
        if self.contains(BufferUsage::TRANSFER_DST) {
            flags |= vk::BufferUsageFlags::TRANSFER_DST;
        }
        flags
    }
}

#[derive(Debug, Clone)]
pub struct BufferDesc<'a> {
    pub size: u64,
    pub usage: BufferUsage,
    pub mode: MemoryMode,
    pub label: &'a str,
}

/// Hot: touched on every bind/draw.
#[derive(Default, Clone, Copy)]
pub struct Buffer {
    pub(crate) raw: vk::Buffer,
}

/// Cold: full descriptor plus the backing allocation, touched only at
/// creation/destruction and by introspection queries.
#[derive(Default)]
pub struct BufferCold {
    pub(crate) size: u64,
    pub(crate) usage: vk::BufferUsageFlags,
    pub(crate) allocation: Option<Allocation>,
}

impl Device {
    /// Creates the driver object only. No memory is bound yet; the caller
    /// drives that separately through [`Device::buffer_memory_requirements`],
    /// [`Device::allocate_memory`] and [`Device::bind_buffer_to_memory`]
    /// (spec §4.2/§6 — creation and memory binding are distinct operations).
    pub fn create_buffer(&mut self, desc: &BufferDesc<'_>) -> GfxResult<Handle<Buffer>> {
        let usage = desc.usage.to_vk();
        let create_info = vk::BufferCreateInfo::builder()
            .size(desc.size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let raw = unsafe { self.raw.create_buffer(&create_info, None)? };

        let handle = self.buffers.insert(
            Buffer { raw },
            BufferCold {
                size: desc.size,
                usage,
                allocation: None,
            },
        );
        Ok(handle)
    }

    /// Convenience wrapper over `create_buffer` + `allocate_memory` +
    /// `bind_buffer_to_memory` for the common case of wanting a bound buffer
    /// in one call, using `desc.mode` to pick the memory type and `desc.label`
    /// as the allocator tag.
    pub fn create_buffer_bound(&mut self, desc: &BufferDesc<'_>) -> GfxResult<Handle<Buffer>> {
        let handle = self.create_buffer(desc)?;
        let requirements = match self.buffer_memory_requirements(handle) {
            Ok(requirements) => requirements,
            Err(e) => {
                let _ = self.destroy_buffer(handle);
                return Err(e);
            }
        };
        let allocation = match self.allocator.allocate(
            &self.raw,
            &AllocationRequest {
                memory_type_bits: requirements.memory_type_bits,
                size: requirements.size,
                alignment: requirements.alignment,
                mode: desc.mode,
                tag: desc.label,
            },
        ) {
            Ok(allocation) => allocation,
            Err(e) => {
                let _ = self.destroy_buffer(handle);
                return Err(e);
            }
        };
        if let Err(e) = self.bind_buffer_to_memory(handle, allocation) {
            let _ = self.destroy_buffer(handle);
            return Err(e);
        }
        Ok(handle)
    }

    /// Queries the driver's memory requirements (type filter, size,
    /// alignment) for a buffer created but not yet bound.
    pub fn buffer_memory_requirements(&self, handle: Handle<Buffer>) -> GfxResult<vk::MemoryRequirements> {
        let hot = self
            .buffers
            .resolve_hot(handle)
            .ok_or_else(|| crate::error::GfxError::Validation("stale buffer handle".into()))?;
        Ok(unsafe { self.raw.get_buffer_memory_requirements(hot.raw) })
    }

    /// Binds `allocation` to `handle`'s driver buffer (spec §6
    /// `bind_buffer_to_memory`). The allocation becomes the buffer's own —
    /// it is freed automatically when the buffer is destroyed and its
    /// garbage is collected.
    pub fn bind_buffer_to_memory(&mut self, handle: Handle<Buffer>, allocation: Allocation) -> GfxResult<()> {
        let hot = self
            .buffers
            .resolve_hot(handle)
            .ok_or_else(|| crate::error::GfxError::Validation("stale buffer handle".into()))?;
        unsafe {
            self.raw
                .bind_buffer_memory(hot.raw, allocation.device_memory(), allocation.offset())?
        };
        let cold = self.buffers.resolve_cold_mut(handle).unwrap();
        cold.allocation = Some(allocation);
        Ok(())
    }

    /// Invalidates `handle` immediately and pushes the driver object into
    /// the current frame's garbage list for destruction no earlier than
    /// frame F+N (spec §4.5).
    pub fn destroy_buffer(&mut self, handle: Handle<Buffer>) -> GfxResult<()> {
        let (hot, cold) = self
            .buffers
            .queue_free(handle)
            .ok_or_else(|| crate::error::GfxError::Validation("stale buffer handle".into()))?;
        self.frames.current_mut().garbage.push_buffer(hot.raw, cold.allocation);
        Ok(())
    }

    pub fn buffer_size(&self, handle: Handle<Buffer>) -> Option<u64> {
        self.buffers.resolve_cold(handle).map(|cold| cold.size)
    }

    pub fn map_buffer(&self, handle: Handle<Buffer>) -> Option<*mut u8> {
        self.buffers
            .resolve_cold(handle)
            .and_then(|cold| cold.allocation.as_ref())
            .and_then(|a| a.mapped_ptr())
    }
}
