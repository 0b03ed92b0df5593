//! Dynamic uniform ring (spec §4.6).
//!
//! A bump allocator over one or more "blocks" — plain host-visible uniform
//! buffers sized `DynamicBufferBlockSize` bytes (128 MiB by default,
//! matching the original `pl_graphics_vulkan.c` constant). Every allocation
//! is padded up to `DynamicDataMaxSize` (256 B default) so a single dynamic
//! descriptor offset can address any allocation in the block regardless of
//! its actual size — the same reasoning `align_offset` in the teacher's
//! upload-buffer ring used, generalized to a configurable stride instead of
//! a fixed 16-byte GPU alignment.
//!
//! One ring lives per frame context; `reset` is called when that frame
//! comes back around after its fence has signaled, which is also when any
//! data written into the ring last time it was live is guaranteed no
//! longer read by the GPU.

use ash::vk;

use crate::error::{GfxError, GfxResult};
use crate::memory::{Allocation, AllocationRequest, MemoryMode};

struct UniformBlock {
    buffer: vk::Buffer,
    allocation: Allocation,
    capacity: u64,
}

pub struct DynamicUniformRing {
    blocks: Vec<UniformBlock>,
    block_size: u64,
    stride: u64,
    cursor: u64,
    current_block: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct DynamicAllocation {
    pub buffer: vk::Buffer,
    pub offset: u64,
    pub size: u64,
}

impl DynamicUniformRing {
    pub fn new(block_size: u64, stride: u64) -> DynamicUniformRing {
        DynamicUniformRing {
            blocks: Vec::new(),
            block_size,
            stride,
            cursor: 0,
            current_block: 0,
        }
    }

    fn grow(
        &mut self,
        device: &ash::Device,
        allocator: &dyn crate::memory::MemoryAllocator,
    ) -> GfxResult<()> {
        let create_info = vk::BufferCreateInfo::builder()
            .size(self.block_size)
            .usage(vk::BufferUsageFlags::UNIFORM_BUFFER)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { device.create_buffer(&create_info, None)? };
        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

        let request = AllocationRequest {
            memory_type_bits: requirements.memory_type_bits,
            size: requirements.size,
            alignment: requirements.alignment,
            mode: MemoryMode::GpuCpu,
            tag: "dynamic uniform block",
        };
        let allocation = match allocator.allocate(device, &request) {
            Ok(a) => a,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        unsafe { device.bind_buffer_memory(buffer, allocation.device_memory(), allocation.offset())? };

        self.blocks.push(UniformBlock {
            buffer,
            allocation,
            capacity: self.block_size,
        });
        Ok(())
    }

    /// Bump-allocates `size` bytes, padded to `stride`, and copies `data`
    /// into the resulting host-mapped region. Fails validation if `size`
    /// exceeds `DynamicDataMaxSize` — larger payloads belong in a regular
    /// buffer, not the dynamic ring (spec §4.6 edge case).
    pub fn allocate_dynamic_data(
        &mut self,
        device: &ash::Device,
        allocator: &dyn crate::memory::MemoryAllocator,
        data: &[u8],
    ) -> GfxResult<DynamicAllocation> {
        if data.len() as u64 > self.stride {
            return Err(GfxError::Validation(format!(
                "dynamic allocation of {} bytes exceeds DynamicDataMaxSize ({})",
                data.len(),
                self.stride
            )));
        }

        if self.blocks.is_empty() {
            self.grow(device, allocator)?;
        }

        let aligned_size = align_up(data.len() as u64, self.stride);
        if self.cursor + aligned_size > self.blocks[self.current_block].capacity {
            self.current_block += 1;
            self.cursor = 0;
            if self.current_block >= self.blocks.len() {
                self.grow(device, allocator)?;
            }
        }

        let block = &self.blocks[self.current_block];
        let offset = self.cursor;
        self.cursor += aligned_size;

        let mapped = block
            .allocation
            .mapped_ptr()
            .ok_or_else(|| GfxError::Validation("dynamic uniform block is not host-mapped".into()))?;
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), mapped.add(offset as usize), data.len());
        }

        Ok(DynamicAllocation {
            buffer: block.buffer,
            offset,
            size: aligned_size,
        })
    }

    /// Rewinds the bump cursor to the start of the first block. Does not
    /// free blocks grown during a particularly large frame — the ring only
    /// grows, matching the original's "one block, rarely two" steady state.
    pub fn reset(&mut self) {
        self.cursor = 0;
        self.current_block = 0;
    }

    pub fn destroy(&mut self, device: &ash::Device, allocator: &dyn crate::memory::MemoryAllocator) {
        for block in self.blocks.drain(..) {
            unsafe { device.destroy_buffer(block.buffer, None) };
            allocator.free(device, block.allocation);
        }
    }
}

fn align_up(offset: u64, alignment: u64) -> u64 {
    (offset + alignment - 1) & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_rounds_to_stride() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(257, 256), 512);
    }
}
