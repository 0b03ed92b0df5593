//! Memory Block Allocator Interface (spec §2.2/§3).
//!
//! `gfx2` is not an allocator library: it defines the capability a caller's
//! allocator must implement, and ships exactly one built-in implementation
//! that "simply forwards to the driver" — a dedicated `vkAllocateMemory`
//! per request, no sub-allocation. Real engines plug in something smarter
//! (a pool suballocator, `vk-mem`, ...) behind the same trait.

use std::fmt;
use std::sync::Arc;

use ash::vk;

use crate::error::{GfxError, GfxResult};

/// Where a piece of device memory can be accessed from (spec §3's
/// `memory mode {GPU, GPU_CPU, CPU}`).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum MemoryMode {
    /// Device-local only; fastest for the GPU, not host-visible.
    Gpu,
    /// Host-visible and host-coherent, but also device-local where
    /// available (upload-once/draw-many resources on UMA or ReBAR).
    GpuCpu,
    /// Host-visible, not necessarily device-local (staging buffers).
    Cpu,
}

impl MemoryMode {
    pub(crate) fn required_property_flags(self) -> vk::MemoryPropertyFlags {
        match self {
            MemoryMode::Gpu => vk::MemoryPropertyFlags::DEVICE_LOCAL,
            MemoryMode::GpuCpu => {
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
            }
            MemoryMode::Cpu => {
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
            }
        }
    }

    pub(crate) fn preferred_property_flags(self) -> vk::MemoryPropertyFlags {
        match self {
            MemoryMode::GpuCpu => vk::MemoryPropertyFlags::DEVICE_LOCAL,
            _ => vk::MemoryPropertyFlags::empty(),
        }
    }
}

/// A request passed to a [`MemoryAllocator`]. Mirrors
/// `allocate(type_filter, size, alignment, tag) -> Allocation` from spec §2.2.
#[derive(Debug, Clone)]
pub struct AllocationRequest<'a> {
    /// Bitmask of acceptable Vulkan memory type indices
    /// (`VkMemoryRequirements::memoryTypeBits`).
    pub memory_type_bits: u32,
    pub size: u64,
    pub alignment: u64,
    pub mode: MemoryMode,
    /// Debug label, surfaced in allocator logs and (if the driver supports
    /// it) object names. Never interpreted.
    pub tag: &'a str,
}

/// A live piece of device memory handed back to the core. Every live
/// resource holds at most one (spec §3). Freed through the same
/// [`MemoryAllocator`] that produced it — nothing here tracks which one that
/// was, so callers must not mix allocators for a given `Device`.
pub struct Allocation {
    pub(crate) device_memory: vk::DeviceMemory,
    pub(crate) offset: u64,
    pub(crate) size: u64,
    pub(crate) mode: MemoryMode,
    /// Non-null only for `GpuCpu`/`Cpu` allocations, persistently mapped for
    /// the lifetime of the allocation (spec §3 `host-mapped pointer`).
    pub(crate) mapped_ptr: Option<std::ptr::NonNull<u8>>,
}

// SAFETY: the mapped pointer is only ever dereferenced by the owning
// `Device`, which is itself confined to one thread per spec §5; `Allocation`
// is moved around, never aliased across threads without external
// synchronization.
unsafe impl Send for Allocation {}

impl fmt::Debug for Allocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Allocation")
            .field("device_memory", &self.device_memory)
            .field("offset", &self.offset)
            .field("size", &self.size)
            .field("mode", &self.mode)
            .finish()
    }
}

impl Allocation {
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn mode(&self) -> MemoryMode {
        self.mode
    }

    pub fn device_memory(&self) -> vk::DeviceMemory {
        self.device_memory
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Host-mapped pointer to the start of this allocation, if host-visible.
    pub fn mapped_ptr(&self) -> Option<*mut u8> {
        self.mapped_ptr.map(|p| p.as_ptr())
    }
}

/// The capability every `create_buffer`/`create_texture` caller eventually
/// binds memory through (spec §2.2). Implementations are free to
/// suballocate; the core never assumes a 1:1 mapping between `Allocation`
/// and `VkDeviceMemory` objects beyond what `free` requires them to honor.
pub trait MemoryAllocator: Send + Sync {
    fn allocate(&self, device: &ash::Device, request: &AllocationRequest<'_>) -> GfxResult<Allocation>;
    fn free(&self, device: &ash::Device, allocation: Allocation);

    /// Total bytes currently allocated, broken down by mode, for
    /// `get_local_memory_in_use`/`get_host_memory_in_use` (spec §6).
    fn bytes_in_use(&self, mode: MemoryMode) -> u64;
}

/// The one allocator `gfx2` ships: a dedicated `vkAllocateMemory` per
/// request and a matching `vkFreeMemory` on release. No pooling, no
/// suballocation — "forwards to the driver" (spec §2.2).
pub struct DriverForwardingAllocator {
    memory_types: Vec<vk::MemoryType>,
    gpu_bytes: std::sync::atomic::AtomicU64,
    gpu_cpu_bytes: std::sync::atomic::AtomicU64,
    cpu_bytes: std::sync::atomic::AtomicU64,
}

impl DriverForwardingAllocator {
    pub fn new(memory_properties: &vk::PhysicalDeviceMemoryProperties) -> Arc<DriverForwardingAllocator> {
        let memory_types =
            memory_properties.memory_types[..memory_properties.memory_type_count as usize].to_vec();
        Arc::new(DriverForwardingAllocator {
            memory_types,
            gpu_bytes: Default::default(),
            gpu_cpu_bytes: Default::default(),
            cpu_bytes: Default::default(),
        })
    }

    fn find_memory_type(&self, request: &AllocationRequest<'_>) -> Option<u32> {
        let required = request.mode.required_property_flags();
        let preferred = request.mode.preferred_property_flags();
        self.memory_types
            .iter()
            .enumerate()
            .filter(|(_, mt)| mt.property_flags.contains(required | preferred))
            .chain(
                self.memory_types
                    .iter()
                    .enumerate()
                    .filter(|(_, mt)| mt.property_flags.contains(required)),
            )
            .find(|&(index, _)| (request.memory_type_bits & (1 << index)) != 0)
            .map(|(index, _)| index as u32)
    }

    fn counter(&self, mode: MemoryMode) -> &std::sync::atomic::AtomicU64 {
        match mode {
            MemoryMode::Gpu => &self.gpu_bytes,
            MemoryMode::GpuCpu => &self.gpu_cpu_bytes,
            MemoryMode::Cpu => &self.cpu_bytes,
        }
    }
}

impl MemoryAllocator for DriverForwardingAllocator {
    fn allocate(&self, device: &ash::Device, request: &AllocationRequest<'_>) -> GfxResult<Allocation> {
        let memory_type_index = self
            .find_memory_type(request)
            .ok_or_else(|| GfxError::Validation("no compatible memory type".into()))?;

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(request.size)
            .memory_type_index(memory_type_index);

        log::debug!(
            "allocating {} bytes in memory type {} for '{}'",
            request.size,
            memory_type_index,
            request.tag
        );

        let device_memory = unsafe { device.allocate_memory(&alloc_info, None)? };

        let mapped_ptr = if request.mode != MemoryMode::Gpu {
            let ptr = unsafe {
                device.map_memory(device_memory, 0, request.size, vk::MemoryMapFlags::empty())?
            };
            std::ptr::NonNull::new(ptr as *mut u8)
        } else {
            None
        };

        self.counter(request.mode)
            .fetch_add(request.size, std::sync::atomic::Ordering::Relaxed);

        Ok(Allocation {
            device_memory,
            offset: 0,
            size: request.size,
            mode: request.mode,
            mapped_ptr,
        })
    }

    fn free(&self, device: &ash::Device, allocation: Allocation) {
        self.counter(allocation.mode)
            .fetch_sub(allocation.size, std::sync::atomic::Ordering::Relaxed);
        unsafe {
            if allocation.mapped_ptr.is_some() {
                device.unmap_memory(allocation.device_memory);
            }
            device.free_memory(allocation.device_memory, None);
        }
    }

    fn bytes_in_use(&self, mode: MemoryMode) -> u64 {
        self.counter(mode).load(std::sync::atomic::Ordering::Relaxed)
    }
}

impl crate::device::Device {
    /// Raw allocator entry point (spec §6 `allocate_memory(size, mode,
    /// type_filter, tag)`). Most callers go through
    /// `create_buffer`/`create_texture`'s `*_memory_requirements` plus this,
    /// rather than guessing `type_filter` themselves.
    pub fn allocate_memory(&self, size: u64, mode: MemoryMode, type_filter: u32, tag: &str) -> GfxResult<Allocation> {
        self.allocator.allocate(
            &self.raw,
            &AllocationRequest {
                memory_type_bits: type_filter,
                size,
                alignment: 1,
                mode,
                tag,
            },
        )
    }

    /// Releases an allocation not currently bound to any live resource.
    /// Bound allocations are freed automatically through the garbage ring
    /// when their owning buffer/texture is destroyed; call this only for
    /// allocations you hold outside that lifecycle.
    pub fn free_memory(&self, allocation: Allocation) {
        self.allocator.free(&self.raw, allocation);
    }
}
