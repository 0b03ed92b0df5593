//! Device/frame-ring tuning knobs.
//!
//! Mirrors the teacher's `cfg.get::<T>("gfx.xxx")` style (see the old
//! `Context::new`), but collapsed into a plain struct with sane defaults so
//! callers that don't care about tuning don't need a `config::Config` at
//! all. Callers that do can still build one from a `config::Config` source
//! with [`GraphicsConfig::from_config`].

use config::Config;

/// Bytes per dynamic-uniform block (spec §4.6). The original
/// (`pl_graphics_vulkan.c`) defaults this to 128 MiB.
pub const DEFAULT_DYNAMIC_BUFFER_BLOCK_SIZE: u64 = 134_217_728;

/// Maximum size of a single `allocate_dynamic_data` request, and the stride
/// every allocation is padded to so a dynamic-offset descriptor can address
/// any allocation in a block. The original defaults this to 256 B.
pub const DEFAULT_DYNAMIC_DATA_MAX_SIZE: u64 = 256;

/// Threshold (in bytes) above which the built-in allocator always performs
/// a dedicated `vkAllocateMemory` rather than attempting to pack sub-byte
/// allocations — the built-in allocator is a "forwards to the driver" one
/// (spec §2.2), so in practice every allocation is dedicated, but the field
/// is kept so a pluggable suballocating implementation has somewhere to
/// read the same policy from.
pub const DEFAULT_DEDICATED_ALLOC_THRESHOLD: u64 = 0;

#[derive(Debug, Clone)]
pub struct GraphicsConfig {
    /// Number of frame contexts in the ring (spec §2 item 4). 2 or 3.
    pub frames_in_flight: u8,
    pub dynamic_buffer_block_size: u64,
    pub dynamic_data_max_size: u64,
    /// Extra Vulkan instance layers beyond the validation layer enabled in
    /// debug builds (teacher's `gfx.vulkan.layers`).
    pub instance_layers: Vec<String>,
    /// Extra Vulkan instance extensions beyond the ones required for
    /// windowing surface creation (teacher's `gfx.vulkan.instance_extensions`).
    pub instance_extensions: Vec<String>,
    /// Prefer `VK_PRESENT_MODE_MAILBOX_KHR`/`IMMEDIATE` over `FIFO` (spec §4.7).
    pub vsync: bool,
    /// Size of a persistent descriptor pool allocation at device creation.
    pub persistent_descriptor_pool_size: u32,
    /// Size of each frame's transient descriptor pool, reset every
    /// `begin_frame` (spec §3 per-frame state).
    pub transient_descriptor_pool_size: u32,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        GraphicsConfig {
            frames_in_flight: 2,
            dynamic_buffer_block_size: DEFAULT_DYNAMIC_BUFFER_BLOCK_SIZE,
            dynamic_data_max_size: DEFAULT_DYNAMIC_DATA_MAX_SIZE,
            instance_layers: Vec::new(),
            instance_extensions: Vec::new(),
            vsync: true,
            persistent_descriptor_pool_size: 4096,
            transient_descriptor_pool_size: 1024,
        }
    }
}

impl GraphicsConfig {
    /// Reads overrides from a `config::Config`, falling back to
    /// [`GraphicsConfig::default`] for anything absent. Missing keys are not
    /// an error — unlike the teacher's `Context::new`, which `.unwrap()`s
    /// every lookup, a library shouldn't force every embedder to ship a
    /// complete `gfx.*` table.
    pub fn from_config(cfg: &Config) -> GraphicsConfig {
        let defaults = GraphicsConfig::default();
        GraphicsConfig {
            frames_in_flight: cfg
                .get::<u8>("gfx.frames_in_flight")
                .unwrap_or(defaults.frames_in_flight),
            dynamic_buffer_block_size: cfg
                .get::<u64>("gfx.vulkan.dynamic_buffer_block_size")
                .unwrap_or(defaults.dynamic_buffer_block_size),
            dynamic_data_max_size: cfg
                .get::<u64>("gfx.vulkan.dynamic_data_max_size")
                .unwrap_or(defaults.dynamic_data_max_size),
            instance_layers: cfg
                .get::<Vec<String>>("gfx.vulkan.layers")
                .unwrap_or(defaults.instance_layers),
            instance_extensions: cfg
                .get::<Vec<String>>("gfx.vulkan.instance_extensions")
                .unwrap_or(defaults.instance_extensions),
            vsync: cfg.get::<bool>("gfx.vsync").unwrap_or(defaults.vsync),
            persistent_descriptor_pool_size: cfg
                .get::<u32>("gfx.vulkan.persistent_descriptor_pool_size")
                .unwrap_or(defaults.persistent_descriptor_pool_size),
            transient_descriptor_pool_size: cfg
                .get::<u32>("gfx.vulkan.transient_descriptor_pool_size")
                .unwrap_or(defaults.transient_descriptor_pool_size),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_original_implementation_constants() {
        let cfg = GraphicsConfig::default();
        assert_eq!(cfg.dynamic_buffer_block_size, 134_217_728);
        assert_eq!(cfg.dynamic_data_max_size, 256);
        assert_eq!(cfg.frames_in_flight, 2);
    }
}
