//! Error taxonomy.
//!
//! The core does not retry anything itself (spec §7): it either surfaces an
//! error for the caller to act on, or — for `SwapchainOutOfDate` only —
//! handles it internally and reports a `false` return instead (see
//! `Device::begin_frame` and `Device::present`).

use ash::vk;

#[derive(Debug, thiserror::Error)]
pub enum GfxError {
    /// A violated precondition: stale handle, encoding outside a pass,
    /// a dynamic allocation larger than `DynamicDataMaxSize`, and so on.
    #[error("validation error: {0}")]
    Validation(String),

    /// The driver reported a fatal, unrecoverable status. Any call made on
    /// the device after this is unsafe.
    #[error("device lost")]
    DeviceLost,

    /// A `vkAllocateMemory` (or equivalent) call failed. The caller's own
    /// allocator may retry with a different strategy; the core does not.
    #[error("out of memory")]
    OutOfMemory,

    /// Shader module creation failed. Also reported by a generation-zero
    /// handle coming back from `create_shader`/`create_compute_shader`.
    #[error("shader compilation failed: {0}")]
    ShaderCompilationFailed(String),

    /// A raw, unhandled driver return code. Anything that reaches here and
    /// isn't one of the above is a programming error, per §7's policy.
    #[error("vulkan error: {0:?}")]
    Vulkan(vk::Result),
}

impl From<vk::Result> for GfxError {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
                GfxError::OutOfMemory
            }
            vk::Result::ERROR_DEVICE_LOST => GfxError::DeviceLost,
            other => GfxError::Vulkan(other),
        }
    }
}

pub type GfxResult<T> = Result<T, GfxError>;
