//! Generational-handle resource manager and frame scheduler for a
//! Vulkan-class graphics device.
//!
//! The crate is organized the way the device itself is used: create an
//! [`instance::Instance`], pick an adapter, create a [`device::Device`]
//! against a window surface, then each frame call
//! [`device::Device::begin_frame`], record with the typed encoders in
//! [`encoder`] against a [`device::Device::begin_command_recording`] buffer,
//! and hand it to [`device::Device::present`]. Resources (buffers, textures,
//! samplers, bind groups, shaders, render passes) are created and destroyed
//! through `Device` and referenced everywhere else by generation-checked
//! [`handle::Handle`]s.

pub mod bind_group;
pub mod buffer;
pub mod command;
pub mod config;
pub mod device;
pub mod draw_stream;
pub mod dynamic_uniform;
pub mod encoder;
pub mod error;
pub mod frame;
pub mod garbage;
pub mod handle;
pub mod instance;
pub mod memory;
pub mod pool;
pub mod render_pass;
pub mod sampler;
pub mod semaphore;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod texture;

pub use error::{GfxError, GfxResult};
pub use handle::Handle;
