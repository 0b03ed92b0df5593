//! Vulkan instance bootstrap.
//!
//! One `Entry`/`Instance` per process, shared by every `Device` (spec
//! assumes a single adapter is the common case, but `enumerate_adapters`
//! exists for multi-GPU setups). Debug-build validation is opt-in via
//! `GraphicsConfig::instance_layers`, not forced on — the teacher's
//! `Context::new` always requested `VK_LAYER_KHRONOS_validation`
//! unconditionally in debug builds; here it's one entry a caller adds to
//! `instance_layers` themselves.

use std::ffi::{CStr, CString};

use ash::vk;

use crate::config::GraphicsConfig;
use crate::error::GfxResult;

pub struct Instance {
    pub(crate) entry: ash::Entry,
    pub(crate) raw: ash::Instance,
}

impl Instance {
    /// Creates the `VkInstance`. `required_extensions` comes from
    /// `ash_window::enumerate_required_extensions` for the windowing system
    /// in use; passed in rather than queried here so headless/compute-only
    /// callers don't need a window at all.
    pub fn new(config: &GraphicsConfig, required_extensions: &[*const i8]) -> GfxResult<Instance> {
        let entry = unsafe { ash::Entry::load().map_err(|e| {
            crate::error::GfxError::Validation(format!("failed to load Vulkan library: {}", e))
        })? };

        let app_name = CString::new("gfx2").unwrap();
        let engine_name = CString::new("gfx2").unwrap();
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_2);

        let layer_names: Vec<CString> = config
            .instance_layers
            .iter()
            .map(|s| CString::new(s.as_str()).unwrap())
            .collect();
        let layer_ptrs: Vec<*const i8> = layer_names.iter().map(|s| s.as_ptr()).collect();

        let extra_extension_names: Vec<CString> = config
            .instance_extensions
            .iter()
            .map(|s| CString::new(s.as_str()).unwrap())
            .collect();
        let mut extension_ptrs: Vec<*const i8> = required_extensions.to_vec();
        extension_ptrs.extend(extra_extension_names.iter().map(|s| s.as_ptr()));

        log::info!(
            "creating Vulkan instance with {} layer(s), {} extension(s)",
            layer_ptrs.len(),
            extension_ptrs.len()
        );

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_layer_names(&layer_ptrs)
            .enabled_extension_names(&extension_ptrs);

        let raw = unsafe { entry.create_instance(&create_info, None)? };

        Ok(Instance { entry, raw })
    }

    /// Physical devices available on this instance, in driver-reported
    /// order (spec §4.2 `enumerate_adapters`); the caller picks one and
    /// passes it to `Device::new`.
    pub fn enumerate_adapters(&self) -> GfxResult<Vec<vk::PhysicalDevice>> {
        Ok(unsafe { self.raw.enumerate_physical_devices()? })
    }

    pub fn adapter_name(&self, adapter: vk::PhysicalDevice) -> String {
        let props = unsafe { self.raw.get_physical_device_properties(adapter) };
        let name = unsafe { CStr::from_ptr(props.device_name.as_ptr()) };
        name.to_string_lossy().into_owned()
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            self.raw.destroy_instance(None);
        }
    }
}
