//! Presentation surface creation, one per window (spec §4.7).

use ash::vk;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};

use crate::error::GfxResult;
use crate::instance::Instance;

pub fn required_instance_extensions(
    display_handle: &dyn HasRawDisplayHandle,
) -> GfxResult<Vec<*const i8>> {
    Ok(ash_window::enumerate_required_extensions(display_handle.raw_display_handle())?.to_vec())
}

pub fn create_surface(
    instance: &Instance,
    window: &(impl HasRawDisplayHandle + HasRawWindowHandle),
) -> GfxResult<(ash::extensions::khr::Surface, vk::SurfaceKHR)> {
    let surface_ext = ash::extensions::khr::Surface::new(&instance.entry, &instance.raw);
    let surface = unsafe {
        ash_window::create_surface(
            &instance.entry,
            &instance.raw,
            window.raw_display_handle(),
            window.raw_window_handle(),
            None,
        )?
    };
    Ok((surface_ext, surface))
}
