//! Swapchain bootstrap and per-frame acquire/present (spec §4.7).
//!
//! Format selection walks a fixed preference list —
//! `RGBA8_UNORM`, `BGRA8_UNORM`, `RGBA8_SRGB`, `BGRA8_SRGB`, each paired with
//! `SRGB_NONLINEAR` color space — and falls back to the first format the
//! surface reports if none of the preferred ones are present. Present mode
//! is `MAILBOX` (falling back to `IMMEDIATE`) when `vsync` is off, `FIFO`
//! otherwise; `FIFO` is always supported per the Vulkan spec, so it is also
//! the unconditional fallback.
//!
//! Each swapchain image is wrapped as a [`crate::texture::Texture`]/
//! [`crate::texture::TextureView`] pair in the device's own pools (spec
//! §2 item 7: "wraps its images as textures in the pool"), so the rest of
//! the core can bind a presentation target exactly like any other texture.
//! On recreate, the old views are queued for deletion through the normal
//! generational-pool path — any handle a caller cached across the
//! recreation is immediately stale — and a canonical "main render pass"
//! (one color target, `PRESENT_SRC_KHR` final layout) is lazily compiled on
//! first creation and kept up to date via `update_attachments`.
//!
//! `VK_ERROR_OUT_OF_DATE_KHR`/`VK_SUBOPTIMAL_KHR` from either
//! `acquire_next_image` or `queue_present` are handled here, not surfaced
//! to the caller as a `GfxError`: spec §7 wants `SwapchainOutOfDate`
//! reported as a `false` return, with recreation handled internally.

use ash::vk;
use smallvec::smallvec;

use crate::device::Device;
use crate::error::GfxResult;
use crate::handle::Handle;
use crate::render_pass::{AttachmentOps, RenderPass, RenderPassLayoutDesc, RenderPassTarget, SubpassDesc};
use crate::texture::{Texture, TextureView};

const FORMAT_PREFERENCE: [(vk::Format, vk::ColorSpaceKHR); 4] = [
    (vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
    (vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
    (vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
    (vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
];

fn choose_surface_format(available: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    for &(format, color_space) in &FORMAT_PREFERENCE {
        if let Some(&found) = available
            .iter()
            .find(|f| f.format == format && f.color_space == color_space)
        {
            return found;
        }
    }
    available[0]
}

fn choose_present_mode(available: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if vsync {
        return vk::PresentModeKHR::FIFO;
    }
    if available.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else if available.contains(&vk::PresentModeKHR::IMMEDIATE) {
        vk::PresentModeKHR::IMMEDIATE
    } else {
        vk::PresentModeKHR::FIFO
    }
}

fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, fallback: vk::Extent2D) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: fallback
                .width
                .clamp(capabilities.min_image_extent.width, capabilities.max_image_extent.width),
            height: fallback
                .height
                .clamp(capabilities.min_image_extent.height, capabilities.max_image_extent.height),
        }
    }
}

pub struct Swapchain {
    surface: vk::SurfaceKHR,
    raw: vk::SwapchainKHR,
    format: vk::Format,
    extent: vk::Extent2D,
    textures: Vec<Handle<Texture>>,
    texture_views: Vec<Handle<TextureView>>,
    vsync: bool,
    /// Built against `device.main_render_pass_layout` the first time this
    /// swapchain is created; rebuilt in place (its framebuffers only) on
    /// every subsequent recreate.
    main_pass: Handle<RenderPass>,
}

impl Swapchain {
    pub fn new(device: &mut Device, surface: vk::SurfaceKHR, fallback_extent: vk::Extent2D) -> GfxResult<Swapchain> {
        let mut swapchain = Swapchain {
            surface,
            raw: vk::SwapchainKHR::null(),
            format: vk::Format::UNDEFINED,
            extent: vk::Extent2D { width: 0, height: 0 },
            textures: Vec::new(),
            texture_views: Vec::new(),
            vsync: device.config.vsync,
            main_pass: Handle::null(),
        };
        swapchain.recreate(device, fallback_extent)?;
        Ok(swapchain)
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn texture(&self, index: u32) -> Handle<Texture> {
        self.textures[index as usize]
    }

    pub fn texture_view(&self, index: u32) -> Handle<TextureView> {
        self.texture_views[index as usize]
    }

    pub fn image_count(&self) -> u32 {
        self.textures.len() as u32
    }

    /// The canonical "main render pass" (spec §4.7), one framebuffer per
    /// swapchain image, kept current across recreation.
    pub fn main_render_pass(&self) -> Handle<RenderPass> {
        self.main_pass
    }

    fn ensure_main_render_pass_layout(device: &mut Device, format: vk::Format) -> GfxResult<Handle<crate::render_pass::RenderPassLayout>> {
        if let Some(layout) = device.main_render_pass_layout {
            return Ok(layout);
        }
        let desc = RenderPassLayoutDesc {
            attachment_formats: vec![format],
            subpasses: vec![SubpassDesc { color_attachments: smallvec![0], depth_stencil_attachment: None, input_attachments: smallvec![] }],
        };
        let layout = device.create_render_pass_layout(&desc)?;
        device.main_render_pass_layout = Some(layout);
        Ok(layout)
    }

    /// Destroys and rebuilds the swapchain against the surface's current
    /// capabilities. Called at creation and whenever acquire/present
    /// reports `OUT_OF_DATE`/resize (spec §4.7 `recreate_swapchain`).
    pub fn recreate(&mut self, device: &mut Device, fallback_extent: vk::Extent2D) -> GfxResult<()> {
        unsafe { device.raw.device_wait_idle()? };

        let capabilities = unsafe {
            device
                .surface_ext
                .get_physical_device_surface_capabilities(device.physical_device, self.surface)?
        };
        let formats = unsafe {
            device
                .surface_ext
                .get_physical_device_surface_formats(device.physical_device, self.surface)?
        };
        let present_modes = unsafe {
            device
                .surface_ext
                .get_physical_device_surface_present_modes(device.physical_device, self.surface)?
        };

        let surface_format = choose_surface_format(&formats);
        let present_mode = choose_present_mode(&present_modes, self.vsync);
        let extent = choose_extent(&capabilities, fallback_extent);

        let mut image_count = capabilities.min_image_count + 1;
        if capabilities.max_image_count > 0 {
            image_count = image_count.min(capabilities.max_image_count);
        }

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(self.raw);

        let new_raw = unsafe { device.swapchain_ext.create_swapchain(&create_info, None)? };
        let old_raw = self.raw;

        // Previous texture-view (and the texture wrapping each image)
        // handles are queued for deletion now: the generation bump makes
        // them immediately stale to any caller still holding one, even
        // though the underlying `VkImage`s aren't destroyed until
        // `vkDestroySwapchainKHR` below (spec §4.7).
        for view in self.texture_views.drain(..) {
            let _ = device.destroy_texture_view(view);
        }
        for texture in self.textures.drain(..) {
            let _ = device.destroy_texture(texture);
        }
        if old_raw != vk::SwapchainKHR::null() {
            unsafe { device.swapchain_ext.destroy_swapchain(old_raw, None) };
        }

        let images = unsafe { device.swapchain_ext.get_swapchain_images(new_raw)? };
        let extent3d = vk::Extent3D { width: extent.width, height: extent.height, depth: 1 };
        let textures: Vec<Handle<Texture>> = images
            .iter()
            .map(|&image| device.wrap_swapchain_image(image, surface_format.format, extent3d))
            .collect();
        let texture_views: Vec<Handle<TextureView>> = textures
            .iter()
            .map(|&t| device.create_texture_view(t))
            .collect::<GfxResult<_>>()?;

        log::info!(
            "swapchain ({:?}, {:?}) {}x{}, {} images",
            surface_format.format,
            present_mode,
            extent.width,
            extent.height,
            images.len()
        );

        self.raw = new_raw;
        self.format = surface_format.format;
        self.extent = extent;
        self.textures = textures;
        self.texture_views = texture_views;

        let layout = Self::ensure_main_render_pass_layout(device, surface_format.format)?;
        if self.main_pass.is_null() {
            let ops = AttachmentOps {
                load_op: vk::AttachmentLoadOp::CLEAR,
                store_op: vk::AttachmentStoreOp::STORE,
                initial_layout: vk::ImageLayout::UNDEFINED,
                final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            };
            let clear_values = vec![vk::ClearValue { color: vk::ClearColorValue { float32: [0.0; 4] } }];
            self.main_pass = device.create_render_pass(
                layout,
                &[ops],
                clear_values,
                RenderPassTarget::Swapchain { image_count: self.texture_views.len() as u32 },
            )?;
        }
        let per_framebuffer_views: Vec<Vec<Handle<TextureView>>> =
            self.texture_views.iter().map(|&v| vec![v]).collect();
        device.update_attachments(self.main_pass, extent, &per_framebuffer_views)?;

        Ok(())
    }

    /// Returns `None` when the swapchain is out of date and has already
    /// been recreated internally — the caller should simply retry
    /// `begin_frame` on the next iteration of its render loop (spec §7).
    pub fn acquire_next_image(
        &mut self,
        device: &mut Device,
        fallback_extent: vk::Extent2D,
        signal_semaphore: vk::Semaphore,
    ) -> GfxResult<Option<u32>> {
        let result = unsafe {
            device.swapchain_ext.acquire_next_image(
                self.raw,
                u64::MAX,
                signal_semaphore,
                vk::Fence::null(),
            )
        };
        match result {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    self.recreate(device, fallback_extent)?;
                    return Ok(None);
                }
                Ok(Some(index))
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.recreate(device, fallback_extent)?;
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Returns `false` when the swapchain went out of date and has been
    /// recreated internally, matching `acquire_next_image`'s policy.
    pub fn present(
        &mut self,
        device: &mut Device,
        fallback_extent: vk::Extent2D,
        wait_semaphore: vk::Semaphore,
        image_index: u32,
    ) -> GfxResult<bool> {
        let wait_semaphores = [wait_semaphore];
        let swapchains = [self.raw];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { device.swapchain_ext.queue_present(device.queue.raw, &present_info) };
        match result {
            Ok(suboptimal) => {
                if suboptimal {
                    self.recreate(device, fallback_extent)?;
                    return Ok(false);
                }
                Ok(true)
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.recreate(device, fallback_extent)?;
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn destroy(&mut self, device: &mut Device) {
        for view in self.texture_views.drain(..) {
            let _ = device.destroy_texture_view(view);
        }
        for texture in self.textures.drain(..) {
            let _ = device.destroy_texture(texture);
        }
        if self.raw != vk::SwapchainKHR::null() {
            unsafe { device.swapchain_ext.destroy_swapchain(self.raw, None) };
        }
        self.raw = vk::SwapchainKHR::null();
    }
}
