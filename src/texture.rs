//! Textures and texture views (spec §4.1).
//!
//! `generate_mipmaps` is a manual `vkCmdBlitImage` chain, one blit per level
//! from level N-1 into level N with linear filtering, matching what
//! `pl_graphics_vulkan.c` does for its staged image uploads — not a driver
//! builtin, since spec's `Non-goals` never said "no mip generation", it only
//! said core does not do format transcoding or compression.

use ash::vk;
use bitflags::bitflags;

use crate::device::Device;
use crate::encoder::BlitEncoder;
use crate::error::{GfxError, GfxResult};
use crate::handle::Handle;
use crate::memory::{Allocation, AllocationRequest, MemoryMode};

bitflags! {
    pub struct TextureUsage: u32 {
        const SAMPLED = 0b0000_0001;
        const STORAGE = 0b0000_0010;
        const COLOR_ATTACHMENT = 0b0000_0100;
        const DEPTH_STENCIL_ATTACHMENT = 0b0000_1000;
        const TRANSFER_SRC = 0b0001_0000;
        const TRANSFER_DST = 0b0010_0000;
    }
}

impl TextureUsage {
    fn to_vk(self) -> vk::ImageUsageFlags {
        let mut flags = vk::ImageUsageFlags::empty();
        if self.contains(TextureUsage::SAMPLED) {
            flags |= vk::ImageUsageFlags::SAMPLED;
        }
        if self.contains(TextureUsage::STORAGE) {
            flags |= vk::ImageUsageFlags::STORAGE;
        }
        if self.contains(TextureUsage::COLOR_ATTACHMENT) {
            flags |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
        }
        if self.contains(TextureUsage::DEPTH_STENCIL_ATTACHMENT) {
            flags |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
        }
        if self.contains(TextureUsage::TRANSFER_SRC) {
            flags |= vk::ImageUsageFlags::TRANSFER_SRC;
        }
        if self.contains(TextureUsage::TRANSFER_DST) {
            flags |= vk::ImageUsageFlags::TRANSFER_DST;
        }
        flags
    }
}

/// Borrowed from how the teacher's `image::description` module names its
/// extent cases rather than exposing three separate width/height/depth
/// fields for every dimensionality.
#[derive(Debug, Clone, Copy)]
pub enum Dimensions {
    Dim1 { width: u32 },
    Dim2 { width: u32, height: u32 },
    Dim3 { width: u32, height: u32, depth: u32 },
    Cube { size: u32 },
}

impl Dimensions {
    fn image_type(self) -> vk::ImageType {
        match self {
            Dimensions::Dim1 { .. } => vk::ImageType::TYPE_1D,
            Dimensions::Dim2 { .. } | Dimensions::Cube { .. } => vk::ImageType::TYPE_2D,
            Dimensions::Dim3 { .. } => vk::ImageType::TYPE_3D,
        }
    }

    fn extent(self) -> vk::Extent3D {
        match self {
            Dimensions::Dim1 { width } => vk::Extent3D { width, height: 1, depth: 1 },
            Dimensions::Dim2 { width, height } => vk::Extent3D { width, height, depth: 1 },
            Dimensions::Dim3 { width, height, depth } => vk::Extent3D { width, height, depth },
            Dimensions::Cube { size } => vk::Extent3D { width: size, height: size, depth: 1 },
        }
    }

    fn array_layers(self) -> u32 {
        match self {
            Dimensions::Cube { .. } => 6,
            _ => 1,
        }
    }

    fn max_mip_levels(self) -> u32 {
        let extent = self.extent();
        let largest = extent.width.max(extent.height).max(extent.depth);
        32 - largest.leading_zeros()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TextureDesc {
    pub dimensions: Dimensions,
    pub format: vk::Format,
    pub usage: TextureUsage,
    pub mip_levels: u32,
    /// `0` means "generate the full chain", resolved against
    /// `Dimensions::max_mip_levels` at creation time.
    pub generate_full_mip_chain: bool,
}

#[derive(Default, Clone, Copy)]
pub struct Texture {
    pub(crate) raw: vk::Image,
}

#[derive(Default)]
pub struct TextureCold {
    pub(crate) format: vk::Format,
    pub(crate) extent: vk::Extent3D,
    pub(crate) mip_levels: u32,
    pub(crate) array_layers: u32,
    pub(crate) usage: vk::ImageUsageFlags,
    pub(crate) allocation: Option<Allocation>,
    /// `false` for textures wrapping a swapchain image (spec §4.7): the
    /// swapchain, not this pool, owns that `VkImage` and destroys it when
    /// the swapchain itself is destroyed/recreated, so `destroy_texture`
    /// must not call `vkDestroyImage` on it.
    pub(crate) owns_image: bool,
}

#[derive(Default, Clone, Copy)]
pub struct TextureView {
    pub(crate) raw: vk::ImageView,
}

#[derive(Default)]
pub struct TextureViewCold {
    pub(crate) texture: Handle<Texture>,
    pub(crate) format: vk::Format,
}

impl Device {
    /// Creates the driver image only; memory is bound separately through
    /// [`Device::texture_memory_requirements`], [`Device::allocate_memory`]
    /// and [`Device::bind_texture_to_memory`] (spec §4.2/§6).
    pub fn create_texture(&mut self, desc: &TextureDesc) -> GfxResult<Handle<Texture>> {
        let mip_levels = if desc.generate_full_mip_chain {
            desc.dimensions.max_mip_levels()
        } else {
            desc.mip_levels.max(1)
        };
        let array_layers = desc.dimensions.array_layers();
        let extent = desc.dimensions.extent();

        let mut usage = desc.usage.to_vk();
        if desc.generate_full_mip_chain && mip_levels > 1 {
            usage |= vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST;
        }

        let mut create_info = vk::ImageCreateInfo::builder()
            .image_type(desc.dimensions.image_type())
            .format(desc.format)
            .extent(extent)
            .mip_levels(mip_levels)
            .array_layers(array_layers)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        if matches!(desc.dimensions, Dimensions::Cube { .. }) {
            create_info = create_info.flags(vk::ImageCreateFlags::CUBE_COMPATIBLE);
        }

        let raw = unsafe { self.raw.create_image(&create_info, None)? };

        Ok(self.textures.insert(
            Texture { raw },
            TextureCold {
                format: desc.format,
                extent,
                mip_levels,
                array_layers,
                usage,
                allocation: None,
                owns_image: true,
            },
        ))
    }

    /// Wraps a driver image this device did not create — a swapchain image
    /// — as a [`Handle<Texture>`] so the rest of the core can treat it like
    /// any other texture (spec §4.7 "wraps its images as textures in the
    /// pool"). `destroy_texture` on the returned handle skips
    /// `vkDestroyImage`: the swapchain retains ownership and destroys its
    /// own images on recreation/teardown.
    pub(crate) fn wrap_swapchain_image(&mut self, raw: vk::Image, format: vk::Format, extent: vk::Extent3D) -> Handle<Texture> {
        self.textures.insert(
            Texture { raw },
            TextureCold {
                format,
                extent,
                mip_levels: 1,
                array_layers: 1,
                usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
                allocation: None,
                owns_image: false,
            },
        )
    }

    /// Convenience wrapper over `create_texture` + `allocate_memory` +
    /// `bind_texture_to_memory` for the common device-local case.
    pub fn create_texture_bound(&mut self, desc: &TextureDesc) -> GfxResult<Handle<Texture>> {
        let handle = self.create_texture(desc)?;
        let requirements = match self.texture_memory_requirements(handle) {
            Ok(requirements) => requirements,
            Err(e) => {
                let _ = self.destroy_texture(handle);
                return Err(e);
            }
        };
        let allocation = match self.allocator.allocate(
            &self.raw,
            &AllocationRequest {
                memory_type_bits: requirements.memory_type_bits,
                size: requirements.size,
                alignment: requirements.alignment,
                mode: MemoryMode::Gpu,
                tag: "texture",
            },
        ) {
            Ok(allocation) => allocation,
            Err(e) => {
                let _ = self.destroy_texture(handle);
                return Err(e);
            }
        };
        if let Err(e) = self.bind_texture_to_memory(handle, allocation) {
            let _ = self.destroy_texture(handle);
            return Err(e);
        }
        Ok(handle)
    }

    /// Queries the driver's memory requirements for a texture created but
    /// not yet bound.
    pub fn texture_memory_requirements(&self, handle: Handle<Texture>) -> GfxResult<vk::MemoryRequirements> {
        let hot = self
            .textures
            .resolve_hot(handle)
            .ok_or_else(|| GfxError::Validation("stale texture handle".into()))?;
        Ok(unsafe { self.raw.get_image_memory_requirements(hot.raw) })
    }

    /// Binds `allocation` to `handle`'s driver image (spec §6
    /// `bind_texture_to_memory`).
    pub fn bind_texture_to_memory(&mut self, handle: Handle<Texture>, allocation: Allocation) -> GfxResult<()> {
        let hot = self
            .textures
            .resolve_hot(handle)
            .ok_or_else(|| GfxError::Validation("stale texture handle".into()))?;
        unsafe {
            self.raw
                .bind_image_memory(hot.raw, allocation.device_memory(), allocation.offset())?
        };
        let cold = self.textures.resolve_cold_mut(handle).unwrap();
        cold.allocation = Some(allocation);
        Ok(())
    }

    pub fn destroy_texture(&mut self, handle: Handle<Texture>) -> GfxResult<()> {
        let (hot, cold) = self
            .textures
            .queue_free(handle)
            .ok_or_else(|| GfxError::Validation("stale texture handle".into()))?;
        self.frames
            .current_mut()
            .garbage
            .push_texture(hot.raw, cold.allocation, cold.owns_image);
        Ok(())
    }

    pub fn create_texture_view(&mut self, texture: Handle<Texture>) -> GfxResult<Handle<TextureView>> {
        let cold = self
            .textures
            .resolve_cold(texture)
            .ok_or_else(|| GfxError::Validation("stale texture handle".into()))?;
        let hot = self.textures.resolve_hot(texture).unwrap();

        let view_type = if cold.array_layers == 6 {
            vk::ImageViewType::CUBE
        } else {
            vk::ImageViewType::TYPE_2D
        };
        let aspect_mask = if is_depth_format(cold.format) {
            vk::ImageAspectFlags::DEPTH
        } else {
            vk::ImageAspectFlags::COLOR
        };

        let create_info = vk::ImageViewCreateInfo::builder()
            .image(hot.raw)
            .view_type(view_type)
            .format(cold.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask,
                base_mip_level: 0,
                level_count: cold.mip_levels,
                base_array_layer: 0,
                layer_count: cold.array_layers,
            });

        let raw = unsafe { self.raw.create_image_view(&create_info, None)? };
        Ok(self.texture_views.insert(
            TextureView { raw },
            TextureViewCold {
                texture,
                format: cold.format,
            },
        ))
    }

    pub fn destroy_texture_view(&mut self, handle: Handle<TextureView>) -> GfxResult<()> {
        let (hot, _cold) = self
            .texture_views
            .queue_free(handle)
            .ok_or_else(|| GfxError::Validation("stale texture view handle".into()))?;
        self.frames.current_mut().garbage.push_texture_view(hot.raw);
        Ok(())
    }

    /// Blits level N-1 into level N for every mip level beyond the base,
    /// left-to-right, with a pipeline barrier between each step transferring
    /// the source level to `TRANSFER_SRC_OPTIMAL` and leaving destination
    /// levels in `SHADER_READ_ONLY_OPTIMAL` once their turn as a blit source
    /// has passed (spec §4.1 `generate_mipmaps`). Levels are recorded into
    /// `encoder`'s command buffer, not submitted here.
    pub fn generate_mipmaps(&self, encoder: &mut BlitEncoder<'_>, texture: Handle<Texture>) -> GfxResult<()> {
        let hot = self
            .textures
            .resolve_hot(texture)
            .ok_or_else(|| GfxError::Validation("stale texture handle".into()))?;
        let cold = self.textures.resolve_cold(texture).unwrap();

        if cold.mip_levels <= 1 {
            return Ok(());
        }

        let aspect_mask = if is_depth_format(cold.format) {
            vk::ImageAspectFlags::DEPTH
        } else {
            vk::ImageAspectFlags::COLOR
        };

        let mut mip_width = cold.extent.width as i32;
        let mut mip_height = cold.extent.height as i32;

        for level in 1..cold.mip_levels {
            encoder.transition_mip_level(
                hot.raw,
                aspect_mask,
                level - 1,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            );

            let next_width = (mip_width / 2).max(1);
            let next_height = (mip_height / 2).max(1);

            encoder.blit_mip_level(
                hot.raw,
                aspect_mask,
                level - 1,
                [vk::Offset3D { x: 0, y: 0, z: 0 }, vk::Offset3D { x: mip_width, y: mip_height, z: 1 }],
                level,
                [vk::Offset3D { x: 0, y: 0, z: 0 }, vk::Offset3D { x: next_width, y: next_height, z: 1 }],
            );

            encoder.transition_mip_level(
                hot.raw,
                aspect_mask,
                level - 1,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            );

            mip_width = next_width;
            mip_height = next_height;
        }

        encoder.transition_mip_level(
            hot.raw,
            aspect_mask,
            cold.mip_levels - 1,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );

        Ok(())
    }
}

pub(crate) fn is_depth_format(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM
            | vk::Format::D32_SFLOAT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}
