//! Samplers (spec §4.1). No interning: callers that create the same
//! `SamplerDesc` twice get two distinct handles and two driver objects,
//! same as buffers and textures. Bind-group-layout interning (`bind_group.rs`)
//! is the one place the core deduplicates by value, because descriptor set
//! layout compatibility is a driver-enforced concept and the rest aren't.

use ash::vk;

use crate::device::Device;
use crate::error::GfxResult;
use crate::handle::Handle;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerDesc {
    pub mag_filter: vk::Filter,
    pub min_filter: vk::Filter,
    pub mipmap_mode: vk::SamplerMipmapMode,
    pub address_mode_u: vk::SamplerAddressMode,
    pub address_mode_v: vk::SamplerAddressMode,
    pub address_mode_w: vk::SamplerAddressMode,
    pub max_anisotropy: Option<f32>,
    pub min_lod: f32,
    pub max_lod: f32,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        SamplerDesc {
            mag_filter: vk::Filter::LINEAR,
            min_filter: vk::Filter::LINEAR,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
            address_mode_u: vk::SamplerAddressMode::REPEAT,
            address_mode_v: vk::SamplerAddressMode::REPEAT,
            address_mode_w: vk::SamplerAddressMode::REPEAT,
            max_anisotropy: None,
            min_lod: 0.0,
            max_lod: vk::LOD_CLAMP_NONE,
        }
    }
}

#[derive(Default, Clone, Copy)]
pub struct Sampler {
    pub(crate) raw: vk::Sampler,
}

#[derive(Default)]
pub struct SamplerCold {
    pub(crate) desc: Option<SamplerDesc>,
}

impl Device {
    pub fn create_sampler(&mut self, desc: &SamplerDesc) -> GfxResult<Handle<Sampler>> {
        let create_info = vk::SamplerCreateInfo::builder()
            .mag_filter(desc.mag_filter)
            .min_filter(desc.min_filter)
            .mipmap_mode(desc.mipmap_mode)
            .address_mode_u(desc.address_mode_u)
            .address_mode_v(desc.address_mode_v)
            .address_mode_w(desc.address_mode_w)
            .anisotropy_enable(desc.max_anisotropy.is_some())
            .max_anisotropy(desc.max_anisotropy.unwrap_or(1.0))
            .min_lod(desc.min_lod)
            .max_lod(desc.max_lod);

        let raw = unsafe { self.raw.create_sampler(&create_info, None)? };
        Ok(self.samplers.insert(Sampler { raw }, SamplerCold { desc: Some(*desc) }))
    }

    pub fn destroy_sampler(&mut self, handle: Handle<Sampler>) -> GfxResult<()> {
        let (hot, _cold) = self
            .samplers
            .queue_free(handle)
            .ok_or_else(|| crate::error::GfxError::Validation("stale sampler handle".into()))?;
        self.frames.current_mut().garbage.push_sampler(hot.raw);
        Ok(())
    }
}
