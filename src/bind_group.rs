//! Bind group layouts and bind groups (spec §4.1, §4.6).
//!
//! Layouts are the one resource kind the core interns by value: two
//! `create_bind_group_layout` calls with equal `BindGroupLayoutDesc`s return
//! the same handle, because descriptor-set-layout *compatibility* is a
//! concept the driver itself understands (pipelines built against
//! equal-by-value layouts are interchangeable) and re-creating the driver
//! object on every call would defeat pipeline-layout caching downstream.
//!
//! Bind-group lifetime is a distinction between two call paths, not a
//! runtime flag: persistent groups (`Handle<BindGroup>`) live until
//! explicitly destroyed and come from a pool sized at device creation;
//! transient groups are allocated from the current frame's descriptor pool
//! by `create_transient_bind_group`, returned as a raw `vk::DescriptorSet`
//! rather than a pool handle (nothing outlives the frame that allocated it,
//! so there is no stale reference to catch), and die — without a destroy
//! call — when that frame's pool is reset on reacquisition (spec §4.6).

use std::collections::HashMap;

use ash::vk;
use fxhash::FxHashMap;

use crate::device::Device;
use crate::error::{GfxError, GfxResult};
use crate::handle::Handle;
use crate::sampler::Sampler;
use crate::texture::TextureView;
use crate::buffer::Buffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    UniformBuffer,
    UniformBufferDynamic,
    StorageBuffer,
    SampledTexture,
    Sampler,
    StorageTexture,
}

impl BindingKind {
    fn to_vk(self) -> vk::DescriptorType {
        match self {
            BindingKind::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
            BindingKind::UniformBufferDynamic => vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
            BindingKind::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
            BindingKind::SampledTexture => vk::DescriptorType::SAMPLED_IMAGE,
            BindingKind::Sampler => vk::DescriptorType::SAMPLER,
            BindingKind::StorageTexture => vk::DescriptorType::STORAGE_IMAGE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindGroupLayoutEntry {
    pub binding: u32,
    pub kind: BindingKind,
    pub stage_flags: vk::ShaderStageFlags,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BindGroupLayoutDesc {
    pub entries: Vec<BindGroupLayoutEntry>,
}

#[derive(Default, Clone, Copy)]
pub struct BindGroupLayout {
    pub(crate) raw: vk::DescriptorSetLayout,
}

#[derive(Default)]
pub struct BindGroupLayoutCold {
    pub(crate) desc: Option<BindGroupLayoutDesc>,
}

pub enum BindGroupEntryResource {
    Buffer { handle: Handle<Buffer>, offset: u64, range: u64 },
    TextureView(Handle<TextureView>),
    Sampler(Handle<Sampler>),
}

pub struct BindGroupEntry {
    pub binding: u32,
    pub resource: BindGroupEntryResource,
}

pub struct BindGroupDesc<'a> {
    pub layout: Handle<BindGroupLayout>,
    pub entries: &'a [BindGroupEntry],
}

#[derive(Default, Clone, Copy)]
pub struct BindGroup {
    pub(crate) raw: vk::DescriptorSet,
}

#[derive(Default)]
pub struct BindGroupCold {
    pub(crate) layout: Handle<BindGroupLayout>,
}

/// Interning table, keyed by value (spec: "equal-by-value layouts return
/// the same handle"). Kept on `Device` as a plain field rather than inside
/// `bind_group_layouts` itself, since the pool doesn't know about dedup.
#[derive(Default)]
pub struct BindGroupLayoutCache {
    pub(crate) by_desc: FxHashMap<BindGroupLayoutDesc, Handle<BindGroupLayout>>,
}

impl Device {
    pub fn create_bind_group_layout(
        &mut self,
        desc: BindGroupLayoutDesc,
    ) -> GfxResult<Handle<BindGroupLayout>> {
        if let Some(&existing) = self.bind_group_layout_cache.by_desc.get(&desc) {
            return Ok(existing);
        }

        let bindings: Vec<vk::DescriptorSetLayoutBinding> = desc
            .entries
            .iter()
            .map(|entry| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(entry.binding)
                    .descriptor_type(entry.kind.to_vk())
                    .descriptor_count(entry.count)
                    .stage_flags(entry.stage_flags)
                    .build()
            })
            .collect();

        let create_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
        let raw = unsafe { self.raw.create_descriptor_set_layout(&create_info, None)? };

        let handle = self.bind_group_layouts.insert(
            BindGroupLayout { raw },
            BindGroupLayoutCold { desc: Some(desc.clone()) },
        );
        self.bind_group_layout_cache.by_desc.insert(desc, handle);
        Ok(handle)
    }

    fn write_descriptor_set(&self, set: vk::DescriptorSet, desc: &BindGroupDesc<'_>) -> GfxResult<()> {
        let layout_cold = self
            .bind_group_layouts
            .resolve_cold(desc.layout)
            .ok_or_else(|| GfxError::Validation("stale bind group layout handle".into()))?;
        let layout_desc = layout_cold
            .desc
            .as_ref()
            .ok_or_else(|| GfxError::Validation("bind group layout has no description".into()))?;
        let kind_by_binding: HashMap<u32, BindingKind> =
            layout_desc.entries.iter().map(|e| (e.binding, e.kind)).collect();

        let mut buffer_infos = Vec::with_capacity(desc.entries.len());
        let mut image_infos = Vec::with_capacity(desc.entries.len());
        let mut writes = Vec::with_capacity(desc.entries.len());

        for entry in desc.entries {
            let kind = *kind_by_binding
                .get(&entry.binding)
                .ok_or_else(|| GfxError::Validation("binding not present in layout".into()))?;

            match &entry.resource {
                BindGroupEntryResource::Buffer { handle, offset, range } => {
                    let hot = self
                        .buffers
                        .resolve_hot(*handle)
                        .ok_or_else(|| GfxError::Validation("stale buffer handle".into()))?;
                    buffer_infos.push(vk::DescriptorBufferInfo {
                        buffer: hot.raw,
                        offset: *offset,
                        range: *range,
                    });
                    let info_index = buffer_infos.len() - 1;
                    writes.push((entry.binding, kind, Some(info_index), None));
                }
                BindGroupEntryResource::TextureView(handle) => {
                    let hot = self
                        .texture_views
                        .resolve_hot(*handle)
                        .ok_or_else(|| GfxError::Validation("stale texture view handle".into()))?;
                    image_infos.push(vk::DescriptorImageInfo {
                        sampler: vk::Sampler::null(),
                        image_view: hot.raw,
                        image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    });
                    let info_index = image_infos.len() - 1;
                    writes.push((entry.binding, kind, None, Some(info_index)));
                }
                BindGroupEntryResource::Sampler(handle) => {
                    let hot = self
                        .samplers
                        .resolve_hot(*handle)
                        .ok_or_else(|| GfxError::Validation("stale sampler handle".into()))?;
                    image_infos.push(vk::DescriptorImageInfo {
                        sampler: hot.raw,
                        image_view: vk::ImageView::null(),
                        image_layout: vk::ImageLayout::UNDEFINED,
                    });
                    let info_index = image_infos.len() - 1;
                    writes.push((entry.binding, kind, None, Some(info_index)));
                }
            }
        }

        let descriptor_writes: Vec<vk::WriteDescriptorSet> = writes
            .iter()
            .map(|&(binding, kind, buffer_index, image_index)| {
                let mut write = vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(binding)
                    .descriptor_type(kind.to_vk());
                if let Some(i) = buffer_index {
                    write = write.buffer_info(std::slice::from_ref(&buffer_infos[i]));
                }
                if let Some(i) = image_index {
                    write = write.image_info(std::slice::from_ref(&image_infos[i]));
                }
                write.build()
            })
            .collect();

        unsafe { self.raw.update_descriptor_sets(&descriptor_writes, &[]) };
        Ok(())
    }

    pub fn create_bind_group(&mut self, desc: &BindGroupDesc<'_>) -> GfxResult<Handle<BindGroup>> {
        let layout_hot = self
            .bind_group_layouts
            .resolve_hot(desc.layout)
            .ok_or_else(|| GfxError::Validation("stale bind group layout handle".into()))?;
        let layouts = [layout_hot.raw];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.persistent_descriptor_pool)
            .set_layouts(&layouts);
        let set = unsafe { self.raw.allocate_descriptor_sets(&alloc_info)?[0] };

        self.write_descriptor_set(set, desc)?;

        Ok(self
            .bind_groups
            .insert(BindGroup { raw: set }, BindGroupCold { layout: desc.layout }))
    }

    pub fn destroy_bind_group(&mut self, handle: Handle<BindGroup>) -> GfxResult<()> {
        let (hot, _cold) = self
            .bind_groups
            .queue_free(handle)
            .ok_or_else(|| GfxError::Validation("stale bind group handle".into()))?;
        unsafe {
            let _ = self
                .raw
                .free_descriptor_sets(self.persistent_descriptor_pool, &[hot.raw]);
        };
        Ok(())
    }

    /// Allocates from the current frame's transient descriptor pool. Never
    /// explicitly freed: the whole pool is reset when this frame context
    /// comes back around the ring (spec §4.6).
    pub fn create_transient_bind_group(&mut self, desc: &BindGroupDesc<'_>) -> GfxResult<vk::DescriptorSet> {
        let layout_hot = self
            .bind_group_layouts
            .resolve_hot(desc.layout)
            .ok_or_else(|| GfxError::Validation("stale bind group layout handle".into()))?;
        let layouts = [layout_hot.raw];
        let pool = self.frames.current().transient_descriptor_pool;
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        let set = unsafe { self.raw.allocate_descriptor_sets(&alloc_info)?[0] };
        self.write_descriptor_set(set, desc)?;
        Ok(set)
    }
}
