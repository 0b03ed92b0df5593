//! Shaders, graphics/compute pipelines, and specialization constants
//! (spec §3, §4.1, §4.6).
//!
//! A `Shader` bundles everything a pipeline needs: the vertex and fragment
//! modules, the pipeline layout built from the caller's bind-group layouts,
//! the graphics state (cull/depth/stencil/blend), the vertex input layout,
//! and a reference to the render-pass layout + subpass it was compiled
//! against — matching the table in spec §3. It is immutable after creation,
//! same as the driver objects it wraps.
//!
//! Specialization data is packed std140-style: scalars (`bool`/`i32`/`f32`)
//! take 4 bytes, `Vec2` 8, `Vec3`/`Vec4` 16-byte aligned and strided —
//! matching the packing rule the dynamic uniform ring already uses
//! (`dynamic_uniform.rs`), so a single `align_up` helper serves both.
//!
//! Compilation failure does not return an `Err`: per spec §7, a failed
//! `create_shader`/`create_compute_shader` call logs the driver's message
//! and returns a null (generation-zero) handle, since shader compilation
//! failures are a content problem, not an operational one the caller need
//! branch on with `?`.

use ash::vk;
use smallvec::SmallVec;

use crate::bind_group::BindGroupLayout;
use crate::device::Device;
use crate::error::GfxResult;
use crate::handle::Handle;
use crate::render_pass::RenderPassLayout;

/// A shader rarely references more than a couple of specialization
/// constants or bind-group layouts, so both stay inline rather than
/// spilling to the heap for the common case.
type SpecializationEntries = SmallVec<[vk::SpecializationMapEntry; 8]>;
type DescriptorSetLayoutList = SmallVec<[vk::DescriptorSetLayout; 4]>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpecializationValue {
    Bool(bool),
    Int(i32),
    Float(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
}

impl SpecializationValue {
    fn std140_align(self) -> u32 {
        match self {
            SpecializationValue::Bool(_) | SpecializationValue::Int(_) | SpecializationValue::Float(_) => 4,
            SpecializationValue::Vec2(_) => 8,
            SpecializationValue::Vec3(_) | SpecializationValue::Vec4(_) => 16,
        }
    }

    fn size(self) -> u32 {
        match self {
            SpecializationValue::Bool(_) | SpecializationValue::Int(_) | SpecializationValue::Float(_) => 4,
            SpecializationValue::Vec2(_) => 8,
            SpecializationValue::Vec3(_) => 12,
            SpecializationValue::Vec4(_) => 16,
        }
    }

    fn write_bytes(self, buf: &mut Vec<u8>) {
        match self {
            SpecializationValue::Bool(b) => buf.extend_from_slice(&(b as u32).to_ne_bytes()),
            SpecializationValue::Int(i) => buf.extend_from_slice(&i.to_ne_bytes()),
            SpecializationValue::Float(f) => buf.extend_from_slice(&f.to_ne_bytes()),
            SpecializationValue::Vec2(v) => v.iter().for_each(|c| buf.extend_from_slice(&c.to_ne_bytes())),
            SpecializationValue::Vec3(v) => v.iter().for_each(|c| buf.extend_from_slice(&c.to_ne_bytes())),
            SpecializationValue::Vec4(v) => v.iter().for_each(|c| buf.extend_from_slice(&c.to_ne_bytes())),
        }
    }
}

fn align_up(offset: u32, alignment: u32) -> u32 {
    (offset + alignment - 1) & !(alignment - 1)
}

/// Packs `constants` into a std140-aligned blob plus matching
/// `vk::SpecializationMapEntry` table, constant IDs assigned in order
/// starting at 0.
pub fn pack_specialization_constants(
    constants: &[SpecializationValue],
) -> (Vec<u8>, SpecializationEntries) {
    let mut data = Vec::new();
    let mut entries = SpecializationEntries::with_capacity(constants.len());

    for (id, &value) in constants.iter().enumerate() {
        let align = value.std140_align();
        let padded_len = align_up(data.len() as u32, align);
        data.resize(padded_len as usize, 0);
        let offset = data.len() as u32;
        value.write_bytes(&mut data);
        entries.push(vk::SpecializationMapEntry {
            constant_id: id as u32,
            offset,
            size: value.size() as usize,
        });
    }

    (data, entries)
}

#[derive(Debug, Clone, Copy)]
pub struct VertexAttribute {
    pub location: u32,
    pub binding: u32,
    pub format: vk::Format,
    pub offset: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct VertexBinding {
    pub binding: u32,
    pub stride: u32,
    pub per_instance: bool,
}

#[derive(Debug, Clone, Default)]
pub struct VertexLayout {
    pub bindings: Vec<VertexBinding>,
    pub attributes: Vec<VertexAttribute>,
}

#[derive(Debug, Clone, Copy)]
pub struct BlendTarget {
    pub enabled: bool,
    pub src_color: vk::BlendFactor,
    pub dst_color: vk::BlendFactor,
    pub color_op: vk::BlendOp,
    pub src_alpha: vk::BlendFactor,
    pub dst_alpha: vk::BlendFactor,
    pub alpha_op: vk::BlendOp,
}

impl Default for BlendTarget {
    fn default() -> BlendTarget {
        BlendTarget {
            enabled: false,
            src_color: vk::BlendFactor::SRC_ALPHA,
            dst_color: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
            color_op: vk::BlendOp::ADD,
            src_alpha: vk::BlendFactor::ONE,
            dst_alpha: vk::BlendFactor::ZERO,
            alpha_op: vk::BlendOp::ADD,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DepthStencilState {
    pub depth_test_enable: bool,
    pub depth_write_enable: bool,
    pub depth_compare_op: vk::CompareOp,
    pub stencil_test_enable: bool,
    pub front: vk::StencilOpState,
    pub back: vk::StencilOpState,
}

impl Default for DepthStencilState {
    fn default() -> DepthStencilState {
        DepthStencilState {
            depth_test_enable: true,
            depth_write_enable: true,
            depth_compare_op: vk::CompareOp::LESS,
            stencil_test_enable: false,
            front: vk::StencilOpState::default(),
            back: vk::StencilOpState::default(),
        }
    }
}

/// The per-pipeline fixed-function state spec §3's Shader entity calls out:
/// cull mode, depth/stencil, and one blend state per color target.
#[derive(Debug, Clone)]
pub struct GraphicsState {
    pub topology: vk::PrimitiveTopology,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub depth_stencil: DepthStencilState,
    pub blend_targets: Vec<BlendTarget>,
}

impl Default for GraphicsState {
    fn default() -> GraphicsState {
        GraphicsState {
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            depth_stencil: DepthStencilState::default(),
            blend_targets: vec![BlendTarget::default()],
        }
    }
}

pub struct ShaderDesc<'a> {
    pub vertex_spirv: &'a [u32],
    pub vertex_entry_point: &'a str,
    pub fragment_spirv: &'a [u32],
    pub fragment_entry_point: &'a str,
    pub vertex_layout: &'a VertexLayout,
    pub graphics_state: &'a GraphicsState,
    pub bind_group_layouts: &'a [Handle<BindGroupLayout>],
    pub render_pass_layout: Handle<RenderPassLayout>,
    pub subpass: u32,
    pub specialization_constants: &'a [SpecializationValue],
}

pub struct ComputeShaderDesc<'a> {
    pub spirv: &'a [u32],
    pub entry_point: &'a str,
    pub bind_group_layouts: &'a [Handle<BindGroupLayout>],
    pub specialization_constants: &'a [SpecializationValue],
}

/// Hot: touched on every `bind_shader`.
#[derive(Default, Clone, Copy)]
pub struct Shader {
    pub(crate) pipeline: vk::Pipeline,
    pub(crate) pipeline_layout: vk::PipelineLayout,
}

#[derive(Default)]
pub struct ShaderCold {
    pub(crate) vertex_module: vk::ShaderModule,
    pub(crate) fragment_module: vk::ShaderModule,
    pub(crate) render_pass_layout: Handle<RenderPassLayout>,
    pub(crate) subpass: u32,
}

#[derive(Default, Clone, Copy)]
pub struct ComputeShader {
    pub(crate) pipeline: vk::Pipeline,
    pub(crate) pipeline_layout: vk::PipelineLayout,
}

#[derive(Default)]
pub struct ComputeShaderCold {
    pub(crate) module: vk::ShaderModule,
}

fn create_pipeline_layout(
    device: &ash::Device,
    bind_group_layouts: &[vk::DescriptorSetLayout],
) -> GfxResult<vk::PipelineLayout> {
    let create_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(bind_group_layouts);
    Ok(unsafe { device.create_pipeline_layout(&create_info, None)? })
}

impl Device {
    fn resolve_bind_group_layouts(
        &self,
        handles: &[Handle<BindGroupLayout>],
    ) -> GfxResult<DescriptorSetLayoutList> {
        handles
            .iter()
            .map(|&h| {
                self.bind_group_layouts
                    .resolve_hot(h)
                    .map(|hot| hot.raw)
                    .ok_or_else(|| crate::error::GfxError::Validation("stale bind group layout handle".into()))
            })
            .collect()
    }

    /// Builds the vertex+fragment modules, pipeline layout and graphics
    /// pipeline described by `desc` (spec §3's Shader entity, compiled
    /// against `desc.render_pass_layout`/`desc.subpass`). Returns a null handle on
    /// shader-module compilation failure rather than an `Err` (spec §7).
    pub fn create_shader(&mut self, desc: &ShaderDesc<'_>) -> Handle<Shader> {
        let vertex_module = match self.create_shader_module(desc.vertex_spirv) {
            Ok(m) => m,
            Err(e) => {
                log::error!("vertex shader compilation failed: {:?}", e);
                return Handle::null();
            }
        };
        let fragment_module = match self.create_shader_module(desc.fragment_spirv) {
            Ok(m) => m,
            Err(e) => {
                log::error!("fragment shader compilation failed: {:?}", e);
                unsafe { self.raw.destroy_shader_module(vertex_module, None) };
                return Handle::null();
            }
        };

        let set_layouts = match self.resolve_bind_group_layouts(desc.bind_group_layouts) {
            Ok(layouts) => layouts,
            Err(e) => {
                log::error!("shader pipeline layout failed: {:?}", e);
                unsafe {
                    self.raw.destroy_shader_module(vertex_module, None);
                    self.raw.destroy_shader_module(fragment_module, None);
                }
                return Handle::null();
            }
        };
        let pipeline_layout = match create_pipeline_layout(&self.raw, &set_layouts) {
            Ok(layout) => layout,
            Err(e) => {
                log::error!("shader pipeline layout failed: {:?}", e);
                unsafe {
                    self.raw.destroy_shader_module(vertex_module, None);
                    self.raw.destroy_shader_module(fragment_module, None);
                }
                return Handle::null();
            }
        };

        let render_pass_raw = match self.render_pass_layouts.resolve_hot(desc.render_pass_layout) {
            Some(hot) => hot.raw,
            None => {
                log::error!("create_shader: stale render pass layout handle");
                unsafe {
                    self.raw.destroy_pipeline_layout(pipeline_layout, None);
                    self.raw.destroy_shader_module(vertex_module, None);
                    self.raw.destroy_shader_module(fragment_module, None);
                }
                return Handle::null();
            }
        };

        // One specialization-constant map per spec §3's Shader entity,
        // shared by both stages rather than split per-stage.
        let (spec_data, spec_entries) = pack_specialization_constants(desc.specialization_constants);
        let spec_info = vk::SpecializationInfo::builder().map_entries(&spec_entries).data(&spec_data).build();

        let vertex_entry = std::ffi::CString::new(desc.vertex_entry_point).unwrap();
        let fragment_entry = std::ffi::CString::new(desc.fragment_entry_point).unwrap();

        let stages = [
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vertex_module)
                .name(&vertex_entry)
                .specialization_info(&spec_info)
                .build(),
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(fragment_module)
                .name(&fragment_entry)
                .specialization_info(&spec_info)
                .build(),
        ];

        let bindings: Vec<vk::VertexInputBindingDescription> = desc
            .vertex_layout
            .bindings
            .iter()
            .map(|b| vk::VertexInputBindingDescription {
                binding: b.binding,
                stride: b.stride,
                input_rate: if b.per_instance { vk::VertexInputRate::INSTANCE } else { vk::VertexInputRate::VERTEX },
            })
            .collect();
        let attributes: Vec<vk::VertexInputAttributeDescription> = desc
            .vertex_layout
            .attributes
            .iter()
            .map(|a| vk::VertexInputAttributeDescription {
                location: a.location,
                binding: a.binding,
                format: a.format,
                offset: a.offset,
            })
            .collect();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(desc.graphics_state.topology)
            .primitive_restart_enable(false);

        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization = vk::PipelineRasterizationStateCreateInfo::builder()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(desc.graphics_state.cull_mode)
            .front_face(desc.graphics_state.front_face)
            .line_width(1.0)
            .depth_bias_enable(true);

        let multisample = vk::PipelineMultisampleStateCreateInfo::builder()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let ds = &desc.graphics_state.depth_stencil;
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(ds.depth_test_enable)
            .depth_write_enable(ds.depth_write_enable)
            .depth_compare_op(ds.depth_compare_op)
            .stencil_test_enable(ds.stencil_test_enable)
            .front(ds.front)
            .back(ds.back);

        let blend_attachments: Vec<vk::PipelineColorBlendAttachmentState> = desc
            .graphics_state
            .blend_targets
            .iter()
            .map(|b| vk::PipelineColorBlendAttachmentState {
                blend_enable: b.enabled as u32,
                src_color_blend_factor: b.src_color,
                dst_color_blend_factor: b.dst_color,
                color_blend_op: b.color_op,
                src_alpha_blend_factor: b.src_alpha,
                dst_alpha_blend_factor: b.dst_alpha,
                alpha_blend_op: b.alpha_op,
                color_write_mask: vk::ColorComponentFlags::RGBA,
            })
            .collect();
        let color_blend = vk::PipelineColorBlendStateCreateInfo::builder().attachments(&blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR, vk::DynamicState::DEPTH_BIAS];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let create_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(pipeline_layout)
            .render_pass(render_pass_raw)
            .subpass(desc.subpass);

        let pipelines = unsafe {
            self.raw.create_graphics_pipelines(vk::PipelineCache::null(), std::slice::from_ref(&create_info), None)
        };
        let pipeline = match pipelines {
            Ok(pipelines) => pipelines[0],
            Err((_, e)) => {
                log::error!("graphics pipeline creation failed: {:?}", e);
                unsafe {
                    self.raw.destroy_pipeline_layout(pipeline_layout, None);
                    self.raw.destroy_shader_module(vertex_module, None);
                    self.raw.destroy_shader_module(fragment_module, None);
                }
                return Handle::null();
            }
        };

        self.shaders.insert(
            Shader { pipeline, pipeline_layout },
            ShaderCold {
                vertex_module,
                fragment_module,
                render_pass_layout: desc.render_pass_layout,
                subpass: desc.subpass,
            },
        )
    }

    fn create_shader_module(&self, spirv: &[u32]) -> GfxResult<vk::ShaderModule> {
        let create_info = vk::ShaderModuleCreateInfo::builder().code(spirv);
        Ok(unsafe { self.raw.create_shader_module(&create_info, None)? })
    }

    pub fn destroy_shader(&mut self, handle: Handle<Shader>) -> GfxResult<()> {
        let (hot, cold) = self
            .shaders
            .queue_free(handle)
            .ok_or_else(|| crate::error::GfxError::Validation("stale shader handle".into()))?;
        let garbage = &mut self.frames.current_mut().garbage;
        garbage.push_pipeline(hot.pipeline);
        garbage.push_pipeline_layout(hot.pipeline_layout);
        garbage.push_shader_module(cold.vertex_module);
        garbage.push_shader_module(cold.fragment_module);
        Ok(())
    }

    pub fn create_compute_shader(&mut self, desc: &ComputeShaderDesc<'_>) -> Handle<ComputeShader> {
        let module = match self.create_shader_module(desc.spirv) {
            Ok(m) => m,
            Err(e) => {
                log::error!("compute shader compilation failed: {:?}", e);
                return Handle::null();
            }
        };

        let set_layouts = match self.resolve_bind_group_layouts(desc.bind_group_layouts) {
            Ok(layouts) => layouts,
            Err(e) => {
                log::error!("compute pipeline layout failed: {:?}", e);
                unsafe { self.raw.destroy_shader_module(module, None) };
                return Handle::null();
            }
        };
        let pipeline_layout = match create_pipeline_layout(&self.raw, &set_layouts) {
            Ok(layout) => layout,
            Err(e) => {
                log::error!("compute pipeline layout failed: {:?}", e);
                unsafe { self.raw.destroy_shader_module(module, None) };
                return Handle::null();
            }
        };

        let (spec_data, spec_entries) = pack_specialization_constants(desc.specialization_constants);
        let spec_info = vk::SpecializationInfo::builder().map_entries(&spec_entries).data(&spec_data);
        let entry_point = std::ffi::CString::new(desc.entry_point).unwrap();

        let stage = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(module)
            .name(&entry_point)
            .specialization_info(&spec_info);

        let create_info = vk::ComputePipelineCreateInfo::builder().stage(*stage).layout(pipeline_layout);

        let pipelines = unsafe {
            self.raw.create_compute_pipelines(vk::PipelineCache::null(), std::slice::from_ref(&create_info), None)
        };
        let pipeline = match pipelines {
            Ok(pipelines) => pipelines[0],
            Err((_, e)) => {
                log::error!("compute pipeline creation failed: {:?}", e);
                unsafe {
                    self.raw.destroy_pipeline_layout(pipeline_layout, None);
                    self.raw.destroy_shader_module(module, None);
                }
                return Handle::null();
            }
        };

        self.compute_shaders.insert(ComputeShader { pipeline, pipeline_layout }, ComputeShaderCold { module })
    }

    pub fn destroy_compute_shader(&mut self, handle: Handle<ComputeShader>) -> GfxResult<()> {
        let (hot, cold) = self
            .compute_shaders
            .queue_free(handle)
            .ok_or_else(|| crate::error::GfxError::Validation("stale compute shader handle".into()))?;
        let garbage = &mut self.frames.current_mut().garbage;
        garbage.push_pipeline(hot.pipeline);
        garbage.push_pipeline_layout(hot.pipeline_layout);
        garbage.push_shader_module(cold.module);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec3_is_16_byte_aligned_like_std140() {
        let (data, entries) = pack_specialization_constants(&[
            SpecializationValue::Float(1.0),
            SpecializationValue::Vec3([0.0, 0.0, 0.0]),
        ]);
        assert_eq!(entries[0].offset, 0);
        assert_eq!(entries[1].offset, 16);
        assert_eq!(data.len(), 28);
    }

    #[test]
    fn scalars_pack_tightly() {
        let (_data, entries) = pack_specialization_constants(&[
            SpecializationValue::Int(1),
            SpecializationValue::Float(2.0),
            SpecializationValue::Bool(true),
        ]);
        assert_eq!(entries[0].offset, 0);
        assert_eq!(entries[1].offset, 4);
        assert_eq!(entries[2].offset, 8);
    }

    #[test]
    fn default_graphics_state_culls_back_faces_and_tests_depth() {
        let state = GraphicsState::default();
        assert_eq!(state.cull_mode, vk::CullModeFlags::BACK);
        assert!(state.depth_stencil.depth_test_enable);
        assert_eq!(state.blend_targets.len(), 1);
    }
}
