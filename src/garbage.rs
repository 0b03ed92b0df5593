//! Per-frame garbage list (spec §4.5).
//!
//! Every `destroy_*` call invalidates its handle immediately but defers the
//! actual driver object destruction by pushing it here. Each frame context
//! owns one `GarbageList`; it accumulates through frame F's recording and is
//! drained by `Device::garbage_collect` only once frame F's in-flight fence
//! has signaled — by which point frame F's commands have retired and
//! nothing on the device can still be referencing the object.

use ash::vk;

use crate::memory::Allocation;

#[derive(Default)]
pub struct GarbageList {
    buffers: Vec<(vk::Buffer, Option<Allocation>)>,
    /// `bool` is `owns_image` (spec §4.7): swapchain-wrapped textures push
    /// `false` here so the image itself is left for the swapchain to
    /// destroy, while any allocation (there never is one for those) would
    /// still be freed.
    textures: Vec<(vk::Image, Option<Allocation>, bool)>,
    texture_views: Vec<vk::ImageView>,
    samplers: Vec<vk::Sampler>,
    shader_modules: Vec<vk::ShaderModule>,
    render_passes: Vec<vk::RenderPass>,
    framebuffers: Vec<vk::Framebuffer>,
    semaphores: Vec<vk::Semaphore>,
    pipelines: Vec<vk::Pipeline>,
    pipeline_layouts: Vec<vk::PipelineLayout>,
}

impl GarbageList {
    pub fn push_buffer(&mut self, buffer: vk::Buffer, allocation: Option<Allocation>) {
        self.buffers.push((buffer, allocation));
    }

    pub fn push_texture(&mut self, texture: vk::Image, allocation: Option<Allocation>, owns_image: bool) {
        self.textures.push((texture, allocation, owns_image));
    }

    pub fn push_texture_view(&mut self, view: vk::ImageView) {
        self.texture_views.push(view);
    }

    pub fn push_sampler(&mut self, sampler: vk::Sampler) {
        self.samplers.push(sampler);
    }

    pub fn push_shader_module(&mut self, module: vk::ShaderModule) {
        self.shader_modules.push(module);
    }

    pub fn push_render_pass(&mut self, pass: vk::RenderPass) {
        self.render_passes.push(pass);
    }

    pub fn push_framebuffer(&mut self, framebuffer: vk::Framebuffer) {
        self.framebuffers.push(framebuffer);
    }

    pub fn push_semaphore(&mut self, semaphore: vk::Semaphore) {
        self.semaphores.push(semaphore);
    }

    pub fn push_pipeline(&mut self, pipeline: vk::Pipeline) {
        self.pipelines.push(pipeline);
    }

    pub fn push_pipeline_layout(&mut self, layout: vk::PipelineLayout) {
        self.pipeline_layouts.push(layout);
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
            && self.textures.is_empty()
            && self.texture_views.is_empty()
            && self.samplers.is_empty()
            && self.shader_modules.is_empty()
            && self.render_passes.is_empty()
            && self.framebuffers.is_empty()
            && self.semaphores.is_empty()
            && self.pipelines.is_empty()
            && self.pipeline_layouts.is_empty()
    }

    /// Destroys everything queued and empties the list. Order matters:
    /// views/framebuffers before the images/render passes they reference,
    /// then the underlying memory.
    pub fn drain(
        &mut self,
        device: &ash::Device,
        allocator: &dyn crate::memory::MemoryAllocator,
    ) {
        for framebuffer in self.framebuffers.drain(..) {
            unsafe { device.destroy_framebuffer(framebuffer, None) };
        }
        for view in self.texture_views.drain(..) {
            unsafe { device.destroy_image_view(view, None) };
        }
        for sampler in self.samplers.drain(..) {
            unsafe { device.destroy_sampler(sampler, None) };
        }
        for pipeline in self.pipelines.drain(..) {
            unsafe { device.destroy_pipeline(pipeline, None) };
        }
        for layout in self.pipeline_layouts.drain(..) {
            unsafe { device.destroy_pipeline_layout(layout, None) };
        }
        for pass in self.render_passes.drain(..) {
            unsafe { device.destroy_render_pass(pass, None) };
        }
        for module in self.shader_modules.drain(..) {
            unsafe { device.destroy_shader_module(module, None) };
        }
        for semaphore in self.semaphores.drain(..) {
            unsafe { device.destroy_semaphore(semaphore, None) };
        }
        for (buffer, allocation) in self.buffers.drain(..) {
            unsafe { device.destroy_buffer(buffer, None) };
            if let Some(allocation) = allocation {
                allocator.free(device, allocation);
            }
        }
        for (texture, allocation, owns_image) in self.textures.drain(..) {
            if owns_image {
                unsafe { device.destroy_image(texture, None) };
            }
            if let Some(allocation) = allocation {
                allocator.free(device, allocation);
            }
        }
    }
}
