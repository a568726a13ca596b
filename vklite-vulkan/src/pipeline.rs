//! C4 (pipeline half): `GraphicsPipeline` and `ComputePipeline`, plus the
//! pipeline layout (descriptor-set layout + optional push-constant range).
//! Grounded on `zangfx_vulkan::pipeline::{ComputePipelineBuilder,
//! GraphicsPipelineBuilder}`'s shader-stage assembly and pipeline-creation
//! sequence, translated from `base::RootSig`/`Library` trait objects into
//! concrete `DescriptorSlotSet`/`ShaderModule` references.

use std::ffi::CString;

use ash::vk;
use vklite_core::object::{Object, ObjectStatus};

use crate::descriptor::DescriptorSlotSet;
use crate::device::DeviceRef;
use crate::error::{Result, VkResultExt};
use crate::renderpass::RenderPass;
use crate::shader::ShaderModule;

/// Blend policy selected for the single color attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendType {
    Opaque,
    AlphaBlend,
    Additive,
}

impl BlendType {
    fn to_vk(self) -> vk::PipelineColorBlendAttachmentState {
        let base = vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA);
        match self {
            BlendType::Opaque => base.blend_enable(false).build(),
            BlendType::AlphaBlend => base
                .blend_enable(true)
                .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
                .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::ONE)
                .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
                .alpha_blend_op(vk::BlendOp::ADD)
                .build(),
            BlendType::Additive => base
                .blend_enable(true)
                .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
                .dst_color_blend_factor(vk::BlendFactor::ONE)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::ONE)
                .dst_alpha_blend_factor(vk::BlendFactor::ONE)
                .alpha_blend_op(vk::BlendOp::ADD)
                .build(),
        }
    }
}

fn pipeline_layout(
    device: &DeviceRef,
    slot_set: &DescriptorSlotSet,
    push_constant_range: Option<vk::PushConstantRange>,
) -> Result<vk::PipelineLayout> {
    let set_layouts = [slot_set.vk_layout()];
    let push_ranges: Vec<vk::PushConstantRange> = push_constant_range.into_iter().collect();
    let info = vk::PipelineLayoutCreateInfo::builder()
        .set_layouts(&set_layouts)
        .push_constant_ranges(&push_ranges);
    unsafe { device.vk_device().create_pipeline_layout(&info, None) }.vk()
}

pub struct GraphicsPipelineBuilder<'a> {
    device: DeviceRef,
    vertex_shader: Option<(&'a ShaderModule, String)>,
    fragment_shader: Option<(&'a ShaderModule, String)>,
    vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    vertex_attrs: Vec<vk::VertexInputAttributeDescription>,
    topology: vk::PrimitiveTopology,
    polygon_mode: vk::PolygonMode,
    cull_mode: vk::CullModeFlags,
    front_face: vk::FrontFace,
    blend_type: BlendType,
    depth_test: bool,
    push_constant_range: Option<vk::PushConstantRange>,
}

impl<'a> GraphicsPipelineBuilder<'a> {
    pub fn new(device: DeviceRef) -> Self {
        GraphicsPipelineBuilder {
            device,
            vertex_shader: None,
            fragment_shader: None,
            vertex_bindings: Vec::new(),
            vertex_attrs: Vec::new(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            blend_type: BlendType::Opaque,
            depth_test: false,
            push_constant_range: None,
        }
    }

    pub fn vertex_shader(mut self, module: &'a ShaderModule, entry: impl Into<String>) -> Self {
        self.vertex_shader = Some((module, entry.into()));
        self
    }

    pub fn fragment_shader(mut self, module: &'a ShaderModule, entry: impl Into<String>) -> Self {
        self.fragment_shader = Some((module, entry.into()));
        self
    }

    pub fn vertex_binding(mut self, binding: vk::VertexInputBindingDescription) -> Self {
        self.vertex_bindings.push(binding);
        self
    }

    pub fn vertex_attr(mut self, attr: vk::VertexInputAttributeDescription) -> Self {
        self.vertex_attrs.push(attr);
        self
    }

    pub fn topology(mut self, topology: vk::PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    pub fn cull_mode(mut self, cull_mode: vk::CullModeFlags, front_face: vk::FrontFace) -> Self {
        self.cull_mode = cull_mode;
        self.front_face = front_face;
        self
    }

    pub fn blend_type(mut self, blend_type: BlendType) -> Self {
        self.blend_type = blend_type;
        self
    }

    pub fn depth_test(mut self, enabled: bool) -> Self {
        self.depth_test = enabled;
        self
    }

    pub fn push_constant_range(mut self, range: vk::PushConstantRange) -> Self {
        self.push_constant_range = Some(range);
        self
    }

    pub fn build(self, slot_set: &DescriptorSlotSet, render_pass: &RenderPass, subpass: u32) -> Result<GraphicsPipeline> {
        let vertex_shader = self
            .vertex_shader
            .as_ref()
            .ok_or_else(|| vklite_core::GfxError::InitFailure("missing vertex_shader".into()))?;
        let fragment_shader = self
            .fragment_shader
            .as_ref()
            .ok_or_else(|| vklite_core::GfxError::InitFailure("missing fragment_shader".into()))?;

        let vs_name = CString::new(vertex_shader.1.clone()).unwrap();
        let fs_name = CString::new(fragment_shader.1.clone()).unwrap();
        let stages = [
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vertex_shader.0.vk_module())
                .name(&vs_name)
                .build(),
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(fragment_shader.0.vk_module())
                .name(&fs_name)
                .build(),
        ];

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&self.vertex_bindings)
            .vertex_attribute_descriptions(&self.vertex_attrs);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(self.topology)
            .primitive_restart_enable(false);

        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(self.polygon_mode)
            .line_width(1.0)
            .cull_mode(self.cull_mode)
            .front_face(self.front_face)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .sample_shading_enable(false);

        let blend_attachment = self.blend_type.to_vk();
        let blend_attachments = [blend_attachment];
        let color_blend = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&blend_attachments);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(self.depth_test)
            .depth_write_enable(self.depth_test)
            .depth_compare_op(vk::CompareOp::LESS);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let layout = pipeline_layout(&self.device, slot_set, self.push_constant_range)?;

        let info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .color_blend_state(&color_blend)
            .depth_stencil_state(&depth_stencil)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(render_pass.vk_render_pass())
            .subpass(subpass);

        let vk_pipeline = unsafe {
            self.device
                .vk_device()
                .create_graphics_pipelines(vk::PipelineCache::null(), &[info.build()], None)
        }
        .map_err(|(pipelines, e)| {
            for p in pipelines {
                if p != vk::Pipeline::null() {
                    unsafe { self.device.vk_device().destroy_pipeline(p, None) };
                }
            }
            crate::error::translate_vk_result(e)
        })?[0];

        Ok(GraphicsPipeline {
            device: self.device,
            vk_pipeline,
            vk_layout: layout,
            status: ObjectStatus::Created,
        })
    }
}

pub struct GraphicsPipeline {
    device: DeviceRef,
    vk_pipeline: vk::Pipeline,
    vk_layout: vk::PipelineLayout,
    status: ObjectStatus,
}

unsafe impl Send for GraphicsPipeline {}
unsafe impl Sync for GraphicsPipeline {}

impl Object for GraphicsPipeline {
    fn status(&self) -> ObjectStatus {
        self.status
    }
    fn set_status(&mut self, status: ObjectStatus) {
        self.status = status;
    }
}

impl GraphicsPipeline {
    pub fn vk_pipeline(&self) -> vk::Pipeline {
        self.vk_pipeline
    }

    pub fn vk_layout(&self) -> vk::PipelineLayout {
        self.vk_layout
    }

    pub fn destroy(&mut self) {
        if self.status == ObjectStatus::Destroyed {
            return;
        }
        unsafe {
            self.device.vk_device().destroy_pipeline(self.vk_pipeline, None);
            self.device.vk_device().destroy_pipeline_layout(self.vk_layout, None);
        }
        self.status = ObjectStatus::Destroyed;
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        self.destroy();
    }
}

pub struct ComputePipelineBuilder<'a> {
    device: DeviceRef,
    shader: Option<(&'a ShaderModule, String)>,
}

impl<'a> ComputePipelineBuilder<'a> {
    pub fn new(device: DeviceRef) -> Self {
        ComputePipelineBuilder { device, shader: None }
    }

    pub fn shader(mut self, module: &'a ShaderModule, entry: impl Into<String>) -> Self {
        self.shader = Some((module, entry.into()));
        self
    }

    pub fn build(self, slot_set: &DescriptorSlotSet) -> Result<ComputePipeline> {
        let shader = self
            .shader
            .as_ref()
            .ok_or_else(|| vklite_core::GfxError::InitFailure("missing compute shader".into()))?;
        let name = CString::new(shader.1.clone()).unwrap();
        let stage = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(shader.0.vk_module())
            .name(&name);

        let layout = pipeline_layout(&self.device, slot_set, None)?;

        let info = vk::ComputePipelineCreateInfo::builder()
            .stage(stage.build())
            .layout(layout);

        let vk_pipeline = unsafe {
            self.device
                .vk_device()
                .create_compute_pipelines(vk::PipelineCache::null(), &[info.build()], None)
        }
        .map_err(|(pipelines, e)| {
            for p in pipelines {
                if p != vk::Pipeline::null() {
                    unsafe { self.device.vk_device().destroy_pipeline(p, None) };
                }
            }
            crate::error::translate_vk_result(e)
        })?[0];

        Ok(ComputePipeline {
            device: self.device,
            vk_pipeline,
            vk_layout: layout,
            status: ObjectStatus::Created,
        })
    }
}

pub struct ComputePipeline {
    device: DeviceRef,
    vk_pipeline: vk::Pipeline,
    vk_layout: vk::PipelineLayout,
    status: ObjectStatus,
}

unsafe impl Send for ComputePipeline {}
unsafe impl Sync for ComputePipeline {}

impl Object for ComputePipeline {
    fn status(&self) -> ObjectStatus {
        self.status
    }
    fn set_status(&mut self, status: ObjectStatus) {
        self.status = status;
    }
}

impl ComputePipeline {
    pub fn vk_pipeline(&self) -> vk::Pipeline {
        self.vk_pipeline
    }

    pub fn vk_layout(&self) -> vk::PipelineLayout {
        self.vk_layout
    }

    pub fn destroy(&mut self) {
        if self.status == ObjectStatus::Destroyed {
            return;
        }
        unsafe {
            self.device.vk_device().destroy_pipeline(self.vk_pipeline, None);
            self.device.vk_device().destroy_pipeline_layout(self.vk_layout, None);
        }
        self.status = ObjectStatus::Destroyed;
    }
}

impl Drop for ComputePipeline {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blend_opaque_disables_blending() {
        let state = BlendType::Opaque.to_vk();
        assert_eq!(state.blend_enable, vk::FALSE);
    }

    #[test]
    fn blend_alpha_enables_blending() {
        let state = BlendType::AlphaBlend.to_vk();
        assert_eq!(state.blend_enable, vk::TRUE);
    }
}
