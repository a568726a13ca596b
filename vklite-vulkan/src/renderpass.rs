//! C4 (render pass half): `RenderPass` and `Framebuffers`. Grounded on
//! `zangfx_vulkan::renderpass::RenderPassBuilder`, translated from the
//! per-target-builder-object shape into a single builder that collects
//! attachments/subpasses/dependencies directly, since this crate only
//! targets one subpass layout (the canvas render pass) rather than an
//! arbitrary backend-agnostic multi-subpass graph.

use ash::vk;
use vklite_core::object::{Object, ObjectStatus};

use crate::device::DeviceRef;
use crate::error::{Result, VkResultExt};
use crate::image::Image;

/// One color or depth attachment: format plus load/store ops and the
/// layout transition it's expected to undergo across the render pass.
#[derive(Debug, Clone, Copy)]
pub struct AttachmentDesc {
    pub format: vk::Format,
    pub load_op: vk::AttachmentLoadOp,
    pub store_op: vk::AttachmentStoreOp,
    pub initial_layout: vk::ImageLayout,
    pub final_layout: vk::ImageLayout,
    pub is_depth: bool,
}

/// A subpass referencing a subset of the render pass's attachments by
/// index, plus the layout each is used in during that subpass.
#[derive(Debug, Clone)]
pub struct SubpassDesc {
    pub color_refs: Vec<(u32, vk::ImageLayout)>,
    pub depth_ref: Option<(u32, vk::ImageLayout)>,
}

/// Stage + access masks for a subpass dependency, matching
/// `BarrierBuilder`'s access-type-to-stage-mask translation.
#[derive(Debug, Clone, Copy)]
pub struct SubpassDependencyDesc {
    pub src_subpass: u32,
    pub dst_subpass: u32,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
}

pub struct RenderPassBuilder {
    device: DeviceRef,
    attachments: Vec<AttachmentDesc>,
    subpasses: Vec<SubpassDesc>,
    dependencies: Vec<SubpassDependencyDesc>,
}

impl RenderPassBuilder {
    pub fn new(device: DeviceRef) -> Self {
        RenderPassBuilder {
            device,
            attachments: Vec::new(),
            subpasses: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    pub fn attachment(mut self, desc: AttachmentDesc) -> Self {
        self.attachments.push(desc);
        self
    }

    pub fn subpass(mut self, desc: SubpassDesc) -> Self {
        self.subpasses.push(desc);
        self
    }

    pub fn dependency(mut self, dep: SubpassDependencyDesc) -> Self {
        self.dependencies.push(dep);
        self
    }

    pub fn build(self) -> Result<RenderPass> {
        let vk_attachments: Vec<vk::AttachmentDescription> = self
            .attachments
            .iter()
            .map(|a| {
                vk::AttachmentDescription::builder()
                    .format(a.format)
                    .samples(vk::SampleCountFlags::TYPE_1)
                    .load_op(a.load_op)
                    .store_op(a.store_op)
                    .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                    .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .initial_layout(a.initial_layout)
                    .final_layout(a.final_layout)
                    .build()
            })
            .collect();

        // Attachment-reference storage must outlive the subpass descriptions
        // built from it below.
        let color_refs: Vec<Vec<vk::AttachmentReference>> = self
            .subpasses
            .iter()
            .map(|s| {
                s.color_refs
                    .iter()
                    .map(|&(i, layout)| vk::AttachmentReference {
                        attachment: i,
                        layout,
                    })
                    .collect()
            })
            .collect();
        let depth_refs: Vec<Option<vk::AttachmentReference>> = self
            .subpasses
            .iter()
            .map(|s| {
                s.depth_ref.map(|(i, layout)| vk::AttachmentReference {
                    attachment: i,
                    layout,
                })
            })
            .collect();

        let vk_subpasses: Vec<vk::SubpassDescription> = self
            .subpasses
            .iter()
            .enumerate()
            .map(|(i, _)| {
                let mut builder = vk::SubpassDescription::builder()
                    .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
                    .color_attachments(&color_refs[i]);
                if let Some(depth_ref) = depth_refs[i].as_ref() {
                    builder = builder.depth_stencil_attachment(depth_ref);
                }
                builder.build()
            })
            .collect();

        let vk_dependencies: Vec<vk::SubpassDependency> = self
            .dependencies
            .iter()
            .map(|d| vk::SubpassDependency {
                src_subpass: d.src_subpass,
                dst_subpass: d.dst_subpass,
                src_stage_mask: d.src_stage,
                dst_stage_mask: d.dst_stage,
                src_access_mask: d.src_access,
                dst_access_mask: d.dst_access,
                dependency_flags: vk::DependencyFlags::empty(),
            })
            .collect();

        let info = vk::RenderPassCreateInfo::builder()
            .attachments(&vk_attachments)
            .subpasses(&vk_subpasses)
            .dependencies(&vk_dependencies);
        let vk_render_pass = unsafe { self.device.vk_device().create_render_pass(&info, None) }.vk()?;

        Ok(RenderPass {
            device: self.device,
            vk_render_pass,
            attachments: self.attachments,
            status: ObjectStatus::Created,
        })
    }
}

pub struct RenderPass {
    device: DeviceRef,
    vk_render_pass: vk::RenderPass,
    attachments: Vec<AttachmentDesc>,
    status: ObjectStatus,
}

unsafe impl Send for RenderPass {}
unsafe impl Sync for RenderPass {}

impl Object for RenderPass {
    fn status(&self) -> ObjectStatus {
        self.status
    }
    fn set_status(&mut self, status: ObjectStatus) {
        self.status = status;
    }
}

impl RenderPass {
    pub fn vk_render_pass(&self) -> vk::RenderPass {
        self.vk_render_pass
    }

    pub fn attachments(&self) -> &[AttachmentDesc] {
        &self.attachments
    }

    pub fn destroy(&mut self) {
        if self.status == ObjectStatus::Destroyed {
            return;
        }
        unsafe {
            self.device.vk_device().destroy_render_pass(self.vk_render_pass, None);
        }
        self.status = ObjectStatus::Destroyed;
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Per-swapchain-image binding of image views to render-pass attachment
/// slots. Invariant: every framebuffer shares `(width, height)` and there
/// are at least as many as the swapchain has images.
pub struct Framebuffers {
    device: DeviceRef,
    vk_framebuffers: Vec<vk::Framebuffer>,
    width: u32,
    height: u32,
    status: ObjectStatus,
}

unsafe impl Send for Framebuffers {}
unsafe impl Sync for Framebuffers {}

impl Object for Framebuffers {
    fn status(&self) -> ObjectStatus {
        self.status
    }
    fn set_status(&mut self, status: ObjectStatus) {
        self.status = status;
    }
}

impl Framebuffers {
    /// `attachments_per_image[i]` lists the image views bound to the
    /// render pass's attachment slots for swapchain image `i` (e.g.
    /// `[swapchain_view[i], depth_view]`).
    pub fn create(
        device: DeviceRef,
        render_pass: &RenderPass,
        attachments_per_image: &[Vec<&Image>],
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let mut vk_framebuffers = Vec::with_capacity(attachments_per_image.len());
        for views in attachments_per_image {
            let vk_views: Vec<vk::ImageView> = views.iter().map(|img| img.vk_view()).collect();
            let info = vk::FramebufferCreateInfo::builder()
                .render_pass(render_pass.vk_render_pass())
                .attachments(&vk_views)
                .width(width)
                .height(height)
                .layers(1);
            let fb = unsafe { device.vk_device().create_framebuffer(&info, None) }.vk()?;
            vk_framebuffers.push(fb);
        }
        Ok(Framebuffers {
            device,
            vk_framebuffers,
            width,
            height,
            status: ObjectStatus::Created,
        })
    }

    pub fn vk_framebuffer(&self, img_idx: usize) -> vk::Framebuffer {
        self.vk_framebuffers[img_idx]
    }

    pub fn count(&self) -> usize {
        self.vk_framebuffers.len()
    }

    pub fn dims(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn destroy(&mut self) {
        if self.status == ObjectStatus::Destroyed {
            return;
        }
        unsafe {
            for &fb in &self.vk_framebuffers {
                self.device.vk_device().destroy_framebuffer(fb, None);
            }
        }
        self.status = ObjectStatus::Destroyed;
    }
}

impl Drop for Framebuffers {
    fn drop(&mut self) {
        self.destroy();
    }
}
