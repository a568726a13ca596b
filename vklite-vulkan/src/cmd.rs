//! C8: the command recorder. One `CommandRecorder` owns a pool of command
//! buffers (one per swapchain image, typically) and exposes the spec §4.7
//! operation set directly as methods taking the buffer index `idx` to
//! record into. `BarrierBuilder` aggregates buffer/image barriers into a
//! single `vkCmdPipelineBarrier`, grounded near-verbatim on
//! `zangfx_vulkan::cmd::barrier::BarrierBuilder`'s accumulate-then-`build()`
//! shape (translated from the dyn-trait encoder pattern into a concrete
//! recorder method).

use ash::vk;

use crate::buffer::{Buffer, BufferRegions};
use crate::descriptor::Bindings;
use crate::device::DeviceRef;
use crate::error::Result;
use crate::image::Image;
use crate::pipeline::{ComputePipeline, GraphicsPipeline};
use crate::renderpass::{Framebuffers, RenderPass};

/// Accumulates buffer and image memory barriers plus the union of
/// src/dst pipeline stages they imply, for emission in one
/// `vkCmdPipelineBarrier` call.
#[derive(Default)]
pub struct BarrierBuilder {
    src_stage: vk::PipelineStageFlags,
    dst_stage: vk::PipelineStageFlags,
    buffer_barriers: Vec<vk::BufferMemoryBarrier>,
    image_barriers: Vec<vk::ImageMemoryBarrier>,
}

impl BarrierBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buffer(
        mut self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        src_access: vk::AccessFlags,
        dst_access: vk::AccessFlags,
        buffer: &Buffer,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
        src_family: u32,
        dst_family: u32,
    ) -> Self {
        self.src_stage |= src_stage;
        self.dst_stage |= dst_stage;
        self.buffer_barriers.push(
            vk::BufferMemoryBarrier::builder()
                .src_access_mask(src_access)
                .dst_access_mask(dst_access)
                .src_queue_family_index(src_family)
                .dst_queue_family_index(dst_family)
                .buffer(buffer.vk_buffer())
                .offset(offset)
                .size(size)
                .build(),
        );
        self
    }

    pub fn image(
        mut self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        src_access: vk::AccessFlags,
        dst_access: vk::AccessFlags,
        image: &Image,
        src_layout: vk::ImageLayout,
        dst_layout: vk::ImageLayout,
        src_family: u32,
        dst_family: u32,
    ) -> Self {
        self.src_stage |= src_stage;
        self.dst_stage |= dst_stage;
        self.image_barriers.push(
            vk::ImageMemoryBarrier::builder()
                .src_access_mask(src_access)
                .dst_access_mask(dst_access)
                .old_layout(src_layout)
                .new_layout(dst_layout)
                .src_queue_family_index(src_family)
                .dst_queue_family_index(dst_family)
                .image(image.vk_image())
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: image.aspect(),
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                })
                .build(),
        );
        self
    }
}

/// Records command buffers against a fixed pool, one per logical index
/// (typically one per swapchain image).
pub struct CommandRecorder {
    device: DeviceRef,
    pool: vk::CommandPool,
    buffers: Vec<vk::CommandBuffer>,
    /// Whether `begin_renderpass` was called for buffer `idx` without a
    /// matching end yet, so `end()` knows whether to close it first.
    in_renderpass: std::cell::RefCell<Vec<bool>>,
}

impl CommandRecorder {
    pub fn create(device: DeviceRef, family: u32, count: usize) -> Result<Self> {
        let pool = device.command_pool(family)?;
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count as u32);
        let buffers = unsafe { device.vk_device().allocate_command_buffers(&alloc_info) }
            .map_err(crate::error::translate_vk_result)?;
        let in_renderpass = std::cell::RefCell::new(vec![false; count]);
        Ok(CommandRecorder {
            device,
            pool,
            buffers,
            in_renderpass,
        })
    }

    pub fn vk_buffer(&self, idx: usize) -> vk::CommandBuffer {
        self.buffers[idx]
    }

    pub fn reset(&self, idx: usize) -> Result<()> {
        unsafe {
            self.device
                .vk_device()
                .reset_command_buffer(self.buffers[idx], vk::CommandBufferResetFlags::empty())
        }
        .map_err(crate::error::translate_vk_result)
    }

    pub fn begin(&self, idx: usize) -> Result<()> {
        let info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.vk_device().begin_command_buffer(self.buffers[idx], &info) }
            .map_err(crate::error::translate_vk_result)
    }

    pub fn begin_renderpass(
        &self,
        idx: usize,
        rp: &RenderPass,
        fb: &Framebuffers,
        clear_values: &[vk::ClearValue],
    ) {
        let (w, h) = fb.dims();
        let info = vk::RenderPassBeginInfo::builder()
            .render_pass(rp.vk_render_pass())
            .framebuffer(fb.vk_framebuffer(idx))
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: vk::Extent2D { width: w, height: h },
            })
            .clear_values(clear_values);
        unsafe {
            self.device
                .vk_device()
                .cmd_begin_render_pass(self.buffers[idx], &info, vk::SubpassContents::INLINE)
        };
        self.in_renderpass.borrow_mut()[idx] = true;
    }

    pub fn viewport(&self, idx: usize, width: f32, height: f32) {
        let vp = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width,
            height,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: vk::Extent2D {
                width: width as u32,
                height: height as u32,
            },
        };
        unsafe {
            self.device.vk_device().cmd_set_viewport(self.buffers[idx], 0, &[vp]);
            self.device.vk_device().cmd_set_scissor(self.buffers[idx], 0, &[scissor]);
        }
    }

    pub fn bind_vertex_buffer(&self, idx: usize, br: &BufferRegions, buffer: &Buffer, offset: vk::DeviceSize) {
        let _ = br;
        unsafe {
            self.device.vk_device().cmd_bind_vertex_buffers(
                self.buffers[idx],
                0,
                &[buffer.vk_buffer()],
                &[offset],
            )
        };
    }

    pub fn bind_index_buffer(&self, idx: usize, buffer: &Buffer, offset: vk::DeviceSize, index_type: vk::IndexType) {
        unsafe {
            self.device
                .vk_device()
                .cmd_bind_index_buffer(self.buffers[idx], buffer.vk_buffer(), offset, index_type)
        };
    }

    /// Binds a graphics pipeline and its descriptor sets. When the
    /// pipeline's slot set has dynamic UBO slots, `dyn_idx` is used to
    /// compute each slot's offset as `dyn_idx * alignment[slot]`.
    pub fn bind_graphics(&self, idx: usize, gfx: &GraphicsPipeline, bindings: &Bindings, dset_idx: usize, dyn_offsets: &[u32]) {
        unsafe {
            self.device
                .vk_device()
                .cmd_bind_pipeline(self.buffers[idx], vk::PipelineBindPoint::GRAPHICS, gfx.vk_pipeline());
            self.device.vk_device().cmd_bind_descriptor_sets(
                self.buffers[idx],
                vk::PipelineBindPoint::GRAPHICS,
                gfx.vk_layout(),
                0,
                &[bindings.vk_set(dset_idx)],
                dyn_offsets,
            );
        }
    }

    pub fn bind_compute(&self, idx: usize, cmp: &ComputePipeline, bindings: &Bindings, dset_idx: usize, dyn_offsets: &[u32]) {
        unsafe {
            self.device
                .vk_device()
                .cmd_bind_pipeline(self.buffers[idx], vk::PipelineBindPoint::COMPUTE, cmp.vk_pipeline());
            self.device.vk_device().cmd_bind_descriptor_sets(
                self.buffers[idx],
                vk::PipelineBindPoint::COMPUTE,
                cmp.vk_layout(),
                0,
                &[bindings.vk_set(dset_idx)],
                dyn_offsets,
            );
        }
    }

    pub fn draw(&self, idx: usize, first: u32, count: u32) {
        unsafe { self.device.vk_device().cmd_draw(self.buffers[idx], count, 1, first, 0) };
    }

    pub fn draw_indexed(&self, idx: usize, first_index: u32, vertex_offset: i32, index_count: u32) {
        unsafe {
            self.device
                .vk_device()
                .cmd_draw_indexed(self.buffers[idx], index_count, 1, first_index, vertex_offset, 0)
        };
    }

    pub fn draw_indirect(&self, idx: usize, buffer: &Buffer, offset: vk::DeviceSize) {
        unsafe {
            self.device
                .vk_device()
                .cmd_draw_indirect(self.buffers[idx], buffer.vk_buffer(), offset, 1, 0)
        };
    }

    pub fn draw_indexed_indirect(&self, idx: usize, buffer: &Buffer, offset: vk::DeviceSize) {
        unsafe {
            self.device
                .vk_device()
                .cmd_draw_indexed_indirect(self.buffers[idx], buffer.vk_buffer(), offset, 1, 0)
        };
    }

    pub fn dispatch(&self, idx: usize, x: u32, y: u32, z: u32) {
        unsafe { self.device.vk_device().cmd_dispatch(self.buffers[idx], x, y, z) };
    }

    pub fn barrier(&self, idx: usize, builder: BarrierBuilder) {
        unsafe {
            self.device.vk_device().cmd_pipeline_barrier(
                self.buffers[idx],
                builder.src_stage,
                builder.dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &builder.buffer_barriers,
                &builder.image_barriers,
            )
        };
    }

    pub fn copy_buffer(&self, idx: usize, src: &Buffer, src_offset: vk::DeviceSize, dst: &Buffer, dst_offset: vk::DeviceSize, size: vk::DeviceSize) {
        let region = vk::BufferCopy {
            src_offset,
            dst_offset,
            size,
        };
        unsafe {
            self.device
                .vk_device()
                .cmd_copy_buffer(self.buffers[idx], src.vk_buffer(), dst.vk_buffer(), &[region])
        };
    }

    pub fn copy_buffer_to_image(&self, idx: usize, buffer: &Buffer, buf_offset: vk::DeviceSize, image: &Image, extent: (u32, u32, u32)) {
        let (w, h, d) = extent;
        let region = vk::BufferImageCopy {
            buffer_offset: buf_offset,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: image.aspect(),
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            },
            image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
            image_extent: vk::Extent3D {
                width: w,
                height: h,
                depth: d,
            },
        };
        unsafe {
            self.device.vk_device().cmd_copy_buffer_to_image(
                self.buffers[idx],
                buffer.vk_buffer(),
                image.vk_image(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            )
        };
    }

    pub fn copy_image_to_buffer(&self, idx: usize, image: &Image, extent: (u32, u32, u32), buffer: &Buffer, buf_offset: vk::DeviceSize) {
        let (w, h, d) = extent;
        let region = vk::BufferImageCopy {
            buffer_offset: buf_offset,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: image.aspect(),
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            },
            image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
            image_extent: vk::Extent3D {
                width: w,
                height: h,
                depth: d,
            },
        };
        unsafe {
            self.device.vk_device().cmd_copy_image_to_buffer(
                self.buffers[idx],
                image.vk_image(),
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                buffer.vk_buffer(),
                &[region],
            )
        };
    }

    pub fn copy_image(&self, idx: usize, src: &Image, dst: &Image, extent: (u32, u32, u32)) {
        let (w, h, d) = extent;
        let region = vk::ImageCopy {
            src_subresource: vk::ImageSubresourceLayers {
                aspect_mask: src.aspect(),
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            },
            src_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
            dst_subresource: vk::ImageSubresourceLayers {
                aspect_mask: dst.aspect(),
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            },
            dst_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
            extent: vk::Extent3D {
                width: w,
                height: h,
                depth: d,
            },
        };
        unsafe {
            self.device.vk_device().cmd_copy_image(
                self.buffers[idx],
                src.vk_image(),
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst.vk_image(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            )
        };
    }

    pub fn push(&self, idx: usize, layout: vk::PipelineLayout, stages: vk::ShaderStageFlags, offset: u32, data: &[u8]) {
        unsafe {
            self.device
                .vk_device()
                .cmd_push_constants(self.buffers[idx], layout, stages, offset, data)
        };
    }

    pub fn end(&self, idx: usize) -> Result<()> {
        if std::mem::replace(&mut self.in_renderpass.borrow_mut()[idx], false) {
            unsafe { self.device.vk_device().cmd_end_render_pass(self.buffers[idx]) };
        }
        unsafe { self.device.vk_device().end_command_buffer(self.buffers[idx]) }
            .map_err(crate::error::translate_vk_result)
    }
}

impl Drop for CommandRecorder {
    fn drop(&mut self) {
        unsafe {
            self.device
                .vk_device()
                .free_command_buffers(self.pool, &self.buffers);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn barrier_builder_unions_stage_masks() {
        let builder = BarrierBuilder::new();
        assert_eq!(builder.src_stage, vk::PipelineStageFlags::empty());
        assert_eq!(builder.dst_stage, vk::PipelineStageFlags::empty());
    }
}
