//! C4 (image half): `Image`, `ImageBuilder`, and `Sampler`. An `Image` owns
//! one or more `vk::Image` plus backing memory and tracks its current
//! layout so barrier emission (see `cmd::BarrierBuilder`) always knows what
//! it's transitioning from. Swapchain images are special-cased: they share
//! this type's read surface but are not owned by the allocator (see
//! `vklite-canvas::swapchain`).

use ash::vk;
use bitflags::bitflags;
use log::trace;
use vklite_core::object::{Object, ObjectStatus};

use crate::device::DeviceRef;
use crate::error::{Result, VkResultExt};

bitflags! {
    pub struct ImageUsage: u32 {
        const SAMPLED         = 0b0000_0001;
        const COLOR_ATTACHMENT = 0b0000_0010;
        const DEPTH_ATTACHMENT = 0b0000_0100;
        const STORAGE         = 0b0000_1000;
    }
}

impl ImageUsage {
    pub fn to_vk(self) -> vk::ImageUsageFlags {
        let mut flags = vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST;
        if self.contains(ImageUsage::SAMPLED) {
            flags |= vk::ImageUsageFlags::SAMPLED;
        }
        if self.contains(ImageUsage::COLOR_ATTACHMENT) {
            flags |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
        }
        if self.contains(ImageUsage::DEPTH_ATTACHMENT) {
            flags |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
        }
        if self.contains(ImageUsage::STORAGE) {
            flags |= vk::ImageUsageFlags::STORAGE;
        }
        flags
    }
}

/// 1D/2D/3D, matching the `Tex` entity's `dims` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageDims {
    D1,
    D2,
    D3,
}

impl ImageDims {
    fn to_vk_type(self) -> vk::ImageType {
        match self {
            ImageDims::D1 => vk::ImageType::TYPE_1D,
            ImageDims::D2 => vk::ImageType::TYPE_2D,
            ImageDims::D3 => vk::ImageType::TYPE_3D,
        }
    }

    fn to_vk_view_type(self) -> vk::ImageViewType {
        match self {
            ImageDims::D1 => vk::ImageViewType::TYPE_1D,
            ImageDims::D2 => vk::ImageViewType::TYPE_2D,
            ImageDims::D3 => vk::ImageViewType::TYPE_3D,
        }
    }
}

/// Owns a `vk::Image` + backing memory, format, tiling, current layout,
/// aspect mask, and (implicitly) the queue-family access set, which for the
/// single-physical-device model here is always "every family the device
/// opened" — queue-family ownership transfer is tracked per-barrier instead
/// of on the image itself.
pub struct Image {
    device: DeviceRef,
    vk_image: vk::Image,
    vk_memory: Option<vk::DeviceMemory>,
    vk_view: vk::ImageView,
    format: vk::Format,
    extent: (u32, u32, u32),
    dims: ImageDims,
    aspect: vk::ImageAspectFlags,
    layout: vk::ImageLayout,
    /// `true` for swapchain-owned images: the `vk::Image` handle is borrowed
    /// from the swapchain and must not be destroyed here.
    owns_image: bool,
    status: ObjectStatus,
}

unsafe impl Send for Image {}
unsafe impl Sync for Image {}

impl Object for Image {
    fn status(&self) -> ObjectStatus {
        self.status
    }
    fn set_status(&mut self, status: ObjectStatus) {
        self.status = status;
    }
}

impl Image {
    pub fn vk_image(&self) -> vk::Image {
        self.vk_image
    }

    pub fn vk_view(&self) -> vk::ImageView {
        self.vk_view
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn extent(&self) -> (u32, u32, u32) {
        self.extent
    }

    pub fn dims(&self) -> ImageDims {
        self.dims
    }

    pub fn aspect(&self) -> vk::ImageAspectFlags {
        self.aspect
    }

    pub fn layout(&self) -> vk::ImageLayout {
        self.layout
    }

    /// Backing device memory, if this image owns any (swapchain-borrowed
    /// images do not). Used by the screenshot facility to map a linear
    /// host-visible copy target.
    pub fn vk_memory(&self) -> Option<vk::DeviceMemory> {
        self.vk_memory
    }

    /// Row pitch and base offset of a linear-tiled image's single
    /// mip/layer, queried via `vkGetImageSubresourceLayout`. Only
    /// meaningful for images created with `ImageBuilder::linear()`.
    pub fn subresource_layout(&self) -> vk::SubresourceLayout {
        let subresource = vk::ImageSubresource {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            array_layer: 0,
        };
        unsafe {
            self.device
                .vk_device()
                .get_image_subresource_layout(self.vk_image, subresource)
        }
    }

    /// Records the image's layout after a barrier transitions it. Does not
    /// itself emit any commands — callers go through `cmd::BarrierBuilder`.
    pub fn set_layout(&mut self, layout: vk::ImageLayout) {
        self.layout = layout;
    }

    /// Wraps a swapchain-provided `vk::Image` (and a view created over it)
    /// without taking ownership of the image itself. Used by
    /// `vklite-canvas::swapchain` to present `Image`'s common interface over
    /// images it doesn't allocate.
    pub fn from_swapchain_image(
        device: DeviceRef,
        vk_image: vk::Image,
        format: vk::Format,
        extent: (u32, u32, u32),
    ) -> Result<Self> {
        let aspect = vk::ImageAspectFlags::COLOR;
        let view_info = vk::ImageViewCreateInfo::builder()
            .image(vk_image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        let vk_view = unsafe { device.vk_device().create_image_view(&view_info, None) }.vk()?;
        Ok(Image {
            device,
            vk_image,
            vk_memory: None,
            vk_view,
            format,
            extent,
            dims: ImageDims::D2,
            aspect,
            layout: vk::ImageLayout::UNDEFINED,
            owns_image: false,
            status: ObjectStatus::Created,
        })
    }

    pub fn destroy(&mut self) {
        if self.status == ObjectStatus::Destroyed {
            return;
        }
        unsafe {
            self.device.vk_device().destroy_image_view(self.vk_view, None);
            if self.owns_image {
                self.device.vk_device().destroy_image(self.vk_image, None);
            }
            if let Some(mem) = self.vk_memory {
                self.device.vk_device().free_memory(mem, None);
            }
        }
        self.status = ObjectStatus::Destroyed;
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn aspect_for_format(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D16_UNORM | vk::Format::D32_SFLOAT => vk::ImageAspectFlags::DEPTH,
        vk::Format::D16_UNORM_S8_UINT
        | vk::Format::D24_UNORM_S8_UINT
        | vk::Format::D32_SFLOAT_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ => vk::ImageAspectFlags::COLOR,
    }
}

/// Builder-then-`build()` for a device-owned `Image`, following the same
/// idiom as `Buffer::create`.
pub struct ImageBuilder {
    device: DeviceRef,
    format: vk::Format,
    extent: (u32, u32, u32),
    dims: ImageDims,
    usage: ImageUsage,
    tiling: vk::ImageTiling,
}

impl ImageBuilder {
    pub fn new(device: DeviceRef) -> Self {
        ImageBuilder {
            device,
            format: vk::Format::R8G8B8A8_UNORM,
            extent: (1, 1, 1),
            dims: ImageDims::D2,
            usage: ImageUsage::SAMPLED,
            tiling: vk::ImageTiling::OPTIMAL,
        }
    }

    pub fn format(mut self, format: vk::Format) -> Self {
        self.format = format;
        self
    }

    pub fn extent(mut self, w: u32, h: u32, d: u32) -> Self {
        self.extent = (w, h, d);
        self
    }

    pub fn dims(mut self, dims: ImageDims) -> Self {
        self.dims = dims;
        self
    }

    pub fn usage(mut self, usage: ImageUsage) -> Self {
        self.usage = usage;
        self
    }

    /// Linear tiling host-visible images are used by the screenshot
    /// facility; everything else wants optimal tiling.
    pub fn linear(mut self) -> Self {
        self.tiling = vk::ImageTiling::LINEAR;
        self
    }

    pub fn build(self) -> Result<Image> {
        let (w, h, d) = self.extent;
        let info = vk::ImageCreateInfo::builder()
            .image_type(self.dims.to_vk_type())
            .format(self.format)
            .extent(vk::Extent3D {
                width: w,
                height: h,
                depth: d,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(self.tiling)
            .usage(self.usage.to_vk())
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let vk_image = unsafe { self.device.vk_device().create_image(&info, None) }.vk()?;

        let reqs = unsafe { self.device.vk_device().get_image_memory_requirements(vk_image) };
        let host_visible = self.tiling == vk::ImageTiling::LINEAR;
        let mem_props = unsafe {
            self.device
                .instance()
                .get_physical_device_memory_properties(self.device.phys_device())
        };
        let want = if host_visible {
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
        } else {
            vk::MemoryPropertyFlags::DEVICE_LOCAL
        };
        let mem_type = (0..mem_props.memory_type_count)
            .find(|&i| {
                reqs.memory_type_bits & (1 << i) != 0
                    && mem_props.memory_types[i as usize].property_flags.contains(want)
            })
            .ok_or(vklite_core::GfxError::Oom)?;
        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(reqs.size)
            .memory_type_index(mem_type);
        let vk_memory = unsafe { self.device.vk_device().allocate_memory(&alloc_info, None) }.vk()?;
        unsafe {
            self.device
                .vk_device()
                .bind_image_memory(vk_image, vk_memory, 0)
        }
        .vk()?;

        let aspect = aspect_for_format(self.format);
        let view_info = vk::ImageViewCreateInfo::builder()
            .image(vk_image)
            .view_type(self.dims.to_vk_view_type())
            .format(self.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        let vk_view = unsafe { self.device.vk_device().create_image_view(&view_info, None) }.vk()?;

        trace!("created image {:?} {:?}", self.extent, self.format);
        Ok(Image {
            device: self.device,
            vk_image,
            vk_memory: Some(vk_memory),
            vk_view,
            format: self.format,
            extent: self.extent,
            dims: self.dims,
            aspect,
            layout: vk::ImageLayout::UNDEFINED,
            owns_image: true,
            status: ObjectStatus::Created,
        })
    }
}

/// Min/mag filter + per-axis address mode.
pub struct SamplerBuilder {
    device: DeviceRef,
    min_filter: vk::Filter,
    mag_filter: vk::Filter,
    address_u: vk::SamplerAddressMode,
    address_v: vk::SamplerAddressMode,
    address_w: vk::SamplerAddressMode,
}

impl SamplerBuilder {
    pub fn new(device: DeviceRef) -> Self {
        SamplerBuilder {
            device,
            min_filter: vk::Filter::LINEAR,
            mag_filter: vk::Filter::LINEAR,
            address_u: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            address_v: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            address_w: vk::SamplerAddressMode::CLAMP_TO_EDGE,
        }
    }

    pub fn filter(mut self, min: vk::Filter, mag: vk::Filter) -> Self {
        self.min_filter = min;
        self.mag_filter = mag;
        self
    }

    pub fn address_mode(mut self, u: vk::SamplerAddressMode, v: vk::SamplerAddressMode, w: vk::SamplerAddressMode) -> Self {
        self.address_u = u;
        self.address_v = v;
        self.address_w = w;
        self
    }

    pub fn build(self) -> Result<Sampler> {
        let info = vk::SamplerCreateInfo::builder()
            .min_filter(self.min_filter)
            .mag_filter(self.mag_filter)
            .address_mode_u(self.address_u)
            .address_mode_v(self.address_v)
            .address_mode_w(self.address_w)
            .max_lod(vk::LOD_CLAMP_NONE);
        let vk_sampler = unsafe { self.device.vk_device().create_sampler(&info, None) }.vk()?;
        Ok(Sampler {
            device: self.device,
            vk_sampler,
            status: ObjectStatus::Created,
        })
    }
}

pub struct Sampler {
    device: DeviceRef,
    vk_sampler: vk::Sampler,
    status: ObjectStatus,
}

unsafe impl Send for Sampler {}
unsafe impl Sync for Sampler {}

impl Object for Sampler {
    fn status(&self) -> ObjectStatus {
        self.status
    }
    fn set_status(&mut self, status: ObjectStatus) {
        self.status = status;
    }
}

impl Sampler {
    pub fn vk_sampler(&self) -> vk::Sampler {
        self.vk_sampler
    }

    pub fn destroy(&mut self) {
        if self.status == ObjectStatus::Destroyed {
            return;
        }
        unsafe {
            self.device.vk_device().destroy_sampler(self.vk_sampler, None);
        }
        self.status = ObjectStatus::Destroyed;
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aspect_for_depth_formats() {
        assert_eq!(aspect_for_format(vk::Format::D32_SFLOAT), vk::ImageAspectFlags::DEPTH);
        assert_eq!(
            aspect_for_format(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(aspect_for_format(vk::Format::R8G8B8A8_UNORM), vk::ImageAspectFlags::COLOR);
    }
}
