//! C4 (buffer half): `Buffer` and `BufferRegions`, grounded on
//! `zangfx_vulkan::buffer::{BufferBuilder, Buffer}`.

use ash::vk;
use bitflags::bitflags;
use log::trace;
use vklite_core::object::{Object, ObjectStatus};

use crate::device::DeviceRef;
use crate::error::{Result, VkResultExt};

bitflags! {
    /// Declares what a buffer may be used for; mirrors the teacher's
    /// `base::BufferUsage` flag set, translated directly into
    /// `vk::BufferUsageFlags` rather than through an intermediate
    /// `ngsenumflags` bitset.
    pub struct BufferUsage: u32 {
        const VERTEX       = 0b0000_0001;
        const INDEX        = 0b0000_0010;
        const UNIFORM      = 0b0000_0100;
        const STORAGE      = 0b0000_1000;
        const STAGING      = 0b0001_0000;
        const MAPPABLE     = 0b0010_0000;
        const INDIRECT     = 0b0100_0000;
    }
}

impl BufferUsage {
    pub fn to_vk(self) -> vk::BufferUsageFlags {
        let mut flags = vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST;
        if self.contains(BufferUsage::VERTEX) {
            flags |= vk::BufferUsageFlags::VERTEX_BUFFER;
        }
        if self.contains(BufferUsage::INDEX) {
            flags |= vk::BufferUsageFlags::INDEX_BUFFER;
        }
        if self.contains(BufferUsage::UNIFORM) {
            flags |= vk::BufferUsageFlags::UNIFORM_BUFFER;
        }
        if self.contains(BufferUsage::STORAGE) {
            flags |= vk::BufferUsageFlags::STORAGE_BUFFER;
        }
        if self.contains(BufferUsage::INDIRECT) {
            flags |= vk::BufferUsageFlags::INDIRECT_BUFFER;
        }
        flags
    }

    pub fn is_mappable(self) -> bool {
        self.contains(BufferUsage::MAPPABLE) || self.contains(BufferUsage::STAGING)
    }
}

/// A device-memory-backed buffer with a bump allocation cursor. Owns its
/// `vk::Buffer` and `vk::DeviceMemory`; mappable buffers keep a permanent
/// host pointer for their lifetime.
pub struct Buffer {
    device: DeviceRef,
    vk_buffer: vk::Buffer,
    vk_memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    usage: BufferUsage,
    mapped_ptr: Option<*mut u8>,
    /// Bump cursor: the next free byte offset. Invariant: always aligned
    /// to whatever alignment the last allocation required.
    pub(crate) allocated_size: vk::DeviceSize,
    status: ObjectStatus,
}

unsafe impl Send for Buffer {}
unsafe impl Sync for Buffer {}

impl Object for Buffer {
    fn status(&self) -> ObjectStatus {
        self.status
    }
    fn set_status(&mut self, status: ObjectStatus) {
        self.status = status;
    }
}

impl Buffer {
    pub fn vk_buffer(&self) -> vk::Buffer {
        self.vk_buffer
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    /// Host pointer for the buffer's full extent, if it was created
    /// mappable. Valid for the buffer's lifetime.
    pub fn mapped_ptr(&self) -> Option<*mut u8> {
        self.mapped_ptr
    }

    fn find_memory_type(
        device: &DeviceRef,
        type_bits: u32,
        host_visible: bool,
    ) -> Result<u32> {
        let mem_props = unsafe {
            device
                .instance()
                .get_physical_device_memory_properties(device.phys_device())
        };
        let want = if host_visible {
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
        } else {
            vk::MemoryPropertyFlags::DEVICE_LOCAL
        };
        (0..mem_props.memory_type_count)
            .find(|&i| {
                type_bits & (1 << i) != 0
                    && mem_props.memory_types[i as usize].property_flags.contains(want)
            })
            .ok_or(vklite_core::GfxError::Oom)
    }

    pub fn create(device: DeviceRef, size: vk::DeviceSize, usage: BufferUsage) -> Result<Self> {
        let info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage.to_vk())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let vk_buffer = unsafe { device.vk_device().create_buffer(&info, None) }.vk()?;

        let reqs = unsafe { device.vk_device().get_buffer_memory_requirements(vk_buffer) };
        let host_visible = usage.is_mappable();
        let mem_type = Self::find_memory_type(&device, reqs.memory_type_bits, host_visible)?;
        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(reqs.size)
            .memory_type_index(mem_type);
        let vk_memory = unsafe { device.vk_device().allocate_memory(&alloc_info, None) }
            .vk()
            .map_err(|e| {
                unsafe { device.vk_device().destroy_buffer(vk_buffer, None) };
                e
            })?;
        unsafe {
            device
                .vk_device()
                .bind_buffer_memory(vk_buffer, vk_memory, 0)
        }
        .vk()?;

        let mapped_ptr = if host_visible {
            let ptr = unsafe {
                device
                    .vk_device()
                    .map_memory(vk_memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
            }
            .vk()?;
            Some(ptr as *mut u8)
        } else {
            None
        };

        trace!("created buffer of size {} ({:?})", size, usage);
        Ok(Buffer {
            device,
            vk_buffer,
            vk_memory,
            size,
            usage,
            mapped_ptr,
            allocated_size: 0,
            status: ObjectStatus::Created,
        })
    }

    pub fn destroy(&mut self) {
        if self.status == ObjectStatus::Destroyed {
            return;
        }
        unsafe {
            if self.mapped_ptr.is_some() {
                self.device.vk_device().unmap_memory(self.vk_memory);
            }
            self.device.vk_device().destroy_buffer(self.vk_buffer, None);
            self.device.vk_device().free_memory(self.vk_memory, None);
        }
        self.status = ObjectStatus::Destroyed;
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// A view of `count` same-sized regions within a `Buffer`, used both for
/// plain sub-allocations and for the one-region-per-swapchain-image
/// pattern. Invariant: `offsets[i+1] - offsets[i] == aligned_size`.
#[derive(Debug, Clone)]
pub struct BufferRegions {
    pub offsets: Vec<vk::DeviceSize>,
    pub item_size: vk::DeviceSize,
    pub aligned_size: vk::DeviceSize,
    pub alignment: vk::DeviceSize,
}

impl BufferRegions {
    pub fn new(base_offset: vk::DeviceSize, item_size: vk::DeviceSize, count: usize, alignment: vk::DeviceSize) -> Self {
        let aligned_size = crate::limits::DeviceCaps::align_up(alignment, item_size);
        let offsets = (0..count)
            .map(|i| base_offset + i as vk::DeviceSize * aligned_size)
            .collect();
        BufferRegions {
            offsets,
            item_size,
            aligned_size,
            alignment,
        }
    }

    pub fn count(&self) -> usize {
        self.offsets.len()
    }

    pub fn offset(&self, index: usize) -> vk::DeviceSize {
        self.offsets[index]
    }

    /// Total span covered by all regions, from the first offset through
    /// the end of the last.
    pub fn span(&self) -> vk::DeviceSize {
        self.offsets
            .last()
            .map(|&last| last + self.aligned_size - self.offsets[0])
            .unwrap_or(0)
    }

    /// Only count==1 is supported for resizing in place; anything else is
    /// the documented-unsupported case from the Open Questions.
    pub fn resize(&mut self, new_item_size: vk::DeviceSize) -> Result<()> {
        if self.offsets.len() != 1 {
            return Err(vklite_core::GfxError::Unsupported(
                "buffer_regions_resize only supports count == 1",
            ));
        }
        self.item_size = new_item_size;
        self.aligned_size = crate::limits::DeviceCaps::align_up(self.alignment, new_item_size);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_respect_alignment() {
        let regions = BufferRegions::new(0, 17, 4, 256);
        for &off in &regions.offsets {
            assert_eq!(off % 256, 0);
        }
        assert_eq!(regions.aligned_size, 256);
    }

    #[test]
    fn resize_rejects_multi_region() {
        let mut regions = BufferRegions::new(0, 17, 3, 256);
        assert!(matches!(
            regions.resize(32),
            Err(vklite_core::GfxError::Unsupported(_))
        ));
    }

    #[test]
    fn resize_allows_single_region() {
        let mut regions = BufferRegions::new(0, 17, 1, 256);
        assert!(regions.resize(32).is_ok());
        assert_eq!(regions.item_size, 32);
    }
}
