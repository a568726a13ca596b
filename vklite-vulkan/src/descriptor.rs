//! C4/C5 (descriptor half): the descriptor slot set, its layout, and
//! `Bindings` — an instance of a slot set with concrete resource
//! references. Grounded on `zangfx_vulkan::device`'s `update_arg_tables`
//! descriptor-write batching (`ArrayVec` + flush), translated from the
//! argument-table abstraction into a direct descriptor-set wrapper since
//! this crate targets Vulkan only.

use arrayvec::ArrayVec;
use ash::vk;
use vklite_core::object::{Object, ObjectStatus};

use crate::buffer::{Buffer, BufferRegions};
use crate::device::DeviceRef;
use crate::error::{Result, VkResultExt};
use crate::image::{Image, Sampler};
use crate::limits::DeviceCaps;

/// Maximum descriptor writes flushed in one `vkUpdateDescriptorSets` call,
/// matching the `ArrayVec<[vk::WriteDescriptorSet; 256]>` batching size used
/// by the teacher's `update_arg_tables`.
const MAX_BATCH_WRITES: usize = 256;

/// One slot in a descriptor slot set: its binding index, descriptor type,
/// and — for a dynamic UBO slot — the item size used to derive the
/// device-aligned stride.
#[derive(Debug, Clone, Copy)]
pub struct SlotDesc {
    pub binding: u32,
    pub ty: vk::DescriptorType,
    pub dynamic_item_size: Option<vk::DeviceSize>,
    pub stage_flags: vk::ShaderStageFlags,
}

/// An ordered list of slots, shared by every `Bindings` instance created
/// from it. Computes each dynamic slot's aligned stride from the device's
/// `minUniformBufferOffsetAlignment` at construction time.
pub struct DescriptorSlotSet {
    device: DeviceRef,
    slots: Vec<SlotDesc>,
    dynamic_alignments: Vec<Option<vk::DeviceSize>>,
    vk_layout: vk::DescriptorSetLayout,
}

impl DescriptorSlotSet {
    pub fn build(device: DeviceRef, slots: Vec<SlotDesc>) -> Result<Self> {
        let bindings: Vec<vk::DescriptorSetLayoutBinding> = slots
            .iter()
            .map(|s| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(s.binding)
                    .descriptor_type(s.ty)
                    .descriptor_count(1)
                    .stage_flags(s.stage_flags)
                    .build()
            })
            .collect();
        let info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
        let vk_layout = unsafe { device.vk_device().create_descriptor_set_layout(&info, None) }.vk()?;

        let align = device.caps().uniform_buffer_align;
        let dynamic_alignments = slots
            .iter()
            .map(|s| s.dynamic_item_size.map(|size| DeviceCaps::align_up(align, size)))
            .collect();

        Ok(DescriptorSlotSet {
            device,
            slots,
            dynamic_alignments,
            vk_layout,
        })
    }

    pub fn slots(&self) -> &[SlotDesc] {
        &self.slots
    }

    pub fn vk_layout(&self) -> vk::DescriptorSetLayout {
        self.vk_layout
    }

    /// The device-aligned stride of dynamic slot `slot_idx`, or `None` if
    /// that slot isn't a dynamic UBO.
    pub fn dynamic_alignment(&self, slot_idx: usize) -> Option<vk::DeviceSize> {
        self.dynamic_alignments[slot_idx]
    }

    pub fn has_dynamic_slots(&self) -> bool {
        self.dynamic_alignments.iter().any(Option::is_some)
    }
}

impl Drop for DescriptorSlotSet {
    fn drop(&mut self) {
        unsafe {
            self.device
                .vk_device()
                .destroy_descriptor_set_layout(self.vk_layout, None);
        }
    }
}

/// A concrete resource bound to one slot of one `dset` (one per
/// swapchain image when `dset_count > 1`).
#[derive(Clone, Copy)]
pub enum Resource<'a> {
    Buffer {
        buffer: &'a Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    },
    Texture {
        image: &'a Image,
        sampler: &'a Sampler,
    },
}

/// An instantiation of a `DescriptorSlotSet` with concrete resources bound,
/// one `vk::DescriptorSet` per swapchain image when the set has more than
/// one. Status transitions to `NeedUpdate` whenever a slot is reassigned;
/// `update()` re-invokes the whole descriptor-write batch and clears it.
pub struct Bindings<'slots> {
    device: DeviceRef,
    slot_set: &'slots DescriptorSlotSet,
    vk_sets: Vec<vk::DescriptorSet>,
    /// Pending (dset index, slot index) assignments waiting on `update()`.
    pending: Vec<(usize, usize)>,
    status: ObjectStatus,
}

unsafe impl<'slots> Send for Bindings<'slots> {}
unsafe impl<'slots> Sync for Bindings<'slots> {}

impl<'slots> Object for Bindings<'slots> {
    fn status(&self) -> ObjectStatus {
        self.status
    }
    fn set_status(&mut self, status: ObjectStatus) {
        self.status = status;
    }
}

impl<'slots> Bindings<'slots> {
    pub fn create(device: DeviceRef, slot_set: &'slots DescriptorSlotSet, dset_count: usize) -> Result<Self> {
        let layouts = vec![slot_set.vk_layout(); dset_count];
        let info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(device.descriptor_pool())
            .set_layouts(&layouts);
        let vk_sets = unsafe { device.vk_device().allocate_descriptor_sets(&info) }.vk()?;
        Ok(Bindings {
            device,
            slot_set,
            vk_sets,
            pending: Vec::new(),
            status: ObjectStatus::NeedUpdate,
        })
    }

    pub fn dset_count(&self) -> usize {
        self.vk_sets.len()
    }

    pub fn vk_set(&self, dset_idx: usize) -> vk::DescriptorSet {
        self.vk_sets[dset_idx]
    }

    /// Records that `slot_idx` of `dset_idx` has a resource assigned and
    /// should be rewritten by the next `update()`.
    pub fn mark_slot_dirty(&mut self, dset_idx: usize, slot_idx: usize) {
        self.pending.push((dset_idx, slot_idx));
        self.status = ObjectStatus::NeedUpdate;
    }

    /// `dynamic_allocate`/`dynamic_pointer` helpers: compute the byte
    /// offset of item `item_idx` within a dynamic slot's backing Dat.
    pub fn dynamic_offset(&self, slot_idx: usize, item_idx: u32) -> vk::DeviceSize {
        let align = self
            .slot_set
            .dynamic_alignment(slot_idx)
            .expect("slot is not a dynamic UBO");
        align * item_idx as vk::DeviceSize
    }

    /// Applies every pending slot write across all `dset_count` descriptor
    /// sets in one batched `vkUpdateDescriptorSets` call (chunked at
    /// `MAX_BATCH_WRITES`, mirroring the teacher's flush-on-overflow
    /// pattern), then clears `pending` and transitions out of NeedUpdate.
    pub fn update(&mut self, resources: &[(usize, usize, Resource)]) {
        let mut writes: ArrayVec<vk::WriteDescriptorSet, MAX_BATCH_WRITES> = ArrayVec::new();
        let mut buf_infos: Vec<vk::DescriptorBufferInfo> = Vec::with_capacity(resources.len());
        let mut img_infos: Vec<vk::DescriptorImageInfo> = Vec::with_capacity(resources.len());

        for &(dset_idx, slot_idx, resource) in resources {
            let slot = self.slot_set.slots[slot_idx];
            let vk_set = self.vk_sets[dset_idx];
            match resource {
                Resource::Buffer { buffer, offset, range } => {
                    buf_infos.push(vk::DescriptorBufferInfo {
                        buffer: buffer.vk_buffer(),
                        offset,
                        range,
                    });
                    let info_ref = buf_infos.last().unwrap();
                    writes.push(
                        vk::WriteDescriptorSet::builder()
                            .dst_set(vk_set)
                            .dst_binding(slot.binding)
                            .descriptor_type(slot.ty)
                            .buffer_info(std::slice::from_ref(info_ref))
                            .build(),
                    );
                }
                Resource::Texture { image, sampler } => {
                    img_infos.push(vk::DescriptorImageInfo {
                        sampler: sampler.vk_sampler(),
                        image_view: image.vk_view(),
                        image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    });
                    let info_ref = img_infos.last().unwrap();
                    writes.push(
                        vk::WriteDescriptorSet::builder()
                            .dst_set(vk_set)
                            .dst_binding(slot.binding)
                            .descriptor_type(slot.ty)
                            .image_info(std::slice::from_ref(info_ref))
                            .build(),
                    );
                }
            }
            if writes.is_full() {
                unsafe { self.device.vk_device().update_descriptor_sets(&writes, &[]) };
                writes.clear();
                buf_infos.clear();
                img_infos.clear();
            }
        }
        if !writes.is_empty() {
            unsafe { self.device.vk_device().update_descriptor_sets(&writes, &[]) };
        }

        self.pending.clear();
        self.status = ObjectStatus::Created;
    }
}
