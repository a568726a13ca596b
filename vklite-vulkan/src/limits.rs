//! Physical device capability querying and translation, grounded on the
//! teacher's `DeviceInfo::from_physical_device`.

use ash::vk;
use log::info;

/// Capabilities and limits of a selected physical device, translated into
/// the handful of fields the rest of the crate actually consults.
#[derive(Debug, Clone)]
pub struct DeviceCaps {
    pub uniform_buffer_align: u64,
    pub storage_buffer_align: u64,
    pub max_image_extent_2d: u32,
    pub max_num_viewports: u32,
    pub supports_depth_clamp: bool,
}

impl DeviceCaps {
    pub fn from_physical_device(
        instance: &ash::Instance,
        phys_device: vk::PhysicalDevice,
        enabled_features: &vk::PhysicalDeviceFeatures,
    ) -> Self {
        let props = unsafe { instance.get_physical_device_properties(phys_device) };
        let limits = &props.limits;
        let name = unsafe {
            std::ffi::CStr::from_ptr(props.device_name.as_ptr())
                .to_string_lossy()
                .into_owned()
        };
        info!(
            "selected physical device {:?} (uniform align {})",
            name, limits.min_uniform_buffer_offset_alignment
        );
        DeviceCaps {
            uniform_buffer_align: limits.min_uniform_buffer_offset_alignment,
            storage_buffer_align: limits.min_storage_buffer_offset_alignment,
            max_image_extent_2d: limits.max_image_dimension2d,
            max_num_viewports: limits.max_viewports,
            supports_depth_clamp: enabled_features.depth_clamp != vk::FALSE,
        }
    }

    /// Rounds `size` up to a multiple of `align` — used throughout the
    /// buffer arena and the dynamic-UBO offset computation.
    pub fn align_up(align: u64, size: u64) -> u64 {
        if align == 0 {
            size
        } else {
            (size + align - 1) / align * align
        }
    }
}

/// Queue family roles the device is asked to open. Queue 0 always supports
/// transfers, per the logical-queue convention in the data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueRole {
    Transfer,
    Compute,
    Render,
    Present,
}

pub fn pick_queue_family(
    families: &[vk::QueueFamilyProperties],
    role: QueueRole,
) -> Option<u32> {
    let want = match role {
        QueueRole::Transfer => vk::QueueFlags::TRANSFER,
        QueueRole::Compute => vk::QueueFlags::COMPUTE,
        QueueRole::Render => vk::QueueFlags::GRAPHICS,
        // Present-capability is queried separately via the surface loader;
        // here we just prefer a graphics-capable family as a default.
        QueueRole::Present => vk::QueueFlags::GRAPHICS,
    };
    families
        .iter()
        .position(|f| f.queue_flags.contains(want))
        .map(|i| i as u32)
}
