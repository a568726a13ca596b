//! C3: GPU device enumeration, logical device creation, and queue/command
//! pool bookkeeping. Grounded on `zangfx_vulkan::device` and `::limits`,
//! with the device-creation call sequence following `tfufuz1-NovaDE`'s
//! `compositor/renderer/vulkan/device.rs`.

use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::sync::Arc;

use ash::vk;
use log::info;
use parking_lot::Mutex;

use crate::error::{Result, VkResultExt};
use crate::limits::{pick_queue_family, DeviceCaps, QueueRole};

/// A logical queue as exposed to the rest of the crate: an index into the
/// device's queue table, the Vulkan queue handle, and the family it was
/// allocated from.
#[derive(Clone, Copy)]
pub struct QueueHandle {
    pub index: usize,
    pub family: u32,
    pub vk_queue: vk::Queue,
}

struct DeviceInner {
    entry: ash::Entry,
    instance: ash::Instance,
    phys_device: vk::PhysicalDevice,
    vk_device: ash::Device,
    caps: DeviceCaps,
    queues: Vec<QueueHandle>,
    command_pools: Mutex<HashMap<u32, vk::CommandPool>>,
    descriptor_pool: vk::DescriptorPool,
}

impl Drop for DeviceInner {
    fn drop(&mut self) {
        unsafe {
            self.vk_device.destroy_descriptor_pool(self.descriptor_pool, None);
            for (_, pool) in self.command_pools.lock().drain() {
                self.vk_device.destroy_command_pool(pool, None);
            }
            self.vk_device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

/// Cheap-to-clone handle to an opened device; every resource type in this
/// crate holds one of these rather than borrowing a `&Device` directly, the
/// same ownership shape `zangfx_vulkan::device::DeviceRef` uses.
#[derive(Clone)]
pub struct DeviceRef(Arc<DeviceInner>);

impl DeviceRef {
    pub fn vk_device(&self) -> &ash::Device {
        &self.0.vk_device
    }

    pub fn entry(&self) -> &ash::Entry {
        &self.0.entry
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.0.instance
    }

    pub fn phys_device(&self) -> vk::PhysicalDevice {
        self.0.phys_device
    }

    pub fn caps(&self) -> &DeviceCaps {
        &self.0.caps
    }

    pub fn queue(&self, index: usize) -> QueueHandle {
        self.0.queues[index]
    }

    pub fn descriptor_pool(&self) -> vk::DescriptorPool {
        self.0.descriptor_pool
    }

    /// Returns the command pool for `family`, creating it on first use.
    /// Command pools are single-threaded by convention (main thread only);
    /// the mutex here only protects the lazy-creation bookkeeping.
    pub fn command_pool(&self, family: u32) -> Result<vk::CommandPool> {
        let mut pools = self.0.command_pools.lock();
        if let Some(&pool) = pools.get(&family) {
            return Ok(pool);
        }
        let info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let pool = unsafe { self.0.vk_device.create_command_pool(&info, None) }.vk()?;
        pools.insert(family, pool);
        Ok(pool)
    }

    pub fn wait_queue(&self, index: usize) -> Result<()> {
        unsafe { self.0.vk_device.queue_wait_idle(self.0.queues[index].vk_queue) }.vk()
    }

    pub fn wait_device(&self) -> Result<()> {
        unsafe { self.0.vk_device.device_wait_idle() }.vk()
    }
}

/// Builds a `DeviceRef` from a requested set of queue roles and enabled
/// features. Mirrors the builder-then-`build()` idiom used for every other
/// resource type in the crate.
pub struct DeviceBuilder {
    app_name: String,
    queue_roles: Vec<QueueRole>,
    enabled_features: vk::PhysicalDeviceFeatures,
    extension_names: Vec<CString>,
    instance_extension_names: Vec<CString>,
}

impl DeviceBuilder {
    pub fn new(app_name: impl Into<String>) -> Self {
        DeviceBuilder {
            app_name: app_name.into(),
            queue_roles: vec![QueueRole::Transfer],
            enabled_features: vk::PhysicalDeviceFeatures::default(),
            extension_names: Vec::new(),
            instance_extension_names: Vec::new(),
        }
    }

    pub fn queue(mut self, role: QueueRole) -> Self {
        self.queue_roles.push(role);
        self
    }

    pub fn device_extension(mut self, name: &CStr) -> Self {
        self.extension_names.push(name.to_owned());
        self
    }

    /// Requests an instance-level extension, e.g. the platform surface
    /// extensions `ash_window::enumerate_required_extensions` reports for a
    /// window the canvas crate wants to present to.
    pub fn instance_extension(mut self, name: &CStr) -> Self {
        self.instance_extension_names.push(name.to_owned());
        self
    }

    /// Convenience for a batch of raw extension-name pointers as returned by
    /// `ash_window::enumerate_required_extensions`.
    pub fn instance_extensions_raw(mut self, names: &[*const std::os::raw::c_char]) -> Self {
        for &ptr in names {
            let owned = unsafe { CStr::from_ptr(ptr) }.to_owned();
            self.instance_extension_names.push(owned);
        }
        self
    }

    pub fn build(self) -> Result<DeviceRef> {
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| vklite_core::GfxError::InitFailure(e.to_string()))?;

        let app_name = std::ffi::CString::new(self.app_name.clone()).unwrap();
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(0)
            .engine_name(CStr::from_bytes_with_nul(b"vklite\0").unwrap())
            .api_version(vk::API_VERSION_1_1);
        let instance_extension_ptrs: Vec<*const i8> =
            self.instance_extension_names.iter().map(|s| s.as_ptr()).collect();
        let instance_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&instance_extension_ptrs);
        let instance = unsafe { entry.create_instance(&instance_info, None) }.vk()?;

        let phys_devices = unsafe { instance.enumerate_physical_devices() }.vk()?;
        let phys_device = *phys_devices
            .first()
            .ok_or_else(|| vklite_core::GfxError::InitFailure("no physical device".into()))?;

        let families =
            unsafe { instance.get_physical_device_queue_family_properties(phys_device) };

        // Deduplicate requested roles onto concrete families.
        let mut family_for_role = HashMap::new();
        for &role in &self.queue_roles {
            let family = pick_queue_family(&families, role).ok_or_else(|| {
                vklite_core::GfxError::InitFailure(format!("no queue family for {:?}", role))
            })?;
            family_for_role.insert(role, family);
        }

        let mut family_counts: HashMap<u32, u32> = HashMap::new();
        for &family in family_for_role.values() {
            *family_counts.entry(family).or_insert(0) += 1;
        }
        let priorities = [1.0f32; 8];
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = family_counts
            .keys()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities[..1])
                    .build()
            })
            .collect();

        let extension_ptrs: Vec<*const i8> =
            self.extension_names.iter().map(|s| s.as_ptr()).collect();
        let device_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_features(&self.enabled_features)
            .enabled_extension_names(&extension_ptrs);
        let vk_device =
            unsafe { instance.create_device(phys_device, &device_info, None) }.vk()?;

        let queues: Vec<QueueHandle> = self
            .queue_roles
            .iter()
            .enumerate()
            .map(|(index, role)| {
                let family = family_for_role[role];
                let vk_queue = unsafe { vk_device.get_device_queue(family, 0) };
                QueueHandle {
                    index,
                    family,
                    vk_queue,
                }
            })
            .collect();

        let caps = DeviceCaps::from_physical_device(&instance, phys_device, &self.enabled_features);

        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: 256,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
                descriptor_count: 256,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_BUFFER,
                descriptor_count: 128,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: 256,
            },
        ];
        let descriptor_pool_info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(&pool_sizes)
            .max_sets(128)
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET);
        let descriptor_pool =
            unsafe { vk_device.create_descriptor_pool(&descriptor_pool_info, None) }.vk()?;

        info!(
            "opened device with {} logical queue(s) across {} family/ies",
            queues.len(),
            family_counts.len()
        );

        Ok(DeviceRef(Arc::new(DeviceInner {
            entry,
            instance,
            phys_device,
            vk_device,
            caps,
            queues,
            command_pools: Mutex::new(HashMap::new()),
            descriptor_pool,
        })))
    }
}
