//! C4 (shader half): `ShaderModule`, loaded from pre-compiled SPIR-V byte
//! blobs read from a filesystem path, per spec §6 ("the engine reads the
//! bytes, creates a shader module, and discards the host buffer"). Grounded
//! on `zangfx_vulkan::shader::LibraryBuilder`.

use std::path::Path;

use ash::vk;
use vklite_core::object::{Object, ObjectStatus};

use crate::device::DeviceRef;
use crate::error::{Result, VkResultExt};

pub struct ShaderModule {
    device: DeviceRef,
    vk_module: vk::ShaderModule,
    status: ObjectStatus,
}

unsafe impl Send for ShaderModule {}
unsafe impl Sync for ShaderModule {}

impl Object for ShaderModule {
    fn status(&self) -> ObjectStatus {
        self.status
    }
    fn set_status(&mut self, status: ObjectStatus) {
        self.status = status;
    }
}

impl ShaderModule {
    pub fn vk_module(&self) -> vk::ShaderModule {
        self.vk_module
    }

    /// Reads the SPIR-V bytes at `path`, creates the module, and drops the
    /// host buffer — the path itself is not retained.
    pub fn from_file(device: DeviceRef, path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref()).map_err(|e| {
            vklite_core::GfxError::InitFailure(format!(
                "failed to read shader {:?}: {}",
                path.as_ref(),
                e
            ))
        })?;
        Self::from_spirv_bytes(device, &bytes)
    }

    pub fn from_spirv_bytes(device: DeviceRef, bytes: &[u8]) -> Result<Self> {
        if bytes.len() % 4 != 0 {
            return Err(vklite_core::GfxError::InitFailure(
                "SPIR-V blob length must be a multiple of 4".into(),
            ));
        }
        let words = ash::util::read_spv(&mut std::io::Cursor::new(bytes)).map_err(|e| {
            vklite_core::GfxError::InitFailure(format!("invalid SPIR-V: {}", e))
        })?;
        let info = vk::ShaderModuleCreateInfo::builder().code(&words);
        let vk_module = unsafe { device.vk_device().create_shader_module(&info, None) }.vk()?;
        Ok(ShaderModule {
            device,
            vk_module,
            status: ObjectStatus::Created,
        })
    }

    pub fn destroy(&mut self) {
        if self.status == ObjectStatus::Destroyed {
            return;
        }
        unsafe {
            self.device.vk_device().destroy_shader_module(self.vk_module, None);
        }
        self.status = ObjectStatus::Destroyed;
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        self.destroy();
    }
}
