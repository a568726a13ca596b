use ash::vk;
use vklite_core::GfxError;

pub use vklite_core::Result;

/// Translates a raw Vulkan result into the shared error taxonomy. Every
/// fallible `ash` call in this crate is routed through this so callers see
/// the same `GfxError` kinds regardless of which Vulkan entry point failed.
pub fn translate_vk_result(result: vk::Result) -> GfxError {
    match result {
        vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
            GfxError::Oom
        }
        vk::Result::ERROR_DEVICE_LOST | vk::Result::ERROR_INITIALIZATION_FAILED => {
            GfxError::InitFailure(format!("{:?}", result))
        }
        vk::Result::ERROR_OUT_OF_DATE_KHR => GfxError::SwapchainOutOfDate,
        vk::Result::ERROR_SURFACE_LOST_KHR | vk::Result::ERROR_FULL_SCREEN_EXCLUSIVE_MODE_LOST_EXT => {
            GfxError::SwapchainInvalid
        }
        other => GfxError::TransferFailure(format!("{:?}", other)),
    }
}

pub(crate) trait VkResultExt<T> {
    fn vk(self) -> Result<T>;
}

impl<T> VkResultExt<T> for std::result::Result<T, vk::Result> {
    fn vk(self) -> Result<T> {
        self.map_err(translate_vk_result)
    }
}
