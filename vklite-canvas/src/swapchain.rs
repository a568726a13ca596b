//! C9: the swapchain state machine. States `{None, Created, NeedRecreate,
//! Invalid}`. Grounded on `canvas_utils_old.h`'s acquire/present/recreate
//! sequence (no surviving teacher swapchain code — window-system glue is
//! out of scope for the teacher's backend-agnostic `core`/`backend_vulkan`
//! split, exactly where a capability-injected backend plugs in per the
//! `DESIGN NOTES` "Backend glue via function-pointer table" entry).

use ash::extensions::khr::{Surface as SurfaceLoader, Swapchain as SwapchainLoader};
use ash::vk;

use vklite_vulkan::{DeviceRef, GfxError, Image, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapchainState {
    None,
    Created,
    NeedRecreate,
    Invalid,
}

pub struct AcquiredImage {
    pub img_idx: usize,
}

pub struct Swapchain {
    device: DeviceRef,
    surface_loader: SurfaceLoader,
    swapchain_loader: SwapchainLoader,
    surface: vk::SurfaceKHR,
    handle: vk::SwapchainKHR,
    images: Vec<Image>,
    format: vk::Format,
    extent: vk::Extent2D,
    state: SwapchainState,
}

impl Swapchain {
    /// Takes ownership of an already-created `vk::SurfaceKHR` (the canvas
    /// owns the window backend that produced it and destroys the surface
    /// itself — see `Canvas::drop`).
    pub fn new(device: DeviceRef, surface: vk::SurfaceKHR, width: u32, height: u32) -> Result<Self> {
        let surface_loader = SurfaceLoader::new(device.entry(), device.instance());
        let swapchain_loader = SwapchainLoader::new(device.instance(), device.vk_device());
        let mut swapchain = Swapchain {
            device,
            surface_loader,
            swapchain_loader,
            surface,
            handle: vk::SwapchainKHR::null(),
            images: Vec::new(),
            format: vk::Format::B8G8R8A8_UNORM,
            extent: vk::Extent2D { width, height },
            state: SwapchainState::None,
        };
        swapchain.create(width, height)?;
        Ok(swapchain)
    }

    pub fn state(&self) -> SwapchainState {
        self.state
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn image(&self, idx: usize) -> &Image {
        &self.images[idx]
    }

    fn create(&mut self, width: u32, height: u32) -> Result<()> {
        let phys_device = self.device.phys_device();
        let caps = unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(phys_device, self.surface)
        }
        .map_err(|e| GfxError::InitFailure(e.to_string()))?;
        let formats = unsafe {
            self.surface_loader
                .get_physical_device_surface_formats(phys_device, self.surface)
        }
        .map_err(|e| GfxError::InitFailure(e.to_string()))?;
        let chosen = formats
            .iter()
            .find(|f| f.format == vk::Format::B8G8R8A8_UNORM)
            .or_else(|| formats.first())
            .ok_or_else(|| GfxError::InitFailure("surface exposes no formats".into()))?;

        let extent = if caps.current_extent.width != u32::MAX {
            caps.current_extent
        } else {
            vk::Extent2D {
                width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
                height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
            }
        };

        let mut image_count = caps.min_image_count + 1;
        if caps.max_image_count > 0 {
            image_count = image_count.min(caps.max_image_count);
        }

        let info = vk::SwapchainCreateInfoKHR::builder()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(chosen.format)
            .image_color_space(chosen.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(vk::PresentModeKHR::FIFO)
            .clipped(true)
            .old_swapchain(self.handle);
        let handle = unsafe { self.swapchain_loader.create_swapchain(&info, None) }
            .map_err(|e| GfxError::InitFailure(e.to_string()))?;

        if self.handle != vk::SwapchainKHR::null() {
            unsafe { self.swapchain_loader.destroy_swapchain(self.handle, None) };
        }

        let vk_images = unsafe { self.swapchain_loader.get_swapchain_images(handle) }
            .map_err(|e| GfxError::InitFailure(e.to_string()))?;
        let images = vk_images
            .into_iter()
            .map(|img| {
                Image::from_swapchain_image(
                    self.device.clone(),
                    img,
                    chosen.format,
                    (extent.width, extent.height, 1),
                )
            })
            .collect::<Result<Vec<_>>>()?;

        self.handle = handle;
        self.format = chosen.format;
        self.extent = extent;
        self.images = images;
        self.state = SwapchainState::Created;
        Ok(())
    }

    /// Wait device idle; destroy image views and framebuffers (owned by the
    /// caller — the canvas is responsible for dropping its `Framebuffers`
    /// before calling this); query the new surface extent; recreate.
    pub fn recreate(&mut self, width: u32, height: u32) -> Result<()> {
        self.device.wait_device()?;
        self.images.clear();
        self.create(width, height)
    }

    pub fn acquire(&mut self, signal: vk::Semaphore) -> Result<Option<AcquiredImage>> {
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.handle,
                u64::MAX,
                signal,
                vk::Fence::null(),
            )
        };
        match result {
            Ok((img_idx, suboptimal)) => {
                if suboptimal {
                    self.state = SwapchainState::NeedRecreate;
                }
                Ok(Some(AcquiredImage {
                    img_idx: img_idx as usize,
                }))
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.state = SwapchainState::NeedRecreate;
                Ok(None)
            }
            Err(_) => {
                self.state = SwapchainState::Invalid;
                Ok(None)
            }
        }
    }

    pub fn present(&mut self, wait: vk::Semaphore, queue: vk::Queue, img_idx: usize) -> Result<()> {
        let img_idx = img_idx as u32;
        let wait_sems = [wait];
        let swapchains = [self.handle];
        let indices = [img_idx];
        let info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_sems)
            .swapchains(&swapchains)
            .image_indices(&indices);
        match unsafe { self.swapchain_loader.queue_present(queue, &info) } {
            Ok(suboptimal) => {
                if suboptimal {
                    self.state = SwapchainState::NeedRecreate;
                }
                Ok(())
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.state = SwapchainState::NeedRecreate;
                Ok(())
            }
            Err(e) => {
                self.state = SwapchainState::Invalid;
                Err(GfxError::TransferFailure(e.to_string()))
            }
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.images.clear();
        unsafe {
            if self.handle != vk::SwapchainKHR::null() {
                self.swapchain_loader.destroy_swapchain(self.handle, None);
            }
            self.surface_loader.destroy_surface(self.surface, None);
        }
    }
}
