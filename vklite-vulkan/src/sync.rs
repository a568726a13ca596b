//! C4 (sync half): fence and semaphore sets. Fences are created signaled
//! (matching the data model's "fences are created signaled" invariant, so
//! the first frame's `wait_for_fences` never blocks); semaphores are
//! binary. Both are plain `N`-slot vectors rather than a pooled registry —
//! the canvas allocates exactly `MAX_FRAMES_IN_FLIGHT` of each up front.

use ash::vk;

use crate::device::DeviceRef;
use crate::error::{Result, VkResultExt};

pub struct FenceSet {
    device: DeviceRef,
    fences: Vec<vk::Fence>,
}

impl FenceSet {
    pub fn create(device: DeviceRef, count: usize) -> Result<Self> {
        let info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);
        let mut fences = Vec::with_capacity(count);
        for _ in 0..count {
            fences.push(unsafe { device.vk_device().create_fence(&info, None) }.vk()?);
        }
        Ok(FenceSet { device, fences })
    }

    pub fn get(&self, index: usize) -> vk::Fence {
        self.fences[index]
    }

    pub fn len(&self) -> usize {
        self.fences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fences.is_empty()
    }

    pub fn wait(&self, index: usize) -> Result<()> {
        unsafe {
            self.device
                .vk_device()
                .wait_for_fences(&[self.fences[index]], true, u64::MAX)
        }
        .vk()
    }

    pub fn reset(&self, index: usize) -> Result<()> {
        unsafe { self.device.vk_device().reset_fences(&[self.fences[index]]) }.vk()
    }
}

impl Drop for FenceSet {
    fn drop(&mut self) {
        unsafe {
            for &f in &self.fences {
                self.device.vk_device().destroy_fence(f, None);
            }
        }
    }
}

/// `N` binary semaphores, used for both `sem_img_available` and
/// `sem_render_finished` — each indexed by `cur_frame` rather than
/// `img_idx`.
pub struct SemaphoreSet {
    device: DeviceRef,
    semaphores: Vec<vk::Semaphore>,
}

impl SemaphoreSet {
    pub fn create(device: DeviceRef, count: usize) -> Result<Self> {
        let info = vk::SemaphoreCreateInfo::builder();
        let mut semaphores = Vec::with_capacity(count);
        for _ in 0..count {
            semaphores.push(unsafe { device.vk_device().create_semaphore(&info, None) }.vk()?);
        }
        Ok(SemaphoreSet { device, semaphores })
    }

    pub fn get(&self, index: usize) -> vk::Semaphore {
        self.semaphores[index]
    }

    pub fn len(&self) -> usize {
        self.semaphores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.semaphores.is_empty()
    }
}

impl Drop for SemaphoreSet {
    fn drop(&mut self) {
        unsafe {
            for &s in &self.semaphores {
                self.device.vk_device().destroy_semaphore(s, None);
            }
        }
    }
}
