//! C4.10: screenshot capture and autorun. No surviving teacher or
//! `original_source` file covers this directly (grepping `original_source`
//! for "screenshot"/"autorun" turns up nothing); built straight from
//! spec.md §4.10/§6, in the idiom of the rest of this crate: a
//! builder-ish one-shot operation over a linear, host-visible copy image,
//! plus a driver loop for the "record N frames then exit" autorun mode.

use ash::vk;
use log::info;

use vklite_vulkan::{
    CommandRecorder, DeviceRef, Image, ImageBuilder, ImageDims, ImageUsage, Result, Transfers,
};

use crate::canvas::Canvas;

/// `frame_count` frames are driven through `Canvas::frame`, then a
/// screenshot of the final frame is written to `screenshot_path` and the
/// canvas is stopped — the "record N frames and exit" driver named in
/// spec.md's autorun record.
pub struct AutorunConfig {
    pub frame_count: u64,
    pub screenshot_path: std::path::PathBuf,
}

/// Captures the current contents of swapchain image `img_idx` into a
/// freshly allocated, linear-tiled, host-visible copy, then maps it and
/// hands the caller back tightly packed RGBA8 rows (BGRA swapped to RGBA
/// when the swapchain's native format demands it).
pub struct Screenshot {
    device: DeviceRef,
    copy_image: Image,
    width: u32,
    height: u32,
    needs_bgra_swizzle: bool,
}

impl Screenshot {
    pub fn capture(
        device: DeviceRef,
        recorder_queue_family: u32,
        src: &Image,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let needs_bgra_swizzle = matches!(
            src.format(),
            vk::Format::B8G8R8A8_UNORM | vk::Format::B8G8R8A8_SRGB
        );

        let mut copy_image = ImageBuilder::new(device.clone())
            .format(vk::Format::R8G8B8A8_UNORM)
            .extent(width, height, 1)
            .dims(ImageDims::D2)
            .usage(ImageUsage::empty())
            .linear()
            .build()?;

        let recorder = CommandRecorder::create(device.clone(), recorder_queue_family, 1)?;
        recorder.begin(0)?;
        recorder.barrier(
            0,
            vklite_vulkan::BarrierBuilder::new().image(
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
                vk::AccessFlags::empty(),
                vk::AccessFlags::TRANSFER_WRITE,
                &copy_image,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::QUEUE_FAMILY_IGNORED,
                vk::QUEUE_FAMILY_IGNORED,
            ),
        );
        recorder.copy_image(0, src, &copy_image, (width, height, 1));
        recorder.barrier(
            0,
            vklite_vulkan::BarrierBuilder::new().image(
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::HOST,
                vk::AccessFlags::TRANSFER_WRITE,
                vk::AccessFlags::HOST_READ,
                &copy_image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::GENERAL,
                vk::QUEUE_FAMILY_IGNORED,
                vk::QUEUE_FAMILY_IGNORED,
            ),
        );
        recorder.end(0)?;

        let queue = device.queue(0);
        let cmd_buf = recorder.vk_buffer(0);
        let submit = vk::SubmitInfo::builder().command_buffers(std::slice::from_ref(&cmd_buf));
        unsafe { device.vk_device().queue_submit(queue.vk_queue, &[submit.build()], vk::Fence::null()) }
            .map_err(vklite_vulkan::translate_vk_result)?;
        unsafe { device.vk_device().queue_wait_idle(queue.vk_queue) }
            .map_err(vklite_vulkan::translate_vk_result)?;
        copy_image.set_layout(vk::ImageLayout::GENERAL);

        Ok(Screenshot {
            device,
            copy_image,
            width,
            height,
            needs_bgra_swizzle,
        })
    }

    /// Writes tightly packed RGB8 rows (alpha dropped) into `out`, which
    /// must be at least `width * height * 3` bytes.
    pub fn write_rgb8(&self, out: &mut [u8]) -> Result<()> {
        let expected = self.width as usize * self.height as usize * 3;
        if out.len() < expected {
            return Err(vklite_core::GfxError::Unsupported(
                "screenshot output buffer smaller than width*height*3",
            ));
        }
        let layout = self.copy_image.subresource_layout();
        let memory = self
            .copy_image
            .vk_memory()
            .ok_or(vklite_core::GfxError::ResourceInvalid)?;
        let ptr = unsafe {
            self.device
                .vk_device()
                .map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
        }
        .map_err(vklite_vulkan::translate_vk_result)?;

        unsafe {
            let base = (ptr as *const u8).add(layout.offset as usize);
            for y in 0..self.height as usize {
                let row = base.add(y * layout.row_pitch as usize);
                for x in 0..self.width as usize {
                    let px = row.add(x * 4);
                    let (b0, b1, b2) = if self.needs_bgra_swizzle {
                        (*px.add(2), *px.add(1), *px)
                    } else {
                        (*px, *px.add(1), *px.add(2))
                    };
                    let out_idx = (y * self.width as usize + x) * 3;
                    out[out_idx] = b0;
                    out[out_idx + 1] = b1;
                    out[out_idx + 2] = b2;
                }
            }
            self.device.vk_device().unmap_memory(memory);
        }
        Ok(())
    }
}

/// Drives `canvas` through `config.frame_count` frames, writes a
/// screenshot of the last presented image, then stops the canvas. Written
/// as a plain blocking loop rather than integrated into `Canvas::frame`
/// itself, since autorun is a caller-selected mode (a headless CI
/// smoke-test run) rather than part of the steady-state render loop.
pub fn run_autorun(device: DeviceRef, canvas: &mut Canvas, transfers: &Transfers, config: &AutorunConfig) -> Result<()> {
    for _ in 0..config.frame_count {
        if !canvas.is_running() {
            break;
        }
        canvas.frame(transfers)?;
    }

    let Some(src) = canvas.last_image() else {
        info!("autorun stopped before any frame was presented, skipping screenshot");
        return Ok(());
    };
    let (width, height) = canvas.extent();
    let shot = Screenshot::capture(device, canvas.render_queue_family(), src, width, height)?;
    let mut rgb = vec![0u8; width as usize * height as usize * 3];
    shot.write_rgb8(&mut rgb)?;
    write_ppm(&config.screenshot_path, width, height, &rgb)?;

    info!(
        "autorun complete after {} frame(s), wrote screenshot to {}",
        canvas.frame_idx(),
        config.screenshot_path.display()
    );
    Ok(())
}

/// Writes a binary (P6) PPM — no image-codec dependency needed for a
/// headless smoke-test artifact that only needs to be diffable/viewable.
fn write_ppm(path: &std::path::Path, width: u32, height: u32, rgb: &[u8]) -> Result<()> {
    use std::io::Write;
    let mut file = std::fs::File::create(path)
        .map_err(|e| vklite_core::GfxError::TransferFailure(format!("creating {}: {}", path.display(), e)))?;
    write!(file, "P6\n{} {}\n255\n", width, height)
        .and_then(|_| file.write_all(rgb))
        .map_err(|e| vklite_core::GfxError::TransferFailure(format!("writing {}: {}", path.display(), e)))
}
