//! C10: the canvas render loop. Owns a window, its swapchain, a default
//! single-subpass render pass/framebuffer set, and the synchronization
//! objects for `MAX_FRAMES_IN_FLIGHT` frames in flight. `frame()` runs the
//! acquire/wait/transfer/refill/submit/present sequence of spec.md §4.9,
//! in the classic "frame N+1 waits on frame N's fence before reusing its
//! sync objects" shape also used by `novade-system`'s frame loop, adapted
//! to the teacher's `Deq`-sequenced event model for the REFILL/PRESENT
//! ordering guarantee.

use ash::vk;
use log::{trace, warn};

use vklite_core::Deq;
use vklite_vulkan::{
    AttachmentDesc, CommandRecorder, DeviceRef, FenceSet, Framebuffers, QueueHandle, RenderPass,
    RenderPassBuilder, Result, SemaphoreSet, SubpassDependencyDesc, SubpassDesc, Transfers,
};

use crate::dispatch::{CallbackMode, EventDispatcher, UserEventKind, UserEventPayload};
use crate::events::{new_canvas_deq, CanvasEvent, PROC_CANVAS, QUEUE_MAIN, QUEUE_PRESENT, QUEUE_REFILL};
use crate::swapchain::{Swapchain, SwapchainState};
use crate::window::{WindowBackend, WindowSignal};

/// Number of frames the GPU may be working on concurrently. Two is the
/// teacher's default everywhere it double-buffers (swapchain images, ring
/// buffers): enough to overlap CPU recording with GPU execution without
/// the added input latency of triple buffering.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Bound on how far a canvas's internal MAIN/REFILL/PRESENT queues are
/// allowed to grow before being discarded, applied defensively each frame
/// even though under normal operation they never exceed one item.
const MAX_QUEUE_BACKLOG: usize = 4;

/// Records a frame's draw commands into the command buffer for swapchain
/// image `img_idx`. Invoked at most once per image between two
/// `recreate()`s (subsequent frames replay the already-recorded buffer),
/// per spec.md's `blocked[img_idx]` refill-once invariant.
pub type RefillCallback = Box<dyn FnMut(&CommandRecorder, usize) + Send>;

pub struct CanvasConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub clear_value: [f32; 4],
    pub dpi_scaling: f32,
}

impl Default for CanvasConfig {
    fn default() -> Self {
        CanvasConfig {
            title: "vklite".into(),
            width: 1024,
            height: 768,
            clear_value: [0.0, 0.0, 0.0, 1.0],
            dpi_scaling: 1.0,
        }
    }
}

pub struct Canvas {
    device: DeviceRef,
    render_queue: QueueHandle,
    window: Box<dyn WindowBackend>,
    swapchain: Swapchain,
    render_pass: RenderPass,
    framebuffers: Framebuffers,
    recorder: CommandRecorder,
    frame_fences: FenceSet,
    fences_in_flight: Vec<vk::Fence>,
    sem_img_available: SemaphoreSet,
    sem_render_finished: SemaphoreSet,
    blocked: Vec<bool>,
    cur_frame: usize,
    frame_idx: u64,
    last_img_idx: Option<usize>,
    clear_value: [f32; 4],
    dpi_scaling: f32,
    running: bool,
    refill: RefillCallback,
    deq: Deq<CanvasEvent>,
    dispatcher: std::sync::Arc<parking_lot::Mutex<EventDispatcher>>,
}

impl Canvas {
    pub fn new(
        device: DeviceRef,
        render_queue: QueueHandle,
        window: Box<dyn WindowBackend>,
        surface: vk::SurfaceKHR,
        config: CanvasConfig,
        refill: RefillCallback,
    ) -> Result<Self> {
        let (width, height) = window.framebuffer_size();
        let swapchain = Swapchain::new(device.clone(), surface, width.max(config.width), height.max(config.height))?;

        let (render_pass, framebuffers) = Self::build_render_target(&device, &swapchain)?;

        let image_count = swapchain.image_count();
        let recorder = CommandRecorder::create(device.clone(), render_queue.family, image_count)?;
        let frame_fences = FenceSet::create(device.clone(), MAX_FRAMES_IN_FLIGHT)?;
        let sem_img_available = SemaphoreSet::create(device.clone(), MAX_FRAMES_IN_FLIGHT)?;
        let sem_render_finished = SemaphoreSet::create(device.clone(), MAX_FRAMES_IN_FLIGHT)?;

        Ok(Canvas {
            device,
            render_queue,
            window,
            swapchain,
            render_pass,
            framebuffers,
            recorder,
            frame_fences,
            fences_in_flight: vec![vk::Fence::null(); image_count],
            sem_img_available,
            sem_render_finished,
            blocked: vec![false; image_count],
            cur_frame: 0,
            frame_idx: 0,
            last_img_idx: None,
            clear_value: config.clear_value,
            dpi_scaling: config.dpi_scaling,
            running: true,
            refill,
            deq: new_canvas_deq(),
            dispatcher: EventDispatcher::new(),
        })
    }

    fn build_render_target(device: &DeviceRef, swapchain: &Swapchain) -> Result<(RenderPass, Framebuffers)> {
        let render_pass = RenderPassBuilder::new(device.clone())
            .attachment(AttachmentDesc {
                format: swapchain.format(),
                load_op: vk::AttachmentLoadOp::CLEAR,
                store_op: vk::AttachmentStoreOp::STORE,
                initial_layout: vk::ImageLayout::UNDEFINED,
                final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
                is_depth: false,
            })
            .subpass(SubpassDesc {
                color_refs: vec![(0, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)],
                depth_ref: None,
            })
            .dependency(SubpassDependencyDesc {
                src_subpass: vk::SUBPASS_EXTERNAL,
                dst_subpass: 0,
                src_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                dst_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                src_access: vk::AccessFlags::empty(),
                dst_access: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            })
            .build()?;

        let (width, height) = {
            let extent = swapchain.extent();
            (extent.width, extent.height)
        };
        let attachments: Vec<Vec<&vklite_vulkan::Image>> =
            (0..swapchain.image_count()).map(|i| vec![swapchain.image(i)]).collect();
        let framebuffers = Framebuffers::create(device.clone(), &render_pass, &attachments, width, height)?;
        Ok((render_pass, framebuffers))
    }

    pub fn render_pass(&self) -> &RenderPass {
        &self.render_pass
    }

    pub fn recorder(&self) -> &CommandRecorder {
        &self.recorder
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn frame_idx(&self) -> u64 {
        self.frame_idx
    }

    /// Registers a collaborator callback per spec.md §6. `mode` controls
    /// whether it runs synchronously on the render thread or on the
    /// canvas's background event thread.
    pub fn on_event(
        &self,
        kind: UserEventKind,
        mode: CallbackMode,
        callback: Box<dyn FnMut(&UserEventPayload) + Send>,
    ) {
        self.dispatcher.lock().register(kind, mode, callback);
    }

    /// Runs one iteration of the render loop: poll → acquire → wait →
    /// transfer → refill (at most once per image) → submit → present.
    /// Returns `Ok(())` even on a skipped (recreate/invalid) frame; the
    /// caller's loop should simply call `frame()` again.
    pub fn frame(&mut self, transfers: &Transfers) -> Result<()> {
        for signal in self.window.poll_events() {
            match signal {
                WindowSignal::CloseRequested => {
                    self.running = false;
                    let _ = self.deq.enqueue(QUEUE_MAIN, CanvasEvent::Delete);
                }
                WindowSignal::Resized(w, h) => {
                    self.recreate(w, h)?;
                }
            }
        }
        if !self.running {
            return Ok(());
        }

        self.frame_fences.wait(self.cur_frame)?;

        let signal = self.sem_img_available.get(self.cur_frame);
        let img_idx = match self.swapchain.acquire(signal)? {
            Some(acquired) => acquired.img_idx,
            None => {
                if self.swapchain.state() == SwapchainState::NeedRecreate {
                    let (w, h) = self.window.framebuffer_size();
                    self.recreate(w, h)?;
                } else if self.swapchain.state() == SwapchainState::Invalid {
                    warn!("swapchain invalid, stopping canvas");
                    self.running = false;
                }
                return Ok(());
            }
        };

        let in_flight = self.fences_in_flight[img_idx];
        if in_flight != vk::Fence::null() {
            unsafe {
                self.device
                    .vk_device()
                    .wait_for_fences(&[in_flight], true, u64::MAX)
            }
            .map_err(vklite_vulkan::translate_vk_result)?;
        }
        self.fences_in_flight[img_idx] = self.frame_fences.get(self.cur_frame);
        self.frame_fences.reset(self.cur_frame)?;

        transfers.frame(img_idx);
        let _ = self.deq.enqueue(QUEUE_MAIN, CanvasEvent::Frame { img_idx });
        self.dispatcher.lock().fire(UserEventPayload::Frame { frame_idx: self.frame_idx });

        if !self.blocked[img_idx] {
            self.record(img_idx)?;
            self.blocked[img_idx] = true;
            let _ = self.deq.enqueue(QUEUE_REFILL, CanvasEvent::RefillWrap { img_idx });
            self.dispatcher.lock().fire(UserEventPayload::Refill { img_idx });
        }

        self.submit_and_present(img_idx)?;
        let _ = self.deq.enqueue(QUEUE_PRESENT, CanvasEvent::Present { img_idx });

        self.deq.discard(QUEUE_MAIN, MAX_QUEUE_BACKLOG);
        self.deq.discard(QUEUE_REFILL, MAX_QUEUE_BACKLOG);
        self.deq.discard(QUEUE_PRESENT, MAX_QUEUE_BACKLOG);
        self.deq.dequeue_batch_nowait(PROC_CANVAS);

        self.last_img_idx = Some(img_idx);
        self.cur_frame = (self.cur_frame + 1) % MAX_FRAMES_IN_FLIGHT;
        self.frame_idx += 1;
        Ok(())
    }

    /// The swapchain image most recently submitted and presented, if any
    /// frame has run yet. Used by the screenshot facility to capture the
    /// last thing actually shown.
    pub fn last_image(&self) -> Option<&vklite_vulkan::Image> {
        self.last_img_idx.map(|i| self.swapchain.image(i))
    }

    pub fn extent(&self) -> (u32, u32) {
        let e = self.swapchain.extent();
        (e.width, e.height)
    }

    pub fn render_queue_family(&self) -> u32 {
        self.render_queue.family
    }

    fn record(&mut self, img_idx: usize) -> Result<()> {
        let (width, height) = self.framebuffers.dims();
        self.recorder.reset(img_idx)?;
        self.recorder.begin(img_idx)?;
        let clear = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: self.clear_value,
            },
        }];
        self.recorder
            .begin_renderpass(img_idx, &self.render_pass, &self.framebuffers, &clear);
        self.recorder
            .viewport(img_idx, width as f32 * self.dpi_scaling, height as f32 * self.dpi_scaling);
        (self.refill)(&self.recorder, img_idx);
        self.recorder.end(img_idx)
    }

    fn submit_and_present(&mut self, img_idx: usize) -> Result<()> {
        let wait_sems = [self.sem_img_available.get(self.cur_frame)];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_sems = [self.sem_render_finished.get(self.cur_frame)];
        let buffers = [self.recorder.vk_buffer(img_idx)];
        let info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_sems)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&buffers)
            .signal_semaphores(&signal_sems);
        unsafe {
            self.device.vk_device().queue_submit(
                self.render_queue.vk_queue,
                &[info.build()],
                self.frame_fences.get(self.cur_frame),
            )
        }
        .map_err(vklite_vulkan::translate_vk_result)?;

        self.swapchain
            .present(signal_sems[0], self.render_queue.vk_queue, img_idx)
    }

    /// Waits for the device to idle, rebuilds the swapchain and its
    /// dependent render target, and clears every `blocked` flag so every
    /// image is refilled exactly once against the new framebuffers.
    fn recreate(&mut self, width: u32, height: u32) -> Result<()> {
        trace!("recreating canvas swapchain at {}x{}", width, height);
        self.device.wait_device()?;
        self.framebuffers.destroy();
        self.swapchain.recreate(width, height)?;
        let (render_pass, framebuffers) = Self::build_render_target(&self.device, &self.swapchain)?;
        self.render_pass = render_pass;
        self.framebuffers = framebuffers;

        let image_count = self.swapchain.image_count();
        self.blocked = vec![false; image_count];
        self.fences_in_flight = vec![vk::Fence::null(); image_count];
        let _ = self.deq.enqueue(QUEUE_MAIN, CanvasEvent::ToRefill);
        self.dispatcher.lock().fire(UserEventPayload::Resize { width, height });
        Ok(())
    }
}

impl Drop for Canvas {
    fn drop(&mut self) {
        let _ = self.device.wait_device();
        self.dispatcher.lock().stop();
    }
}
