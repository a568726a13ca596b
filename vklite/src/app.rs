//! Top-level wiring: `App` owns one or more `Gpu`s; each `Gpu` owns its
//! transfer engine and the canvases presenting to it. Mirrors spec.md
//! §9's ownership resolution for the "GPU ↔ Context ↔ App" cycle: strictly
//! one-way owning edges (`App` owns `Gpu`s owns `Canvas`es), no
//! process-wide singleton — an `App` value is constructed explicitly and
//! threaded through by the caller.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use vklite_canvas::{AutorunConfig, Canvas, CanvasConfig, RefillCallback, WindowBackend};
use vklite_vulkan::{DeviceBuilder, DeviceRef, QueueHandle, QueueRole, Result, Transfers};

use crate::config::AppConfig;

/// One opened Vulkan device plus the transfer engine and canvases it
/// backs. Resource containers for buffers/images/pipelines are owned by
/// caller-held handles today rather than bundled behind this type (see
/// DESIGN.md's Open Question 3 note) — `Gpu` concentrates on the
/// execution substrate: queues, transfers, presentation surfaces.
pub struct Gpu {
    device: DeviceRef,
    transfer_queue: QueueHandle,
    render_queue: QueueHandle,
    present_queue: QueueHandle,
    transfers: Transfers,
    canvases: Vec<Canvas>,
    n_errors: Arc<AtomicU64>,
}

impl Gpu {
    pub fn device(&self) -> &DeviceRef {
        &self.device
    }

    pub fn render_queue(&self) -> QueueHandle {
        self.render_queue
    }

    pub fn transfer_queue(&self) -> QueueHandle {
        self.transfer_queue
    }

    pub fn transfers(&self) -> &Transfers {
        &self.transfers
    }

    pub fn canvases(&self) -> &[Canvas] {
        &self.canvases
    }

    pub fn canvases_mut(&mut self) -> &mut [Canvas] {
        &mut self.canvases
    }

    /// Count of non-fatal `kValidation` occurrences observed so far, per
    /// spec.md §7's "counted in an `n_errors` counter on the App" policy.
    pub fn n_errors(&self) -> u64 {
        self.n_errors.load(Ordering::Relaxed)
    }

    /// Creates a surface from `window` and wraps it in a new `Canvas`,
    /// returning its index within this `Gpu`.
    pub fn add_canvas(
        &mut self,
        window: Box<dyn WindowBackend>,
        config: CanvasConfig,
        refill: RefillCallback,
    ) -> Result<usize> {
        let surface = window.create_surface(self.device.entry(), self.device.instance())?;
        let canvas = Canvas::new(self.device.clone(), self.present_queue, window, surface, config, refill)?;
        self.canvases.push(canvas);
        Ok(self.canvases.len() - 1)
    }

    /// Runs one render-loop tick for every canvas this GPU owns, dropping
    /// any canvas that has stopped (window closed).
    pub fn tick(&mut self) -> Result<()> {
        for canvas in self.canvases.iter_mut() {
            canvas.frame(&self.transfers)?;
        }
        self.canvases.retain(|c| c.is_running());
        Ok(())
    }

    /// Drives `canvas_idx` through `config.frame_count` frames and writes
    /// a screenshot of the last presented image, per spec.md §4.10's
    /// headless autorun mode.
    pub fn run_autorun(&mut self, canvas_idx: usize, config: &AutorunConfig) -> Result<()> {
        vklite_canvas::run_autorun(
            self.device.clone(),
            &mut self.canvases[canvas_idx],
            &self.transfers,
            config,
        )
    }
}

pub struct App {
    config: AppConfig,
    gpus: Vec<Gpu>,
}

impl App {
    /// Opens a single GPU, requesting instance/device extensions for
    /// presenting to `window`, then turns `window` into the app's first
    /// canvas. Per DESIGN.md's Open Question 3, this crate targets one
    /// physical device; multi-GPU fan-out is future work noted there.
    pub fn new(
        config: AppConfig,
        window: Box<dyn WindowBackend>,
        canvas_config: CanvasConfig,
        refill: RefillCallback,
    ) -> Result<Self> {
        let swapchain_ext = ash::extensions::khr::Swapchain::name();
        let instance_exts = window.required_instance_extensions();

        let device = DeviceBuilder::new(config.app_name.clone())
            .queue(QueueRole::Render)
            .queue(QueueRole::Present)
            .device_extension(swapchain_ext)
            .instance_extensions_raw(&instance_exts)
            .build()?;

        let transfer_queue = device.queue(0);
        let render_queue = device.queue(1);
        let present_queue = device.queue(2);

        let transfers = Transfers::new(device.clone(), transfer_queue.family, transfer_queue.index)?;

        let mut gpu = Gpu {
            device,
            transfer_queue,
            render_queue,
            present_queue,
            transfers,
            canvases: Vec::new(),
            n_errors: Arc::new(AtomicU64::new(0)),
        };
        gpu.add_canvas(window, canvas_config, refill)?;

        Ok(App {
            config,
            gpus: vec![gpu],
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn gpus(&self) -> &[Gpu] {
        &self.gpus
    }

    pub fn gpus_mut(&mut self) -> &mut [Gpu] {
        &mut self.gpus
    }

    pub fn primary_gpu(&self) -> &Gpu {
        &self.gpus[0]
    }

    pub fn primary_gpu_mut(&mut self) -> &mut Gpu {
        &mut self.gpus[0]
    }

    /// Returns once every GPU's canvases have all stopped running.
    pub fn run(&mut self) -> Result<()> {
        loop {
            let mut any_running = false;
            for gpu in self.gpus.iter_mut() {
                gpu.tick()?;
                any_running |= !gpu.canvases.is_empty();
            }
            if !any_running {
                return Ok(());
            }
        }
    }
}
