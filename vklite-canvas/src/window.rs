//! Window-system capability trait, plus a `winit` implementation. Grounded
//! on `vksurface.rs`'s per-platform `create_surface`/`modify_instance_builder`
//! split (DESIGN NOTES: "Backend glue via function-pointer table → a
//! capability trait ... implemented per backend and injected at App
//! construction") — updated to the modern `ash-window` + `raw-window-handle`
//! idiom rather than hand-rolled per-platform FFI, matching
//! `novade-system/src/renderers/vulkan/surface.rs`'s `ash_window::create_surface`
//! call.

use std::os::raw::c_char;

use ash::vk;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use winit::dpi::PhysicalSize;
use winit::event::{Event, WindowEvent};
use winit::event_loop::EventLoop;
use winit::platform::run_return::EventLoopExtRunReturn;
use winit::window::{Window, WindowBuilder};

use vklite_core::Result;

/// A signal surfaced by a window backend's event pump, consumed by the
/// canvas render loop (step 1: "poll window events ... if window close
/// requested, enqueue canvas_delete").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowSignal {
    CloseRequested,
    Resized(u32, u32),
}

/// {create_surface, poll_events, get_size, should_close, destroy_window},
/// injected into a `Canvas` at construction so the swapchain/canvas code
/// never names a concrete windowing crate directly.
pub trait WindowBackend {
    fn create_surface(&self, entry: &ash::Entry, instance: &ash::Instance) -> Result<vk::SurfaceKHR>;
    fn required_instance_extensions(&self) -> Vec<*const c_char>;
    fn poll_events(&mut self) -> Vec<WindowSignal>;
    fn framebuffer_size(&self) -> (u32, u32);
    fn should_close(&self) -> bool;
}

pub struct WinitWindow {
    event_loop: EventLoop<()>,
    window: Window,
    should_close: bool,
}

impl WinitWindow {
    pub fn new(title: &str, width: u32, height: u32) -> Result<Self> {
        let event_loop = EventLoop::new();
        let window = WindowBuilder::new()
            .with_title(title)
            .with_inner_size(PhysicalSize::new(width, height))
            .build(&event_loop)
            .map_err(|e| vklite_core::GfxError::InitFailure(e.to_string()))?;
        Ok(WinitWindow {
            event_loop,
            window,
            should_close: false,
        })
    }

    pub fn raw(&self) -> &Window {
        &self.window
    }
}

impl WindowBackend for WinitWindow {
    fn create_surface(&self, entry: &ash::Entry, instance: &ash::Instance) -> Result<vk::SurfaceKHR> {
        unsafe {
            ash_window::create_surface(
                entry,
                instance,
                self.window.raw_display_handle(),
                self.window.raw_window_handle(),
                None,
            )
        }
        .map_err(|e| vklite_core::GfxError::InitFailure(e.to_string()))
    }

    fn required_instance_extensions(&self) -> Vec<*const c_char> {
        ash_window::enumerate_required_extensions(self.window.raw_display_handle())
            .map(|exts| exts.to_vec())
            .unwrap_or_default()
    }

    fn poll_events(&mut self) -> Vec<WindowSignal> {
        let mut signals = Vec::new();
        let mut close_requested = false;
        self.event_loop.run_return(|event, _, control_flow| {
            control_flow.set_poll();
            match event {
                Event::WindowEvent { event, .. } => match event {
                    WindowEvent::CloseRequested => {
                        close_requested = true;
                        signals.push(WindowSignal::CloseRequested);
                    }
                    WindowEvent::Resized(size) => {
                        signals.push(WindowSignal::Resized(size.width, size.height));
                    }
                    _ => {}
                },
                Event::MainEventsCleared => control_flow.set_exit(),
                _ => {}
            }
        });
        if close_requested {
            self.should_close = true;
        }
        signals
    }

    fn framebuffer_size(&self) -> (u32, u32) {
        let size = self.window.inner_size();
        (size.width, size.height)
    }

    fn should_close(&self) -> bool {
        self.should_close
    }
}
