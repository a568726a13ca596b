//! Swapchain, canvas render loop, event scheduler, and screenshot/autorun
//! facilities (C9, C10, C11, C4.10) built atop `vklite-vulkan`'s backend
//! primitives. Window-system access is injected through the
//! `WindowBackend` capability trait rather than named directly, so this
//! crate never hardcodes a single windowing toolkit.

pub mod canvas;
pub mod dispatch;
pub mod events;
pub mod screenshot;
pub mod swapchain;
pub mod window;

pub use canvas::{Canvas, CanvasConfig, RefillCallback, MAX_FRAMES_IN_FLIGHT};
pub use dispatch::{CallbackMode, EventDispatcher, UserEventKind, UserEventPayload};
pub use events::{CanvasEvent, PROC_CANVAS, QUEUE_MAIN, QUEUE_PRESENT, QUEUE_REFILL};
pub use screenshot::{run_autorun, AutorunConfig, Screenshot};
pub use swapchain::{AcquiredImage, Swapchain, SwapchainState};
pub use window::{WindowBackend, WindowSignal, WinitWindow};
