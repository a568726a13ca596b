//! `vklite`: the top-level crate wiring the object registry and Deq
//! scheduler (`vklite-core`), the Vulkan backend (`vklite-vulkan`), and
//! the canvas render loop (`vklite-canvas`) into a single `App` entry
//! point, plus process-wide configuration and logging setup.

mod app;
mod config;

pub use app::{App, Gpu};
pub use config::AppConfig;

/// Re-exports the handful of types most callers need without reaching
/// into the individual member crates directly.
pub mod prelude {
    pub use crate::{App, AppConfig, Gpu};
    pub use vklite_canvas::{
        AutorunConfig, CallbackMode, Canvas, CanvasConfig, RefillCallback, UserEventKind,
        UserEventPayload, WindowBackend, WinitWindow, MAX_FRAMES_IN_FLIGHT,
    };
    pub use vklite_core::{GfxError, Object, ObjectStatus, Result};
    pub use vklite_vulkan::{
        Bindings, Buffer, BufferArena, BufferRegions, BufferUsage, ComputePipeline,
        ComputePipelineBuilder, DeviceRef, GraphicsPipeline, GraphicsPipelineBuilder, Image,
        ImageBuilder, QueueHandle, QueueRole, RenderPass, Sampler, SamplerBuilder, Tex,
        Transfers,
    };
}
