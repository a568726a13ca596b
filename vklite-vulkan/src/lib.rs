//! ash-based Vulkan backend: the GPU device (C3), resource primitives (C4),
//! the buffer arena (C5), textures (C6), the async transfer engine (C7), and
//! the command recorder (C8). Backend-independent pieces — the object
//! registry and the deque multiplexer — live in `vklite-core`.

mod arena;
mod buffer;
mod cmd;
mod descriptor;
mod device;
mod error;
mod image;
mod limits;
mod pipeline;
mod renderpass;
mod shader;
mod sync;
mod tex;
mod transfer;

pub use arena::{BufferArena, Dat, DatFlags, DatKind};
pub use buffer::{Buffer, BufferRegions, BufferUsage};
pub use cmd::{BarrierBuilder, CommandRecorder};
pub use descriptor::{Bindings, DescriptorSlotSet, Resource, SlotDesc};
pub use device::{DeviceBuilder, DeviceRef, QueueHandle};
pub use error::translate_vk_result;
pub use image::{Image, ImageBuilder, ImageDims, ImageUsage, Sampler, SamplerBuilder};
pub use limits::{pick_queue_family, DeviceCaps, QueueRole};
pub use pipeline::{BlendType, ComputePipeline, ComputePipelineBuilder, GraphicsPipeline, GraphicsPipelineBuilder};
pub use renderpass::{AttachmentDesc, Framebuffers, RenderPass, RenderPassBuilder, SubpassDependencyDesc, SubpassDesc};
pub use shader::ShaderModule;
pub use sync::{FenceSet, SemaphoreSet};
pub use tex::Tex;
pub use transfer::{TransferTask, Transfers};

pub use vklite_core::{Deq, DeqItem, DeqStrategy, GfxError, Handle, Object, ObjectStatus, Result};
