//! C11: the per-canvas event type and its `Deq` topology. Three queues —
//! `MAIN`, `REFILL`, `PRESENT` — share a single proc so a `DepthFirst` drain
//! gives the frame ordering spec.md §4.9 requires: "within a frame, MAIN
//! events fire before REFILL before PRESENT". Drained synchronously from the
//! render loop's own thread (unlike the transfer engine's `UD` proc, no
//! background worker services this `Deq`).

use vklite_core::{Deq, DeqItem, DeqStrategy};

pub const QUEUE_MAIN: usize = 0;
pub const QUEUE_REFILL: usize = 1;
pub const QUEUE_PRESENT: usize = 2;
pub const PROC_CANVAS: usize = 0;

const TYPE_NEW: u32 = 0;
const TYPE_FRAME: u32 = 1;
const TYPE_RECREATE: u32 = 2;
const TYPE_REFILL_WRAP: u32 = 3;
const TYPE_UPFILL: u32 = 4;
const TYPE_DELETE: u32 = 5;
const TYPE_PRESENT: u32 = 6;
const TYPE_TO_REFILL: u32 = 7;

/// One of the event families named in spec.md §2's C11 description: new,
/// frame, recreate, refill, upfill, delete, present — plus `ToRefill`, the
/// "clear all blocked[*] flags" signal fired on swapchain recreation.
pub enum CanvasEvent {
    New,
    Frame { img_idx: usize },
    Recreate,
    RefillWrap { img_idx: usize },
    Upfill { img_idx: usize },
    Delete,
    Present { img_idx: usize },
    ToRefill,
}

impl CanvasEvent {
    fn kind(&self) -> u32 {
        match self {
            CanvasEvent::New => TYPE_NEW,
            CanvasEvent::Frame { .. } => TYPE_FRAME,
            CanvasEvent::Recreate => TYPE_RECREATE,
            CanvasEvent::RefillWrap { .. } => TYPE_REFILL_WRAP,
            CanvasEvent::Upfill { .. } => TYPE_UPFILL,
            CanvasEvent::Delete => TYPE_DELETE,
            CanvasEvent::Present { .. } => TYPE_PRESENT,
            CanvasEvent::ToRefill => TYPE_TO_REFILL,
        }
    }
}

impl DeqItem for CanvasEvent {
    fn type_id(&self) -> u32 {
        self.kind()
    }

    fn take_next(&mut self) -> Option<(usize, Self)> {
        None
    }
}

pub fn new_canvas_deq() -> Deq<CanvasEvent> {
    Deq::new(&[3], DeqStrategy::DepthFirst)
}
