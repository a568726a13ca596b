//! Backend-independent primitives shared by every layer of `vklite`: the
//! object registry (C1) and the bounded-FIFO/Deq multiplexer (C2).

pub mod deque;
pub mod error;
pub mod object;

pub use deque::{Deq, DeqItem, DeqStrategy, Fifo, Proc};
pub use error::{GfxError, Result};
pub use object::{Container, Handle, Object, ObjectStatus};
