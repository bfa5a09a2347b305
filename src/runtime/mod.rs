//! Loop core: tick algorithm, shared handle, and the scheduled-callback
//! queue.

mod core;
mod handle;
pub(crate) mod queue;

pub use self::core::EventLoop;
pub use self::handle::{Handle, LoopEvent};
