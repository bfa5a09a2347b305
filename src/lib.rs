//! A cooperative, single-threaded event loop with promise-based resolution.
//!
//! The loop multiplexes socket readiness, timers, deferred "immediate"
//! callbacks, and OS signals over a pluggable [`Backend`], and every
//! continuation runs through a FIFO scheduled-callback queue so user code is
//! never re-entered inline.

pub mod backend;
pub mod builder;
pub mod error;
pub mod manager;
pub mod promise;
pub mod runtime;

pub use backend::{default_backend, Backend, DispatchCtx, EventFactory, MioBackend};
pub use builder::LoopBuilder;
pub use error::{LoopError, Reason};
pub use manager::{Direction, ImmediateHandle, SignalHandle, SocketHandle, TimerHandle};
pub use promise::{Deferred, Promise, Resolution};
pub use runtime::{EventLoop, Handle, LoopEvent};
