//! The event loop itself: the canonical tick algorithm over an abstract
//! backend.
//!
//! A tick drains at most `max_schedule_depth` scheduled callbacks in FIFO
//! order, then calls the backend's `dispatch` exactly once. Readiness, timer,
//! and signal callbacks run synchronously inside dispatch; the scheduled
//! queue is reserved for explicitly scheduled work, so its relative ordering
//! survives interleaved I/O.
//!
//! # Usage
//!
//! ```ignore
//! let mut lp = EventLoop::new()?;
//! let handle = lp.handle();
//! handle.schedule(|| {
//!     println!("hello from the loop");
//!     Ok(())
//! });
//! lp.run()?; // drains the callback, then returns: nothing else is pending
//! ```

use crate::backend::{Backend, DispatchCtx};
use crate::builder::LoopBuilder;
use crate::error::LoopError;
use crate::runtime::{Handle, LoopEvent};

/// A cooperative, single-threaded event loop over a pluggable backend.
pub struct EventLoop {
    handle: Handle,
    backend: Box<dyn Backend>,
}

impl EventLoop {
    /// Builds a loop on the first feasible backend with default options.
    pub fn new() -> Result<Self, LoopError> {
        LoopBuilder::new().build()
    }

    pub(crate) fn from_parts(handle: Handle, backend: Box<dyn Backend>) -> Self {
        Self { handle, backend }
    }

    /// A clonable handle for registering work from callbacks and promises.
    pub fn handle(&self) -> Handle {
        self.handle.clone()
    }

    /// Executes a single tick. When `blocking`, the dispatch pass waits for
    /// I/O if no scheduled work remains; otherwise it polls without waiting.
    ///
    /// A failing callback aborts the tick and surfaces here; the loop does
    /// not catch and continue.
    pub fn tick(&mut self, blocking: bool) -> Result<(), LoopError> {
        self.handle.drain_scheduled()?;
        // Callbacks past the drain budget must not be delayed by a blocking
        // poll, and neither may a stop requested during the drain.
        let blocking =
            blocking && self.handle.scheduled_is_empty() && !self.handle.take_stop_request();
        let ctx = DispatchCtx::new(&self.handle);
        self.backend.dispatch(blocking, &ctx)
    }

    /// Runs until [`Handle::stop`] is called or nothing remains pending.
    /// Lifecycle hooks see [`LoopEvent::Started`] first and
    /// [`LoopEvent::Stopped`] on the way out.
    pub fn run(&mut self) -> Result<(), LoopError> {
        if self.handle.is_running() {
            return Err(LoopError::AlreadyRunning);
        }
        self.handle.set_running(true);
        self.handle.emit(LoopEvent::Started);

        let mut result = Ok(());
        while self.handle.is_running() && !self.handle.is_empty() {
            if let Err(e) = self.tick(true) {
                result = Err(e);
                break;
            }
        }

        self.handle.set_running(false);
        self.handle.emit(LoopEvent::Stopped);
        result
    }

    /// Reinitializes backend-native state. Call after forking, before the
    /// loop dispatches again; never mid-tick.
    pub fn re_init(&mut self) -> Result<(), LoopError> {
        self.backend.re_init()
    }

    /// Removes all registrations and scheduled callbacks. See
    /// [`Handle::clear`].
    pub fn clear(&mut self) -> Result<(), LoopError> {
        self.handle.clear()
    }
}
