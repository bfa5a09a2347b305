//! The backend contract: what a concrete I/O multiplexer must supply.
//!
//! A backend is selected by a capability probe (`enabled()`) and provides
//! exactly one polling pass per `dispatch` call. Managers never talk to the
//! backend directly; they arm and disarm through the [`EventFactory`] the
//! backend hands out, and the backend delivers readiness back through a
//! [`DispatchCtx`].

mod mio;

pub use self::mio::MioBackend;

use std::io;
use std::os::fd::RawFd;
use std::rc::Rc;
use std::time::Instant;

use crate::error::LoopError;
use crate::manager::Direction;
use crate::runtime::Handle;

/// A concrete I/O multiplexing implementation.
pub trait Backend {
    /// Reports whether the runtime environment provides the native facility
    /// this backend requires. Constructors fail with
    /// [`LoopError::Unsupported`] when this is false.
    fn enabled() -> bool
    where
        Self: Sized;

    /// Performs one polling pass over all armed events and invokes their
    /// callbacks synchronously through `ctx`. When `blocking`, waits until
    /// something is ready (bounded by the earliest timer deadline); otherwise
    /// polls without waiting.
    fn dispatch(&mut self, blocking: bool, ctx: &DispatchCtx<'_>) -> Result<(), LoopError>;

    /// Reinitializes native state after a process fork. Backends without
    /// fork-sensitive state implement this as a no-op.
    fn re_init(&mut self) -> Result<(), LoopError>;

    /// The arm/disarm surface managers use for this backend.
    fn factory(&self) -> Rc<dyn EventFactory>;
}

/// Produces and maintains backend-native event registrations on behalf of the
/// managers, keeping them backend-agnostic.
pub trait EventFactory {
    fn arm_socket(&self, fd: RawFd, dir: Direction) -> io::Result<()>;
    fn disarm_socket(&self, fd: RawFd, dir: Direction) -> io::Result<()>;

    /// Arms the backend for the earliest unexpired timer deadline.
    fn arm_timer(&self, deadline: Instant);
    fn disarm_timer(&self);

    /// Flags whether any immediates are pending; a pending immediate forces
    /// the next dispatch pass to poll without waiting.
    fn set_immediate_pending(&self, pending: bool);

    fn arm_signal(&self, signum: i32) -> io::Result<()>;
    fn disarm_signal(&self, signum: i32) -> io::Result<()>;
}

/// Delivery surface handed to [`Backend::dispatch`].
///
/// Routes readiness reports into the managers, which invoke the registered
/// continuations synchronously. Paused or since-removed registrations are
/// dropped silently.
pub struct DispatchCtx<'a> {
    handle: &'a Handle,
}

impl<'a> DispatchCtx<'a> {
    pub(crate) fn new(handle: &'a Handle) -> Self {
        Self { handle }
    }

    pub fn fire_readable(&self, fd: RawFd) -> Result<(), LoopError> {
        self.handle.fire_socket(fd, Direction::Read)
    }

    pub fn fire_writable(&self, fd: RawFd) -> Result<(), LoopError> {
        self.handle.fire_socket(fd, Direction::Write)
    }

    pub fn fire_signal(&self, signum: i32) -> Result<(), LoopError> {
        self.handle.fire_signal(signum)
    }

    /// Fires every timer due at or before `now`, one at a time so a callback
    /// can cancel timers that were due in the same pass.
    pub fn fire_due_timers(&self, now: Instant) -> Result<(), LoopError> {
        self.handle.fire_due_timers(now)
    }

    /// Drains the immediates that were pending when the pass started.
    pub fn fire_immediates(&self) -> Result<(), LoopError> {
        self.handle.fire_immediates()
    }
}

/// Selects the first feasible backend for this environment.
pub fn default_backend() -> Result<Box<dyn Backend>, LoopError> {
    if MioBackend::enabled() {
        return Ok(Box::new(MioBackend::new()?));
    }
    Err(LoopError::Unsupported(
        "no I/O multiplexing backend is available on this platform",
    ))
}
