//! Error taxonomy for the loop and the promise engine.
//!
//! Rejection payloads are first-class values ([`Reason`]), not unwinds: a
//! failing callback returns `Err(Reason)` and the error surfaces from
//! `tick`/`run` as [`LoopError::Callback`]. The loop never retries.

use std::error::Error;
use std::fmt;
use std::io;
use std::os::fd::RawFd;
use std::rc::Rc;

use thiserror::Error;

use crate::manager::Direction;

/// Errors surfaced by loop construction, registration, and ticking.
#[derive(Debug, Error)]
pub enum LoopError {
    /// The runtime environment lacks the native facility a backend requires.
    /// Raised at construction, before any event is armed.
    #[error("unsupported backend: {0}")]
    Unsupported(&'static str),

    /// `run()` was called while the loop was already inside `run()`.
    #[error("event loop is already running")]
    AlreadyRunning,

    /// Signal handling was disabled when this loop was built.
    #[error("signal handling is disabled for this loop")]
    SignalsDisabled,

    /// A socket is already registered for this direction.
    #[error("fd {fd} is already registered for {dir} readiness")]
    AlreadyRegistered { fd: RawFd, dir: Direction },

    /// The backend failed while arming, disarming, or polling.
    #[error("backend i/o failure: {0}")]
    Io(#[from] io::Error),

    /// A scheduled callback, readiness handler, timer, signal handler, or
    /// promise continuation failed. Fatal to the current tick.
    #[error("callback failure: {0}")]
    Callback(Reason),
}

/// A shared, inspectable failure value.
///
/// Used both as the promise rejection payload and as the failure type of every
/// loop callback. Cloning is cheap; all clones refer to the same underlying
/// error.
#[derive(Clone)]
pub struct Reason(Rc<dyn Error + 'static>);

impl Reason {
    /// Wraps a concrete error value.
    pub fn new<E: Error + 'static>(error: E) -> Self {
        Reason(Rc::new(error))
    }

    /// Builds a reason from a plain message.
    pub fn msg(message: impl Into<String>) -> Self {
        Reason(Rc::new(Message(message.into())))
    }

    /// Attempts to view the underlying error as a concrete type.
    pub fn downcast_ref<E: Error + 'static>(&self) -> Option<&E> {
        self.0.downcast_ref()
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Reason({})", self.0)
    }
}

#[derive(Debug)]
struct Message(String);

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Error for Message {}
