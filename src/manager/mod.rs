//! Registration state for each category of event source.
//!
//! A manager owns the records for one kind of source (sockets of one
//! direction, timers, signals) and bridges them to backend arm/disarm calls
//! through the [`EventFactory`](crate::backend::EventFactory). Every
//! registration is identified by a stable integer handle drawn from a dense
//! arena, never by native-handle identity.

mod signal;
mod socket;
mod timer;

pub(crate) use signal::SignalManager;
pub(crate) use socket::SocketManager;
pub(crate) use timer::TimerManager;

use std::fmt;
use std::os::fd::RawFd;
use std::rc::Rc;

use crate::error::Reason;

/// Readiness direction a socket manager is responsible for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Read,
    Write,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Read => f.write_str("read"),
            Direction::Write => f.write_str("write"),
        }
    }
}

/// Stable identifier for a socket registration in one direction.
///
/// Handles carry a generation stamp alongside the arena slot: once a
/// registration is gone, its handle stays dead even after the slot is reused
/// by a later registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketHandle {
    pub(crate) slot: usize,
    pub(crate) gen: u64,
}

/// Stable, generation-stamped identifier for an active timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle {
    pub(crate) slot: usize,
    pub(crate) gen: u64,
}

/// Stable, generation-stamped identifier for a pending immediate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImmediateHandle {
    pub(crate) slot: usize,
    pub(crate) gen: u64,
}

/// Stable, generation-stamped identifier for a signal handler registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignalHandle {
    pub(crate) slot: usize,
    pub(crate) gen: u64,
}

/// Continuation invoked when a socket reports readiness.
pub type ReadyCallback = Rc<dyn Fn(RawFd) -> Result<(), Reason>>;

/// Callback invoked when a timer fires. Receives its own handle so periodic
/// timers can cancel themselves.
pub type TimerCallback = Rc<dyn Fn(TimerHandle) -> Result<(), Reason>>;

/// One-shot callback invoked on the dispatch pass after it was added.
pub type ImmediateCallback = Box<dyn FnOnce() -> Result<(), Reason>>;

/// Handler invoked when an OS signal arrives.
pub type SignalCallback = Rc<dyn Fn(i32) -> Result<(), Reason>>;
