//! The shared registration surface of a loop.
//!
//! A [`Handle`] is a cheap clone over the loop's state, in the same spirit as
//! the executor/reactor handles other runtimes pass around: callbacks and
//! promises capture one so they can reschedule themselves. All mutation
//! happens on the single loop thread; a `Handle` is deliberately `!Send`.

use std::cell::{Cell, RefCell};
use std::os::fd::RawFd;
use std::rc::Rc;
use std::time::{Duration, Instant};

use metrics::counter;

use crate::backend::EventFactory;
use crate::error::{LoopError, Reason};
use crate::manager::{
    Direction, ImmediateHandle, SignalHandle, SignalManager, SocketHandle, SocketManager,
    TimerHandle, TimerManager,
};
use crate::runtime::queue::ScheduleQueue;

/// Lifecycle notification delivered to hooks registered with
/// [`Handle::on_lifecycle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopEvent {
    /// `run()` has begun ticking.
    Started,
    /// `run()` has returned, whether by `stop()` or natural exhaustion.
    Stopped,
}

pub(crate) struct LoopInner {
    running: Cell<bool>,
    stop_requested: Cell<bool>,
    queue: ScheduleQueue,
    readers: RefCell<SocketManager>,
    writers: RefCell<SocketManager>,
    timers: RefCell<TimerManager>,
    signals: RefCell<SignalManager>,
    signals_enabled: bool,
    lifecycle: RefCell<Vec<Box<dyn FnMut(LoopEvent)>>>,
    rejection_policy: RefCell<Rc<dyn Fn(&Reason)>>,
}

/// Clonable handle to a running or idle [`EventLoop`](crate::EventLoop).
#[derive(Clone)]
pub struct Handle {
    inner: Rc<LoopInner>,
}

impl Handle {
    pub(crate) fn new(factory: Rc<dyn EventFactory>, signals_enabled: bool, depth: usize) -> Self {
        Self {
            inner: Rc::new(LoopInner {
                running: Cell::new(false),
                stop_requested: Cell::new(false),
                queue: ScheduleQueue::new(depth),
                readers: RefCell::new(SocketManager::new(Direction::Read, factory.clone())),
                writers: RefCell::new(SocketManager::new(Direction::Write, factory.clone())),
                timers: RefCell::new(TimerManager::new(factory.clone())),
                signals: RefCell::new(SignalManager::new(factory)),
                signals_enabled,
                lifecycle: RefCell::new(Vec::new()),
                rejection_policy: RefCell::new(Rc::new(|reason: &Reason| {
                    counter!("eddy_unhandled_rejections_total").increment(1);
                    eprintln!("eddy: unhandled promise rejection: {reason}");
                })),
            }),
        }
    }

    // --- scheduled callbacks -------------------------------------------------

    /// Appends a callback to the scheduled queue. The callback never runs
    /// synchronously, even while the loop is idle, so the call site can never
    /// observe reentrant side effects.
    pub fn schedule(&self, callback: impl FnOnce() -> Result<(), Reason> + 'static) {
        self.inner.queue.push(Box::new(callback));
    }

    /// Sets the per-tick scheduled-callback drain limit; `0` means unlimited.
    pub fn set_max_schedule_depth(&self, depth: usize) {
        self.inner.queue.set_depth(depth);
    }

    // --- readable sockets ----------------------------------------------------

    /// Registers a socket for read readiness and begins listening. Fails if
    /// the fd already has a read registration.
    ///
    /// Readiness is edge-style: the callback must read until `WouldBlock`,
    /// or pause/remove the registration, before returning. Data left
    /// buffered does not produce another notification.
    pub fn add_reader(
        &self,
        fd: RawFd,
        callback: impl Fn(RawFd) -> Result<(), Reason> + 'static,
    ) -> Result<SocketHandle, LoopError> {
        self.inner.readers.borrow_mut().add(fd, Rc::new(callback))
    }

    /// Pauses read notifications without losing the registration.
    /// `Ok(false)` if the handle is unknown or already paused. A paused
    /// registration still counts as pending work for
    /// [`is_empty`](Self::is_empty), so keep another armed event around to
    /// resume from.
    pub fn pause_reader(&self, handle: SocketHandle) -> Result<bool, LoopError> {
        self.inner.readers.borrow_mut().pause(handle)
    }

    pub fn resume_reader(&self, handle: SocketHandle) -> Result<bool, LoopError> {
        self.inner.readers.borrow_mut().resume(handle)
    }

    /// True if the registration exists and is not paused.
    pub fn reader_pending(&self, handle: SocketHandle) -> bool {
        self.inner.readers.borrow().is_pending(handle)
    }

    /// Removes a read registration. Idempotent.
    pub fn remove_reader(&self, handle: SocketHandle) -> Result<bool, LoopError> {
        self.inner.readers.borrow_mut().remove(handle)
    }

    // --- writable sockets ----------------------------------------------------

    /// Registers a socket for write readiness. Fails if the fd already has a
    /// write registration. Edge-style, like [`add_reader`](Self::add_reader):
    /// write until `WouldBlock`, or pause/remove, before returning.
    pub fn add_writer(
        &self,
        fd: RawFd,
        callback: impl Fn(RawFd) -> Result<(), Reason> + 'static,
    ) -> Result<SocketHandle, LoopError> {
        self.inner.writers.borrow_mut().add(fd, Rc::new(callback))
    }

    pub fn pause_writer(&self, handle: SocketHandle) -> Result<bool, LoopError> {
        self.inner.writers.borrow_mut().pause(handle)
    }

    pub fn resume_writer(&self, handle: SocketHandle) -> Result<bool, LoopError> {
        self.inner.writers.borrow_mut().resume(handle)
    }

    pub fn writer_pending(&self, handle: SocketHandle) -> bool {
        self.inner.writers.borrow().is_pending(handle)
    }

    pub fn remove_writer(&self, handle: SocketHandle) -> Result<bool, LoopError> {
        self.inner.writers.borrow_mut().remove(handle)
    }

    /// True if the fd is registered in either direction.
    pub fn contains_socket(&self, fd: RawFd) -> bool {
        self.inner.readers.borrow().contains(fd) || self.inner.writers.borrow().contains(fd)
    }

    /// Removes the fd from both directions. `Ok(false)` when it was not
    /// registered at all.
    pub fn remove_socket(&self, fd: RawFd) -> Result<bool, LoopError> {
        let mut removed = false;
        let reader = self.inner.readers.borrow().handle_for(fd);
        if let Some(handle) = reader {
            removed |= self.inner.readers.borrow_mut().remove(handle)?;
        }
        let writer = self.inner.writers.borrow().handle_for(fd);
        if let Some(handle) = writer {
            removed |= self.inner.writers.borrow_mut().remove(handle)?;
        }
        Ok(removed)
    }

    // --- timers and immediates ----------------------------------------------

    /// Adds a timer firing after `interval`, repeatedly when `periodic`. The
    /// callback receives the timer's own handle so it can cancel itself.
    /// Periodic intervals are clamped to a millisecond floor so repeated
    /// firings always make forward progress.
    pub fn add_timer(
        &self,
        interval: Duration,
        periodic: bool,
        callback: impl Fn(TimerHandle) -> Result<(), Reason> + 'static,
    ) -> TimerHandle {
        self.inner
            .timers
            .borrow_mut()
            .add(interval, periodic, Rc::new(callback))
    }

    /// Cancels a timer. `false` if it was not active.
    pub fn cancel_timer(&self, handle: TimerHandle) -> bool {
        self.inner.timers.borrow_mut().cancel(handle)
    }

    pub fn timer_active(&self, handle: TimerHandle) -> bool {
        self.inner.timers.borrow().is_active(handle)
    }

    /// Adds a one-shot, zero-delay callback, tracked distinctly from timers.
    pub fn add_immediate(
        &self,
        callback: impl FnOnce() -> Result<(), Reason> + 'static,
    ) -> ImmediateHandle {
        self.inner.timers.borrow_mut().add_immediate(Box::new(callback))
    }

    pub fn cancel_immediate(&self, handle: ImmediateHandle) -> bool {
        self.inner.timers.borrow_mut().cancel_immediate(handle)
    }

    pub fn immediate_pending(&self, handle: ImmediateHandle) -> bool {
        self.inner.timers.borrow().is_immediate_pending(handle)
    }

    // --- signals -------------------------------------------------------------

    /// Registers a handler for an OS signal. Multiple handlers per signal
    /// coexist; each is independently removable.
    pub fn add_signal(
        &self,
        signum: i32,
        callback: impl Fn(i32) -> Result<(), Reason> + 'static,
    ) -> Result<SignalHandle, LoopError> {
        if !self.inner.signals_enabled {
            return Err(LoopError::SignalsDisabled);
        }
        self.inner.signals.borrow_mut().add(signum, Rc::new(callback))
    }

    /// Removes a signal handler; the backend event is disarmed when the last
    /// handler for that signal goes. `Ok(false)` if the handle is unknown.
    pub fn remove_signal(&self, handle: SignalHandle) -> Result<bool, LoopError> {
        self.inner.signals.borrow_mut().remove(handle)
    }

    // --- lifecycle and policy ------------------------------------------------

    /// Registers a hook notified when `run()` starts and stops.
    pub fn on_lifecycle(&self, hook: impl FnMut(LoopEvent) + 'static) {
        self.inner.lifecycle.borrow_mut().push(Box::new(hook));
    }

    /// Replaces the unhandled-rejection policy. The default logs to stderr
    /// and bumps a counter; it never terminates the process.
    pub fn on_unhandled_rejection(&self, policy: impl Fn(&Reason) + 'static) {
        *self.inner.rejection_policy.borrow_mut() = Rc::new(policy);
    }

    /// Requests the loop to stop; takes effect once the current tick
    /// completes. An in-flight dispatch is never interrupted.
    pub fn stop(&self) {
        self.inner.running.set(false);
        self.inner.stop_requested.set(true);
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.get()
    }

    /// True when nothing is pending anywhere: no scheduled callbacks, no
    /// socket registrations (paused ones included), no timers, no immediates,
    /// and no signal handlers. `run()` returns when this becomes true.
    pub fn is_empty(&self) -> bool {
        self.inner.queue.is_empty()
            && self.inner.readers.borrow().is_empty()
            && self.inner.writers.borrow().is_empty()
            && self.inner.timers.borrow().is_empty()
            && self.inner.signals.borrow().is_empty()
    }

    /// Removes every registration and empties the scheduled queue. The loop
    /// remains usable afterward.
    pub fn clear(&self) -> Result<(), LoopError> {
        self.inner.queue.clear();
        let mut first_err = None;
        if let Err(e) = self.inner.readers.borrow_mut().clear() {
            first_err.get_or_insert(e);
        }
        if let Err(e) = self.inner.writers.borrow_mut().clear() {
            first_err.get_or_insert(e);
        }
        self.inner.timers.borrow_mut().clear();
        if let Err(e) = self.inner.signals.borrow_mut().clear() {
            first_err.get_or_insert(e);
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // --- crate-internal plumbing ---------------------------------------------

    pub(crate) fn set_running(&self, running: bool) {
        self.inner.running.set(running);
        if running {
            self.inner.stop_requested.set(false);
        }
    }

    /// Consumes a pending stop request. A tick observing one must not block.
    pub(crate) fn take_stop_request(&self) -> bool {
        self.inner.stop_requested.replace(false)
    }

    pub(crate) fn drain_scheduled(&self) -> Result<(), LoopError> {
        self.inner.queue.drain()
    }

    pub(crate) fn scheduled_is_empty(&self) -> bool {
        self.inner.queue.is_empty()
    }

    pub(crate) fn emit(&self, event: LoopEvent) {
        // Swap the hooks out so one may register another without deadlocking
        // the cell.
        let mut hooks = std::mem::take(&mut *self.inner.lifecycle.borrow_mut());
        for hook in hooks.iter_mut() {
            hook(event);
        }
        let mut current = self.inner.lifecycle.borrow_mut();
        hooks.append(&mut current);
        *current = hooks;
    }

    pub(crate) fn report_unhandled(&self, reason: &Reason) {
        let policy = self.inner.rejection_policy.borrow().clone();
        policy(reason);
    }

    pub(crate) fn fire_socket(&self, fd: RawFd, dir: Direction) -> Result<(), LoopError> {
        let manager = match dir {
            Direction::Read => &self.inner.readers,
            Direction::Write => &self.inner.writers,
        };
        let callback = manager.borrow().pending_callback(fd);
        if let Some(callback) = callback {
            callback(fd).map_err(LoopError::Callback)?;
        }
        Ok(())
    }

    pub(crate) fn fire_signal(&self, signum: i32) -> Result<(), LoopError> {
        let callbacks = self.inner.signals.borrow().callbacks_for(signum);
        for callback in callbacks {
            counter!("eddy_signals_fired_total").increment(1);
            callback(signum).map_err(LoopError::Callback)?;
        }
        Ok(())
    }

    pub(crate) fn fire_due_timers(&self, now: Instant) -> Result<(), LoopError> {
        loop {
            // One timer per borrow: the callback may add or cancel timers.
            let due = self.inner.timers.borrow_mut().take_due(now);
            match due {
                Some((handle, callback)) => {
                    counter!("eddy_timers_fired_total").increment(1);
                    callback(handle).map_err(LoopError::Callback)?;
                }
                None => return Ok(()),
            }
        }
    }

    pub(crate) fn fire_immediates(&self) -> Result<(), LoopError> {
        // Immediates added while firing run on the next dispatch pass.
        let mut budget = self.inner.timers.borrow().immediate_backlog();
        while budget > 0 {
            budget -= 1;
            let next = self.inner.timers.borrow_mut().take_immediate();
            match next {
                Some((_, callback)) => callback().map_err(LoopError::Callback)?,
                None => break,
            }
        }
        Ok(())
    }
}
