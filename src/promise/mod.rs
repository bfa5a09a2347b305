//! The promise resolution engine.
//!
//! A [`Promise`] is a tri-state value: pending, fulfilled, or rejected.
//! Settlement is terminal and idempotent, and the rejection payload is a
//! first-class [`Reason`] value, never an unwind. The central ordering
//! guarantee: every continuation runs through the loop's scheduled-callback
//! queue, whether it was registered before or after settlement, so control
//! never re-enters user code from inside `then` itself.
//!
//! Settled values must be `Clone + 'static` and `Promise` itself is not
//! `Clone`, which rules out a promise as a settlement value at compile time.
//! Resolving with another promise is expressed as [`Resolution::Follow`],
//! which defers the outer settlement until the inner promise settles and then
//! mirrors it, recursively for nested adoption.
//!
//! # Usage
//!
//! ```ignore
//! let (deferred, promise) = Deferred::new(&handle);
//! promise
//!     .then(|n: u32| Resolution::Fulfill(n * 2))
//!     .done(|n| {
//!         println!("doubled: {n}");
//!         Ok(())
//!     });
//! deferred.fulfill(21);
//! lp.run()?; // prints "doubled: 42"
//! ```

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use crate::error::Reason;
use crate::runtime::Handle;

/// Outcome of a continuation handler.
pub enum Resolution<T: Clone + 'static> {
    /// Settle fulfilled with a plain value.
    Fulfill(T),
    /// Settle rejected with a reason.
    Reject(Reason),
    /// Adopt another promise: settle when it settles, mirroring its result.
    Follow(Promise<T>),
}

type Waiter<T> = Box<dyn FnOnce(&Handle, Result<T, Reason>) -> Result<(), Reason>>;

enum State<T> {
    Pending(Vec<Waiter<T>>),
    Settled(Result<T, Reason>),
}

struct Inner<T> {
    state: RefCell<State<T>>,
    /// Set once the first resolution is accepted, including a `Follow` whose
    /// inner promise has not settled yet; later resolutions are no-ops.
    resolved: Cell<bool>,
    /// Cancellation hook run when the last user handle is dropped while the
    /// promise is pending with no registered continuation.
    on_abandon: RefCell<Option<Box<dyn FnOnce()>>>,
}

fn pending_cell<T: Clone + 'static>(handle: &Handle) -> (Rc<Inner<T>>, Promise<T>) {
    let cell = Rc::new(Inner {
        state: RefCell::new(State::Pending(Vec::new())),
        resolved: Cell::new(false),
        on_abandon: RefCell::new(None),
    });
    (
        cell.clone(),
        Promise {
            cell,
            handle: handle.clone(),
        },
    )
}

/// Registers a continuation. On a pending promise it waits for settlement;
/// on a settled one it is scheduled through the loop, never invoked inline.
fn register<T: Clone + 'static>(cell: &Rc<Inner<T>>, handle: &Handle, waiter: Waiter<T>) {
    let mut state = cell.state.borrow_mut();
    match &mut *state {
        State::Pending(waiters) => waiters.push(waiter),
        State::Settled(result) => {
            let result = result.clone();
            drop(state);
            let h = handle.clone();
            handle.schedule(move || waiter(&h, result));
        }
    }
}

/// Terminal, idempotent settlement. Waiters are handed to the scheduled
/// queue; `false` if the promise was already settled.
fn settle<T: Clone + 'static>(cell: &Rc<Inner<T>>, handle: &Handle, result: Result<T, Reason>) -> bool {
    let waiters = {
        let mut state = cell.state.borrow_mut();
        match &mut *state {
            State::Settled(_) => return false,
            State::Pending(waiters) => {
                let taken = std::mem::take(waiters);
                *state = State::Settled(result.clone());
                taken
            }
        }
    };
    cell.resolved.set(true);
    // Settled promises can no longer be abandoned.
    cell.on_abandon.borrow_mut().take();
    for waiter in waiters {
        let result = result.clone();
        let h = handle.clone();
        handle.schedule(move || waiter(&h, result));
    }
    true
}

/// Applies a handler's [`Resolution`]. The first resolution wins; a `Follow`
/// claims the promise immediately even though settlement waits for the inner
/// promise.
fn resolve<T: Clone + 'static>(cell: &Rc<Inner<T>>, handle: &Handle, resolution: Resolution<T>) -> bool {
    if cell.resolved.get() {
        return false;
    }
    match resolution {
        Resolution::Fulfill(value) => settle(cell, handle, Ok(value)),
        Resolution::Reject(reason) => settle(cell, handle, Err(reason)),
        Resolution::Follow(inner) => {
            cell.resolved.set(true);
            let outer = cell.clone();
            register(
                &inner.cell,
                handle,
                Box::new(move |h, result| {
                    settle(&outer, h, result);
                    Ok(())
                }),
            );
            true
        }
    }
}

/// A future value settled through the event loop.
///
/// Not `Clone`: a promise has one owner, and continuations are the way to
/// share its eventual result. Dropping a pending promise with no registered
/// continuation counts as abandonment and runs its cancellation hook, which
/// is how [`delay`](Promise::delay) propagates cancellation to its timer.
pub struct Promise<T: Clone + 'static> {
    cell: Rc<Inner<T>>,
    handle: Handle,
}

impl<T: Clone + 'static> Promise<T> {
    /// An already-fulfilled promise. Continuations still run asynchronously
    /// through the loop.
    pub fn fulfilled(handle: &Handle, value: T) -> Self {
        let (cell, promise) = pending_cell(handle);
        settle(&cell, handle, Ok(value));
        promise
    }

    /// An already-rejected promise.
    pub fn rejected(handle: &Handle, reason: Reason) -> Self {
        let (cell, promise) = pending_cell(handle);
        settle(&cell, handle, Err(reason));
        promise
    }

    pub fn is_pending(&self) -> bool {
        matches!(&*self.cell.state.borrow(), State::Pending(_))
    }

    pub fn is_fulfilled(&self) -> bool {
        matches!(&*self.cell.state.borrow(), State::Settled(Ok(_)))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(&*self.cell.state.borrow(), State::Settled(Err(_)))
    }

    /// The settled result.
    ///
    /// # Panics
    ///
    /// Panics on a pending promise; reading an unsettled result is a contract
    /// violation, not a recoverable condition.
    pub fn result(&self) -> Result<T, Reason> {
        match &*self.cell.state.borrow() {
            State::Settled(result) => result.clone(),
            State::Pending(_) => panic!("Promise::result called before settlement"),
        }
    }

    /// Chains a fulfillment handler. Rejection passes through to the
    /// returned promise unchanged.
    pub fn then<U, F>(&self, on_fulfilled: F) -> Promise<U>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Resolution<U> + 'static,
    {
        let (out, promise) = pending_cell(&self.handle);
        register(
            &self.cell,
            &self.handle,
            Box::new(move |h, result| {
                match result {
                    Ok(value) => {
                        resolve(&out, h, on_fulfilled(value));
                    }
                    Err(reason) => {
                        settle(&out, h, Err(reason));
                    }
                }
                Ok(())
            }),
        );
        promise
    }

    /// Chains a rejection handler. Fulfillment passes through unchanged.
    pub fn catch<F>(&self, on_rejected: F) -> Promise<T>
    where
        F: FnOnce(Reason) -> Resolution<T> + 'static,
    {
        let (out, promise) = pending_cell(&self.handle);
        register(
            &self.cell,
            &self.handle,
            Box::new(move |h, result| {
                match result {
                    Ok(value) => {
                        settle(&out, h, Ok(value));
                    }
                    Err(reason) => {
                        resolve(&out, h, on_rejected(reason));
                    }
                }
                Ok(())
            }),
        );
        promise
    }

    /// Chains handlers for both outcomes.
    pub fn then_or_else<U, F, G>(&self, on_fulfilled: F, on_rejected: G) -> Promise<U>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Resolution<U> + 'static,
        G: FnOnce(Reason) -> Resolution<U> + 'static,
    {
        let (out, promise) = pending_cell(&self.handle);
        register(
            &self.cell,
            &self.handle,
            Box::new(move |h, result| {
                let resolution = match result {
                    Ok(value) => on_fulfilled(value),
                    Err(reason) => on_rejected(reason),
                };
                resolve(&out, h, resolution);
                Ok(())
            }),
        );
        promise
    }

    /// Terminal consumption with no returned promise. A rejection is routed
    /// to the loop's unhandled-rejection policy, never silently swallowed.
    pub fn done<F>(self, on_fulfilled: F)
    where
        F: FnOnce(T) -> Result<(), Reason> + 'static,
    {
        register(
            &self.cell,
            &self.handle,
            Box::new(move |h, result| match result {
                Ok(value) => on_fulfilled(value),
                Err(reason) => {
                    h.report_unhandled(&reason);
                    Ok(())
                }
            }),
        );
    }

    /// Terminal consumption handling both outcomes.
    pub fn done_or_else<F, G>(self, on_fulfilled: F, on_rejected: G)
    where
        F: FnOnce(T) -> Result<(), Reason> + 'static,
        G: FnOnce(Reason) -> Result<(), Reason> + 'static,
    {
        register(
            &self.cell,
            &self.handle,
            Box::new(move |_, result| match result {
                Ok(value) => on_fulfilled(value),
                Err(reason) => on_rejected(reason),
            }),
        );
    }

    /// Returns a promise fulfilling with the same value after `time`, backed
    /// by a one-shot timer. Abandoning the returned promise before the delay
    /// elapses cancels the timer, so no orphaned callback ever runs.
    /// Rejection is not delayed.
    pub fn delay(self, time: Duration) -> Promise<T> {
        let (out, promise) = pending_cell(&self.handle);
        let timer_slot = Rc::new(Cell::new(None));
        let cancelled = Rc::new(Cell::new(false));

        {
            let handle = self.handle.clone();
            let timer_slot = timer_slot.clone();
            let cancelled = cancelled.clone();
            *out.on_abandon.borrow_mut() = Some(Box::new(move || {
                cancelled.set(true);
                if let Some(timer) = timer_slot.take() {
                    handle.cancel_timer(timer);
                }
            }));
        }

        let target = out.clone();
        register(
            &self.cell,
            &self.handle,
            Box::new(move |h, result| {
                match result {
                    Err(reason) => {
                        settle(&target, h, Err(reason));
                    }
                    Ok(value) => {
                        if cancelled.get() {
                            return Ok(());
                        }
                        let settled = target.clone();
                        let h2 = h.clone();
                        let timer = h.add_timer(time, false, move |_| {
                            settle(&settled, &h2, Ok(value.clone()));
                            Ok(())
                        });
                        timer_slot.set(Some(timer));
                    }
                }
                Ok(())
            }),
        );
        promise
    }
}

impl<T: Clone + 'static> Drop for Promise<T> {
    fn drop(&mut self) {
        // Abandonment: still pending and nobody registered interest.
        let abandoned = matches!(
            &*self.cell.state.borrow(),
            State::Pending(waiters) if waiters.is_empty()
        );
        if abandoned {
            if let Some(hook) = self.cell.on_abandon.borrow_mut().take() {
                hook();
            }
        }
    }
}

/// The resolving side of a promise pair.
///
/// Dropping a deferred without settling leaves its promise pending forever;
/// registered continuations simply never run.
pub struct Deferred<T: Clone + 'static> {
    cell: Rc<Inner<T>>,
    handle: Handle,
}

impl<T: Clone + 'static> Deferred<T> {
    /// Creates a pending promise and its resolver.
    pub fn new(handle: &Handle) -> (Deferred<T>, Promise<T>) {
        let (cell, promise) = pending_cell(handle);
        (
            Deferred {
                cell,
                handle: handle.clone(),
            },
            promise,
        )
    }

    /// Settles fulfilled. `false` if a resolution was already accepted.
    pub fn fulfill(&self, value: T) -> bool {
        resolve(&self.cell, &self.handle, Resolution::Fulfill(value))
    }

    /// Settles rejected. `false` if a resolution was already accepted.
    pub fn reject(&self, reason: Reason) -> bool {
        resolve(&self.cell, &self.handle, Resolution::Reject(reason))
    }

    /// Applies any [`Resolution`], including adoption via `Follow`.
    pub fn resolve(&self, resolution: Resolution<T>) -> bool {
        resolve(&self.cell, &self.handle, resolution)
    }
}
