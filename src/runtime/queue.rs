//! FIFO queue of explicitly scheduled callbacks.
//!
//! Insertion order is the execution order contract. Draining is bounded per
//! tick by a configurable depth so scheduled work cannot starve I/O.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

use metrics::{counter, gauge};

use crate::error::{LoopError, Reason};

type Scheduled = Box<dyn FnOnce() -> Result<(), Reason>>;

pub(crate) struct ScheduleQueue {
    queue: RefCell<VecDeque<Scheduled>>,
    /// Maximum callbacks drained per tick; 0 means unlimited.
    depth: Cell<usize>,
}

impl ScheduleQueue {
    pub(crate) fn new(depth: usize) -> Self {
        Self {
            queue: RefCell::new(VecDeque::new()),
            depth: Cell::new(depth),
        }
    }

    /// Appends a callback. Never executes anything synchronously.
    pub(crate) fn push(&self, callback: Scheduled) {
        self.queue.borrow_mut().push_back(callback);
        counter!("eddy_scheduled_total").increment(1);
        gauge!("eddy_scheduled_pending").increment(1.0);
    }

    pub(crate) fn set_depth(&self, depth: usize) {
        self.depth.set(depth);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }

    /// Drains up to `depth` callbacks in FIFO order. Callbacks scheduled
    /// while draining join the same queue and run in this tick if the budget
    /// allows. The first failing callback aborts the drain.
    pub(crate) fn drain(&self) -> Result<(), LoopError> {
        let limit = match self.depth.get() {
            0 => usize::MAX,
            n => n,
        };
        for _ in 0..limit {
            // Borrow ends before the callback runs so it may schedule more.
            let next = self.queue.borrow_mut().pop_front();
            let callback = match next {
                Some(callback) => callback,
                None => break,
            };
            gauge!("eddy_scheduled_pending").decrement(1.0);
            callback().map_err(LoopError::Callback)?;
        }
        Ok(())
    }

    pub(crate) fn clear(&self) {
        let mut queue = self.queue.borrow_mut();
        gauge!("eddy_scheduled_pending").decrement(queue.len() as f64);
        queue.clear();
    }
}
