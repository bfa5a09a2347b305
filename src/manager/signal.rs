//! Signal handler registration.
//!
//! Multiple handlers may coexist per signal number; the backend event is
//! armed when the first handler for a signal is added and disarmed only when
//! the last one is removed.

use std::collections::HashMap;
use std::rc::Rc;

use slab::Slab;

use crate::backend::EventFactory;
use crate::error::LoopError;
use crate::manager::{SignalCallback, SignalHandle};

struct SignalRecord {
    signum: i32,
    gen: u64,
    callback: SignalCallback,
}

pub(crate) struct SignalManager {
    records: Slab<SignalRecord>,
    by_signum: HashMap<i32, Vec<usize>>,
    next_gen: u64,
    factory: Rc<dyn EventFactory>,
}

impl SignalManager {
    pub(crate) fn new(factory: Rc<dyn EventFactory>) -> Self {
        Self {
            records: Slab::new(),
            by_signum: HashMap::new(),
            next_gen: 0,
            factory,
        }
    }

    pub(crate) fn add(&mut self, signum: i32, callback: SignalCallback) -> Result<SignalHandle, LoopError> {
        if !self.by_signum.contains_key(&signum) {
            self.factory.arm_signal(signum)?;
        }
        let gen = self.next_gen;
        self.next_gen += 1;
        let slot = self.records.insert(SignalRecord {
            signum,
            gen,
            callback,
        });
        self.by_signum.entry(signum).or_default().push(slot);
        Ok(SignalHandle { slot, gen })
    }

    /// `Ok(false)` if the handle is unknown or stale (its slot was reused by
    /// a later registration). Disarms the backend event when the last handler
    /// for the signal goes.
    pub(crate) fn remove(&mut self, handle: SignalHandle) -> Result<bool, LoopError> {
        let live = self
            .records
            .get(handle.slot)
            .map(|rec| rec.gen == handle.gen)
            .unwrap_or(false);
        if !live {
            return Ok(false);
        }
        let rec = self.records.remove(handle.slot);
        if let Some(slots) = self.by_signum.get_mut(&rec.signum) {
            slots.retain(|slot| *slot != handle.slot);
            if slots.is_empty() {
                self.by_signum.remove(&rec.signum);
                self.factory.disarm_signal(rec.signum)?;
            }
        }
        Ok(true)
    }

    /// Handlers registered for `signum`, cloned out so no borrow is held
    /// while they run.
    pub(crate) fn callbacks_for(&self, signum: i32) -> Vec<SignalCallback> {
        self.by_signum
            .get(&signum)
            .map(|slots| {
                slots
                    .iter()
                    .filter_map(|slot| self.records.get(*slot))
                    .map(|rec| rec.callback.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub(crate) fn clear(&mut self) -> Result<(), LoopError> {
        let mut first_err = None;
        for signum in self.by_signum.keys().copied().collect::<Vec<_>>() {
            if let Err(e) = self.factory.disarm_signal(signum) {
                first_err.get_or_insert(e);
            }
        }
        self.records.clear();
        self.by_signum.clear();
        match first_err {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}
