//! Timer and immediate tracking.
//!
//! Active timers live in a dense arena; due ordering comes from a
//! lazy-deletion binary heap keyed by `(deadline, seq)`, so timers with equal
//! deadlines fire in insertion order. Cancellation only removes the arena
//! record; stale heap keys are skipped when popped. Handles are
//! generation-stamped, so a handle left over from a fired or cancelled timer
//! never acts on the reused slot. Immediates are one-shot zero-delay
//! callbacks kept in their own FIFO table so their pending state can be
//! queried independently of general timer state.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::rc::Rc;
use std::time::{Duration, Instant};

use slab::Slab;

use crate::backend::EventFactory;
use crate::manager::{ImmediateCallback, ImmediateHandle, TimerCallback, TimerHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct TimerKey {
    deadline: Instant,
    seq: u64,
    slot: usize,
}

/// Floor for periodic intervals. A zero-interval periodic timer would
/// reinsert itself at a deadline that never passes `now`, keeping a single
/// dispatch pass firing it forever.
const MIN_PERIODIC_INTERVAL: Duration = Duration::from_millis(1);

struct TimerRecord {
    interval: Duration,
    periodic: bool,
    deadline: Instant,
    seq: u64,
    gen: u64,
    callback: TimerCallback,
}

pub(crate) struct TimerManager {
    records: Slab<TimerRecord>,
    heap: BinaryHeap<Reverse<TimerKey>>,
    next_seq: u64,
    immediates: Slab<(u64, ImmediateCallback)>,
    immediate_order: VecDeque<(usize, u64)>,
    factory: Rc<dyn EventFactory>,
}

impl TimerManager {
    pub(crate) fn new(factory: Rc<dyn EventFactory>) -> Self {
        Self {
            records: Slab::new(),
            heap: BinaryHeap::new(),
            next_seq: 0,
            immediates: Slab::new(),
            immediate_order: VecDeque::new(),
            factory,
        }
    }

    fn seq(&mut self) -> u64 {
        let s = self.next_seq;
        self.next_seq += 1;
        s
    }

    /// Inserts a timer keyed by its next fire time and re-arms the backend if
    /// it is now the soonest. Periodic intervals are clamped to
    /// [`MIN_PERIODIC_INTERVAL`] so every firing strictly advances the
    /// deadline.
    pub(crate) fn add(&mut self, interval: Duration, periodic: bool, callback: TimerCallback) -> TimerHandle {
        let interval = if periodic {
            interval.max(MIN_PERIODIC_INTERVAL)
        } else {
            interval
        };
        let seq = self.seq();
        let gen = self.seq();
        let deadline = Instant::now() + interval;
        let slot = self.records.insert(TimerRecord {
            interval,
            periodic,
            deadline,
            seq,
            gen,
            callback,
        });
        self.heap.push(Reverse(TimerKey { deadline, seq, slot }));
        self.rearm_backend();
        TimerHandle { slot, gen }
    }

    /// Removes a timer; the heap entry goes stale and is skipped later.
    /// `false` if the timer was not active, including a stale handle whose
    /// slot was reused by a newer timer.
    pub(crate) fn cancel(&mut self, handle: TimerHandle) -> bool {
        let live = self
            .records
            .get(handle.slot)
            .map(|rec| rec.gen == handle.gen)
            .unwrap_or(false);
        if !live {
            return false;
        }
        self.records.remove(handle.slot);
        self.rearm_backend();
        true
    }

    pub(crate) fn is_active(&self, handle: TimerHandle) -> bool {
        self.records
            .get(handle.slot)
            .map(|rec| rec.gen == handle.gen)
            .unwrap_or(false)
    }

    /// Pops the next timer due at or before `now`, advancing periodic timers
    /// to `fire_time + interval` and removing one-shots. Returns `None` once
    /// nothing else is due.
    pub(crate) fn take_due(&mut self, now: Instant) -> Option<(TimerHandle, TimerCallback)> {
        loop {
            let key = match self.heap.peek() {
                Some(Reverse(key)) => *key,
                None => {
                    self.factory.disarm_timer();
                    return None;
                }
            };
            if key.deadline > now {
                self.rearm_backend();
                return None;
            }
            self.heap.pop();

            match self.records.get_mut(key.slot) {
                Some(rec) if rec.seq == key.seq => {
                    let callback = rec.callback.clone();
                    let gen = rec.gen;
                    if rec.periodic {
                        rec.deadline = key.deadline + rec.interval;
                        rec.seq = {
                            let s = self.next_seq;
                            self.next_seq += 1;
                            s
                        };
                        let rearmed = TimerKey {
                            deadline: rec.deadline,
                            seq: rec.seq,
                            slot: key.slot,
                        };
                        self.heap.push(Reverse(rearmed));
                    } else {
                        self.records.remove(key.slot);
                    }
                    self.rearm_backend();
                    return Some((TimerHandle { slot: key.slot, gen }, callback));
                }
                // Cancelled or reinserted since this key was pushed.
                _ => continue,
            }
        }
    }

    /// Arms the backend for the earliest live deadline, discarding stale heap
    /// keys on the way, or disarms it when no timers remain.
    fn rearm_backend(&mut self) {
        while let Some(Reverse(key)) = self.heap.peek().copied() {
            let live = self
                .records
                .get(key.slot)
                .map(|rec| rec.seq == key.seq)
                .unwrap_or(false);
            if live {
                self.factory.arm_timer(key.deadline);
                return;
            }
            self.heap.pop();
        }
        self.factory.disarm_timer();
    }

    /// Adds a one-shot, zero-delay callback tracked separately from timers.
    pub(crate) fn add_immediate(&mut self, callback: ImmediateCallback) -> ImmediateHandle {
        let gen = self.seq();
        let slot = self.immediates.insert((gen, callback));
        self.immediate_order.push_back((slot, gen));
        self.factory.set_immediate_pending(true);
        ImmediateHandle { slot, gen }
    }

    /// `false` if the immediate already ran, was cancelled, or the handle is
    /// stale.
    pub(crate) fn cancel_immediate(&mut self, handle: ImmediateHandle) -> bool {
        let live = self
            .immediates
            .get(handle.slot)
            .map(|(gen, _)| *gen == handle.gen)
            .unwrap_or(false);
        if !live {
            return false;
        }
        self.immediates.remove(handle.slot);
        if self.immediates.is_empty() {
            self.factory.set_immediate_pending(false);
        }
        true
    }

    pub(crate) fn is_immediate_pending(&self, handle: ImmediateHandle) -> bool {
        self.immediates
            .get(handle.slot)
            .map(|(gen, _)| *gen == handle.gen)
            .unwrap_or(false)
    }

    /// Upper bound on immediates pending at the start of a dispatch pass.
    pub(crate) fn immediate_backlog(&self) -> usize {
        self.immediate_order.len()
    }

    /// Pops the oldest pending immediate in FIFO order. Order entries whose
    /// immediate was cancelled are skipped, generation included, so a reused
    /// slot is never drained by a stale entry.
    pub(crate) fn take_immediate(&mut self) -> Option<(ImmediateHandle, ImmediateCallback)> {
        while let Some((slot, gen)) = self.immediate_order.pop_front() {
            let live = self
                .immediates
                .get(slot)
                .map(|(g, _)| *g == gen)
                .unwrap_or(false);
            if !live {
                continue;
            }
            let (gen, callback) = self.immediates.remove(slot);
            if self.immediates.is_empty() {
                self.factory.set_immediate_pending(false);
            }
            return Some((ImmediateHandle { slot, gen }, callback));
        }
        None
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.records.is_empty() && self.immediates.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.records.clear();
        self.heap.clear();
        self.immediates.clear();
        self.immediate_order.clear();
        self.factory.disarm_timer();
        self.factory.set_immediate_pending(false);
    }
}
