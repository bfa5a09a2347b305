//! Socket registration for one readiness direction.
//!
//! "Registered" and "armed" are separate states: pausing a socket disarms the
//! backend event but keeps the record, so a consumer that is not ready to
//! accept data does not lose its registration. Readiness delivery semantics
//! (edge- vs level-triggered) belong to the backend; see the mio backend
//! docs for its drain-until-`WouldBlock` requirement.

use std::collections::HashMap;
use std::os::fd::RawFd;
use std::rc::Rc;

use slab::Slab;

use crate::backend::EventFactory;
use crate::error::LoopError;
use crate::manager::{Direction, ReadyCallback, SocketHandle};

struct SocketRecord {
    fd: RawFd,
    gen: u64,
    paused: bool,
    callback: ReadyCallback,
}

pub(crate) struct SocketManager {
    dir: Direction,
    records: Slab<SocketRecord>,
    by_fd: HashMap<RawFd, usize>,
    next_gen: u64,
    factory: Rc<dyn EventFactory>,
}

impl SocketManager {
    pub(crate) fn new(dir: Direction, factory: Rc<dyn EventFactory>) -> Self {
        Self {
            dir,
            records: Slab::new(),
            by_fd: HashMap::new(),
            next_gen: 0,
            factory,
        }
    }

    /// The record for a handle, or `None` when the handle is stale: a reused
    /// arena slot carries a newer generation.
    fn live(&mut self, handle: SocketHandle) -> Option<&mut SocketRecord> {
        self.records
            .get_mut(handle.slot)
            .filter(|rec| rec.gen == handle.gen)
    }

    /// Registers a socket and arms the backend event. At most one
    /// registration per fd and direction.
    pub(crate) fn add(&mut self, fd: RawFd, callback: ReadyCallback) -> Result<SocketHandle, LoopError> {
        if self.by_fd.contains_key(&fd) {
            return Err(LoopError::AlreadyRegistered { fd, dir: self.dir });
        }
        self.factory.arm_socket(fd, self.dir)?;
        let gen = self.next_gen;
        self.next_gen += 1;
        let slot = self.records.insert(SocketRecord {
            fd,
            gen,
            paused: false,
            callback,
        });
        self.by_fd.insert(fd, slot);
        Ok(SocketHandle { slot, gen })
    }

    /// Disarms the backend event but keeps the registration record.
    /// `Ok(false)` if the handle is unknown or already paused.
    pub(crate) fn pause(&mut self, handle: SocketHandle) -> Result<bool, LoopError> {
        let dir = self.dir;
        let factory = self.factory.clone();
        match self.live(handle) {
            Some(rec) if !rec.paused => {
                factory.disarm_socket(rec.fd, dir)?;
                rec.paused = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Re-arms a paused registration. `Ok(false)` if unknown or not paused.
    pub(crate) fn resume(&mut self, handle: SocketHandle) -> Result<bool, LoopError> {
        let dir = self.dir;
        let factory = self.factory.clone();
        match self.live(handle) {
            Some(rec) if rec.paused => {
                factory.arm_socket(rec.fd, dir)?;
                rec.paused = false;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// True if the socket is registered and not paused.
    pub(crate) fn is_pending(&self, handle: SocketHandle) -> bool {
        self.records
            .get(handle.slot)
            .map(|rec| rec.gen == handle.gen && !rec.paused)
            .unwrap_or(false)
    }

    /// Deregisters and disarms. Idempotent: `Ok(false)` when nothing was
    /// registered.
    pub(crate) fn remove(&mut self, handle: SocketHandle) -> Result<bool, LoopError> {
        if self.live(handle).is_none() {
            return Ok(false);
        }
        let rec = self.records.remove(handle.slot);
        self.by_fd.remove(&rec.fd);
        if !rec.paused {
            self.factory.disarm_socket(rec.fd, self.dir)?;
        }
        Ok(true)
    }

    pub(crate) fn handle_for(&self, fd: RawFd) -> Option<SocketHandle> {
        let slot = *self.by_fd.get(&fd)?;
        let rec = self.records.get(slot)?;
        Some(SocketHandle { slot, gen: rec.gen })
    }

    pub(crate) fn contains(&self, fd: RawFd) -> bool {
        self.by_fd.contains_key(&fd)
    }

    /// Callback for a readiness report, or `None` if the fd is unregistered
    /// or paused. Cloned out so no borrow is held while it runs.
    pub(crate) fn pending_callback(&self, fd: RawFd) -> Option<ReadyCallback> {
        let slot = self.by_fd.get(&fd)?;
        let rec = self.records.get(*slot)?;
        if rec.paused {
            return None;
        }
        Some(rec.callback.clone())
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drops every registration, disarming armed events.
    pub(crate) fn clear(&mut self) -> Result<(), LoopError> {
        let mut first_err = None;
        for (_, rec) in self.records.iter() {
            if !rec.paused {
                if let Err(e) = self.factory.disarm_socket(rec.fd, self.dir) {
                    first_err.get_or_insert(e);
                }
            }
        }
        self.records.clear();
        self.by_fd.clear();
        match first_err {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}
