//! mio-backed concrete backend.
//!
//! Socket readiness goes through a `mio::Poll`; fds are registered as
//! [`SourceFd`] sources with a token drawn from a dense arena. Timers do not
//! exist natively in mio, so the factory tracks the earliest armed deadline
//! and dispatch folds it into the poll timeout. Signals use the self-pipe
//! pattern: `signal-hook` writes a byte into a socketpair whose read end is
//! polled like any other fd.
//!
//! mio registrations are edge-triggered. A readiness callback that leaves
//! data buffered without reading to `WouldBlock` is not re-notified; see
//! [`Handle::add_reader`](crate::Handle::add_reader).

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::io::{self, Read};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::rc::Rc;
use std::time::{Duration, Instant};

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Registry, Token};
use signal_hook::low_level;
use signal_hook::SigId;
use slab::Slab;

use crate::backend::{Backend, DispatchCtx, EventFactory};
use crate::error::LoopError;
use crate::manager::Direction;

enum Entry {
    Socket { fd: RawFd, read: bool, write: bool },
    Signal { signum: i32, pipe: UnixStream, sig_id: SigId },
}

/// Registration table shared between the backend and the managers.
pub struct MioFactory {
    registry: RefCell<Registry>,
    entries: RefCell<Slab<Entry>>,
    by_fd: RefCell<HashMap<RawFd, usize>>,
    by_signal: RefCell<HashMap<i32, usize>>,
    deadline: Cell<Option<Instant>>,
    immediate: Cell<bool>,
}

fn interests(read: bool, write: bool) -> Interest {
    match (read, write) {
        (true, true) => Interest::READABLE | Interest::WRITABLE,
        (false, true) => Interest::WRITABLE,
        // Registrations always carry at least one direction.
        _ => Interest::READABLE,
    }
}

impl EventFactory for MioFactory {
    fn arm_socket(&self, fd: RawFd, dir: Direction) -> io::Result<()> {
        let mut entries = self.entries.borrow_mut();
        let mut by_fd = self.by_fd.borrow_mut();
        let registry = self.registry.borrow();

        if let Some(&token) = by_fd.get(&fd) {
            if let Some(Entry::Socket { read, write, .. }) = entries.get_mut(token) {
                match dir {
                    Direction::Read => *read = true,
                    Direction::Write => *write = true,
                }
                let interest = interests(*read, *write);
                return registry.reregister(&mut SourceFd(&fd), Token(token), interest);
            }
        }

        let (read, write) = (dir == Direction::Read, dir == Direction::Write);
        let token = entries.insert(Entry::Socket { fd, read, write });
        by_fd.insert(fd, token);
        let result = registry.register(&mut SourceFd(&fd), Token(token), interests(read, write));
        if result.is_err() {
            entries.remove(token);
            by_fd.remove(&fd);
        }
        result
    }

    fn disarm_socket(&self, fd: RawFd, dir: Direction) -> io::Result<()> {
        let mut entries = self.entries.borrow_mut();
        let mut by_fd = self.by_fd.borrow_mut();
        let registry = self.registry.borrow();

        let token = match by_fd.get(&fd) {
            Some(&token) => token,
            None => return Ok(()),
        };
        if let Some(Entry::Socket { read, write, .. }) = entries.get_mut(token) {
            match dir {
                Direction::Read => *read = false,
                Direction::Write => *write = false,
            }
            if *read || *write {
                let interest = interests(*read, *write);
                return registry.reregister(&mut SourceFd(&fd), Token(token), interest);
            }
            entries.remove(token);
            by_fd.remove(&fd);
            return registry.deregister(&mut SourceFd(&fd));
        }
        Ok(())
    }

    fn arm_timer(&self, deadline: Instant) {
        self.deadline.set(Some(deadline));
    }

    fn disarm_timer(&self) {
        self.deadline.set(None);
    }

    fn set_immediate_pending(&self, pending: bool) {
        self.immediate.set(pending);
    }

    fn arm_signal(&self, signum: i32) -> io::Result<()> {
        if self.by_signal.borrow().contains_key(&signum) {
            return Ok(());
        }
        let (reader, writer) = UnixStream::pair()?;
        reader.set_nonblocking(true)?;
        writer.set_nonblocking(true)?;
        let sig_id = low_level::pipe::register(signum, writer)?;

        let fd = reader.as_raw_fd();
        let token = self.entries.borrow_mut().insert(Entry::Signal {
            signum,
            pipe: reader,
            sig_id,
        });
        let result = self
            .registry
            .borrow()
            .register(&mut SourceFd(&fd), Token(token), Interest::READABLE);
        if result.is_err() {
            if let Entry::Signal { sig_id, .. } = self.entries.borrow_mut().remove(token) {
                low_level::unregister(sig_id);
            }
            return result;
        }
        self.by_signal.borrow_mut().insert(signum, token);
        Ok(())
    }

    fn disarm_signal(&self, signum: i32) -> io::Result<()> {
        let token = match self.by_signal.borrow_mut().remove(&signum) {
            Some(token) => token,
            None => return Ok(()),
        };
        if let Entry::Signal { pipe, sig_id, .. } = self.entries.borrow_mut().remove(token) {
            low_level::unregister(sig_id);
            let fd = pipe.as_raw_fd();
            self.registry.borrow().deregister(&mut SourceFd(&fd))?;
        }
        Ok(())
    }
}

/// Event loop backend multiplexing through `mio::Poll` (epoll/kqueue).
pub struct MioBackend {
    poll: Poll,
    events: Events,
    factory: Rc<MioFactory>,
}

enum ReadyKind {
    Read(RawFd),
    Write(RawFd),
    Signal(i32),
}

impl MioBackend {
    pub fn new() -> Result<Self, LoopError> {
        if !Self::enabled() {
            return Err(LoopError::Unsupported("mio backend requires a unix platform"));
        }
        let poll = Poll::new()?;
        let registry = poll.registry().try_clone()?;
        Ok(Self {
            poll,
            events: Events::with_capacity(256),
            factory: Rc::new(MioFactory {
                registry: RefCell::new(registry),
                entries: RefCell::new(Slab::new()),
                by_fd: RefCell::new(HashMap::new()),
                by_signal: RefCell::new(HashMap::new()),
                deadline: Cell::new(None),
                immediate: Cell::new(false),
            }),
        })
    }

    /// Poll timeout for one dispatch pass. Zero when polling must not wait
    /// (non-blocking tick, pending immediates, or nothing armed at all - a
    /// blocking wait with no armed events could never be woken from this
    /// thread), otherwise the time until the earliest timer deadline.
    ///
    /// Paused sockets are registrations without armed events, so a loop
    /// whose only remaining work is paused sockets keeps polling with a zero
    /// timeout. Keep a timer or other armed event alive alongside a pause;
    /// nothing else can resume the socket from this thread anyway.
    fn poll_timeout(&self, blocking: bool) -> Option<Duration> {
        if !blocking || self.factory.immediate.get() {
            return Some(Duration::ZERO);
        }
        if let Some(deadline) = self.factory.deadline.get() {
            return Some(deadline.saturating_duration_since(Instant::now()));
        }
        if self.factory.entries.borrow().is_empty() {
            return Some(Duration::ZERO);
        }
        None
    }
}

/// Consumes everything queued on a signal pipe; true if at least one signal
/// delivery was pending.
fn drain_pipe(mut pipe: &UnixStream) -> bool {
    let mut buf = [0u8; 64];
    let mut seen = false;
    loop {
        match pipe.read(&mut buf) {
            Ok(0) => return seen,
            Ok(_) => seen = true,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return seen,
            Err(_) => return seen,
        }
    }
}

impl Backend for MioBackend {
    fn enabled() -> bool {
        cfg!(unix)
    }

    fn dispatch(&mut self, blocking: bool, ctx: &DispatchCtx<'_>) -> Result<(), LoopError> {
        let timeout = self.poll_timeout(blocking);
        if let Err(e) = self.poll.poll(&mut self.events, timeout) {
            if e.kind() != io::ErrorKind::Interrupted {
                return Err(e.into());
            }
        }

        // Snapshot the routing first: the callbacks fired below may register
        // or remove sockets, which mutates the factory tables.
        let mut ready = Vec::new();
        {
            let entries = self.factory.entries.borrow();
            for event in self.events.iter() {
                match entries.get(event.token().0) {
                    Some(Entry::Socket { fd, read, write }) => {
                        if *read && (event.is_readable() || event.is_read_closed()) {
                            ready.push(ReadyKind::Read(*fd));
                        }
                        if *write && (event.is_writable() || event.is_write_closed()) {
                            ready.push(ReadyKind::Write(*fd));
                        }
                    }
                    Some(Entry::Signal { signum, pipe, .. }) => {
                        if drain_pipe(pipe) {
                            ready.push(ReadyKind::Signal(*signum));
                        }
                    }
                    None => {}
                }
            }
        }

        for item in ready {
            match item {
                ReadyKind::Read(fd) => ctx.fire_readable(fd)?,
                ReadyKind::Write(fd) => ctx.fire_writable(fd)?,
                ReadyKind::Signal(signum) => ctx.fire_signal(signum)?,
            }
        }

        ctx.fire_due_timers(Instant::now())?;
        ctx.fire_immediates()?;
        Ok(())
    }

    /// Replaces the `Poll` instance and re-registers every armed source.
    /// Required after forking; the old epoll/kqueue descriptor is shared with
    /// the parent and must not be reused.
    fn re_init(&mut self) -> Result<(), LoopError> {
        let poll = Poll::new()?;
        let registry = poll.registry().try_clone()?;
        for (token, entry) in self.factory.entries.borrow().iter() {
            match entry {
                Entry::Socket { fd, read, write } => {
                    registry.register(&mut SourceFd(fd), Token(token), interests(*read, *write))?;
                }
                Entry::Signal { pipe, .. } => {
                    let fd = pipe.as_raw_fd();
                    registry.register(&mut SourceFd(&fd), Token(token), Interest::READABLE)?;
                }
            }
        }
        self.poll = poll;
        *self.factory.registry.borrow_mut() = registry;
        Ok(())
    }

    fn factory(&self) -> Rc<dyn EventFactory> {
        self.factory.clone()
    }
}
