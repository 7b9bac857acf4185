//! Readiness poller.
//!
//! A thin per-loop wrapper over [`mio::Poll`] (epoll on Linux, kqueue on the
//! BSDs and macOS). Sources are registered under a token equal to their raw
//! file descriptor so a loop can key its connections by fd. A [`mio::Waker`]
//! registered under [`WAKE_TOKEN`] lets any thread interrupt a blocked
//! [`Poller::wait`].

use mio::event::Source;
use mio::{Events, Interest, Poll, Token, Waker};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Reserved token for the cross-thread waker.
pub const WAKE_TOKEN: Token = Token(usize::MAX);

/// Default number of events fetched per wait.
pub const DEFAULT_EVENTS_CAPACITY: usize = 1024;

/// Readiness reported for one registered source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub token: Token,
    pub readable: bool,
    pub writable: bool,
    /// Peer hung up (read or write side closed)
    pub closed: bool,
    pub error: bool,
}

/// Per-loop readiness poller.
pub struct Poller {
    poll: Poll,
    events: Events,
    waker: Arc<Waker>,
}

impl Poller {
    /// Create a poller fetching up to `events_capacity` events per wait.
    pub fn new(events_capacity: usize) -> io::Result<Self> {
        let poll = Poll::new()?;
        let waker = Waker::new(poll.registry(), WAKE_TOKEN)?;
        Ok(Self {
            poll,
            events: Events::with_capacity(events_capacity.max(1)),
            waker: Arc::new(waker),
        })
    }

    /// Shared handle that interrupts [`wait`](Self::wait) from any thread.
    #[must_use]
    pub fn waker(&self) -> Arc<Waker> {
        Arc::clone(&self.waker)
    }

    pub fn register<S>(&self, source: &mut S, token: Token, interest: Interest) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        self.poll.registry().register(source, token, interest)
    }

    pub fn modify<S>(&self, source: &mut S, token: Token, interest: Interest) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        self.poll.registry().reregister(source, token, interest)
    }

    pub fn unregister<S>(&self, source: &mut S) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        self.poll.registry().deregister(source)
    }

    /// Block until at least one source is ready, the waker fires, or
    /// `timeout` elapses.
    ///
    /// `ready` is cleared and refilled with the sources that became ready;
    /// waker events are not included. Returns `true` when the waker fired.
    /// An interrupted wait yields an empty list.
    pub fn wait(&mut self, ready: &mut Vec<Readiness>, timeout: Option<Duration>) -> io::Result<bool> {
        ready.clear();

        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                trace!("[POLLER] wait interrupted");
                return Ok(false);
            }
            Err(e) => return Err(e),
        }

        let mut woken = false;
        for event in &self.events {
            if event.token() == WAKE_TOKEN {
                woken = true;
                continue;
            }
            ready.push(Readiness {
                token: event.token(),
                readable: event.is_readable(),
                writable: event.is_writable(),
                closed: event.is_read_closed() || event.is_write_closed(),
                error: event.is_error(),
            });
        }
        Ok(woken)
    }
}

/// Token for a registered source: its raw file descriptor.
#[cfg(unix)]
#[must_use]
pub fn fd_token<S: std::os::unix::io::AsRawFd>(source: &S) -> Token {
    Token(source.as_raw_fd() as usize)
}
