//! Server configuration options.

use crate::error::{Error, Result};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use surge_codec::{Codec, RawCodec};

/// Default scratch read size per loop (64 KiB).
pub const DEFAULT_READ_BUFFER_CAP: usize = 64 * 1024;

/// How the acceptor picks a loop for a new connection.
///
/// Only used when several loops share one stream listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadBalancing {
    /// Cycle through loops in order.
    #[default]
    RoundRobin,
    /// Loop with the fewest live connections.
    LeastConnections,
    /// Hash of the peer IP, so one host sticks to one loop.
    SourceAddrHash,
}

/// Server options.
///
/// # Examples
///
/// ```
/// use surge::{LineCodec, Options};
/// use std::time::Duration;
///
/// let opts = Options::default()
///     .with_multicore(true)
///     .with_ticker(true)
///     .with_tcp_keepalive(Duration::from_secs(300))
///     .with_codec(LineCodec::new());
/// assert!(opts.validate().is_ok());
/// ```
#[derive(Clone)]
pub struct Options {
    /// One loop per CPU core instead of a single loop.
    pub multicore: bool,

    /// Explicit loop count; overrides `multicore` when non-zero.
    pub num_event_loop: usize,

    /// Loop selection for connections handed out by the acceptor.
    pub load_balancing: LoadBalancing,

    /// Bind one listening socket per loop (`SO_REUSEPORT`).
    ///
    /// Ignored for Unix domain sockets.
    pub reuse_port: bool,

    /// Invoke `EventHandler::tick` periodically.
    pub ticker: bool,

    /// Keepalive idle time applied to accepted TCP sockets.
    pub tcp_keepalive: Option<Duration>,

    /// `TCP_NODELAY` on accepted TCP sockets (default: true).
    pub tcp_nodelay: bool,

    /// Bytes read per `read` call, and the largest datagram received.
    pub read_buffer_cap: usize,

    /// Readiness events fetched per poller wait.
    pub events_capacity: usize,

    /// Framing strategy (default: raw passthrough).
    pub codec: Arc<dyn Codec>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            multicore: false,
            num_event_loop: 0,
            load_balancing: LoadBalancing::RoundRobin,
            reuse_port: false,
            ticker: false,
            tcp_keepalive: None,
            tcp_nodelay: true,
            read_buffer_cap: DEFAULT_READ_BUFFER_CAP,
            events_capacity: surge_core::poller::DEFAULT_EVENTS_CAPACITY,
            codec: Arc::new(RawCodec),
        }
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("multicore", &self.multicore)
            .field("num_event_loop", &self.num_event_loop)
            .field("load_balancing", &self.load_balancing)
            .field("reuse_port", &self.reuse_port)
            .field("ticker", &self.ticker)
            .field("tcp_keepalive", &self.tcp_keepalive)
            .field("tcp_nodelay", &self.tcp_nodelay)
            .field("read_buffer_cap", &self.read_buffer_cap)
            .field("events_capacity", &self.events_capacity)
            .field("codec", &self.codec)
            .finish()
    }
}

impl Options {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_multicore(mut self, multicore: bool) -> Self {
        self.multicore = multicore;
        self
    }

    #[must_use]
    pub const fn with_num_event_loop(mut self, n: usize) -> Self {
        self.num_event_loop = n;
        self
    }

    #[must_use]
    pub const fn with_load_balancing(mut self, lb: LoadBalancing) -> Self {
        self.load_balancing = lb;
        self
    }

    #[must_use]
    pub const fn with_reuse_port(mut self, reuse_port: bool) -> Self {
        self.reuse_port = reuse_port;
        self
    }

    #[must_use]
    pub const fn with_ticker(mut self, ticker: bool) -> Self {
        self.ticker = ticker;
        self
    }

    #[must_use]
    pub const fn with_tcp_keepalive(mut self, idle: Duration) -> Self {
        self.tcp_keepalive = Some(idle);
        self
    }

    #[must_use]
    pub const fn with_tcp_nodelay(mut self, nodelay: bool) -> Self {
        self.tcp_nodelay = nodelay;
        self
    }

    #[must_use]
    pub const fn with_read_buffer_cap(mut self, cap: usize) -> Self {
        self.read_buffer_cap = cap;
        self
    }

    #[must_use]
    pub const fn with_events_capacity(mut self, capacity: usize) -> Self {
        self.events_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_codec<C: Codec + 'static>(mut self, codec: C) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    /// Number of loops `serve` will start.
    #[must_use]
    pub fn loop_count(&self) -> usize {
        if self.num_event_loop > 0 {
            self.num_event_loop
        } else if self.multicore {
            num_cpus::get().max(1)
        } else {
            1
        }
    }

    /// Check codec parameters and numeric fields.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Codec`] for a misconfigured codec and
    /// [`Error::Config`] for out-of-range options.
    pub fn validate(&self) -> Result<()> {
        self.codec.validate()?;
        if self.read_buffer_cap == 0 {
            return Err(Error::Config("read_buffer_cap must be non-zero".into()));
        }
        if self.events_capacity == 0 {
            return Err(Error::Config("events_capacity must be non-zero".into()));
        }
        if matches!(self.tcp_keepalive, Some(d) if d.is_zero()) {
            return Err(Error::Config("tcp_keepalive must be non-zero".into()));
        }
        Ok(())
    }
}
