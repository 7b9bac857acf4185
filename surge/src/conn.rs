//! Connections and cross-thread connection handles.
//!
//! A [`Conn`] is owned by exactly one event loop and only ever touched on
//! that loop's thread; callbacks receive it as `&mut Conn`. Other threads
//! talk to it through a [`ConnHandle`], whose requests travel as jobs on the
//! owning loop's wake-queue.

use crate::error::{Error, Result};
use bytes::Bytes;
use mio::event::Source;
use mio::net::TcpStream;
use mio::{Interest, Registry, Token};
use std::any::Any;
use std::fmt;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use surge_codec::Codec;
use surge_core::buffer::{InboundBuffer, OutboundQueue};
use surge_core::queue::WakeSender;

#[cfg(unix)]
use mio::net::UnixStream;
#[cfg(unix)]
use std::os::unix::io::{AsRawFd, RawFd};

/// Local or remote address of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Addr {
    Inet(SocketAddr),
    /// Unix domain socket path; unnamed peers have none.
    Unix(Option<PathBuf>),
}

impl Addr {
    #[must_use]
    pub const fn as_inet(&self) -> Option<SocketAddr> {
        match self {
            Self::Inet(addr) => Some(*addr),
            Self::Unix(_) => None,
        }
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inet(addr) => write!(f, "{addr}"),
            Self::Unix(Some(path)) => write!(f, "{}", path.display()),
            Self::Unix(None) => f.write_str("(unnamed)"),
        }
    }
}

impl From<SocketAddr> for Addr {
    fn from(addr: SocketAddr) -> Self {
        Self::Inet(addr)
    }
}

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Registered, `on_opened` has not returned yet.
    Opening,
    Open,
    /// Close requested; pending output is being flushed.
    Closing,
    /// `on_closed` has run.
    Closed,
}

/// Accepted stream socket.
#[derive(Debug)]
pub(crate) enum Stream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Stream {
    pub(crate) fn local_addr(&self) -> io::Result<Addr> {
        match self {
            Self::Tcp(s) => s.local_addr().map(Addr::Inet),
            #[cfg(unix)]
            Self::Unix(s) => s
                .local_addr()
                .map(|a| Addr::Unix(a.as_pathname().map(std::path::Path::to_path_buf))),
        }
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(s) => s.read(buf),
            #[cfg(unix)]
            Self::Unix(s) => s.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(s) => s.write(buf),
            #[cfg(unix)]
            Self::Unix(s) => s.write(buf),
        }
    }

    fn write_vectored(&mut self, bufs: &[io::IoSlice<'_>]) -> io::Result<usize> {
        match self {
            Self::Tcp(s) => s.write_vectored(bufs),
            #[cfg(unix)]
            Self::Unix(s) => s.write_vectored(bufs),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(s) => s.flush(),
            #[cfg(unix)]
            Self::Unix(s) => s.flush(),
        }
    }
}

impl Source for Stream {
    fn register(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        match self {
            Self::Tcp(s) => s.register(registry, token, interests),
            #[cfg(unix)]
            Self::Unix(s) => s.register(registry, token, interests),
        }
    }

    fn reregister(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        match self {
            Self::Tcp(s) => s.reregister(registry, token, interests),
            #[cfg(unix)]
            Self::Unix(s) => s.reregister(registry, token, interests),
        }
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        match self {
            Self::Tcp(s) => s.deregister(registry),
            #[cfg(unix)]
            Self::Unix(s) => s.deregister(registry),
        }
    }
}

#[cfg(unix)]
impl AsRawFd for Stream {
    fn as_raw_fd(&self) -> RawFd {
        match self {
            Self::Tcp(s) => s.as_raw_fd(),
            Self::Unix(s) => s.as_raw_fd(),
        }
    }
}

/// Work submitted to a loop through its wake-queue.
#[derive(Debug)]
pub(crate) enum Job {
    /// Stream handed over by the acceptor.
    Register { stream: Stream, remote: Addr },
    Write { token: Token, serial: u64, data: Bytes },
    Wake { token: Token, serial: u64 },
    Close { token: Token, serial: u64 },
    /// Datagram reply through the loop's UDP socket.
    SendTo { peer: SocketAddr, data: Bytes },
}

/// Thread-safe handle to a connection.
///
/// Requests are queued to the owning loop and applied in FIFO order. A
/// request for a connection that has since closed is dropped silently.
#[derive(Clone)]
pub struct ConnHandle {
    tx: WakeSender<Job>,
    token: Token,
    serial: u64,
    peer: Option<SocketAddr>,
    codec: Arc<dyn Codec>,
}

impl fmt::Debug for ConnHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnHandle")
            .field("token", &self.token)
            .field("serial", &self.serial)
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

impl ConnHandle {
    pub(crate) fn new(
        tx: WakeSender<Job>,
        token: Token,
        serial: u64,
        peer: Option<SocketAddr>,
        codec: Arc<dyn Codec>,
    ) -> Self {
        Self {
            tx,
            token,
            serial,
            peer,
            codec,
        }
    }

    /// Encode `data` with the server codec and queue it for writing.
    ///
    /// For a datagram connection the encoded bytes are sent to the peer.
    ///
    /// # Errors
    ///
    /// Fails if the codec rejects the payload or the loop has exited.
    pub fn async_write(&self, data: &[u8]) -> Result<()> {
        let wire = self.codec.encode(data)?;
        let job = match self.peer {
            Some(peer) => Job::SendTo { peer, data: wire },
            None => Job::Write {
                token: self.token,
                serial: self.serial,
                data: wire,
            },
        };
        self.tx.push(job)?;
        Ok(())
    }

    /// Send a raw datagram back to the peer.
    ///
    /// # Errors
    ///
    /// Fails for stream connections or if the loop has exited.
    pub fn send_to(&self, data: &[u8]) -> Result<()> {
        let peer = self.peer.ok_or_else(not_datagram)?;
        self.tx.push(Job::SendTo {
            peer,
            data: Bytes::copy_from_slice(data),
        })?;
        Ok(())
    }

    /// Make the loop call `react` with an empty frame for this connection.
    ///
    /// # Errors
    ///
    /// Fails if the loop has exited.
    pub fn wake(&self) -> Result<()> {
        self.tx.push(Job::Wake {
            token: self.token,
            serial: self.serial,
        })?;
        Ok(())
    }

    /// Close the connection once its pending output is flushed.
    ///
    /// # Errors
    ///
    /// Fails if the loop has exited.
    pub fn close(&self) -> Result<()> {
        self.tx.push(Job::Close {
            token: self.token,
            serial: self.serial,
        })?;
        Ok(())
    }

    #[must_use]
    pub const fn is_datagram(&self) -> bool {
        self.peer.is_some()
    }
}

fn not_datagram() -> Error {
    Error::Io(io::Error::new(
        io::ErrorKind::Unsupported,
        "send_to on a stream connection",
    ))
}

pub(crate) enum Transport {
    Stream(Stream),
    /// Ephemeral connection for one received datagram.
    Datagram(SocketAddr),
}

/// A connection owned by an event loop.
pub struct Conn {
    pub(crate) token: Token,
    pub(crate) serial: u64,
    pub(crate) transport: Transport,
    pub(crate) local: Addr,
    pub(crate) remote: Addr,
    pub(crate) inbound: InboundBuffer,
    pub(crate) outbound: OutboundQueue,
    pub(crate) state: ConnState,
    /// Bytes left undecoded while a frame is being handled.
    pub(crate) undecoded: usize,
    /// Write interest is registered with the poller.
    pub(crate) write_armed: bool,
    context: Option<Box<dyn Any + Send>>,
    handle: ConnHandle,
}

impl fmt::Debug for Conn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conn")
            .field("token", &self.token)
            .field("local", &self.local)
            .field("remote", &self.remote)
            .field("state", &self.state)
            .field("inbound", &self.inbound_len())
            .field("outbound", &self.outbound.len())
            .finish_non_exhaustive()
    }
}

impl Conn {
    pub(crate) fn new(
        transport: Transport,
        local: Addr,
        remote: Addr,
        handle: ConnHandle,
    ) -> Self {
        Self {
            token: handle.token,
            serial: handle.serial,
            transport,
            local,
            remote,
            inbound: InboundBuffer::new(),
            outbound: OutboundQueue::new(),
            state: ConnState::Opening,
            undecoded: 0,
            write_armed: false,
            context: None,
            handle,
        }
    }

    #[must_use]
    pub const fn local_addr(&self) -> &Addr {
        &self.local
    }

    #[must_use]
    pub const fn remote_addr(&self) -> &Addr {
        &self.remote
    }

    #[must_use]
    pub const fn state(&self) -> ConnState {
        self.state
    }

    #[must_use]
    pub const fn is_datagram(&self) -> bool {
        matches!(self.transport, Transport::Datagram(_))
    }

    /// Bytes received but not yet decoded into frames.
    #[must_use]
    pub fn inbound_len(&self) -> usize {
        self.inbound.len().max(self.undecoded)
    }

    /// Bytes queued for the kernel.
    #[must_use]
    pub const fn outbound_len(&self) -> usize {
        self.outbound.len()
    }

    /// User context, if one of type `T` is attached.
    #[must_use]
    pub fn context<T: Any>(&self) -> Option<&T> {
        self.context.as_ref()?.downcast_ref()
    }

    pub fn context_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.context.as_mut()?.downcast_mut()
    }

    /// Attach arbitrary per-connection state, replacing any previous value.
    pub fn set_context<T: Any + Send>(&mut self, value: T) {
        self.context = Some(Box::new(value));
    }

    pub fn take_context(&mut self) -> Option<Box<dyn Any + Send>> {
        self.context.take()
    }

    /// Thread-safe handle for use outside the loop.
    #[must_use]
    pub fn handle(&self) -> ConnHandle {
        self.handle.clone()
    }

    /// Queue an encoded write through the loop's wake-queue.
    ///
    /// # Errors
    ///
    /// See [`ConnHandle::async_write`].
    pub fn async_write(&self, data: &[u8]) -> Result<()> {
        self.handle.async_write(data)
    }

    /// Reply to the datagram peer.
    ///
    /// The bytes are sent raw once the current callback returns.
    ///
    /// # Errors
    ///
    /// Fails for stream connections.
    pub fn send_to(&mut self, data: &[u8]) -> Result<()> {
        if !self.is_datagram() {
            return Err(not_datagram());
        }
        self.outbound.push(Bytes::copy_from_slice(data));
        Ok(())
    }

    /// See [`ConnHandle::wake`].
    ///
    /// # Errors
    ///
    /// Fails if the loop has exited.
    pub fn wake(&self) -> Result<()> {
        self.handle.wake()
    }

    /// Close after pending output is flushed.
    pub fn close(&mut self) {
        if matches!(self.state, ConnState::Opening | ConnState::Open) {
            self.state = ConnState::Closing;
        }
    }

    /// Write queued output to the stream; `Ok(true)` once fully drained.
    pub(crate) fn flush_outbound(&mut self) -> io::Result<bool> {
        match &mut self.transport {
            Transport::Stream(stream) => self.outbound.flush_into(stream),
            Transport::Datagram(_) => Ok(true),
        }
    }

    pub(crate) fn stream_mut(&mut self) -> Option<&mut Stream> {
        match &mut self.transport {
            Transport::Stream(stream) => Some(stream),
            Transport::Datagram(_) => None,
        }
    }
}
