//! Listening sockets and the shared-listener acceptor.
//!
//! Depending on the topology a listener is owned by a loop directly, or by an
//! acceptor thread that hands every accepted stream to a loop picked by the
//! load balancer.

use crate::balancer::LoadBalancer;
use crate::conn::{Addr, Job, Stream};
use crate::event_loop::{Shared, MAX_WAIT_FAILURES};
use crate::handler::EventHandler;
use crate::options::Options;
use mio::event::Source;
use mio::net::{TcpListener, UdpSocket};
use mio::{Interest, Registry, Token};
use smallvec::SmallVec;
use socket2::SockRef;
use std::io;
use std::sync::Arc;
use surge_core::endpoint::Endpoint;
use surge_core::poller::{fd_token, Poller};
use surge_core::socket;
use tracing::{debug, error, trace, warn};

#[cfg(unix)]
use mio::net::UnixListener;
#[cfg(unix)]
use std::os::unix::io::{AsRawFd, RawFd};

/// Batch of streams accepted in one readiness round.
pub(crate) type Accepted = SmallVec<[(Stream, Addr); 8]>;

#[derive(Debug)]
pub(crate) enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
    Udp(UdpSocket),
}

impl Listener {
    pub(crate) fn bind(endpoint: &Endpoint, reuse_port: bool) -> io::Result<Self> {
        match endpoint {
            Endpoint::Tcp(addr) => socket::bind_tcp(*addr, reuse_port).map(Self::Tcp),
            Endpoint::Udp(addr) => socket::bind_udp(*addr, reuse_port).map(Self::Udp),
            #[cfg(unix)]
            Endpoint::Unix(path) => socket::bind_unix(path).map(Self::Unix),
        }
    }

    pub(crate) fn local_addr(&self) -> io::Result<Addr> {
        match self {
            Self::Tcp(l) => l.local_addr().map(Addr::Inet),
            Self::Udp(s) => s.local_addr().map(Addr::Inet),
            #[cfg(unix)]
            Self::Unix(l) => l
                .local_addr()
                .map(|a| Addr::Unix(a.as_pathname().map(std::path::Path::to_path_buf))),
        }
    }

    /// Duplicate a UDP socket so another loop can poll the same port.
    fn try_clone_udp(&self) -> io::Result<Self> {
        match self {
            Self::Udp(s) => {
                let dup = SockRef::from(s).try_clone()?;
                Ok(Self::Udp(UdpSocket::from_std(dup.into())))
            }
            _ => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "only datagram sockets can be shared across loops",
            )),
        }
    }

    fn accept(&self) -> io::Result<(Stream, Addr)> {
        match self {
            Self::Tcp(l) => l
                .accept()
                .map(|(s, peer)| (Stream::Tcp(s), Addr::Inet(peer))),
            #[cfg(unix)]
            Self::Unix(l) => l.accept().map(|(s, peer)| {
                let path = peer.as_pathname().map(std::path::Path::to_path_buf);
                (Stream::Unix(s), Addr::Unix(path))
            }),
            Self::Udp(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "accept on a datagram socket",
            )),
        }
    }
}

impl Source for Listener {
    fn register(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        match self {
            Self::Tcp(l) => l.register(registry, token, interests),
            #[cfg(unix)]
            Self::Unix(l) => l.register(registry, token, interests),
            Self::Udp(s) => s.register(registry, token, interests),
        }
    }

    fn reregister(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        match self {
            Self::Tcp(l) => l.reregister(registry, token, interests),
            #[cfg(unix)]
            Self::Unix(l) => l.reregister(registry, token, interests),
            Self::Udp(s) => s.reregister(registry, token, interests),
        }
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        match self {
            Self::Tcp(l) => l.deregister(registry),
            #[cfg(unix)]
            Self::Unix(l) => l.deregister(registry),
            Self::Udp(s) => s.deregister(registry),
        }
    }
}

#[cfg(unix)]
impl AsRawFd for Listener {
    fn as_raw_fd(&self) -> RawFd {
        match self {
            Self::Tcp(l) => l.as_raw_fd(),
            Self::Unix(l) => l.as_raw_fd(),
            Self::Udp(s) => s.as_raw_fd(),
        }
    }
}

/// Listening sockets for one server.
#[derive(Debug)]
pub(crate) struct Bound {
    /// Listener owned by each loop, if any.
    pub(crate) per_loop: Vec<Option<Listener>>,
    /// Listener owned by the acceptor thread.
    pub(crate) shared: Option<Listener>,
    pub(crate) local: Addr,
}

/// Bind listeners for `loops` event loops.
///
/// - single loop: the loop owns the listener
/// - `reuse_port` (TCP/UDP): one listener per loop on the same address
/// - UDP without `reuse_port`: every loop polls a duplicate of one socket
/// - stream without `reuse_port`: one listener for the acceptor
pub(crate) fn bind_all(endpoint: &Endpoint, loops: usize, reuse_port: bool) -> io::Result<Bound> {
    let reuse_port = reuse_port_applies(endpoint, reuse_port);
    let first = Listener::bind(endpoint, reuse_port)?;
    let local = first.local_addr()?;
    debug!("[SERVE] bound {} ({} loops, reuse_port={})", local, loops, reuse_port);

    if loops <= 1 {
        return Ok(Bound {
            per_loop: vec![Some(first)],
            shared: None,
            local,
        });
    }

    if reuse_port {
        // an ephemeral port must be shared by every loop
        let endpoint = match (endpoint, local.as_inet()) {
            (Endpoint::Tcp(_), Some(addr)) => Endpoint::Tcp(addr),
            (Endpoint::Udp(_), Some(addr)) => Endpoint::Udp(addr),
            (other, _) => other.clone(),
        };
        let mut per_loop = vec![Some(first)];
        for _ in 1..loops {
            per_loop.push(Some(Listener::bind(&endpoint, true)?));
        }
        return Ok(Bound {
            per_loop,
            shared: None,
            local,
        });
    }

    if endpoint.is_udp() {
        let mut per_loop = Vec::with_capacity(loops);
        for _ in 1..loops {
            per_loop.push(Some(first.try_clone_udp()?));
        }
        per_loop.push(Some(first));
        return Ok(Bound {
            per_loop,
            shared: None,
            local,
        });
    }

    Ok(Bound {
        per_loop: (0..loops).map(|_| None).collect(),
        shared: Some(first),
        local,
    })
}

/// `SO_REUSEPORT` only applies to TCP and UDP.
pub(crate) fn reuse_port_applies(endpoint: &Endpoint, requested: bool) -> bool {
    requested && (endpoint.is_tcp() || endpoint.is_udp())
}

/// Accept every pending stream, tuning TCP sockets on the way.
///
/// Stops at `WouldBlock`; other accept failures are logged and end the round.
pub(crate) fn accept_ready(listener: &Listener, options: &Options, out: &mut Accepted) {
    loop {
        match listener.accept() {
            Ok((stream, remote)) => {
                if let Stream::Tcp(tcp) = &stream {
                    if let Err(e) = socket::tune_tcp(tcp, options.tcp_nodelay, options.tcp_keepalive) {
                        warn!("[ACCEPT] failed to tune socket from {}: {}", remote, e);
                    }
                }
                trace!("[ACCEPT] accepted {}", remote);
                out.push((stream, remote));
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::Interrupted | io::ErrorKind::ConnectionAborted
                ) =>
            {
                continue
            }
            Err(e) => {
                warn!("[ACCEPT] accept failed: {}", e);
                return;
            }
        }
    }
}

/// Owns the shared stream listener when several loops serve one socket.
pub(crate) struct Acceptor<H: EventHandler> {
    poller: Poller,
    listener: Listener,
    balancer: LoadBalancer,
    shared: Arc<Shared<H>>,
}

impl<H: EventHandler> Acceptor<H> {
    pub(crate) fn new(poller: Poller, listener: Listener, balancer: LoadBalancer, shared: Arc<Shared<H>>) -> Self {
        Self {
            poller,
            listener,
            balancer,
            shared,
        }
    }

    pub(crate) fn run(mut self) {
        let token = fd_token(&self.listener);
        if let Err(e) = self.poller.register(&mut self.listener, token, Interest::READABLE) {
            error!("[ACCEPT] failed to register listener: {}", e);
            self.shared.record_fatal(e);
            self.shared.trigger_shutdown();
            return;
        }
        debug!("[ACCEPT] started");

        let mut ready = Vec::new();
        let mut accepted = Accepted::new();
        let mut failures = 0;

        while !self.shared.is_shutdown() {
            match self.poller.wait(&mut ready, None) {
                Ok(_) => failures = 0,
                Err(e) => {
                    failures += 1;
                    warn!("[ACCEPT] poll failed ({}/{}): {}", failures, MAX_WAIT_FAILURES, e);
                    if failures >= MAX_WAIT_FAILURES {
                        error!("[ACCEPT] giving up after repeated poll failures");
                        self.shared.record_fatal(e);
                        self.shared.trigger_shutdown();
                        break;
                    }
                    continue;
                }
            }
            if ready.is_empty() {
                continue;
            }

            accept_ready(&self.listener, &self.shared.options, &mut accepted);
            let senders = &self.shared.senders;
            for (stream, remote) in accepted.drain(..) {
                let Some(idx) = self.balancer.pick(&remote, |i| !senders[i].is_closed()) else {
                    warn!("[ACCEPT] no loop left to serve {}, dropping it", remote);
                    continue;
                };
                if let Err(e) = senders[idx].push(Job::Register { stream, remote }) {
                    warn!("[ACCEPT] loop {} unavailable, dropping connection: {}", idx, e);
                }
            }
        }

        let _ = self.poller.unregister(&mut self.listener);
        debug!("[ACCEPT] stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_loop_owns_listener() {
        let endpoint = Endpoint::parse("tcp://127.0.0.1:0").unwrap();
        let bound = bind_all(&endpoint, 1, false).unwrap();
        assert_eq!(bound.per_loop.len(), 1);
        assert!(bound.per_loop[0].is_some());
        assert!(bound.shared.is_none());
    }

    #[test]
    fn shared_stream_listener_goes_to_acceptor() {
        let endpoint = Endpoint::parse("tcp://127.0.0.1:0").unwrap();
        let bound = bind_all(&endpoint, 3, false).unwrap();
        assert!(bound.per_loop.iter().all(Option::is_none));
        assert!(bound.shared.is_some());
    }

    #[test]
    fn udp_is_duplicated_per_loop() {
        let endpoint = Endpoint::parse("udp://127.0.0.1:0").unwrap();
        let bound = bind_all(&endpoint, 3, false).unwrap();
        let addrs: Vec<_> = bound
            .per_loop
            .iter()
            .map(|l| l.as_ref().unwrap().local_addr().unwrap())
            .collect();
        assert!(addrs.iter().all(|a| *a == bound.local));
    }

    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    #[test]
    fn reuse_port_binds_one_listener_per_loop() {
        let endpoint = Endpoint::parse("tcp://127.0.0.1:0").unwrap();
        let bound = bind_all(&endpoint, 2, true).unwrap();
        assert!(bound.shared.is_none());
        for listener in &bound.per_loop {
            assert_eq!(listener.as_ref().unwrap().local_addr().unwrap(), bound.local);
        }
    }

    #[test]
    fn accept_ready_drains_backlog() {
        let endpoint = Endpoint::parse("tcp://127.0.0.1:0").unwrap();
        let listener = Listener::bind(&endpoint, false).unwrap();
        let addr = listener.local_addr().unwrap().as_inet().unwrap();

        let _a = std::net::TcpStream::connect(addr).unwrap();
        let _b = std::net::TcpStream::connect(addr).unwrap();

        let mut out = Accepted::new();
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while out.len() < 2 && std::time::Instant::now() < deadline {
            accept_ready(&listener, &Options::default(), &mut out);
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_eq!(out.len(), 2);
    }
}
