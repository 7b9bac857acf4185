//! Server descriptor and the `serve` entry point.

use crate::balancer::LoadBalancer;
use crate::conn::{Addr, Job};
use crate::error::{Error, Result};
use crate::event_loop::{EventLoop, Shared};
use crate::handler::{Action, EventHandler};
use crate::listener::{bind_all, reuse_port_applies, Acceptor};
use crate::options::Options;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use surge_core::endpoint::Endpoint;
use surge_core::poller::Poller;
use surge_core::queue::{wake_queue, WakeQueue, WakeSender};
use tracing::{debug, info};

/// Running server, as seen by `on_init_complete` and `on_shutdown`.
#[derive(Debug, Clone)]
pub struct Server {
    addr: Addr,
    multicore: bool,
    num_event_loop: usize,
    reuse_port: bool,
    tcp_keepalive: Option<Duration>,
    /// Live stream connections per loop.
    pub(crate) loads: Arc<[AtomicUsize]>,
}

impl Server {
    pub(crate) fn new(addr: Addr, options: &Options, loops: usize, reuse_port: bool) -> Self {
        Self {
            addr,
            multicore: options.multicore,
            num_event_loop: loops,
            reuse_port,
            tcp_keepalive: options.tcp_keepalive,
            loads: (0..loops).map(|_| AtomicUsize::new(0)).collect(),
        }
    }

    /// Bound listen address; reflects the real port when `:0` was requested.
    #[must_use]
    pub const fn addr(&self) -> &Addr {
        &self.addr
    }

    #[must_use]
    pub const fn multicore(&self) -> bool {
        self.multicore
    }

    #[must_use]
    pub const fn num_event_loop(&self) -> usize {
        self.num_event_loop
    }

    /// Whether each loop has its own listening socket.
    #[must_use]
    pub const fn reuse_port(&self) -> bool {
        self.reuse_port
    }

    #[must_use]
    pub const fn tcp_keepalive(&self) -> Option<Duration> {
        self.tcp_keepalive
    }

    /// Live stream connections across all loops.
    #[must_use]
    pub fn count_connections(&self) -> usize {
        self.loads.iter().map(|l| l.load(Ordering::Relaxed)).sum()
    }
}

/// Serve `addr` until a callback returns [`Action::Shutdown`].
///
/// `addr` is `<scheme>://<target>` with scheme `tcp`, `udp` or `unix`. An
/// empty target (`tcp://`) binds every interface on an ephemeral port, and a
/// bare port (`tcp://:9000`) binds every interface on that port.
///
/// Blocks the calling thread until every loop has exited.
///
/// # Errors
///
/// Returns an error synchronously, before anything starts, when the address
/// or options are invalid or binding fails. After startup, returns the first
/// loop-fatal poller error, if any loop hit one.
///
/// # Examples
///
/// ```no_run
/// use bytes::Bytes;
/// use surge::{serve, Action, Conn, EventHandler, Options};
///
/// struct Echo;
///
/// impl EventHandler for Echo {
///     fn react(&self, frame: &[u8], _conn: &mut Conn) -> (Option<Bytes>, Action) {
///         (Some(Bytes::copy_from_slice(frame)), Action::None)
///     }
/// }
///
/// serve(Echo, "tcp://127.0.0.1:9000", Options::default().with_multicore(true)).unwrap();
/// ```
pub fn serve<H: EventHandler>(handler: H, addr: &str, options: Options) -> Result<()> {
    let endpoint = Endpoint::parse(addr)?;
    options.validate()?;

    let loops = options.loop_count();
    let bound = bind_all(&endpoint, loops, options.reuse_port)?;
    let reuse_port = reuse_port_applies(&endpoint, options.reuse_port);
    let server = Server::new(bound.local.clone(), &options, loops, reuse_port);
    let _socket_file = SocketFileGuard::new(&endpoint);

    if handler.on_init_complete(&server) == Action::Shutdown {
        info!("[SERVE] startup aborted by on_init_complete");
        return Ok(());
    }

    let mut seeds: Vec<(Poller, WakeSender<Job>, WakeQueue<Job>)> = Vec::with_capacity(loops);
    for _ in 0..loops {
        let poller = Poller::new(options.events_capacity)?;
        let (tx, rx) = wake_queue(poller.waker());
        seeds.push((poller, tx, rx));
    }
    let acceptor_poller = match bound.shared {
        Some(_) => Some(Poller::new(options.events_capacity)?),
        None => None,
    };

    let senders = seeds.iter().map(|(_, tx, _)| tx.clone()).collect();
    let acceptor_waker = acceptor_poller.as_ref().map(Poller::waker);
    let shared = Arc::new(Shared::new(
        handler,
        options,
        server,
        senders,
        acceptor_waker,
    ));

    info!("[SERVE] serving {} on {} loop(s)", bound.local, loops);
    let mut threads = Vec::with_capacity(loops + 1);
    for (idx, ((poller, tx, rx), listener)) in seeds.into_iter().zip(bound.per_loop).enumerate() {
        let event_loop = EventLoop::new(idx, poller, rx, tx, listener, Arc::clone(&shared));
        let handle = thread::Builder::new()
            .name(format!("surge-loop-{idx}"))
            .spawn(move || event_loop.run());
        match handle {
            Ok(handle) => threads.push(handle),
            Err(e) => {
                shared.trigger_shutdown();
                join_all(threads);
                return Err(Error::Io(e));
            }
        }
    }

    if let (Some(poller), Some(listener)) = (acceptor_poller, bound.shared) {
        let balancer = LoadBalancer::new(shared.options.load_balancing, Arc::clone(&shared.server.loads));
        let acceptor = Acceptor::new(poller, listener, balancer, Arc::clone(&shared));
        let handle = thread::Builder::new()
            .name("surge-acceptor".into())
            .spawn(move || acceptor.run());
        match handle {
            Ok(handle) => threads.push(handle),
            Err(e) => {
                shared.trigger_shutdown();
                join_all(threads);
                return Err(Error::Io(e));
            }
        }
    }

    join_all(threads);
    debug!("[SERVE] all loops exited");

    shared.handler.on_shutdown(&shared.server);
    match shared.take_fatal() {
        Some(e) => Err(Error::Io(e)),
        None => Ok(()),
    }
}

/// Join every thread, re-raising the first panic from a callback.
fn join_all(threads: Vec<thread::JoinHandle<()>>) {
    let mut panic = None;
    for handle in threads {
        if let Err(payload) = handle.join() {
            panic.get_or_insert(payload);
        }
    }
    if let Some(payload) = panic {
        std::panic::resume_unwind(payload);
    }
}

/// Removes the Unix socket file when `serve` returns.
struct SocketFileGuard {
    #[cfg(unix)]
    path: Option<std::path::PathBuf>,
}

impl SocketFileGuard {
    fn new(endpoint: &Endpoint) -> Self {
        Self {
            #[cfg(unix)]
            path: match endpoint {
                Endpoint::Unix(path) => Some(path.clone()),
                _ => None,
            },
        }
    }
}

impl Drop for SocketFileGuard {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(path) = &self.path {
            let _ = std::fs::remove_file(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_reports_configuration() {
        let opts = Options::default()
            .with_multicore(true)
            .with_tcp_keepalive(Duration::from_secs(60));
        let server = Server::new(Addr::Inet("127.0.0.1:80".parse().unwrap()), &opts, 4, true);
        assert!(server.multicore());
        assert_eq!(server.num_event_loop(), 4);
        assert!(server.reuse_port());
        assert_eq!(server.tcp_keepalive(), Some(Duration::from_secs(60)));
        assert_eq!(server.count_connections(), 0);

        server.loads[1].fetch_add(2, Ordering::Relaxed);
        server.loads[3].fetch_add(1, Ordering::Relaxed);
        assert_eq!(server.count_connections(), 3);
    }

    #[test]
    fn multicore_reports_the_requested_option() {
        let addr = Addr::Inet("127.0.0.1:80".parse().unwrap());
        let single_core = Server::new(addr.clone(), &Options::default().with_multicore(true), 1, false);
        assert!(single_core.multicore());

        let pinned = Server::new(addr, &Options::default().with_num_event_loop(4), 4, false);
        assert!(!pinned.multicore());
        assert_eq!(pinned.num_event_loop(), 4);
    }
}
