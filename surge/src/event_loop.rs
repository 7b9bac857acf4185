//! The reactor.
//!
//! Each loop runs on its own thread and exclusively owns its poller, its
//! connections and, depending on the topology, a listener. One iteration:
//!
//! 1. wait for readiness, bounded by the next tick deadline
//! 2. accept / receive on the listener, read / write ready connections
//! 3. drain the wake-queue once
//! 4. fire the ticker if due
//!
//! The only cross-thread entry points are the wake-queue and the shared
//! shutdown flag.

use crate::conn::{Addr, Conn, ConnHandle, ConnState, Job, Stream, Transport};
use crate::error::Error;
use crate::handler::{Action, EventHandler};
use crate::listener::{accept_ready, Accepted, Listener};
use crate::options::Options;
use crate::server::Server;
use hashbrown::HashMap;
use mio::{Interest, Token, Waker};
use parking_lot::Mutex;
use std::io::{self, Read};
use std::mem;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use surge_core::poller::{fd_token, Poller, Readiness};
use surge_core::queue::{WakeQueue, WakeSender};
use tracing::{debug, error, info, trace, warn};

/// Consecutive poller failures tolerated before a loop gives up.
pub(crate) const MAX_WAIT_FAILURES: u32 = 3;

/// State shared by every loop of one server.
pub(crate) struct Shared<H> {
    pub(crate) handler: H,
    pub(crate) options: Options,
    pub(crate) server: Server,
    pub(crate) senders: Vec<WakeSender<Job>>,
    pub(crate) acceptor: Option<Arc<Waker>>,
    shutdown: AtomicBool,
    fatal: Mutex<Option<io::Error>>,
}

impl<H: EventHandler> Shared<H> {
    pub(crate) fn new(
        handler: H,
        options: Options,
        server: Server,
        senders: Vec<WakeSender<Job>>,
        acceptor: Option<Arc<Waker>>,
    ) -> Self {
        Self {
            handler,
            options,
            server,
            senders,
            acceptor,
            shutdown: AtomicBool::new(false),
            fatal: Mutex::new(None),
        }
    }

    #[inline]
    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Raise the global shutdown flag and wake every loop.
    pub(crate) fn trigger_shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("[SERVE] shutdown requested");
        for tx in &self.senders {
            let _ = tx.notify();
        }
        if let Some(waker) = &self.acceptor {
            let _ = waker.wake();
        }
    }

    /// Keep the first loop-fatal error for `serve` to report.
    pub(crate) fn record_fatal(&self, err: io::Error) {
        let mut slot = self.fatal.lock();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    pub(crate) fn take_fatal(&self) -> Option<io::Error> {
        self.fatal.lock().take()
    }
}

/// Raises the shutdown flag if a loop thread unwinds, so siblings stop too.
struct PanicGuard<'a, H: EventHandler>(&'a Shared<H>);

impl<H: EventHandler> Drop for PanicGuard<'_, H> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.trigger_shutdown();
        }
    }
}

pub(crate) struct EventLoop<H: EventHandler> {
    idx: usize,
    poller: Poller,
    listener: Option<Listener>,
    listener_token: Option<Token>,
    conns: HashMap<Token, Conn>,
    queue: WakeQueue<Job>,
    tx: WakeSender<Job>,
    shared: Arc<Shared<H>>,
    serial: u64,
    scratch: Vec<u8>,
    jobs: Vec<Job>,
    next_tick: Option<Instant>,
}

impl<H: EventHandler> EventLoop<H> {
    pub(crate) fn new(
        idx: usize,
        poller: Poller,
        queue: WakeQueue<Job>,
        tx: WakeSender<Job>,
        listener: Option<Listener>,
        shared: Arc<Shared<H>>,
    ) -> Self {
        let scratch = vec![0u8; shared.options.read_buffer_cap];
        let next_tick = (idx == 0 && shared.options.ticker).then(Instant::now);
        Self {
            idx,
            poller,
            listener,
            listener_token: None,
            conns: HashMap::new(),
            queue,
            tx,
            shared,
            serial: 0,
            scratch,
            jobs: Vec::new(),
            next_tick,
        }
    }

    pub(crate) fn run(mut self) {
        let shared = Arc::clone(&self.shared);
        let _guard = PanicGuard(&shared);

        if let Some(listener) = self.listener.as_mut() {
            let token = fd_token(&*listener);
            if let Err(e) = self.poller.register(listener, token, Interest::READABLE) {
                error!("[LOOP {}] failed to register listener: {}", self.idx, e);
                self.shared.record_fatal(e);
                return;
            }
            self.listener_token = Some(token);
        }
        debug!("[LOOP {}] started", self.idx);

        let mut ready: Vec<Readiness> = Vec::with_capacity(self.shared.options.events_capacity);
        let mut failures = 0;

        loop {
            if self.shared.is_shutdown() {
                break;
            }

            let timeout = self
                .next_tick
                .map(|deadline| deadline.saturating_duration_since(Instant::now()));
            match self.poller.wait(&mut ready, timeout) {
                Ok(_) => failures = 0,
                Err(e) => {
                    failures += 1;
                    warn!(
                        "[LOOP {}] poll failed ({}/{}): {}",
                        self.idx, failures, MAX_WAIT_FAILURES, e
                    );
                    if failures >= MAX_WAIT_FAILURES {
                        error!("[LOOP {}] giving up after repeated poll failures", self.idx);
                        self.shared.record_fatal(e);
                        break;
                    }
                    continue;
                }
            }

            for r in &ready {
                self.process(*r);
            }
            self.drain_queue();
            self.maybe_tick();
        }

        self.stop();
    }

    fn process(&mut self, r: Readiness) {
        if Some(r.token) == self.listener_token {
            self.on_listener_ready();
            return;
        }

        let Some(conn) = self.conns.get(&r.token) else {
            return;
        };
        let state = conn.state;

        if state == ConnState::Open && (r.readable || r.closed) {
            self.on_readable(r.token);
        }
        if r.writable || r.error {
            self.flush(r.token);
        }
    }

    fn on_listener_ready(&mut self) {
        let Some(listener) = self.listener.as_ref() else {
            return;
        };
        if matches!(listener, Listener::Udp(_)) {
            self.read_datagrams();
            return;
        }

        let mut accepted = Accepted::new();
        accept_ready(listener, &self.shared.options, &mut accepted);
        for (stream, remote) in accepted {
            self.open(stream, remote);
        }
    }

    /// Register a stream and run `on_opened`.
    fn open(&mut self, mut stream: Stream, remote: Addr) {
        let token = fd_token(&stream);
        let local = match stream.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                warn!("[LOOP {}] dropping {}: {}", self.idx, remote, e);
                return;
            }
        };
        if let Err(e) = self.poller.register(&mut stream, token, Interest::READABLE) {
            warn!("[LOOP {}] failed to register {}: {}", self.idx, remote, e);
            return;
        }

        self.serial += 1;
        let handle = ConnHandle::new(
            self.tx.clone(),
            token,
            self.serial,
            None,
            Arc::clone(&self.shared.options.codec),
        );
        debug!("[LOOP {}] opened {} -> {}", self.idx, remote, local);
        self.shared.server.loads[self.idx].fetch_add(1, Ordering::Relaxed);
        self.conns
            .insert(token, Conn::new(Transport::Stream(stream), local, remote, handle));

        let shared = Arc::clone(&self.shared);
        let Some(conn) = self.conns.get_mut(&token) else {
            return;
        };
        let (out, action) = shared.handler.on_opened(conn);
        if conn.state == ConnState::Opening {
            conn.state = ConnState::Open;
        }
        if let Some(out) = out {
            conn.outbound.push(out);
        }
        self.apply_action(token, action);
        self.flush(token);
    }

    /// Read until `WouldBlock`, decoding after every chunk.
    fn on_readable(&mut self, token: Token) {
        loop {
            let Some(conn) = self.conns.get_mut(&token) else {
                return;
            };
            if conn.state != ConnState::Open {
                return;
            }
            let Some(stream) = conn.stream_mut() else {
                return;
            };

            let n = match stream.read(&mut self.scratch) {
                Ok(0) => {
                    trace!("[LOOP {}] peer {} closed", self.idx, conn.remote);
                    // Half-closed peers still get queued replies.
                    conn.close();
                    self.flush(token);
                    return;
                }
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.close(token, Some(Error::Io(e)));
                    return;
                }
            };
            trace!("[LOOP {}] read {} bytes from {}", self.idx, n, conn.remote);
            conn.inbound.extend_from_slice(&self.scratch[..n]);

            if let Err(e) = self.decode(token) {
                debug!("[LOOP {}] closing after error: {}", self.idx, e);
                self.close(token, Some(e));
                return;
            }
            if !self.flush(token) {
                return;
            }
        }
    }

    /// Feed buffered input through the codec, calling `react` per frame.
    fn decode(&mut self, token: Token) -> Result<(), Error> {
        let shared = Arc::clone(&self.shared);
        let codec = &shared.options.codec;
        let Some(conn) = self.conns.get_mut(&token) else {
            return Ok(());
        };

        let mut inbound = mem::take(&mut conn.inbound);
        let mut offset = 0;
        let mut action = Action::None;
        let mut result = Ok(());

        while conn.state == ConnState::Open {
            let frame = match codec.decode(&inbound.as_slice()[offset..]) {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    result = Err(Error::Codec(e));
                    break;
                }
            };
            if frame.consumed == 0 {
                break;
            }
            offset += frame.consumed;
            conn.undecoded = inbound.len() - offset;

            let (out, act) = shared.handler.react(frame.payload, conn);
            if let Some(out) = out {
                match codec.encode(&out) {
                    Ok(wire) => conn.outbound.push(wire),
                    Err(e) => {
                        result = Err(Error::Codec(e));
                        break;
                    }
                }
            }
            if act != Action::None {
                action = act;
                break;
            }
        }

        inbound.consume(offset);
        conn.inbound = inbound;
        conn.undecoded = 0;

        result?;
        self.apply_action(token, action);
        Ok(())
    }

    fn apply_action(&mut self, token: Token, action: Action) {
        match action {
            Action::None => {}
            Action::Close => {
                if let Some(conn) = self.conns.get_mut(&token) {
                    conn.close();
                }
            }
            Action::Shutdown => self.shared.trigger_shutdown(),
        }
    }

    /// Write queued output and keep write interest in sync.
    ///
    /// Returns `false` once the connection is gone.
    fn flush(&mut self, token: Token) -> bool {
        let Some(conn) = self.conns.get_mut(&token) else {
            return false;
        };

        if !conn.outbound.is_empty() {
            self.shared.handler.pre_write();
        }
        let drained = match conn.flush_outbound() {
            Ok(drained) => drained,
            Err(e) => {
                self.close(token, Some(Error::Io(e)));
                return false;
            }
        };

        let interest = if drained {
            Interest::READABLE
        } else {
            Interest::READABLE | Interest::WRITABLE
        };
        if conn.write_armed == drained {
            let Some(stream) = conn.stream_mut() else {
                return false;
            };
            if let Err(e) = self.poller.modify(stream, token, interest) {
                self.close(token, Some(Error::Io(e)));
                return false;
            }
            conn.write_armed = !drained;
        }

        if drained && conn.state == ConnState::Closing {
            self.close(token, None);
            return false;
        }
        true
    }

    /// Tear a connection down: `on_closed` first, then the fd is dropped.
    fn close(&mut self, token: Token, err: Option<Error>) {
        let Some(mut conn) = self.conns.remove(&token) else {
            return;
        };
        if let Some(stream) = conn.stream_mut() {
            let _ = self.poller.unregister(stream);
        }
        conn.state = ConnState::Closing;
        self.shared.server.loads[self.idx].fetch_sub(1, Ordering::Relaxed);

        let action = self.shared.handler.on_closed(&mut conn, err.as_ref());
        conn.state = ConnState::Closed;
        match &err {
            Some(e) => debug!("[LOOP {}] closed {}: {}", self.idx, conn.remote, e),
            None => debug!("[LOOP {}] closed {}", self.idx, conn.remote),
        }
        drop(conn);

        if action == Action::Shutdown {
            self.shared.trigger_shutdown();
        }
    }

    /// Receive datagrams until `WouldBlock`, one ephemeral connection each.
    fn read_datagrams(&mut self) {
        let shared = Arc::clone(&self.shared);
        loop {
            let Some(Listener::Udp(socket)) = self.listener.as_ref() else {
                return;
            };
            let (n, peer) = match socket.recv_from(&mut self.scratch) {
                Ok(received) => received,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("[LOOP {}] recv_from failed: {}", self.idx, e);
                    return;
                }
            };
            let local = match socket.local_addr() {
                Ok(addr) => Addr::Inet(addr),
                Err(e) => {
                    warn!("[LOOP {}] local_addr failed: {}", self.idx, e);
                    return;
                }
            };

            self.serial += 1;
            let token = fd_token(socket);
            let handle = ConnHandle::new(
                self.tx.clone(),
                token,
                self.serial,
                Some(peer),
                Arc::clone(&shared.options.codec),
            );
            let mut conn = Conn::new(Transport::Datagram(peer), local, Addr::Inet(peer), handle);
            conn.state = ConnState::Open;

            trace!("[LOOP {}] datagram of {} bytes from {}", self.idx, n, peer);
            let (out, action) = shared.handler.react(&self.scratch[..n], &mut conn);
            if let Some(out) = out {
                conn.outbound.push(out);
            }

            let mut replies = mem::take(&mut conn.outbound);
            if !replies.is_empty() {
                shared.handler.pre_write();
            }
            while let Some(chunk) = replies.pop_front() {
                self.send_datagram(peer, &chunk);
            }
            conn.state = ConnState::Closed;

            if action == Action::Shutdown {
                shared.trigger_shutdown();
            }
        }
    }

    fn send_datagram(&self, peer: SocketAddr, data: &[u8]) {
        let Some(Listener::Udp(socket)) = self.listener.as_ref() else {
            warn!("[LOOP {}] send_to without a datagram socket", self.idx);
            return;
        };
        match socket.send_to(data, peer) {
            Ok(_) => {}
            Err(e) => warn!("[LOOP {}] send_to {} failed: {}", self.idx, peer, e),
        }
    }

    /// Apply jobs queued by other threads, FIFO.
    fn drain_queue(&mut self) {
        let mut jobs = mem::take(&mut self.jobs);
        self.queue.drain(|job| jobs.push(job));
        for job in jobs.drain(..) {
            self.apply_job(job);
        }
        self.jobs = jobs;
    }

    fn live(&mut self, token: Token, serial: u64) -> Option<&mut Conn> {
        self.conns
            .get_mut(&token)
            .filter(|c| c.serial == serial && c.state != ConnState::Closed)
    }

    fn apply_job(&mut self, job: Job) {
        match job {
            Job::Register { stream, remote } => self.open(stream, remote),
            Job::Write {
                token,
                serial,
                data,
            } => {
                if let Some(conn) = self.live(token, serial) {
                    if conn.state == ConnState::Open {
                        conn.outbound.push(data);
                        self.flush(token);
                    }
                }
            }
            Job::Wake { token, serial } => self.wake(token, serial),
            Job::Close { token, serial } => {
                if let Some(conn) = self.live(token, serial) {
                    conn.close();
                    self.flush(token);
                }
            }
            Job::SendTo { peer, data } => {
                self.shared.handler.pre_write();
                self.send_datagram(peer, &data);
            }
        }
    }

    /// `react` with an empty frame, as if input had arrived.
    fn wake(&mut self, token: Token, serial: u64) {
        let shared = Arc::clone(&self.shared);
        let Some(conn) = self.live(token, serial) else {
            return;
        };
        if conn.state != ConnState::Open {
            return;
        }

        let (out, action) = shared.handler.react(&[], conn);
        if let Some(out) = out {
            match shared.options.codec.encode(&out) {
                Ok(wire) => conn.outbound.push(wire),
                Err(e) => {
                    self.close(token, Some(Error::Codec(e)));
                    return;
                }
            }
        }
        self.apply_action(token, action);
        self.flush(token);
    }

    fn maybe_tick(&mut self) {
        let Some(deadline) = self.next_tick else {
            return;
        };
        if Instant::now() < deadline {
            return;
        }
        let (delay, action) = self.shared.handler.tick();
        self.next_tick = Some(Instant::now() + delay);
        if action == Action::Shutdown {
            self.shared.trigger_shutdown();
        }
    }

    /// Best-effort flush, close every connection, release the listener.
    fn stop(&mut self) {
        debug!(
            "[LOOP {}] stopping with {} connections",
            self.idx,
            self.conns.len()
        );
        let tokens: Vec<Token> = self.conns.keys().copied().collect();
        for token in tokens {
            if let Some(conn) = self.conns.get_mut(&token) {
                let _ = conn.flush_outbound();
            }
            self.close(token, None);
        }

        if let Some(listener) = self.listener.as_mut() {
            let _ = self.poller.unregister(listener);
        }
        debug!("[LOOP {}] stopped", self.idx);
    }
}
