//! Startup, ticker, wake-up and address handling.

mod common;

use bytes::Bytes;
use common::{connect, is_closed, read_line, start};
use flume::Sender;
use std::io::BufReader;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use surge::{
    serve, Action, Addr, CodecError, Conn, EndpointError, Error, EventHandler, FixedLengthCodec,
    LineCodec, Options, Server,
};

struct Nop;

impl EventHandler for Nop {}

#[test]
fn test_unknown_scheme_is_rejected() {
    let err = serve(Nop, "tulip://howdy", Options::default()).unwrap_err();
    assert!(matches!(err, Error::Endpoint(EndpointError::InvalidScheme(_))), "{err}");
}

#[test]
fn test_missing_scheme_is_rejected() {
    let err = serve(Nop, "howdy", Options::default()).unwrap_err();
    assert!(matches!(err, Error::Endpoint(EndpointError::MissingScheme(_))), "{err}");
}

#[test]
fn test_invalid_codec_is_rejected_before_binding() {
    let options = Options::default().with_codec(FixedLengthCodec::new(0));
    let err = serve(Nop, "tcp://127.0.0.1:0", options).unwrap_err();
    assert!(matches!(err, Error::Codec(CodecError::ZeroFrameLength)), "{err}");
}

#[test]
fn test_bind_conflict_is_reported() {
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = format!("tcp://{}", taken.local_addr().unwrap());
    let err = serve(Nop, &addr, Options::default()).unwrap_err();
    assert!(matches!(err, Error::Io(_)), "{err}");
}

/// Refuses to start.
struct Abort {
    init: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
}

impl EventHandler for Abort {
    fn on_init_complete(&self, server: &Server) -> Action {
        assert_ne!(server.addr().as_inet().map(|a| a.port()), Some(0));
        self.init.store(true, Ordering::SeqCst);
        Action::Shutdown
    }

    fn on_shutdown(&self, _server: &Server) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

#[test]
fn test_shutdown_from_on_init_complete_returns_ok() {
    let init = Arc::new(AtomicBool::new(false));
    let shutdown = Arc::new(AtomicBool::new(false));
    let handler = Abort {
        init: Arc::clone(&init),
        shutdown: Arc::clone(&shutdown),
    };

    serve(handler, "tcp://", Options::default()).unwrap();
    assert!(init.load(Ordering::SeqCst));
    assert!(!shutdown.load(Ordering::SeqCst));
}

/// Counts ticks and stops on tick number `limit`.
struct Ticker {
    ticks: Arc<AtomicUsize>,
    limit: usize,
    owner: Sender<String>,
}

impl EventHandler for Ticker {
    fn tick(&self) -> (Duration, Action) {
        let n = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self
            .owner
            .send(thread::current().name().unwrap_or_default().to_string());
        if n == self.limit {
            return (Duration::ZERO, Action::Shutdown);
        }
        (Duration::from_millis(10), Action::None)
    }
}

#[test]
fn test_ticker_fires_on_first_loop_until_shutdown() {
    let ticks = Arc::new(AtomicUsize::new(0));
    let (owner_tx, owner_rx) = flume::unbounded();
    let handler = Ticker {
        ticks: Arc::clone(&ticks),
        limit: 26,
        owner: owner_tx,
    };

    let started = Instant::now();
    serve(
        handler,
        "tcp://127.0.0.1:0",
        Options::default().with_ticker(true).with_num_event_loop(3),
    )
    .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(ticks.load(Ordering::SeqCst), 26);
    assert!(elapsed >= Duration::from_millis(250), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(5), "{elapsed:?}");
    assert!(owner_rx.try_iter().all(|name| name == "surge-loop-0"));
}

/// Wakes each connection from a helper thread.
struct Sleeper {
    ready: Sender<Addr>,
}

impl EventHandler for Sleeper {
    fn on_init_complete(&self, server: &Server) -> Action {
        let _ = self.ready.send(server.addr().clone());
        Action::None
    }

    fn on_opened(&self, conn: &mut Conn) -> (Option<Bytes>, Action) {
        let handle = conn.handle();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            handle.wake().unwrap();
        });
        (None, Action::None)
    }

    fn react(&self, frame: &[u8], conn: &mut Conn) -> (Option<Bytes>, Action) {
        if frame.is_empty() {
            assert_eq!(conn.inbound_len(), 0);
            return (Some(Bytes::from_static(b"Waking up.")), Action::Close);
        }
        (None, Action::None)
    }

    fn on_closed(&self, _conn: &mut Conn, _err: Option<&Error>) -> Action {
        Action::Shutdown
    }
}

#[test]
fn test_wake_calls_react_with_empty_frame() {
    let server = start(
        |ready| Sleeper { ready },
        "tcp://127.0.0.1:0",
        Options::default().with_codec(LineCodec::new()),
    );
    let mut reader = BufReader::new(connect(server.inet()));
    assert_eq!(read_line(&mut reader), "Waking up.\r\n");
    assert!(is_closed(&mut reader));
    server.join().unwrap();
}

/// Keeps per-connection state in the context slot.
struct Counter {
    ready: Sender<Addr>,
}

impl EventHandler for Counter {
    fn on_init_complete(&self, server: &Server) -> Action {
        let _ = self.ready.send(server.addr().clone());
        Action::None
    }

    fn on_opened(&self, conn: &mut Conn) -> (Option<Bytes>, Action) {
        conn.set_context(0usize);
        (None, Action::None)
    }

    fn react(&self, _line: &[u8], conn: &mut Conn) -> (Option<Bytes>, Action) {
        let Some(seen) = conn.context_mut::<usize>() else {
            return (None, Action::Close);
        };
        *seen += 1;
        let reply = format!("{seen}");
        (Some(Bytes::from(reply)), Action::None)
    }

    fn on_closed(&self, conn: &mut Conn, _err: Option<&Error>) -> Action {
        assert_eq!(conn.context::<usize>(), Some(&3));
        Action::Shutdown
    }
}

#[test]
fn test_context_persists_across_frames() {
    let server = start(
        |ready| Counter { ready },
        "tcp://127.0.0.1:0",
        Options::default().with_codec(LineCodec::new()),
    );
    let stream = connect(server.inet());
    let mut writer = stream.try_clone().unwrap();
    let mut reader = BufReader::new(stream);
    for expected in ["1\r\n", "2\r\n", "3\r\n"] {
        common::send_line(&mut writer, "tick");
        assert_eq!(read_line(&mut reader), expected);
    }
    drop(writer);
    drop(reader);
    server.join().unwrap();
}
