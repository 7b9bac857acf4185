//! Unix domain socket integration tests.

#![cfg(unix)]

mod common;

use bytes::Bytes;
use common::{is_closed, read_line, send_line, start, IO_TIMEOUT};
use flume::Sender;
use std::io::BufReader;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use surge::{serve, Action, Addr, Conn, Error, EventHandler, LineCodec, Options, Server};

fn socket_path(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "surge-{tag}-{}-{}.sock",
        std::process::id(),
        rand::random::<u32>()
    ))
}

struct LineEcho {
    ready: Sender<Addr>,
}

impl EventHandler for LineEcho {
    fn on_init_complete(&self, server: &Server) -> Action {
        let _ = self.ready.send(server.addr().clone());
        Action::None
    }

    fn on_opened(&self, conn: &mut Conn) -> (Option<Bytes>, Action) {
        assert!(matches!(conn.local_addr(), Addr::Unix(Some(_))));
        assert!(!conn.is_datagram());
        (None, Action::None)
    }

    fn react(&self, line: &[u8], _conn: &mut Conn) -> (Option<Bytes>, Action) {
        if line == b"stop" {
            return (None, Action::Shutdown);
        }
        (Some(Bytes::copy_from_slice(line)), Action::None)
    }

    fn on_closed(&self, _conn: &mut Conn, err: Option<&Error>) -> Action {
        assert!(err.is_none(), "unexpected close error: {err:?}");
        Action::None
    }
}

fn run_unix(tag: &str, options: Options) {
    let path = socket_path(tag);
    let server = start(
        |ready| LineEcho { ready },
        &format!("unix://{}", path.display()),
        options.with_codec(LineCodec::new()),
    );
    assert_eq!(server.addr, Addr::Unix(Some(path.clone())));

    let mut readers = Vec::new();
    for i in 0..4 {
        let stream = UnixStream::connect(&path).unwrap();
        stream.set_read_timeout(Some(IO_TIMEOUT)).unwrap();
        let mut writer = stream.try_clone().unwrap();
        let mut reader = BufReader::new(stream);
        send_line(&mut writer, &format!("line {i}"));
        assert_eq!(read_line(&mut reader), format!("line {i}\r\n"));
        readers.push((writer, reader));
    }

    let (writer, _) = &mut readers[0];
    send_line(writer, "stop");
    for (_, reader) in &mut readers {
        assert!(is_closed(reader));
    }

    server.join().unwrap();
    assert!(!path.exists(), "socket file left behind");
}

#[test]
fn test_unix_echo_single_loop() {
    run_unix("single", Options::default());
}

#[test]
fn test_unix_echo_multi_loop() {
    run_unix("multi", Options::default().with_num_event_loop(2));
}

#[test]
fn test_unix_ignores_reuse_port() {
    run_unix(
        "reuse",
        Options::default().with_num_event_loop(2).with_reuse_port(true),
    );
}

struct Nop;

impl EventHandler for Nop {}

#[test]
fn test_unix_bind_leaves_regular_file_untouched() {
    let path = socket_path("regular");
    std::fs::write(&path, b"precious data").unwrap();

    let err = serve(Nop, &format!("unix://{}", path.display()), Options::default()).unwrap_err();
    match err {
        Error::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::AlreadyExists),
        other => panic!("expected an io error, got {other}"),
    }
    assert_eq!(std::fs::read(&path).unwrap(), b"precious data");
    let _ = std::fs::remove_file(&path);
}
