//! Shared helpers for the integration tests.

#![allow(dead_code)]

use flume::{Receiver, Sender};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::Duration;
use surge::{serve, Addr, EventHandler, Options};

pub const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Running server under test.
pub struct Running {
    pub addr: Addr,
    pub thread: thread::JoinHandle<surge::Result<()>>,
}

impl Running {
    pub fn inet(&self) -> SocketAddr {
        self.addr.as_inet().expect("inet listener")
    }

    /// Wait for `serve` to return.
    pub fn join(self) -> surge::Result<()> {
        self.thread.join().expect("serve thread panicked")
    }
}

/// Run `serve` on a background thread and wait until it has bound.
///
/// `make` receives the sender the handler must fire from `on_init_complete`.
pub fn start<H, F>(make: F, addr: &str, options: Options) -> Running
where
    H: EventHandler,
    F: FnOnce(Sender<Addr>) -> H,
{
    surge::dev_tracing::init_tracing();

    let (ready_tx, ready_rx) = flume::bounded(1);
    let handler = make(ready_tx);
    let addr = addr.to_string();
    let thread = thread::Builder::new()
        .name("serve".into())
        .spawn(move || serve(handler, &addr, options))
        .expect("spawn serve");

    let addr = match ready_rx.recv_timeout(IO_TIMEOUT) {
        Ok(addr) => addr,
        Err(_) => panic!("server did not start: {:?}", thread.join()),
    };
    Running { addr, thread }
}

pub fn connect(addr: SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).expect("connect");
    stream.set_read_timeout(Some(IO_TIMEOUT)).unwrap();
    stream.set_nodelay(true).unwrap();
    stream
}

/// Read exactly `n` bytes.
pub fn read_n<R: Read>(reader: &mut R, n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    reader.read_exact(&mut buf).expect("read_exact");
    buf
}

/// Read one `\n`-terminated line, terminator included.
pub fn read_line<R: Read>(reader: &mut BufReader<R>) -> String {
    let mut line = String::new();
    reader.read_line(&mut line).expect("read_line");
    line
}

/// True once the peer has closed: EOF or a reset.
pub fn is_closed<R: Read>(reader: &mut R) -> bool {
    let mut buf = [0u8; 64];
    match reader.read(&mut buf) {
        Ok(0) => true,
        Ok(_) => false,
        Err(e) => !matches!(
            e.kind(),
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
        ),
    }
}

pub fn send_line<W: Write>(writer: &mut W, line: &str) {
    writer.write_all(line.as_bytes()).unwrap();
    writer.write_all(b"\r\n").unwrap();
}

/// Collect everything already sent on `rx`.
pub fn collect<T>(rx: &Receiver<T>) -> Vec<T> {
    rx.try_iter().collect()
}
