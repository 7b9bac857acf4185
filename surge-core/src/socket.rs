//! Listening socket construction and accepted-socket tuning.
//!
//! Listeners are created through `socket2` so address reuse, port reuse and
//! the accept backlog can be set before `bind`, then handed to `mio` as
//! non-blocking sources.

use mio::net::{TcpListener, TcpStream, UdpSocket};
use socket2::{Domain, Protocol, SockRef, Socket, TcpKeepalive, Type};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::debug;

#[cfg(unix)]
use mio::net::UnixListener;
#[cfg(unix)]
use std::path::Path;

/// Accept backlog for stream listeners.
pub const LISTEN_BACKLOG: i32 = 1024;

fn inet_socket(addr: SocketAddr, ty: Type, proto: Protocol, reuse_port: bool) -> io::Result<Socket> {
    let socket = Socket::new(Domain::for_address(addr), ty, Some(proto))?;
    socket.set_reuse_address(true)?;
    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    if reuse_port {
        socket.set_reuse_port(true)?;
    }
    #[cfg(not(all(unix, not(any(target_os = "solaris", target_os = "illumos")))))]
    let _ = reuse_port;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    Ok(socket)
}

/// Bind a non-blocking TCP listener.
///
/// # Errors
///
/// Returns an error if the socket cannot be created, configured or bound.
pub fn bind_tcp(addr: SocketAddr, reuse_port: bool) -> io::Result<TcpListener> {
    let socket = inet_socket(addr, Type::STREAM, Protocol::TCP, reuse_port)?;
    socket.listen(LISTEN_BACKLOG)?;
    Ok(TcpListener::from_std(socket.into()))
}

/// Bind a non-blocking UDP socket.
///
/// # Errors
///
/// Returns an error if the socket cannot be created, configured or bound.
pub fn bind_udp(addr: SocketAddr, reuse_port: bool) -> io::Result<UdpSocket> {
    let socket = inet_socket(addr, Type::DGRAM, Protocol::UDP, reuse_port)?;
    Ok(UdpSocket::from_std(socket.into()))
}

/// Bind a non-blocking Unix domain stream listener.
///
/// A stale socket file left behind at `path` is removed first. A socket
/// that still accepts connections, or any file that is not a socket, is
/// left alone.
///
/// # Errors
///
/// Returns [`io::ErrorKind::AddrInUse`] if another listener owns `path`,
/// [`io::ErrorKind::AlreadyExists`] if `path` is not a socket, or the error
/// from removing the stale file or binding.
#[cfg(unix)]
pub fn bind_unix(path: &Path) -> io::Result<UnixListener> {
    remove_stale_socket(path)?;
    let socket = Socket::new(Domain::UNIX, Type::STREAM, None)?;
    socket.set_nonblocking(true)?;
    socket.bind(&socket2::SockAddr::unix(path)?)?;
    socket.listen(LISTEN_BACKLOG)?;
    Ok(UnixListener::from_std(socket.into()))
}

#[cfg(unix)]
fn remove_stale_socket(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::FileTypeExt;

    let meta = match std::fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    if !meta.file_type().is_socket() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} exists and is not a socket", path.display()),
        ));
    }
    if std::os::unix::net::UnixStream::connect(path).is_ok() {
        return Err(io::Error::new(
            io::ErrorKind::AddrInUse,
            format!("{} is served by another listener", path.display()),
        ));
    }
    debug!("[SOCKET] removing stale socket file {}", path.display());
    std::fs::remove_file(path)
}

/// Apply `TCP_NODELAY` and optional keepalive to an accepted stream.
///
/// # Errors
///
/// Returns the first socket option that could not be set.
pub fn tune_tcp(stream: &TcpStream, nodelay: bool, keepalive: Option<Duration>) -> io::Result<()> {
    stream.set_nodelay(nodelay)?;
    if let Some(idle) = keepalive {
        let sock = SockRef::from(stream);
        sock.set_keepalive(true)?;
        sock.set_tcp_keepalive(&TcpKeepalive::new().with_time(idle))?;
    }
    Ok(())
}
