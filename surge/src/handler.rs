//! User callback surface.

use crate::conn::Conn;
use crate::error::Error;
use crate::server::Server;
use bytes::Bytes;
use std::time::Duration;

/// What the engine should do after a callback returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Action {
    /// Keep going.
    #[default]
    None,
    /// Close this connection once its pending output is flushed.
    Close,
    /// Stop every loop and return from `serve`.
    Shutdown,
}

/// Server event callbacks.
///
/// Every method has a no-op default, so handlers override only what they
/// need. One handler instance is shared by all loops; callbacks on the same
/// loop never run concurrently, but callbacks on different loops may.
///
/// Bytes returned from [`react`](Self::react) are encoded with the server's
/// codec. Bytes returned from [`on_opened`](Self::on_opened) are written as
/// is.
pub trait EventHandler: Send + Sync + 'static {
    /// Listeners are bound and loops are about to start.
    fn on_init_complete(&self, _server: &Server) -> Action {
        Action::None
    }

    /// Every loop has exited; `serve` returns right after this.
    fn on_shutdown(&self, _server: &Server) {}

    /// A stream connection was accepted.
    fn on_opened(&self, _conn: &mut Conn) -> (Option<Bytes>, Action) {
        (None, Action::None)
    }

    /// A stream connection is being torn down.
    ///
    /// `err` is `None` for a peer EOF, a requested close or server shutdown.
    fn on_closed(&self, _conn: &mut Conn, _err: Option<&Error>) -> Action {
        Action::None
    }

    /// About to flush queued output to the kernel.
    fn pre_write(&self) {}

    /// A frame was decoded, a datagram arrived, or the connection was woken
    /// (empty frame).
    fn react(&self, _frame: &[u8], _conn: &mut Conn) -> (Option<Bytes>, Action) {
        (None, Action::None)
    }

    /// Periodic timer, enabled with `Options::ticker`. Returns the delay
    /// until the next tick.
    fn tick(&self) -> (Duration, Action) {
        (Duration::from_secs(1), Action::None)
    }
}
