//! # Surge
//!
//! An event-driven network server engine: a fixed set of reactor loops, each
//! on its own thread, drives non-blocking TCP, UDP or Unix sockets and calls
//! back into a user [`EventHandler`].
//!
//! ## Architecture
//!
//! - **`surge-core`**: address parsing, readiness poller, buffers, wake-queue
//! - **`surge-codec`**: stateless frame codecs (line, delimiter, fixed, length field)
//! - **`surge`**: loops, acceptor, connections and the public API (this crate)
//!
//! Each connection is pinned to one loop for its whole life. Other threads
//! reach it only through a [`ConnHandle`], which enqueues a job on the owning
//! loop and wakes it.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bytes::Bytes;
//! use surge::{serve, Action, Conn, EventHandler, LineCodec, Options};
//!
//! struct Echo;
//!
//! impl EventHandler for Echo {
//!     fn react(&self, line: &[u8], _conn: &mut Conn) -> (Option<Bytes>, Action) {
//!         if line == b"quit" {
//!             return (None, Action::Close);
//!         }
//!         (Some(Bytes::copy_from_slice(line)), Action::None)
//!     }
//! }
//!
//! let options = Options::default()
//!     .with_multicore(true)
//!     .with_codec(LineCodec::new());
//! serve(Echo, "tcp://127.0.0.1:9000", options).unwrap();
//! ```
//!
//! ## Addresses
//!
//! - `tcp://127.0.0.1:9000`, `tcp://:9000`, `tcp://` (ephemeral port)
//! - `udp://0.0.0.0:9000`
//! - `unix:///tmp/surge.sock`

#![deny(unsafe_code)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]

mod balancer;
pub mod conn;
pub mod dev_tracing;
pub mod error;
mod event_loop;
pub mod handler;
mod listener;
pub mod options;
pub mod server;

pub use bytes::Bytes;

pub use conn::{Addr, Conn, ConnHandle, ConnState};
pub use error::{Error, Result};
pub use handler::{Action, EventHandler};
pub use options::{LoadBalancing, Options};
pub use server::{serve, Server};

pub use surge_codec::{
    ByteOrder, Codec, CodecError, DelimiterCodec, FixedLengthCodec, Frame, LengthFieldCodec,
    LengthFieldConfig, LineCodec, RawCodec,
};
pub use surge_core::endpoint::EndpointError;
