//! Surge Core
//!
//! This crate contains the runtime-agnostic building blocks of the reactor:
//! - Listen address parsing (`endpoint`)
//! - Readiness poller over epoll/kqueue (`poller`)
//! - Inbound buffer and outbound chunk queue (`buffer`)
//! - Cross-thread wake-queue (`queue`)
//! - Listener construction and socket tuning (`socket`)
//! - Error types (`error`)

#![deny(unsafe_code)]
// Allow some pedantic lints that are intentional in this crate
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
pub mod buffer;
pub mod endpoint;
pub mod error;
pub mod poller;
pub mod queue;
pub mod socket;
