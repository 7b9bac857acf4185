//! Surge frame codecs
//!
//! Sans-IO framing strategies that split a byte stream into discrete frames
//! and back. Decoders borrow from the caller's buffer and report how many
//! bytes a frame consumed, so the caller owns buffering and discards the
//! consumed prefix itself.
//!
//! Built-in strategies:
//! - [`RawCodec`]: passthrough, every read is one frame (default)
//! - [`LineCodec`]: `\n` terminated, optional `\r` stripped
//! - [`DelimiterCodec`]: single configurable delimiter byte
//! - [`FixedLengthCodec`]: frames of exactly N bytes
//! - [`LengthFieldCodec`]: length-prefixed frames with a configurable header

#![deny(unsafe_code)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::module_name_repetitions)]

pub mod delimiter;
pub mod fixed;
pub mod length_field;
pub mod line;

pub use delimiter::DelimiterCodec;
pub use fixed::FixedLengthCodec;
pub use length_field::{ByteOrder, LengthFieldCodec, LengthFieldConfig};
pub use line::LineCodec;

use bytes::Bytes;
use std::fmt;
use thiserror::Error;

/// Default maximum length for line and delimiter frames (64 KiB).
pub const DEFAULT_MAX_LINE_LENGTH: usize = 64 * 1024;

/// Codec configuration and framing errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Fixed frame length must be non-zero")]
    ZeroFrameLength,

    #[error("Unsupported length field width: {0} (expected 1, 2, 3, 4 or 8)")]
    UnsupportedFieldLength(usize),

    #[error("Invalid codec configuration: {0}")]
    InvalidConfig(String),

    #[error("Line of {length} bytes exceeds maximum of {max}")]
    LineTooLong { length: usize, max: usize },

    #[error("Frame of {length} bytes exceeds maximum of {max}")]
    FrameTooLarge { length: u128, max: usize },

    #[error("Frame length {length} is shorter than the {header} byte header")]
    FrameLengthOutOfRange { length: i128, header: usize },

    #[error("Payload contains the frame delimiter")]
    DelimiterInPayload,

    #[error("Payload of {length} bytes is not a multiple of the {frame_length} byte frame")]
    NotMultipleOfFrameLength { length: usize, frame_length: usize },

    #[error("Length {length} does not fit a {width} byte length field")]
    LengthNotRepresentable { length: i128, width: usize },
}

/// A decoded frame borrowing from the input buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    /// Bytes handed to the application.
    pub payload: &'a [u8],
    /// Bytes of input this frame occupied, including any stripped header or
    /// terminator.
    pub consumed: usize,
}

impl<'a> Frame<'a> {
    #[inline]
    #[must_use]
    pub const fn new(payload: &'a [u8], consumed: usize) -> Self {
        Self { payload, consumed }
    }
}

/// Framing strategy shared by every connection of a server.
///
/// Implementations are stateless: all per-connection state lives in the
/// caller's buffer, so a single codec instance can serve every loop.
pub trait Codec: Send + Sync + fmt::Debug {
    /// Wrap an outbound payload in its wire framing.
    fn encode(&self, payload: &[u8]) -> Result<Bytes, CodecError>;

    /// Try to extract one frame from the front of `src`.
    ///
    /// Returns:
    /// - `Ok(Some(frame))` → frame decoded, `frame.consumed` bytes used
    /// - `Ok(None)` → need more data, `src` must be left as is
    /// - `Err` → malformed input, the stream cannot be resynchronized
    fn decode<'a>(&self, src: &'a [u8]) -> Result<Option<Frame<'a>>, CodecError>;

    /// Check configuration parameters before the codec is put to use.
    fn validate(&self) -> Result<(), CodecError> {
        Ok(())
    }
}

/// Passthrough codec: whatever has been read so far is one frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCodec;

impl Codec for RawCodec {
    fn encode(&self, payload: &[u8]) -> Result<Bytes, CodecError> {
        Ok(Bytes::copy_from_slice(payload))
    }

    fn decode<'a>(&self, src: &'a [u8]) -> Result<Option<Frame<'a>>, CodecError> {
        if src.is_empty() {
            return Ok(None);
        }
        Ok(Some(Frame::new(src, src.len())))
    }
}

/// Scan for `delim`, enforcing `max` on the frame body.
///
/// Shared by the line and delimiter codecs. `strip_cr` drops one `\r`
/// immediately before the delimiter and discounts a trailing `\r` in an
/// unterminated buffer.
pub(crate) fn decode_delimited(
    src: &[u8],
    delim: u8,
    max: usize,
    strip_cr: bool,
) -> Result<Option<Frame<'_>>, CodecError> {
    match src.iter().position(|&b| b == delim) {
        Some(pos) => {
            let mut body = &src[..pos];
            if strip_cr && body.last() == Some(&b'\r') {
                body = &body[..body.len() - 1];
            }
            if body.len() > max {
                return Err(CodecError::LineTooLong {
                    length: body.len(),
                    max,
                });
            }
            Ok(Some(Frame::new(body, pos + 1)))
        }
        None => {
            let pending = if strip_cr && src.last() == Some(&b'\r') {
                src.len() - 1
            } else {
                src.len()
            };
            if pending > max {
                return Err(CodecError::LineTooLong {
                    length: pending,
                    max,
                });
            }
            Ok(None)
        }
    }
}
