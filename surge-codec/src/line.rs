//! Line-based framing.

use crate::{decode_delimited, Codec, CodecError, Frame, DEFAULT_MAX_LINE_LENGTH};
use bytes::{BufMut, Bytes, BytesMut};

/// Frames terminated by `\n`; a `\r` right before the terminator is dropped.
///
/// Encoding appends `\r\n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineCodec {
    /// Longest accepted line, terminator excluded.
    pub max_length: usize,
}

impl Default for LineCodec {
    fn default() -> Self {
        Self {
            max_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }
}

impl LineCodec {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_max_length(max_length: usize) -> Self {
        Self { max_length }
    }
}

impl Codec for LineCodec {
    fn encode(&self, payload: &[u8]) -> Result<Bytes, CodecError> {
        if payload.contains(&b'\n') {
            return Err(CodecError::DelimiterInPayload);
        }
        let mut out = BytesMut::with_capacity(payload.len() + 2);
        out.put_slice(payload);
        out.put_slice(b"\r\n");
        Ok(out.freeze())
    }

    fn decode<'a>(&self, src: &'a [u8]) -> Result<Option<Frame<'a>>, CodecError> {
        decode_delimited(src, b'\n', self.max_length, true)
    }

    fn validate(&self) -> Result<(), CodecError> {
        if self.max_length == 0 {
            return Err(CodecError::InvalidConfig(
                "line max_length must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
