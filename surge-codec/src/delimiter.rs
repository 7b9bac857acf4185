use crate::{decode_delimited, Codec, CodecError, Frame, DEFAULT_MAX_LINE_LENGTH};
use bytes::{BufMut, Bytes, BytesMut};

/// Frames terminated by a single delimiter byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelimiterCodec {
    pub delimiter: u8,
    pub max_length: usize,
}

impl DelimiterCodec {
    #[must_use]
    pub const fn new(delimiter: u8) -> Self {
        Self {
            delimiter,
            max_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }

    #[must_use]
    pub const fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }
}

impl Codec for DelimiterCodec {
    fn encode(&self, payload: &[u8]) -> Result<Bytes, CodecError> {
        if payload.contains(&self.delimiter) {
            return Err(CodecError::DelimiterInPayload);
        }
        let mut out = BytesMut::with_capacity(payload.len() + 1);
        out.put_slice(payload);
        out.put_u8(self.delimiter);
        Ok(out.freeze())
    }

    fn decode<'a>(&self, src: &'a [u8]) -> Result<Option<Frame<'a>>, CodecError> {
        decode_delimited(src, self.delimiter, self.max_length, false)
    }

    fn validate(&self) -> Result<(), CodecError> {
        if self.max_length == 0 {
            return Err(CodecError::InvalidConfig(
                "delimiter max_length must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
