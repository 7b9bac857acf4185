use crate::{Codec, CodecError, Frame};
use bytes::Bytes;

/// Frames of exactly `frame_length` bytes, no header or delimiter.
///
/// Encoding passes the payload through unchanged as long as it splits into
/// whole frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedLengthCodec {
    pub frame_length: usize,
}

impl FixedLengthCodec {
    #[must_use]
    pub const fn new(frame_length: usize) -> Self {
        Self { frame_length }
    }
}

impl Codec for FixedLengthCodec {
    fn encode(&self, payload: &[u8]) -> Result<Bytes, CodecError> {
        self.validate()?;
        if payload.len() % self.frame_length != 0 {
            return Err(CodecError::NotMultipleOfFrameLength {
                length: payload.len(),
                frame_length: self.frame_length,
            });
        }
        Ok(Bytes::copy_from_slice(payload))
    }

    fn decode<'a>(&self, src: &'a [u8]) -> Result<Option<Frame<'a>>, CodecError> {
        self.validate()?;
        if src.len() < self.frame_length {
            return Ok(None);
        }
        Ok(Some(Frame::new(&src[..self.frame_length], self.frame_length)))
    }

    fn validate(&self) -> Result<(), CodecError> {
        if self.frame_length == 0 {
            return Err(CodecError::ZeroFrameLength);
        }
        Ok(())
    }
}
