//! Length-prefixed framing.
//!
//! Wire layout of one frame:
//!
//! ```text
//! +----------------+--------------+------------------------+
//! | offset bytes   | length field | body                   |
//! | (opaque)       | (1..8 bytes) | (declared + adjustment)|
//! +----------------+--------------+------------------------+
//! ```
//!
//! The header is everything up to and including the length field. When
//! `length_includes_header` is set the declared value counts the header too.
//! After a frame is complete, `initial_bytes_to_strip` leading bytes are
//! dropped and the rest is the payload.

use crate::{Codec, CodecError, Frame};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Default maximum frame size (16 MiB).
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

/// Byte order of the length field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    #[default]
    BigEndian,
    LittleEndian,
}

/// Length-field framing parameters, shared by encoder and decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LengthFieldConfig {
    pub byte_order: ByteOrder,
    /// Bytes preceding the length field.
    pub length_field_offset: usize,
    /// Width of the length field: 1, 2, 3, 4 or 8.
    pub length_field_length: usize,
    /// Added to the declared value to obtain the body length.
    pub length_adjustment: i64,
    /// The declared value already counts the header bytes.
    pub length_includes_header: bool,
    /// Leading bytes removed from a complete frame.
    pub initial_bytes_to_strip: usize,
    /// Largest accepted frame, header included.
    pub max_frame_length: usize,
}

impl Default for LengthFieldConfig {
    fn default() -> Self {
        Self::new(4)
    }
}

impl LengthFieldConfig {
    /// Big-endian field of `width` bytes at offset zero, stripped on decode.
    #[must_use]
    pub const fn new(width: usize) -> Self {
        Self {
            byte_order: ByteOrder::BigEndian,
            length_field_offset: 0,
            length_field_length: width,
            length_adjustment: 0,
            length_includes_header: false,
            initial_bytes_to_strip: width,
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
        }
    }

    #[must_use]
    pub const fn with_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = byte_order;
        self
    }

    #[must_use]
    pub const fn with_offset(mut self, offset: usize) -> Self {
        self.length_field_offset = offset;
        self
    }

    #[must_use]
    pub const fn with_adjustment(mut self, adjustment: i64) -> Self {
        self.length_adjustment = adjustment;
        self
    }

    #[must_use]
    pub const fn with_length_includes_header(mut self, includes: bool) -> Self {
        self.length_includes_header = includes;
        self
    }

    #[must_use]
    pub const fn with_strip(mut self, strip: usize) -> Self {
        self.initial_bytes_to_strip = strip;
        self
    }

    #[must_use]
    pub const fn with_max_frame_length(mut self, max: usize) -> Self {
        self.max_frame_length = max;
        self
    }

    /// Offset plus field width.
    #[inline]
    #[must_use]
    pub const fn header_len(&self) -> usize {
        self.length_field_offset + self.length_field_length
    }

    /// Largest value the length field can hold.
    const fn field_max(&self) -> u64 {
        if self.length_field_length >= 8 {
            u64::MAX
        } else {
            (1u64 << (self.length_field_length * 8)) - 1
        }
    }
}

/// Length-field based frame codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LengthFieldCodec {
    pub config: LengthFieldConfig,
}

impl LengthFieldCodec {
    #[must_use]
    pub const fn new(config: LengthFieldConfig) -> Self {
        Self { config }
    }

    /// Total frame size implied by a declared length value.
    fn frame_len(&self, declared: u64) -> i128 {
        let cfg = &self.config;
        let mut total = i128::from(declared) + i128::from(cfg.length_adjustment);
        if !cfg.length_includes_header {
            total += cfg.header_len() as i128;
        }
        total
    }
}

impl Codec for LengthFieldCodec {
    fn encode(&self, payload: &[u8]) -> Result<Bytes, CodecError> {
        self.validate()?;
        let cfg = &self.config;
        let header = cfg.header_len();
        let total = header + payload.len();
        if total > cfg.max_frame_length {
            return Err(CodecError::FrameTooLarge {
                length: total as u128,
                max: cfg.max_frame_length,
            });
        }

        let mut declared = payload.len() as i128 - i128::from(cfg.length_adjustment);
        if cfg.length_includes_header {
            declared += header as i128;
        }
        if declared < 0 || declared > i128::from(cfg.field_max()) {
            return Err(CodecError::LengthNotRepresentable {
                length: declared,
                width: cfg.length_field_length,
            });
        }

        let mut out = BytesMut::with_capacity(total);
        out.put_bytes(0, cfg.length_field_offset);
        match cfg.byte_order {
            ByteOrder::BigEndian => out.put_uint(declared as u64, cfg.length_field_length),
            ByteOrder::LittleEndian => out.put_uint_le(declared as u64, cfg.length_field_length),
        }
        out.put_slice(payload);
        Ok(out.freeze())
    }

    fn decode<'a>(&self, src: &'a [u8]) -> Result<Option<Frame<'a>>, CodecError> {
        self.validate()?;
        let cfg = &self.config;
        let header = cfg.header_len();
        if src.len() < header {
            return Ok(None);
        }

        let mut field = &src[cfg.length_field_offset..header];
        let declared = match cfg.byte_order {
            ByteOrder::BigEndian => field.get_uint(cfg.length_field_length),
            ByteOrder::LittleEndian => field.get_uint_le(cfg.length_field_length),
        };

        let total = self.frame_len(declared);
        if total < header as i128 {
            return Err(CodecError::FrameLengthOutOfRange {
                length: total,
                header,
            });
        }
        if total > cfg.max_frame_length as i128 {
            return Err(CodecError::FrameTooLarge {
                length: total as u128,
                max: cfg.max_frame_length,
            });
        }

        let total = total as usize;
        if src.len() < total {
            return Ok(None);
        }
        Ok(Some(Frame::new(&src[cfg.initial_bytes_to_strip..total], total)))
    }

    fn validate(&self) -> Result<(), CodecError> {
        let cfg = &self.config;
        if !matches!(cfg.length_field_length, 1 | 2 | 3 | 4 | 8) {
            return Err(CodecError::UnsupportedFieldLength(cfg.length_field_length));
        }
        if cfg.initial_bytes_to_strip > cfg.header_len() {
            return Err(CodecError::InvalidConfig(format!(
                "initial_bytes_to_strip ({}) exceeds header length ({})",
                cfg.initial_bytes_to_strip,
                cfg.header_len()
            )));
        }
        if cfg.max_frame_length < cfg.header_len() {
            return Err(CodecError::InvalidConfig(format!(
                "max_frame_length ({}) is shorter than the header ({})",
                cfg.max_frame_length,
                cfg.header_len()
            )));
        }
        Ok(())
    }
}
