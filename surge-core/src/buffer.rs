use bytes::{Buf, Bytes, BytesMut};
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::io::{self, IoSlice, Write};

/// Maximum number of chunks handed to a single vectored write.
const MAX_IOVECS: usize = 64;

/// Append-only inbound byte buffer.
///
/// Grows only by appending bytes read from the socket and shrinks only by
/// discarding a prefix that a codec consumed. An incomplete decode leaves the
/// contents untouched.
#[derive(Debug, Default)]
pub struct InboundBuffer {
    buf: BytesMut,
}

impl InboundBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn extend_from_slice(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Discard the first `n` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `n > self.len()`.
    pub fn consume(&mut self, n: usize) {
        assert!(n <= self.buf.len());
        self.buf.advance(n);
    }
}

/// Ordered queue of byte chunks awaiting a kernel write.
///
/// Chunks are `Bytes`, so queueing a frame never copies it; a partially
/// written chunk is advanced in place.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    segs: VecDeque<Bytes>,
    len: usize,
}

impl OutboundQueue {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            segs: VecDeque::new(),
            len: 0,
        }
    }

    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn push(&mut self, bytes: Bytes) {
        if bytes.is_empty() {
            return;
        }
        self.len += bytes.len();
        self.segs.push_back(bytes);
    }

    /// Advance the queue by `n` bytes, dropping fully-written chunks.
    ///
    /// # Panics
    ///
    /// Panics if `n > self.len`.
    pub fn advance(&mut self, mut n: usize) {
        assert!(n <= self.len);
        self.len -= n;

        while n > 0 {
            let Some(mut front) = self.segs.pop_front() else {
                break;
            };
            if n >= front.len() {
                n -= front.len();
                continue;
            }
            // partially written
            front.advance(n);
            self.segs.push_front(front);
            break;
        }
    }

    /// Remove and return the oldest queued chunk.
    pub fn pop_front(&mut self) -> Option<Bytes> {
        let seg = self.segs.pop_front()?;
        self.len -= seg.len();
        Some(seg)
    }

    /// Write as much of the queue as `dst` accepts.
    ///
    /// Returns `Ok(true)` once the queue is drained and `Ok(false)` when the
    /// writer reported `WouldBlock` with data still queued.
    pub fn flush_into<W: Write>(&mut self, dst: &mut W) -> io::Result<bool> {
        while !self.is_empty() {
            let written = {
                let slices: SmallVec<[IoSlice<'_>; MAX_IOVECS]> = self
                    .segs
                    .iter()
                    .take(MAX_IOVECS)
                    .map(|seg| IoSlice::new(seg))
                    .collect();
                dst.write_vectored(&slices)
            };

            match written {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
                Ok(n) => self.advance(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Writer that accepts at most `budget` bytes, then blocks.
    struct Throttled {
        out: Vec<u8>,
        budget: usize,
    }

    impl Write for Throttled {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::Error::from(io::ErrorKind::WouldBlock));
            }
            let n = buf.len().min(self.budget);
            self.out.extend_from_slice(&buf[..n]);
            self.budget -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn inbound_consume_discards_prefix() {
        let mut buf = InboundBuffer::new();
        buf.extend_from_slice(b"hello ");
        buf.extend_from_slice(b"world");
        buf.consume(6);
        assert_eq!(buf.as_slice(), b"world");
        assert_eq!(buf.len(), 5);
    }

    #[test]
    #[should_panic]
    fn inbound_consume_past_end_panics() {
        let mut buf = InboundBuffer::new();
        buf.extend_from_slice(b"abc");
        buf.consume(4);
    }

    #[test]
    fn outbound_ignores_empty_chunks() {
        let mut q = OutboundQueue::new();
        q.push(Bytes::new());
        assert!(q.is_empty());
    }

    #[test]
    fn outbound_partial_advance_keeps_order() {
        let mut q = OutboundQueue::new();
        q.push(Bytes::from_static(b"abc"));
        q.push(Bytes::from_static(b"defg"));
        q.advance(4);
        assert_eq!(q.len(), 3);

        let mut sink = Throttled {
            out: Vec::new(),
            budget: usize::MAX,
        };
        assert!(q.flush_into(&mut sink).unwrap());
        assert_eq!(sink.out, b"efg");
    }

    #[test]
    fn pop_front_returns_whole_chunks() {
        let mut q = OutboundQueue::new();
        q.push(Bytes::from_static(b"one"));
        q.push(Bytes::from_static(b"three"));
        assert_eq!(q.pop_front().unwrap(), Bytes::from_static(b"one"));
        assert_eq!(q.len(), 5);
        assert_eq!(q.pop_front().unwrap(), Bytes::from_static(b"three"));
        assert!(q.pop_front().is_none());
        assert!(q.is_empty());
    }

    #[test]
    fn flush_stops_on_would_block() {
        let mut q = OutboundQueue::new();
        q.push(Bytes::from_static(b"0123456789"));
        q.push(Bytes::from_static(b"abcdef"));

        let mut sink = Throttled {
            out: Vec::new(),
            budget: 12,
        };
        assert!(!q.flush_into(&mut sink).unwrap());
        assert_eq!(sink.out, b"0123456789ab");
        assert_eq!(q.len(), 4);

        sink.budget = 100;
        assert!(q.flush_into(&mut sink).unwrap());
        assert_eq!(sink.out, b"0123456789abcdef");
        assert!(q.is_empty());
    }
}
