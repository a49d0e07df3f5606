//! Stream assembler for reassembling frames from partial reads.
//!
//! Owns one growable byte sequence backed by a pooled [`Buffer`]. The caller
//! drives it with one `append` per socket read, then drains every complete
//! frame before reading again:
//!
//! ```
//! use framewire::buffer::{BufferPool, StreamAssembler};
//!
//! let pool = BufferPool::new(16, 1);
//! let mut assembler = StreamAssembler::new(pool, u32::MAX);
//!
//! assembler.append(&[0, 0]);
//! assert!(assembler.try_extract_frame().unwrap().is_none());
//!
//! assembler.append(&[0, 2, b'h', b'i']);
//! let span = assembler.try_extract_frame().unwrap().unwrap();
//! assert_eq!(assembler.payload(&span), b"hi");
//! assembler.shift(span.consumed);
//! assert!(assembler.is_empty());
//! ```
//!
//! # Growth
//!
//! When a chunk does not fit, the valid bytes move to a new backing buffer of
//! at least twice the required length, so steady incremental traffic grows
//! the buffer a logarithmic number of times.
//!
//! # Compaction
//!
//! `shift` moves the unconsumed tail to offset 0. A tail shorter than the
//! consumed prefix is moved in place; a longer one goes through a scratch
//! buffer, so each shift costs the smaller of the two quantities.

use std::ops::Range;

use super::pool::{Buffer, BufferPool};
use crate::error::Result;
use crate::protocol::{FrameHeader, HEADER_SIZE};

/// Location of one complete frame inside the assembler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSpan {
    /// Payload byte range, relative to the start of the buffered bytes.
    pub payload: Range<usize>,
    /// Header + payload length, to pass to [`StreamAssembler::shift`].
    pub consumed: usize,
}

/// Accumulates raw bytes and extracts length-prefixed frames.
///
/// Not shareable between tasks; exactly one owner drives it.
#[derive(Debug)]
pub struct StreamAssembler {
    pool: BufferPool,
    buf: Buffer,
    /// Valid bytes, always starting at offset 0.
    len: usize,
    max_payload_size: u32,
}

impl StreamAssembler {
    /// Create an assembler backed by a buffer borrowed from `pool`.
    pub fn new(pool: BufferPool, max_payload_size: u32) -> Self {
        let buf = pool.borrow();
        Self {
            pool,
            buf,
            len: 0,
            max_payload_size,
        }
    }

    /// Append `chunk` at the tail, growing the backing buffer when needed.
    pub fn append(&mut self, chunk: &[u8]) {
        let required = self.len + chunk.len();
        if self.buf.capacity() < required {
            self.grow(required);
        }
        self.buf[self.len..required].copy_from_slice(chunk);
        self.len = required;
    }

    fn grow(&mut self, required: usize) {
        let target = required.saturating_mul(2);
        let candidate = self.pool.borrow();
        let mut next = if candidate.capacity() < target {
            drop(candidate);
            Buffer::dedicated(target)
        } else {
            candidate
        };

        next[..self.len].copy_from_slice(&self.buf[..self.len]);
        let old = std::mem::replace(&mut self.buf, next);
        self.pool.give_back(old);

        tracing::trace!(
            required,
            capacity = self.buf.capacity(),
            "grew assembler buffer"
        );
    }

    /// Locate the first complete frame, if one is fully buffered.
    ///
    /// Returns `Ok(None)` while fewer than `HEADER_SIZE + payload` bytes are
    /// present. Does not consume anything; call [`shift`](Self::shift) with
    /// `span.consumed` once the payload has been handled.
    ///
    /// # Errors
    ///
    /// Returns `FrameTooLarge` as soon as a header announces a payload over
    /// the cap, before any bytes of that payload are buffered.
    pub fn try_extract_frame(&self) -> Result<Option<FrameSpan>> {
        let Some(header) = FrameHeader::decode(&self.buf[..self.len]) else {
            return Ok(None);
        };
        header.validate(self.max_payload_size)?;

        let consumed = header.frame_size();
        if consumed > self.len {
            return Ok(None);
        }

        Ok(Some(FrameSpan {
            payload: HEADER_SIZE..consumed,
            consumed,
        }))
    }

    /// Payload bytes for a span returned by `try_extract_frame`.
    #[inline]
    pub fn payload(&self, span: &FrameSpan) -> &[u8] {
        &self.buf[span.payload.clone()]
    }

    /// Drop the first `consumed` bytes and move the rest to offset 0.
    ///
    /// # Panics
    ///
    /// Panics if `consumed` exceeds the buffered length.
    pub fn shift(&mut self, consumed: usize) {
        assert!(
            consumed <= self.len,
            "shift of {consumed} bytes exceeds {} buffered",
            self.len
        );
        if consumed == 0 {
            return;
        }

        let remaining = self.len - consumed;
        if remaining < consumed {
            self.buf.copy_within(consumed..self.len, 0);
        } else {
            let mut scratch = self.pool.borrow();
            if scratch.capacity() < remaining {
                drop(scratch);
                scratch = Buffer::dedicated(remaining);
            }
            scratch[..remaining].copy_from_slice(&self.buf[consumed..self.len]);
            self.buf[..remaining].copy_from_slice(&scratch[..remaining]);
            self.pool.give_back(scratch);
        }
        self.len = remaining;
    }

    /// Buffered bytes.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Number of buffered bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if nothing is buffered.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Capacity of the current backing buffer.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// Discard buffered bytes, keeping the backing buffer.
    pub fn clear(&mut self) {
        self.len = 0;
    }
}
