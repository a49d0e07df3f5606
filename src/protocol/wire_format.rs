//! Wire format encoding and decoding.
//!
//! Every frame starts with a 4-byte length prefix:
//! ```text
//! ┌──────────────┬──────────────────────┐
//! │ Payload size │ Payload              │
//! │ 4 bytes      │ `Payload size` bytes │
//! │ uint32 BE    │ opaque               │
//! └──────────────┴──────────────────────┘
//! ```
//!
//! No magic number, version or checksum. A wrong size desynchronizes the
//! stream for the rest of the connection.

use crate::error::{Result, TransportError};

/// Header size in bytes (fixed, exactly 4).
pub const HEADER_SIZE: usize = 4;

/// Default maximum payload size (16 MiB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

/// Decoded length prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Payload length in bytes.
    pub payload_size: u32,
}

impl FrameHeader {
    /// Create a new header.
    pub fn new(payload_size: u32) -> Self {
        Self { payload_size }
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use framewire::protocol::FrameHeader;
    ///
    /// assert_eq!(FrameHeader::new(5).encode(), [0, 0, 0, 5]);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        self.payload_size.to_be_bytes()
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (4 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        buf[..HEADER_SIZE].copy_from_slice(&self.encode());
    }

    /// Decode header from the start of `buf`.
    ///
    /// Pure read. Returns `None` if fewer than `HEADER_SIZE` bytes are present.
    ///
    /// ```
    /// use framewire::protocol::FrameHeader;
    ///
    /// let header = FrameHeader::decode(&[0, 0, 1, 0, 0xAA]).unwrap();
    /// assert_eq!(header.payload_size, 256);
    /// assert!(FrameHeader::decode(&[0, 0, 1]).is_none());
    /// ```
    pub fn decode(buf: &[u8]) -> Option<Self> {
        let prefix: [u8; HEADER_SIZE] = buf.get(..HEADER_SIZE)?.try_into().ok()?;
        Some(Self {
            payload_size: u32::from_be_bytes(prefix),
        })
    }

    /// Total size on the wire (header + payload).
    ///
    /// Saturates where it does not fit in `usize`; [`validate`](Self::validate)
    /// rejects such headers.
    #[inline]
    pub fn frame_size(&self) -> usize {
        (self.payload_size as usize).saturating_add(HEADER_SIZE)
    }

    /// Reject payloads larger than `max_payload_size`, or too large to
    /// address as one frame on this target.
    pub fn validate(&self, max_payload_size: u32) -> Result<()> {
        let addressable = (self.payload_size as usize)
            .checked_add(HEADER_SIZE)
            .is_some();
        if self.payload_size > max_payload_size || !addressable {
            return Err(TransportError::FrameTooLarge {
                size: u64::from(self.payload_size),
                max: max_payload_size,
            });
        }
        Ok(())
    }
}

/// Encode a payload size as a length prefix (standalone function).
#[inline]
pub fn encode_header(payload_size: u32) -> [u8; HEADER_SIZE] {
    FrameHeader::new(payload_size).encode()
}

/// Decode a payload size from a length prefix (standalone function).
#[inline]
pub fn decode_header(buf: &[u8]) -> Option<u32> {
    FrameHeader::decode(buf).map(|h| h.payload_size)
}
