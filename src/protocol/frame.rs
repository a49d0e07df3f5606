//! Outbound frame builder.
//!
//! A [`Frame`] pairs a length prefix with a copied payload and serializes to
//! the bytes written on the wire.
//!
//! # Example
//!
//! ```
//! use framewire::protocol::Frame;
//!
//! let frame = Frame::from_payload(b"xxhelloxx", 2, 5);
//! assert_eq!(&frame.to_bytes()[..], b"\x00\x00\x00\x05hello");
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use super::wire_format::{FrameHeader, HEADER_SIZE};
use crate::error::{Result, TransportError};

/// A complete protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Length prefix.
    pub header: FrameHeader,
    /// Payload bytes, owned by the frame.
    pub payload: Bytes,
}

impl Frame {
    /// Build a frame from `bytes[offset..offset + count]`.
    ///
    /// The range is copied; the caller keeps its buffer.
    ///
    /// # Panics
    ///
    /// Panics if the range is out of bounds or `count` does not fit in a u32.
    /// Use [`Frame::try_from_payload`] for checked construction.
    pub fn from_payload(bytes: &[u8], offset: usize, count: usize) -> Self {
        match Self::try_from_payload(bytes, offset, count, u32::MAX) {
            Ok(frame) => frame,
            Err(e) => panic!("invalid frame payload range: {e}"),
        }
    }

    /// Checked variant of [`Frame::from_payload`] enforcing a payload cap.
    pub fn try_from_payload(
        bytes: &[u8],
        offset: usize,
        count: usize,
        max_payload_size: u32,
    ) -> Result<Self> {
        let end = offset.checked_add(count).filter(|&end| end <= bytes.len());
        let Some(end) = end else {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!(
                    "payload range {offset}+{count} out of bounds for {} bytes",
                    bytes.len()
                ),
            )));
        };

        let size = u32::try_from(count).map_err(|_| TransportError::FrameTooLarge {
            size: count as u64,
            max: max_payload_size,
        })?;
        let header = FrameHeader::new(size);
        header.validate(max_payload_size)?;

        Ok(Self {
            header,
            payload: Bytes::copy_from_slice(&bytes[offset..end]),
        })
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Total size of this frame on the wire.
    #[inline]
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Serialize as header bytes followed by payload bytes.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.size());
        buf.put_slice(&self.header.encode());
        buf.put_slice(&self.payload);
        buf.freeze()
    }
}
