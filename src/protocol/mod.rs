//! Protocol module - length-prefix codec and outbound frames.
//!
//! - 4-byte big-endian header encoding/decoding
//! - Frame builder for sends

mod frame;
mod wire_format;

pub use frame::Frame;
pub use wire_format::{
    decode_header, encode_header, FrameHeader, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE,
};
