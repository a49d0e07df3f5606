//! Buffer module - pooled byte buffers and frame reassembly.
//!
//! - [`BufferPool`] leases fixed-capacity buffers shared by all sessions
//! - [`StreamAssembler`] turns a stream of partial reads into complete frames

mod assembler;
mod pool;

pub use assembler::{FrameSpan, StreamAssembler};
pub use pool::{Buffer, BufferPool, PoolStats};
