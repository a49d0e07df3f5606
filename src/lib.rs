//! # framewire
//!
//! Length-prefixed message framing over TCP with pooled receive buffers.
//!
//! Every session reads raw chunks into a pooled buffer, reassembles them into
//! frames (4-byte big-endian length + payload) and hands each payload to a
//! [`Dispatcher`](session::Dispatcher). Buffers come from one shared
//! [`BufferPool`](buffer::BufferPool) and go back to it on every exit path.
//!
//! ## Architecture
//!
//! - **buffer**: fixed-capacity buffer pool and the stream assembler
//! - **protocol**: length-prefix codec and outbound frames
//! - **session**: per-connection receive loop, send path and lifecycle
//! - **transport**: TCP server/client roles, socket options, stream upgrade
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use framewire::config::TransportConfig;
//! use framewire::session::dispatch_fn;
//! use framewire::transport::TcpClient;
//!
//! #[tokio::main]
//! async fn main() -> framewire::Result<()> {
//!     let dispatcher = Arc::new(dispatch_fn(|session, payload| {
//!         println!("{} got {} bytes", session.id(), payload.len());
//!     }));
//!     let client = TcpClient::new(TransportConfig::default(), dispatcher)?;
//!     let (handle, task) = client.connect_and_spawn("127.0.0.1:9000").await?;
//!
//!     handle.send(b"hello").await?;
//!     handle.close().await;
//!     task.await.ok();
//!     Ok(())
//! }
//! ```

pub mod buffer;
pub mod config;
pub mod error;
pub mod protocol;
pub mod session;
pub mod transport;

pub use config::TransportConfig;
pub use error::{Result, TransportError};
pub use session::{Dispatcher, Session, SessionHandle};
