//! Stream upgrade hook (TLS and similar).
//!
//! The transport hands the freshly connected socket to a [`StreamUpgrade`]
//! when `tls.enabled` is set. The upgrade returns another byte stream with the
//! same read/write/close contract, and the session runs on top of it.
//! Handshake errors are reported as [`TransportError::Upgrade`](crate::error::TransportError::Upgrade) and end the
//! connection before a session exists.

use tokio::io::{AsyncRead, AsyncWrite};

use super::{BoxFuture, Role};
use crate::config::TlsPolicy;
use crate::error::Result;

/// Byte stream a session can run on.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Type-erased session stream.
pub type BoxedStream = Box<dyn AsyncStream>;

/// Wraps a raw connection in a secured stream.
pub trait StreamUpgrade: Send + Sync + 'static {
    fn upgrade<'a>(
        &'a self,
        stream: BoxedStream,
        role: Role,
        policy: &'a TlsPolicy,
    ) -> BoxFuture<'a, Result<BoxedStream>>;
}

/// Upgrade that returns the stream unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoUpgrade;

impl StreamUpgrade for NoUpgrade {
    fn upgrade<'a>(
        &'a self,
        stream: BoxedStream,
        _role: Role,
        _policy: &'a TlsPolicy,
    ) -> BoxFuture<'a, Result<BoxedStream>> {
        Box::pin(async move { Ok(stream) })
    }
}
