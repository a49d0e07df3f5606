//! Cloneable handle to a running session.
//!
//! Dispatchers receive a `&SessionHandle` with every payload and use it to
//! reply or close the connection. The handle owns the write half; the read
//! half stays with the receive loop.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio::sync::{watch, Mutex};

use super::upgrade::BoxedStream;
use super::{wait_closed, with_timeout};
use crate::error::{Result, TransportError};
use crate::protocol::Frame;

/// Process-unique session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Numeric value of the id.
    #[inline]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which side opened the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Connected out with [`TcpClient`](crate::transport::TcpClient).
    Client,
    /// Accepted by [`TcpServer`](crate::transport::TcpServer).
    Server,
}

/// Session lifecycle.
///
/// `Connecting → Connected → Closing → Closed`. `Faulted` is entered only
/// from `Connected` on an unrecoverable error and always ends in `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Connecting = 0,
    Connected = 1,
    Closing = 2,
    Closed = 3,
    Faulted = 4,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Connecting,
            1 => SessionState::Connected,
            2 => SessionState::Closing,
            3 => SessionState::Closed,
            _ => SessionState::Faulted,
        }
    }

    /// Whether sends are still accepted.
    #[inline]
    pub fn is_open(&self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Connected)
    }
}

/// Cloneable handle for sending on and closing a session.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<Shared>,
}

struct Shared {
    id: SessionId,
    role: Role,
    framing: bool,
    max_payload_size: u32,
    send_timeout: Option<Duration>,
    state: AtomicU8,
    faulted: AtomicBool,
    /// `None` once the connection has been released.
    writer: Mutex<Option<WriteHalf<BoxedStream>>>,
    /// Flips to `true` when a local close is requested.
    close_tx: watch::Sender<bool>,
}

/// Settings copied from the transport config into each handle.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SendOptions {
    pub framing: bool,
    pub max_payload_size: u32,
    pub send_timeout: Option<Duration>,
}

impl SessionHandle {
    pub(crate) fn new(
        role: Role,
        writer: WriteHalf<BoxedStream>,
        options: SendOptions,
    ) -> (Self, watch::Receiver<bool>) {
        let (close_tx, close_rx) = watch::channel(false);
        let handle = Self {
            inner: Arc::new(Shared {
                id: SessionId::next(),
                role,
                framing: options.framing,
                max_payload_size: options.max_payload_size,
                send_timeout: options.send_timeout,
                state: AtomicU8::new(SessionState::Connecting as u8),
                faulted: AtomicBool::new(false),
                writer: Mutex::new(Some(writer)),
                close_tx,
            }),
        };
        (handle, close_rx)
    }

    /// Process-unique id of this session.
    #[inline]
    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    /// Whether this side connected or accepted.
    #[inline]
    pub fn role(&self) -> Role {
        self.inner.role
    }

    /// Whether sends are wrapped in frames.
    #[inline]
    pub fn is_framing(&self) -> bool {
        self.inner.framing
    }

    /// Current lifecycle state.
    #[inline]
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// Whether the session ended because of an unrecoverable error.
    #[inline]
    pub fn is_faulted(&self) -> bool {
        self.inner.faulted.load(Ordering::Acquire)
    }

    /// Send `bytes` as one unit.
    ///
    /// In framing mode the payload is wrapped in a length-prefixed frame and
    /// written with a single write; otherwise the raw bytes are written.
    /// Sending on a closed session does nothing, and a send still in flight
    /// when [`close`](Self::close) is called is abandoned.
    ///
    /// A write error or `send_timeout` may leave part of a frame on the wire,
    /// so it ends the session: no later send reaches the stream.
    pub async fn send(&self, bytes: &[u8]) -> Result<()> {
        self.send_range(bytes, 0, bytes.len()).await
    }

    /// Send `bytes[offset..offset + count]`.
    pub async fn send_range(&self, bytes: &[u8], offset: usize, count: usize) -> Result<()> {
        if self.inner.framing {
            let frame =
                Frame::try_from_payload(bytes, offset, count, self.inner.max_payload_size)?;
            self.write(&frame.to_bytes()).await
        } else {
            let range = offset
                .checked_add(count)
                .filter(|&end| end <= bytes.len())
                .map(|end| offset..end)
                .ok_or_else(|| {
                    TransportError::Io(std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        format!("send range {offset}+{count} out of bounds"),
                    ))
                })?;
            self.write(&bytes[range]).await
        }
    }

    async fn write(&self, data: &[u8]) -> Result<()> {
        if !self.state().is_open() {
            tracing::debug!(session = %self.id(), "send on closed session ignored");
            return Ok(());
        }

        let mut close_rx = self.inner.close_tx.subscribe();
        let mut guard = tokio::select! {
            biased;
            _ = wait_closed(&mut close_rx) => {
                tracing::debug!(session = %self.id(), "send on closing session ignored");
                return Ok(());
            }
            guard = self.inner.writer.lock() => guard,
        };
        let Some(writer) = guard.as_mut() else {
            tracing::debug!(session = %self.id(), "send after release ignored");
            return Ok(());
        };

        let result = tokio::select! {
            biased;
            _ = wait_closed(&mut close_rx) => {
                tracing::debug!(session = %self.id(), "send abandoned by close");
                return Ok(());
            }
            result = with_timeout(self.inner.send_timeout, "send", async {
                writer.write_all(data).await?;
                writer.flush().await?;
                Ok::<_, TransportError>(())
            }) => result,
        };

        if let Err(e) = &result {
            self.abort_send(e);
            // Dropped, not shut down: the peer may have stopped reading.
            guard.take();
        }
        result
    }

    /// End the session after a failed write.
    fn abort_send(&self, error: &TransportError) {
        if !error.is_transport_reset() && self.mark_faulted() {
            tracing::error!(session = %self.id(), %error, "send failed mid-frame");
        } else {
            tracing::debug!(session = %self.id(), %error, "send failed");
            self.begin_close();
        }
        self.signal_close();
    }

    /// Close the session.
    ///
    /// Shuts the write half down and wakes the receive loop, which then
    /// returns its buffers and exits. Closing twice is a no-op.
    pub async fn close(&self) {
        if !self.begin_close() {
            return;
        }
        tracing::debug!(session = %self.id(), "close requested");
        self.signal_close();
        self.release_writer().await;
    }

    /// `Connecting`/`Connected` → `Closing`. False if already closing or faulted.
    pub(crate) fn begin_close(&self) -> bool {
        let mut current = self.inner.state.load(Ordering::Acquire);
        loop {
            if !SessionState::from_u8(current).is_open() {
                return false;
            }
            match self.inner.state.compare_exchange(
                current,
                SessionState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// `Connecting` → `Connected`. False if a close already started.
    pub(crate) fn mark_connected(&self) -> bool {
        self.inner
            .state
            .compare_exchange(
                SessionState::Connecting as u8,
                SessionState::Connected as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// `Connected` → `Faulted`. False if the session was in any other state.
    pub(crate) fn mark_faulted(&self) -> bool {
        let faulted = self
            .inner
            .state
            .compare_exchange(
                SessionState::Connected as u8,
                SessionState::Faulted as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if faulted {
            self.inner.faulted.store(true, Ordering::Release);
        }
        faulted
    }

    /// Wake the receive loop and abandon any send in flight.
    pub(crate) fn signal_close(&self) {
        self.inner.close_tx.send_replace(true);
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        self.inner.state.store(state as u8, Ordering::Release);
    }

    /// Shut down and drop the write half. Only the first call does anything.
    pub(crate) async fn release_writer(&self) {
        let writer = self.inner.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.shutdown().await {
                // Peer may already be gone.
                tracing::debug!(session = %self.id(), error = %e, "shutdown failed");
            }
        }
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.inner.id)
            .field("role", &self.inner.role)
            .field("state", &self.state())
            .finish()
    }
}
