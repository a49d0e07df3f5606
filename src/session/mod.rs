//! Session module - one connection's receive loop, send path and lifecycle.
//!
//! Provides:
//! - [`Session`] - owns the read half and the pooled receive buffers
//! - [`SessionHandle`] - cloneable send/close handle passed to dispatchers
//! - [`Dispatcher`] - application hook for decoded payloads
//! - [`StreamUpgrade`] - optional TLS-style wrapping of the raw stream
//!
//! # Receive loop
//!
//! ```text
//! read ─► chunk ─► append ─► ┌ try_extract_frame ─► dispatch ─► shift ┐
//!   ▲                        └──────────────── until none ◄────────────┘
//!   └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The loop ends on a zero-length read, a read error, or a local
//! [`SessionHandle::close`]. Whichever way it ends, the receive chunk and the
//! assembler buffer go back to the pool and the connection is released once.

mod dispatcher;
mod handle;
mod upgrade;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, ReadHalf};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::buffer::{Buffer, BufferPool, StreamAssembler};
use crate::config::TransportConfig;
use crate::error::{Result, TransportError};

pub use dispatcher::{dispatch_fn, BoxFuture, Dispatcher, FnDispatcher};
pub use handle::{Role, SessionHandle, SessionId, SessionState};
pub use upgrade::{AsyncStream, BoxedStream, NoUpgrade, StreamUpgrade};

use handle::SendOptions;

/// Why the receive loop stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    /// Zero-length read.
    PeerClosed,
    /// [`SessionHandle::close`] was called.
    LocalClose,
}

/// One connection's receive side.
///
/// Created by the transport after connect/accept (and upgrade), or directly
/// over any byte stream with [`Session::new`]. Consumed by [`Session::run`].
pub struct Session {
    handle: SessionHandle,
    reader: ReadHalf<BoxedStream>,
    /// Per-read scratch; reused every iteration.
    chunk: Buffer,
    /// `None` in raw mode.
    assembler: Option<StreamAssembler>,
    dispatcher: Arc<dyn Dispatcher>,
    receive_timeout: Option<Duration>,
    close_rx: watch::Receiver<bool>,
}

impl Session {
    /// Build a session over an established stream.
    ///
    /// Borrows the receive chunk (and, in framing mode, the assembler's
    /// backing buffer) from `pool`.
    pub fn new(
        stream: BoxedStream,
        role: Role,
        config: &TransportConfig,
        pool: &BufferPool,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        let (handle, close_rx) = SessionHandle::new(
            role,
            writer,
            SendOptions {
                framing: config.framing,
                max_payload_size: config.max_payload_size,
                send_timeout: config.send_timeout,
            },
        );
        let assembler = config
            .framing
            .then(|| StreamAssembler::new(pool.clone(), config.max_payload_size));

        Self {
            handle,
            reader,
            chunk: pool.borrow(),
            assembler,
            dispatcher,
            receive_timeout: config.receive_timeout,
            close_rx,
        }
    }

    /// Handle for sending and closing; clone freely.
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Process-unique id of this session.
    #[inline]
    pub fn id(&self) -> SessionId {
        self.handle.id()
    }

    /// Run the receive loop on a new tokio task.
    pub fn spawn(self) -> (SessionHandle, JoinHandle<Result<()>>) {
        let handle = self.handle.clone();
        (handle, tokio::spawn(self.run()))
    }

    /// Run the receive loop until the connection ends.
    ///
    /// Returns `Ok(())` for an orderly close, a local close, or a transport
    /// reset. Any other error faults the session and is returned after the
    /// buffers and the connection have been released. The state passes
    /// through `Closing` (or `Faulted`) before it reaches `Closed`.
    pub async fn run(self) -> Result<()> {
        let span = tracing::info_span!(
            "session",
            id = %self.handle.id(),
            role = ?self.handle.role()
        );
        self.run_inner().instrument(span).await
    }

    async fn run_inner(mut self) -> Result<()> {
        let result = if self.handle.mark_connected() {
            tracing::debug!(framing = self.assembler.is_some(), "session connected");
            self.receive_loop().await
        } else {
            Ok(Exit::LocalClose)
        };

        let outcome = match result {
            Ok(Exit::PeerClosed) => {
                tracing::debug!("peer closed connection");
                Ok(())
            }
            Ok(Exit::LocalClose) => {
                tracing::debug!("closed locally");
                Ok(())
            }
            Err(e) if e.is_transport_reset() => {
                tracing::debug!(error = %e, "transport reset");
                Ok(())
            }
            Err(e) if self.handle.mark_faulted() => {
                tracing::error!(error = %e, "session faulted");
                Err(e)
            }
            Err(e) => {
                tracing::debug!(error = %e, "error after close");
                Ok(())
            }
        };

        // No-op when already closing or faulted.
        self.handle.begin_close();
        // A send blocked on a peer that stopped reading must let go of the writer.
        self.handle.signal_close();

        let Session {
            handle,
            reader,
            chunk,
            assembler,
            ..
        } = self;
        drop(assembler);
        drop(chunk);
        drop(reader);
        handle.release_writer().await;
        handle.set_state(SessionState::Closed);
        tracing::debug!("session closed");

        outcome
    }

    async fn receive_loop(&mut self) -> Result<Exit> {
        loop {
            let n = tokio::select! {
                biased;
                _ = wait_closed(&mut self.close_rx) => return Ok(Exit::LocalClose),
                read = with_timeout(
                    self.receive_timeout,
                    "receive",
                    read_chunk(&mut self.reader, &mut self.chunk),
                ) => read?,
            };
            if n == 0 {
                return Ok(Exit::PeerClosed);
            }

            let received = &self.chunk[..n];
            match self.assembler.as_mut() {
                None => self.dispatcher.dispatch(&self.handle, received).await,
                Some(assembler) => {
                    assembler.append(received);
                    while let Some(span) = assembler.try_extract_frame()? {
                        self.dispatcher
                            .dispatch(&self.handle, assembler.payload(&span))
                            .await;
                        assembler.shift(span.consumed);
                    }
                }
            }
        }
    }
}

async fn read_chunk(reader: &mut ReadHalf<BoxedStream>, chunk: &mut Buffer) -> Result<usize> {
    Ok(reader.read(chunk).await?)
}

/// Resolves once a local close has been requested.
async fn wait_closed(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender lives in the handle; without it no close can arrive.
            std::future::pending::<()>().await;
        }
    }
}

/// Run `fut` under an optional deadline; expiry maps to `Timeout(op)`.
pub(crate) async fn with_timeout<T, F>(
    limit: Option<Duration>,
    op: &'static str,
    fut: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| TransportError::Timeout(op))?,
        None => fut.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

    use crate::protocol::{encode_header, Frame};

    #[derive(Default)]
    struct Collect {
        payloads: Mutex<Vec<Vec<u8>>>,
    }

    impl Dispatcher for Collect {
        fn dispatch<'a>(
            &'a self,
            _session: &'a SessionHandle,
            payload: &'a [u8],
        ) -> BoxFuture<'a, ()> {
            self.payloads.lock().unwrap().push(payload.to_vec());
            Box::pin(async {})
        }
    }

    type Started = (SessionHandle, JoinHandle<Result<()>>, DuplexStream, Arc<Collect>);

    fn start(config: TransportConfig, pool: &BufferPool) -> Started {
        start_with(4096, config, pool)
    }

    fn start_with(capacity: usize, config: TransportConfig, pool: &BufferPool) -> Started {
        let (local, remote) = duplex(capacity);
        let collect = Arc::new(Collect::default());
        let session = Session::new(
            Box::new(local),
            Role::Server,
            &config,
            pool,
            collect.clone(),
        );
        let (handle, task) = session.spawn();
        (handle, task, remote, collect)
    }

    async fn connected(handle: &SessionHandle) {
        while handle.state() == SessionState::Connecting {
            tokio::task::yield_now().await;
        }
    }

    fn frame(payload: &[u8]) -> Vec<u8> {
        let mut bytes = encode_header(payload.len() as u32).to_vec();
        bytes.extend_from_slice(payload);
        bytes
    }

    #[tokio::test]
    async fn test_frames_dispatched_then_clean_eof() {
        let pool = BufferPool::new(64, 2);
        let (handle, task, mut remote, collect) = start(TransportConfig::default(), &pool);

        let mut data = frame(b"one");
        data.extend(frame(b"two"));
        remote.write_all(&data).await.unwrap();
        drop(remote);

        task.await.unwrap().unwrap();
        assert_eq!(
            *collect.payloads.lock().unwrap(),
            vec![b"one".to_vec(), b"two".to_vec()]
        );
        assert_eq!(handle.state(), SessionState::Closed);
        assert!(!handle.is_faulted());
        assert_eq!(pool.stats().outstanding(), 0);
    }

    #[tokio::test]
    async fn test_raw_mode_dispatches_chunks() {
        let pool = BufferPool::new(64, 2);
        let config = TransportConfig::default().with_framing(false);
        let (_handle, task, mut remote, collect) = start(config, &pool);

        remote.write_all(b"raw bytes").await.unwrap();
        drop(remote);

        task.await.unwrap().unwrap();
        let joined: Vec<u8> = collect.payloads.lock().unwrap().concat();
        assert_eq!(joined, b"raw bytes");
        assert_eq!(pool.stats().outstanding(), 0);
    }

    #[tokio::test]
    async fn test_local_close_unblocks_read() {
        let pool = BufferPool::new(64, 2);
        let (handle, task, _remote, _collect) = start(TransportConfig::default(), &pool);

        handle.close().await;
        task.await.unwrap().unwrap();

        assert_eq!(handle.state(), SessionState::Closed);
        assert_eq!(pool.stats().outstanding(), 0);
    }

    #[tokio::test]
    async fn test_oversized_header_faults_and_cleans_up() {
        let pool = BufferPool::new(64, 2);
        let config = TransportConfig::default().with_max_payload_size(8);
        let (handle, task, mut remote, collect) = start(config, &pool);

        remote.write_all(&encode_header(1_000_000)).await.unwrap();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(TransportError::FrameTooLarge { .. })));
        assert!(handle.is_faulted());
        assert_eq!(handle.state(), SessionState::Closed);
        assert!(collect.payloads.lock().unwrap().is_empty());
        assert_eq!(pool.stats().outstanding(), 0);
    }

    #[tokio::test]
    async fn test_receive_timeout_faults() {
        let pool = BufferPool::new(64, 2);
        let config = TransportConfig::default().with_receive_timeout(Duration::from_millis(20));
        let (handle, task, _remote, _collect) = start(config, &pool);

        let result = task.await.unwrap();
        assert!(matches!(result, Err(TransportError::Timeout("receive"))));
        assert!(handle.is_faulted());
        assert_eq!(pool.stats().outstanding(), 0);
    }

    #[tokio::test]
    async fn test_close_before_run_skips_loop() {
        let pool = BufferPool::new(64, 2);
        let (local, _remote) = duplex(64);
        let session = Session::new(
            Box::new(local),
            Role::Client,
            &TransportConfig::default(),
            &pool,
            Arc::new(Collect::default()),
        );
        let handle = session.handle();

        handle.close().await;
        session.run().await.unwrap();

        assert_eq!(handle.state(), SessionState::Closed);
        assert_eq!(pool.stats().outstanding(), 0);
    }

    #[tokio::test]
    async fn test_with_timeout_passthrough() {
        let value = with_timeout(None, "op", async { Ok::<_, TransportError>(7) }).await.unwrap();
        assert_eq!(value, 7);

        let result: Result<()> = with_timeout(
            Some(Duration::from_millis(5)),
            "op",
            std::future::pending::<Result<()>>(),
        )
        .await;
        assert!(matches!(result, Err(TransportError::Timeout("op"))));
    }

    #[tokio::test]
    async fn test_send_timeout_faults_running_session() {
        let pool = BufferPool::new(64, 2);
        let config = TransportConfig::default().with_send_timeout(Duration::from_millis(20));
        let (handle, task, mut remote, _collect) = start_with(8, config, &pool);
        connected(&handle).await;

        let payload = [7u8; 100];
        let result = handle.send(&payload).await;
        assert!(matches!(result, Err(TransportError::Timeout("send"))));
        handle.send(b"next").await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(handle.is_faulted());
        assert_eq!(handle.state(), SessionState::Closed);
        assert_eq!(pool.stats().outstanding(), 0);

        let mut received = Vec::new();
        remote.read_to_end(&mut received).await.unwrap();
        let first = Frame::from_payload(&payload, 0, payload.len()).to_bytes();
        assert!(received.len() < first.len());
        assert_eq!(&received[..], &first[..received.len()]);
    }

    #[tokio::test]
    async fn test_close_while_send_blocked_ends_session() {
        let pool = BufferPool::new(64, 2);
        let (handle, task, _remote, _collect) = start_with(8, TransportConfig::default(), &pool);
        connected(&handle).await;

        let sender = handle.clone();
        let send = tokio::spawn(async move { sender.send(&[0u8; 100]).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        tokio::time::timeout(Duration::from_secs(1), handle.close())
            .await
            .unwrap();
        send.await.unwrap().unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(handle.state(), SessionState::Closed);
        assert!(!handle.is_faulted());
        assert_eq!(pool.stats().outstanding(), 0);
    }

    #[tokio::test]
    async fn test_peer_close_while_send_blocked_ends_session() {
        let pool = BufferPool::new(64, 2);
        let (handle, task, mut remote, _collect) =
            start_with(8, TransportConfig::default(), &pool);
        connected(&handle).await;

        let sender = handle.clone();
        let send = tokio::spawn(async move { sender.send(&[0u8; 100]).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        // EOF for the session while its own writes stay unread.
        remote.shutdown().await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        send.await.unwrap().unwrap();
        assert_eq!(handle.state(), SessionState::Closed);
        assert!(!handle.is_faulted());
        assert_eq!(pool.stats().outstanding(), 0);
    }

    #[tokio::test]
    async fn test_error_after_local_close_is_not_a_fault() {
        let pool = BufferPool::new(64, 2);
        let config = TransportConfig::default().with_max_payload_size(8);
        let (handle, task, mut remote, collect) = start(config, &pool);
        connected(&handle).await;

        // Closing first, then an oversized header the loop may still see.
        assert!(handle.begin_close());
        remote.write_all(&encode_header(1_000)).await.unwrap();
        handle.signal_close();

        task.await.unwrap().unwrap();
        assert!(!handle.is_faulted());
        assert_eq!(handle.state(), SessionState::Closed);
        assert!(collect.payloads.lock().unwrap().is_empty());
        assert_eq!(pool.stats().outstanding(), 0);
    }
}
