//! Integration tests for framewire.
//!
//! These run real server and client sessions over loopback TCP.

use std::sync::Arc;
use std::time::Duration;

use socket2::SockRef;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use framewire::config::TransportConfig;
use framewire::protocol::{encode_header, Frame};
use framewire::session::{dispatch_fn, BoxFuture, Dispatcher, SessionHandle, SessionState};
use framewire::transport::{TcpClient, TcpServer};

const WAIT: Duration = Duration::from_secs(5);

/// Replies with every payload it receives.
struct Echo;

impl Dispatcher for Echo {
    fn dispatch<'a>(&'a self, session: &'a SessionHandle, payload: &'a [u8]) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            session.send(payload).await.unwrap();
        })
    }
}

fn collector() -> (Arc<dyn Dispatcher>, mpsc::UnboundedReceiver<Vec<u8>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let dispatcher: Arc<dyn Dispatcher> = Arc::new(dispatch_fn(move |_session, payload| {
        let _ = tx.send(payload.to_vec());
    }));
    (dispatcher, rx)
}

async fn next(rx: &mut mpsc::UnboundedReceiver<Vec<u8>>) -> Vec<u8> {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for payload")
        .expect("dispatcher dropped")
}

fn frame(payload: &[u8]) -> Vec<u8> {
    Frame::from_payload(payload, 0, payload.len()).to_bytes().to_vec()
}

/// Test request/reply through a server that echoes frames.
#[tokio::test]
async fn test_echo_roundtrip() {
    let server = TcpServer::bind("127.0.0.1:0", TransportConfig::default(), Arc::new(Echo))
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());

    let (dispatcher, mut rx) = collector();
    let client = TcpClient::new(TransportConfig::default(), dispatcher).unwrap();
    let (handle, task) = client.connect_and_spawn(addr).await.unwrap();
    assert!(handle.state().is_open());

    handle.send(b"hello").await.unwrap();
    handle.send(b"world").await.unwrap();

    assert_eq!(next(&mut rx).await, b"hello");
    assert_eq!(next(&mut rx).await, b"world");

    handle.close().await;
    task.await.unwrap().unwrap();
    assert_eq!(handle.state(), SessionState::Closed);
    assert_eq!(client.pool().stats().outstanding(), 0);
}

/// Header and payload split across three writes still yield one payload.
#[tokio::test]
async fn test_split_frame_delivered_once() {
    let (dispatcher, mut rx) = collector();
    let server = TcpServer::bind("127.0.0.1:0", TransportConfig::default(), dispatcher)
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();

    let mut peer = TcpStream::connect(addr).await.unwrap();
    peer.set_nodelay(true).unwrap();
    let (_handle, task) = server.accept().await.unwrap().spawn();

    for part in [&[0x00, 0x00][..], &[0x00, 0x05, 0x01, 0x02], &[0x03, 0x04, 0x05]] {
        peer.write_all(part).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    drop(peer);

    task.await.unwrap().unwrap();
    assert_eq!(next(&mut rx).await, vec![0x01, 0x02, 0x03, 0x04, 0x05]);
    assert!(rx.try_recv().is_err());
    assert_eq!(server.pool().stats().outstanding(), 0);
}

/// Two frames in one write are dispatched in order.
#[tokio::test]
async fn test_pipelined_frames_in_order() {
    let (dispatcher, mut rx) = collector();
    let server = TcpServer::bind("127.0.0.1:0", TransportConfig::default(), dispatcher)
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();

    let mut peer = TcpStream::connect(addr).await.unwrap();
    let (_handle, task) = server.accept().await.unwrap().spawn();

    let mut data = frame(b"A-payload");
    data.extend(frame(b"B-payload"));
    peer.write_all(&data).await.unwrap();
    drop(peer);

    task.await.unwrap().unwrap();
    assert_eq!(next(&mut rx).await, b"A-payload");
    assert_eq!(next(&mut rx).await, b"B-payload");
}

/// A payload far larger than the receive buffer is reassembled intact.
#[tokio::test]
async fn test_large_payload_with_small_receive_buffer() {
    let (dispatcher, mut rx) = collector();
    let config = TransportConfig::default()
        .with_receive_buffer_size(64)
        .with_initial_pool_buffers(1);
    let server = TcpServer::bind("127.0.0.1:0", config, dispatcher).await.unwrap();
    let addr = server.local_addr().unwrap();

    let mut peer = TcpStream::connect(addr).await.unwrap();
    let (_handle, task) = server.accept().await.unwrap().spawn();

    let payload: Vec<u8> = (0..1024 * 1024).map(|i| (i % 251) as u8).collect();
    peer.write_all(&frame(&payload)).await.unwrap();
    drop(peer);

    task.await.unwrap().unwrap();
    assert_eq!(next(&mut rx).await, payload);
    assert_eq!(server.pool().stats().outstanding(), 0);
}

/// Oversized header faults the session; buffers still return to the pool.
#[tokio::test]
async fn test_payload_cap_faults_session() {
    let (dispatcher, mut rx) = collector();
    let config = TransportConfig::default().with_max_payload_size(1024);
    let server = TcpServer::bind("127.0.0.1:0", config, dispatcher).await.unwrap();
    let addr = server.local_addr().unwrap();

    let mut peer = TcpStream::connect(addr).await.unwrap();
    let (handle, task) = server.accept().await.unwrap().spawn();

    peer.write_all(&encode_header(u32::MAX)).await.unwrap();

    let result = tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
    assert!(result.is_err());
    assert!(handle.is_faulted());
    assert_eq!(handle.state(), SessionState::Closed);
    assert!(rx.try_recv().is_err());
    assert_eq!(server.pool().stats().outstanding(), 0);
}

/// An abrupt reset from the peer is an ordinary disconnect.
#[tokio::test]
async fn test_peer_reset_is_not_a_fault() {
    let (dispatcher, _rx) = collector();
    let server = TcpServer::bind("127.0.0.1:0", TransportConfig::default(), dispatcher)
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();

    let mut peer = TcpStream::connect(addr).await.unwrap();
    let (handle, task) = server.accept().await.unwrap().spawn();

    // Half a frame, then RST instead of FIN.
    peer.write_all(&[0, 0, 0, 10, 1, 2]).await.unwrap();
    SockRef::from(&peer).set_linger(Some(Duration::ZERO)).unwrap();
    drop(peer);

    tokio::time::timeout(WAIT, task).await.unwrap().unwrap().unwrap();
    assert!(!handle.is_faulted());
    assert_eq!(server.pool().stats().outstanding(), 0);
}

/// Raw mode dispatches bytes as they arrive and sends them unframed.
#[tokio::test]
async fn test_raw_mode_echo() {
    let raw = TransportConfig::default().with_framing(false);
    let server = TcpServer::bind("127.0.0.1:0", raw.clone(), Arc::new(Echo))
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());

    let (dispatcher, mut rx) = collector();
    let client = TcpClient::new(raw, dispatcher).unwrap();
    let (handle, task) = client.connect_and_spawn(addr).await.unwrap();

    handle.send(b"no frames here").await.unwrap();

    let mut received = Vec::new();
    while received.len() < b"no frames here".len() {
        received.extend(next(&mut rx).await);
    }
    assert_eq!(received, b"no frames here");

    handle.close().await;
    task.await.unwrap().unwrap();
}

/// Every borrow is matched by a return across many concurrent sessions.
#[tokio::test]
async fn test_buffer_conservation_across_sessions() {
    const CLIENTS: usize = 16;

    let config = TransportConfig::default()
        .with_receive_buffer_size(16)
        .with_initial_pool_buffers(2);
    let server = TcpServer::bind("127.0.0.1:0", config, Arc::new(dispatch_fn(|_, _| {})))
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    let pool = server.pool().clone();

    let acceptor = tokio::spawn(async move {
        let mut tasks = Vec::new();
        for _ in 0..CLIENTS {
            let (_handle, task) = server.accept().await.unwrap().spawn();
            tasks.push(task);
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
    });

    let clients: Vec<_> = (0..CLIENTS)
        .map(|i| {
            tokio::spawn(async move {
                let mut peer = TcpStream::connect(addr).await.unwrap();
                for n in 0..10 {
                    let payload = vec![i as u8; (i * 7 + n * 13) % 100];
                    peer.write_all(&frame(&payload)).await.unwrap();
                }
                peer.shutdown().await.unwrap();
            })
        })
        .collect();

    for client in clients {
        client.await.unwrap();
    }
    tokio::time::timeout(WAIT, acceptor).await.unwrap().unwrap();

    let stats = pool.stats();
    assert!(stats.borrowed >= (CLIENTS * 2) as u64);
    assert_eq!(stats.outstanding(), 0);
}

/// Dispatchers can close their own session.
#[tokio::test]
async fn test_close_from_dispatcher() {
    struct CloseOnFirst;

    impl Dispatcher for CloseOnFirst {
        fn dispatch<'a>(
            &'a self,
            session: &'a SessionHandle,
            _payload: &'a [u8],
        ) -> BoxFuture<'a, ()> {
            Box::pin(async move { session.close().await })
        }
    }

    let server = TcpServer::bind("127.0.0.1:0", TransportConfig::default(), Arc::new(CloseOnFirst))
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();

    let mut peer = TcpStream::connect(addr).await.unwrap();
    let (handle, task) = server.accept().await.unwrap().spawn();

    peer.write_all(&frame(b"bye")).await.unwrap();

    tokio::time::timeout(WAIT, task).await.unwrap().unwrap().unwrap();
    assert_eq!(handle.state(), SessionState::Closed);
    assert!(!handle.is_faulted());
    assert_eq!(server.pool().stats().outstanding(), 0);
}
