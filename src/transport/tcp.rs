//! TCP server and client roles.
//!
//! Both roles share one endpoint: config, buffer pool, dispatcher and
//! optional stream upgrade. A connection goes through the same steps on
//! either side:
//!
//! 1. connect / accept
//! 2. apply socket options (`no_delay`, `linger`)
//! 3. run the stream upgrade when `tls.enabled`
//! 4. build a [`Session`] with buffers from the shared pool
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use framewire::config::TransportConfig;
//! use framewire::transport::TcpServer;
//!
//! let server = TcpServer::bind("127.0.0.1:9000", TransportConfig::default(), Arc::new(Echo)).await?;
//! server.run().await?;
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use socket2::SockRef;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};

use crate::buffer::BufferPool;
use crate::config::TransportConfig;
use crate::error::{Result, TransportError};
use crate::session::{
    with_timeout, BoxedStream, Dispatcher, Role, Session, SessionHandle, StreamUpgrade,
};

/// Pause after a listener error so a persistent failure (e.g. fd exhaustion)
/// does not spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Everything needed to turn a raw socket into a session.
#[derive(Clone)]
struct Endpoint {
    config: Arc<TransportConfig>,
    pool: BufferPool,
    dispatcher: Arc<dyn Dispatcher>,
    upgrade: Option<Arc<dyn StreamUpgrade>>,
}

impl Endpoint {
    fn new(config: TransportConfig, dispatcher: Arc<dyn Dispatcher>) -> Result<Self> {
        config.validate()?;
        let pool = BufferPool::with_max_idle(
            config.receive_buffer_size,
            config.initial_pool_buffers,
            config.max_pooled_buffers,
        );
        Ok(Self {
            config: Arc::new(config),
            pool,
            dispatcher,
            upgrade: None,
        })
    }

    async fn establish(&self, stream: TcpStream, role: Role) -> Result<Session> {
        apply_socket_options(&stream, &self.config)?;

        let stream: BoxedStream = if self.config.tls.enabled {
            let upgrade = self.upgrade.as_ref().ok_or_else(|| {
                TransportError::Config("tls.enabled requires a stream upgrade".to_string())
            })?;
            upgrade
                .upgrade(Box::new(stream), role, &self.config.tls)
                .await
                .map_err(|e| match e {
                    TransportError::Upgrade(_) => e,
                    other => TransportError::Upgrade(other.to_string()),
                })?
        } else {
            Box::new(stream)
        };

        Ok(Session::new(
            stream,
            role,
            &self.config,
            &self.pool,
            self.dispatcher.clone(),
        ))
    }
}

fn apply_socket_options(stream: &TcpStream, config: &TransportConfig) -> Result<()> {
    stream.set_nodelay(config.no_delay)?;
    if let Some(linger) = config.linger {
        SockRef::from(stream).set_linger(Some(linger))?;
    }
    Ok(())
}

/// Accepting side. Each accepted connection becomes a server-role session.
pub struct TcpServer {
    listener: TcpListener,
    endpoint: Endpoint,
}

impl TcpServer {
    /// Bind a listener and create the buffer pool.
    pub async fn bind<A: ToSocketAddrs>(
        addr: A,
        config: TransportConfig,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Result<Self> {
        let endpoint = Endpoint::new(config, dispatcher)?;
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(addr = ?listener.local_addr().ok(), "listening");
        Ok(Self { listener, endpoint })
    }

    /// Use `upgrade` when `tls.enabled` is set.
    pub fn with_upgrade(mut self, upgrade: Arc<dyn StreamUpgrade>) -> Self {
        self.endpoint.upgrade = Some(upgrade);
        self
    }

    /// Share an existing pool instead of the one created by `bind`.
    pub fn with_pool(mut self, pool: BufferPool) -> Self {
        self.endpoint.pool = pool;
        self
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Pool shared by this server's sessions.
    pub fn pool(&self) -> &BufferPool {
        &self.endpoint.pool
    }

    /// Accept one connection and return its session, not yet running.
    pub async fn accept(&self) -> Result<Session> {
        let (stream, peer) = self.listener.accept().await?;
        tracing::debug!(%peer, "accepted connection");
        self.endpoint.establish(stream, Role::Server).await
    }

    /// Accept forever, running every session on its own task.
    ///
    /// Upgrade failures are logged and only drop that connection.
    pub async fn run(self) -> Result<()> {
        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    continue;
                }
            };

            let endpoint = self.endpoint.clone();
            tokio::spawn(async move {
                match endpoint.establish(stream, Role::Server).await {
                    Ok(session) => {
                        tracing::debug!(%peer, session = %session.id(), "session accepted");
                        // Faults are logged by the session itself.
                        let _ = session.run().await;
                    }
                    Err(e) => tracing::warn!(%peer, error = %e, "connection setup failed"),
                }
            });
        }
    }
}

/// Connecting side. Every `connect` yields a client-role session.
pub struct TcpClient {
    endpoint: Endpoint,
}

impl TcpClient {
    /// Create a client with its own buffer pool.
    pub fn new(config: TransportConfig, dispatcher: Arc<dyn Dispatcher>) -> Result<Self> {
        Ok(Self {
            endpoint: Endpoint::new(config, dispatcher)?,
        })
    }

    /// Use `upgrade` when `tls.enabled` is set.
    pub fn with_upgrade(mut self, upgrade: Arc<dyn StreamUpgrade>) -> Self {
        self.endpoint.upgrade = Some(upgrade);
        self
    }

    /// Share an existing pool.
    pub fn with_pool(mut self, pool: BufferPool) -> Self {
        self.endpoint.pool = pool;
        self
    }

    /// Pool shared by this client's sessions.
    pub fn pool(&self) -> &BufferPool {
        &self.endpoint.pool
    }

    /// Connect, applying `connect_timeout`, and return the session.
    pub async fn connect<A: ToSocketAddrs>(&self, addr: A) -> Result<Session> {
        let stream = with_timeout(self.endpoint.config.connect_timeout, "connect", async move {
            Ok::<_, TransportError>(TcpStream::connect(addr).await?)
        })
        .await?;
        tracing::debug!(peer = ?stream.peer_addr().ok(), "connected");
        self.endpoint.establish(stream, Role::Client).await
    }

    /// Connect and start the receive loop on a new task.
    pub async fn connect_and_spawn<A: ToSocketAddrs>(
        &self,
        addr: A,
    ) -> Result<(SessionHandle, tokio::task::JoinHandle<Result<()>>)> {
        Ok(self.connect(addr).await?.spawn())
    }
}
