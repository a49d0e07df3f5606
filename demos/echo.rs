//! Echo Server - frames every payload straight back to its sender.
//!
//! This example demonstrates:
//! - Binding a `TcpServer` with a config loaded from JSON
//! - Implementing `Dispatcher` with an async reply
//! - Running the accept loop with one task per session
//!
//! # Running
//!
//! ```text
//! RUST_LOG=framewire=debug cargo run --example echo -- 127.0.0.1:9000 [config.json]
//! ```
//!
//! Then talk to it with the `client` example.

use std::sync::Arc;

use framewire::session::{BoxFuture, Dispatcher, SessionHandle};
use framewire::transport::TcpServer;
use framewire::TransportConfig;
use tracing_subscriber::EnvFilter;

/// Replies with the payload it was given.
struct Echo;

impl Dispatcher for Echo {
    fn dispatch<'a>(&'a self, session: &'a SessionHandle, payload: &'a [u8]) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            tracing::info!(session = %session.id(), len = payload.len(), "echo");
            if let Err(e) = session.send(payload).await {
                tracing::warn!(error = %e, "echo reply failed");
            }
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let addr = args.next().unwrap_or_else(|| "127.0.0.1:9000".to_string());
    let config = match args.next() {
        Some(path) => TransportConfig::from_json(&std::fs::read_to_string(path)?)?,
        None => TransportConfig::default(),
    };

    let server = TcpServer::bind(addr.as_str(), config, Arc::new(Echo)).await?;
    println!("echo server on {}", server.local_addr()?);

    server.run().await?;
    Ok(())
}
