//! Echo Client - sends each argument as one frame and prints the replies.
//!
//! ```text
//! cargo run --example client -- 127.0.0.1:9000 hello world
//! ```

use std::sync::Arc;
use std::time::Duration;

use framewire::session::dispatch_fn;
use framewire::transport::TcpClient;
use framewire::TransportConfig;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let addr = args.next().unwrap_or_else(|| "127.0.0.1:9000".to_string());
    let messages: Vec<String> = args.collect();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let dispatcher = dispatch_fn(move |_session, payload| {
        let _ = tx.send(String::from_utf8_lossy(payload).into_owned());
    });

    let config = TransportConfig::default()
        .with_connect_timeout(Duration::from_secs(5))
        .with_receive_timeout(Duration::from_secs(30));
    let client = TcpClient::new(config, Arc::new(dispatcher))?;
    let (session, task) = client.connect_and_spawn(addr.as_str()).await?;

    for message in &messages {
        session.send(message.as_bytes()).await?;
        match rx.recv().await {
            Some(reply) => println!("{}", reply),
            None => break,
        }
    }

    session.close().await;
    task.await??;

    let stats = client.pool().stats();
    println!(
        "pool: borrowed={} returned={} allocated={}",
        stats.borrowed, stats.returned, stats.allocated
    );
    Ok(())
}
