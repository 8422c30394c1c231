//! chatbridge Relay Server
//!
//! WebSocket hub that routes consumer queries to the single producer and
//! streams its answers back to every consumer.


use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

use chatbridge_core::config::load_config;
use chatbridge_core::tracing_init::init_tracing;
use chatbridge_relay::registry::ConnectionRegistry;
use chatbridge_relay::router::MessageRouter;
use chatbridge_relay::server::RelayServer;

#[derive(Parser, Debug)]
#[command(name = "chatbridge-relay")]
#[command(version, about = "chatbridge relay hub - routes queries and streams answers")]
struct Args {
    /// Host to listen on.
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on.
    #[arg(long)]
    port: Option<u16>,

    /// Per-connection outbound queue capacity.
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = load_config()?;
    if let Some(host) = args.host {
        config.relay.host = host;
    }
    if let Some(port) = args.port {
        config.relay.port = port;
    }
    if let Some(capacity) = args.queue_capacity {
        config.relay.outbound_queue_capacity = capacity;
    }

    init_tracing(
        &format!("chatbridge_relay={}", config.log_level),
        args.log_json,
    );

    let addr = config.relay.listen_addr();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %addr,
        queue_capacity = config.relay.outbound_queue_capacity,
        "Starting chatbridge-relay"
    );

    let router = MessageRouter::new(ConnectionRegistry::new());
    let server = RelayServer::bind(&addr, router, config.relay.outbound_queue_capacity).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    server.serve(shutdown_rx).await?;

    info!("Relay stopped");
    Ok(())
}
