//! chatbridge Producer
//!
//! Attaches the built-in echo producer to the relay. Useful for checking a
//! relay and CLI setup without a browser.

use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

use chatbridge_core::config::load_config;
use chatbridge_core::tracing_init::init_tracing;
use chatbridge_producer::client::ProducerClient;
use chatbridge_producer::config::{ProducerSettings, ReconnectPolicy};
use chatbridge_producer::echo::EchoProducer;

#[derive(Parser, Debug)]
#[command(name = "chatbridge-producer")]
#[command(version, about = "chatbridge echo producer - answers relay queries by echoing them")]
struct Args {
    /// Relay WebSocket URL.
    #[arg(long)]
    url: Option<String>,

    /// Fixed delay between reconnect attempts, in milliseconds.
    #[arg(long)]
    reconnect_delay_ms: Option<u64>,

    /// Seconds a query may stay silent before an error is reported.
    #[arg(long)]
    stall_timeout_secs: Option<u64>,

    /// Pause between echoed words, in milliseconds.
    #[arg(long, default_value_t = 100)]
    word_delay_ms: u64,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = load_config()?;
    if let Some(url) = args.url {
        config.client.url = url;
    }
    if let Some(secs) = args.stall_timeout_secs {
        config.producer.stall_timeout_secs = secs;
    }

    init_tracing(
        &format!("chatbridge_producer={}", config.log_level),
        args.log_json,
    );

    let mut settings = ProducerSettings::from_config(&config);
    if let Some(ms) = args.reconnect_delay_ms {
        settings.reconnect = ReconnectPolicy::fixed(Duration::from_millis(ms));
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        url = %settings.url,
        "Starting chatbridge-producer"
    );

    let client = ProducerClient::new(
        settings,
        EchoProducer::new(Duration::from_millis(args.word_delay_ms)),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    client.run(shutdown_rx).await;

    info!("Producer stopped");
    Ok(())
}
