//! chatbridge CLI
//!
//! Sends a query through the relay and streams the answer to stdout.

use std::io::{self, Write};
use std::process::ExitCode;

use clap::{CommandFactory, Parser, error::ErrorKind};
use tracing::info;

use chatbridge_cli::connection::ConnectionConfig;
use chatbridge_cli::headless::{self, Outcome};
use chatbridge_core::config::load_config;
use chatbridge_core::tracing_init::init_tracing;

#[derive(Parser, Debug)]
#[command(name = "chatbridge")]
#[command(version, about = "Ask a question and stream the answer from the browser")]
struct Cli {
    /// Relay WebSocket URL.
    #[arg(long)]
    url: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long)]
    log_json: bool,

    /// Query text. Multiple words are joined with spaces.
    #[arg(required = true, trailing_var_arg = true, num_args = 1..)]
    query: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let query = cli.query.join(" ");
    if query.trim().is_empty() {
        Cli::command()
            .error(ErrorKind::InvalidValue, "query must not be empty")
            .exit();
    }

    let mut config = load_config()?;
    if let Some(url) = cli.url {
        config.client.url = url;
    }

    init_tracing("chatbridge_cli=warn", cli.log_json);

    let conn_config = ConnectionConfig::from(config.client);
    info!(url = %conn_config.url, "Starting chatbridge");

    let mut stdout = io::stdout().lock();
    let mut stderr = io::stderr();

    let interrupt = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    let result =
        headless::run_until(&conn_config, &query, &mut stdout, &mut stderr, interrupt).await;

    match result {
        Ok(Outcome::Completed) => Ok(ExitCode::SUCCESS),
        Ok(Outcome::Interrupted) => {
            let _ = writeln!(stderr, "\nInterrupted");
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            let _ = stdout.flush();
            let _ = writeln!(stderr, "\nError: {e}");
            Ok(ExitCode::FAILURE)
        }
    }
}
