//! Headless (non-interactive) mode.
//!
//! Sends one query through the relay and streams the answer to `out` as it
//! arrives. Status notes go to `diag` as `[text]` lines.

use std::future::Future;
use std::io::Write;

use tracing::{debug, info, warn};

use chatbridge_core::protocol;

use crate::connection::{ConnectionConfig, ConnectionError, RelayConnection};
use crate::session::{Action, Closure, ConsumerSession};

/// How a headless run ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The terminal chunk was written.
    Completed,
    /// `interrupt` resolved first; the connection was closed cleanly.
    Interrupted,
}

/// Run one query to completion.
///
/// Returns `Ok(())` once the terminal chunk has been written, followed by a
/// single newline.
pub async fn run<O, D>(
    config: &ConnectionConfig,
    query: &str,
    out: &mut O,
    diag: &mut D,
) -> Result<(), SessionError>
where
    O: Write + ?Sized,
    D: Write + ?Sized,
{
    run_until(config, query, out, diag, std::future::pending()).await?;
    Ok(())
}

/// Like [`run`], but stops early when `interrupt` resolves.
///
/// On interrupt the relay gets a close frame and whatever was already
/// written to `out` is flushed.
pub async fn run_until<O, D, I>(
    config: &ConnectionConfig,
    query: &str,
    out: &mut O,
    diag: &mut D,
    interrupt: I,
) -> Result<Outcome, SessionError>
where
    O: Write + ?Sized,
    D: Write + ?Sized,
    I: Future<Output = ()>,
{
    tokio::pin!(interrupt);

    let mut conn = tokio::select! {
        conn = RelayConnection::connect(config) => conn?,
        () = &mut interrupt => return Ok(Outcome::Interrupted),
    };
    let mut session = ConsumerSession::new(query);

    conn.send(&session.identify()).await?;
    conn.send(&session.submit()).await?;
    info!(url = %conn.url(), query_len = query.len(), "Query submitted");

    loop {
        let frame = tokio::select! {
            frame = conn.next_frame() => frame,
            () = &mut interrupt => {
                out.flush()?;
                info!(chunks = session.chunks_received(), "Interrupted, closing connection");
                conn.close().await;
                return Ok(Outcome::Interrupted);
            }
        };

        let Some(frame) = frame else {
            return match session.on_closed() {
                Some(Closure::NoResponse) | None => Err(SessionError::NoResponse),
                // Partial output stays written, but the answer may be
                // truncated, so the run still fails.
                Some(Closure::Incomplete { chunks }) => Err(SessionError::Incomplete { chunks }),
            };
        };
        let frame = frame?;

        let inbound = match protocol::decode(&frame) {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!(error = %e, "Ignoring malformed frame from relay");
                continue;
            }
        };

        match session.on_message(inbound) {
            Action::Emit { text, done } => {
                out.write_all(text.as_bytes())?;
                if done {
                    out.write_all(b"\n")?;
                    out.flush()?;
                    info!(chunks = session.chunks_received(), "Response complete");
                    conn.close().await;
                    return Ok(Outcome::Completed);
                }
                out.flush()?;
            }
            Action::Status(text) => {
                writeln!(diag, "[{text}]")?;
            }
            Action::Fail(text) => {
                conn.close().await;
                return Err(SessionError::Remote(text));
            }
            Action::Ignore => debug!("Ignoring message"),
        }
    }
}

/// Headless mode errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Error text reported by the producer or the relay.
    #[error("{0}")]
    Remote(String),

    #[error("Connection closed without receiving response")]
    NoResponse,

    #[error("Connection closed after {chunks} chunk(s) without a terminal signal")]
    Incomplete { chunks: usize },

    #[error(transparent)]
    Transport(#[from] ConnectionError),

    #[error("Failed to write output: {0}")]
    Output(#[from] std::io::Error),
}
