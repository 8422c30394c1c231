//! Query driver.
//!
//! Runs one [`ResponseProducer`] per query, forwards what it emits to the
//! relay and enforces the stall watchdog. The driver stops at the first
//! terminal notification (`chunk{done:true}` or `error`).

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

use chatbridge_core::Message;

use crate::error::ProducerError;

/// Produces the answer to a query.
///
/// Implementations emit increments, status notes and a terminal signal
/// through the [`ChunkSink`]. Returning without a terminal signal is allowed;
/// consumers then keep waiting until the stall watchdog fires.
pub trait ResponseProducer: Send + Sync + 'static {
    fn respond(&self, query: String, sink: ChunkSink) -> impl Future<Output = ()> + Send;
}

/// Handle a [`ResponseProducer`] uses to emit notifications for one query.
#[derive(Debug, Clone)]
pub struct ChunkSink {
    tx: mpsc::Sender<Message>,
}

impl ChunkSink {
    async fn emit(&self, msg: Message) -> Result<(), ProducerError> {
        self.tx.send(msg).await.map_err(|_| ProducerError::SinkClosed)
    }

    /// Non-terminal increment.
    pub async fn chunk(&self, text: impl Into<String>) -> Result<(), ProducerError> {
        self.emit(Message::chunk(text, false)).await
    }

    /// Terminal chunk. `text` may be empty.
    pub async fn finish(&self, text: impl Into<String>) -> Result<(), ProducerError> {
        self.emit(Message::chunk(text, true)).await
    }

    pub async fn status(&self, text: impl Into<String>) -> Result<(), ProducerError> {
        self.emit(Message::status(text)).await
    }

    /// Terminal failure.
    pub async fn error(&self, text: impl Into<String>) -> Result<(), ProducerError> {
        self.emit(Message::error(text)).await
    }
}

/// Turns successive full-text snapshots of an answer into increments.
#[derive(Debug, Default)]
pub struct IncrementTracker {
    sent: String,
}

impl IncrementTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text reported so far.
    pub fn sent(&self) -> &str {
        &self.sent
    }

    /// Increment since the previous snapshot, or `None` when nothing new
    /// appeared.
    ///
    /// A snapshot that rewrites already-sent text cannot be retracted
    /// downstream; only the part past the previously sent length is
    /// returned.
    pub fn advance(&mut self, snapshot: &str) -> Option<String> {
        if snapshot == self.sent {
            return None;
        }

        let increment = if let Some(rest) = snapshot.strip_prefix(self.sent.as_str()) {
            rest.to_string()
        } else {
            warn!(
                sent_len = self.sent.len(),
                snapshot_len = snapshot.len(),
                "Snapshot rewrote already-sent text"
            );
            let mut start = self.sent.len().min(snapshot.len());
            while !snapshot.is_char_boundary(start) {
                start += 1;
            }
            snapshot[start..].to_string()
        };

        snapshot.clone_into(&mut self.sent);
        (!increment.is_empty()).then_some(increment)
    }

}

/// How a driven query ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveOutcome {
    /// Terminal chunk forwarded.
    Completed,
    /// Producer reported an error.
    Failed,
    /// Watchdog fired and an error was sent on the producer's behalf. This
    /// also covers a producer that returned without a terminal signal.
    Stalled,
}

/// Error text sent when a query goes quiet for `timeout`.
pub fn stall_message(timeout: Duration) -> String {
    format!(
        "Producer did not respond within {} seconds",
        timeout.as_secs()
    )
}

/// Drive one query to completion, forwarding notifications to `outbound`.
///
/// The watchdog restarts on every notification. It keeps running after the
/// producer drops its sink, so a query always ends with a terminal message.
pub async fn drive<P: ResponseProducer>(
    producer: &P,
    query: String,
    outbound: &mpsc::Sender<Message>,
    stall_timeout: Duration,
) -> Result<DriveOutcome, ProducerError> {
    let (tx, mut rx) = mpsc::channel::<Message>(64);
    let work = producer.respond(query, ChunkSink { tx });
    tokio::pin!(work);

    let mut work_finished = false;
    let mut sink_open = true;
    let mut deadline = Instant::now() + stall_timeout;

    loop {
        tokio::select! {
            msg = rx.recv(), if sink_open => {
                let Some(msg) = msg else {
                    debug!("Producer finished without a terminal signal");
                    sink_open = false;
                    continue;
                };
                let outcome = msg.is_terminal().then(|| match &msg {
                    Message::Error { .. } => DriveOutcome::Failed,
                    _ => DriveOutcome::Completed,
                });
                outbound
                    .send(msg)
                    .await
                    .map_err(|_| ProducerError::Connection("Outbound channel closed".into()))?;
                if let Some(outcome) = outcome {
                    return Ok(outcome);
                }
                deadline = Instant::now() + stall_timeout;
            }
            () = &mut work, if !work_finished => {
                work_finished = true;
            }
            () = sleep_until(deadline) => {
                info!(timeout_secs = stall_timeout.as_secs(), "Query stalled");
                outbound
                    .send(Message::error(stall_message(stall_timeout)))
                    .await
                    .map_err(|_| ProducerError::Connection("Outbound channel closed".into()))?;
                return Ok(DriveOutcome::Stalled);
            }
        }
    }
}
