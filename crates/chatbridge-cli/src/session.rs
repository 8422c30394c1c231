//! Consumer session state machine.
//!
//! One session covers one query on one relay connection:
//! `Connecting -> Identified -> AwaitingResponse -> Streaming* -> Done | Failed`.
//! The machine is transport-free; [`crate::headless`] drives it.

use chatbridge_core::protocol::{ClientKind, Inbound, Message};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Channel open, nothing sent yet.
    Connecting,
    /// `identify` sent.
    Identified,
    /// Query sent, no chunk received yet.
    AwaitingResponse,
    /// At least one non-terminal chunk received.
    Streaming,
    Done,
    Failed,
}

impl SessionState {
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// What the driver should do with an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Write `text` to the output stream. `done` ends the session.
    Emit { text: String, done: bool },
    /// Advisory note for the diagnostic stream.
    Status(String),
    /// The producer or relay reported a terminal error.
    Fail(String),
    Ignore,
}

/// Why a session ended without a terminal signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Closure {
    /// No chunk had arrived.
    NoResponse,
    /// Some chunks arrived but never the terminal one.
    Incomplete { chunks: usize },
}

#[derive(Debug)]
pub struct ConsumerSession {
    query: String,
    state: SessionState,
    chunks: usize,
}

impl ConsumerSession {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            state: SessionState::Connecting,
            chunks: 0,
        }
    }

    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Chunks received so far, terminal chunk included.
    pub const fn chunks_received(&self) -> usize {
        self.chunks
    }

    /// Role registration message. Moves `Connecting -> Identified`.
    pub fn identify(&mut self) -> Message {
        self.state = SessionState::Identified;
        Message::identify(ClientKind::Cli)
    }

    /// The query message. Moves `Identified -> AwaitingResponse`.
    pub fn submit(&mut self) -> Message {
        self.state = SessionState::AwaitingResponse;
        Message::query(self.query.clone())
    }

    /// Advance on one decoded message from the relay.
    pub fn on_message(&mut self, inbound: Inbound) -> Action {
        if self.state.is_finished() {
            return Action::Ignore;
        }

        let Inbound::Known(msg) = inbound else {
            return Action::Ignore;
        };

        match msg {
            Message::Chunk { text, done } => {
                if !matches!(
                    self.state,
                    SessionState::AwaitingResponse | SessionState::Streaming
                ) {
                    return Action::Ignore;
                }
                self.chunks += 1;
                self.state = if done {
                    SessionState::Done
                } else {
                    SessionState::Streaming
                };
                Action::Emit { text, done }
            }
            Message::Error { text } => {
                self.state = SessionState::Failed;
                Action::Fail(text)
            }
            Message::Status { text } => Action::Status(text),
            Message::Ready { .. } | Message::Identify { .. } | Message::Query { .. } => {
                Action::Ignore
            }
        }
    }

    /// The relay closed the channel.
    ///
    /// Returns `None` when the session had already finished.
    pub fn on_closed(&mut self) -> Option<Closure> {
        if self.state.is_finished() {
            return None;
        }
        self.state = SessionState::Failed;
        Some(if self.chunks == 0 {
            Closure::NoResponse
        } else {
            // Still a failure: without a terminal chunk the answer may be cut short.
            Closure::Incomplete {
                chunks: self.chunks,
            }
        })
    }
}
