//! Message types for the relay wire protocol.

use serde::{Deserialize, Serialize};

/// Error text the relay sends when a query arrives with no producer attached.
pub const PRODUCER_MISSING: &str = "Chrome extension not connected. Please open ChatGPT in Chrome with the extension installed.";

/// Error text broadcast to consumers when the producer connection drops.
pub const PRODUCER_DISCONNECTED: &str = "Chrome extension disconnected";

/// Error text sent to a consumer whose query was dropped because the
/// producer's outbound queue was full.
pub const PRODUCER_BUSY: &str = "Producer busy, query dropped. Try again shortly.";

/// Role a client declares in its `identify` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientKind {
    /// The browser-side response producer.
    Extension,
    /// A command-line consumer.
    Cli,
}

impl ClientKind {
    /// Parse the `client` field of an `identify` message.
    ///
    /// Returns `None` for values the relay does not recognise.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "extension" => Some(Self::Extension),
            "cli" => Some(Self::Cli),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Extension => "extension",
            Self::Cli => "cli",
        }
    }
}

impl std::fmt::Display for ClientKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical protocol messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Role registration. `client` is kept as a raw string so unrecognised
    /// values still decode and can be ignored by the relay.
    Identify { client: String },
    /// A user request travelling from a consumer to the producer.
    Query { text: String },
    /// Incremental response text. `done` marks the terminal chunk.
    Chunk {
        text: String,
        #[serde(default)]
        done: bool,
    },
    /// Advisory progress note.
    Status { text: String },
    /// Terminal failure.
    Error { text: String },
    /// Producer attached and ready.
    Ready {
        #[serde(default)]
        text: String,
    },
}

impl Message {
    /// Every `type` tag this protocol version understands.
    pub const KNOWN_TYPES: [&'static str; 6] =
        ["identify", "query", "chunk", "status", "error", "ready"];

    pub fn identify(kind: ClientKind) -> Self {
        Self::Identify {
            client: kind.as_str().to_string(),
        }
    }

    pub fn query(text: impl Into<String>) -> Self {
        Self::Query { text: text.into() }
    }

    pub fn chunk(text: impl Into<String>, done: bool) -> Self {
        Self::Chunk {
            text: text.into(),
            done,
        }
    }

    pub fn status(text: impl Into<String>) -> Self {
        Self::Status { text: text.into() }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::Error { text: text.into() }
    }

    pub fn ready(text: impl Into<String>) -> Self {
        Self::Ready { text: text.into() }
    }

    /// The wire `type` tag of this message.
    pub const fn msg_type(&self) -> &'static str {
        match self {
            Self::Identify { .. } => "identify",
            Self::Query { .. } => "query",
            Self::Chunk { .. } => "chunk",
            Self::Status { .. } => "status",
            Self::Error { .. } => "error",
            Self::Ready { .. } => "ready",
        }
    }

    /// Whether this message ends a consumer's wait for an answer.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Chunk { done: true, .. } | Self::Error { .. })
    }

    /// Whether only the producer may originate this message.
    pub const fn is_producer_notification(&self) -> bool {
        matches!(
            self,
            Self::Chunk { .. } | Self::Status { .. } | Self::Error { .. } | Self::Ready { .. }
        )
    }
}

/// Result of decoding one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Known(Message),
    /// A well-formed frame whose `type` this version does not understand.
    Unknown { msg_type: String },
}
