//! Producer error types.

/// Errors that can occur in the producer runtime.
#[derive(Debug, thiserror::Error)]
pub enum ProducerError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] chatbridge_core::Error),

    /// The query this sink belonged to has already finished.
    #[error("Response sink closed")]
    SinkClosed,
}
