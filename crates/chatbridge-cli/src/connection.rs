//! Relay connection client.
//!
//! Manages the WebSocket connection from a consumer to the chatbridge relay.

use std::io;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info};

use chatbridge_core::config::ClientConfig;
use chatbridge_core::protocol::{self, Message};

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// WebSocket URL of the relay.
    pub url: String,
    /// Connection timeout.
    pub connect_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ClientConfig::default().into()
    }
}

impl From<ClientConfig> for ConnectionConfig {
    fn from(config: ClientConfig) -> Self {
        Self {
            url: config.url,
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
        }
    }
}

/// An open consumer connection to the relay.
pub struct RelayConnection {
    url: String,
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl RelayConnection {
    /// Dial the relay.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self, ConnectionError> {
        let handshake = connect_async(config.url.as_str());
        let (stream, _response) = tokio::time::timeout(config.connect_timeout, handshake)
            .await
            .map_err(|_| ConnectionError::Timeout {
                url: config.url.clone(),
                secs: config.connect_timeout.as_secs(),
            })?
            .map_err(|e| classify_connect_error(&config.url, e))?;

        info!(url = %config.url, "Connected to relay");
        Ok(Self {
            url: config.url.clone(),
            stream,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Encode and send one protocol message.
    pub async fn send(&mut self, msg: &Message) -> Result<(), ConnectionError> {
        let frame = protocol::encode(msg).map_err(|e| ConnectionError::Send(e.to_string()))?;
        self.stream
            .send(WsMessage::Text(frame))
            .await
            .map_err(|e| ConnectionError::Send(e.to_string()))
    }

    /// Next text payload from the relay.
    ///
    /// Returns `None` once the relay closes the connection. Binary frames
    /// carrying UTF-8 are returned as text; control frames are skipped.
    pub async fn next_frame(&mut self) -> Option<Result<String, ConnectionError>> {
        while let Some(msg) = self.stream.next().await {
            match msg {
                Ok(WsMessage::Text(text)) => return Some(Ok(text)),
                Ok(WsMessage::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => debug!("Skipping non-UTF-8 binary frame"),
                },
                Ok(WsMessage::Close(_)) => return None,
                Ok(_) => {}
                Err(
                    tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed,
                ) => return None,
                Err(e) => return Some(Err(ConnectionError::Receive(e.to_string()))),
            }
        }
        None
    }

    /// Close the connection, ignoring errors from an already-gone peer.
    pub async fn close(mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!(error = %e, "Close handshake failed");
        }
    }
}

fn classify_connect_error(url: &str, err: tungstenite::Error) -> ConnectionError {
    match err {
        tungstenite::Error::Io(ref io_err) if io_err.kind() == io::ErrorKind::ConnectionRefused => {
            ConnectionError::Refused {
                url: url.to_string(),
            }
        }
        tungstenite::Error::Url(e) => ConnectionError::InvalidAddress(e.to_string()),
        other => ConnectionError::ConnectFailed(other.to_string()),
    }
}

/// Connection errors.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Invalid relay address: {0}")]
    InvalidAddress(String),

    #[error("Could not connect to relay at {url}. Start it with `chatbridge-relay`.")]
    Refused { url: String },

    #[error("Timed out after {secs}s connecting to relay at {url}")]
    Timeout { url: String, secs: u64 },

    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    #[error("Failed to send: {0}")]
    Send(String),

    #[error("Failed to receive: {0}")]
    Receive(String),
}
