//! WebSocket listener for the relay hub.
//!
//! Each accepted connection gets a reader loop that hands frames to the
//! [`MessageRouter`] and a writer task that drains the connection's bounded
//! outbound queue, so a slow peer never stalls anyone else. Connection tasks
//! are owned by [`RelayServer::serve`] and finish before it returns.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use crate::registry::ConnectionId;
use crate::router::{MessageRouter, RouteError};

/// How long a closing connection's writer may take to flush and send its
/// close frame.
const WRITER_DRAIN: Duration = Duration::from_secs(1);

/// Relay server bound to its listening endpoint.
pub struct RelayServer {
    listener: TcpListener,
    router: MessageRouter,
    queue_capacity: usize,
}

impl RelayServer {
    /// Bind the listening socket. Port 0 picks a free port.
    pub async fn bind(
        addr: &str,
        router: MessageRouter,
        queue_capacity: usize,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        Ok(Self {
            listener,
            router,
            queue_capacity: queue_capacity.max(1),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` flips to `true` or its sender is
    /// dropped, then close every open connection and wait for its task.
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) -> Result<(), ServerError> {
        let addr = self.local_addr()?;
        info!(addr = %addr, "Relay listening on ws://{addr}");

        let mut connections = JoinSet::new();

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        connections.spawn(handle_connection(
                            stream,
                            peer_addr,
                            self.router.clone(),
                            self.queue_capacity,
                            shutdown.clone(),
                        ));
                    }
                    Err(e) => warn!(error = %e, "Failed to accept connection"),
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    log_join(joined);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(open = connections.len(), "Relay stopped accepting connections");
        while let Some(joined) = connections.join_next().await {
            log_join(joined);
        }
        Ok(())
    }
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        warn!(error = %e, "Connection task failed");
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    router: MessageRouter,
    queue_capacity: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    let ws_stream = tokio::select! {
        accepted = accept_async(stream) => match accepted {
            Ok(ws) => ws,
            Err(e) => {
                warn!(peer = %peer_addr, error = %e, "WebSocket handshake failed");
                return;
            }
        },
        _ = shutdown.changed() => return,
    };

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::channel::<String>(queue_capacity);

    let id = ConnectionId::new();
    router.connect(id, tx).await;
    info!(conn_id = %id, peer = %peer_addr, "New connection established");

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = ws_sender.send(WsMessage::Text(frame)).await {
                debug!(conn_id = %id, error = %e, "Failed to send frame");
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    loop {
        let msg = tokio::select! {
            msg = ws_receiver.next() => msg,
            _ = shutdown.changed() => {
                debug!(conn_id = %id, "Closing connection for shutdown");
                break;
            }
        };
        let Some(msg) = msg else {
            break;
        };
        let text = match msg {
            Ok(WsMessage::Text(text)) => text,
            Ok(WsMessage::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    warn!(conn_id = %id, "Dropping non-UTF-8 binary frame");
                    continue;
                }
            },
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!(conn_id = %id, error = %e, "WebSocket error");
                break;
            }
        };

        match router.handle_frame(id, &text).await {
            Ok(routed) => debug!(conn_id = %id, ?routed, "Frame routed"),
            Err(RouteError::Decode(e)) => {
                warn!(conn_id = %id, error = %e, "Dropping malformed frame");
            }
            Err(e) => warn!(conn_id = %id, error = %e, "Routing failed"),
        }
    }

    // Unregistering drops the last queue sender, so the writer flushes what
    // is queued and sends a close frame.
    router.disconnect(id).await;
    let abort = writer.abort_handle();
    if tokio::time::timeout(WRITER_DRAIN, writer).await.is_err() {
        debug!(conn_id = %id, "Writer did not finish in time");
        abort.abort();
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
