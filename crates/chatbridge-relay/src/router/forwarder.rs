//! Message router that applies the hub's role rules to inbound frames.
//!
//! Queries travel consumer → producer, notifications travel producer → every
//! consumer. Frames are forwarded verbatim; the router only decodes them to
//! decide where they go.

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use chatbridge_core::protocol::{self, PRODUCER_BUSY, PRODUCER_DISCONNECTED, PRODUCER_MISSING};
use chatbridge_core::{ClientKind, Inbound, Message};

use crate::registry::{
    BroadcastReport, ConnectionId, ConnectionRegistry, Delivery, Departure, IdentifyOutcome,
    QueryRoute,
};

/// What the router did with one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    Identified(IdentifyOutcome),
    QueryForwarded {
        producer: ConnectionId,
    },
    Broadcast {
        msg_type: &'static str,
        report: BroadcastReport,
    },
    /// Unknown type, or a type the sender's role may not send.
    Ignored {
        msg_type: String,
    },
}

/// Routes frames between the producer and consumers.
#[derive(Clone)]
pub struct MessageRouter {
    registry: ConnectionRegistry,
}

impl MessageRouter {
    pub const fn new(registry: ConnectionRegistry) -> Self {
        Self { registry }
    }

    /// Get a reference to the connection registry.
    pub const fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Track a newly accepted connection. It stays unidentified until its
    /// first `identify`.
    pub async fn connect(&self, id: ConnectionId, tx: mpsc::Sender<String>) {
        self.registry.register(id, tx).await;
    }

    /// Route one inbound text frame from connection `from`.
    ///
    /// Errors are local to the hub: the caller logs them and keeps the
    /// connection open.
    pub async fn handle_frame(&self, from: ConnectionId, frame: &str) -> Result<Routed, RouteError> {
        let msg = match protocol::decode(frame).map_err(RouteError::Decode)? {
            Inbound::Known(msg) => msg,
            Inbound::Unknown { msg_type } => {
                debug!(conn_id = %from, msg_type, "Ignoring unknown message type");
                return Ok(Routed::Ignored { msg_type });
            }
        };

        match msg {
            Message::Identify { client } => Ok(Routed::Identified(
                self.identify(from, &client).await,
            )),
            Message::Query { text } => self.forward_query(from, frame, &text).await,
            msg if msg.is_producer_notification() => Ok(self.fan_out(from, frame, &msg).await),
            msg => Ok(Routed::Ignored {
                msg_type: msg.msg_type().into(),
            }),
        }
    }

    /// Remove a connection. A departing producer turns into an `error` for
    /// every consumer.
    pub async fn disconnect(&self, id: ConnectionId) -> Departure {
        let departure = self.registry.unregister(id).await;
        match departure {
            Departure::Producer => {
                info!(conn_id = %id, "Producer disconnected");
                match protocol::encode(&Message::error(PRODUCER_DISCONNECTED)) {
                    Ok(frame) => {
                        let report = self.registry.broadcast(&frame).await;
                        info!(
                            notified = report.delivered,
                            dropped = report.dropped,
                            "Notified consumers of producer loss"
                        );
                    }
                    Err(e) => error!(error = %e, "Failed to encode producer loss notice"),
                }
            }
            Departure::StaleProducer => info!(conn_id = %id, "Replaced producer disconnected"),
            Departure::Consumer => info!(conn_id = %id, "Consumer disconnected"),
            Departure::Unidentified => debug!(conn_id = %id, "Unidentified connection closed"),
            Departure::Unknown => {
                warn!(conn_id = %id, "Tried to unregister unknown connection");
            }
        }
        departure
    }

    async fn identify(&self, from: ConnectionId, client: &str) -> IdentifyOutcome {
        let outcome = self
            .registry
            .identify(from, ClientKind::parse(client))
            .await;
        match outcome {
            IdentifyOutcome::AlreadyIdentified(role) => {
                warn!(conn_id = %from, ?role, client, "Ignoring repeated identify");
            }
            IdentifyOutcome::Unrecognized => {
                debug!(conn_id = %from, client, "Ignoring identify with unrecognised client");
            }
            _ => {}
        }
        outcome
    }

    async fn forward_query(
        &self,
        from: ConnectionId,
        frame: &str,
        text: &str,
    ) -> Result<Routed, RouteError> {
        match self.registry.forward_query(from, frame).await {
            QueryRoute::Forwarded { producer } => {
                info!(
                    conn_id = %from,
                    producer = %producer,
                    query = %preview(text, 50),
                    "Query forwarded to producer"
                );
                Ok(Routed::QueryForwarded { producer })
            }
            QueryRoute::NoProducer => {
                self.reply_error(from, PRODUCER_MISSING).await?;
                Err(RouteError::NoProducer)
            }
            QueryRoute::ProducerBusy { producer } => {
                self.reply_error(from, PRODUCER_BUSY).await?;
                Err(RouteError::ProducerBusy(producer))
            }
            QueryRoute::NotConsumer => {
                debug!(conn_id = %from, "Ignoring query from non-consumer");
                Ok(Routed::Ignored {
                    msg_type: "query".into(),
                })
            }
        }
    }

    /// Tell the requester its query went nowhere.
    async fn reply_error(&self, to: ConnectionId, text: &str) -> Result<(), RouteError> {
        let reply = protocol::encode(&Message::error(text)).map_err(RouteError::Encode)?;
        if self.registry.send_to(to, &reply).await != Delivery::Queued {
            debug!(conn_id = %to, text, "Could not deliver query rejection");
        }
        Ok(())
    }

    async fn fan_out(&self, from: ConnectionId, frame: &str, msg: &Message) -> Routed {
        let Some(report) = self.registry.broadcast_from(from, frame).await else {
            debug!(conn_id = %from, msg_type = msg.msg_type(), "Ignoring notification from non-producer");
            return Routed::Ignored {
                msg_type: msg.msg_type().into(),
            };
        };
        if let Message::Chunk { text, done } = msg {
            debug!(
                chunk = %preview(text, 30),
                done,
                consumers = report.delivered,
                "Chunk broadcast"
            );
        } else {
            debug!(msg_type = msg.msg_type(), consumers = report.delivered, "Notification broadcast");
        }
        Routed::Broadcast {
            msg_type: msg.msg_type(),
            report,
        }
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    text.chars()
        .take(max_chars)
        .map(|c| if c == '\n' { ' ' } else { c })
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("Malformed frame: {0}")]
    Decode(#[source] chatbridge_core::Error),

    #[error("Query rejected: no producer connected")]
    NoProducer,

    #[error("Producer {0} queue full, query dropped")]
    ProducerBusy(ConnectionId),

    #[error("Failed to encode relay message: {0}")]
    Encode(#[source] chatbridge_core::Error),
}
