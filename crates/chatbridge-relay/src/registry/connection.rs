//! In-memory connection registry for the relay hub.
//!
//! Holds the producer slot, the consumer set and the outbound queue of every
//! open connection. All reads and mutations go through one `RwLock`, so role
//! checks and the deliveries that depend on them happen atomically.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use chatbridge_core::ClientKind;

/// Relay-local identifier of one connection. Never sent on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Role a connection holds after identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Unidentified,
    Producer,
    Consumer,
}

/// Result of a non-blocking enqueue on a connection's outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// Queue full; the frame was dropped for this connection only.
    Full,
    /// Writer side is gone; the connection is closing.
    Closed,
}

/// Outbound half of a connection: a bounded queue drained by its writer task.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    id: ConnectionId,
    tx: mpsc::Sender<String>,
}

impl PeerHandle {
    pub const fn new(id: ConnectionId, tx: mpsc::Sender<String>) -> Self {
        Self { id, tx }
    }

    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Enqueue a frame without waiting on the peer.
    pub fn try_deliver(&self, frame: &str) -> Delivery {
        match self.tx.try_send(frame.to_string()) {
            Ok(()) => Delivery::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => Delivery::Full,
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
        }
    }
}

/// Counts from one fan-out to the consumer set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub dropped: usize,
    pub closed: usize,
}

/// Outcome of an `identify` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifyOutcome {
    /// Connection is now the producer; `replaced` is the previous one, which
    /// stays open but is no longer addressed.
    Producer { replaced: Option<ConnectionId> },
    Consumer,
    /// The connection already has a role; the message was ignored.
    AlreadyIdentified(Role),
    /// The declared client kind is not recognised; the message was ignored.
    Unrecognized,
    /// No such connection is registered.
    UnknownConnection,
}

/// Outcome of forwarding a consumer's query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryRoute {
    Forwarded { producer: ConnectionId },
    NoProducer,
    /// The producer's queue is full; the query was dropped.
    ProducerBusy { producer: ConnectionId },
    /// Sender is not a consumer; the query was ignored.
    NotConsumer,
}

/// What a connection was when it left the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Departure {
    /// The current producer left; the slot is now empty.
    Producer,
    /// A producer that had already been replaced left.
    StaleProducer,
    Consumer,
    Unidentified,
    Unknown,
}

struct Peer {
    handle: PeerHandle,
    role: Role,
}

#[derive(Default)]
struct HubState {
    peers: HashMap<ConnectionId, Peer>,
    producer: Option<ConnectionId>,
    consumers: HashSet<ConnectionId>,
}

impl HubState {
    fn current_producer(&self) -> Option<&PeerHandle> {
        self.producer
            .and_then(|id| self.peers.get(&id))
            .map(|peer| &peer.handle)
    }

    fn broadcast(&self, frame: &str) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        for id in &self.consumers {
            let Some(peer) = self.peers.get(id) else {
                continue;
            };
            match peer.handle.try_deliver(frame) {
                Delivery::Queued => report.delivered += 1,
                Delivery::Full => {
                    warn!(conn_id = %id, "Consumer queue full, dropping message");
                    report.dropped += 1;
                }
                Delivery::Closed => {
                    debug!(conn_id = %id, "Skipping closed consumer");
                    report.closed += 1;
                }
            }
        }
        report
    }
}

/// Thread-safe registry of relay connections.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    state: Arc<RwLock<HubState>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly accepted connection as unidentified.
    pub async fn register(&self, id: ConnectionId, tx: mpsc::Sender<String>) {
        self.state.write().await.peers.insert(
            id,
            Peer {
                handle: PeerHandle::new(id, tx),
                role: Role::Unidentified,
            },
        );
        debug!(conn_id = %id, "Connection registered");
    }

    /// Assign a role to a connection. Identity is set at most once.
    pub async fn identify(&self, id: ConnectionId, kind: Option<ClientKind>) -> IdentifyOutcome {
        let mut state = self.state.write().await;
        let Some(peer) = state.peers.get_mut(&id) else {
            return IdentifyOutcome::UnknownConnection;
        };
        if peer.role != Role::Unidentified {
            return IdentifyOutcome::AlreadyIdentified(peer.role);
        }
        match kind {
            Some(ClientKind::Extension) => {
                peer.role = Role::Producer;
                let replaced = state.producer.replace(id);
                drop(state);
                info!(conn_id = %id, replaced = ?replaced.map(|r| r.to_string()), "Producer connected");
                IdentifyOutcome::Producer { replaced }
            }
            Some(ClientKind::Cli) => {
                peer.role = Role::Consumer;
                state.consumers.insert(id);
                let consumers = state.consumers.len();
                drop(state);
                info!(conn_id = %id, consumers, "Consumer connected");
                IdentifyOutcome::Consumer
            }
            None => IdentifyOutcome::Unrecognized,
        }
    }

    /// Remove a connection and report what it was.
    pub async fn unregister(&self, id: ConnectionId) -> Departure {
        let mut state = self.state.write().await;
        let Some(peer) = state.peers.remove(&id) else {
            return Departure::Unknown;
        };
        match peer.role {
            Role::Producer if state.producer == Some(id) => {
                state.producer = None;
                Departure::Producer
            }
            Role::Producer => Departure::StaleProducer,
            Role::Consumer => {
                state.consumers.remove(&id);
                Departure::Consumer
            }
            Role::Unidentified => Departure::Unidentified,
        }
    }

    /// Forward a query frame from consumer `from` to the current producer.
    pub async fn forward_query(&self, from: ConnectionId, frame: &str) -> QueryRoute {
        let state = self.state.read().await;
        if !state.consumers.contains(&from) {
            return QueryRoute::NotConsumer;
        }
        let Some(producer) = state.current_producer() else {
            return QueryRoute::NoProducer;
        };
        let producer_id = producer.id();
        match producer.try_deliver(frame) {
            Delivery::Queued => QueryRoute::Forwarded {
                producer: producer_id,
            },
            Delivery::Full => QueryRoute::ProducerBusy {
                producer: producer_id,
            },
            // Writer already gone: the producer is disconnecting.
            Delivery::Closed => QueryRoute::NoProducer,
        }
    }

    /// Fan a frame out to every consumer, but only when `from` is the
    /// current producer. Returns `None` for any other sender.
    pub async fn broadcast_from(&self, from: ConnectionId, frame: &str) -> Option<BroadcastReport> {
        let state = self.state.read().await;
        (state.producer == Some(from)).then(|| state.broadcast(frame))
    }

    /// Fan a frame out to every consumer.
    pub async fn broadcast(&self, frame: &str) -> BroadcastReport {
        self.state.read().await.broadcast(frame)
    }

    /// Deliver a frame to one connection.
    pub async fn send_to(&self, id: ConnectionId, frame: &str) -> Delivery {
        self.state
            .read()
            .await
            .peers
            .get(&id)
            .map_or(Delivery::Closed, |peer| peer.handle.try_deliver(frame))
    }

    pub async fn producer_connected(&self) -> bool {
        self.state.read().await.producer.is_some()
    }

    pub async fn consumer_count(&self) -> usize {
        self.state.read().await.consumers.len()
    }

    /// Count of open connections in any role.
    pub async fn connection_count(&self) -> usize {
        self.state.read().await.peers.len()
    }
}
