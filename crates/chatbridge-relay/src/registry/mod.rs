//! Connection registry: the hub's single authoritative state.

mod connection;

pub use connection::{
    BroadcastReport, ConnectionId, ConnectionRegistry, Delivery, Departure, IdentifyOutcome,
    PeerHandle, QueryRoute, Role,
};
