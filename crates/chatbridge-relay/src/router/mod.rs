//! Role-based message routing.

mod forwarder;

pub use forwarder::{MessageRouter, RouteError, Routed};
