//! WebSocket server for the chatbridge relay.

mod listener;

pub use listener::{RelayServer, ServerError};
