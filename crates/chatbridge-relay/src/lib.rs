//! chatbridge Relay Hub Library
//!
//! Core functionality for the relay:
//! - Connection registry holding the producer slot and the consumer set
//! - Role-based routing of queries and streamed notifications
//! - WebSocket listener with one bounded outbound queue per connection

pub mod registry;
pub mod router;
pub mod server;
