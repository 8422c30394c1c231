//! `chatbridge` Core Library
//!
//! Shared functionality for `chatbridge` components:
//! - Wire protocol messages exchanged between relay, producer and consumers
//! - Configuration resolution and hierarchy
//! - Tracing initialisation
//! - Common error types

pub mod config;
pub mod error;
pub mod protocol;
pub mod tracing_init;

pub use config::Config;
pub use error::{Error, Result};
pub use protocol::{ClientKind, Inbound, Message};
