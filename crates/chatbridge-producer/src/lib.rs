//! chatbridge Producer Library
//!
//! Producer side of the relay protocol. [`client::ProducerClient`] keeps a
//! connection to the relay alive, and every query it receives is answered by
//! a [`driver::ResponseProducer`] under a stall watchdog.

pub mod client;
pub mod config;
pub mod driver;
pub mod echo;
pub mod error;
