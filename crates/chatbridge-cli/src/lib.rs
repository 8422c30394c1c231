//! chatbridge CLI Library
//!
//! Consumer side of the relay protocol: dials the relay, submits one query
//! and streams the answer until a terminal signal arrives.

pub mod connection;
pub mod headless;
pub mod session;
