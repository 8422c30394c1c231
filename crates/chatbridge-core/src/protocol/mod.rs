//! Wire protocol shared by the relay, the response producer and CLI consumers.
//!
//! Every frame is one JSON object with a `type` tag. Decoding follows a
//! tolerant reader pattern: unknown fields are ignored and unknown types are
//! surfaced as [`Inbound::Unknown`] instead of failing.

mod codec;
mod types;

pub use codec::{decode, encode};
pub use types::*;
