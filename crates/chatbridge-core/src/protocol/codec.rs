//! JSON frame codec for the relay protocol.
//!
//! Implements tolerant reader pattern: unknown fields ignored, unknown types
//! reported as [`Inbound::Unknown`].

use serde_json::Value;

use super::types::{Inbound, Message};
use crate::error::{Error, Result};

/// Decode a single text frame.
pub fn decode(frame: &str) -> Result<Inbound> {
    let raw: Value = serde_json::from_str(frame).map_err(|e| Error::Decode(e.to_string()))?;
    decode_value(raw)
}

/// Decode an already-parsed JSON value.
fn decode_value(raw: Value) -> Result<Inbound> {
    let msg_type = raw
        .as_object()
        .ok_or_else(|| Error::Decode("Expected a JSON object".into()))?
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Decode("Missing 'type' field".into()))?
        .to_string();

    if !Message::KNOWN_TYPES.contains(&msg_type.as_str()) {
        return Ok(Inbound::Unknown { msg_type });
    }

    serde_json::from_value::<Message>(raw)
        .map(Inbound::Known)
        .map_err(|e| Error::Decode(format!("Invalid '{msg_type}' message: {e}")))
}

/// Encode a message into a single text frame.
pub fn encode(msg: &Message) -> Result<String> {
    Ok(serde_json::to_string(msg)?)
}
