//! Stream Codec Module
//!
//! Decoding of inbound upstream text frames and encoding of outbound
//! requests.
//!
//! - **Streaming API**: JSON objects routed by `destination`
//! - **Bridge**: JSON objects routed by `type`; only `tick` carries prices

use serde::Serialize;
use serde_json::Value;

use super::messages::{
    DESTINATION_PING, DESTINATION_QUOTE, DESTINATION_SUBSCRIBE, Envelope, QuotePayload,
    StreamMessage, SubscribeAck, SubscribePayload,
};
use crate::domain::quote::RawTick;

/// Bridge message type carrying a price update.
pub const BRIDGE_TICK_TYPE: &str = "tick";

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// A required field was absent.
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// Invalid message format.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

/// Decode one text frame from the streaming API.
///
/// # Errors
///
/// Returns `CodecError` if the frame is not a JSON object, has no
/// `destination`, or a quote has no `payload`.
pub fn decode_stream(text: &str) -> Result<StreamMessage, CodecError> {
    let trimmed = text.trim();
    if !trimmed.starts_with('{') {
        return Err(CodecError::InvalidFormat(format!(
            "expected JSON object, got: {}",
            preview(trimmed)
        )));
    }

    let envelope: Envelope = serde_json::from_str(trimmed)?;
    let destination = envelope
        .destination
        .ok_or(CodecError::MissingField("destination"))?;

    match destination.as_str() {
        DESTINATION_QUOTE => {
            let payload = envelope
                .payload
                .ok_or(CodecError::MissingField("payload"))?;
            let quote: QuotePayload = serde_json::from_value(payload)?;
            Ok(StreamMessage::Quote(quote))
        }
        DESTINATION_SUBSCRIBE => {
            let payload = match envelope.payload {
                Some(value) if !value.is_null() => serde_json::from_value(value)?,
                _ => SubscribePayload::default(),
            };
            Ok(StreamMessage::Subscribe(SubscribeAck {
                status: envelope.status,
                payload,
            }))
        }
        DESTINATION_PING => Ok(StreamMessage::Ping),
        _ => Ok(StreamMessage::Other(destination)),
    }
}

/// Decode one text frame pushed by a bridge client.
///
/// Returns `Ok(None)` for well-formed messages that are not ticks.
///
/// # Errors
///
/// Returns `CodecError` if the frame is not a JSON object.
pub fn decode_bridge(text: &str) -> Result<Option<RawTick>, CodecError> {
    let value: Value = serde_json::from_str(text.trim())?;
    let Some(object) = value.as_object() else {
        return Err(CodecError::InvalidFormat(format!(
            "expected JSON object, got: {}",
            preview(text.trim())
        )));
    };

    if object.get("type").and_then(Value::as_str) != Some(BRIDGE_TICK_TYPE) {
        return Ok(None);
    }

    let tick: RawTick = serde_json::from_value(value)?;
    Ok(Some(tick))
}

/// Encode an outbound request as a text frame.
///
/// # Errors
///
/// Returns `CodecError::Json` if serialization fails.
pub fn encode<T: Serialize>(message: &T) -> Result<String, CodecError> {
    Ok(serde_json::to_string(message)?)
}

fn preview(text: &str) -> &str {
    let end = text
        .char_indices()
        .nth(50)
        .map_or(text.len(), |(index, _)| index);
    &text[..end]
}
