//! Wire encoding for stream events.
//!
//! Each event becomes one self-delimited Server-Sent-Events frame:
//!
//! ```text
//! event: message
//! data: {"type":"message","payload":[...],"timestamp":"2026-01-02T03:04:05Z"}
//!
//! ```
//!
//! The `data` line is compact JSON. JSON string escaping turns any newline in
//! record content into `\n`, so a frame can never contain the blank-line
//! delimiter before its end.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::{ChangedRecord, CloseReason, SessionId, StreamEvent};

/// Frame delimiter (blank line).
pub const FRAME_DELIMITER: &str = "\n\n";

/// Error produced while encoding or decoding a frame.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    /// Payload could not be serialized.
    #[error("failed to serialize event: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Encoded data would break framing.
    #[error("encoded event contains a line break")]
    Framing,

    /// A frame did not have the expected `event:`/`data:` shape.
    #[error("malformed frame: {0}")]
    Malformed(String),
}

#[derive(Serialize)]
struct Envelope<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<Payload<'a>>,
    timestamp: DateTime<Utc>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Payload<'a> {
    Items(&'a [ChangedRecord]),
    Connected { session_id: SessionId },
    Closing { reason: CloseReason },
}

/// Encode an event into one wire frame.
pub fn encode(event: &StreamEvent) -> Result<Bytes, EncodeError> {
    let kind = event.event_type();
    let payload = match event {
        StreamEvent::Connected { session_id, .. } => Some(Payload::Connected {
            session_id: *session_id,
        }),
        StreamEvent::Change(change) => Some(Payload::Items(&change.items)),
        StreamEvent::Heartbeat { .. } => None,
        StreamEvent::Closing { reason, .. } => Some(Payload::Closing { reason: *reason }),
    };

    let envelope = Envelope {
        kind,
        payload,
        timestamp: event.emitted_at(),
    };
    let json = serde_json::to_string(&envelope)?;
    if json.contains(['\n', '\r']) {
        return Err(EncodeError::Framing);
    }

    let mut frame = String::with_capacity(json.len() + kind.len() + 16);
    frame.push_str("event: ");
    frame.push_str(kind);
    frame.push('\n');
    frame.push_str("data: ");
    frame.push_str(&json);
    frame.push_str(FRAME_DELIMITER);

    Ok(Bytes::from(frame))
}

/// A frame parsed back from the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    /// Value of the `event:` line.
    pub event: String,
    /// Parsed JSON envelope from the `data:` line.
    pub envelope: serde_json::Value,
}

impl DecodedFrame {
    /// The envelope's `type` field.
    pub fn kind(&self) -> Option<&str> {
        self.envelope.get("type").and_then(|v| v.as_str())
    }

    /// The envelope's `payload` field.
    pub fn payload(&self) -> Option<&serde_json::Value> {
        self.envelope.get("payload")
    }
}

/// Decode a single frame (with or without its trailing delimiter).
pub fn decode_frame(frame: &str) -> Result<DecodedFrame, EncodeError> {
    let mut event = None;
    let mut data = None;

    for line in frame.trim_end_matches('\n').lines() {
        if let Some(rest) = line.strip_prefix("event: ") {
            event = Some(rest.to_string());
        } else if let Some(rest) = line.strip_prefix("data: ") {
            data = Some(rest);
        }
    }

    let event = event.ok_or_else(|| EncodeError::Malformed("missing event line".to_string()))?;
    let data = data.ok_or_else(|| EncodeError::Malformed("missing data line".to_string()))?;
    let envelope = serde_json::from_str(data)?;

    Ok(DecodedFrame { event, envelope })
}

/// Split a buffered byte stream into complete frames.
///
/// Returns the decoded frames and the number of bytes consumed; any trailing
/// partial frame is left for the next call.
pub fn decode_frames(buffer: &str) -> Result<(Vec<DecodedFrame>, usize), EncodeError> {
    let mut frames = Vec::new();
    let mut consumed = 0;

    while let Some(end) = buffer[consumed..].find(FRAME_DELIMITER) {
        let frame = &buffer[consumed..consumed + end];
        frames.push(decode_frame(frame)?);
        consumed += end + FRAME_DELIMITER.len();
    }

    Ok((frames, consumed))
}
