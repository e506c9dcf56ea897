//! JSON hub protocol framing.
//!
//! Every record is a JSON document terminated by the ASCII record
//! separator `0x1E`. A WebSocket text frame may carry several records.
//!
//! # Message types
//!
//! | type | meaning            | handled as                    |
//! |------|--------------------|-------------------------------|
//! | 1    | invocation         | dispatched by `target`        |
//! | 3    | completion         | ignored                       |
//! | 6    | ping               | keep-alive only               |
//! | 7    | close              | ends the connection           |
//! | *    | streams, acks, ... | ignored                       |

use serde::Deserialize;
use serde_json::{json, Value};

/// Terminator of every protocol record.
pub const RECORD_SEPARATOR: char = '\u{1e}';

const INVOCATION: u8 = 1;
const COMPLETION: u8 = 3;
const PING: u8 = 6;
const CLOSE: u8 = 7;

/// Parsed hub message.
#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    /// Server calls a client method.
    Invocation {
        /// Method name.
        target: String,
        /// Positional arguments.
        arguments: Vec<Value>,
        /// Present when the server expects a completion.
        invocation_id: Option<String>,
    },
    /// Keep-alive.
    Ping,
    /// Server is closing the connection.
    Close {
        /// Reason given by the server, if any.
        error: Option<String>,
        /// Whether the client may reconnect.
        allow_reconnect: bool,
    },
    /// Any other message type.
    Other(u8),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMessage {
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    arguments: Option<Vec<Value>>,
    #[serde(default)]
    invocation_id: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    allow_reconnect: Option<bool>,
}

/// Outcome of the protocol handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeReply {
    /// Empty reply: the hub accepted the protocol.
    Accepted,
    /// The hub refused with a reason.
    Refused(String),
}

/// Handshake request selecting the JSON protocol, version 1.
pub fn handshake_request() -> String {
    frame(&json!({ "protocol": "json", "version": 1 }))
}

/// Client keep-alive ping.
pub fn ping() -> String {
    frame(&json!({ "type": PING }))
}

/// Client-initiated close.
pub fn close() -> String {
    frame(&json!({ "type": CLOSE }))
}

/// Void completion for a server invocation that asked for one.
pub fn completion(invocation_id: &str) -> String {
    frame(&json!({ "type": COMPLETION, "invocationId": invocation_id }))
}

fn frame(value: &Value) -> String {
    format!("{value}{RECORD_SEPARATOR}")
}

/// Split a text frame into its records, dropping empty trailing pieces.
pub fn records(text: &str) -> impl Iterator<Item = &str> {
    text.split(RECORD_SEPARATOR)
        .filter(|record| !record.trim().is_empty())
}

/// Interpret the first record received after the handshake request.
pub fn parse_handshake(record: &str) -> HandshakeReply {
    match serde_json::from_str::<Value>(record) {
        Ok(value) => match value.get("error").and_then(Value::as_str) {
            Some(error) => HandshakeReply::Refused(error.to_string()),
            None => HandshakeReply::Accepted,
        },
        Err(e) => HandshakeReply::Refused(format!("invalid handshake reply: {e}")),
    }
}

/// Parse one record.
pub fn parse_message(record: &str) -> serde_json::Result<HubMessage> {
    let raw: RawMessage = serde_json::from_str(record)?;
    Ok(match raw.kind {
        INVOCATION => HubMessage::Invocation {
            target: raw.target.unwrap_or_default(),
            arguments: raw.arguments.unwrap_or_default(),
            invocation_id: raw.invocation_id,
        },
        PING => HubMessage::Ping,
        CLOSE => HubMessage::Close {
            error: raw.error,
            allow_reconnect: raw.allow_reconnect.unwrap_or(false),
        },
        other => HubMessage::Other(other),
    })
}
