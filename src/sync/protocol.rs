//! JSON WebSocket protocol for document synchronization.
//!
//! Every frame is a text message shaped as `{"event": <name>, "data": <payload>}`.
//! Events without a payload omit `data`. Event names are camelCase to match
//! the browser client.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::document::Operation;
use super::registry::short_name;
use super::{Channel, ConnectionId, SyncError};

/// Maximum frame size (16MB)
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Protocol errors
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Message too large: {0} bytes (max: {1})")]
    MessageTooLarge(usize, usize),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Replace the whole document
    TextChange { content: String },

    /// Local cursor moved
    CursorChange { position: i64 },

    /// Positional edit, validated by the engine after rate limiting
    Operation(Value),

    /// Ask for a fresh snapshot
    RequestSync,

    /// Keepalive
    Ping,
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Full snapshot for a connecting or resyncing client
    Init(Snapshot),

    /// Whole-document replacement by another peer
    TextChange(TextChangeBroadcast),

    /// Positional edit by another peer
    Operation(OperationBroadcast),

    /// Cursor position of another peer
    CursorChange(CursorBroadcast),

    /// Number of live connections
    UserCount(usize),

    /// A peer disconnected
    PeerLeft(ConnectionId),

    /// Request rejected
    Error(ErrorPayload),

    /// Keepalive response
    Pong,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub content: String,
    pub version: u64,
    pub connection_id: ConnectionId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextChangeBroadcast {
    pub content: String,
    pub version: u64,
    pub sender_id: ConnectionId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationBroadcast {
    #[serde(flatten)]
    pub op: Operation,
    pub version: u64,
    pub sender_id: ConnectionId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorBroadcast {
    pub position: i64,
    pub sender_id: ConnectionId,
    pub sender_name: String,
}

impl CursorBroadcast {
    pub fn new(position: i64, sender_id: &str) -> Self {
        Self {
            position,
            sender_id: sender_id.to_string(),
            sender_name: short_name(sender_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: ErrorCode,
    pub message: String,
}

/// Error codes for server responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCode {
    RateLimited,
    InvalidOperation,
    InvalidMessage,
    ServerError,
}

/// Validate a raw `operation` payload.
///
/// `type` must be `insert` or `delete` and `position` an integer; inserts
/// need a string `content`, deletes an integer `length`.
pub fn parse_operation(raw: &Value) -> Result<Operation, SyncError> {
    let invalid = |reason: &str| SyncError::InvalidOperation(reason.to_string());

    let fields = raw
        .as_object()
        .ok_or_else(|| invalid("payload must be an object"))?;

    let op_type = fields
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid("missing type"))?;

    let position = fields
        .get("position")
        .and_then(Value::as_i64)
        .ok_or_else(|| invalid("position must be an integer"))?;

    match op_type {
        "insert" => {
            let content = fields
                .get("content")
                .and_then(Value::as_str)
                .ok_or_else(|| invalid("insert requires string content"))?;
            Ok(Operation::insert(position, content))
        }
        "delete" => {
            let length = fields
                .get("length")
                .and_then(Value::as_i64)
                .ok_or_else(|| invalid("delete requires integer length"))?;
            Ok(Operation::delete(position, length))
        }
        other => Err(invalid(&format!("unknown type '{}'", other))),
    }
}

/// Protocol codec for encoding/decoding frames
pub struct SyncProtocol;

impl SyncProtocol {
    /// Encode a server message to a text frame
    pub fn encode_server(msg: &ServerMessage) -> Result<String, ProtocolError> {
        check_size(serde_json::to_string(msg)?)
    }

    /// Encode a client message to a text frame
    pub fn encode_client(msg: &ClientMessage) -> Result<String, ProtocolError> {
        check_size(serde_json::to_string(msg)?)
    }

    /// Decode a client message from a text frame
    pub fn decode_client(text: &str) -> Result<ClientMessage, ProtocolError> {
        if text.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge(text.len(), MAX_MESSAGE_SIZE));
        }

        let mut frame: Value = serde_json::from_str(text)?;
        // A payload-less operation still goes through rate limiting and validation
        if let Some(fields) = frame.as_object_mut() {
            if fields.get("event").and_then(Value::as_str) == Some("operation") {
                fields.entry("data").or_insert(Value::Null);
            }
        }
        Ok(serde_json::from_value(frame)?)
    }

    /// Decode a server message from a text frame
    pub fn decode_server(text: &str) -> Result<ServerMessage, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Create the error message sent back to an offending client
    pub fn error_response(err: &SyncError) -> ServerMessage {
        let (code, message) = match err {
            SyncError::RateLimitExceeded(Channel::Operation) => (
                ErrorCode::RateLimited,
                "Operation rate limit exceeded".to_string(),
            ),
            SyncError::RateLimitExceeded(_) => (
                ErrorCode::RateLimited,
                "Rate limit exceeded. Please slow down.".to_string(),
            ),
            SyncError::InvalidOperation(_) => (ErrorCode::InvalidOperation, err.to_string()),
            SyncError::InvalidMessage(_) => (ErrorCode::InvalidMessage, err.to_string()),
            SyncError::DuplicateConnection(_) | SyncError::ConnectionClosed(_) => {
                (ErrorCode::ServerError, err.to_string())
            }
        };

        ServerMessage::Error(ErrorPayload { code, message })
    }
}

fn check_size(frame: String) -> Result<String, ProtocolError> {
    if frame.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge(frame.len(), MAX_MESSAGE_SIZE));
    }
    Ok(frame)
}
