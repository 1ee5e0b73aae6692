//! Synchronization module for last-write-wins real-time collaboration.
//!
//! This module implements the core synchronization logic for a single shared
//! plain-text document. It provides:
//! - The authoritative document buffer and its version counter
//! - A registry of live connections
//! - Sliding-window rate limiting per connection and channel
//! - The engine that ties them together and fans changes out to peers
//! - The JSON wire protocol spoken over the WebSocket

pub mod document;
pub mod engine;
pub mod protocol;
pub mod rate_limit;
pub mod registry;

pub use document::{DocumentState, Operation};
pub use engine::{EngineConfig, EngineStats, SyncEngine};
pub use rate_limit::{ChannelLimit, RateLimitConfig, RateLimiter};
pub use registry::{ConnectionRecord, ConnectionRegistry};

use serde::{Deserialize, Serialize};

/// Unique identifier for a live connection
pub type ConnectionId = String;

/// Result type for sync operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Category of client event with its own rate budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Channel {
    /// Full-content replacement (`textChange`)
    Edit,
    /// Cursor position updates (`cursorChange`)
    Cursor,
    /// Positional insert/delete (`operation`)
    Operation,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Edit, Channel::Cursor, Channel::Operation];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Edit => "edit",
            Channel::Cursor => "cursor",
            Channel::Operation => "operation",
        }
    }

    /// Rate limiter key for this channel of a connection
    pub fn key(&self, connection_id: &str) -> String {
        format!("{}:{}", connection_id, self.as_str())
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur during synchronization
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// Sender exceeded its budget on a channel
    #[error("Rate limit exceeded on {0} channel")]
    RateLimitExceeded(Channel),

    /// Malformed `operation` payload
    #[error("Invalid operation format: {0}")]
    InvalidOperation(String),

    /// Frame could not be decoded as any known event
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Registry already holds this connection id
    #[error("Duplicate connection: {0}")]
    DuplicateConnection(ConnectionId),

    /// Outbound queue of a connection is gone
    #[error("Connection closed: {0}")]
    ConnectionClosed(ConnectionId),
}
