//! TextSync Server - real-time collaborative plain-text editing
//!
//! A single shared document kept consistent across WebSocket clients:
//! - Last-write-wins replacement and clamped positional insert/delete
//! - Per-connection, per-channel sliding-window rate limiting
//! - Ordered fan-out of every accepted change to all other peers
//! - Axum HTTP surface with health check and static client files

pub mod app;
pub mod config;
pub mod sync;

pub use app::{router, AppState};
pub use config::{ConfigError, ServerConfig};
pub use sync::{SyncEngine, SyncError, SyncResult};
