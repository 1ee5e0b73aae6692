//! SyncEngine implementation for the shared document.
//!
//! The engine owns the document, the connection registry and the outbound
//! queue of every connection. These live behind a single mutex so each
//! inbound event is processed to completion before the next one starts:
//! rate check, mutation, registry touch and broadcast. Because broadcasts are
//! queued while the lock is held, every peer observes mutations in the order
//! they were applied.
//!
//! Concurrent edits are resolved by last-write-wins. Nothing is merged and no
//! operation log is kept, so a client that missed updates asks for a fresh
//! snapshot with `requestSync`.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use super::document::DocumentState;
use super::protocol::{
    parse_operation, ClientMessage, CursorBroadcast, OperationBroadcast, ProtocolError,
    ServerMessage, Snapshot, SyncProtocol, TextChangeBroadcast,
};
use super::rate_limit::{ChannelLimit, RateLimitConfig, RateLimiter};
use super::registry::{ConnectionRecord, ConnectionRegistry};
use super::{Channel, ConnectionId, SyncError, SyncResult};

/// Outbound queue of a single connection
pub type Outbox = mpsc::UnboundedSender<ServerMessage>;

/// Configuration for the SyncEngine
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Per-channel budgets and sweep policy
    pub rate_limits: RateLimitConfig,
}

impl EngineConfig {
    pub fn with_rate_limits(mut self, rate_limits: RateLimitConfig) -> Self {
        self.rate_limits = rate_limits;
        self
    }
}

/// State mutated under the engine lock
#[derive(Default)]
struct EngineState {
    document: DocumentState,
    registry: ConnectionRegistry,
    outboxes: HashMap<ConnectionId, Outbox>,
}

impl EngineState {
    fn snapshot(&self, connection_id: &str) -> ServerMessage {
        let (content, version) = self.document.read();
        ServerMessage::Init(Snapshot {
            content: content.to_string(),
            version,
            connection_id: connection_id.to_string(),
        })
    }

    /// Queue a message for one connection
    fn send_to(&self, connection_id: &str, msg: ServerMessage) -> SyncResult<()> {
        self.outboxes
            .get(connection_id)
            .ok_or_else(|| SyncError::ConnectionClosed(connection_id.to_string()))?
            .send(msg)
            .map_err(|_| SyncError::ConnectionClosed(connection_id.to_string()))
    }

    /// Queue a message for every connection except `exclude`.
    ///
    /// A dead queue is logged and skipped; delivery to the others continues.
    fn broadcast(&self, exclude: Option<&str>, msg: ServerMessage) {
        for (connection_id, outbox) in &self.outboxes {
            if Some(connection_id.as_str()) == exclude {
                continue;
            }
            if outbox.send(msg.clone()).is_err() {
                warn!(
                    "Broadcast skipped: {}",
                    SyncError::ConnectionClosed(connection_id.clone())
                );
            }
        }
    }
}

/// The synchronization engine
pub struct SyncEngine {
    /// Engine configuration
    config: EngineConfig,
    /// Document, registry and outbound queues
    state: Mutex<EngineState>,
    /// Sliding-window limiter shared by all channels
    limiter: RateLimiter,
    /// Engine start time
    started_at: Instant,
    /// Shutdown signal
    shutdown_tx: broadcast::Sender<()>,
}

impl SyncEngine {
    /// Create a new engine with an empty document
    pub fn new(config: EngineConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            state: Mutex::new(EngineState::default()),
            limiter: RateLimiter::new(),
            started_at: Instant::now(),
            shutdown_tx,
        }
    }

    /// Create with default configuration
    pub fn with_defaults() -> Self {
        Self::new(EngineConfig::default())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Get a shutdown receiver
    pub fn shutdown_receiver(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Initiate graceful shutdown of background tasks
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    // =========================================================================
    // Connection lifecycle
    // =========================================================================

    /// Register a connection under a freshly generated id
    pub fn connect(&self, outbox: Outbox) -> SyncResult<ConnectionId> {
        let connection_id = uuid::Uuid::new_v4().to_string();
        self.connect_with_id(&connection_id, outbox)?;
        Ok(connection_id)
    }

    /// Register a connection, send it a snapshot and announce the new count
    pub fn connect_with_id(&self, connection_id: &str, outbox: Outbox) -> SyncResult<()> {
        let mut state = self.state.lock();

        state.registry.on_connect(connection_id)?;
        state.outboxes.insert(connection_id.to_string(), outbox);

        let snapshot = state.snapshot(connection_id);
        if let Err(e) = state.send_to(connection_id, snapshot) {
            warn!("Failed to send snapshot: {}", e);
        }

        let count = state.registry.count();
        state.broadcast(None, ServerMessage::UserCount(count));

        info!("Connection registered: {} ({} online)", connection_id, count);
        Ok(())
    }

    /// Remove a connection and notify the remaining peers.
    ///
    /// Returns `false` if the connection was already gone.
    pub fn disconnect(&self, connection_id: &str, reason: &str) -> bool {
        let mut state = self.state.lock();

        state.outboxes.remove(connection_id);
        self.limiter.purge_connection(connection_id);

        let Some(record) = state.registry.on_disconnect(connection_id) else {
            debug!("Disconnect for unknown connection {} ignored", connection_id);
            return false;
        };

        let count = state.registry.count();
        state.broadcast(None, ServerMessage::UserCount(count));
        state.broadcast(None, ServerMessage::PeerLeft(connection_id.to_string()));

        info!(
            "Connection closed: {} ({}), connected since {}, {} online",
            connection_id, reason, record.connected_at, count
        );
        true
    }

    // =========================================================================
    // Inbound events
    // =========================================================================

    /// Dispatch a decoded client message.
    ///
    /// Rejections are reported to the sender only.
    pub fn handle_message(&self, sender: &str, msg: ClientMessage) {
        let result = match msg {
            ClientMessage::TextChange { content } => self.text_change(sender, content).map(drop),
            ClientMessage::CursorChange { position } => {
                self.cursor_change(sender, position);
                Ok(())
            }
            ClientMessage::Operation(raw) => self.operation(sender, &raw).map(drop),
            ClientMessage::RequestSync => self.request_sync(sender),
            ClientMessage::Ping => self.ping(sender),
        };

        if let Err(err) = result {
            self.reject(sender, &err);
        }
    }

    /// Answer a frame that could not be decoded
    pub fn handle_malformed(&self, sender: &str, err: &ProtocolError) {
        self.reject(sender, &SyncError::InvalidMessage(err.to_string()));
    }

    /// Replace the whole document and relay it to every other peer
    pub fn text_change(&self, sender: &str, content: String) -> SyncResult<u64> {
        self.check_rate(sender, Channel::Edit)?;

        let mut state = self.state.lock();
        let version = state.document.replace(content.as_str());
        state.registry.touch(sender);

        state.broadcast(
            Some(sender),
            ServerMessage::TextChange(TextChangeBroadcast {
                content,
                version,
                sender_id: sender.to_string(),
            }),
        );

        debug!("Text change from {} -> version {}", sender, version);
        Ok(version)
    }

    /// Validate and apply a positional operation, then relay it
    pub fn operation(&self, sender: &str, raw: &Value) -> SyncResult<u64> {
        self.check_rate(sender, Channel::Operation)?;
        let op = parse_operation(raw)?;

        let mut state = self.state.lock();
        let version = state.document.apply(&op);
        state.registry.touch(sender);

        state.broadcast(
            Some(sender),
            ServerMessage::Operation(OperationBroadcast {
                op,
                version,
                sender_id: sender.to_string(),
            }),
        );

        debug!("Operation from {} -> version {}", sender, version);
        Ok(version)
    }

    /// Relay a cursor position. Over-budget updates are dropped silently.
    ///
    /// Returns whether the update was broadcast.
    pub fn cursor_change(&self, sender: &str, position: i64) -> bool {
        if self.check_rate(sender, Channel::Cursor).is_err() {
            debug!("Dropping cursor update from {}", sender);
            return false;
        }

        let state = self.state.lock();
        state.broadcast(
            Some(sender),
            ServerMessage::CursorChange(CursorBroadcast::new(position, sender)),
        );
        true
    }

    /// Send the requester a fresh snapshot
    pub fn request_sync(&self, sender: &str) -> SyncResult<()> {
        let state = self.state.lock();
        let snapshot = state.snapshot(sender);
        state.send_to(sender, snapshot)
    }

    /// Liveness probe
    pub fn ping(&self, sender: &str) -> SyncResult<()> {
        self.state.lock().send_to(sender, ServerMessage::Pong)
    }

    fn check_rate(&self, sender: &str, channel: Channel) -> SyncResult<()> {
        let ChannelLimit { limit, window } = self.config.rate_limits.limit_for(channel);

        if self.limiter.admit(&channel.key(sender), limit, window) {
            Ok(())
        } else {
            Err(SyncError::RateLimitExceeded(channel))
        }
    }

    fn reject(&self, sender: &str, err: &SyncError) {
        warn!("Rejected event from {}: {}", sender, err);
        if let Err(e) = self
            .state
            .lock()
            .send_to(sender, SyncProtocol::error_response(err))
        {
            debug!("Error reply not delivered: {}", e);
        }
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Current content and version
    pub fn document(&self) -> (String, u64) {
        let state = self.state.lock();
        let (content, version) = state.document.read();
        (content.to_string(), version)
    }

    pub fn user_count(&self) -> usize {
        self.state.lock().registry.count()
    }

    pub fn connection(&self, connection_id: &str) -> Option<ConnectionRecord> {
        self.state.lock().registry.get(connection_id)
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Get engine statistics
    pub fn stats(&self) -> EngineStats {
        let state = self.state.lock();
        EngineStats {
            user_count: state.registry.count(),
            document_length: state.document.len(),
            version: state.document.version(),
            uptime_seconds: self.started_at.elapsed().as_secs(),
        }
    }

    // =========================================================================
    // Background tasks
    // =========================================================================

    /// Start the rate limiter sweep
    pub fn start_background_tasks(self: Arc<Self>) -> BackgroundTaskHandles {
        let engine = self.clone();
        let sweep_interval = engine.config.rate_limits.sweep_interval;
        let retention = engine.config.rate_limits.retention;

        let sweep_handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweep_interval);
            let mut shutdown = engine.shutdown_receiver();

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        engine.sweep(retention);
                    }
                    _ = shutdown.recv() => {
                        info!("Rate limiter sweep shutting down");
                        break;
                    }
                }
            }
        });

        BackgroundTaskHandles {
            sweep_task: sweep_handle,
        }
    }

    /// Drop idle rate limiter keys
    pub fn sweep(&self, retention: Duration) -> usize {
        let removed = self.limiter.sweep(retention);
        debug!(
            "Rate limiter sweep: {} removed, {} tracked",
            removed,
            self.limiter.len()
        );
        removed
    }
}

/// Engine statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStats {
    pub user_count: usize,
    pub document_length: usize,
    pub version: u64,
    pub uptime_seconds: u64,
}

/// Handles for background tasks
pub struct BackgroundTaskHandles {
    pub sweep_task: tokio::task::JoinHandle<()>,
}

impl BackgroundTaskHandles {
    /// Wait for all tasks to complete
    pub async fn wait(self) {
        let _ = self.sweep_task.await;
    }
}
