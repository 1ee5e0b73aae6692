//! HTTP and WebSocket surface.
//!
//! - `GET /ws` (or `/socket`): one WebSocket per collaborator
//! - `GET /health`: liveness and document statistics
//! - everything else: static files for the browser client

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::Method,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::{debug, error, info, warn};

use crate::sync::{
    protocol::{ServerMessage, SyncProtocol},
    EngineConfig, SyncEngine,
};

// ============================================================================
// APPLICATION STATE
// ============================================================================

/// Shared application state
pub struct AppState {
    /// Synchronization engine for the shared document
    pub engine: Arc<SyncEngine>,
}

impl AppState {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            engine: Arc::new(SyncEngine::new(config)),
        }
    }

    pub fn with_engine(engine: Arc<SyncEngine>) -> Self {
        Self { engine }
    }
}

// ============================================================================
// API TYPES
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub user_count: usize,
    pub document_length: usize,
    pub version: u64,
    pub uptime_seconds: u64,
}

// ============================================================================
// ROUTER
// ============================================================================

/// Build the application router
pub fn router(state: Arc<AppState>, public_dir: impl AsRef<Path>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST]);

    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws_handler))
        .route("/socket", get(ws_handler))
        .fallback_service(ServeDir::new(public_dir.as_ref()))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
}

// ============================================================================
// HTTP HANDLERS
// ============================================================================

/// Health check endpoint
async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.engine.stats();

    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        user_count: stats.user_count,
        document_length: stats.document_length,
        version: stats.version,
        uptime_seconds: stats.uptime_seconds,
    })
}

// ============================================================================
// WEBSOCKET HANDLER
// ============================================================================

/// WebSocket upgrade handler
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle WebSocket connection
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Channel for sending messages to this connection
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let connection_id = match state.engine.connect(tx) {
        Ok(id) => id,
        Err(e) => {
            error!("Failed to register connection: {}", e);
            let _ = ws_sender.send(Message::Close(None)).await;
            return;
        }
    };

    info!("New WebSocket connection: {}", connection_id);

    let id_send = connection_id.clone();
    let id_recv = connection_id.clone();
    let engine = state.engine.clone();

    // Task to forward queued messages to the WebSocket
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match SyncProtocol::encode_server(&msg) {
                Ok(text) => {
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Failed to encode message: {}", e);
                }
            }
        }
        debug!("Send task ended for {}", id_send);
    });

    // Task to handle incoming WebSocket messages
    let mut recv_task = tokio::spawn(async move {
        while let Some(frame) = ws_receiver.next().await {
            let text = match frame {
                Ok(Message::Text(text)) => text,
                Ok(Message::Binary(data)) => match String::from_utf8(data) {
                    Ok(text) => text,
                    Err(_) => {
                        warn!("Dropping non UTF-8 binary frame from {}", id_recv);
                        continue;
                    }
                },
                Ok(Message::Close(_)) => return "client closed",
                // Ping/pong frames are answered by the transport
                Ok(_) => continue,
                Err(e) => {
                    warn!("WebSocket error from {}: {}", id_recv, e);
                    return "transport error";
                }
            };

            match SyncProtocol::decode_client(&text) {
                Ok(msg) => engine.handle_message(&id_recv, msg),
                Err(e) => {
                    warn!("Failed to decode message from {}: {}", id_recv, e);
                    engine.handle_malformed(&id_recv, &e);
                }
            }
        }
        "connection dropped"
    });

    // Wait for either task to complete
    let reason = tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
            // An in-flight handler must finish before the connection is purged
            let _ = recv_task.await;
            "send failed"
        }
        result = &mut recv_task => {
            send_task.abort();
            let _ = send_task.await;
            result.unwrap_or("receive task aborted")
        }
    };

    state.engine.disconnect(&connection_id, reason);
}
