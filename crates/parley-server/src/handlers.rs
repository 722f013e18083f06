//! HTTP and WebSocket handlers for the Parley server.

use crate::config::Config;
use crate::metrics;
use crate::storage;
use anyhow::Result;
use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        ConnectInfo, Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use parley_core::{ActiveUsers, Hub, HubConfig, MessageStore, SessionEnd, StoredMessage};
use parley_transport::websocket;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// Shared server state.
pub struct AppState {
    /// The relay hub.
    pub hub: Hub,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create the hub over `store` and spawn its dispatcher.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn new(config: Config, store: Arc<dyn MessageStore>) -> Self {
        let hub_config = HubConfig {
            queue_capacity: config.dispatch.queue_capacity,
        };
        let (hub, _dispatcher) = Hub::start(hub_config, store);

        Self { hub, config }
    }
}

/// Build the application router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .route("/api/users/active", get(active_users_handler))
        .route("/api/chat/history", get(history_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the store cannot be opened or the server fails to
/// start.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let store = storage::open_store(&config.storage)?;
    let addr = config.bind_addr()?;
    let state = Arc::new(AppState::new(config, store));
    let app = build_router(Arc::clone(&state));

    let listener = TcpListener::bind(addr).await?;

    info!("Parley server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, state.config.transport.websocket_path
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": state.hub.stats().connections,
    }))
}

/// Currently identified users.
async fn active_users_handler(State(state): State<Arc<AppState>>) -> Json<ActiveUsers> {
    metrics::record_request("active_users");
    Json(state.hub.active_users())
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    limit: Option<usize>,
}

/// Recent messages, newest first.
async fn history_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<StoredMessage>>, (StatusCode, Json<serde_json::Value>)> {
    metrics::record_request("history");
    let limit = state.config.history.clamp(params.limit);

    state.hub.recent_messages(limit).await.map(Json).map_err(|e| {
        error!(error = %e, "Failed to read chat history");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
    })
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let remote = connect_info.map(|ConnectInfo(addr)| addr);

    // Frames of any size are relayed
    ws.max_message_size(usize::MAX)
        .max_frame_size(usize::MAX)
        .on_upgrade(move |socket| handle_websocket(socket, remote, state))
}

/// Handle a WebSocket connection until it ends.
async fn handle_websocket(socket: WebSocket, remote: Option<SocketAddr>, state: Arc<AppState>) {
    let (sink, source) = websocket::split(socket, remote);
    let session = state.hub.connect(Arc::new(sink));
    let connection_id = session.id();

    debug!(connection = %connection_id, remote = ?remote, "WebSocket connected");

    let end = session.run(source).await;
    metrics::record_session_end(&end);

    match end {
        SessionEnd::Transport(e) => {
            debug!(connection = %connection_id, error = %e, "WebSocket disconnected after error");
        }
        _ => debug!(connection = %connection_id, "WebSocket disconnected"),
    }
}
