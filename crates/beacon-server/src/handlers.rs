//! Connection handlers for the Beacon server.
//!
//! Clients connect with a WebSocket upgrade on `{path_prefix}/{app_key}`.
//! Each socket gets a write pump task draining its outbound queue while the
//! read loop hands text frames to the broker.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, Path, State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use beacon_core::{ApplicationRegistry, Broker};
use beacon_transport::{websocket, QueuedSocket};
use futures_util::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

const STATS_INTERVAL: Duration = Duration::from_secs(5);

/// Shared server state.
pub struct AppState {
    /// The broker.
    pub broker: Broker,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config, registry: ApplicationRegistry) -> Self {
        Self {
            broker: Broker::new(Arc::new(registry), config.broker()),
            config,
        }
    }
}

/// Build the HTTP router.
pub fn router(state: Arc<AppState>) -> Router {
    let ws_path = format!("{}/:app_key", state.config.transport.path_prefix.trim_end_matches('/'));

    Router::new()
        .route(&ws_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config, registry: ApplicationRegistry) -> Result<()> {
    let addr = config.bind_addr()?;
    let state = Arc::new(AppState::new(config.clone(), registry));

    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {:#}", e);
        }
        tokio::spawn(publish_stats(Arc::clone(&state)));
    }

    let app = router(state);
    let listener = TcpListener::bind(addr).await?;

    info!("Beacon server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}/{{app_key}}",
        addr, config.transport.path_prefix
    );

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}

async fn publish_stats(state: Arc<AppState>) {
    let mut ticker = tokio::time::interval(STATS_INTERVAL);
    loop {
        ticker.tick().await;
        metrics::record_stats(&state.broker.channels().stats());
    }
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(app_key): Path<String>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.max_message_size(state.config.transport.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, app_key, remote, state))
}

/// Handle a WebSocket connection from upgrade to close.
async fn handle_websocket(socket: WebSocket, app_key: String, remote: SocketAddr, state: Arc<AppState>) {
    let (sink, mut stream) = socket.split();
    let (queued, queue) = QueuedSocket::channel();
    let writer = tokio::spawn(websocket::pump(queue, sink));

    let connection = match state
        .broker
        .open(queued.with_remote_addr(remote.to_string()), &app_key)
    {
        Ok(connection) => connection,
        Err(e) => {
            metrics::record_refused(e.kind());
            // The broker queued the error and the close frame.
            let _ = writer.await;
            return;
        }
    };
    let _metrics_guard = ConnectionMetricsGuard::new();

    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let start = Instant::now();
                metrics::record_inbound(text.len());

                if let Err(e) = state.broker.handle_message(&connection, &text) {
                    metrics::record_error(e.kind());
                }

                metrics::record_latency(start.elapsed().as_secs_f64());
            }
            Ok(Message::Binary(data)) => {
                debug!(socket = %connection, bytes = data.len(), "Ignoring binary frame");
            }
            Ok(Message::Ping(_) | Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                debug!(socket = %connection, "Received close frame");
                break;
            }
            Err(e) => {
                warn!(socket = %connection, error = %e, "WebSocket error");
                metrics::record_error("websocket");
                break;
            }
        }
    }

    state.broker.close(&connection);
    connection.close();

    match writer.await {
        Ok(written) => metrics::record_outbound(written),
        Err(e) => warn!(socket = %connection, error = %e, "Write pump failed"),
    }
}
