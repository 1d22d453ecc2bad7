//! `HubServer`: Axum HTTP + `WebSocket` front end for the broadcast hub.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use hubcast_hub::{BroadcastHub, HubConfig, HubDispatcher, Supervisor};
use metrics_exporter_prometheus::PrometheusHandle;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::errors::{Result, ServerError};
use crate::health::{self, HealthResponse};
use crate::metrics;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::WsTransport;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// The broadcast hub.
    pub hub: Arc<BroadcastHub>,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
    /// Upgrade limit.
    pub max_connections: usize,
    /// Largest accepted inbound message, in bytes.
    pub max_message_size: usize,
    /// When the server started.
    pub start_time: Instant,
}

/// The hubcast server.
pub struct HubServer {
    config: ServerConfig,
    hub: Arc<BroadcastHub>,
    dispatcher: Mutex<Option<HubDispatcher>>,
    metrics: Option<PrometheusHandle>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
}

impl HubServer {
    /// Create a new server. The hub's dispatch loop starts with [`listen`](Self::listen).
    pub fn new(
        config: ServerConfig,
        hub_config: HubConfig,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        let (hub, dispatcher) = BroadcastHub::new(hub_config);
        Self {
            config,
            hub,
            dispatcher: Mutex::new(Some(dispatcher)),
            metrics,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            hub: Arc::clone(&self.hub),
            metrics: self.metrics.clone(),
            max_connections: self.config.max_connections,
            max_message_size: self.config.max_message_size,
            start_time: self.start_time,
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/ws", get(ws_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind the listener and serve until the shutdown coordinator fires.
    ///
    /// Returns the bound address and the serving task. Cancelling the
    /// coordinator stops accepting, shuts the hub down (closing every
    /// connection with reason `shutdown`), then stops the dispatch loop.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>)> {
        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { addr, source })?;

        let token = self.shutdown.token();
        let dispatch = match self.dispatcher.lock().take() {
            Some(dispatcher) => Some(dispatcher.spawn(token.clone())),
            None => {
                warn!("dispatch loop already running");
                None
            }
        };

        let hub = Arc::clone(&self.hub);
        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();
        info!(addr = %local_addr, "hubcast listening");

        let handle = tokio::spawn(async move {
            let signal = {
                let hub = Arc::clone(&hub);
                async move {
                    token.cancelled().await;
                    info!("shutdown requested, closing connections");
                    hub.shutdown();
                }
            };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(signal)
                .await
            {
                error!(error = %e, "server error");
            }
            // Covers a serve error that returned before the signal fired
            hub.shutdown();
            if let Some(dispatch) = dispatch {
                let _ = dispatch.await;
            }
            info!("server stopped");
        });

        Ok((local_addr, handle))
    }

    /// Get the broadcast hub.
    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(state.start_time, &state.hub))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => metrics::render(handle).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// GET /ws
async fn ws_handler(
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    upgrade: WebSocketUpgrade,
) -> Response {
    if state.hub.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }
    let connections = state.hub.connection_count();
    if connections >= state.max_connections {
        warn!(%remote, connections, "connection limit reached");
        return (StatusCode::SERVICE_UNAVAILABLE, "connection limit reached").into_response();
    }

    upgrade
        .max_message_size(state.max_message_size)
        .max_frame_size(state.max_message_size)
        .on_upgrade(move |socket| serve_socket(state.hub, socket, remote))
}

async fn serve_socket(hub: Arc<BroadcastHub>, socket: WebSocket, remote: SocketAddr) {
    let transport = WsTransport::new(socket, remote);
    match Supervisor::attach(&hub, transport) {
        Ok(supervisor) => {
            let reason = supervisor.run().await;
            debug!(%remote, %reason, "websocket session ended");
        }
        Err(e) => warn!(%remote, error = %e, "websocket rejected"),
    }
}
