//! HTTP and WebSocket handlers for Beacon server.
//!
//! The WebSocket endpoint upgrades the request and hands the socket to a
//! [`ConnectionLifecycle`]; everything after the upgrade lives in the core.

use crate::config::Config;
use crate::metrics;
use anyhow::{Context, Result};
use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tenvis_beacon_core::{ConnectionLifecycle, LifecycleConfig, MessageRouter};
use tenvis_beacon_transport::WebSocketConnection;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// Shared server state.
pub struct AppState {
    /// The message router.
    pub router: Arc<MessageRouter>,
    /// Server configuration.
    pub config: Config,
    lifecycle: LifecycleConfig,
}

impl AppState {
    /// Create new app state.
    ///
    /// # Errors
    ///
    /// Returns an error if the room or identity settings are invalid.
    pub fn new(config: Config) -> Result<Self> {
        let router = MessageRouter::with_config(config.router_config()?);
        let lifecycle = config.lifecycle_config()?;

        Ok(Self {
            router: Arc::new(router),
            config,
            lifecycle,
        })
    }
}

/// Build the HTTP router.
pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Serve the app on an already-bound listener until shutdown.
///
/// # Errors
///
/// Returns an error if the server fails while accepting connections.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    let app = build_app(state);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    Ok(())
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone())?);

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {:#}", e);
        }
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Beacon server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    serve(listener, state).await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.router.rooms().stats();
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "rooms": stats.room_count,
        "connections": stats.connection_count,
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| async move {
            debug!(remote = %addr, "WebSocket upgraded");
            let connection = WebSocketConnection::new(socket, Some(addr));
            let lifecycle = ConnectionLifecycle::new(
                connection,
                Arc::clone(&state.router),
                state.lifecycle.clone(),
            );
            let summary = lifecycle.run().await;
            debug!(
                remote = %addr,
                connection = %summary.connection_id,
                reason = ?summary.reason,
                "WebSocket finished"
            );
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_protocol::Message;
    use futures_util::{SinkExt, StreamExt};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    async fn start() -> (SocketAddr, Arc<AppState>) {
        let mut config = Config::default();
        config.metrics.enabled = false;
        let state = Arc::new(AppState::new(config).unwrap());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, Arc::clone(&state)));
        (addr, state)
    }

    async fn connect(addr: SocketAddr) -> Client {
        let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", addr))
            .await
            .unwrap();
        ws
    }

    async fn send(ws: &mut Client, message: &Message) {
        let text = serde_json::to_string(message).unwrap();
        ws.send(WsMessage::Text(text)).await.unwrap();
    }

    async fn recv(ws: &mut Client) -> Message {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(2), ws.next())
                .await
                .expect("timed out")
                .expect("stream ended")
                .unwrap();
            match frame {
                WsMessage::Text(text) => return serde_json::from_str(&text).unwrap(),
                WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
                other => panic!("unexpected frame: {:?}", other),
            }
        }
    }

    async fn init(ws: &mut Client, seed: &str) -> String {
        send(ws, &Message::init(seed)).await;
        recv(ws).await.client_id.unwrap()
    }

    #[tokio::test]
    async fn test_websocket_relay() {
        let (addr, state) = start().await;
        let mut a = connect(addr).await;
        let mut b = connect(addr).await;

        let id_a = init(&mut a, "alice").await;
        let id_b = init(&mut b, "bob").await;
        assert_eq!(id_a.len(), 9);

        send(&mut a, &Message::join("call")).await;
        assert_eq!(recv(&mut a).await.client_ids, Some(vec![id_a.clone()]));
        send(&mut b, &Message::join("call")).await;
        assert_eq!(recv(&mut b).await.client_ids.map(|ids| ids.len()), Some(2));

        let offer = Message::room("call", serde_json::json!({"sdp": "v=0"}));
        send(&mut a, &offer).await;
        assert_eq!(recv(&mut b).await, offer);

        let answer = Message::private(id_a.as_str(), "answer");
        send(&mut b, &answer).await;
        assert_eq!(recv(&mut a).await, answer);

        a.close(None).await.unwrap();
        let rooms = state.router.rooms();
        for _ in 0..100 {
            if rooms.member_count("call") == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(
            rooms
                .members_of("call")
                .into_iter()
                .map(|id| id.into_string())
                .collect::<Vec<_>>(),
            vec![id_b]
        );
    }

    #[tokio::test]
    async fn test_binary_frames_are_json() {
        let (addr, _state) = start().await;
        let mut ws = connect(addr).await;

        let data = serde_json::to_vec(&Message::init("abc")).unwrap();
        ws.send(WsMessage::Binary(data)).await.unwrap();

        let response = recv(&mut ws).await;
        assert!(response.client_id.is_some());
    }

    #[tokio::test]
    async fn test_health() {
        let (addr, _state) = start().await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();

        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("\"status\":\"ok\""));
        assert!(response.contains("\"rooms\":0"));
    }
}
