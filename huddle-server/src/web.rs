//! WebSocket transport and health endpoint.
//!
//! `/socket` upgrades to a WebSocket carrying one JSON event per text frame.
//! The socket task only translates frames; every decision is made by the
//! dispatcher.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::broadcast::Frame;
use crate::config::ServerConfig;
use crate::dispatcher::ChatHandle;
use crate::error::ProtocolError;
use crate::protocol::ClientEvent;
use crate::registry::ConnectionId;

/// A socket that cannot take a frame within this long is treated as gone.
const WS_SEND_TIMEOUT: Duration = Duration::from_secs(30);

pub struct AppState {
    pub chat: ChatHandle,
    pub config: ServerConfig,
    /// Open sockets per client address.
    ip_connections: Mutex<HashMap<IpAddr, u32>>,
    started: Instant,
}

impl AppState {
    pub fn new(chat: ChatHandle, config: ServerConfig) -> Self {
        Self {
            chat,
            config,
            ip_connections: Mutex::new(HashMap::new()),
            started: Instant::now(),
        }
    }

    /// Reserve a socket slot for `ip`, or `None` when it is at the limit.
    fn acquire_slot(self: &Arc<Self>, ip: IpAddr) -> Option<IpSlot> {
        let mut conns = self.ip_connections.lock();
        let count = conns.entry(ip).or_insert(0);
        if *count >= self.config.max_connections_per_ip {
            return None;
        }
        *count += 1;
        Some(IpSlot {
            state: Arc::clone(self),
            ip,
        })
    }
}

/// Releases its per-address slot on drop.
struct IpSlot {
    state: Arc<AppState>,
    ip: IpAddr,
}

impl Drop for IpSlot {
    fn drop(&mut self) {
        let mut conns = self.state.ip_connections.lock();
        if let Some(count) = conns.get_mut(&self.ip) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                conns.remove(&self.ip);
            }
        }
    }
}

// ── Axum router ────────────────────────────────────────────────────────

pub fn router(state: Arc<AppState>) -> Router {
    let mut app = Router::new()
        .route("/socket", get(ws_upgrade))
        .route("/api/v1/health", get(api_health));

    if let Some(ref web_dir) = state.config.web_static_dir {
        let dir = std::path::PathBuf::from(web_dir);
        if dir.exists() {
            tracing::info!("Serving web client from {}", dir.display());
            let serve = tower_http::services::ServeDir::new(&dir)
                .append_index_html_on_directories(true)
                .fallback(tower_http::services::ServeFile::new(dir.join("index.html")));
            app = app.fallback_service(serve);
        } else {
            tracing::warn!("Web static dir not found: {}", dir.display());
        }
    }

    app.with_state(state)
}

/// The client's address: the socket peer, or the first `X-Forwarded-For`
/// hop when the proxy is trusted and the header parses.
pub fn client_address(headers: &HeaderMap, peer: SocketAddr, trust_forwarded_for: bool) -> IpAddr {
    if trust_forwarded_for
        && let Some(ip) = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|first| first.trim().parse().ok())
    {
        return ip;
    }
    peer.ip()
}

// ── WebSocket handler ──────────────────────────────────────────────────

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    let ip = client_address(&headers, peer, state.config.trust_forwarded_for);
    let Some(slot) = state.acquire_slot(ip) else {
        tracing::warn!(%ip, "WebSocket connection rejected: per-IP limit reached");
        return StatusCode::TOO_MANY_REQUESTS.into_response();
    };
    ws.max_message_size(state.config.max_frame_bytes())
        .on_upgrade(move |socket| handle_ws(socket, state, ip, slot))
        .into_response()
}

async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>, ip: IpAddr, _slot: IpSlot) {
    let id = ConnectionId::next();
    let (tx, mut rx) = mpsc::channel::<Frame>(state.config.outbound_queue);
    tracing::info!(conn = %id, %ip, "New connection (websocket)");
    state.chat.connect(id, ip, tx).await;

    loop {
        tokio::select! {
            // Dispatcher → client. `None` means the server closed this connection.
            frame = rx.recv() => {
                let Some(frame) = frame else { break };
                let text: &str = &frame;
                match tokio::time::timeout(WS_SEND_TIMEOUT, socket.send(WsMessage::Text(text.into()))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) | Err(_) => {
                        tracing::debug!(conn = %id, "WebSocket send failed or timed out");
                        break;
                    }
                }
            }
            // Client → dispatcher.
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => match ClientEvent::decode(text.as_str()) {
                        Ok(event) => state.chat.client_event(id, event).await,
                        Err(e) => tracing::debug!(conn = %id, "ignoring frame: {e}"),
                    },
                    Some(Ok(WsMessage::Binary(_))) => {
                        tracing::debug!(conn = %id, "ignoring frame: {}", ProtocolError::Binary);
                    }
                    Some(Ok(WsMessage::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => {} // Ping/Pong handled by axum
                }
            }
        }
    }

    state.chat.disconnect(id).await;
    let _ = socket.send(WsMessage::Close(None)).await;
}

// ── REST ───────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct HealthResponse {
    online: usize,
    history: usize,
    banned: usize,
    uptime_secs: u64,
}

async fn api_health(State(state): State<Arc<AppState>>) -> Response {
    match state.chat.stats().await {
        Some(stats) => Json(HealthResponse {
            online: stats.online,
            history: stats.history,
            banned: stats.banned,
            uptime_secs: state.started.elapsed().as_secs(),
        })
        .into_response(),
        None => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}
