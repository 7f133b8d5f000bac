//! WebSocket upgrade handler and per-connection socket task.
//!
//! Lifecycle:
//! 1. upgrade request: resolve the source address from forwarding headers,
//!    enforce the per-address connection cap, complete the RFC 6455 upgrade
//!    (axum validates `Sec-WebSocket-Key` and computes the accept hash).
//! 2. socket task: pump outbound frames from the connection's channel into
//!    the sink while routing inbound text/binary frames to the handlers.
//! 3. close: force-close any open post, unsubscribe, release the address slot.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::{
    Json, Router,
    extract::{
        ConnectInfo, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
};
use futures::{SinkExt, StreamExt};
use livechan_proto::{ConfigsPayload, TextType, encode_text};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::client::ClientConnection;
use crate::feed::FeedRegistry;
use crate::handlers::livepost;
use crate::post_store::PostStore;
use crate::spam::SpamScorer;
use crate::unix_now;

/// Path for WebSocket upgrades.
pub const WS_PATH: &str = "/api/socket";

/// Subprotocol echoed back to clients that request it.
pub const SUBPROTOCOL: &str = "livechan-v1";

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Shared state for the gateway handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub registry: Arc<FeedRegistry>,
    pub spam: Arc<SpamScorer>,
    pub post_store: Arc<dyn PostStore>,
    /// Posting limits pushed to every client on connect (type 39).
    pub limits: ConfigsPayload,
}

/// Build the gateway router: health endpoints, metrics and the socket path.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/", get(|| async { "Livechan Gateway" }))
        .route("/health", get(|| async { "OK" }))
        .route("/metrics", get(metrics))
        .route(WS_PATH, get(ws_handler))
        .with_state(state)
}

async fn metrics(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    let stats = state.registry.stats().await;
    Json(json!({
        "feeds": stats.feeds,
        "connections": stats.connections,
        "unique_ips": stats.unique_addrs,
        "spam_tracked_ips": state.spam.tracked_count(),
    }))
}

/// WebSocket upgrade handler.
pub async fn ws_handler(
    State(state): State<GatewayState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let addr = client_addr(&headers, peer.ip());

    // Reject over-cap addresses before completing the protocol handshake.
    if !state.registry.register_address(addr).await {
        return (StatusCode::TOO_MANY_REQUESTS, "Too many connections from this address")
            .into_response();
    }

    ws.protocols([SUBPROTOCOL])
        .on_upgrade(move |socket| handle_socket(socket, state, addr))
        .into_response()
}

/// Resolve the client address from forwarding headers.
///
/// Precedence: CF-Connecting-IP, then X-Real-IP, then the first entry of
/// X-Forwarded-For, falling back to the raw peer address.
fn client_addr(headers: &HeaderMap, peer: IpAddr) -> IpAddr {
    for name in ["cf-connecting-ip", "x-real-ip"] {
        if let Some(ip) = headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
        {
            return ip;
        }
    }
    if let Some(ip) = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse().ok())
    {
        return ip;
    }
    peer
}

async fn handle_socket(socket: WebSocket, state: GatewayState, addr: IpAddr) {
    let conn_id = NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let conn = Arc::new(ClientConnection::new(conn_id, addr, unix_now(), tx));
    state.registry.attach_connection(conn.clone()).await;

    info!(conn_id, %addr, "websocket connected");

    // Push posting limits so the client can pre-validate input.
    if let Ok(frame) = encode_text(TextType::Configs, &state.limits) {
        conn.send_text(frame);
    }

    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            inbound = ws_rx.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        livepost::handle_text(&state, &conn, text.as_str()).await;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        livepost::handle_binary(&state, &conn, &data).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if ws_tx.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {
                        // Pong frames are consumed silently.
                    }
                    Some(Err(e)) => {
                        debug!(conn_id, "websocket error: {e}");
                        break;
                    }
                }
            }
            outbound = rx.recv() => {
                match outbound {
                    Some(frame) => {
                        if ws_tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    livepost::disconnect_cleanup(&state, &conn).await;
    info!(conn_id, %addr, "websocket disconnected");
}
