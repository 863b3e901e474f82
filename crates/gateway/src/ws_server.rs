//! WebSocket endpoint using Axum.

use crate::registry::{ConnectionRegistry, ConnectionState};
use crate::router;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::interval;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

/// Protocol-level keepalive. Dead peers fail the write, which tears the
/// socket task down through its normal close path; quiet-but-live peers are
/// never reaped.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Shared application state.
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
}

/// Create the WebSocket router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let connections = state.registry.connection_count();
    let subscriptions = state.registry.subscription_count();
    format!(
        r#"{{"status":"ok","connections":{},"subscriptions":{}}}"#,
        connections, subscriptions
    )
}

/// WebSocket upgrade handler. No credential check here: the envelope-level
/// `auth` frame attaches identity after the upgrade.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Run one connection: register it, pump frames until the peer goes away,
/// then unregister.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let conn = Arc::new(ConnectionState::new(tx));
    let connection_id = state.registry.register(conn.clone());

    counter!("gateway_connections_total").increment(1);
    gauge!("gateway_active_connections").set(state.registry.connection_count() as f64);

    info!(connection_id = %connection_id, "client connected");

    // Writer task: forwards registry broadcasts and acks to the socket.
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_tx.send(msg).await.is_err() {
                break;
            }
        }
    });

    let mut ping_interval = interval(PING_INTERVAL);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        router::handle_text_frame(&state.registry, &conn, &text);
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if conn.tx.send(Message::Pong(data)).is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Binary(_))) => {
                        debug!(connection_id = %connection_id, "ignoring binary frame");
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!(connection_id = %connection_id, frame = ?frame, "client closed");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection_id = %connection_id, error = %e, "websocket error");
                        break;
                    }
                    None => break,
                }
            }

            _ = ping_interval.tick() => {
                if conn.tx.send(Message::Ping(vec![].into())).is_err() {
                    break;
                }
            }
        }
    }

    state.registry.unregister(&connection_id);
    send_task.abort();

    counter!("gateway_disconnections_total").increment(1);
    gauge!("gateway_active_connections").set(state.registry.connection_count() as f64);

    info!(connection_id = %connection_id, "client disconnected");
}
