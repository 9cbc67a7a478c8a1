use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::api::AppState;
use super::relay::RelayBridge;
use super::supervisor::ProcessSupervisor;
use crate::errors::ConsoleError;

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let relay = state.relay.clone();
    let supervisor = state.supervisor.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, relay, supervisor))
}

/// Socket lifecycle: attach as the current connection, pump messages, and on
/// close detach and stop the analysis process.
///
/// Relay messages, client frames and keepalive pings share one select loop.
/// A connection that has been replaced stops receiving relay messages but
/// stays open until the client goes away.
async fn handle_socket(socket: WebSocket, relay: RelayBridge, supervisor: ProcessSupervisor) {
    let (mut sender, mut receiver) = socket.split();
    let (conn_id, mut rx) = relay.attach();

    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // The first tick completes immediately; consume it so the first real
    // ping fires after PING_INTERVAL has elapsed.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;
    let mut forwarding = true;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    tracing::debug!(connection = conn_id, "Pong timeout");
                    break;
                }
                if sender.send(Message::Ping(Default::default())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            outbound = rx.recv(), if forwarding => {
                match outbound {
                    Some(json) => {
                        if sender.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    // Replaced by a newer connection.
                    None => forwarding = false,
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => relay.handle_client_text(text.as_str()),
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(connection = conn_id, error = %e, "WebSocket receive error");
                        break;
                    }
                }
            }
        }
    }

    let _ = sender.send(Message::Close(None)).await;
    on_disconnect(&relay, &supervisor, conn_id).await;
}

/// Detach `conn_id` and, if it was still the current connection, stop the
/// analysis process.
pub(crate) async fn on_disconnect(
    relay: &RelayBridge,
    supervisor: &ProcessSupervisor,
    conn_id: u64,
) {
    if !relay.detach(conn_id) {
        return;
    }
    match supervisor.stop().await {
        Ok(()) => tracing::info!(connection = conn_id, "Stopped analysis process after client disconnect"),
        Err(ConsoleError::NotRunning) => {}
        Err(e) => tracing::warn!(connection = conn_id, error = %e, "Failed to stop analysis process"),
    }
}
