use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::connection_manager::ConnectionHandle;
use crate::metrics::{ConnectionMetrics, IngestMetrics};
use crate::server::AppState;

use super::message::{ClientEvent, OutboundMessage, ServerMessage};

/// Upper bound for flushing the final frames after a server-side close
const FLUSH_TIMEOUT: Duration = Duration::from_millis(500);

/// WebSocket upgrade handler
#[tracing::instrument(name = "ws.upgrade", skip(ws, state))]
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Drive one connection from admission to disconnect
async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_start = Instant::now();
    let buffer = state.settings.websocket.outbound_buffer.max(1);
    let (tx, mut rx) = mpsc::channel::<OutboundMessage>(buffer);

    let handle = match state.registry.register(tx) {
        Ok(handle) => handle,
        Err(e) => {
            tracing::debug!(error = %e, code = e.code(), "Connection rejected");
            let (mut ws_sender, _) = socket.split();
            let error_msg = ServerMessage::error(e.code(), e.to_string());
            if let Ok(json) = serde_json::to_string(&error_msg) {
                let _ = ws_sender.send(Message::Text(json.into())).await;
            }
            let _ = ws_sender.close().await;
            return;
        }
    };
    let connection_id = handle.id;

    tracing::info!(
        connection_id = %connection_id,
        total_connections = state.registry.connection_count(),
        "WebSocket connection established"
    );

    let (mut ws_sender, mut ws_receiver) = socket.split();

    let ping_interval = state.settings.websocket.ping_interval();
    let ping_handle = Arc::downgrade(&handle);
    let mut send_task = tokio::spawn(async move {
        let pinging = !ping_interval.is_zero();
        let period = ping_interval.max(Duration::from_millis(1));
        let mut keepalive = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(msg) = msg else { break };
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to serialize message");
                            continue;
                        }
                    };

                    if ws_sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = keepalive.tick(), if pinging => {
                    // Weak so the writer never keeps the outbound sender alive
                    let Some(handle) = ping_handle.upgrade() else { break };
                    handle.mark_ping_sent();
                    drop(handle);
                    if ws_sender.send(Message::Ping(Default::default())).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = ws_sender.close().await;
    });

    let recv_state = state.clone();
    let recv_handle = handle.clone();
    let mut recv_task = tokio::spawn(async move {
        let mut session = Session::default();
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(msg) => {
                    if !process_message(msg, &recv_state, &recv_handle, &mut session).await {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    });

    let server_closed = tokio::select! {
        _ = &mut send_task => {
            tracing::debug!(connection_id = %connection_id, "Send task completed");
            false
        }
        _ = &mut recv_task => {
            tracing::debug!(connection_id = %connection_id, "Receive task completed");
            false
        }
        _ = handle.closed() => {
            tracing::debug!(connection_id = %connection_id, "Connection closed by server");
            true
        }
    };

    recv_task.abort();
    state.registry.on_disconnect(connection_id);
    drop(handle);

    if server_closed {
        // Every sender is gone now: the send task drains queued frames and exits
        if tokio::time::timeout(FLUSH_TIMEOUT, &mut send_task).await.is_err() {
            send_task.abort();
        }
    } else {
        send_task.abort();
    }

    let duration = connection_start.elapsed().as_secs_f64();
    ConnectionMetrics::record_duration(duration);

    tracing::info!(
        connection_id = %connection_id,
        duration_secs = duration,
        "WebSocket connection closed"
    );
}

/// Per-connection receive state
#[derive(Default)]
struct Session {
    warned_invalid: bool,
}

/// Process one received frame. Returns false if the connection should close.
async fn process_message(
    msg: Message,
    state: &AppState,
    handle: &Arc<ConnectionHandle>,
    session: &mut Session,
) -> bool {
    match msg {
        Message::Text(text) => {
            let event = match ClientEvent::parse(&text) {
                Ok(event) => event,
                Err(e) => {
                    IngestMetrics::record_invalid();
                    if !session.warned_invalid {
                        session.warned_invalid = true;
                        tracing::warn!(connection_id = %handle.id, error = %e, "Invalid client frame");
                    } else {
                        tracing::debug!(connection_id = %handle.id, error = %e, "Invalid client frame");
                    }
                    let _ = handle.try_send(ServerMessage::error("INVALID_MESSAGE", e.to_string()));
                    return true;
                }
            };

            handle.update_activity();
            IngestMetrics::record_event(event.name());
            handle_client_event(event, state, handle).await;
            true
        }
        Message::Binary(_) => {
            let _ = handle.try_send(ServerMessage::error(
                "UNSUPPORTED_FORMAT",
                "Binary messages are not supported",
            ));
            true
        }
        Message::Ping(_) | Message::Pong(_) => {
            handle.update_activity();
            true
        }
        Message::Close(_) => {
            tracing::debug!(connection_id = %handle.id, "Received close frame");
            false
        }
    }
}

#[tracing::instrument(
    name = "ws.event",
    skip(event, state, handle),
    fields(connection_id = %handle.id, event = event.name())
)]
async fn handle_client_event(event: ClientEvent, state: &AppState, handle: &Arc<ConnectionHandle>) {
    match event {
        ClientEvent::Join { user_id } => {
            state.registry.on_join(handle.id, &user_id);
        }
        ClientEvent::Leave { user_id } => {
            state.registry.on_leave(&user_id);
        }
        ClientEvent::Message { user_id, text } => {
            state.ingestor.on_message(Some(user_id.as_str()), &text).await;
        }
        ClientEvent::Ping { user_id, timestamp } => {
            let _ = handle.try_send(ServerMessage::pong(user_id, timestamp));
        }
        ClientEvent::Activity { .. } => {
            // Activity only refreshes the liveness timestamp
        }
        ClientEvent::Observe => {
            state.registry.on_observe(handle.id);
        }
    }
}
