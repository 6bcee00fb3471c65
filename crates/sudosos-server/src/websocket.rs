//! WebSocket wait channel for the device that generated a QR session
//!
//! The socket stays open until the session is confirmed, expires or is
//! cancelled, then sends one final message and closes.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::IntoResponse,
};
use futures::{Sink, SinkExt, StreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use sudosos_auth::{QrSession, QrStatus, SessionId};
use sudosos_core::ServerMessage;
use tokio::sync::broadcast::{
    self,
    error::{RecvError, TryRecvError},
};
use tracing::{debug, info, warn};

use crate::broadcast::{AppState, QrEvent};

/// Interval between keepalive pings
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// WebSocket handler for waiting on a QR session
pub async fn qr_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_qr_socket(socket, state, id))
}

/// Handle a QR wait socket
pub async fn handle_qr_socket(socket: WebSocket, state: Arc<AppState>, raw_id: String) {
    let (sender, mut receiver) = socket.split();

    // Subscribe before reading the session so a confirmation in between stays queued
    let events = state.events.subscribe();

    // Drain client frames so pings and close are processed
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(_)) => break,
                Ok(other) => debug!("Ignoring client frame: {:?}", other),
                Err(e) => {
                    warn!("WebSocket receive error: {}", e);
                    break;
                }
            }
        }
    });

    let mut sink = sender.with(|msg: ServerMessage| {
        futures::future::ready(
            serde_json::to_string(&msg)
                .map(Message::Text)
                .map_err(axum::Error::new),
        )
    });

    wait_on_session(&state, &raw_id, events, &mut sink, &mut recv_task).await;
    recv_task.abort();
}

/// Drive one wait: send the opening message, then the outcome.
///
/// Returns once a final message is sent, the client leaves (`client_gone`
/// resolves) or the sink fails. The sink is closed on return.
pub(crate) async fn wait_on_session<S, F>(
    state: &AppState,
    raw_id: &str,
    mut events: broadcast::Receiver<QrEvent>,
    sink: &mut S,
    client_gone: F,
) where
    S: Sink<ServerMessage> + Unpin,
    F: Future,
{
    let session = match SessionId::parse(raw_id) {
        Ok(id) => state.qr.fetch(&id).await,
        Err(_) => Ok(None),
    };
    let session = match session {
        Ok(Some(session)) => session,
        Ok(None) => {
            let msg = ServerMessage::Error {
                message: "QR session not found".to_string(),
            };
            let _ = sink.send(msg).await;
            let _ = sink.close().await;
            return;
        }
        Err(e) => {
            warn!("Failed to load QR session {}: {}", raw_id, e);
            let msg = ServerMessage::Error {
                message: "Internal error".to_string(),
            };
            let _ = sink.send(msg).await;
            let _ = sink.close().await;
            return;
        }
    };

    let id = session.session_id.clone();
    if !session.is_pending() {
        let _ = sink.send(final_message(&mut events, &session)).await;
        let _ = sink.close().await;
        return;
    }

    let remaining = session.remaining(state.qr.clock().now());
    let waiting = ServerMessage::Waiting {
        session_id: id.to_string(),
        expires_in: remaining,
    };
    if sink.send(waiting).await.is_err() {
        return;
    }
    info!("Client waiting on QR session {}", id);

    // Re-check one second past the deadline so lazy expiry has fired
    let deadline = tokio::time::sleep(Duration::from_secs(remaining as u64 + 1));
    tokio::pin!(deadline);
    tokio::pin!(client_gone);
    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.tick().await;

    loop {
        tokio::select! {
            result = events.recv() => {
                match result {
                    Ok(event) if event.session_id == id => {
                        let _ = sink.send(confirmed_message(event)).await;
                        break;
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(n)) => {
                        warn!("QR socket lagged {} events", n);
                        if let Ok(Some(current)) = state.qr.fetch(&id).await {
                            if !current.is_pending() {
                                let _ = sink.send(final_message(&mut events, &current)).await;
                                break;
                            }
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            _ = &mut deadline => {
                match state.qr.fetch(&id).await {
                    Ok(Some(current)) if current.is_pending() => {
                        let left = current.remaining(state.qr.clock().now());
                        deadline.as_mut().reset(
                            tokio::time::Instant::now() + Duration::from_secs(left as u64 + 1),
                        );
                    }
                    Ok(Some(current)) => {
                        let _ = sink.send(final_message(&mut events, &current)).await;
                        break;
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Failed to re-check QR session {}: {}", id, e);
                        break;
                    }
                }
            }
            _ = ping.tick() => {
                let timestamp = chrono::Utc::now().timestamp_millis().max(0) as u64;
                if sink.send(ServerMessage::Ping { timestamp }).await.is_err() {
                    break;
                }
            }
            _ = &mut client_gone => {
                debug!("Client left QR session {}", id);
                break;
            }
        }
    }

    let _ = sink.close().await;
    info!("QR wait socket for {} closed", id);
}

fn confirmed_message(event: QrEvent) -> ServerMessage {
    ServerMessage::Confirmed {
        session_id: event.session_id.to_string(),
        token: event.token,
        user: event.user.name,
    }
}

/// The closing message for a session that is no longer pending.
///
/// A confirmed session gets its token if the confirmation is still queued.
fn final_message(events: &mut broadcast::Receiver<QrEvent>, session: &QrSession) -> ServerMessage {
    if session.status == QrStatus::Confirmed {
        if let Some(event) = take_confirmation(events, &session.session_id) {
            return confirmed_message(event);
        }
    }
    ServerMessage::Status {
        session_id: session.session_id.to_string(),
        status: session.status,
    }
}

/// Pull the queued confirmation for `id`, skipping other sessions' events
fn take_confirmation(
    events: &mut broadcast::Receiver<QrEvent>,
    id: &SessionId,
) -> Option<QrEvent> {
    loop {
        match events.try_recv() {
            Ok(event) if event.session_id == *id => return Some(event),
            Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
        }
    }
}
