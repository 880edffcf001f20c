use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};
use uuid::Uuid;

use crate::auth::middleware::Claims;
use crate::conversations;
use crate::directory;
use crate::session::protocol::{self, ServerEnvelope, ServerEvent};
use crate::session::{SessionHandle, SessionState};
use crate::state::AppState;

/// Ping interval: server sends WebSocket ping every 30 seconds.
/// Detects silent disconnects that never produce a close frame.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Pong timeout: if pong not received within 10 seconds after ping, close.
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// Run the actor-per-connection pattern for an authenticated WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, forwards messages from an mpsc channel
/// - Reader task: processes incoming frames, dispatches to protocol handlers
///
/// The mpsc channel allows any part of the system to push events to this
/// session by cloning the sender out of the registry.
pub async fn run_connection(socket: WebSocket, state: AppState, claims: Claims) {
    let user_id = claims.sub.clone();
    let session_id = Uuid::now_v7().to_string();

    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    // Register this session in the registry
    state.sessions.register(
        &user_id,
        SessionHandle {
            session_id: session_id.clone(),
            sender: tx.clone(),
        },
    );

    // Handshake: confirm identity to this session first.
    protocol::send_envelope(
        &tx,
        &ServerEnvelope {
            request_id: String::new(),
            event: ServerEvent::Authenticated {
                session_id: session_id.clone(),
                user_id: user_id.clone(),
            },
        },
    );

    // Then push the caller's conversation list to this session only. The
    // token claims carry name and email, so the directory row is refreshed
    // on the way.
    {
        let db = state.db.clone();
        let uid = user_id.clone();
        let connect_claims = claims.clone();
        let summaries = tokio::task::spawn_blocking(move || {
            let conn = db.lock().ok()?;
            if let Err(e) = directory::ensure_profile(&conn, &connect_claims) {
                tracing::warn!(
                    user_id = %connect_claims.sub,
                    error = %e,
                    "Failed to upsert connecting user's profile"
                );
            }
            conversations::list_summaries(&conn, &uid).ok()
        })
        .await
        .ok()
        .flatten()
        .unwrap_or_default();

        protocol::send_envelope(
            &tx,
            &ServerEnvelope {
                request_id: String::new(),
                event: ServerEvent::ConversationsList {
                    conversations: summaries,
                },
            },
        );
    }

    tracing::info!(
        user_id = %user_id,
        session_id = %session_id,
        session_state = %SessionState::Connected,
        "Session actor started"
    );

    // Spawn writer task: forwards mpsc messages to WebSocket sink
    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    // Track pong reception
    let (pong_tx, mut pong_rx) = mpsc::unbounded_channel::<()>();

    // Spawn ping task: sends periodic pings and monitors pong responses
    let ping_tx = tx.clone();
    let ping_handle = tokio::spawn(async move {
        let mut ping_timer = interval(PING_INTERVAL);
        // Skip the first immediate tick
        ping_timer.tick().await;

        loop {
            ping_timer.tick().await;

            // Send ping
            if ping_tx.send(Message::Ping(vec![1, 2, 3, 4].into())).is_err() {
                // Writer task has died — connection is gone
                break;
            }

            // Wait for pong within timeout
            match timeout(PONG_TIMEOUT, pong_rx.recv()).await {
                Ok(Some(())) => {
                    // Pong received, continue
                }
                _ => {
                    // Pong timeout or channel closed — close connection
                    tracing::warn!("Pong timeout, closing connection");
                    let _ = ping_tx.send(Message::Close(Some(CloseFrame {
                        code: 1001,
                        reason: "Pong timeout".into(),
                    })));
                    break;
                }
            }
        }
    });

    // Reader loop: process incoming WebSocket frames
    loop {
        match ws_receiver.next().await {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    // Decode the JSON envelope and dispatch
                    protocol::handle_text_frame(
                        text.as_str(),
                        &tx,
                        &state,
                        &user_id,
                        &session_id,
                    )
                    .await;
                }
                Message::Binary(_) => {
                    // The protocol is JSON text; binary frames are ignored
                    tracing::debug!(
                        user_id = %user_id,
                        "Received binary frame (expected JSON text)"
                    );
                }
                Message::Pong(_) => {
                    // Pong received — notify the ping task
                    let _ = pong_tx.send(());
                }
                Message::Ping(data) => {
                    // Respond to client pings with pong
                    let _ = tx.send(Message::Pong(data));
                }
                Message::Close(frame) => {
                    tracing::info!(
                        user_id = %user_id,
                        session_id = %session_id,
                        reason = ?frame,
                        "Client initiated close"
                    );
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(
                    user_id = %user_id,
                    session_id = %session_id,
                    error = %e,
                    "WebSocket receive error"
                );
                break;
            }
            None => {
                // Stream ended — client disconnected
                tracing::info!(
                    user_id = %user_id,
                    session_id = %session_id,
                    "WebSocket stream ended"
                );
                break;
            }
        }
    }

    // Cleanup: abort writer and ping tasks, then drop the registration.
    // All exit paths funnel through here exactly once.
    writer_handle.abort();
    ping_handle.abort();

    state.sessions.unregister(&user_id, &session_id);

    tracing::info!(
        user_id = %user_id,
        session_id = %session_id,
        session_state = %SessionState::Disconnected,
        "Session actor stopped"
    );
}

/// Writer task: receives messages from mpsc channel and forwards them to
/// the WebSocket sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        if ws_sender.send(msg).await.is_err() {
            // WebSocket send failed — connection is broken
            break;
        }
    }
}
