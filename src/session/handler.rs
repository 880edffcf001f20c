use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use serde::Deserialize;

use crate::auth::token;
use crate::session::actor;
use crate::session::protocol::{ServerEnvelope, ServerEvent};
use crate::session::SessionState;
use crate::state::AppState;

/// Query parameters for WebSocket connection.
/// Auth is via query param ?token=<jwt> — browsers cannot attach headers
/// to a WebSocket handshake.
#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    pub token: String,
}

/// WebSocket close codes surfaced to clients:
/// 4001 = token expired
/// 4002 = token invalid
const CLOSE_TOKEN_EXPIRED: u16 = 4001;
const CLOSE_TOKEN_INVALID: u16 = 4002;

/// GET /ws?token=<jwt>
/// WebSocket upgrade endpoint. Authenticates via query parameter.
/// On auth failure, upgrades anyway, sends an error envelope with the
/// reason, then closes with the matching code — so the client can tell an
/// auth rejection from transport loss. On success, spawns the session actor.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsAuthQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let claims = token::validate_session_token(&state.session_secret, &params.token);

    match claims {
        Ok(claims) => {
            tracing::info!(
                user_id = %claims.sub,
                session_state = %SessionState::Connecting,
                "WebSocket session authenticated"
            );
            ws.on_upgrade(move |socket| actor::run_connection(socket, state, claims))
        }
        Err(err) => {
            // Determine close code based on error type
            let (close_code, reason) = match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    (CLOSE_TOKEN_EXPIRED, "Token expired")
                }
                _ => (CLOSE_TOKEN_INVALID, "Token invalid"),
            };

            tracing::warn!(
                close_code = close_code,
                reason = reason,
                session_state = %SessionState::Errored,
                "WebSocket auth failed"
            );

            ws.on_upgrade(move |mut socket| async move {
                let envelope = ServerEnvelope {
                    request_id: String::new(),
                    event: ServerEvent::Error {
                        code: 401,
                        message: reason.to_string(),
                    },
                };
                if let Ok(json) = serde_json::to_string(&envelope) {
                    let _ = socket.send(Message::Text(json.into())).await;
                }

                let close_frame = CloseFrame {
                    code: close_code,
                    reason: reason.into(),
                };
                let _ = socket.send(Message::Close(Some(close_frame))).await;
            })
        }
    }
}
