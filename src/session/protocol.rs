use serde::{Deserialize, Serialize};

use crate::conversations::{self, ConversationSummary};
use crate::error::ChatError;
use crate::messages::{self, MessageRecord};
use crate::read_state;
use crate::session::SessionSender;
use crate::state::AppState;

/// Client → server envelope: a request id the client picks (echoed on the
/// acknowledgment) plus one tagged event.
#[derive(Debug, Serialize, Deserialize)]
pub struct ClientEnvelope {
    #[serde(default)]
    pub request_id: String,
    #[serde(flatten)]
    pub event: ClientEvent,
}

/// Everything a client can ask for over the socket.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "conversation.create")]
    ConversationCreate { partner_id: String },
    #[serde(rename = "message.send")]
    MessageSend {
        room_id: String,
        recipient_id: String,
        body: String,
    },
    #[serde(rename = "message.markRead")]
    MarkRead { message_id: String },
    #[serde(rename = "message.markAllRead")]
    MarkAllRead { room_id: String },
}

/// Server → client envelope. request_id is empty for pushed events and
/// echoes the client's id on direct acknowledgments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerEnvelope {
    pub request_id: String,
    #[serde(flatten)]
    pub event: ServerEvent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "authenticated")]
    Authenticated { session_id: String, user_id: String },
    #[serde(rename = "conversations.list")]
    ConversationsList { conversations: Vec<ConversationSummary> },
    #[serde(rename = "conversation.created")]
    ConversationCreated {
        conversation: ConversationSummary,
        history: Vec<MessageRecord>,
    },
    #[serde(rename = "message.received")]
    MessageReceived { message: MessageRecord },
    #[serde(rename = "message.readUpdated")]
    ReadUpdated {
        room_id: String,
        message_ids: Vec<String>,
    },
    #[serde(rename = "error")]
    Error { code: u16, message: String },
}

/// Handle one incoming text frame: decode the envelope, dispatch, and
/// report any rejection to the invoking session only.
pub async fn handle_text_frame(
    text: &str,
    tx: &SessionSender,
    state: &AppState,
    user_id: &str,
    session_id: &str,
) {
    let envelope: ClientEnvelope = match serde_json::from_str(text) {
        Ok(env) => env,
        Err(e) => {
            tracing::warn!(
                user_id = %user_id,
                error = %e,
                "Failed to decode client envelope"
            );
            send_error(tx, "", 400, "Invalid event envelope");
            return;
        }
    };

    let request_id = envelope.request_id.clone();

    if let Err(err) = dispatch_event(envelope.event, &request_id, state, user_id, session_id).await
    {
        tracing::debug!(
            user_id = %user_id,
            request_id = %request_id,
            error = %err,
            "Client event rejected"
        );
        send_error(tx, &request_id, err.ws_code(), &err.to_string());
    }
}

/// Dispatch a decoded event to the owning component. Success replies and
/// fan-out are emitted by the components themselves; only errors bubble
/// back here.
async fn dispatch_event(
    event: ClientEvent,
    request_id: &str,
    state: &AppState,
    user_id: &str,
    session_id: &str,
) -> Result<(), ChatError> {
    match event {
        ClientEvent::ConversationCreate { partner_id } => {
            conversations::create_from_session(state, user_id, session_id, request_id, &partner_id)
                .await
        }
        ClientEvent::MessageSend {
            room_id,
            recipient_id,
            body,
        } => {
            messages::send_message(
                state,
                user_id,
                session_id,
                request_id,
                &room_id,
                &recipient_id,
                body,
            )
            .await
        }
        ClientEvent::MarkRead { message_id } => {
            read_state::mark_read(state, user_id, &message_id).await
        }
        ClientEvent::MarkAllRead { room_id } => {
            read_state::mark_conversation_read(state, user_id, &room_id).await
        }
    }
}

/// Serialize and send an envelope to one session's channel.
pub fn send_envelope(tx: &SessionSender, envelope: &ServerEnvelope) {
    if let Some(msg) = crate::session::encode(envelope) {
        let _ = tx.send(msg);
    }
}

/// Send an in-band error envelope. Codes mirror the HTTP mapping.
pub fn send_error(tx: &SessionSender, request_id: &str, code: u16, message: &str) {
    send_envelope(
        tx,
        &ServerEnvelope {
            request_id: request_id.to_string(),
            event: ServerEvent::Error {
                code,
                message: message.to_string(),
            },
        },
    );
}
