//! Message channel: validated send, persist-then-deliver fan-out, and
//! paginated REST history.
//!
//! A message is accepted only after full validation; acceptance assigns the
//! server id, the per-conversation sequence number, and the timestamp, all
//! in one transaction with the conversation metadata update. Fan-out to
//! live sessions happens while the connection lock is still held, so
//! delivery order per conversation always equals sequence order. Nothing is
//! queued for offline recipients — reconnect recovery goes through
//! `conversations.list` and the history endpoint.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::middleware::Claims;
use crate::conversations;
use crate::db;
use crate::error::ChatError;
use crate::session::protocol::{ServerEnvelope, ServerEvent};
use crate::state::AppState;

/// Maximum message body length (chars).
const MAX_BODY_LENGTH: usize = 4000;
/// Default page size for message history.
pub(crate) const DEFAULT_LIMIT: u32 = 50;
/// Maximum page size for message history.
const MAX_LIMIT: u32 = 100;

/// A persisted message. This is both the storage row and the wire shape
/// used by `message.received` and the history endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub room_id: String,
    pub seq: u64,
    pub sender_id: String,
    pub recipient_id: String,
    pub body: String,
    pub created_at_ms: u64,
    pub is_read: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryQuery {
    pub before: Option<u64>,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub messages: Vec<MessageRecord>,
    pub has_more: bool,
}

fn message_from_row(row: &rusqlite::Row) -> rusqlite::Result<MessageRecord> {
    Ok(MessageRecord {
        id: row.get(0)?,
        room_id: row.get(1)?,
        seq: row.get(2)?,
        sender_id: row.get(3)?,
        recipient_id: row.get(4)?,
        body: row.get(5)?,
        created_at_ms: row.get(6)?,
        is_read: row.get(7)?,
    })
}

const MESSAGE_COLUMNS: &str =
    "id, conversation_id, seq, sender_id, recipient_id, body, created_at_ms, is_read";

/// The most recent messages of a room in ascending seq order, for
/// rendering a thread on open.
pub(crate) fn recent_messages(
    conn: &Connection,
    room_id: &str,
    limit: u32,
) -> Result<Vec<MessageRecord>, ChatError> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages \
         WHERE conversation_id = ?1 ORDER BY seq DESC LIMIT ?2"
    );
    let mut stmt = conn.prepare(&sql)?;

    let mut messages: Vec<MessageRecord> = stmt
        .query_map(rusqlite::params![room_id, limit as i64], message_from_row)?
        .filter_map(|r| r.ok())
        .collect();
    messages.reverse();

    Ok(messages)
}

/// `message.send` over the socket: validate, persist, fan out.
///
/// Validation order (nothing persists on failure): body non-empty after
/// trimming and within the length cap, conversation exists, sender is a
/// participant, recipient is the other participant. On accept, every live
/// recipient session and every other sender session receives
/// `message.received`; the originating session gets the same event with
/// the request id echoed as its acknowledgment.
pub async fn send_message(
    state: &AppState,
    sender_id: &str,
    session_id: &str,
    request_id: &str,
    room_id: &str,
    recipient_id: &str,
    body: String,
) -> Result<(), ChatError> {
    let body = body.trim().to_string();
    if body.is_empty() {
        return Err(ChatError::Validation(
            "message body must not be empty".to_string(),
        ));
    }
    if body.chars().count() > MAX_BODY_LENGTH {
        return Err(ChatError::Validation(format!(
            "message body exceeds {MAX_BODY_LENGTH} characters"
        )));
    }

    let db = state.db.clone();
    let sessions = state.sessions.clone();
    let sender = sender_id.to_string();
    let origin = session_id.to_string();
    let req_id = request_id.to_string();
    let room = room_id.to_string();
    let recipient = recipient_id.to_string();

    tokio::task::spawn_blocking(move || {
        let mut conn = db
            .lock()
            .map_err(|_| ChatError::Internal("database lock poisoned".to_string()))?;

        let (participant_a, participant_b) = conversations::participants(&conn, &room)?
            .ok_or(ChatError::NotFound("conversation does not exist"))?;

        if sender != participant_a && sender != participant_b {
            return Err(ChatError::Forbidden(
                "sender is not a participant of this conversation",
            ));
        }

        let other = if sender == participant_a {
            &participant_b
        } else {
            &participant_a
        };
        if recipient != *other {
            return Err(ChatError::Validation(
                "recipient is not the other participant of this conversation".to_string(),
            ));
        }

        let record = {
            let tx = conn.transaction().map_err(ChatError::from)?;

            let next_seq: u64 = tx.query_row(
                "SELECT COALESCE(MAX(seq), 0) + 1 FROM messages WHERE conversation_id = ?1",
                rusqlite::params![room],
                |row| row.get(0),
            )?;

            // Wall clock can step backwards; seq is authoritative, but keep
            // timestamps non-decreasing within the conversation too.
            let prev_ms: u64 = tx.query_row(
                "SELECT COALESCE(MAX(created_at_ms), 0) FROM messages WHERE conversation_id = ?1",
                rusqlite::params![room],
                |row| row.get(0),
            )?;
            let created_at_ms = db::now_millis().max(prev_ms);

            let record = MessageRecord {
                id: Uuid::now_v7().to_string(),
                room_id: room.clone(),
                seq: next_seq,
                sender_id: sender.clone(),
                recipient_id: recipient.clone(),
                body,
                created_at_ms,
                is_read: false,
            };

            tx.execute(
                "INSERT INTO messages \
                 (id, conversation_id, seq, sender_id, recipient_id, body, created_at_ms, is_read) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0)",
                rusqlite::params![
                    record.id,
                    record.room_id,
                    record.seq,
                    record.sender_id,
                    record.recipient_id,
                    record.body,
                    record.created_at_ms,
                ],
            )?;

            tx.execute(
                "UPDATE conversations SET last_activity_ms = ?1, last_message_id = ?2 \
                 WHERE room_id = ?3",
                rusqlite::params![record.created_at_ms, record.id, record.room_id],
            )?;

            tx.commit().map_err(ChatError::from)?;
            record
        };

        // Fan out before releasing the lock: a concurrent send cannot slip
        // its delivery in between and reorder events relative to seq.
        let delivery = ServerEnvelope {
            request_id: String::new(),
            event: ServerEvent::MessageReceived {
                message: record.clone(),
            },
        };
        let ack = ServerEnvelope {
            request_id: req_id,
            event: ServerEvent::MessageReceived {
                message: record.clone(),
            },
        };

        sessions.send_to_user(&recipient, &delivery);
        sessions.send_to_user_except(&sender, &origin, &delivery);
        sessions.send_to_session(&sender, &origin, &ack);

        tracing::debug!(
            room_id = %record.room_id,
            seq = record.seq,
            sender_id = %record.sender_id,
            "Message accepted and fanned out"
        );

        Ok::<(), ChatError>(())
    })
    .await
    .map_err(|_| ChatError::Internal("database task failed".to_string()))??;

    Ok(())
}

/// GET /api/conversations/{room_id}/messages?before={seq}&limit={n}
/// Paginated message history, newest first. JWT auth required; the caller
/// must be a participant of the room.
pub async fn get_conversation_messages(
    State(state): State<AppState>,
    claims: Claims,
    Path(room_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ChatError> {
    let db = state.db.clone();
    let viewer = claims.sub.clone();
    let room = room_id;
    let before: i64 = query
        .before
        .map_or(i64::MAX, |b| b.min(i64::MAX as u64) as i64);
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);

    let response = tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|_| ChatError::Internal("database lock poisoned".to_string()))?;

        let (participant_a, participant_b) = conversations::participants(&conn, &room)?
            .ok_or(ChatError::NotFound("conversation does not exist"))?;

        if viewer != participant_a && viewer != participant_b {
            return Err(ChatError::Forbidden(
                "caller is not a participant of this conversation",
            ));
        }

        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE conversation_id = ?1 AND seq < ?2 \
             ORDER BY seq DESC LIMIT ?3"
        );
        let mut stmt = conn.prepare(&sql)?;

        let messages: Vec<MessageRecord> = stmt
            .query_map(
                rusqlite::params![room, before, (limit + 1) as i64],
                message_from_row,
            )?
            .filter_map(|r| r.ok())
            .collect();

        let has_more = messages.len() > limit as usize;
        let messages: Vec<MessageRecord> = messages.into_iter().take(limit as usize).collect();

        Ok::<_, ChatError>(HistoryResponse { messages, has_more })
    })
    .await
    .map_err(|_| ChatError::Internal("database task failed".to_string()))??;

    Ok(Json(response))
}
