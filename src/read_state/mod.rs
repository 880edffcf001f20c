//! Read-state tracking: flip is_read exactly once per message and tell
//! the sender's live sessions about it.
//!
//! Unread counters are never stored; every count in a listing is derived
//! from is_read at query time, so marking twice cannot double-decrement
//! anything. Receipts go to the sender's sessions only; the reader's own
//! sessions learn the new state from their next listing or history fetch.

use rusqlite::OptionalExtension;

use crate::conversations;
use crate::error::ChatError;
use crate::session::protocol::{ServerEnvelope, ServerEvent};
use crate::state::AppState;

fn receipt(room_id: &str, message_ids: Vec<String>) -> ServerEnvelope {
    ServerEnvelope {
        request_id: String::new(),
        event: ServerEvent::ReadUpdated {
            room_id: room_id.to_string(),
            message_ids,
        },
    }
}

/// `message.markRead`: mark one message read.
/// Only the recipient may do this; repeating it is a no-op success and no
/// second receipt is emitted.
pub async fn mark_read(
    state: &AppState,
    viewer_id: &str,
    message_id: &str,
) -> Result<(), ChatError> {
    let db = state.db.clone();
    let sessions = state.sessions.clone();
    let viewer = viewer_id.to_string();
    let msg_id = message_id.to_string();

    tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|_| ChatError::Internal("database lock poisoned".to_string()))?;

        let row: Option<(String, String, String, bool)> = conn
            .query_row(
                "SELECT conversation_id, sender_id, recipient_id, is_read \
                 FROM messages WHERE id = ?1",
                rusqlite::params![msg_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;

        let (room_id, sender_id, recipient_id, is_read) =
            row.ok_or(ChatError::NotFound("message does not exist"))?;

        if viewer != recipient_id {
            return Err(ChatError::Forbidden(
                "only the recipient may mark a message read",
            ));
        }

        if is_read {
            // Already read — idempotent success, nothing to re-announce.
            return Ok(());
        }

        conn.execute(
            "UPDATE messages SET is_read = 1 WHERE id = ?1",
            rusqlite::params![msg_id],
        )?;

        sessions.send_to_user(&sender_id, &receipt(&room_id, vec![msg_id.clone()]));

        tracing::debug!(room_id = %room_id, message_id = %msg_id, "Message marked read");
        Ok(())
    })
    .await
    .map_err(|_| ChatError::Internal("database task failed".to_string()))??;

    Ok(())
}

/// `message.markAllRead`: mark every unread message addressed to the
/// viewer in a room, emitting one receipt that lists all flipped ids.
/// A room with nothing unread is a no-op success.
pub async fn mark_conversation_read(
    state: &AppState,
    viewer_id: &str,
    room_id: &str,
) -> Result<(), ChatError> {
    let db = state.db.clone();
    let sessions = state.sessions.clone();
    let viewer = viewer_id.to_string();
    let room = room_id.to_string();

    tokio::task::spawn_blocking(move || {
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

        // Everything unread and addressed to the viewer was sent by the
        // other participant, so one receipt target covers the whole batch.
        let sender = if viewer == participant_a {
            participant_b
        } else {
            participant_a
        };

        let mut stmt = conn.prepare(
            "SELECT id FROM messages \
             WHERE conversation_id = ?1 AND recipient_id = ?2 AND is_read = 0 \
             ORDER BY seq",
        )?;
        let flipped: Vec<String> = stmt
            .query_map(rusqlite::params![room, viewer], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();

        if flipped.is_empty() {
            return Ok(());
        }

        conn.execute(
            "UPDATE messages SET is_read = 1 \
             WHERE conversation_id = ?1 AND recipient_id = ?2 AND is_read = 0",
            rusqlite::params![room, viewer],
        )?;

        tracing::debug!(
            room_id = %room,
            count = flipped.len(),
            "Conversation marked read"
        );

        sessions.send_to_user(&sender, &receipt(&room, flipped));

        Ok(())
    })
    .await
    .map_err(|_| ChatError::Internal("database task failed".to_string()))??;

    Ok(())
}
