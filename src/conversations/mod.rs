//! Conversation registry: one row per unordered participant pair.
//!
//! Conversations are one-to-one between marketplace participants. The
//! canonical room id is derived from the sorted pair (see room.rs), so the
//! same two people always land in the same room no matter who opens it.
//! Rooms are created lazily on first contact and never deleted.

pub mod room;

use axum::{
    extract::State,
    http::StatusCode,
    Json,
};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::auth::middleware::Claims;
use crate::db;
use crate::directory::{self, Profile};
use crate::error::ChatError;
use crate::messages::{self, MessageRecord};
use crate::session::protocol::{ServerEnvelope, ServerEvent};
use crate::state::AppState;

/// One conversation as seen by a specific viewer: the partner is the other
/// participant, and unread counts messages addressed to the viewer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub room_id: String,
    pub partner: Profile,
    pub created_at_ms: u64,
    pub last_activity_ms: Option<u64>,
    pub last_message: Option<MessageRecord>,
    pub unread_count: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateConversationRequest {
    pub partner_id: String,
}

const SUMMARY_COLUMNS: &str = "c.room_id, c.participant_a, c.participant_b, \
     c.created_at_ms, c.last_activity_ms, \
     pa.display_name, pa.avatar_url, pb.display_name, pb.avatar_url, \
     m.id, m.seq, m.sender_id, m.recipient_id, m.body, m.created_at_ms, m.is_read, \
     (SELECT COUNT(*) FROM messages u \
       WHERE u.conversation_id = c.room_id AND u.recipient_id = ?1 AND u.is_read = 0)";

const SUMMARY_JOINS: &str = "FROM conversations c \
     LEFT JOIN profiles pa ON pa.user_id = c.participant_a \
     LEFT JOIN profiles pb ON pb.user_id = c.participant_b \
     LEFT JOIN messages m ON m.id = c.last_message_id";

/// Map one summary row (?1 = viewer) to the viewer-scoped DTO.
fn summary_from_row(viewer: &str, row: &rusqlite::Row) -> rusqlite::Result<ConversationSummary> {
    let room_id: String = row.get(0)?;
    let participant_a: String = row.get(1)?;
    let participant_b: String = row.get(2)?;

    // The partner is whichever participant the viewer is not.
    let (partner_id, partner_name, partner_avatar) = if participant_a == viewer {
        (
            participant_b,
            row.get::<_, Option<String>>(7)?,
            row.get::<_, Option<String>>(8)?,
        )
    } else {
        (
            participant_a,
            row.get::<_, Option<String>>(5)?,
            row.get::<_, Option<String>>(6)?,
        )
    };

    let last_message = match row.get::<_, Option<String>>(9)? {
        Some(id) => Some(MessageRecord {
            id,
            room_id: room_id.clone(),
            seq: row.get(10)?,
            sender_id: row.get(11)?,
            recipient_id: row.get(12)?,
            body: row.get(13)?,
            created_at_ms: row.get(14)?,
            is_read: row.get(15)?,
        }),
        None => None,
    };

    Ok(ConversationSummary {
        room_id,
        partner: Profile {
            user_id: partner_id,
            display_name: partner_name.unwrap_or_else(|| "Unknown".to_string()),
            avatar_url: partner_avatar,
        },
        created_at_ms: row.get(3)?,
        last_activity_ms: row.get(4)?,
        last_message,
        unread_count: row.get(16)?,
    })
}

/// All conversations the viewer participates in, most recently active
/// first; rooms without any message yet sort last, newest created first.
pub(crate) fn list_summaries(
    conn: &Connection,
    viewer: &str,
) -> Result<Vec<ConversationSummary>, ChatError> {
    let sql = format!(
        "SELECT {SUMMARY_COLUMNS} {SUMMARY_JOINS} \
         WHERE c.participant_a = ?1 OR c.participant_b = ?1 \
         ORDER BY CASE WHEN c.last_activity_ms IS NULL THEN 1 ELSE 0 END, \
                  c.last_activity_ms DESC, \
                  c.created_at_ms DESC"
    );
    let mut stmt = conn.prepare(&sql)?;

    let summaries = stmt
        .query_map(rusqlite::params![viewer], |row| summary_from_row(viewer, row))?
        .filter_map(|r| r.ok())
        .collect();

    Ok(summaries)
}

/// One conversation by room id, viewer-scoped. None if the room does not exist.
pub(crate) fn load_summary(
    conn: &Connection,
    viewer: &str,
    room_id: &str,
) -> Result<Option<ConversationSummary>, ChatError> {
    let sql = format!("SELECT {SUMMARY_COLUMNS} {SUMMARY_JOINS} WHERE c.room_id = ?2");
    let summary = conn
        .prepare(&sql)?
        .query_row(rusqlite::params![viewer, room_id], |row| {
            summary_from_row(viewer, row)
        })
        .optional()?;

    Ok(summary)
}

/// The participant pair of a room, or None if the room does not exist.
pub(crate) fn participants(
    conn: &Connection,
    room_id: &str,
) -> Result<Option<(String, String)>, ChatError> {
    let pair = conn
        .query_row(
            "SELECT participant_a, participant_b FROM conversations WHERE room_id = ?1",
            rusqlite::params![room_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    Ok(pair)
}

/// Get or create the conversation between the caller and a partner.
///
/// The partner must exist in the directory; a self-pair is rejected before
/// that lookup. Returns the caller's view plus, on fresh creation, the
/// partner's view for the `conversation.created` fan-out (None when the
/// room already existed — repeat calls return the row unchanged).
pub(crate) fn get_or_create(
    conn: &Connection,
    caller: &str,
    partner_id: &str,
) -> Result<(ConversationSummary, Option<ConversationSummary>), ChatError> {
    let room_id = room::room_id(caller, partner_id)?;
    let partner = directory::require_profile(conn, partner_id)?;

    if let Some(existing) = load_summary(conn, caller, &room_id)? {
        return Ok((existing, None));
    }

    let (participant_a, participant_b) = room::sorted_pair(caller, partner_id);
    let now = db::now_millis();
    conn.execute(
        "INSERT INTO conversations (room_id, participant_a, participant_b, created_at_ms) \
         VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![room_id, participant_a, participant_b, now],
    )?;

    tracing::info!(
        room_id = %room_id,
        participant_a = %participant_a,
        participant_b = %participant_b,
        "Conversation created"
    );

    let caller_profile = directory::find_profile(conn, caller)?.unwrap_or_else(|| Profile {
        user_id: caller.to_string(),
        display_name: "Unknown".to_string(),
        avatar_url: None,
    });

    let caller_view = ConversationSummary {
        room_id: room_id.clone(),
        partner,
        created_at_ms: now,
        last_activity_ms: None,
        last_message: None,
        unread_count: 0,
    };
    let partner_view = ConversationSummary {
        room_id,
        partner: caller_profile,
        created_at_ms: now,
        last_activity_ms: None,
        last_message: None,
        unread_count: 0,
    };

    Ok((caller_view, Some(partner_view)))
}

fn created_envelope(
    request_id: &str,
    conversation: ConversationSummary,
    history: Vec<MessageRecord>,
) -> ServerEnvelope {
    ServerEnvelope {
        request_id: request_id.to_string(),
        event: ServerEvent::ConversationCreated {
            conversation,
            history,
        },
    }
}

/// `conversation.create` over the socket.
///
/// The originating session is acknowledged with a request-id echo carrying
/// recent history; on fresh creation both participants' other live
/// sessions learn about the new room too.
pub async fn create_from_session(
    state: &AppState,
    user_id: &str,
    session_id: &str,
    request_id: &str,
    partner_id: &str,
) -> Result<(), ChatError> {
    let db = state.db.clone();
    let sessions = state.sessions.clone();
    let caller = user_id.to_string();
    let origin = session_id.to_string();
    let req_id = request_id.to_string();
    let partner = partner_id.to_string();

    tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|_| ChatError::Internal("database lock poisoned".to_string()))?;

        let (caller_view, partner_view) = get_or_create(&conn, &caller, &partner)?;

        if let Some(partner_view) = partner_view {
            // Fresh room: tell every session on both sides.
            sessions.send_to_session(
                &caller,
                &origin,
                &created_envelope(&req_id, caller_view.clone(), Vec::new()),
            );
            sessions.send_to_user_except(
                &caller,
                &origin,
                &created_envelope("", caller_view, Vec::new()),
            );
            sessions.send_to_user(&partner, &created_envelope("", partner_view, Vec::new()));
        } else {
            // Existing room: only the asking session needs it, with enough
            // history to render the thread.
            let history =
                messages::recent_messages(&conn, &caller_view.room_id, messages::DEFAULT_LIMIT)?;
            sessions.send_to_session(
                &caller,
                &origin,
                &created_envelope(&req_id, caller_view, history),
            );
        }

        Ok::<(), ChatError>(())
    })
    .await
    .map_err(|_| ChatError::Internal("database task failed".to_string()))??;

    Ok(())
}

// --- REST handlers ---

/// GET /api/conversations — list the caller's conversations.
/// JWT auth required. This is also the reconnect recovery path: the list
/// carries last_message and unread counts accumulated while offline.
pub async fn list_conversations(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<Vec<ConversationSummary>>, ChatError> {
    let db = state.db.clone();
    let viewer = claims.sub.clone();

    let summaries = tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|_| ChatError::Internal("database lock poisoned".to_string()))?;
        list_summaries(&conn, &viewer)
    })
    .await
    .map_err(|_| ChatError::Internal("database task failed".to_string()))??;

    Ok(Json(summaries))
}

/// POST /api/conversations — get or create a conversation with a partner.
/// JWT auth required. Body: { "partner_id": "..." }.
/// Returns 201 with the caller's view on creation, 200 if it already existed.
pub async fn create_conversation(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<CreateConversationRequest>,
) -> Result<(StatusCode, Json<ConversationSummary>), ChatError> {
    let db = state.db.clone();
    let caller = claims.sub.clone();
    let partner_id = body.partner_id.clone();
    let caller_claims = claims.clone();

    let (caller_view, partner_view) = tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|_| ChatError::Internal("database lock poisoned".to_string()))?;

        // The marketplace UI may hit this before the user ever opened a
        // socket, so make sure the caller is in the directory first.
        directory::ensure_profile(&conn, &caller_claims)?;
        get_or_create(&conn, &caller, &partner_id)
    })
    .await
    .map_err(|_| ChatError::Internal("database task failed".to_string()))??;

    if let Some(partner_view) = partner_view {
        // Fresh room: push the event to both participants' live sessions.
        state
            .sessions
            .send_to_user(&claims.sub, &created_envelope("", caller_view.clone(), Vec::new()));
        state
            .sessions
            .send_to_user(&body.partner_id, &created_envelope("", partner_view, Vec::new()));

        Ok((StatusCode::CREATED, Json(caller_view)))
    } else {
        Ok((StatusCode::OK, Json(caller_view)))
    }
}
