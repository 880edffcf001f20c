//! Participant directory, synced from the marketplace platform.
//!
//! The platform is the source of truth for who exists; this server only
//! mirrors enough profile data to validate conversation partners and
//! decorate listings. Rows arrive through the service-token-gated sync
//! endpoint, plus a claims-derived upsert when a user connects (the token
//! carries name and email, never the avatar — sync owns that).

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::auth::middleware::Claims;
use crate::db;
use crate::error::ChatError;
use crate::state::AppState;

/// Public profile shape used in listings and notification payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProfileUpsert {
    pub user_id: String,
    pub display_name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

pub(crate) fn find_profile(
    conn: &Connection,
    user_id: &str,
) -> Result<Option<Profile>, ChatError> {
    let profile = conn
        .query_row(
            "SELECT user_id, display_name, avatar_url FROM profiles WHERE user_id = ?1",
            rusqlite::params![user_id],
            |row| {
                Ok(Profile {
                    user_id: row.get(0)?,
                    display_name: row.get(1)?,
                    avatar_url: row.get(2)?,
                })
            },
        )
        .optional()?;

    Ok(profile)
}

/// Look up a profile, rejecting ids the directory has never heard of.
pub(crate) fn require_profile(conn: &Connection, user_id: &str) -> Result<Profile, ChatError> {
    find_profile(conn, user_id)?
        .ok_or_else(|| ChatError::InvalidParticipant(format!("unknown participant {user_id}")))
}

fn upsert(conn: &Connection, profile: &ProfileUpsert) -> Result<(), ChatError> {
    conn.execute(
        "INSERT INTO profiles (user_id, display_name, avatar_url, email, updated_at_ms) \
         VALUES (?1, ?2, ?3, ?4, ?5) \
         ON CONFLICT(user_id) DO UPDATE SET \
             display_name = excluded.display_name, \
             avatar_url = excluded.avatar_url, \
             email = excluded.email, \
             updated_at_ms = excluded.updated_at_ms",
        rusqlite::params![
            profile.user_id,
            profile.display_name,
            profile.avatar_url,
            profile.email,
            db::now_millis(),
        ],
    )?;

    Ok(())
}

/// Make sure the connecting user exists in the directory, using what the
/// session token claims carry. Leaves any synced avatar alone.
pub(crate) fn ensure_profile(conn: &Connection, claims: &Claims) -> Result<(), ChatError> {
    conn.execute(
        "INSERT INTO profiles (user_id, display_name, email, updated_at_ms) \
         VALUES (?1, ?2, ?3, ?4) \
         ON CONFLICT(user_id) DO UPDATE SET \
             display_name = excluded.display_name, \
             email = excluded.email, \
             updated_at_ms = excluded.updated_at_ms",
        rusqlite::params![claims.sub, claims.name, claims.email, db::now_millis()],
    )?;

    Ok(())
}

/// POST /api/directory/profiles — bulk profile sync from the platform.
/// Gated by the X-Service-Token header, not user JWTs: only the
/// marketplace backend calls this.
pub async fn sync_profiles(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(profiles): Json<Vec<ProfileUpsert>>,
) -> Result<StatusCode, ChatError> {
    let presented = headers
        .get("x-service-token")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if presented.is_empty() || presented != state.service_token {
        return Err(ChatError::AuthenticationFailure(
            "invalid service token".to_string(),
        ));
    }

    for profile in &profiles {
        if profile.user_id.is_empty() || profile.display_name.is_empty() {
            return Err(ChatError::Validation(
                "profile user_id and display_name must be non-empty".to_string(),
            ));
        }
    }

    let db = state.db.clone();
    let count = profiles.len();

    tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|_| ChatError::Internal("database lock poisoned".to_string()))?;

        for profile in &profiles {
            upsert(&conn, profile)?;
        }

        Ok::<(), ChatError>(())
    })
    .await
    .map_err(|_| ChatError::Internal("database task failed".to_string()))??;

    tracing::info!(count = count, "Directory profiles synced");

    Ok(StatusCode::NO_CONTENT)
}
