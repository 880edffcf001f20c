pub mod actor;
pub mod handler;
pub mod protocol;

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::session::protocol::ServerEnvelope;

/// Type alias for the sender half of a session's outbound channel.
/// Other parts of the system can clone this to push events to a specific tab.
pub type SessionSender = mpsc::UnboundedSender<axum::extract::ws::Message>;

/// Lifecycle of a connection session, as surfaced in logs.
/// `Connecting` covers the upgrade + token validation window; a session
/// that fails validation goes to `Errored` and never registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Connected,
    Disconnected,
    Errored,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Disconnected => "disconnected",
            SessionState::Errored => "errored",
        };
        f.write_str(s)
    }
}

/// One live authenticated WebSocket (one browser tab or device).
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub session_id: String,
    pub sender: SessionSender,
}

/// Session registry: all live sessions keyed by user id.
/// A user can have multiple concurrent sessions (multiple devices/tabs).
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<DashMap<String, Vec<SessionHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
        }
    }

    /// Add a session on successful handshake.
    pub fn register(&self, user_id: &str, handle: SessionHandle) {
        let session_id = handle.session_id.clone();
        self.inner.entry(user_id.to_string()).or_default().push(handle);

        let count = self.inner.get(user_id).map(|v| v.len()).unwrap_or(0);
        tracing::debug!(
            user_id = %user_id,
            session_id = %session_id,
            sessions = count,
            "Session registered"
        );
    }

    /// Remove a session on teardown. Also drops any session whose channel
    /// is already closed, so a crashed actor cannot leak its handle.
    pub fn unregister(&self, user_id: &str, session_id: &str) {
        let mut remove_user = false;

        if let Some(mut sessions) = self.inner.get_mut(user_id) {
            sessions.retain(|s| s.session_id != session_id && !s.sender.is_closed());
            if sessions.is_empty() {
                remove_user = true;
            }
        }

        if remove_user {
            self.inner.remove(user_id);
        }

        tracing::debug!(
            user_id = %user_id,
            session_id = %session_id,
            "Session unregistered"
        );
    }

    /// Send an event to every live session of a user.
    /// Sessions that are gone are skipped; nothing is queued for later.
    pub fn send_to_user(&self, user_id: &str, envelope: &ServerEnvelope) {
        let Some(msg) = encode(envelope) else { return };

        if let Some(sessions) = self.inner.get(user_id) {
            for session in sessions.value().iter() {
                let _ = session.sender.send(msg.clone());
            }
        }
    }

    /// Send an event to one specific session of a user.
    pub fn send_to_session(&self, user_id: &str, session_id: &str, envelope: &ServerEnvelope) {
        let Some(msg) = encode(envelope) else { return };

        if let Some(sessions) = self.inner.get(user_id) {
            for session in sessions.value().iter() {
                if session.session_id == session_id {
                    let _ = session.sender.send(msg.clone());
                }
            }
        }
    }

    /// Send an event to every session of a user except the named one.
    /// Used to echo a sender's message to their other open tabs.
    pub fn send_to_user_except(
        &self,
        user_id: &str,
        skip_session_id: &str,
        envelope: &ServerEnvelope,
    ) {
        let Some(msg) = encode(envelope) else { return };

        if let Some(sessions) = self.inner.get(user_id) {
            for session in sessions.value().iter() {
                if session.session_id != skip_session_id {
                    let _ = session.sender.send(msg.clone());
                }
            }
        }
    }
}

/// Serialize an envelope into a text frame once; callers clone it per session.
pub(crate) fn encode(envelope: &ServerEnvelope) -> Option<axum::extract::ws::Message> {
    match serde_json::to_string(envelope) {
        Ok(json) => Some(axum::extract::ws::Message::Text(json.into())),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize server event");
            None
        }
    }
}
