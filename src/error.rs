//! Error taxonomy for the messaging core.
//!
//! Every fallible operation returns `ChatError`. Errors stay local to the
//! invoking session: REST handlers map them to HTTP status codes via
//! `IntoResponse`, WebSocket dispatch maps them to in-band error envelopes.
//! Nothing here is fatal to the process.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    /// Handshake claims rejected or the session token could not be validated.
    #[error("authentication failure: {0}")]
    AuthenticationFailure(String),

    /// Malformed input (empty body, bad participant pair) — rejected before
    /// any persistence or fan-out.
    #[error("validation error: {0}")]
    Validation(String),

    /// Partner identifier unknown to the directory.
    #[error("invalid participant: {0}")]
    InvalidParticipant(String),

    /// Caller is not a participant of the target conversation or message.
    #[error("forbidden: {0}")]
    Forbidden(&'static str),

    /// Conversation or message identifier unknown.
    #[error("not found: {0}")]
    NotFound(&'static str),

    #[error("database error: {0}")]
    Database(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ChatError {
    /// HTTP status for REST responses.
    pub fn status(&self) -> StatusCode {
        match self {
            ChatError::AuthenticationFailure(_) => StatusCode::UNAUTHORIZED,
            ChatError::Validation(_) => StatusCode::BAD_REQUEST,
            ChatError::InvalidParticipant(_) => StatusCode::NOT_FOUND,
            ChatError::Forbidden(_) => StatusCode::FORBIDDEN,
            ChatError::NotFound(_) => StatusCode::NOT_FOUND,
            ChatError::Database(_) | ChatError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Numeric code carried by in-band WebSocket error envelopes.
    /// Mirrors the HTTP mapping so clients handle both surfaces uniformly.
    pub fn ws_code(&self) -> u16 {
        self.status().as_u16()
    }
}

impl From<rusqlite::Error> for ChatError {
    fn from(err: rusqlite::Error) -> Self {
        ChatError::Database(err.to_string())
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
        }
        (status, self.to_string()).into_response()
    }
}
