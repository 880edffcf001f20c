use crate::db::DbPool;
use crate::session::SessionRegistry;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection wrapped in Arc<Mutex>
    pub db: DbPool,
    /// Live WebSocket sessions per user
    pub sessions: SessionRegistry,
    /// HS256 secret for platform-issued session tokens (256-bit random key)
    pub session_secret: Vec<u8>,
    /// Token the platform presents on the directory sync endpoint
    pub service_token: String,
}
