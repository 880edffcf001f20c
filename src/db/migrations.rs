use rusqlite_migration::{Migrations, M};

/// Define all schema migrations.
/// Uses SQLite user_version pragma for tracking — no migration table needed.
pub fn migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(
        "-- Migration 1: directory profiles, conversations, messages

-- Participant directory, synced from the marketplace platform.
CREATE TABLE profiles (
    user_id TEXT PRIMARY KEY,
    display_name TEXT NOT NULL,
    avatar_url TEXT,
    email TEXT,
    updated_at_ms INTEGER NOT NULL
);

-- One row per unordered participant pair. room_id is derived from the
-- sorted pair; the UNIQUE constraint covers the same invariant.
CREATE TABLE conversations (
    room_id TEXT PRIMARY KEY,
    participant_a TEXT NOT NULL,
    participant_b TEXT NOT NULL,
    created_at_ms INTEGER NOT NULL,
    last_activity_ms INTEGER,
    last_message_id TEXT,
    UNIQUE(participant_a, participant_b)
);
CREATE INDEX idx_conversations_a ON conversations(participant_a);
CREATE INDEX idx_conversations_b ON conversations(participant_b);

-- seq is assigned server-side, contiguous per conversation.
-- Unread counts are derived from is_read at query time, never stored.
CREATE TABLE messages (
    id TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL,
    seq INTEGER NOT NULL,
    sender_id TEXT NOT NULL,
    recipient_id TEXT NOT NULL,
    body TEXT NOT NULL,
    created_at_ms INTEGER NOT NULL,
    is_read INTEGER NOT NULL DEFAULT 0,
    FOREIGN KEY (conversation_id) REFERENCES conversations(room_id) ON DELETE CASCADE,
    UNIQUE(conversation_id, seq)
);
CREATE INDEX idx_messages_conv_seq ON messages(conversation_id, seq);
CREATE INDEX idx_messages_unread ON messages(conversation_id, recipient_id, is_read);
",
    )])
}
