//! v001 -- Initial schema creation.
//!
//! Creates the core tables: `users`, `chats`, `chat_participants`,
//! `chat_seen_by` and `messages`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users (public profile only; credentials live with the auth layer)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id         TEXT PRIMARY KEY NOT NULL,     -- JWT subject
    username   TEXT,
    avatar     TEXT,
    created_at TEXT NOT NULL                  -- RFC-3339, microseconds
);

-- ----------------------------------------------------------------
-- Chats
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chats (
    id              TEXT PRIMARY KEY NOT NULL, -- UUID v4
    last_message    TEXT,                      -- denormalized last body
    last_message_at TEXT,
    created_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS chat_participants (
    chat_id  TEXT NOT NULL,                   -- FK -> chats(id)
    user_id  TEXT NOT NULL,
    position INTEGER NOT NULL,                -- 0 = initiator, 1 = receiver

    PRIMARY KEY (chat_id, user_id),
    FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_chat_participants_user ON chat_participants(user_id);

CREATE TABLE IF NOT EXISTS chat_seen_by (
    chat_id TEXT NOT NULL,                    -- FK -> chats(id)
    user_id TEXT NOT NULL,

    PRIMARY KEY (chat_id, user_id),
    FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id         TEXT PRIMARY KEY NOT NULL,     -- UUID v4
    chat_id    TEXT NOT NULL,                 -- FK -> chats(id)
    sender_id  TEXT NOT NULL,
    text       TEXT NOT NULL,
    created_at TEXT NOT NULL,

    FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_chat_ts
    ON messages(chat_id, created_at ASC);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
