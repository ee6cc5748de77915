use rusqlite::Connection;

// Chat list is ordered by last activity.
const UP_SQL: &str = r#"
CREATE INDEX IF NOT EXISTS idx_chats_activity
    ON chats(COALESCE(last_message_at, created_at) DESC);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
