//! Chat threads, their participants and their seen-by sets.

use std::collections::BTreeSet;

use rusqlite::{params, Connection, OptionalExtension};

use crate::database::{decode_ts, decode_uuid, encode_ts, now_ts, Database};
use crate::error::{Result, StoreError};
use crate::models::{Chat, ChatId, UserId};

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Create a new chat between `initiator` and `receiver`.
    ///
    /// Always inserts a fresh record, even if the pair already has a chat.
    /// The initiator starts in `seen_by`; the receiver sees the chat as
    /// unread.
    pub fn create_chat(&mut self, initiator: &UserId, receiver: &UserId) -> Result<Chat> {
        let chat = Chat {
            id: ChatId::new(),
            participant_refs: vec![initiator.clone(), receiver.clone()],
            seen_by: BTreeSet::from([initiator.clone()]),
            last_message: None,
            last_message_at: None,
            created_at: now_ts(),
        };

        let tx = self.conn_mut().transaction()?;
        tx.execute(
            "INSERT INTO chats (id, last_message, last_message_at, created_at)
             VALUES (?1, NULL, NULL, ?2)",
            params![chat.id.to_string(), encode_ts(&chat.created_at)],
        )?;
        for (position, user) in chat.participant_refs.iter().enumerate() {
            tx.execute(
                "INSERT INTO chat_participants (chat_id, user_id, position) VALUES (?1, ?2, ?3)",
                params![chat.id.to_string(), user.as_str(), position as i64],
            )?;
        }
        tx.execute(
            "INSERT INTO chat_seen_by (chat_id, user_id) VALUES (?1, ?2)",
            params![chat.id.to_string(), initiator.as_str()],
        )?;
        tx.commit()?;

        tracing::debug!(chat = %chat.id, initiator = %initiator, receiver = %receiver, "chat created");
        Ok(chat)
    }

    /// Return the oldest chat between `a` and `b`, creating one if none
    /// exists. The flag is `true` when a new chat was created.
    pub fn find_or_create_chat(&mut self, a: &UserId, b: &UserId) -> Result<(Chat, bool)> {
        if let Some(existing) = self.find_chat_between(a, b)? {
            return Ok((existing, false));
        }
        Ok((self.create_chat(a, b)?, true))
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_chat(&self, id: ChatId) -> Result<Chat> {
        load_chat(self.conn(), id)
    }

    /// Oldest chat whose participants are exactly `a` and `b`.
    pub fn find_chat_between(&self, a: &UserId, b: &UserId) -> Result<Option<Chat>> {
        let id: Option<String> = self
            .conn()
            .query_row(
                "SELECT c.id
                 FROM chats c
                 JOIN chat_participants p1 ON p1.chat_id = c.id AND p1.user_id = ?1
                 JOIN chat_participants p2 ON p2.chat_id = c.id AND p2.user_id = ?2
                 ORDER BY c.created_at ASC, c.rowid ASC
                 LIMIT 1",
                params![a.as_str(), b.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        match id {
            Some(id) => Ok(Some(load_chat(self.conn(), ChatId(uuid::Uuid::parse_str(&id)?))?)),
            None => Ok(None),
        }
    }

    /// All chats `user` participates in, most recently active first.
    pub fn list_chats_for_user(&self, user: &UserId) -> Result<Vec<Chat>> {
        let mut stmt = self.conn().prepare(
            "SELECT c.id
             FROM chats c
             JOIN chat_participants p ON p.chat_id = c.id
             WHERE p.user_id = ?1
             ORDER BY COALESCE(c.last_message_at, c.created_at) DESC, c.rowid DESC",
        )?;

        let ids = stmt.query_map(params![user.as_str()], |row| {
            let raw: String = row.get(0)?;
            decode_uuid(0, &raw)
        })?;

        let mut chats = Vec::new();
        for id in ids {
            chats.push(load_chat(self.conn(), ChatId(id?))?);
        }
        Ok(chats)
    }

    pub fn is_participant(&self, chat_id: ChatId, user: &UserId) -> Result<bool> {
        let found: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM chat_participants WHERE chat_id = ?1 AND user_id = ?2",
                params![chat_id.to_string(), user.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    // ------------------------------------------------------------------
    // Seen-by
    // ------------------------------------------------------------------

    /// Ensure `user` is in the chat's seen-by set.
    ///
    /// Returns `true` if the user was added, `false` if already present.
    pub fn mark_seen(&self, chat_id: ChatId, user: &UserId) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO chat_seen_by (chat_id, user_id) VALUES (?1, ?2)",
            params![chat_id.to_string(), user.as_str()],
        )?;
        Ok(affected > 0)
    }

    /// Number of chats `user` participates in without being in `seen_by`.
    pub fn count_unseen_chats(&self, user: &UserId) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*)
             FROM chat_participants p
             WHERE p.user_id = ?1
               AND NOT EXISTS (
                   SELECT 1 FROM chat_seen_by s
                   WHERE s.chat_id = p.chat_id AND s.user_id = ?1
               )",
            params![user.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Load a chat row together with its participants and seen-by set.
pub(crate) fn load_chat(conn: &Connection, id: ChatId) -> Result<Chat> {
    let (last_message, last_message_at, created_str): (Option<String>, Option<String>, String) =
        conn.query_row(
            "SELECT last_message, last_message_at, created_at FROM chats WHERE id = ?1",
            params![id.to_string()],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
            other => StoreError::Sqlite(other),
        })?;

    let mut stmt = conn.prepare(
        "SELECT user_id FROM chat_participants WHERE chat_id = ?1 ORDER BY position ASC",
    )?;
    let participant_refs = stmt
        .query_map(params![id.to_string()], |row| row.get::<_, String>(0).map(UserId))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut stmt = conn.prepare("SELECT user_id FROM chat_seen_by WHERE chat_id = ?1")?;
    let seen_by = stmt
        .query_map(params![id.to_string()], |row| row.get::<_, String>(0).map(UserId))?
        .collect::<rusqlite::Result<BTreeSet<_>>>()?;

    Ok(Chat {
        id,
        participant_refs,
        seen_by,
        last_message,
        last_message_at: last_message_at
            .as_deref()
            .map(|raw| decode_ts(1, raw))
            .transpose()?,
        created_at: decode_ts(2, &created_str)?,
    })
}
