use rusqlite::params;

use crate::chats::load_chat;
use crate::database::{decode_ts, decode_uuid, encode_ts, now_ts, Database};
use crate::error::{Result, StoreError};
use crate::models::{Chat, ChatId, Message, MessageId, UserId};

impl Database {
    /// Append a message to a chat.
    ///
    /// In one transaction: inserts the message, refreshes the chat's
    /// `last_message` cache and resets `seen_by` to exactly `{sender}`.
    /// Returns the message and the updated chat. Text validation and the
    /// participant check are the caller's job.
    pub fn append_message(
        &mut self,
        chat_id: ChatId,
        sender: &UserId,
        text: &str,
    ) -> Result<(Message, Chat)> {
        let message = Message {
            id: MessageId::new(),
            chat_id,
            sender_ref: sender.clone(),
            text: text.to_string(),
            created_at: now_ts(),
        };
        let ts = encode_ts(&message.created_at);

        let tx = self.conn_mut().transaction()?;

        let updated = tx.execute(
            "UPDATE chats SET last_message = ?2, last_message_at = ?3 WHERE id = ?1",
            params![chat_id.to_string(), message.text, ts],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound);
        }

        tx.execute(
            "INSERT INTO messages (id, chat_id, sender_id, text, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                message.id.to_string(),
                chat_id.to_string(),
                sender.as_str(),
                message.text,
                ts,
            ],
        )?;
        tx.execute(
            "DELETE FROM chat_seen_by WHERE chat_id = ?1",
            params![chat_id.to_string()],
        )?;
        tx.execute(
            "INSERT INTO chat_seen_by (chat_id, user_id) VALUES (?1, ?2)",
            params![chat_id.to_string(), sender.as_str()],
        )?;

        let chat = load_chat(&tx, chat_id)?;
        tx.commit()?;

        Ok((message, chat))
    }

    /// All messages of a chat, oldest first.
    pub fn messages_for_chat(&self, chat_id: ChatId) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, chat_id, sender_id, text, created_at
             FROM messages
             WHERE chat_id = ?1
             ORDER BY created_at ASC, rowid ASC",
        )?;

        let rows = stmt.query_map(params![chat_id.to_string()], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let chat_id_str: String = row.get(1)?;
    let sender: String = row.get(2)?;
    let text: String = row.get(3)?;
    let ts_str: String = row.get(4)?;

    Ok(Message {
        id: MessageId(decode_uuid(0, &id_str)?),
        chat_id: ChatId(decode_uuid(1, &chat_id_str)?),
        sender_ref: UserId(sender),
        text,
        created_at: decode_ts(4, &ts_str)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_resets_seen_by_to_sender() {
        let mut db = Database::open_in_memory().unwrap();
        let (a, b): (UserId, UserId) = ("alice".into(), "bob".into());
        let chat = db.create_chat(&a, &b).unwrap();
        db.mark_seen(chat.id, &b).unwrap();

        let (_, updated) = db.append_message(chat.id, &b, "hi").unwrap();
        assert_eq!(updated.seen_by.iter().collect::<Vec<_>>(), vec![&b]);
        assert_eq!(updated.last_message.as_deref(), Some("hi"));
        assert!(updated.last_message_at.is_some());

        let (_, updated) = db.append_message(chat.id, &a, "hey").unwrap();
        assert_eq!(updated.seen_by.iter().collect::<Vec<_>>(), vec![&a]);
        assert_eq!(db.get_chat(chat.id).unwrap(), updated);
    }

    #[test]
    fn messages_come_back_in_creation_order() {
        let mut db = Database::open_in_memory().unwrap();
        let (a, b): (UserId, UserId) = ("alice".into(), "bob".into());
        let chat = db.create_chat(&a, &b).unwrap();

        for i in 0..20 {
            let sender = if i % 2 == 0 { &a } else { &b };
            db.append_message(chat.id, sender, &format!("m{i}")).unwrap();
        }

        let messages = db.messages_for_chat(chat.id).unwrap();
        let texts: Vec<_> = messages.iter().map(|m| m.text.as_str()).collect();
        let expected: Vec<_> = (0..20).map(|i| format!("m{i}")).collect();
        assert_eq!(texts, expected);
        assert!(messages.windows(2).all(|w| w[0].created_at <= w[1].created_at));
    }

    #[test]
    fn append_to_unknown_chat_is_not_found_and_writes_nothing() {
        let mut db = Database::open_in_memory().unwrap();
        let ghost = ChatId::new();
        let err = db.append_message(ghost, &"alice".into(), "hi").unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
        assert!(db.messages_for_chat(ghost).unwrap().is_empty());
    }

    #[test]
    fn appended_message_equals_stored_copy() {
        let mut db = Database::open_in_memory().unwrap();
        let chat = db.create_chat(&"a".into(), &"b".into()).unwrap();
        let (msg, updated) = db.append_message(chat.id, &"a".into(), "ping").unwrap();

        assert_eq!(db.messages_for_chat(chat.id).unwrap(), vec![msg.clone()]);
        assert_eq!(updated.last_message_at, Some(msg.created_at));
        assert_eq!(db.get_chat(chat.id).unwrap(), updated);
    }
}
