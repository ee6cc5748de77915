//! CRUD operations for [`User`] records.

use rusqlite::{params, OptionalExtension};

use crate::database::{decode_ts, encode_ts, now_ts, Database};
use crate::error::{Result, StoreError};
use crate::models::{User, UserId, UserProfile};

impl Database {
    /// Insert the user if unknown. An existing row is left untouched,
    /// except that a missing username is filled from `username`.
    pub fn ensure_user(&self, id: &UserId, username: Option<&str>) -> Result<()> {
        self.conn().execute(
            "INSERT INTO users (id, username, avatar, created_at)
             VALUES (?1, ?2, NULL, ?3)
             ON CONFLICT(id) DO UPDATE SET username = COALESCE(users.username, excluded.username)",
            params![id.as_str(), username, encode_ts(&now_ts())],
        )?;
        Ok(())
    }

    /// Set the public profile fields. `None` keeps the current value.
    pub fn update_profile(
        &self,
        id: &UserId,
        username: Option<&str>,
        avatar: Option<&str>,
    ) -> Result<User> {
        let affected = self.conn().execute(
            "UPDATE users
             SET username = COALESCE(?2, username),
                 avatar   = COALESCE(?3, avatar)
             WHERE id = ?1",
            params![id.as_str(), username, avatar],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        self.get_user(id)
    }

    pub fn get_user(&self, id: &UserId) -> Result<User> {
        self.find_user(id)?.ok_or(StoreError::NotFound)
    }

    pub fn find_user(&self, id: &UserId) -> Result<Option<User>> {
        let user = self
            .conn()
            .query_row(
                "SELECT id, username, avatar, created_at FROM users WHERE id = ?1",
                params![id.as_str()],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    pub fn get_profile(&self, id: &UserId) -> Result<Option<UserProfile>> {
        Ok(self.find_user(id)?.map(|u| u.profile()))
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let id: String = row.get(0)?;
    let username: Option<String> = row.get(1)?;
    let avatar: Option<String> = row.get(2)?;
    let created_str: String = row.get(3)?;

    Ok(User {
        id: UserId(id),
        username,
        avatar,
        created_at: decode_ts(3, &created_str)?,
    })
}
