use chrono::Utc;
use rusqlite::OptionalExtension;
use tracing::instrument;

use parley_core::{ChatId, UserId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatRow {
    pub id: ChatId,
    pub user_id: UserId,
    pub name: String,
    pub created_at: String,
}

#[derive(Clone)]
pub struct ChatRepo {
    db: Database,
}

impl ChatRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn create(&self, user_id: &UserId, name: &str) -> Result<ChatRow, StoreError> {
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO chats (user_id, name, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![user_id.as_str(), name, now],
            )?;
            Ok(ChatRow {
                id: ChatId::new(conn.last_insert_rowid()),
                user_id: user_id.clone(),
                name: name.to_string(),
                created_at: now.clone(),
            })
        })
    }

    #[instrument(skip(self), fields(chat_id = %id))]
    pub fn get(&self, id: ChatId) -> Result<ChatRow, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT id, user_id, name, created_at FROM chats WHERE id = ?1",
                [id.get()],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .map_err(row_helpers::not_found_as(format!("chat {id}")))
            .map(|(id, user, name, created_at)| ChatRow {
                id: ChatId::new(id),
                user_id: UserId::from_raw(user),
                name,
                created_at,
            })
        })
    }

    /// Whether `chat_id` exists and is owned by `user_id`.
    #[instrument(skip(self), fields(user_id = %user_id, chat_id = %chat_id))]
    pub fn belongs_to(&self, user_id: &UserId, chat_id: ChatId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let owner: Option<String> = conn
                .query_row("SELECT user_id FROM chats WHERE id = ?1", [chat_id.get()], |row| {
                    row.get(0)
                })
                .optional()?;
            Ok(owner.as_deref() == Some(user_id.as_str()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> ChatRepo {
        ChatRepo::new(Database::in_memory().unwrap())
    }

    #[test]
    fn create_and_get() {
        let repo = repo();
        let user = UserId::from_raw("alice");
        let chat = repo.create(&user, "Groceries").unwrap();
        let fetched = repo.get(chat.id).unwrap();
        assert_eq!(fetched, chat);
    }

    #[test]
    fn get_missing_is_not_found() {
        let err = repo().get(ChatId::new(404)).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn ownership() {
        let repo = repo();
        let alice = UserId::from_raw("alice");
        let bob = UserId::from_raw("bob");
        let chat = repo.create(&alice, "").unwrap();

        assert!(repo.belongs_to(&alice, chat.id).unwrap());
        assert!(!repo.belongs_to(&bob, chat.id).unwrap());
        assert!(!repo.belongs_to(&alice, ChatId::new(999)).unwrap());
    }

    #[test]
    fn ids_increase() {
        let repo = repo();
        let user = UserId::from_raw("u");
        let a = repo.create(&user, "a").unwrap();
        let b = repo.create(&user, "b").unwrap();
        assert!(b.id > a.id);
    }
}
