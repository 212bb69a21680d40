use async_trait::async_trait;

use parley_core::collab::{ChatOwnership, HistoryLookup, TurnPersistence};
use parley_core::{AnswerId, ChatId, HistoryWindow, NewTurn, QuestionId, RepositoryError, Turn, UserId};

use crate::chats::ChatRepo;
use crate::database::Database;
use crate::turns::TurnRepo;

/// SQLite-backed implementation of every collaborator the orchestrator needs.
#[derive(Clone)]
pub struct SqliteCollaborators {
    chats: ChatRepo,
    turns: TurnRepo,
}

impl SqliteCollaborators {
    pub fn new(db: Database) -> Self {
        Self {
            chats: ChatRepo::new(db.clone()),
            turns: TurnRepo::new(db),
        }
    }

    pub fn chats(&self) -> &ChatRepo {
        &self.chats
    }

    pub fn turns(&self) -> &TurnRepo {
        &self.turns
    }
}

#[async_trait]
impl HistoryLookup for SqliteCollaborators {
    async fn get(
        &self,
        chat_id: ChatId,
        user_id: &UserId,
        window: HistoryWindow,
        tag: &str,
    ) -> Result<Vec<Turn>, RepositoryError> {
        Ok(self.turns.history(chat_id, user_id, window, tag)?)
    }
}

#[async_trait]
impl ChatOwnership for SqliteCollaborators {
    async fn belongs_to(&self, user_id: &UserId, chat_id: ChatId) -> Result<bool, RepositoryError> {
        Ok(self.chats.belongs_to(user_id, chat_id)?)
    }
}

#[async_trait]
impl TurnPersistence for SqliteCollaborators {
    async fn allocate_empty_turn(&self, turn: NewTurn) -> Result<(QuestionId, AnswerId), RepositoryError> {
        Ok(self.turns.allocate_empty(&turn)?)
    }

    async fn update_answer(&self, answer_id: AnswerId, text: &str) -> Result<(), RepositoryError> {
        Ok(self.turns.update_answer(answer_id, text)?)
    }

    async fn update_answer_and_tag(
        &self,
        answer_id: AnswerId,
        question_id: QuestionId,
        text: &str,
        tag: &str,
    ) -> Result<(), RepositoryError> {
        Ok(self.turns.update_answer_and_tag(answer_id, question_id, text, tag)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn traits_round_through_sqlite() {
        let store = SqliteCollaborators::new(Database::in_memory().unwrap());
        let user = UserId::from_raw("alice");
        let chat = store.chats().create(&user, "c").unwrap().id;

        assert!(store.belongs_to(&user, chat).await.unwrap());

        let (qid, aid) = store
            .allocate_empty_turn(NewTurn {
                chat_id: chat,
                question: "hello".into(),
                question_time: Utc::now(),
                tag: "general".into(),
                voice_url: String::new(),
                file_url: String::new(),
            })
            .await
            .unwrap();
        store.update_answer(aid, "hi there").await.unwrap();

        let history = HistoryLookup::get(&store, chat, &user, HistoryWindow::All, "general")
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].question_id, qid);
        assert_eq!(history[0].answer, "hi there");
    }

    #[tokio::test]
    async fn missing_answer_surfaces_as_not_found() {
        let store = SqliteCollaborators::new(Database::in_memory().unwrap());
        let err = store.update_answer(AnswerId::new(1), "x").await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound(_)));
    }
}
