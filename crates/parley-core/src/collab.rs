//! Seams to the persistence layer. The stream orchestrator only talks to these
//! traits; `parley-store` provides the SQLite implementation.

use async_trait::async_trait;

use crate::errors::RepositoryError;
use crate::ids::{AnswerId, ChatId, QuestionId, UserId};
use crate::turn::{HistoryWindow, NewTurn, Turn};

#[async_trait]
pub trait HistoryLookup: Send + Sync {
    /// Past turns of `chat_id` with the given routing tag, oldest first.
    async fn get(
        &self,
        chat_id: ChatId,
        user_id: &UserId,
        window: HistoryWindow,
        tag: &str,
    ) -> Result<Vec<Turn>, RepositoryError>;
}

#[async_trait]
pub trait ChatOwnership: Send + Sync {
    async fn belongs_to(&self, user_id: &UserId, chat_id: ChatId) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait TurnPersistence: Send + Sync {
    /// Insert a question with an empty answer and return both row ids.
    async fn allocate_empty_turn(&self, turn: NewTurn) -> Result<(QuestionId, AnswerId), RepositoryError>;

    async fn update_answer(&self, answer_id: AnswerId, text: &str) -> Result<(), RepositoryError>;

    /// Write the answer and re-tag its question in one step.
    async fn update_answer_and_tag(
        &self,
        answer_id: AnswerId,
        question_id: QuestionId,
        text: &str,
        tag: &str,
    ) -> Result<(), RepositoryError>;
}
