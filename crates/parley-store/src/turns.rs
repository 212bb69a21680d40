use chrono::Utc;
use tracing::{debug, instrument};

use parley_core::{AnswerId, ChatId, HistoryWindow, NewTurn, QuestionId, Turn, UserId};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

#[derive(Clone)]
pub struct TurnRepo {
    db: Database,
}

impl TurnRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Last turns of a chat owned by `user_id` with the given tag, oldest first.
    #[instrument(skip(self), fields(chat_id = %chat_id, user_id = %user_id))]
    pub fn history(
        &self,
        chat_id: ChatId,
        user_id: &UserId,
        window: HistoryWindow,
        tag: &str,
    ) -> Result<Vec<Turn>, StoreError> {
        // SQLite treats a negative LIMIT as unbounded.
        let limit: i64 = match window {
            HistoryWindow::All => -1,
            HistoryWindow::Last(n) => i64::try_from(n).unwrap_or(i64::MAX),
        };

        let mut turns = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT q.id, a.id, q.question, a.answer, q.tag
                 FROM questions q
                 JOIN answers a ON a.id = q.answer_id
                 JOIN chats c ON c.id = q.chat_id
                 WHERE q.chat_id = ?1 AND c.user_id = ?2 AND q.tag = ?3
                 ORDER BY q.id DESC
                 LIMIT ?4",
            )?;
            let mut rows =
                stmt.query(rusqlite::params![chat_id.get(), user_id.as_str(), tag, limit])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(Turn {
                    question_id: QuestionId::new(row_helpers::get(row, 0, "questions", "id")?),
                    answer_id: AnswerId::new(row_helpers::get(row, 1, "answers", "id")?),
                    question: row_helpers::get(row, 2, "questions", "question")?,
                    answer: row_helpers::get(row, 3, "answers", "answer")?,
                    tag: row_helpers::get(row, 4, "questions", "tag")?,
                });
            }
            Ok(out)
        })?;
        turns.reverse();
        debug!(count = turns.len(), "history loaded");
        Ok(turns)
    }

    /// Insert an empty answer and its question in one transaction.
    #[instrument(skip(self, turn), fields(chat_id = %turn.chat_id))]
    pub fn allocate_empty(&self, turn: &NewTurn) -> Result<(QuestionId, AnswerId), StoreError> {
        let question_time = turn.question_time.to_rfc3339();
        self.db.with_tx(|tx| {
            tx.execute(
                "INSERT INTO answers (chat_id, answer, answer_time) VALUES (?1, '', ?2)",
                rusqlite::params![turn.chat_id.get(), question_time],
            )?;
            let answer_id = AnswerId::new(tx.last_insert_rowid());

            tx.execute(
                "INSERT INTO questions (chat_id, answer_id, question, question_time, tag, voice_url, file_url)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    turn.chat_id.get(),
                    answer_id.get(),
                    turn.question,
                    question_time,
                    turn.tag,
                    turn.voice_url,
                    turn.file_url,
                ],
            )?;
            let question_id = QuestionId::new(tx.last_insert_rowid());
            debug!(%question_id, %answer_id, "empty turn allocated");
            Ok((question_id, answer_id))
        })
    }

    #[instrument(skip(self, text), fields(answer_id = %answer_id, len = text.len()))]
    pub fn update_answer(&self, answer_id: AnswerId, text: &str) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE answers SET answer = ?1, answer_time = ?2 WHERE id = ?3",
                rusqlite::params![text, now, answer_id.get()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("answer {answer_id}")));
            }
            Ok(())
        })
    }

    #[instrument(skip(self, text), fields(answer_id = %answer_id, question_id = %question_id))]
    pub fn update_answer_and_tag(
        &self,
        answer_id: AnswerId,
        question_id: QuestionId,
        text: &str,
        tag: &str,
    ) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        self.db.with_tx(|tx| {
            let changed = tx.execute(
                "UPDATE answers SET answer = ?1, answer_time = ?2 WHERE id = ?3",
                rusqlite::params![text, now, answer_id.get()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("answer {answer_id}")));
            }
            let changed = tx.execute(
                "UPDATE questions SET tag = ?1 WHERE id = ?2 AND answer_id = ?3",
                rusqlite::params![tag, question_id.get(), answer_id.get()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("question {question_id}")));
            }
            Ok(())
        })
    }

    /// Look up one turn by its answer id.
    #[instrument(skip(self), fields(answer_id = %answer_id))]
    pub fn get(&self, answer_id: AnswerId) -> Result<Turn, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT q.id, a.id, q.question, a.answer, q.tag
                 FROM questions q JOIN answers a ON a.id = q.answer_id
                 WHERE a.id = ?1",
                [answer_id.get()],
                |row| {
                    Ok(Turn {
                        question_id: QuestionId::new(row.get(0)?),
                        answer_id: AnswerId::new(row.get(1)?),
                        question: row.get(2)?,
                        answer: row.get(3)?,
                        tag: row.get(4)?,
                    })
                },
            )
            .map_err(row_helpers::not_found_as(format!("answer {answer_id}")))
        })
    }
}
