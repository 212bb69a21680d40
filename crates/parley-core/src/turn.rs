use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{AnswerId, ChatId, QuestionId};
use crate::request::HistoryEntry;

/// A completed question/answer pair from chat history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub question_id: QuestionId,
    pub answer_id: AnswerId,
    pub question: String,
    pub answer: String,
    pub tag: String,
}

impl Turn {
    /// The (user, assistant) entries this turn contributes to a request.
    pub fn entries(&self) -> [HistoryEntry; 2] {
        [
            HistoryEntry::user(self.question_id.get(), self.question.clone()),
            HistoryEntry::assistant(self.answer_id.get(), self.answer.clone()),
        ]
    }
}

/// Everything needed to allocate an empty turn before dispatch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewTurn {
    pub chat_id: ChatId,
    pub question: String,
    pub question_time: DateTime<Utc>,
    pub tag: String,
    pub voice_url: String,
    pub file_url: String,
}

/// How many past turns to load into a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HistoryWindow {
    All,
    Last(usize),
}

impl HistoryWindow {
    /// Negative values mean the whole history.
    pub fn from_config(len: i64) -> Self {
        usize::try_from(len).map_or(Self::All, Self::Last)
    }
}

impl Default for HistoryWindow {
    fn default() -> Self {
        Self::Last(5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Role;

    #[test]
    fn window_from_config() {
        assert_eq!(HistoryWindow::from_config(-1), HistoryWindow::All);
        assert_eq!(HistoryWindow::from_config(0), HistoryWindow::Last(0));
        assert_eq!(HistoryWindow::from_config(7), HistoryWindow::Last(7));
    }

    #[test]
    fn turn_entries_use_row_ids() {
        let t = Turn {
            question_id: QuestionId::new(10),
            answer_id: AnswerId::new(11),
            question: "q".into(),
            answer: "a".into(),
            tag: "x".into(),
        };
        let [u, a] = t.entries();
        assert_eq!((u.id, u.role), (10, Role::User));
        assert_eq!((a.id, a.role, a.content.as_str()), (11, Role::Assistant, "a"));
    }
}
