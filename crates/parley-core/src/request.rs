use serde::{Deserialize, Serialize};

use crate::ids::ChatId;
use crate::turn::Turn;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// One role-tagged message in the outbound conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub role: Role,
    pub content: String,
}

impl HistoryEntry {
    pub fn user(id: i64, content: impl Into<String>) -> Self {
        Self {
            id,
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(id: i64, content: impl Into<String>) -> Self {
        Self {
            id,
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Body of the outbound streaming call to the model backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRequest {
    pub messages: Vec<HistoryEntry>,
    /// Sent as a string; the backend treats it as an opaque key.
    pub chat_id: String,
    pub tag: String,
    pub mode: String,
    pub file_url: String,
    pub is_voice: bool,
}

impl StreamRequest {
    /// Assemble a request from prior turns (oldest first) plus the new user entry.
    pub fn build(chat_id: ChatId, history: &[Turn], question: HistoryEntry) -> StreamRequestBuilder {
        let mut messages = Vec::with_capacity(history.len() * 2 + 1);
        for turn in history {
            messages.extend(turn.entries());
        }
        messages.push(question);
        StreamRequestBuilder {
            inner: StreamRequest {
                messages,
                chat_id: chat_id.to_string(),
                tag: String::new(),
                mode: String::new(),
                file_url: String::new(),
                is_voice: false,
            },
        }
    }

}

pub struct StreamRequestBuilder {
    inner: StreamRequest,
}

impl StreamRequestBuilder {
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.inner.tag = tag.into();
        self
    }

    pub fn mode(mut self, mode: impl Into<String>) -> Self {
        self.inner.mode = mode.into();
        self
    }

    pub fn file_url(mut self, url: impl Into<String>) -> Self {
        self.inner.file_url = url.into();
        self
    }

    /// Marks the request as voice-originated when a voice reference is present.
    pub fn voice_url(mut self, url: &str) -> Self {
        self.inner.is_voice = !url.is_empty();
        self
    }

    pub fn finish(self) -> StreamRequest {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{AnswerId, QuestionId};

    fn turn(q: i64, a: i64, question: &str, answer: &str) -> Turn {
        Turn {
            question_id: QuestionId::new(q),
            answer_id: AnswerId::new(a),
            question: question.into(),
            answer: answer.into(),
            tag: String::new(),
        }
    }

    #[test]
    fn history_expands_to_user_assistant_pairs() {
        let history = vec![turn(1, 2, "hi", "hello"), turn(3, 4, "how?", "fine")];
        let req = StreamRequest::build(ChatId::new(5), &history, HistoryEntry::user(6, "next"))
            .tag("general")
            .finish();

        let roles: Vec<Role> = req.messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::User, Role::Assistant, Role::User]
        );
        assert_eq!(req.messages[0].content, "hi");
        assert_eq!(req.messages[1].id, 2);
        assert_eq!(req.messages.last().map(|m| m.content.as_str()), Some("next"));
        assert_eq!(req.chat_id, "5");
    }

    #[test]
    fn voice_flag_follows_voice_url() {
        let req = StreamRequest::build(ChatId::new(1), &[], HistoryEntry::user(1, "q"))
            .voice_url("https://cdn/voice.ogg")
            .finish();
        assert!(req.is_voice);

        let req = StreamRequest::build(ChatId::new(1), &[], HistoryEntry::user(1, "q"))
            .voice_url("")
            .finish();
        assert!(!req.is_voice);
    }

    #[test]
    fn serializes_wire_shape() {
        let req = StreamRequest::build(ChatId::new(9), &[], HistoryEntry::user(3, "q"))
            .tag("t")
            .mode("fast")
            .file_url("f.pdf")
            .finish();
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["messages"][0]["role"], "user");
        assert_eq!(v["messages"][0]["id"], 3);
        assert_eq!(v["chat_id"], "9");
        assert_eq!(v["mode"], "fast");
        assert_eq!(v["file_url"], "f.pdf");
        assert_eq!(v["is_voice"], false);
    }
}
