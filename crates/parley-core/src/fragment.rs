use serde::{Deserialize, Serialize};

/// One incremental unit of model output, as decoded from a `data:` line.
///
/// Only `message.content` and `done` matter to the relay; everything else is
/// carried for logging and defaults when absent.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Fragment {
    pub model: String,
    pub created_at: String,
    pub done: bool,
    pub done_reason: String,
    pub message: FragmentMessage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FragmentMessage {
    pub role: String,
    pub content: String,
    pub thinking: String,
}

impl Fragment {
    /// Convenience constructor for a non-terminal text delta.
    pub fn delta(content: impl Into<String>) -> Self {
        Self {
            message: FragmentMessage {
                role: "assistant".into(),
                content: content.into(),
                thinking: String::new(),
            },
            ..Self::default()
        }
    }

    /// Convenience constructor for a terminal fragment.
    pub fn terminal(content: impl Into<String>) -> Self {
        Self {
            done: true,
            done_reason: "stop".into(),
            ..Self::delta(content)
        }
    }

    pub fn with_file_url(mut self, url: impl Into<String>) -> Self {
        self.file_url = Some(url.into());
        self
    }

    pub fn content(&self) -> &str {
        &self.message.content
    }

    pub fn is_terminal(&self) -> bool {
        self.done
    }

    /// Attachment reference, if present and non-empty.
    pub fn attachment(&self) -> Option<&str> {
        self.file_url.as_deref().filter(|u| !u.is_empty())
    }

    /// Whether the fragment carries anything worth relaying.
    ///
    /// Non-terminal fragments with empty text are dropped by the transport
    /// before they reach a consumer, even when they carry an attachment. An
    /// attachment only surfaces through the terminal fragment.
    pub fn is_relayable(&self) -> bool {
        !self.message.content.is_empty() || self.done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_backend_shape() {
        let json = r#"{
            "model": "llama3",
            "created_at": "2025-01-01T00:00:00Z",
            "done": false,
            "done_reason": "",
            "message": {"role": "assistant", "content": "Hel", "thinking": ""},
            "eval_count": 12
        }"#;
        let f: Fragment = serde_json::from_str(json).unwrap();
        assert_eq!(f.model, "llama3");
        assert_eq!(f.content(), "Hel");
        assert!(!f.is_terminal());
        assert!(f.file_url.is_none());
    }

    #[test]
    fn missing_fields_default() {
        let f: Fragment = serde_json::from_str(r#"{"message":{"content":"x"}}"#).unwrap();
        assert_eq!(f.content(), "x");
        assert!(!f.done);
        assert!(f.model.is_empty());
    }

    #[test]
    fn terminal_with_attachment() {
        let f: Fragment =
            serde_json::from_str(r#"{"done":true,"message":{"content":""},"file_url":"s3://a.pdf"}"#)
                .unwrap();
        assert!(f.is_terminal());
        assert_eq!(f.attachment(), Some("s3://a.pdf"));
    }

    #[test]
    fn empty_attachment_is_none() {
        let f = Fragment::delta("").with_file_url("");
        assert_eq!(f.attachment(), None);
    }

    #[test]
    fn relayable_classification() {
        assert!(Fragment::delta("a").is_relayable());
        assert!(Fragment::terminal("").is_relayable());
        assert!(Fragment::terminal("").with_file_url("f").is_relayable());
        assert!(!Fragment::delta("").with_file_url("f").is_relayable());
        assert!(!Fragment::delta("").is_relayable());
    }
}
