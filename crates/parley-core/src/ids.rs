use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque string identifiers.
macro_rules! branded_id {
    ($name:ident) => {
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

/// Database row identifiers. Serialized as bare integers on the wire.
macro_rules! row_id {
    ($name:ident) => {
        #[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            pub const fn new(raw: i64) -> Self {
                Self(raw)
            }

            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

branded_id!(UserId);
branded_id!(ConnectionId);

row_id!(ChatId);
row_id!(QuestionId);
row_id!(AnswerId);

impl UserId {
    /// Identity used by backend services writing into a chat room.
    pub fn service() -> Self {
        Self(Uuid::nil().to_string())
    }
}

impl ConnectionId {
    pub fn new() -> Self {
        Self(format!("conn_{}", Uuid::now_v7()))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

/// Error returned when a chat id path segment is not an integer.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid chat id: {0:?}")]
pub struct InvalidChatId(pub String);

impl FromStr for ChatId {
    type Err = InvalidChatId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<i64>()
            .map(Self)
            .map_err(|_| InvalidChatId(s.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_id_has_prefix() {
        let id = ConnectionId::new();
        assert!(id.as_str().starts_with("conn_"), "got: {id}");
    }

    #[test]
    fn connection_ids_are_unique() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }

    #[test]
    fn service_user_is_nil_uuid() {
        assert_eq!(
            UserId::service().as_str(),
            "00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn chat_id_parses_integers() {
        let id: ChatId = "42".parse().unwrap();
        assert_eq!(id.get(), 42);
        assert_eq!(id.to_string(), "42");
    }

    #[test]
    fn chat_id_rejects_garbage() {
        let err = "abc".parse::<ChatId>().unwrap_err();
        assert_eq!(err, InvalidChatId("abc".into()));
        assert!("".parse::<ChatId>().is_err());
        assert!("1.5".parse::<ChatId>().is_err());
    }

    #[test]
    fn row_ids_serialize_as_integers() {
        let json = serde_json::to_string(&AnswerId::new(7)).unwrap();
        assert_eq!(json, "7");
        let parsed: QuestionId = serde_json::from_str("9").unwrap();
        assert_eq!(parsed.get(), 9);
    }

    #[test]
    fn user_id_from_raw_preserves_value() {
        let id = UserId::from_raw("6f1c2f0e-user");
        assert_eq!(id.as_str(), "6f1c2f0e-user");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, r#""6f1c2f0e-user""#);
    }
}
