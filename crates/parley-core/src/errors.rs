/// Failures opening or reading the outbound model stream.
#[derive(Clone, Debug, thiserror::Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),
    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to serialize request: {0}")]
    Serialize(String),
    #[error("invalid transport config: {0}")]
    InvalidConfig(String),
}

impl TransportError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Status { .. } => "status",
            Self::Serialize(_) => "serialize",
            Self::InvalidConfig(_) => "invalid_config",
        }
    }
}

/// Failures reported by history, ownership and persistence collaborators.
#[derive(Clone, Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("storage error: {0}")]
    Storage(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_exposed() {
        let err = TransportError::Status {
            status: 422,
            body: "bad".into(),
        };
        assert_eq!(err.status(), Some(422));
        assert_eq!(err.error_kind(), "status");
        assert_eq!(err.to_string(), "backend returned 422: bad");
        assert_eq!(TransportError::Network("reset".into()).status(), None);
    }
}
