use parley_core::RepositoryError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("corrupt row in {table}.{column}: {detail}")]
    CorruptRow {
        table: &'static str,
        column: &'static str,
        detail: String,
    },

    #[error("IO error: {0}")]
    Io(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<StoreError> for RepositoryError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => RepositoryError::NotFound(what),
            other => RepositoryError::Storage(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_through() {
        let err: RepositoryError = StoreError::NotFound("answer 4".into()).into();
        assert!(matches!(err, RepositoryError::NotFound(ref s) if s == "answer 4"));
    }

    #[test]
    fn other_errors_become_storage() {
        let err: RepositoryError = StoreError::CorruptRow {
            table: "answers",
            column: "answer",
            detail: "bad".into(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "storage error: corrupt row in answers.answer: bad"
        );
    }
}
