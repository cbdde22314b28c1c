//! The engine's error taxonomy.
//!
//! Most internal functions return `anyhow::Result` and rely on `.context()`
//! the way the rest of this crate does; `EngineError` exists for the
//! boundaries that need to branch on failure category (surface vs. degrade
//! vs. ignore-and-log, per the propagation policy).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("provider failure: {0}")]
    ProviderFailure(String),

    #[error("inconsistent state: {0}")]
    Inconsistent(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::QueryReturnedNoRows => EngineError::NotFound(e.to_string()),
            other => EngineError::BackendUnavailable(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_returned_no_rows_maps_to_not_found() {
        let err: EngineError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[test]
    fn other_sqlite_errors_map_to_backend_unavailable() {
        let err: EngineError =
            rusqlite::Error::ExecuteReturnedResults.into();
        assert!(matches!(err, EngineError::BackendUnavailable(_)));
    }

    #[test]
    fn display_messages_include_detail() {
        let err = EngineError::InvalidArgument("empty id".into());
        assert_eq!(err.to_string(), "invalid argument: empty id");
    }
}
