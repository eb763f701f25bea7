//! Error types for the Moi engine.

use crate::RecordId;
use thiserror::Error;

/// All possible errors from the Moi engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Identifier errors
    #[error("invalid local id: {0}")]
    InvalidLocalId(String),

    #[error("record not found: {0}")]
    RecordNotFound(RecordId),

    // Write errors
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("invalid collection name: {0:?}")]
    InvalidCollection(String),

    #[error("write rejected: {0}")]
    WriteRejected(String),

    // State errors
    #[error("not online")]
    NotOnline,

    #[error("no flush in progress")]
    NoFlushInProgress,
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::InvalidLocalId("abc".into());
        assert_eq!(err.to_string(), "invalid local id: abc");

        let err = Error::NotOnline;
        assert_eq!(err.to_string(), "not online");

        let err = Error::InvalidCollection(String::new());
        assert_eq!(err.to_string(), "invalid collection name: \"\"");
    }
}
