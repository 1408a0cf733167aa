// ABOUTME: Typed errors for session negotiation, transport, and schema failures
// ABOUTME: Row-level import failures are collected in TransferResult instead of raised

use thiserror::Error;

/// Errors that abort the current protocol operation.
///
/// Row-level failures (constraint violations, type mismatches) never show up
/// here; the importer records them per record in `TransferResult::errors`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    /// The connection code does not belong to any live session.
    #[error("invalid connection code")]
    InvalidCode,

    /// The code belonged to a session that has since been closed.
    #[error("session closed by sender")]
    SessionClosed,

    /// The peer did not answer within the configured timeout.
    #[error("timed out waiting for the sender")]
    ConnectionTimeout,

    /// The underlying channel reported a close event.
    #[error("disconnected: {0}")]
    Disconnected(String),

    #[error("table '{0}' not found")]
    TableNotFound(String),

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Local SQLite failure outside of a single record write.
    #[error("storage error: {0}")]
    Storage(String),

    /// The peer sent something that could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl TransferError {
    /// Whether retrying the same operation later can reasonably succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransferError::ConnectionTimeout | TransferError::Disconnected(_)
        )
    }
}

impl From<rusqlite::Error> for TransferError {
    fn from(err: rusqlite::Error) -> Self {
        TransferError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for TransferError {
    fn from(err: serde_json::Error) -> Self {
        TransferError::Protocol(err.to_string())
    }
}

pub type Result<T, E = TransferError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_concrete_reason() {
        assert_eq!(
            TransferError::TableNotFound("users".to_string()).to_string(),
            "table 'users' not found"
        );
        assert_eq!(
            TransferError::Disconnected("connection reset".to_string()).to_string(),
            "disconnected: connection reset"
        );
    }

    #[test]
    fn test_only_transport_errors_are_transient() {
        assert!(TransferError::ConnectionTimeout.is_transient());
        assert!(TransferError::Disconnected("eof".to_string()).is_transient());
        assert!(!TransferError::InvalidCode.is_transient());
        assert!(!TransferError::TableNotFound("t".to_string()).is_transient());
    }
}
