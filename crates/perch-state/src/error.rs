//! Error types for the local target backend.

use thiserror::Error;

/// Result type alias for target store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during target store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("target not found: {0}")]
    TargetNotFound(String),

    #[error("target already provisioned: {0}")]
    TargetExists(String),

    #[error("invalid routing rule: {0}")]
    InvalidRule(String),
}
