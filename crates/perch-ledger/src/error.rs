//! Error types for the deployment ledger.

use thiserror::Error;

/// Result type alias for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Errors that can occur while reading or appending ledger records.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("failed to open ledger: {0}")]
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

    /// A non-terminal attempt already owns the target.
    #[error("deployment already in flight for {target} (attempt {attempt_id})")]
    Conflict { target: String, attempt_id: String },

    /// Terminal attempts are immutable; nothing may be appended to them.
    #[error("attempt already terminal: {0}")]
    Terminal(String),

    #[error("attempt not found: {0}")]
    NotFound(String),
}
