//! Ledger error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("duplicate tx_id: {0}")]
    DuplicateTxId(String),

    #[error("ledger entry not found: {0}")]
    EntryNotFound(String),

    #[error("anchor not found: {0}")]
    AnchorNotFound(String),

    #[error("entry {0} is not part of anchor {1}")]
    EntryNotInAnchor(String, String),

    #[error("anchor submission failed: {0}")]
    SubmissionFailed(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("storage error: {0}")]
    Storage(String),
}
