//! Error types for policy storage and evaluation.
//!
//! Policy decisions are never errors; they travel as
//! [`PolicyDecision`](crate::policy::PolicyDecision). [`PolicyError`] covers
//! the storage and bookkeeping faults around them.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("policy not found for agent {0}")]
    PolicyNotFound(String),

    #[error("approval request not found: {0}")]
    ApprovalNotFound(String),

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}
