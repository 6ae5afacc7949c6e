//! Error types for mandate verification.
//!
//! Domain rejections travel as [`RejectReason`](sardis_types::RejectReason)
//! inside `Ok` results; [`MandateError`] is reserved for conditions the
//! verifier cannot express as a rejection: storage failures, missing
//! production identity registry, serialization faults.

use thiserror::Error;

/// Errors raised by mandate operations (not domain rejections).
#[derive(Debug, Error)]
pub enum MandateError {
    /// Recording a mandate in the replay cache failed after a successful
    /// verify. The caller must treat the mandate as rejected.
    #[error("replay cache error: {0}")]
    ReplayCacheError(String),

    /// Production environments require an identity registry for key
    /// resolution; running without one is a configuration fault.
    #[error("identity registry required in production environment")]
    RegistryRequired,

    #[error("serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    StorageError(String),
}

impl From<rusqlite::Error> for MandateError {
    fn from(e: rusqlite::Error) -> Self {
        MandateError::StorageError(e.to_string())
    }
}
