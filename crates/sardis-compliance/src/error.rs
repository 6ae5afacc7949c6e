//! Compliance error types. Provider failures are errors here, but the gate
//! converts every one of them into a blocked preflight (fail-closed).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ComplianceError {
    #[error("sanctions provider error: {0}")]
    SanctionsProvider(String),

    #[error("kyc provider error: {0}")]
    KycProvider(String),

    #[error("rule provider error: {0}")]
    RuleProvider(String),

    #[error("pep provider error: {0}")]
    PepProvider(String),

    #[error("audit store error: {0}")]
    AuditStore(String),

    #[error("serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for ComplianceError {
    fn from(e: rusqlite::Error) -> Self {
        ComplianceError::AuditStore(e.to_string())
    }
}
