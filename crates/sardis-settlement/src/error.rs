//! Settlement error types.
//!
//! Domain rejections never appear here; they travel inside
//! [`SettlementOutcome`](crate::engine::SettlementOutcome). These errors are
//! the fatal and transient conditions that abort a settlement.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("no wallet for agent {agent} on chain {chain}")]
    WalletNotFound { agent: String, chain: String },

    #[error("insufficient balance: wallet {wallet} has {available}, needs {required}")]
    InsufficientBalance { wallet: String, available: u64, required: u64 },

    #[error("no rail adapter for chain {0}")]
    NoRailForChain(String),

    #[error(transparent)]
    Mandate(#[from] sardis_mandate::MandateError),

    #[error(transparent)]
    Policy(#[from] sardis_policy::PolicyError),

    #[error(transparent)]
    Compliance(#[from] sardis_compliance::ComplianceError),

    #[error(transparent)]
    Chain(#[from] sardis_chain::ChainError),

    #[error(transparent)]
    Ledger(#[from] sardis_ledger::LedgerError),

    #[error("idempotency storage error: {0}")]
    Idempotency(String),

    #[error("lock service error: {0}")]
    Lock(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(String),
}
