//! Chain error taxonomy.
//!
//! Transient conditions (`RpcTimeout`, `NonceStale`, `RateLimited`) are
//! retried by the adapter that raised them; everything else propagates to
//! the settlement engine.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("rpc_timeout: {0}")]
    RpcTimeout(String),

    #[error("nonce_stale: {0}")]
    NonceStale(String),

    #[error("rate limited by rpc: {0}")]
    RateLimited(String),

    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("unsupported chain: {0}")]
    UnsupportedChain(String),

    #[error("unsupported token {token} on chain {chain}")]
    UnsupportedToken { chain: String, token: String },

    #[error("signer error: {0}")]
    Signer(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("transaction reverted: {0}")]
    Reverted(String),

    #[error("attestation error: {0}")]
    Attestation(String),

    #[error("card provider error ({provider}): {message}")]
    CardProvider { provider: String, message: String },

    #[error("card not found: {0}")]
    CardNotFound(String),

    #[error("all funding providers failed")]
    FundingRoutingFailed(Vec<crate::funding::FundingAttempt>),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl ChainError {
    /// Whether the calling adapter may retry this failure.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ChainError::RpcTimeout(_) | ChainError::NonceStale(_) | ChainError::RateLimited(_)
        )
    }
}
