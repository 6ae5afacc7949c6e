//! Rail-agnostic transaction types and the uniform adapter contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use sardis_types::{AmountMinor, WalletId};

use crate::error::ChainError;

/// Which settlement path an adapter drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rail {
    Evm,
    Solana,
    Card,
    Funding,
}

/// A rail-agnostic transfer request. Rails translate this into their wire
/// format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRequest {
    pub wallet_id: WalletId,
    /// Sender address on the target chain.
    pub from_address: String,
    pub chain: String,
    pub token: String,
    pub destination: String,
    pub amount_minor: AmountMinor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Submitted,
    Confirmed,
    Failed,
}

/// A transaction accepted by a rail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmittedTx {
    pub tx_hash: String,
    pub chain: String,
    pub nonce: Option<u64>,
    pub status: TxStatus,
}

/// Rail-level receipt, polled after submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RailReceipt {
    pub tx_hash: String,
    pub chain: String,
    pub status: TxStatus,
    pub block_number: Option<u64>,
    pub gas_used: Option<u64>,
}

/// Fee estimate for a transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GasEstimate {
    pub gas_limit: u64,
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
    /// Estimated total fee in the chain's native token, wei-scale.
    pub estimated_fee: u128,
}

/// Uniform contract every settlement rail implements.
#[async_trait]
pub trait RailAdapter: Send + Sync {
    fn provider_name(&self) -> &str;

    fn rail(&self) -> Rail;

    /// Submit a transfer. Transient failures are retried internally up to
    /// the adapter's retry budget before surfacing.
    async fn submit(&self, request: &TransactionRequest) -> Result<SubmittedTx, ChainError>;

    /// Poll a submitted transaction; `None` while unmined.
    async fn get_receipt(&self, tx_hash: &str) -> Result<Option<RailReceipt>, ChainError>;

    async fn estimate(&self, request: &TransactionRequest) -> Result<GasEstimate, ChainError>;
}
