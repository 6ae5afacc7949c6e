//! Settlement receipts and transaction modality.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether a human was present when the payment was authorized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionModality {
    HumanPresent,
    HumanNotPresent,
}

impl TransactionModality {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionModality::HumanPresent => "human_present",
            TransactionModality::HumanNotPresent => "human_not_present",
        }
    }

    /// Parse the wire form; anything outside the enumerated set is rejected
    /// by the verifier as `payment_invalid_modality`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "human_present" => Some(TransactionModality::HumanPresent),
            "human_not_present" => Some(TransactionModality::HumanNotPresent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    Pending,
    Confirmed,
    Failed,
}

/// Final settlement receipt handed back to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub tx_hash: String,
    pub chain: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    pub status: ReceiptStatus,
    /// Hash-chain anchor of the ledger entry this receipt corresponds to.
    pub audit_anchor: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_used: Option<u64>,
    pub settled_at: DateTime<Utc>,
}
