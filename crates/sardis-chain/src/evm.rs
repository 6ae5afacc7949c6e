//! EVM settlement rail.
//!
//! Encodes ERC-20 `transfer(address,uint256)` calls, tracks a monotonic
//! nonce per `(wallet, chain)`, prices with EIP-1559 fee fields, signs via
//! the MPC signer, and submits through JSON-RPC. In simulated mode no RPC
//! endpoint is touched; results are deterministic functions of the request.

use std::collections::HashMap;
use std::sync::Arc;

use alloy_primitives::Address;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::json;

use sardis_types::WalletId;

use crate::config::{evm_chain, stablecoin_address, ChainMode, EvmChainConfig};
use crate::error::ChainError;
use crate::rpc::{parse_hex_u128, parse_hex_u64, JsonRpcClient, RpcConfig};
use crate::signer::{canonical_tx_bytes, MpcSigner};
use crate::types::{
    GasEstimate, Rail, RailAdapter, RailReceipt, SubmittedTx, TransactionRequest, TxStatus,
};

/// ERC-20 `transfer(address,uint256)` selector.
pub const TRANSFER_SELECTOR: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];

/// Gas limit for a plain ERC-20 transfer.
const ERC20_TRANSFER_GAS: u64 = 65_000;

/// Encode an ERC-20 transfer call: selector + 32-byte zero-padded recipient
/// + 32-byte big-endian amount.
pub fn encode_erc20_transfer(recipient: &str, amount_minor: u64) -> Result<Vec<u8>, ChainError> {
    let recipient: Address = recipient
        .parse()
        .map_err(|_| ChainError::InvalidAddress(recipient.to_string()))?;

    let mut data = Vec::with_capacity(4 + 32 + 32);
    data.extend_from_slice(&TRANSFER_SELECTOR);
    data.extend_from_slice(&[0u8; 12]);
    data.extend_from_slice(recipient.as_slice());
    data.extend_from_slice(&[0u8; 24]);
    data.extend_from_slice(&amount_minor.to_be_bytes());
    Ok(data)
}

/// Monotonic nonce tracking per `(wallet, chain)`. The chain's pending
/// count seeds the tracker; afterwards nonces only move forward, so a
/// stale RPC view can never reissue a consumed nonce.
#[derive(Default)]
pub struct NonceManager {
    next: DashMap<(WalletId, String), u64>,
}

impl NonceManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the next nonce, seeding from the chain's pending count.
    pub fn next_nonce(&self, wallet_id: &WalletId, chain: &str, pending_count: u64) -> u64 {
        let mut entry = self
            .next
            .entry((wallet_id.clone(), chain.to_string()))
            .or_insert(pending_count);
        let nonce = (*entry).max(pending_count);
        *entry = nonce + 1;
        nonce
    }

    /// Forget local state for a wallet, forcing a fresh fetch (used after
    /// `nonce_stale` responses).
    pub fn invalidate(&self, wallet_id: &WalletId, chain: &str) {
        self.next.remove(&(wallet_id.clone(), chain.to_string()));
    }
}

/// The canonical transaction shape the signer commits to.
#[derive(Debug, Serialize)]
struct EvmTxPayload<'a> {
    chain_id: u64,
    nonce: u64,
    from: &'a str,
    to: &'a str,
    value: &'a str,
    data: String,
    max_fee_per_gas: u128,
    max_priority_fee_per_gas: u128,
    gas_limit: u64,
}

/// EVM rail adapter for one chain.
pub struct EvmRailAdapter {
    config: &'static EvmChainConfig,
    mode: ChainMode,
    signer: Arc<dyn MpcSigner>,
    nonces: Arc<NonceManager>,
    rpc: Option<JsonRpcClient>,
    /// Per-submit retry budget for transient failures.
    max_submit_retries: u32,
    /// Simulated-mode receipts, so get_receipt is consistent with submit.
    simulated_receipts: DashMap<String, RailReceipt>,
}

impl EvmRailAdapter {
    /// Live adapter against the chain's default or overridden RPC URL.
    pub fn live(
        chain: &str,
        signer: Arc<dyn MpcSigner>,
        nonces: Arc<NonceManager>,
        rpc_overrides: &HashMap<String, String>,
    ) -> Result<Self, ChainError> {
        let config = evm_chain(chain)?;
        let url = rpc_overrides
            .get(chain)
            .cloned()
            .unwrap_or_else(|| config.rpc_url.to_string());
        Ok(Self {
            config,
            mode: ChainMode::Live,
            signer,
            nonces,
            rpc: Some(JsonRpcClient::new(RpcConfig::new(url))),
            max_submit_retries: 3,
            simulated_receipts: DashMap::new(),
        })
    }

    /// Simulated adapter: deterministic, no network.
    pub fn simulated(chain: &str, signer: Arc<dyn MpcSigner>) -> Result<Self, ChainError> {
        Ok(Self {
            config: evm_chain(chain)?,
            mode: ChainMode::Simulated,
            signer,
            nonces: Arc::new(NonceManager::new()),
            rpc: None,
            max_submit_retries: 3,
            simulated_receipts: DashMap::new(),
        })
    }

    pub fn chain_name(&self) -> &'static str {
        self.config.name
    }

    async fn pending_count(&self, from_address: &str) -> Result<u64, ChainError> {
        match (&self.rpc, self.mode) {
            (Some(rpc), ChainMode::Live) => {
                let result = rpc
                    .call(
                        "eth_getTransactionCount",
                        json!([from_address, "pending"]),
                    )
                    .await?;
                parse_hex_u64(&result)
            }
            _ => Ok(0),
        }
    }

    async fn fee_fields(&self) -> Result<(u128, u128), ChainError> {
        match (&self.rpc, self.mode) {
            (Some(rpc), ChainMode::Live) => {
                let priority = rpc
                    .call("eth_maxPriorityFeePerGas", json!([]))
                    .await
                    .and_then(|v| parse_hex_u128(&v))
                    .unwrap_or(1_500_000_000);
                let base = rpc
                    .call("eth_gasPrice", json!([]))
                    .await
                    .and_then(|v| parse_hex_u128(&v))
                    .unwrap_or(10_000_000_000);
                // EIP-1559: leave headroom above the current base fee.
                Ok((base.saturating_mul(2).saturating_add(priority), priority))
            }
            _ => Ok((20_000_000_000, 1_500_000_000)),
        }
    }

    async fn submit_once(&self, request: &TransactionRequest) -> Result<SubmittedTx, ChainError> {
        let token_address = stablecoin_address(self.config.name, &request.token)?;
        let data = encode_erc20_transfer(&request.destination, request.amount_minor)?;

        let pending = self.pending_count(&request.from_address).await?;
        let nonce = self
            .nonces
            .next_nonce(&request.wallet_id, self.config.name, pending);
        let (max_fee, max_priority) = self.fee_fields().await?;

        let payload = EvmTxPayload {
            chain_id: self.config.chain_id,
            nonce,
            from: &request.from_address,
            to: token_address,
            value: "0x0",
            data: format!("0x{}", hex::encode(&data)),
            max_fee_per_gas: max_fee,
            max_priority_fee_per_gas: max_priority,
            gas_limit: ERC20_TRANSFER_GAS,
        };
        let canonical = canonical_tx_bytes(&payload)?;
        let signed = self.signer.sign(&request.wallet_id, &canonical).await?;

        let tx_hash = match (&self.rpc, self.mode) {
            (Some(rpc), ChainMode::Live) => {
                let result = rpc
                    .call("eth_sendRawTransaction", json!([signed.raw]))
                    .await?;
                result
                    .as_str()
                    .map(str::to_string)
                    .ok_or_else(|| ChainError::Rpc(format!("unexpected send result {result}")))?
            }
            _ => {
                // Simulated: the deterministic signer hash is the tx hash;
                // the receipt confirms immediately.
                self.simulated_receipts.insert(
                    signed.tx_hash.clone(),
                    RailReceipt {
                        tx_hash: signed.tx_hash.clone(),
                        chain: self.config.name.to_string(),
                        status: TxStatus::Confirmed,
                        block_number: Some(nonce + 1),
                        gas_used: Some(ERC20_TRANSFER_GAS),
                    },
                );
                signed.tx_hash.clone()
            }
        };

        tracing::info!(
            chain = self.config.name,
            wallet_id = %request.wallet_id,
            nonce,
            tx = %tx_hash,
            amount_minor = request.amount_minor,
            "evm transfer submitted"
        );

        Ok(SubmittedTx {
            tx_hash,
            chain: self.config.name.to_string(),
            nonce: Some(nonce),
            status: TxStatus::Submitted,
        })
    }
}

#[async_trait::async_trait]
impl RailAdapter for EvmRailAdapter {
    fn provider_name(&self) -> &str {
        "evm-jsonrpc"
    }

    fn rail(&self) -> Rail {
        Rail::Evm
    }

    async fn submit(&self, request: &TransactionRequest) -> Result<SubmittedTx, ChainError> {
        let mut last_error = None;
        for attempt in 0..=self.max_submit_retries {
            match self.submit_once(request).await {
                Ok(submitted) => return Ok(submitted),
                Err(e) if e.is_transient() && attempt < self.max_submit_retries => {
                    if matches!(e, ChainError::NonceStale(_)) {
                        // Refetch the chain's view next attempt.
                        self.nonces.invalidate(&request.wallet_id, self.config.name);
                    }
                    tracing::warn!(
                        chain = self.config.name,
                        attempt,
                        error = %e,
                        "transient submit failure, retrying"
                    );
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or_else(|| ChainError::Rpc("submit retries exhausted".to_string())))
    }

    async fn get_receipt(&self, tx_hash: &str) -> Result<Option<RailReceipt>, ChainError> {
        match (&self.rpc, self.mode) {
            (Some(rpc), ChainMode::Live) => {
                let result = rpc
                    .call("eth_getTransactionReceipt", json!([tx_hash]))
                    .await?;
                if result.is_null() {
                    return Ok(None);
                }
                let status_ok = result
                    .get("status")
                    .and_then(|s| parse_hex_u64(s).ok())
                    .map(|s| s == 1)
                    .unwrap_or(false);
                Ok(Some(RailReceipt {
                    tx_hash: tx_hash.to_string(),
                    chain: self.config.name.to_string(),
                    status: if status_ok { TxStatus::Confirmed } else { TxStatus::Failed },
                    block_number: result.get("blockNumber").and_then(|b| parse_hex_u64(b).ok()),
                    gas_used: result.get("gasUsed").and_then(|g| parse_hex_u64(g).ok()),
                }))
            }
            _ => Ok(self.simulated_receipts.get(tx_hash).map(|r| r.clone())),
        }
    }

    async fn estimate(&self, request: &TransactionRequest) -> Result<GasEstimate, ChainError> {
        // Validate the request encodes at all.
        stablecoin_address(self.config.name, &request.token)?;
        encode_erc20_transfer(&request.destination, request.amount_minor)?;

        let (max_fee, max_priority) = self.fee_fields().await?;
        Ok(GasEstimate {
            gas_limit: ERC20_TRANSFER_GAS,
            max_fee_per_gas: max_fee,
            max_priority_fee_per_gas: max_priority,
            estimated_fee: max_fee.saturating_mul(ERC20_TRANSFER_GAS as u128),
        })
    }
}
