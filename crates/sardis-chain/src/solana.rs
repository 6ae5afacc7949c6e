//! Solana settlement rail.
//!
//! SPL-token transfers over raw JSON-RPC (no SDK dependency): the
//! recipient's associated token account is resolved via
//! `getTokenAccountsByOwner`, the transfer is signed by the MPC signer, and
//! submission optionally routes through a gasless fee-payer service with
//! graceful fallback to sender-pays.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use serde_json::json;

use crate::config::{solana_mint, ChainMode};
use crate::error::ChainError;
use crate::rpc::{JsonRpcClient, RpcConfig};
use crate::signer::{canonical_tx_bytes, MpcSigner};
use crate::types::{
    GasEstimate, Rail, RailAdapter, RailReceipt, SubmittedTx, TransactionRequest, TxStatus,
};

const DEFAULT_RPC_URL: &str = "https://api.mainnet-beta.solana.com";

/// Lamport fee for a simple transfer (one signature).
const BASE_FEE_LAMPORTS: u64 = 5_000;

/// Fee-payer service seam for gasless transfers.
#[async_trait::async_trait]
pub trait FeePayerService: Send + Sync {
    /// Co-sign and submit a transfer, paying its fee. Returns the
    /// signature, or an error to trigger sender-pays fallback.
    async fn sponsor(&self, signed_tx: &str) -> Result<String, ChainError>;
}

#[derive(Debug, Serialize)]
struct SolanaTxPayload<'a> {
    recent_blockhash: &'a str,
    from: &'a str,
    token_mint: &'a str,
    destination_ata: &'a str,
    amount: u64,
}

pub struct SolanaRailAdapter {
    mode: ChainMode,
    signer: Arc<dyn MpcSigner>,
    rpc: Option<JsonRpcClient>,
    fee_payer: Option<Arc<dyn FeePayerService>>,
    simulated_receipts: DashMap<String, RailReceipt>,
}

impl SolanaRailAdapter {
    pub fn live(rpc_url: Option<String>, signer: Arc<dyn MpcSigner>) -> Self {
        Self {
            mode: ChainMode::Live,
            signer,
            rpc: Some(JsonRpcClient::new(RpcConfig::new(
                rpc_url.unwrap_or_else(|| DEFAULT_RPC_URL.to_string()),
            ))),
            fee_payer: None,
            simulated_receipts: DashMap::new(),
        }
    }

    pub fn simulated(signer: Arc<dyn MpcSigner>) -> Self {
        Self {
            mode: ChainMode::Simulated,
            signer,
            rpc: None,
            fee_payer: None,
            simulated_receipts: DashMap::new(),
        }
    }

    pub fn with_fee_payer(mut self, fee_payer: Arc<dyn FeePayerService>) -> Self {
        self.fee_payer = Some(fee_payer);
        self
    }

    /// Resolve the destination's associated token account for the mint.
    async fn resolve_destination_ata(
        &self,
        owner: &str,
        mint: &str,
    ) -> Result<String, ChainError> {
        match (&self.rpc, self.mode) {
            (Some(rpc), ChainMode::Live) => {
                let result = rpc
                    .call(
                        "getTokenAccountsByOwner",
                        json!([owner, {"mint": mint}, {"encoding": "jsonParsed"}]),
                    )
                    .await?;
                result
                    .get("value")
                    .and_then(|v| v.as_array())
                    .and_then(|accounts| accounts.first())
                    .and_then(|account| account.get("pubkey"))
                    .and_then(|p| p.as_str())
                    .map(str::to_string)
                    .ok_or_else(|| {
                        ChainError::Rpc(format!("no token account for owner {owner} mint {mint}"))
                    })
            }
            // Simulated ATA derivation: deterministic tag of owner+mint.
            _ => Ok(format!("ata:{owner}:{mint}")),
        }
    }

    async fn latest_blockhash(&self) -> Result<String, ChainError> {
        match (&self.rpc, self.mode) {
            (Some(rpc), ChainMode::Live) => {
                let result = rpc
                    .call("getLatestBlockhash", json!([{"commitment": "confirmed"}]))
                    .await?;
                result
                    .get("value")
                    .and_then(|v| v.get("blockhash"))
                    .and_then(|b| b.as_str())
                    .map(str::to_string)
                    .ok_or_else(|| ChainError::Rpc("missing blockhash".to_string()))
            }
            _ => Ok("SimulatedBlockhash1111111111111111".to_string()),
        }
    }

    async fn send_transaction(&self, signed_raw: &str) -> Result<String, ChainError> {
        // Gasless path first, then sender-pays.
        if let Some(fee_payer) = &self.fee_payer {
            match fee_payer.sponsor(signed_raw).await {
                Ok(signature) => {
                    tracing::info!(signature = %signature, "gasless transfer sponsored");
                    return Ok(signature);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "fee payer unavailable, falling back to sender-pays");
                }
            }
        }

        match (&self.rpc, self.mode) {
            (Some(rpc), ChainMode::Live) => {
                let result = rpc
                    .call("sendTransaction", json!([signed_raw, {"encoding": "base64"}]))
                    .await?;
                result
                    .as_str()
                    .map(str::to_string)
                    .ok_or_else(|| ChainError::Rpc(format!("unexpected send result {result}")))
            }
            _ => {
                // Simulated signature derives from the raw payload.
                use sha2::{Digest, Sha256};
                let signature = format!("sol{}", hex::encode(Sha256::digest(signed_raw.as_bytes())));
                self.simulated_receipts.insert(
                    signature.clone(),
                    RailReceipt {
                        tx_hash: signature.clone(),
                        chain: "solana".to_string(),
                        status: TxStatus::Confirmed,
                        block_number: Some(1),
                        gas_used: Some(BASE_FEE_LAMPORTS),
                    },
                );
                Ok(signature)
            }
        }
    }
}

#[async_trait::async_trait]
impl RailAdapter for SolanaRailAdapter {
    fn provider_name(&self) -> &str {
        "solana-jsonrpc"
    }

    fn rail(&self) -> Rail {
        Rail::Solana
    }

    async fn submit(&self, request: &TransactionRequest) -> Result<SubmittedTx, ChainError> {
        let mint = solana_mint(&request.token).ok_or_else(|| ChainError::UnsupportedToken {
            chain: "solana".to_string(),
            token: request.token.clone(),
        })?;

        let destination_ata = self.resolve_destination_ata(&request.destination, mint).await?;
        let blockhash = self.latest_blockhash().await?;

        let payload = SolanaTxPayload {
            recent_blockhash: &blockhash,
            from: &request.from_address,
            token_mint: mint,
            destination_ata: &destination_ata,
            amount: request.amount_minor,
        };
        let canonical = canonical_tx_bytes(&payload)?;
        let signed = self.signer.sign(&request.wallet_id, &canonical).await?;

        let signature = self.send_transaction(&signed.raw).await?;
        tracing::info!(
            wallet_id = %request.wallet_id,
            signature = %signature,
            amount = request.amount_minor,
            "spl transfer submitted"
        );

        Ok(SubmittedTx {
            tx_hash: signature,
            chain: "solana".to_string(),
            nonce: None,
            status: TxStatus::Submitted,
        })
    }

    async fn get_receipt(&self, tx_hash: &str) -> Result<Option<RailReceipt>, ChainError> {
        match (&self.rpc, self.mode) {
            (Some(rpc), ChainMode::Live) => {
                let result = rpc
                    .call(
                        "getSignatureStatuses",
                        json!([[tx_hash], {"searchTransactionHistory": true}]),
                    )
                    .await?;
                let status = result
                    .get("value")
                    .and_then(|v| v.as_array())
                    .and_then(|statuses| statuses.first());
                match status {
                    None => Ok(None),
                    Some(s) if s.is_null() => Ok(None),
                    Some(s) => {
                        let failed = s.get("err").map(|e| !e.is_null()).unwrap_or(false);
                        Ok(Some(RailReceipt {
                            tx_hash: tx_hash.to_string(),
                            chain: "solana".to_string(),
                            status: if failed { TxStatus::Failed } else { TxStatus::Confirmed },
                            block_number: s.get("slot").and_then(|v| v.as_u64()),
                            gas_used: None,
                        }))
                    }
                }
            }
            _ => Ok(self.simulated_receipts.get(tx_hash).map(|r| r.clone())),
        }
    }

    async fn estimate(&self, request: &TransactionRequest) -> Result<GasEstimate, ChainError> {
        solana_mint(&request.token).ok_or_else(|| ChainError::UnsupportedToken {
            chain: "solana".to_string(),
            token: request.token.clone(),
        })?;
        // Fees are flat per signature; the gasless path makes them zero for
        // the sender, but the estimate reports the worst case.
        Ok(GasEstimate {
            gas_limit: 1,
            max_fee_per_gas: BASE_FEE_LAMPORTS as u128,
            max_priority_fee_per_gas: 0,
            estimated_fee: BASE_FEE_LAMPORTS as u128,
        })
    }
}
