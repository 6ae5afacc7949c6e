//! MPC signer abstraction.
//!
//! The signer produces a signature for a custodial wallet without the core
//! ever holding key material. Signing must be deterministic with respect to
//! the canonical transaction bytes so that idempotent retries re-produce
//! the same signed payload and transaction hash.

use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};

use sardis_mandate::canonical;
use sardis_types::WalletId;

use crate::error::ChainError;

/// A signed, submit-ready transaction.
#[derive(Debug, Clone)]
pub struct SignedTransaction {
    /// Raw signed bytes, hex-encoded with 0x prefix.
    pub raw: String,
    /// Transaction hash derived from the signed payload.
    pub tx_hash: String,
}

#[async_trait]
pub trait MpcSigner: Send + Sync {
    fn provider_name(&self) -> &str;

    /// Sign canonical transaction bytes for a wallet.
    async fn sign(
        &self,
        wallet_id: &WalletId,
        canonical_tx: &[u8],
    ) -> Result<SignedTransaction, ChainError>;
}

/// Canonical bytes of any serializable transaction shape.
pub fn canonical_tx_bytes<T: Serialize>(tx: &T) -> Result<Vec<u8>, ChainError> {
    canonical::canonicalize(tx).map_err(|e| ChainError::Signer(e.to_string()))
}

/// Deterministic signer for simulated chain mode. The "signature" is a
/// SHA-256 tag over wallet id and canonical bytes, so the same transaction
/// always yields the same raw payload and hash.
#[derive(Default)]
pub struct SimulatedMpcSigner;

impl SimulatedMpcSigner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MpcSigner for SimulatedMpcSigner {
    fn provider_name(&self) -> &str {
        "simulated-mpc"
    }

    async fn sign(
        &self,
        wallet_id: &WalletId,
        canonical_tx: &[u8],
    ) -> Result<SignedTransaction, ChainError> {
        let mut hasher = Sha256::new();
        hasher.update(wallet_id.as_str().as_bytes());
        hasher.update(canonical_tx);
        let tag: [u8; 32] = hasher.finalize().into();

        let raw = format!("0x{}{}", hex::encode(canonical_tx), hex::encode(tag));
        let tx_hash = format!("0x{}", hex::encode(Sha256::digest(raw.as_bytes())));
        Ok(SignedTransaction { raw, tx_hash })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn signing_is_deterministic() {
        let signer = SimulatedMpcSigner::new();
        let wallet = WalletId::from("w-1");
        let tx = canonical_tx_bytes(&json!({"nonce": 1, "to": "0xabc"})).unwrap();

        let a = signer.sign(&wallet, &tx).await.unwrap();
        let b = signer.sign(&wallet, &tx).await.unwrap();
        assert_eq!(a.raw, b.raw);
        assert_eq!(a.tx_hash, b.tx_hash);
    }

    #[tokio::test]
    async fn different_wallets_or_txs_differ() {
        let signer = SimulatedMpcSigner::new();
        let tx1 = canonical_tx_bytes(&json!({"nonce": 1})).unwrap();
        let tx2 = canonical_tx_bytes(&json!({"nonce": 2})).unwrap();

        let a = signer.sign(&WalletId::from("w-1"), &tx1).await.unwrap();
        let b = signer.sign(&WalletId::from("w-2"), &tx1).await.unwrap();
        let c = signer.sign(&WalletId::from("w-1"), &tx2).await.unwrap();
        assert_ne!(a.tx_hash, b.tx_hash);
        assert_ne!(a.tx_hash, c.tx_hash);
    }

    #[test]
    fn canonical_bytes_are_key_order_independent() {
        let a = canonical_tx_bytes(&json!({"b": 2, "a": 1})).unwrap();
        let b = canonical_tx_bytes(&json!({"a": 1, "b": 2})).unwrap();
        assert_eq!(a, b);
    }
}
