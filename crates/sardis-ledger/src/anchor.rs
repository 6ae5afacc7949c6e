//! Merkle anchoring of ledger batches.
//!
//! The anchor service collects confirmed, unanchored entries in ledger
//! order, builds a Merkle tree over their entry hashes, submits the root to
//! a configured chain, and records the anchor. Anchors make the ledger's
//! tamper evidence independently checkable: anyone holding an entry and its
//! proof can recompute the root and compare it to the on-chain value.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use sardis_types::{AnchorId, TxId};

use crate::error::LedgerError;
use crate::ledger::{entry_hash, LedgerEntry, LedgerStore};
use crate::merkle::{Hash32, MerkleProof, MerkleTree};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorStatus {
    Pending,
    Submitted,
    Confirmed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anchor {
    pub anchor_id: AnchorId,
    /// Hex-encoded Merkle root.
    pub merkle_root: String,
    pub entry_count: u64,
    pub first_entry_id: TxId,
    pub last_entry_id: TxId,
    /// Chain the root was committed to.
    pub chain: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<String>,
    pub status: AnchorStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    /// Ordered tx ids and leaf hashes, kept so proofs are reproducible.
    pub entry_ids: Vec<TxId>,
    pub leaf_hashes: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Persistence for anchors.
#[async_trait]
pub trait AnchorStore: Send + Sync {
    async fn insert(&self, anchor: Anchor) -> Result<(), LedgerError>;
    async fn get(&self, anchor_id: &AnchorId) -> Result<Option<Anchor>, LedgerError>;
    async fn update(&self, anchor: Anchor) -> Result<(), LedgerError>;
}

#[derive(Default)]
pub struct InMemoryAnchorStore {
    anchors: DashMap<AnchorId, Anchor>,
}

impl InMemoryAnchorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AnchorStore for InMemoryAnchorStore {
    async fn insert(&self, anchor: Anchor) -> Result<(), LedgerError> {
        self.anchors.insert(anchor.anchor_id.clone(), anchor);
        Ok(())
    }

    async fn get(&self, anchor_id: &AnchorId) -> Result<Option<Anchor>, LedgerError> {
        Ok(self.anchors.get(anchor_id).map(|a| a.clone()))
    }

    async fn update(&self, anchor: Anchor) -> Result<(), LedgerError> {
        self.anchors.insert(anchor.anchor_id.clone(), anchor);
        Ok(())
    }
}

/// Chain-side commitment of a Merkle root. The EVM implementation lives in
/// sardis-chain; the simulated submitter echoes deterministic hashes.
#[async_trait]
pub trait AnchorSubmitter: Send + Sync {
    /// Submit the root; returns the chain transaction hash.
    async fn submit_root(&self, root_hex: &str) -> Result<String, LedgerError>;

    /// Poll for confirmation; `Some(block_number)` once mined.
    async fn confirmation(&self, tx_hash: &str) -> Result<Option<u64>, LedgerError>;

    /// Read back the committed root for verification.
    async fn read_root(&self, tx_hash: &str) -> Result<Option<String>, LedgerError>;
}

/// Submitter for simulated chain mode: remembers what it was given.
#[derive(Default)]
pub struct SimulatedAnchorSubmitter {
    submitted: DashMap<String, String>,
}

impl SimulatedAnchorSubmitter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AnchorSubmitter for SimulatedAnchorSubmitter {
    async fn submit_root(&self, root_hex: &str) -> Result<String, LedgerError> {
        use sha2::{Digest, Sha256};
        let digest = Sha256::digest(root_hex.as_bytes());
        let tx_hash = format!("0xsim{}", &hex::encode(digest)[..32]);
        self.submitted.insert(tx_hash.clone(), root_hex.to_string());
        Ok(tx_hash)
    }

    async fn confirmation(&self, tx_hash: &str) -> Result<Option<u64>, LedgerError> {
        Ok(self.submitted.contains_key(tx_hash).then_some(1))
    }

    async fn read_root(&self, tx_hash: &str) -> Result<Option<String>, LedgerError> {
        Ok(self.submitted.get(tx_hash).map(|r| r.clone()))
    }
}

/// Builds, submits, and verifies anchors.
pub struct AnchorService {
    ledger: Arc<dyn LedgerStore>,
    store: Arc<dyn AnchorStore>,
    submitter: Arc<dyn AnchorSubmitter>,
    chain: String,
    batch_limit: usize,
}

impl AnchorService {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        store: Arc<dyn AnchorStore>,
        submitter: Arc<dyn AnchorSubmitter>,
        chain: impl Into<String>,
    ) -> Self {
        Self { ledger, store, submitter, chain: chain.into(), batch_limit: 1_000 }
    }

    pub fn with_batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = limit;
        self
    }

    /// Anchor the current batch of unanchored entries. Returns the new
    /// anchor, or `None` when there is nothing to anchor.
    pub async fn anchor_once(&self) -> Result<Option<Anchor>, LedgerError> {
        let entries = self.ledger.unanchored(self.batch_limit).await?;
        if entries.is_empty() {
            return Ok(None);
        }

        let leaves: Vec<Hash32> =
            entries.iter().map(entry_hash).collect::<Result<_, _>>()?;
        let tree = MerkleTree::from_leaves(&leaves);
        let root_hex = hex::encode(tree.root());

        let entry_ids: Vec<TxId> = entries.iter().map(|e| e.tx_id.clone()).collect();
        let mut anchor = Anchor {
            anchor_id: AnchorId::generate(),
            merkle_root: root_hex.clone(),
            entry_count: entries.len() as u64,
            first_entry_id: entry_ids.first().expect("non-empty").clone(),
            last_entry_id: entry_ids.last().expect("non-empty").clone(),
            chain: self.chain.clone(),
            transaction_hash: None,
            status: AnchorStatus::Pending,
            block_number: None,
            entry_ids: entry_ids.clone(),
            leaf_hashes: leaves.iter().map(hex::encode).collect(),
            created_at: Utc::now(),
        };
        self.store.insert(anchor.clone()).await?;

        // Submit the root. A submission failure leaves the anchor failed
        // and the entries unanchored for the next sweep.
        match self.submitter.submit_root(&root_hex).await {
            Ok(tx_hash) => {
                anchor.transaction_hash = Some(tx_hash.clone());
                anchor.status = AnchorStatus::Submitted;
                self.store.update(anchor.clone()).await?;

                if let Some(block) = self.submitter.confirmation(&tx_hash).await? {
                    anchor.status = AnchorStatus::Confirmed;
                    anchor.block_number = Some(block);
                    self.store.update(anchor.clone()).await?;
                }

                self.ledger.mark_anchored(&entry_ids, &anchor.anchor_id).await?;
                tracing::info!(
                    anchor_id = %anchor.anchor_id,
                    entries = anchor.entry_count,
                    root = %anchor.merkle_root,
                    "ledger batch anchored"
                );
                Ok(Some(anchor))
            }
            Err(e) => {
                tracing::error!(anchor_id = %anchor.anchor_id, error = %e, "anchor submission failed");
                anchor.status = AnchorStatus::Failed;
                self.store.update(anchor).await?;
                Err(LedgerError::SubmissionFailed(e.to_string()))
            }
        }
    }

    /// Authentication path for an entry inside its anchor.
    pub async fn proof_for_entry(
        &self,
        tx_id: &TxId,
        anchor_id: &AnchorId,
    ) -> Result<MerkleProof, LedgerError> {
        let anchor = self.load_anchor(anchor_id).await?;
        let index = anchor
            .entry_ids
            .iter()
            .position(|id| id == tx_id)
            .ok_or_else(|| LedgerError::EntryNotInAnchor(tx_id.to_string(), anchor_id.to_string()))?;

        let leaves = decode_leaves(&anchor)?;
        let tree = MerkleTree::from_leaves(&leaves);
        tree.proof(index)
            .ok_or_else(|| LedgerError::EntryNotInAnchor(tx_id.to_string(), anchor_id.to_string()))
    }

    /// Recompute an entry's leaf hash, walk the stored proof, and compare to
    /// the anchor's root.
    pub async fn verify_entry(
        &self,
        entry: &LedgerEntry,
        anchor_id: &AnchorId,
    ) -> Result<bool, LedgerError> {
        let anchor = self.load_anchor(anchor_id).await?;
        let Some(index) = anchor.entry_ids.iter().position(|id| id == &entry.tx_id) else {
            return Ok(false);
        };

        let leaves = decode_leaves(&anchor)?;
        let tree = MerkleTree::from_leaves(&leaves);
        let Some(mut proof) = tree.proof(index) else {
            return Ok(false);
        };
        // The proof must authenticate the *presented* entry, not the stored
        // leaf: recompute the leaf from the entry bytes.
        proof.leaf = entry_hash(entry)?;

        let root: Hash32 = decode_hash(&anchor.merkle_root)?;
        Ok(proof.verify(&root))
    }

    /// Re-read the committed root from the chain and compare to the stored
    /// anchor.
    pub async fn verify_anchor(&self, anchor_id: &AnchorId) -> Result<bool, LedgerError> {
        let anchor = self.load_anchor(anchor_id).await?;
        let Some(tx_hash) = anchor.transaction_hash.as_deref() else {
            return Ok(false);
        };
        let Some(on_chain) = self.submitter.read_root(tx_hash).await? else {
            return Ok(false);
        };
        Ok(on_chain == anchor.merkle_root)
    }

    async fn load_anchor(&self, anchor_id: &AnchorId) -> Result<Anchor, LedgerError> {
        self.store
            .get(anchor_id)
            .await?
            .ok_or_else(|| LedgerError::AnchorNotFound(anchor_id.to_string()))
    }
}

fn decode_leaves(anchor: &Anchor) -> Result<Vec<Hash32>, LedgerError> {
    anchor.leaf_hashes.iter().map(|h| decode_hash(h)).collect()
}

fn decode_hash(hex_str: &str) -> Result<Hash32, LedgerError> {
    let bytes = hex::decode(hex_str).map_err(|e| LedgerError::Serialization(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| LedgerError::Serialization("expected 32-byte hash".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{InMemoryLedgerStore, NewLedgerEntry};
    use sardis_types::{MandateId, WalletId};

    async fn seeded_service(count: usize) -> (AnchorService, Arc<InMemoryLedgerStore>) {
        let ledger = Arc::new(InMemoryLedgerStore::new());
        for i in 0..count {
            let tx_id = format!("tx-{i}");
            ledger
                .append(NewLedgerEntry {
                    tx_id: TxId::from(tx_id.as_str()),
                    mandate_id: MandateId::from(format!("m-{i}").as_str()),
                    from_wallet: WalletId::from("w-1"),
                    to_wallet: "0xDest".to_string(),
                    amount_minor: 1_000 + i as u64,
                    currency: "USDC".to_string(),
                    chain: Some("base".to_string()),
                    chain_tx_hash: None,
                    created_at: Utc::now(),
                })
                .await
                .unwrap();
            ledger
                .mark_confirmed(&TxId::from(tx_id.as_str()), "0xhash", i as u64 + 1, None)
                .await
                .unwrap();
        }
        let service = AnchorService::new(
            Arc::clone(&ledger) as Arc<dyn LedgerStore>,
            Arc::new(InMemoryAnchorStore::new()),
            Arc::new(SimulatedAnchorSubmitter::new()),
            "base",
        );
        (service, ledger)
    }

    #[tokio::test]
    async fn anchoring_empty_ledger_is_noop() {
        let (service, _) = seeded_service(0).await;
        assert!(service.anchor_once().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn anchor_covers_batch_and_marks_entries() {
        let (service, ledger) = seeded_service(5).await;
        let anchor = service.anchor_once().await.unwrap().unwrap();

        assert_eq!(anchor.entry_count, 5);
        assert_eq!(anchor.status, AnchorStatus::Confirmed);
        assert_eq!(anchor.first_entry_id, TxId::from("tx-0"));
        assert_eq!(anchor.last_entry_id, TxId::from("tx-4"));
        assert!(anchor.transaction_hash.is_some());

        // All entries now anchored; second run is a no-op.
        assert!(ledger.unanchored(10).await.unwrap().is_empty());
        assert!(service.anchor_once().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn verify_entry_round_trip_and_mutation() {
        let (service, ledger) = seeded_service(7).await;
        let anchor = service.anchor_once().await.unwrap().unwrap();

        let entry = ledger.get(&TxId::from("tx-3")).await.unwrap().unwrap();
        assert!(service.verify_entry(&entry, &anchor.anchor_id).await.unwrap());

        // Single-bit mutation of the entry fails verification.
        let mut tampered = entry.clone();
        tampered.amount_minor ^= 1;
        assert!(!service.verify_entry(&tampered, &anchor.anchor_id).await.unwrap());
    }

    #[tokio::test]
    async fn proof_for_entry_verifies_against_root() {
        let (service, _) = seeded_service(4).await;
        let anchor = service.anchor_once().await.unwrap().unwrap();

        let proof = service.proof_for_entry(&TxId::from("tx-2"), &anchor.anchor_id).await.unwrap();
        let root = decode_hash(&anchor.merkle_root).unwrap();
        assert!(proof.verify(&root));

        let err = service
            .proof_for_entry(&TxId::from("tx-99"), &anchor.anchor_id)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::EntryNotInAnchor(_, _)));
    }

    #[tokio::test]
    async fn verify_anchor_reads_chain_root() {
        let (service, _) = seeded_service(3).await;
        let anchor = service.anchor_once().await.unwrap().unwrap();
        assert!(service.verify_anchor(&anchor.anchor_id).await.unwrap());
    }

    #[tokio::test]
    async fn foreign_entry_fails_verification() {
        let (service, ledger) = seeded_service(3).await;
        let anchor = service.anchor_once().await.unwrap().unwrap();

        // An entry appended after the anchor is not covered.
        ledger
            .append(NewLedgerEntry {
                tx_id: TxId::from("tx-later"),
                mandate_id: MandateId::from("m-later"),
                from_wallet: WalletId::from("w-1"),
                to_wallet: "0xDest".to_string(),
                amount_minor: 1,
                currency: "USDC".to_string(),
                chain: None,
                chain_tx_hash: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        let later = ledger.get(&TxId::from("tx-later")).await.unwrap().unwrap();
        assert!(!service.verify_entry(&later, &anchor.anchor_id).await.unwrap());
    }
}
