//! Append-only ledger and Merkle anchoring for the Sardis payment core.
//!
//! Entries are hash-chained on append ([`ledger`]); batches of confirmed
//! entries are periodically committed to a chain as a Merkle root
//! ([`anchor`]), giving every entry an independently verifiable inclusion
//! proof.

pub mod anchor;
pub mod error;
pub mod ledger;
pub mod merkle;

pub use anchor::{
    Anchor, AnchorService, AnchorStatus, AnchorStore, AnchorSubmitter, InMemoryAnchorStore,
    SimulatedAnchorSubmitter,
};
pub use error::LedgerError;
pub use ledger::{
    chained_anchor, entry_hash, EntryStatus, InMemoryLedgerStore, LedgerEntry, LedgerStore,
    NewLedgerEntry, SqliteLedgerStore, GENESIS_ANCHOR,
};
pub use merkle::{leaf_hash, merkle_root, node_hash, Hash32, MerkleProof, MerkleTree, ProofStep, Side};
