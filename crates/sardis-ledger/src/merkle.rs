//! SHA-256 Merkle tree over ledger entry hashes.
//!
//! Domain-separated hashing prevents second-preimage attacks:
//! leaf = `SHA256(0x00 || data)`, node = `SHA256(0x01 || left || right)`.
//! Odd layers duplicate their last element. An empty tree has the zero
//! root.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// 32-byte hash value used throughout the ledger.
pub type Hash32 = [u8; 32];

pub const ZERO_HASH: Hash32 = [0u8; 32];

const LEAF_PREFIX: u8 = 0x00;
const NODE_PREFIX: u8 = 0x01;

pub fn leaf_hash(data: &Hash32) -> Hash32 {
    let mut hasher = Sha256::new();
    hasher.update([LEAF_PREFIX]);
    hasher.update(data);
    hasher.finalize().into()
}

pub fn node_hash(left: &Hash32, right: &Hash32) -> Hash32 {
    let mut hasher = Sha256::new();
    hasher.update([NODE_PREFIX]);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

fn next_layer(layer: &[Hash32]) -> Vec<Hash32> {
    let mut next = Vec::with_capacity(layer.len().div_ceil(2));
    let mut i = 0;
    while i < layer.len() {
        let left = &layer[i];
        let right = if i + 1 < layer.len() { &layer[i + 1] } else { left };
        next.push(node_hash(left, right));
        i += 2;
    }
    next
}

/// Compute the root without retaining layers.
pub fn merkle_root(leaves: &[Hash32]) -> Hash32 {
    if leaves.is_empty() {
        return ZERO_HASH;
    }
    let mut current: Vec<Hash32> = leaves.iter().map(leaf_hash).collect();
    while current.len() > 1 {
        current = next_layer(&current);
    }
    current[0]
}

/// Which side a sibling hash sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

/// A single `(hash, direction)` step of an authentication path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    #[serde(with = "hex_bytes")]
    pub hash: Hash32,
    pub side: Side,
}

/// Inclusion proof for one leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub leaf_index: usize,
    #[serde(with = "hex_bytes")]
    pub leaf: Hash32,
    pub path: Vec<ProofStep>,
}

impl MerkleProof {
    /// Recompute the root from the leaf and the path, compare to expected.
    pub fn verify(&self, expected_root: &Hash32) -> bool {
        let mut current = leaf_hash(&self.leaf);
        for step in &self.path {
            current = match step.side {
                Side::Left => node_hash(&step.hash, &current),
                Side::Right => node_hash(&current, &step.hash),
            };
        }
        current == *expected_root
    }
}

/// Full tree retaining every layer for proof extraction.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    leaves: Vec<Hash32>,
    layers: Vec<Vec<Hash32>>,
}

impl MerkleTree {
    pub fn from_leaves(leaves: &[Hash32]) -> Self {
        if leaves.is_empty() {
            return Self { leaves: Vec::new(), layers: Vec::new() };
        }
        let mut layers = vec![leaves.iter().map(leaf_hash).collect::<Vec<_>>()];
        while layers.last().map(Vec::len).unwrap_or(0) > 1 {
            let next = next_layer(layers.last().expect("non-empty"));
            layers.push(next);
        }
        Self { leaves: leaves.to_vec(), layers }
    }

    pub fn root(&self) -> Hash32 {
        self.layers
            .last()
            .and_then(|l| l.first())
            .copied()
            .unwrap_or(ZERO_HASH)
    }

    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    pub fn proof(&self, index: usize) -> Option<MerkleProof> {
        if self.leaves.is_empty() || index >= self.leaves.len() {
            return None;
        }
        let mut path = Vec::new();
        let mut pos = index;
        for layer in &self.layers[..self.layers.len() - 1] {
            let sibling_pos = pos ^ 1;
            let sibling = if sibling_pos < layer.len() { layer[sibling_pos] } else { layer[pos] };
            let side = if pos % 2 == 0 { Side::Right } else { Side::Left };
            path.push(ProofStep { hash: sibling, side });
            pos /= 2;
        }
        Some(MerkleProof { leaf_index: index, leaf: self.leaves[index], path })
    }
}

/// Hex serde for fixed 32-byte hashes.
mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(deserializer)?;
        let v = hex::decode(&s).map_err(serde::de::Error::custom)?;
        v.try_into()
            .map_err(|_| serde::de::Error::custom("expected 32 bytes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(byte: u8) -> Hash32 {
        [byte; 32]
    }

    #[test]
    fn leaf_and_node_domains_differ() {
        let a = h(0xAA);
        assert_ne!(leaf_hash(&a), node_hash(&a, &a));
    }

    #[test]
    fn root_empty_single_pair() {
        assert_eq!(merkle_root(&[]), ZERO_HASH);
        assert_eq!(merkle_root(&[h(1)]), leaf_hash(&h(1)));
        assert_eq!(
            merkle_root(&[h(1), h(2)]),
            node_hash(&leaf_hash(&h(1)), &leaf_hash(&h(2)))
        );
    }

    #[test]
    fn root_odd_count_duplicates_last() {
        let la = leaf_hash(&h(1));
        let lb = leaf_hash(&h(2));
        let lc = leaf_hash(&h(3));
        let expected = node_hash(&node_hash(&la, &lb), &node_hash(&lc, &lc));
        assert_eq!(merkle_root(&[h(1), h(2), h(3)]), expected);
    }

    #[test]
    fn root_order_sensitive() {
        assert_ne!(merkle_root(&[h(1), h(2)]), merkle_root(&[h(2), h(1)]));
    }

    #[test]
    fn tree_matches_standalone_root() {
        for count in 1..=12u8 {
            let leaves: Vec<Hash32> = (0..count).map(h).collect();
            assert_eq!(MerkleTree::from_leaves(&leaves).root(), merkle_root(&leaves));
        }
    }

    #[test]
    fn all_proofs_verify() {
        for count in [1usize, 2, 3, 5, 8, 33] {
            let leaves: Vec<Hash32> = (0..count).map(|i| h(i as u8)).collect();
            let tree = MerkleTree::from_leaves(&leaves);
            let root = tree.root();
            for i in 0..count {
                let proof = tree.proof(i).unwrap();
                assert!(proof.verify(&root), "count={count} leaf={i}");
            }
        }
    }

    #[test]
    fn out_of_bounds_proof_is_none() {
        let tree = MerkleTree::from_leaves(&[h(1), h(2)]);
        assert!(tree.proof(2).is_none());
        assert!(MerkleTree::from_leaves(&[]).proof(0).is_none());
    }

    #[test]
    fn tampered_leaf_fails() {
        let tree = MerkleTree::from_leaves(&[h(1), h(2), h(3), h(4)]);
        let root = tree.root();
        let mut proof = tree.proof(1).unwrap();
        proof.leaf = h(0xFF);
        assert!(!proof.verify(&root));
    }

    #[test]
    fn single_bit_mutation_fails() {
        let tree = MerkleTree::from_leaves(&[h(1), h(2), h(3)]);
        let root = tree.root();
        let mut proof = tree.proof(0).unwrap();
        proof.leaf[0] ^= 0x01;
        assert!(!proof.verify(&root));
    }

    #[test]
    fn tampered_sibling_fails() {
        let tree = MerkleTree::from_leaves(&[h(1), h(2), h(3), h(4)]);
        let root = tree.root();
        let mut proof = tree.proof(0).unwrap();
        proof.path[0].hash[31] ^= 0x80;
        assert!(!proof.verify(&root));
    }

    #[test]
    fn proof_serde_roundtrip() {
        let tree = MerkleTree::from_leaves(&[h(1), h(2), h(3), h(4), h(5)]);
        let proof = tree.proof(2).unwrap();
        let json = serde_json::to_string(&proof).unwrap();
        let back: MerkleProof = serde_json::from_str(&json).unwrap();
        assert_eq!(back, proof);
        assert!(back.verify(&tree.root()));
    }
}
