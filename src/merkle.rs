//! State commitments for replicated ledgers.
//!
//! Replicas applying the same transition stream against equally seeded
//! backends reach identical tables.  [`state_root`] commits to those tables
//! with a domain-separated BLAKE2b-256 Merkle tree so replicas and
//! checkpoints can be compared without shipping the full state, and
//! [`record_proof`] lets a principal show their entry is part of a root.

use blake2::digest::{consts::U32, Digest};
use blake2::Blake2b;
use serde::{Deserialize, Serialize};

use crate::acl::{Grant, Grantee};
use crate::ledger::{LedgerState, PlayerRecord};
use crate::Principal;

/// 32-byte digest used for leaves and roots.
pub type StateDigest = [u8; 32];

const MERKLE_DOMAIN: &[u8] = b"VEIL_MERKLE";
const RECORD_TAG: u8 = 0x10;
const AGGREGATE_TAG: u8 = 0x20;
const TRANSITIONS_TAG: u8 = 0x28;
const GRANT_TAG: u8 = 0x30;

/// Node kinds hashed under [`MERKLE_DOMAIN`].
enum Node<'a> {
    Empty,
    Leaf(&'a StateDigest),
    Inner(&'a StateDigest, &'a StateDigest),
}

fn node_hash(node: Node<'_>) -> StateDigest {
    let mut hasher = Blake2b::<U32>::new();
    hasher.update(MERKLE_DOMAIN);
    match node {
        Node::Empty => hasher.update([1u8]),
        Node::Leaf(leaf) => {
            hasher.update([0u8]);
            hasher.update(leaf);
        }
        Node::Inner(left, right) => {
            hasher.update(left);
            hasher.update(right);
        }
    }
    hasher.finalize().into()
}

/// Every level of the tree, leaf hashes first and the root layer last.
/// An odd node at the end of a level is promoted unchanged.
fn tree_levels(leaves: &[StateDigest]) -> Vec<Vec<StateDigest>> {
    let mut levels = vec![leaves.iter().map(|l| node_hash(Node::Leaf(l))).collect::<Vec<_>>()];
    while let Some(level) = levels.last().filter(|level| level.len() > 1) {
        let parent = level
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => node_hash(Node::Inner(left, right)),
                [odd] => *odd,
                _ => unreachable!("chunks(2) yields one or two items"),
            })
            .collect();
        levels.push(parent);
    }
    levels
}

/// Merkle root over `leaves`.
pub fn merkle_root(leaves: &[StateDigest]) -> StateDigest {
    tree_levels(leaves)
        .last()
        .and_then(|top| top.first().copied())
        .unwrap_or_else(|| node_hash(Node::Empty))
}

fn principal_bytes(hasher: &mut Blake2b<U32>, principal: &Principal) {
    hasher.update((principal.as_str().len() as u64).to_be_bytes());
    hasher.update(principal.as_str().as_bytes());
}

/// Canonical leaf for one player record.
pub fn record_leaf(principal: &Principal, record: &PlayerRecord) -> StateDigest {
    let mut hasher = Blake2b::<U32>::new();
    hasher.update([RECORD_TAG]);
    principal_bytes(&mut hasher, principal);
    hasher.update(record.encrypted_total.as_bytes());
    hasher.update([u8::from(record.exists)]);
    hasher.update(record.last_contribution_time.to_be_bytes());
    hasher.finalize().into()
}

fn grant_leaf(grant: &Grant) -> StateDigest {
    let mut hasher = Blake2b::<U32>::new();
    hasher.update([GRANT_TAG]);
    hasher.update(grant.handle.as_bytes());
    match &grant.grantee {
        Grantee::Ledger => hasher.update([0u8]),
        Grantee::Principal(principal) => {
            hasher.update([1u8]);
            principal_bytes(&mut hasher, principal);
        }
    }
    hasher.finalize().into()
}

/// Leaves in canonical order: records in registry order, the aggregate, the
/// transition counter, then grants.
pub fn state_leaves(state: &LedgerState) -> Vec<StateDigest> {
    let mut leaves = Vec::with_capacity(state.registry().len() + 2 + state.grants().len());
    for principal in state.registry() {
        if let Some(record) = state.record(principal) {
            leaves.push(record_leaf(principal, record));
        }
    }
    let mut hasher = Blake2b::<U32>::new();
    hasher.update([AGGREGATE_TAG]);
    hasher.update(state.aggregate().as_bytes());
    leaves.push(hasher.finalize().into());
    let mut hasher = Blake2b::<U32>::new();
    hasher.update([TRANSITIONS_TAG]);
    hasher.update(state.transitions().to_be_bytes());
    leaves.push(hasher.finalize().into());
    leaves.extend(state.grants().iter().map(grant_leaf));
    leaves
}

/// Commitment to all four ledger tables and the transition counter.
pub fn state_root(state: &LedgerState) -> StateDigest {
    merkle_root(&state_leaves(state))
}

/// Sibling hash encountered while walking the tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProofNode {
    /// Hex-encoded sibling digest.
    #[serde(with = "hex_digest")]
    pub sibling: StateDigest,
    /// `true` if the sibling is on the left-hand side of the pair.
    pub left: bool,
}

/// Inclusion proof for a single leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    /// Root the proof recomputes.
    #[serde(with = "hex_digest")]
    pub root: StateDigest,
    /// Leaf digest being proven.
    #[serde(with = "hex_digest")]
    pub leaf: StateDigest,
    /// Index of the leaf.
    pub index: usize,
    /// Path from leaf to root.
    pub path: Vec<MerkleProofNode>,
}

/// Inclusion proof for the leaf at `index`.
pub fn build_proof(leaves: &[StateDigest], index: usize) -> Option<MerkleProof> {
    let leaf = *leaves.get(index)?;
    let levels = tree_levels(leaves);
    let mut path = Vec::new();
    let mut position = index;
    for level in &levels[..levels.len() - 1] {
        let sibling = position ^ 1;
        if let Some(digest) = level.get(sibling) {
            path.push(MerkleProofNode {
                sibling: *digest,
                left: sibling < position,
            });
        }
        position /= 2;
    }
    let root = levels.last()?.first().copied()?;
    Some(MerkleProof {
        root,
        leaf,
        index,
        path,
    })
}

/// Checks whether `proof` recomputes its advertised root.
pub fn verify_proof(proof: &MerkleProof) -> bool {
    let computed = proof
        .path
        .iter()
        .fold(node_hash(Node::Leaf(&proof.leaf)), |acc, node| {
            if node.left {
                node_hash(Node::Inner(&node.sibling, &acc))
            } else {
                node_hash(Node::Inner(&acc, &node.sibling))
            }
        });
    computed == proof.root
}

/// Proof that `principal`'s current record is committed by [`state_root`].
pub fn record_proof(state: &LedgerState, principal: &Principal) -> Option<MerkleProof> {
    let index = state.registry().iter().position(|p| p == principal)?;
    build_proof(&state_leaves(state), index)
}

mod hex_digest {
    use super::StateDigest;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(digest: &StateDigest, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(digest))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<StateDigest, D::Error> {
        let raw = String::deserialize(d)?;
        let bytes = hex::decode(&raw).map_err(de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| de::Error::custom("digest must be 32 bytes"))
    }
}
