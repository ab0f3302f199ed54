// crates/cgr-ledger/src/merkle.rs
// ============================================================================
// Module: Merkle Tree Construction
// Description: Pure tree-building and proof-extraction functions.
// Purpose: Isolate the tree algorithm (spec.md §4.A "Algorithm") from queueing
//          and persistence concerns so it can be tested in isolation.
// Dependencies: cgr-core
// ============================================================================

//! ## Overview
//! Builds a full binary Merkle tree over leaf digests, duplicating an
//! unpaired trailing node at each level (odd-count self-pairing), and
//! extracts a sibling-path inclusion proof for any leaf index.

use cgr_core::hashing::hash_concat;
use cgr_core::hashing::HashDigest;
use cgr_core::hashing::ProofStep;

/// One level of a Merkle tree, leaves first.
pub type TreeLevels = Vec<Vec<HashDigest>>;

/// Builds every level of the tree from `leaves`, up to and including the
/// single-node root level.
///
/// # Panics
///
/// Never panics on an empty slice of levels internally; callers must not pass
/// an empty `leaves` vector (a batch is never committed with zero entries).
#[must_use]
pub fn build_levels(leaves: Vec<HashDigest>) -> TreeLevels {
    let mut levels = vec![leaves];
    loop {
        let Some(prev) = levels.last() else {
            break;
        };
        if prev.len() <= 1 {
            break;
        }
        let mut next = Vec::with_capacity(prev.len().div_ceil(2));
        let mut i = 0;
        while i < prev.len() {
            let left = &prev[i];
            let right = prev.get(i + 1).unwrap_or(left);
            next.push(hash_concat(left, right));
            i += 2;
        }
        levels.push(next);
    }
    levels
}

/// Returns the root hash of a built tree, `None` only if `levels` is empty.
#[must_use]
pub fn root_of(levels: &TreeLevels) -> Option<HashDigest> {
    levels.last().and_then(|level| level.first()).cloned()
}

/// Extracts the sibling-path inclusion proof for leaf `index`.
#[must_use]
pub fn build_proof(levels: &TreeLevels, mut index: usize) -> Vec<ProofStep> {
    let mut proof = Vec::new();
    for level in levels.iter().take(levels.len().saturating_sub(1)) {
        let is_left_of_pair = index % 2 != 0;
        let sibling_index = if is_left_of_pair {
            index - 1
        } else if index + 1 < level.len() {
            index + 1
        } else {
            index
        };
        let Some(sibling) = level.get(sibling_index) else {
            break;
        };
        proof.push(ProofStep {
            sibling: sibling.clone(),
            is_left_of_pair,
        });
        index /= 2;
    }
    proof
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    reason = "Test-only assertions are permitted."
)]
mod tests {
    use super::build_levels;
    use super::build_proof;
    use super::root_of;
    use cgr_core::hashing::hash_bytes;
    use cgr_core::hashing::recompute_root;

    #[test]
    fn single_leaf_root_equals_leaf_hash() {
        let leaf = hash_bytes(b"only");
        let levels = build_levels(vec![leaf.clone()]);
        assert_eq!(root_of(&levels), Some(leaf.clone()));
        assert!(build_proof(&levels, 0).is_empty());
    }

    #[test]
    fn odd_leaf_count_self_pairs_and_verifies() {
        let leaves: Vec<_> = ["a", "b", "c"].iter().map(|s| hash_bytes(s.as_bytes())).collect();
        let levels = build_levels(leaves.clone());
        let root = root_of(&levels).unwrap();
        for (index, leaf) in leaves.iter().enumerate() {
            let proof = build_proof(&levels, index);
            assert_eq!(recompute_root(leaf, &proof), root);
        }
    }

    #[test]
    fn four_leaf_proof_has_length_two_and_verifies() {
        let leaves: Vec<_> = ["a", "b", "c", "d"].iter().map(|s| hash_bytes(s.as_bytes())).collect();
        let levels = build_levels(leaves.clone());
        let root = root_of(&levels).unwrap();
        let proof = build_proof(&levels, 1);
        assert_eq!(proof.len(), 2);
        assert_eq!(recompute_root(&leaves[1], &proof), root);
    }

    #[test]
    fn tampered_leaf_fails_verification() {
        let leaves: Vec<_> = ["a", "b", "c", "d"].iter().map(|s| hash_bytes(s.as_bytes())).collect();
        let levels = build_levels(leaves.clone());
        let root = root_of(&levels).unwrap();
        let proof = build_proof(&levels, 1);
        let tampered = hash_bytes(b"tampered");
        assert_ne!(recompute_root(&tampered, &proof), root);
    }
}
