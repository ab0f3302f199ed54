// crates/cgr-core/src/hashing.rs
// ============================================================================
// Module: Constitutional Governance Runtime Hashing
// Description: Canonical JSON serialization and SHA-256 digests.
// Purpose: Give every component (ledger, temporal engine, HITL chain) one
//          deterministic hashing primitive so R1 (stable canonical hashing)
//          holds across the whole runtime.
// Dependencies: serde_json, serde_jcs, sha2
// ============================================================================

//! ## Overview
//! All content-addressing in the runtime (event ids, causal hashes, ledger
//! leaves, HITL checksums) goes through [`canonical_json_bytes`] before being
//! hashed, so two equal JSON values always hash identically regardless of key
//! insertion order (testable property R1 in `spec.md` §8).

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while canonicalizing or hashing a payload.
#[derive(Debug, thiserror::Error)]
pub enum HashingError {
    /// The payload could not be serialized to canonical JSON.
    #[error("canonicalization failed: {0}")]
    Canonicalize(String),
}

// ============================================================================
// SECTION: Digest
// ============================================================================

/// A SHA-256 digest rendered as lowercase hex.
///
/// # Invariants
/// - Always exactly 64 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HashDigest(String);

impl HashDigest {
    /// Wraps a precomputed hex digest without validation.
    ///
    /// Intended for rehydrating digests already validated at write time (for
    /// example, digests loaded back from a persisted ledger batch).
    #[must_use]
    pub fn from_hex_unchecked(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    /// Returns the digest as a hex string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the raw 32 bytes backing this digest, if the hex is well formed.
    #[must_use]
    pub fn as_bytes(&self) -> Option<[u8; 32]> {
        if self.0.len() != 64 {
            return None;
        }
        let mut out = [0u8; 32];
        for (i, chunk) in self.0.as_bytes().chunks(2).enumerate() {
            let byte_str = std::str::from_utf8(chunk).ok()?;
            out[i] = u8::from_str_radix(byte_str, 16).ok()?;
        }
        Some(out)
    }
}

impl fmt::Display for HashDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// SECTION: Canonicalization
// ============================================================================

/// Serializes a value to RFC 8785-style canonical JSON bytes (sorted keys,
/// stable number/string encoding).
///
/// # Errors
///
/// Returns [`HashingError::Canonicalize`] when `value` cannot be serialized.
pub fn canonical_json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, HashingError> {
    serde_jcs::to_vec(value).map_err(|err| HashingError::Canonicalize(err.to_string()))
}

/// Computes the SHA-256 digest of raw bytes.
#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> HashDigest {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    HashDigest(hex_encode(hasher.finalize().as_slice()))
}

/// Computes the SHA-256 digest of a value's canonical JSON encoding.
///
/// # Errors
///
/// Returns [`HashingError::Canonicalize`] when `value` cannot be serialized.
pub fn hash_canonical_json<T: Serialize>(value: &T) -> Result<HashDigest, HashingError> {
    let bytes = canonical_json_bytes(value)?;
    Ok(hash_bytes(&bytes))
}

/// Computes SHA-256 over the concatenation of two digests' raw bytes, falling
/// back to concatenating their hex text when either digest is not well-formed
/// 32-byte hex (defensive path for digests rehydrated from untrusted storage).
#[must_use]
pub fn hash_concat(left: &HashDigest, right: &HashDigest) -> HashDigest {
    let mut buf = Vec::with_capacity(64);
    match (left.as_bytes(), right.as_bytes()) {
        (Some(l), Some(r)) => {
            buf.extend_from_slice(&l);
            buf.extend_from_slice(&r);
        }
        _ => {
            buf.extend_from_slice(left.as_str().as_bytes());
            buf.extend_from_slice(right.as_str().as_bytes());
        }
    }
    hash_bytes(&buf)
}

/// Encodes bytes as a lowercase hex string.
fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

// ============================================================================
// SECTION: Merkle Proof Steps
// ============================================================================

/// One step of a Merkle inclusion proof: a sibling digest and whether that
/// sibling sits to the left of the running hash when concatenating.
///
/// # Invariants
/// - `is_left_of_pair == true` means `concat(sibling, current)`; `false`
///   means `concat(current, sibling)` (spec.md §4.A "Algorithm").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    /// Sibling digest at this level of the tree.
    pub sibling: HashDigest,
    /// Whether the sibling is the left operand of the pairwise hash.
    pub is_left_of_pair: bool,
}

/// Recomputes a Merkle root from a leaf hash and its inclusion proof.
///
/// Mirrors `spec.md` §4.A verbatim: start from the leaf hash, then for each
/// proof step, concatenate sibling and current according to
/// `is_left_of_pair` and hash again.
#[must_use]
pub fn recompute_root(leaf: &HashDigest, proof: &[ProofStep]) -> HashDigest {
    let mut current = leaf.clone();
    for step in proof {
        current = if step.is_left_of_pair {
            hash_concat(&step.sibling, &current)
        } else {
            hash_concat(&current, &step.sibling)
        };
    }
    current
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    reason = "Test-only assertions are permitted."
)]
mod tests {
    use super::ProofStep;
    use super::canonical_json_bytes;
    use super::hash_bytes;
    use super::hash_canonical_json;
    use super::recompute_root;
    use serde_json::json;

    #[test]
    fn canonical_json_is_stable_regardless_of_key_order() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(canonical_json_bytes(&a).unwrap(), canonical_json_bytes(&b).unwrap());
        assert_eq!(hash_canonical_json(&a).unwrap(), hash_canonical_json(&b).unwrap());
    }

    #[test]
    fn hash_bytes_is_deterministic() {
        let a = hash_bytes(b"leaf");
        let b = hash_bytes(b"leaf");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
    }

    #[test]
    fn single_leaf_proof_is_empty_and_root_is_leaf_hash() {
        let leaf = hash_bytes(b"only");
        let proof: Vec<ProofStep> = Vec::new();
        assert_eq!(recompute_root(&leaf, &proof), leaf);
    }
}
