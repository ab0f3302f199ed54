// crates/cgr-core/src/ledger.rs
// ============================================================================
// Module: Constitutional Governance Runtime Ledger Types
// Description: Write-once audit entries and committed Merkle batches.
// Purpose: Shared shape between `cgr-ledger` (which builds and persists
//          batches) and every component that submits validation outcomes.
// Dependencies: crate::hashing, crate::identifiers, crate::time
// ============================================================================

//! ## Overview
//! [`AuditLedgerEntry`] is write-once (spec.md §3 "Audit Ledger Entry");
//! [`MerkleBatch`] is immutable once committed. This module defines the
//! shapes only; batching, queuing, and persistence live in `cgr-ledger`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::hashing::HashDigest;
use crate::hashing::ProofStep;
use crate::identifiers::BatchId;
use crate::time::Timestamp;

// ============================================================================
// SECTION: Audit Ledger Entry
// ============================================================================

/// A single write-once validation outcome submitted to the Merkle ledger.
///
/// # Invariants
/// - `entry_hash` is the SHA-256 over the canonical serialization of
///   `payload` (spec.md §3 "Audit Ledger Entry").
/// - `batch_id` and `proof` are `None` until the entry is committed into a
///   batch; once set, neither is ever cleared.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLedgerEntry {
    /// The validation result payload submitted by the caller.
    pub payload: Value,
    /// SHA-256 over the canonical serialization of `payload`.
    pub entry_hash: HashDigest,
    /// Submission timestamp.
    pub timestamp: Timestamp,
    /// Batch identifier, `None` until committed.
    pub batch_id: Option<BatchId>,
    /// Merkle inclusion proof, `None` until committed.
    pub proof: Option<Vec<ProofStep>>,
}

// ============================================================================
// SECTION: Merkle Batch
// ============================================================================

/// A committed, immutable Merkle batch.
///
/// # Invariants
/// - Once committed, `leaves` and `root` never change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerkleBatch {
    /// Batch identifier of the form `batch_<counter>_<unix_seconds>`.
    pub batch_id: BatchId,
    /// Ordered leaf hashes included in this batch.
    pub leaves: Vec<HashDigest>,
    /// Root hash of the batch's Merkle tree.
    pub root: HashDigest,
    /// Commitment timestamp.
    pub committed_at: Timestamp,
}
