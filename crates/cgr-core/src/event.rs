// crates/cgr-core/src/event.rs
// ============================================================================
// Module: Constitutional Governance Runtime Temporal Events
// Description: Content-addressed, causally-ordered event records.
// Purpose: Shared event shape consumed by the temporal engine, the Merkle
//          ledger (as hashed leaves), and the HITL chain (as recorded
//          transitions).
// Dependencies: crate::hashing, crate::identifiers, crate::time
// ============================================================================

//! ## Overview
//! [`ConstitutionalEvent`] is immutable once recorded (spec.md §3
//! "Constitutional Event"). Its `id` and `causal_hash` are both
//! content-addressed; this module only defines the shape and the two
//! deterministic derivations, not the append-only log itself (that lives in
//! `cgr-temporal`).

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::hashing::HashDigest;
use crate::hashing::HashingError;
use crate::hashing::hash_canonical_json;
use crate::identifiers::ActorId;
use crate::identifiers::ConstitutionalHash;
use crate::identifiers::EventId;
use crate::time::Timestamp;

// ============================================================================
// SECTION: Event Type
// ============================================================================

/// Kind of constitutional event recorded in the temporal log.
///
/// # Invariants
/// - Variants are stable for serialization and contract matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A policy was created.
    PolicyCreated,
    /// A policy was executed against an envelope.
    PolicyExecuted,
    /// A decision was made (router, guardrail, or HITL).
    DecisionMade,
    /// A validation pass completed.
    ValidationCompleted,
    /// A constitutional review occurred.
    ConstitutionalReview,
    /// A branch (per-tenant/namespace state) action occurred.
    BranchAction,
    /// Consensus was achieved across deliberating agents.
    ConsensusAchieved,
}

// ============================================================================
// SECTION: Event
// ============================================================================

/// An immutable, causally-ordered constitutional event.
///
/// # Invariants
/// - `id` is content-addressed from `event_type`, `timestamp`, `actor`, and
///   `payload` (spec.md §4.B "Algorithm").
/// - `causal_hash` is derived from `id`, sorted `parent_ids`, and `payload`.
/// - Immutable once recorded; the temporal engine never mutates a stored
///   event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstitutionalEvent {
    /// Content-addressed event identifier.
    pub id: EventId,
    /// Event type.
    pub event_type: EventType,
    /// Event timestamp.
    pub timestamp: Timestamp,
    /// Actor that produced the event.
    pub actor: ActorId,
    /// Opaque event payload.
    pub payload: BTreeMap<String, Value>,
    /// Parent event identifiers (causal predecessors).
    pub parent_ids: BTreeSet<EventId>,
    /// Causal hash derived from id, sorted parents, and payload.
    pub causal_hash: HashDigest,
    /// Constitutional anchor carried by this event.
    pub constitutional_hash: ConstitutionalHash,
}

/// Canonical id-derivation input, kept separate from [`ConstitutionalEvent`]
/// so the hash is computed before the event (and thus its id) exists.
#[derive(Serialize)]
struct IdDerivationInput<'a> {
    event_type: EventType,
    timestamp: Timestamp,
    actor: &'a ActorId,
    payload: &'a BTreeMap<String, Value>,
}

/// Canonical causal-hash derivation input.
#[derive(Serialize)]
struct CausalHashInput<'a> {
    id: &'a EventId,
    parent_ids: &'a BTreeSet<EventId>,
    payload: &'a BTreeMap<String, Value>,
}

/// Derives the content-addressed id for an event from its defining fields.
///
/// # Errors
///
/// Returns [`HashingError`] when the inputs cannot be canonicalized.
pub fn derive_event_id(
    event_type: EventType,
    timestamp: Timestamp,
    actor: &ActorId,
    payload: &BTreeMap<String, Value>,
) -> Result<EventId, HashingError> {
    let digest = hash_canonical_json(&IdDerivationInput {
        event_type,
        timestamp,
        actor,
        payload,
    })?;
    Ok(EventId::from_digest(&digest))
}

/// Derives the causal hash for an event from its id, sorted parents, and payload.
///
/// # Errors
///
/// Returns [`HashingError`] when the inputs cannot be canonicalized.
pub fn derive_causal_hash(
    id: &EventId,
    parent_ids: &BTreeSet<EventId>,
    payload: &BTreeMap<String, Value>,
) -> Result<HashDigest, HashingError> {
    hash_canonical_json(&CausalHashInput {
        id,
        parent_ids,
        payload,
    })
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    reason = "Test-only assertions are permitted."
)]
mod tests {
    use std::collections::BTreeMap;
    use std::collections::BTreeSet;

    use super::EventType;
    use super::derive_causal_hash;
    use super::derive_event_id;
    use crate::identifiers::ActorId;
    use crate::time::Timestamp;

    #[test]
    fn event_id_is_deterministic() {
        let actor = ActorId::new("agent-1").unwrap();
        let payload = BTreeMap::new();
        let a = derive_event_id(EventType::DecisionMade, Timestamp::from_unix_millis(1), &actor, &payload).unwrap();
        let b = derive_event_id(EventType::DecisionMade, Timestamp::from_unix_millis(1), &actor, &payload).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn causal_hash_depends_on_sorted_parents() {
        let id = super::EventId::new("abc").unwrap();
        let payload = BTreeMap::new();
        let mut parents_a = BTreeSet::new();
        parents_a.insert(super::EventId::new("p1").unwrap());
        parents_a.insert(super::EventId::new("p2").unwrap());
        let mut parents_b = BTreeSet::new();
        parents_b.insert(super::EventId::new("p2").unwrap());
        parents_b.insert(super::EventId::new("p1").unwrap());
        let hash_a = derive_causal_hash(&id, &parents_a, &payload).unwrap();
        let hash_b = derive_causal_hash(&id, &parents_b, &payload).unwrap();
        assert_eq!(hash_a, hash_b);
    }
}
