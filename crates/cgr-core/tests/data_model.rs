// crates/cgr-core/tests/data_model.rs
// ============================================================================
// Test: Cross-module data model invariants.
// ============================================================================

//! Cross-module data model invariants.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use cgr_core::event::EventType;
use cgr_core::event::derive_causal_hash;
use cgr_core::event::derive_event_id;
use cgr_core::hashing::hash_canonical_json;
use cgr_core::identifiers::ActorId;
use cgr_core::identifiers::ConstitutionalHash;
use cgr_core::time::Timestamp;
use serde_json::json;

#[test]
fn constitutional_hash_round_trips_through_serde() {
    let anchor = ConstitutionalHash::new("0123456789abcdef").unwrap();
    let serialized = serde_json::to_string(&anchor).unwrap();
    let deserialized: ConstitutionalHash = serde_json::from_str(&serialized).unwrap();
    assert_eq!(anchor, deserialized);
}

#[test]
fn canonical_hashing_is_stable_across_invocations() {
    let payload = json!({"z": 1, "a": [1, 2, 3], "m": {"y": true, "x": false}});
    let first = hash_canonical_json(&payload).unwrap();
    let second = hash_canonical_json(&payload).unwrap();
    assert_eq!(first, second);
}

#[test]
fn event_ids_differ_for_different_payloads() {
    let actor = ActorId::new("agent-7").unwrap();
    let mut payload_a = BTreeMap::new();
    payload_a.insert("kind".to_string(), json!("alpha"));
    let mut payload_b = BTreeMap::new();
    payload_b.insert("kind".to_string(), json!("beta"));

    let id_a = derive_event_id(EventType::PolicyCreated, Timestamp::from_unix_millis(1), &actor, &payload_a).unwrap();
    let id_b = derive_event_id(EventType::PolicyCreated, Timestamp::from_unix_millis(1), &actor, &payload_b).unwrap();
    assert_ne!(id_a, id_b);

    let parents: BTreeSet<_> = BTreeSet::new();
    let causal_a = derive_causal_hash(&id_a, &parents, &payload_a).unwrap();
    let causal_b = derive_causal_hash(&id_b, &parents, &payload_b).unwrap();
    assert_ne!(causal_a, causal_b);
}
