// crates/cgr-hitl/src/audit.rs
// ============================================================================
// Module: Chain-Local Audit Ledger
// Description: Append-only, checksum-chained audit trail, separate from
//              component A's Merkle ledger.
// Purpose: Implement spec.md §4.E.3 exactly, including `verify_integrity`
//          and the documented test-only `clear` bypass.
// Dependencies: cgr-core, cgr-providers
// ============================================================================

//! ## Overview
//! Every HITL state transition is appended here via [`HitlAuditLedger::append`]
//! in addition to being recorded as a temporal event and (optionally) in the
//! Merkle ledger elsewhere. The chain is process-wide rather than
//! per-request: `parent_entry_id` always points at the most recently
//! appended entry, so any single missing or reordered entry breaks
//! [`HitlAuditLedger::verify_integrity`] for the whole chain, not just one
//! request.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

use cgr_core::hashing;
use cgr_core::hitl::HitlActorType;
use cgr_core::hitl::HitlAuditEntry;
use cgr_core::hitl::HitlEntryType;
use cgr_core::hitl::HitlTargetKind;
use cgr_core::identifiers::ActorId;
use cgr_core::identifiers::HitlEntryId;
use cgr_core::time::Timestamp;
use cgr_providers::KvStore;
use serde::Serialize;
use serde_json::Value;

/// External-store key holding the score-sorted, time-ordered set of entry ids.
const BY_TIME_KEY: &str = "hitl:audit:entries";
/// External-store key holding the id of the most recently appended entry.
const LAST_ENTRY_KEY: &str = "hitl:audit:last_entry";

/// Errors raised appending to or reading the chain-local audit ledger.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// The external store rejected an operation.
    #[error("hitl audit store error: {0}")]
    Store(String),
    /// An entry's checksum could not be computed.
    #[error("hitl audit checksum computation failed: {0}")]
    Checksum(String),
}

impl From<cgr_providers::KvStoreError> for AuditError {
    fn from(err: cgr_providers::KvStoreError) -> Self {
        Self::Store(err.to_string())
    }
}

/// A field subset of [`HitlAuditEntry`] used only to compute the checksum,
/// since the checksum itself must be excluded from its own input.
#[derive(Serialize)]
struct ChecksumInput<'a> {
    id: &'a HitlEntryId,
    entry_type: HitlEntryType,
    timestamp: Timestamp,
    actor_id: &'a ActorId,
    actor_type: HitlActorType,
    actor_role: &'a Option<String>,
    target_kind: HitlTargetKind,
    target_id: &'a str,
    previous_state: &'a Option<String>,
    new_state: &'a str,
    action_details: &'a BTreeMap<String, Value>,
    rationale: &'a Option<String>,
    parent_entry_id: &'a Option<HitlEntryId>,
}

/// One integrity error found by [`HitlAuditLedger::verify_integrity`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityError {
    /// An entry's stored checksum does not match its recomputed checksum.
    ChecksumMismatch {
        /// The offending entry's id.
        entry_id: String,
    },
    /// An entry's `parent_entry_id` does not reference an entry that exists
    /// earlier in the chain (and the entry is not the genesis entry).
    DanglingParent {
        /// The offending entry's id.
        entry_id: String,
        /// The missing parent id.
        parent_id: String,
    },
    /// An entry's timestamp precedes its predecessor's, violating the
    /// chain's monotonic-time invariant.
    NonMonotonicTimestamp {
        /// The offending entry's id.
        entry_id: String,
    },
}

/// Append-only, checksum-chained audit trail local to the HITL component
/// (spec.md §4.E.3), kept separate from component A's Merkle ledger.
pub struct HitlAuditLedger {
    store: Arc<dyn KvStore>,
    append_lock: Mutex<()>,
}

impl HitlAuditLedger {
    /// Builds a chain-local audit ledger backed by `store`.
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            append_lock: Mutex::new(()),
        }
    }

    /// Appends one entry to the chain, computing its checksum and wiring
    /// `parent_entry_id` to whatever was most recently appended.
    ///
    /// The in-process lock serializes the whole append path (read last id,
    /// compute checksum, persist, update last id) so the chain forms a
    /// single, unambiguous sequence even under concurrent callers.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError`] if the store rejects a write or the entry
    /// cannot be canonicalized for checksumming.
    #[allow(clippy::too_many_arguments, reason = "mirrors the append(entry_type, actor, target, previous_state, new_state, rationale) contract named by spec")]
    pub async fn append(
        &self,
        entry_type: HitlEntryType,
        actor_id: ActorId,
        actor_type: HitlActorType,
        actor_role: Option<String>,
        target_kind: HitlTargetKind,
        target_id: String,
        previous_state: Option<String>,
        new_state: String,
        action_details: BTreeMap<String, Value>,
        rationale: Option<String>,
        now: Timestamp,
    ) -> Result<HitlAuditEntry, AuditError> {
        let _guard = self.append_lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        let parent_entry_id = self
            .store
            .get(LAST_ENTRY_KEY)
            .await?
            .filter(|raw| !raw.is_empty())
            .map(|raw| HitlEntryId::new(raw).unwrap_or_else(|_| unreachable!("filtered out the empty case above")));
        let id = HitlEntryId::new(uuid::Uuid::new_v4().to_string()).unwrap_or_else(|_| unreachable!("a freshly generated uuid string is never empty"));

        let checksum = hashing::hash_canonical_json(&ChecksumInput {
            id: &id,
            entry_type,
            timestamp: now,
            actor_id: &actor_id,
            actor_type,
            actor_role: &actor_role,
            target_kind,
            target_id: &target_id,
            previous_state: &previous_state,
            new_state: &new_state,
            action_details: &action_details,
            rationale: &rationale,
            parent_entry_id: &parent_entry_id,
        })
        .map_err(|err| AuditError::Checksum(err.to_string()))?;

        let entry = HitlAuditEntry {
            id,
            entry_type,
            timestamp: now,
            actor_id,
            actor_type,
            actor_role,
            target_kind,
            target_id,
            previous_state,
            new_state,
            action_details,
            rationale,
            parent_entry_id,
            checksum,
        };

        self.persist(&entry).await?;
        self.store.set(LAST_ENTRY_KEY, entry.id.as_str()).await?;
        Ok(entry)
    }

    /// Walks the chain in time order (oldest first, capped at `limit` when
    /// given) and checks checksum correctness, parent linkage, and
    /// timestamp monotonicity.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError`] only if the store itself cannot be read; a
    /// broken chain is reported via the returned error list, not this
    /// function's `Result`.
    pub async fn verify_integrity(&self, limit: Option<usize>) -> Result<(bool, Vec<IntegrityError>), AuditError> {
        let members = self.store.zrangebyscore(BY_TIME_KEY, f64::MIN, f64::MAX).await?;
        let capped: Vec<_> = match limit {
            Some(limit) => members.into_iter().take(limit).collect(),
            None => members,
        };

        let mut errors = Vec::new();
        let mut seen_ids: std::collections::HashSet<String> = std::collections::HashSet::new();
        let mut previous_timestamp: Option<Timestamp> = None;

        for scored in &capped {
            let Some(entry) = self.load(&scored.member).await? else {
                continue;
            };

            let recomputed = hashing::hash_canonical_json(&ChecksumInput {
                id: &entry.id,
                entry_type: entry.entry_type,
                timestamp: entry.timestamp,
                actor_id: &entry.actor_id,
                actor_type: entry.actor_type,
                actor_role: &entry.actor_role,
                target_kind: entry.target_kind,
                target_id: &entry.target_id,
                previous_state: &entry.previous_state,
                new_state: &entry.new_state,
                action_details: &entry.action_details,
                rationale: &entry.rationale,
                parent_entry_id: &entry.parent_entry_id,
            });
            let checksum_ok = matches!(&recomputed, Ok(digest) if digest.as_str() == entry.checksum.as_str());
            if !checksum_ok {
                errors.push(IntegrityError::ChecksumMismatch {
                    entry_id: entry.id.to_string(),
                });
            }

            match &entry.parent_entry_id {
                Some(parent) if !seen_ids.contains(parent.as_str()) => {
                    errors.push(IntegrityError::DanglingParent {
                        entry_id: entry.id.to_string(),
                        parent_id: parent.to_string(),
                    });
                }
                _ => {}
            }

            if let Some(previous) = previous_timestamp {
                if entry.timestamp < previous {
                    errors.push(IntegrityError::NonMonotonicTimestamp {
                        entry_id: entry.id.to_string(),
                    });
                }
            }
            previous_timestamp = Some(entry.timestamp);
            seen_ids.insert(entry.id.to_string());
        }

        Ok((errors.is_empty(), errors))
    }

    /// Destroys every entry in the chain. Test-only: this is an explicit
    /// bypass of the append-only invariant and must never be called from
    /// production code paths.
    pub async fn clear(&self) {
        let members = self.store.zrangebyscore(BY_TIME_KEY, f64::MIN, f64::MAX).await.unwrap_or_default();
        for scored in members {
            let _ = self.store.zrem(BY_TIME_KEY, &scored.member).await;
        }
        let _ = self.store.set(LAST_ENTRY_KEY, "").await;
    }

    /// Persists one entry: hash keyed by id, time-ordered membership, and
    /// secondary indexes by target id, actor id, and entry type.
    async fn persist(&self, entry: &HitlAuditEntry) -> Result<(), AuditError> {
        let encoded = serde_json::to_string(entry).map_err(|err| AuditError::Checksum(err.to_string()))?;
        let key = entry.id.as_str();
        self.store.hset(&format!("hitl:audit:data:{key}"), "entry", &encoded).await?;
        #[allow(clippy::cast_precision_loss, reason = "millisecond timestamps fit f64's exact-integer range for centuries")]
        let score = entry.timestamp.as_unix_millis() as f64;
        self.store.zadd(BY_TIME_KEY, key, score).await?;
        self.store.zadd(&format!("hitl:audit:request:{}", entry.target_id), key, score).await?;
        self.store.zadd(&format!("hitl:audit:actor:{}", entry.actor_id), key, score).await?;
        self.store.zadd(&format!("hitl:audit:type:{:?}", entry.entry_type), key, score).await?;
        Ok(())
    }

    /// Loads one entry back from the store by id.
    async fn load(&self, id: &str) -> Result<Option<HitlAuditEntry>, AuditError> {
        let fields = self.store.hgetall(&format!("hitl:audit:data:{id}")).await?;
        let Some(raw) = fields.get("entry") else {
            return Ok(None);
        };
        let entry = serde_json::from_str(raw).map_err(|err| AuditError::Checksum(err.to_string()))?;
        Ok(Some(entry))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, reason = "Test-only assertions are permitted.")]
mod tests {
    use super::HitlAuditLedger;
    use cgr_core::hitl::HitlActorType;
    use cgr_core::hitl::HitlEntryType;
    use cgr_core::hitl::HitlTargetKind;
    use cgr_core::identifiers::ActorId;
    use cgr_core::time::Timestamp;
    use cgr_providers::InMemoryKvStore;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    #[tokio::test]
    async fn first_entry_has_no_parent_and_verifies() {
        let ledger = HitlAuditLedger::new(Arc::new(InMemoryKvStore::new()));
        let entry = ledger
            .append(
                HitlEntryType::ApprovalCreated,
                ActorId::new("requester-1").unwrap(),
                HitlActorType::Human,
                None,
                HitlTargetKind::Request,
                "req-1".to_string(),
                None,
                "pending".to_string(),
                BTreeMap::new(),
                None,
                Timestamp::from_unix_millis(0),
            )
            .await
            .unwrap();
        assert!(entry.parent_entry_id.is_none());
        let (ok, errors) = ledger.verify_integrity(None).await.unwrap();
        assert!(ok, "{errors:?}");
    }

    #[tokio::test]
    async fn second_entry_chains_to_the_first() {
        let ledger = HitlAuditLedger::new(Arc::new(InMemoryKvStore::new()));
        let first = ledger
            .append(
                HitlEntryType::ApprovalCreated,
                ActorId::new("requester-1").unwrap(),
                HitlActorType::Human,
                None,
                HitlTargetKind::Request,
                "req-1".to_string(),
                None,
                "pending".to_string(),
                BTreeMap::new(),
                None,
                Timestamp::from_unix_millis(0),
            )
            .await
            .unwrap();
        let second = ledger
            .append(
                HitlEntryType::ApprovalApproved,
                ActorId::new("approver-1").unwrap(),
                HitlActorType::Human,
                None,
                HitlTargetKind::Request,
                "req-1".to_string(),
                Some("pending".to_string()),
                "approved".to_string(),
                BTreeMap::new(),
                None,
                Timestamp::from_unix_millis(10),
            )
            .await
            .unwrap();
        assert_eq!(second.parent_entry_id, Some(first.id));
        let (ok, errors) = ledger.verify_integrity(None).await.unwrap();
        assert!(ok, "{errors:?}");
    }

    #[tokio::test]
    async fn clear_destroys_the_chain() {
        let ledger = HitlAuditLedger::new(Arc::new(InMemoryKvStore::new()));
        ledger
            .append(
                HitlEntryType::ApprovalCreated,
                ActorId::new("requester-1").unwrap(),
                HitlActorType::Human,
                None,
                HitlTargetKind::Request,
                "req-1".to_string(),
                None,
                "pending".to_string(),
                BTreeMap::new(),
                None,
                Timestamp::from_unix_millis(0),
            )
            .await
            .unwrap();
        ledger.clear().await;
        let (ok, errors) = ledger.verify_integrity(None).await.unwrap();
        assert!(ok);
        assert!(errors.is_empty());
    }
}
