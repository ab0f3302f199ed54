// crates/cgr-ledger/src/ledger.rs
// ============================================================================
// Module: Audit Ledger
// Description: Batched, queue-fed, Merkle-anchored audit ledger (component A).
// Purpose: Implement spec.md §4.A's public contract and algorithm: submit,
//          verify, query_by_batch, get_batch_root, force_commit, stats.
// Dependencies: cgr-core, cgr-providers, tokio
// ============================================================================

//! ## Overview
//! A single background worker drains a bounded submit queue and batches
//! entries into immutable Merkle trees (spec.md §4.A "Algorithm"). Submit
//! never blocks or errors on queue congestion; it drops the oldest
//! un-batched entry and logs a warning instead (spec.md §4.A "Failure
//! semantics").

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use cgr_core::hashing::hash_canonical_json;
use cgr_core::hashing::recompute_root;
use cgr_core::hashing::HashDigest;
use cgr_core::hashing::HashingError;
use cgr_core::hashing::ProofStep;
use cgr_core::identifiers::BatchId;
use cgr_core::ledger::AuditLedgerEntry;
use cgr_core::ledger::MerkleBatch;
use cgr_providers::Clock;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::sync::Notify;

use crate::merkle::build_levels;
use crate::merkle::build_proof;
use crate::merkle::root_of;
use crate::persistence::PersistenceBackend;
use crate::persistence::PersistenceError;

/// Tuning parameters for one [`AuditLedger`] instance.
#[derive(Debug, Clone, Copy)]
pub struct LedgerConfig {
    /// Number of entries that triggers a batch commit.
    pub batch_size: usize,
    /// Maximum number of un-batched entries held in the submit queue.
    pub queue_bound: usize,
    /// How often the background worker wakes to check for drain-triggered
    /// partial-batch commits when no new submission arrives.
    pub drain_interval: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            queue_bound: 10_000,
            drain_interval: Duration::from_secs(1),
        }
    }
}

/// Errors raised by ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The submitted payload could not be canonicalized or hashed.
    #[error(transparent)]
    Hashing(#[from] HashingError),
    /// No entries are pending; `force_commit` has nothing to flush.
    #[error("no pending entries to commit")]
    NothingToCommit,
    /// No batch with the given id has been committed.
    #[error("batch '{0}' was not found")]
    BatchNotFound(BatchId),
}

/// A point-in-time snapshot of ledger activity (spec.md §4.A `stats()`).
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerStats {
    /// Total entries ever submitted, including dropped ones.
    pub total_entries: u64,
    /// Entries accumulated in the current, not-yet-committed batch.
    pub current_batch_size: usize,
    /// Number of batches committed so far.
    pub batches_committed: u64,
    /// Entries waiting in the submit queue, not yet pulled into a batch.
    pub queue_depth: usize,
    /// Root hash of the most recently committed batch, if any.
    pub current_root_hash: Option<HashDigest>,
    /// Entries dropped from the submit queue due to overflow (spec.md §4.A
    /// "Failure semantics"), not part of the spec's named `stats()` fields
    /// but tracked for operational visibility.
    pub dropped_entries: u64,
}

struct LedgerState {
    queue: VecDeque<AuditLedgerEntry>,
    current_batch: Vec<AuditLedgerEntry>,
    committed_entries: HashMap<BatchId, Vec<AuditLedgerEntry>>,
    committed_batches: Vec<MerkleBatch>,
    batch_counter: u64,
}

struct LedgerInner {
    state: Mutex<LedgerState>,
    config: LedgerConfig,
    persistence: PersistenceBackend,
    clock: Arc<dyn Clock>,
    notify: Notify,
    total_entries: AtomicU64,
    batches_committed: AtomicU64,
    dropped_entries: AtomicU64,
}

/// A batched, queue-fed, Merkle-anchored audit ledger.
///
/// Cheaply cloneable; clones share the same background worker and state.
#[derive(Clone)]
pub struct AuditLedger {
    inner: Arc<LedgerInner>,
}

impl AuditLedger {
    /// Constructs a ledger, rehydrating committed batches from `persistence`
    /// if reachable, and spawns its background commit worker.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError`] only when the configured backend is
    /// reachable but returns malformed data; an unreachable backend yields an
    /// empty ledger rather than an error (spec.md §4.A "Persistence").
    pub async fn new(config: LedgerConfig, persistence: PersistenceBackend, clock: Arc<dyn Clock>) -> Result<Self, PersistenceError> {
        let rehydrated = persistence.rehydrate().await.unwrap_or_default();
        let mut committed_entries = HashMap::with_capacity(rehydrated.batches.len());
        let mut committed_batches = Vec::with_capacity(rehydrated.batches.len());
        for persisted in rehydrated.batches {
            committed_entries.insert(persisted.batch.batch_id.clone(), persisted.entries);
            committed_batches.push(persisted.batch);
        }
        let total_entries = committed_entries.values().map(Vec::len).sum::<usize>() as u64;
        let batches_committed = committed_batches.len() as u64;

        let inner = Arc::new(LedgerInner {
            state: Mutex::new(LedgerState {
                queue: VecDeque::new(),
                current_batch: Vec::new(),
                committed_entries,
                committed_batches,
                batch_counter: rehydrated.batch_counter,
            }),
            config,
            persistence,
            clock,
            notify: Notify::new(),
            total_entries: AtomicU64::new(total_entries),
            batches_committed: AtomicU64::new(batches_committed),
            dropped_entries: AtomicU64::new(0),
        });

        let worker_inner = Arc::clone(&inner);
        tokio::spawn(async move { run_worker(worker_inner).await });

        Ok(Self { inner })
    }

    /// Enqueues `payload` for batching.
    ///
    /// Never blocks and never fails on queue congestion: on overflow the
    /// oldest un-batched entry is dropped with a logged warning, and the
    /// hash of the newly submitted entry is still returned.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Hashing`] only if `payload` cannot be
    /// canonicalized (non-finite floats, cyclic structures are impossible in
    /// `serde_json::Value` but canonicalization can still fail on malformed
    /// UTF-8 map keys produced by a misbehaving caller).
    pub async fn submit(&self, payload: Value) -> Result<HashDigest, LedgerError> {
        let entry_hash = hash_canonical_json(&payload)?;
        let entry = AuditLedgerEntry {
            payload,
            entry_hash: entry_hash.clone(),
            timestamp: self.inner.clock.now(),
            batch_id: None,
            proof: None,
        };

        let mut state = self.inner.state.lock().await;
        if state.queue.len() >= self.inner.config.queue_bound {
            if let Some(dropped) = state.queue.pop_front() {
                self.inner.dropped_entries.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(entry_hash = %dropped.entry_hash, "submit queue overflow, dropping oldest un-batched entry");
            }
        }
        state.queue.push_back(entry);
        drop(state);

        self.inner.total_entries.fetch_add(1, Ordering::Relaxed);
        self.inner.notify.notify_one();
        Ok(entry_hash)
    }

    /// Recomputes the Merkle root from `leaf` and `proof` and compares it to
    /// `root`, per spec.md §4.A's proof-verification algorithm.
    #[must_use]
    pub fn verify(leaf: &HashDigest, proof: &[ProofStep], root: &HashDigest) -> bool {
        recompute_root(leaf, proof) == *root
    }

    /// Returns every committed entry in `batch_id`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::BatchNotFound`] if no such batch was committed.
    pub async fn query_by_batch(&self, batch_id: &BatchId) -> Result<Vec<AuditLedgerEntry>, LedgerError> {
        let state = self.inner.state.lock().await;
        state.committed_entries.get(batch_id).cloned().ok_or_else(|| LedgerError::BatchNotFound(batch_id.clone()))
    }

    /// Returns the Merkle root of `batch_id`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::BatchNotFound`] if no such batch was committed.
    pub async fn get_batch_root(&self, batch_id: &BatchId) -> Result<HashDigest, LedgerError> {
        let state = self.inner.state.lock().await;
        state
            .committed_batches
            .iter()
            .find(|batch| &batch.batch_id == batch_id)
            .map(|batch| batch.root.clone())
            .ok_or_else(|| LedgerError::BatchNotFound(batch_id.clone()))
    }

    /// Flushes the full submit queue and any partial batch into one or more
    /// committed batches, returning the id of the last batch committed.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NothingToCommit`] if both the queue and the
    /// current partial batch are empty.
    pub async fn force_commit(&self) -> Result<BatchId, LedgerError> {
        let mut last_committed = None;
        loop {
            let committed = self.drain_and_maybe_commit(true).await;
            match committed {
                Some(batch_id) => last_committed = Some(batch_id),
                None => break,
            }
        }
        last_committed.ok_or(LedgerError::NothingToCommit)
    }

    /// Returns a snapshot of ledger activity.
    pub async fn stats(&self) -> LedgerStats {
        let state = self.inner.state.lock().await;
        LedgerStats {
            total_entries: self.inner.total_entries.load(Ordering::Relaxed),
            current_batch_size: state.current_batch.len(),
            batches_committed: self.inner.batches_committed.load(Ordering::Relaxed),
            queue_depth: state.queue.len(),
            current_root_hash: state.committed_batches.last().map(|b| b.root.clone()),
            dropped_entries: self.inner.dropped_entries.load(Ordering::Relaxed),
        }
    }

    /// Pulls queued entries into the current batch and commits when the
    /// batch reaches its configured size, or, when `force` is set, commits
    /// any non-empty partial batch even below that threshold.
    ///
    /// Returns the committed batch id, if a commit happened.
    async fn drain_and_maybe_commit(&self, force: bool) -> Option<BatchId> {
        let mut state = self.inner.state.lock().await;
        while state.current_batch.len() < self.inner.config.batch_size {
            let Some(entry) = state.queue.pop_front() else {
                break;
            };
            state.current_batch.push(entry);
        }

        let should_commit = state.current_batch.len() >= self.inner.config.batch_size || (force && !state.current_batch.is_empty());
        if !should_commit {
            return None;
        }

        let mut entries = std::mem::take(&mut state.current_batch);
        state.batch_counter += 1;
        let counter = state.batch_counter;
        drop(state);

        let leaves: Vec<HashDigest> = entries.iter().map(|e| e.entry_hash.clone()).collect();
        let levels = build_levels(leaves.clone());
        let Some(root) = root_of(&levels) else {
            return None;
        };

        let committed_at = self.inner.clock.now();
        let batch_id = match BatchId::new(format!("batch_{counter}_{}", committed_at.as_unix_seconds())) {
            Ok(id) => id,
            Err(_) => return None,
        };

        for (index, entry) in entries.iter_mut().enumerate() {
            entry.batch_id = Some(batch_id.clone());
            entry.proof = Some(build_proof(&levels, index));
        }

        let batch = MerkleBatch {
            batch_id: batch_id.clone(),
            leaves,
            root,
            committed_at,
        };

        if let Err(err) = self.inner.persistence.persist_batch(counter, &batch, &entries).await {
            tracing::error!(batch_id = %batch_id, error = %err, "batch commit persistence failed, retaining batch in memory");
        }

        let mut state = self.inner.state.lock().await;
        state.committed_entries.insert(batch_id.clone(), entries);
        state.committed_batches.push(batch);
        drop(state);

        self.inner.batches_committed.fetch_add(1, Ordering::Relaxed);
        Some(batch_id)
    }
}

async fn run_worker(inner: Arc<LedgerInner>) {
    let ledger = AuditLedger { inner: Arc::clone(&inner) };
    let mut ticker = tokio::time::interval(inner.config.drain_interval);
    loop {
        tokio::select! {
            () = inner.notify.notified() => {}
            _ = ticker.tick() => {}
        }
        loop {
            let queue_len = {
                let state = inner.state.lock().await;
                state.queue.len()
            };
            let force = queue_len == 0;
            if ledger.drain_and_maybe_commit(force).await.is_none() {
                break;
            }
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    reason = "Test-only assertions are permitted."
)]
mod tests {
    use super::AuditLedger;
    use super::LedgerConfig;
    use crate::persistence::PersistenceBackend;
    use serde_json::json;

    async fn new_ledger(batch_size: usize) -> AuditLedger {
        let config = LedgerConfig {
            batch_size,
            queue_bound: 1000,
            drain_interval: std::time::Duration::from_millis(20),
        };
        let clock = std::sync::Arc::new(cgr_providers::SystemClock);
        AuditLedger::new(config, PersistenceBackend::none(), clock).await.unwrap()
    }

    #[tokio::test]
    async fn submit_never_errors_and_force_commit_flushes_partial_batch() {
        let ledger = new_ledger(100).await;
        ledger.submit(json!({"a": 1})).await.unwrap();
        ledger.submit(json!({"a": 2})).await.unwrap();
        let batch_id = ledger.force_commit().await.unwrap();
        let entries = ledger.query_by_batch(&batch_id).await.unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[tokio::test]
    async fn four_leaf_batch_produces_verifiable_proof_for_second_leaf() {
        let ledger = new_ledger(100).await;
        for leaf in ["a", "b", "c", "d"] {
            ledger.submit(json!(leaf)).await.unwrap();
        }
        let batch_id = ledger.force_commit().await.unwrap();
        let entries = ledger.query_by_batch(&batch_id).await.unwrap();
        let root = ledger.get_batch_root(&batch_id).await.unwrap();
        let b_entry = entries.iter().find(|e| e.payload == json!("b")).unwrap();
        let proof = b_entry.proof.as_ref().unwrap();
        assert_eq!(proof.len(), 2);
        assert!(AuditLedger::verify(&b_entry.entry_hash, proof, &root));
    }

    #[tokio::test]
    async fn force_commit_errors_when_nothing_pending() {
        let ledger = new_ledger(100).await;
        assert!(ledger.force_commit().await.is_err());
    }

    #[tokio::test]
    async fn stats_reflect_queue_and_batch_state() {
        let ledger = new_ledger(2).await;
        ledger.submit(json!(1)).await.unwrap();
        ledger.submit(json!(2)).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let stats = ledger.stats().await;
        assert_eq!(stats.batches_committed, 1);
        assert_eq!(stats.total_entries, 2);
    }
}
