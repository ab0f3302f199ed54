// crates/cgr-providers/src/kv_store.rs
// ============================================================================
// Module: KV Store
// Description: Pluggable interface for the external key-value store backing
//              the ledger's pending queue, the temporal engine's indexes, and
//              the HITL engine's escalation timers.
// Purpose: Keep storage technology (Redis in the reference deployment) out of
//          the core crates; spec.md §6 fixes the key layout this trait's
//          callers rely on, not the backend itself.
// Dependencies: async-trait, cgr-core
// ============================================================================

//! ## Overview
//! [`KvStore`] models the subset of a Redis-shaped store that this runtime
//! needs: string get/set, hash fields, and score-indexed sorted sets (used
//! for the ledger's pending-entry queue and the HITL engine's escalation
//! timer heap). [`InMemoryKvStore`] is a process-local reference
//! implementation for tests; it is not durable and not shared across
//! processes.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use cgr_core::time::Timestamp;
use thiserror::Error;

use crate::clock::Clock;

/// Errors raised by KV store operations.
#[derive(Debug, Error)]
pub enum KvStoreError {
    /// The backend connection or command failed.
    #[error("kv store operation failed: {0}")]
    Backend(String),
    /// A value stored under `key` was not valid UTF-8 or not parseable as
    /// expected by the caller.
    #[error("kv store value at key '{0}' was malformed")]
    Malformed(String),
}

/// One entry returned from a sorted-set range query.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMember {
    /// The member's opaque payload.
    pub member: String,
    /// The member's sort score.
    pub score: f64,
}

/// A Redis-shaped key-value store.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Sets a string value.
    ///
    /// # Errors
    ///
    /// Returns [`KvStoreError`] when the backend fails.
    async fn set(&self, key: &str, value: &str) -> Result<(), KvStoreError>;

    /// Gets a string value, or `None` if `key` is absent.
    ///
    /// # Errors
    ///
    /// Returns [`KvStoreError`] when the backend fails.
    async fn get(&self, key: &str) -> Result<Option<String>, KvStoreError>;

    /// Sets a hash field.
    ///
    /// # Errors
    ///
    /// Returns [`KvStoreError`] when the backend fails.
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), KvStoreError>;

    /// Gets all fields of a hash.
    ///
    /// # Errors
    ///
    /// Returns [`KvStoreError`] when the backend fails.
    async fn hgetall(&self, key: &str) -> Result<BTreeMap<String, String>, KvStoreError>;

    /// Adds `member` to the sorted set at `key` with `score`, or updates its
    /// score if already present.
    ///
    /// # Errors
    ///
    /// Returns [`KvStoreError`] when the backend fails.
    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), KvStoreError>;

    /// Removes `member` from the sorted set at `key`.
    ///
    /// # Errors
    ///
    /// Returns [`KvStoreError`] when the backend fails.
    async fn zrem(&self, key: &str, member: &str) -> Result<(), KvStoreError>;

    /// Returns members of the sorted set at `key` with score in
    /// `[min_score, max_score]`, ascending by score.
    ///
    /// # Errors
    ///
    /// Returns [`KvStoreError`] when the backend fails.
    async fn zrangebyscore(&self, key: &str, min_score: f64, max_score: f64) -> Result<Vec<ScoredMember>, KvStoreError>;

    /// Returns the backend's current server time.
    ///
    /// Used in preference to the local wall clock so multi-instance
    /// deployments observe a single, consistent clock (spec.md §4.E.2).
    ///
    /// # Errors
    ///
    /// Returns [`KvStoreError`] when the backend fails.
    async fn server_time(&self) -> Result<Timestamp, KvStoreError>;

    /// Reports backend readiness.
    ///
    /// # Errors
    ///
    /// Returns [`KvStoreError`] when the backend is unavailable.
    async fn readiness(&self) -> Result<(), KvStoreError> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct InMemoryState {
    strings: BTreeMap<String, String>,
    hashes: BTreeMap<String, BTreeMap<String, String>>,
    sorted_sets: BTreeMap<String, BTreeMap<String, f64>>,
}

/// A process-local, in-memory reference [`KvStore`].
///
/// Not durable and not shared across processes. Intended for tests and local
/// development.
#[derive(Debug, Default)]
pub struct InMemoryKvStore {
    state: Mutex<InMemoryState>,
}

impl InMemoryKvStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, InMemoryState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn set(&self, key: &str, value: &str) -> Result<(), KvStoreError> {
        self.lock().strings.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, KvStoreError> {
        Ok(self.lock().strings.get(key).cloned())
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), KvStoreError> {
        self.lock().hashes.entry(key.to_string()).or_default().insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<BTreeMap<String, String>, KvStoreError> {
        Ok(self.lock().hashes.get(key).cloned().unwrap_or_default())
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), KvStoreError> {
        self.lock().sorted_sets.entry(key.to_string()).or_default().insert(member.to_string(), score);
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<(), KvStoreError> {
        if let Some(set) = self.lock().sorted_sets.get_mut(key) {
            set.remove(member);
        }
        Ok(())
    }

    async fn zrangebyscore(&self, key: &str, min_score: f64, max_score: f64) -> Result<Vec<ScoredMember>, KvStoreError> {
        let guard = self.lock();
        let Some(set) = guard.sorted_sets.get(key) else {
            return Ok(Vec::new());
        };
        let mut members: Vec<ScoredMember> = set
            .iter()
            .filter(|(_, score)| **score >= min_score && **score <= max_score)
            .map(|(member, score)| ScoredMember {
                member: member.clone(),
                score: *score,
            })
            .collect();
        members.sort_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal));
        Ok(members)
    }

    async fn server_time(&self) -> Result<Timestamp, KvStoreError> {
        Ok(crate::clock::SystemClock.now())
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
    use super::InMemoryKvStore;
    use super::KvStore;

    #[tokio::test]
    async fn string_round_trips() {
        let store = InMemoryKvStore::new();
        store.set("k", "v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some("v".to_string()));
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn sorted_set_range_query_is_score_ordered() {
        let store = InMemoryKvStore::new();
        store.zadd("q", "c", 3.0).await.unwrap();
        store.zadd("q", "a", 1.0).await.unwrap();
        store.zadd("q", "b", 2.0).await.unwrap();
        let members = store.zrangebyscore("q", 0.0, 2.5).await.unwrap();
        let names: Vec<&str> = members.iter().map(|m| m.member.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn zrem_removes_member() {
        let store = InMemoryKvStore::new();
        store.zadd("q", "a", 1.0).await.unwrap();
        store.zrem("q", "a").await.unwrap();
        let members = store.zrangebyscore("q", 0.0, 10.0).await.unwrap();
        assert!(members.is_empty());
    }
}
