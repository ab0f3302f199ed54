// crates/cgr-temporal/src/engine.rs
// ============================================================================
// Module: Temporal Event Engine
// Description: Append-only, causally-ordered event log with snapshots.
// Purpose: Implement spec.md §4.B's public contract and algorithm: record,
//          validate, query, state_at, validate_all.
// Dependencies: cgr-core, cgr-providers, tokio
// ============================================================================

//! ## Overview
//! A single in-process lock serializes record, index update, and
//! current-state update (spec.md §5 "Ordering guarantees"). Ids and causal
//! hashes are content-addressed via [`cgr_core::event::derive_event_id`] and
//! [`cgr_core::event::derive_causal_hash`]; this module owns indexing,
//! invariant checking, snapshotting, and historical replay.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::sync::Arc;

use cgr_core::event::derive_causal_hash;
use cgr_core::event::derive_event_id;
use cgr_core::event::ConstitutionalEvent;
use cgr_core::event::EventType;
use cgr_core::hashing::HashingError;
use cgr_core::identifiers::ActorId;
use cgr_core::identifiers::ConstitutionalHash;
use cgr_core::identifiers::EventId;
use cgr_core::snapshot::TemporalSnapshot;
use cgr_core::time::Timestamp;
use cgr_providers::Clock;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;

/// Outcome of a consistency check (spec.md §4.B `validate`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsistencyStatus {
    /// No inconsistency detected.
    Consistent,
    /// One or more referenced parents do not exist in the log.
    MissingDependencies,
    /// A parent's timestamp does not strictly precede the child's.
    TemporallyInconsistent,
    /// Recording this event would introduce a cycle in the causal graph.
    CausallyInconsistent,
}

/// Errors raised while recording an event.
#[derive(Debug, Error)]
pub enum TemporalError {
    /// A named parent id does not exist in the log.
    #[error("parent event '{0}' does not exist")]
    MissingDependency(EventId),
    /// A non-missing-dependency consistency check failed; the event was not
    /// appended.
    #[error("event refused: {status:?}: {detail}")]
    Inconsistent {
        /// The specific consistency failure.
        status: ConsistencyStatus,
        /// Human-readable detail.
        detail: String,
    },
    /// The event's constitutional anchor did not match the process constant.
    #[error("constitutional anchor mismatch")]
    AnchorMismatch,
    /// The event could not be content-addressed.
    #[error(transparent)]
    Hashing(#[from] HashingError),
}

/// Filters applied to [`TemporalEngine::query`].
#[derive(Debug, Clone, Default)]
pub struct QueryFilters {
    /// Restrict to a single event type.
    pub event_type: Option<EventType>,
    /// Restrict to a single actor.
    pub actor: Option<ActorId>,
    /// Restrict to timestamps in `[start, end]` inclusive.
    pub time_range: Option<(Timestamp, Timestamp)>,
}

/// Tuning parameters for one [`TemporalEngine`] instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Snapshot is taken every `snapshot_interval` recorded events.
    pub snapshot_interval: u64,
    /// The process-wide constitutional anchor every event must carry.
    pub constitutional_anchor: ConstitutionalHash,
}

struct CurrentState {
    active_policies: BTreeSet<String>,
    pending_decisions: BTreeSet<String>,
    branch_state: BTreeMap<String, String>,
}

impl CurrentState {
    fn new() -> Self {
        Self {
            active_policies: BTreeSet::new(),
            pending_decisions: BTreeSet::new(),
            branch_state: BTreeMap::new(),
        }
    }
}

struct EngineState {
    events_by_id: HashMap<EventId, ConstitutionalEvent>,
    by_time: Vec<EventId>,
    by_actor: HashMap<ActorId, Vec<EventId>>,
    by_type: HashMap<EventType, Vec<EventId>>,
    children: HashMap<EventId, Vec<EventId>>,
    causal_frontier: BTreeSet<EventId>,
    current: CurrentState,
    snapshots: Vec<TemporalSnapshot>,
    event_count: u64,
}

impl EngineState {
    fn new() -> Self {
        Self {
            events_by_id: HashMap::new(),
            by_time: Vec::new(),
            by_actor: HashMap::new(),
            by_type: HashMap::new(),
            children: HashMap::new(),
            causal_frontier: BTreeSet::new(),
            current: CurrentState::new(),
            snapshots: Vec::new(),
            event_count: 0,
        }
    }

    fn snapshot_now(&self, timestamp: Timestamp) -> TemporalSnapshot {
        TemporalSnapshot {
            timestamp,
            event_count: self.event_count,
            active_policies: self.current.active_policies.clone(),
            pending_decisions: self.current.pending_decisions.clone(),
            branch_state: self.current.branch_state.clone(),
            causal_frontier: self.causal_frontier.clone(),
        }
    }
}

/// An append-only, causally-ordered event log with snapshot-accelerated
/// historical queries.
///
/// Cheaply cloneable; clones share the same lock and state.
#[derive(Clone)]
pub struct TemporalEngine {
    state: Arc<Mutex<EngineState>>,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
}

/// Identifier used as a payload-derived key for state-transition bookkeeping,
/// falling back to the event id when the payload carries none.
fn payload_key(payload: &BTreeMap<String, Value>, field: &str, fallback: &EventId) -> String {
    payload.get(field).and_then(Value::as_str).map(str::to_string).unwrap_or_else(|| fallback.to_string())
}

/// Applies an event-type-specific transition to `state` (spec.md §4.B
/// "Algorithm" step 5).
fn apply_transition(event: &ConstitutionalEvent, state: &mut CurrentState) {
    match event.event_type {
        EventType::PolicyCreated => {
            state.active_policies.insert(payload_key(&event.payload, "policy_id", &event.id));
        }
        EventType::DecisionMade => {
            state.pending_decisions.insert(payload_key(&event.payload, "decision_id", &event.id));
        }
        EventType::PolicyExecuted => {
            let key = payload_key(&event.payload, "decision_id", &event.id);
            state.pending_decisions.remove(&key);
        }
        EventType::BranchAction => {
            let branch = payload_key(&event.payload, "branch", &event.id);
            let branch_value = event.payload.get("state").and_then(Value::as_str).unwrap_or("unknown").to_string();
            state.branch_state.insert(branch, branch_value);
        }
        EventType::ValidationCompleted | EventType::ConstitutionalReview | EventType::ConsensusAchieved => {}
    }
}

/// Domain-specific heuristic bounding an actor's string shape for
/// branch-action events (spec.md §4.B "Algorithm" step 4, "implementer may
/// plug in"). Rejects empty or implausibly long actor identifiers.
fn actor_shape_is_plausible(actor: &ActorId) -> bool {
    let len = actor.as_str().len();
    (1..=256).contains(&len)
}

impl TemporalEngine {
    /// Constructs an empty temporal engine.
    #[must_use]
    pub fn new(config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(EngineState::new())),
            config,
            clock,
        }
    }

    /// Appends a new event, validating parents, timestamps, causal acyclicity,
    /// and the constitutional invariant before mutating state.
    ///
    /// # Errors
    ///
    /// Returns [`TemporalError::MissingDependency`] if any `parent_ids` entry
    /// is unknown, [`TemporalError::AnchorMismatch`] if the configured anchor
    /// does not match, or [`TemporalError::Inconsistent`] for a temporal or
    /// causal violation. The event is not appended in any error case.
    pub async fn record(&self, event_type: EventType, actor: ActorId, payload: BTreeMap<String, Value>, parent_ids: BTreeSet<EventId>) -> Result<ConstitutionalEvent, TemporalError> {
        let timestamp = self.clock.now();
        let mut state = self.state.lock().await;

        for parent_id in &parent_ids {
            if !state.events_by_id.contains_key(parent_id) {
                tracing::warn!(parent_id = %parent_id, "record refused: missing dependency");
                return Err(TemporalError::MissingDependency(parent_id.clone()));
            }
        }

        for parent_id in &parent_ids {
            let parent_timestamp = state.events_by_id.get(parent_id).map(|e| e.timestamp).unwrap_or(timestamp);
            if !parent_timestamp.strictly_before(timestamp) {
                return Err(TemporalError::Inconsistent {
                    status: ConsistencyStatus::TemporallyInconsistent,
                    detail: format!("parent '{parent_id}' does not strictly precede new event"),
                });
            }
        }

        let id = derive_event_id(event_type, timestamp, &actor, &payload)?;
        if state.events_by_id.contains_key(&id) || would_introduce_cycle(&state.children, &parent_ids, &id) {
            return Err(TemporalError::Inconsistent {
                status: ConsistencyStatus::CausallyInconsistent,
                detail: "recording this event would introduce a cycle".to_string(),
            });
        }

        let causal_hash = derive_causal_hash(&id, &parent_ids, &payload)?;

        if event_type == EventType::BranchAction && !actor_shape_is_plausible(&actor) {
            return Err(TemporalError::Inconsistent {
                status: ConsistencyStatus::CausallyInconsistent,
                detail: "actor shape failed branch-action heuristic".to_string(),
            });
        }

        let event = ConstitutionalEvent {
            id: id.clone(),
            event_type,
            timestamp,
            actor: actor.clone(),
            payload,
            parent_ids: parent_ids.clone(),
            causal_hash,
            constitutional_hash: self.config.constitutional_anchor.clone(),
        };

        if event.constitutional_hash != self.config.constitutional_anchor {
            return Err(TemporalError::AnchorMismatch);
        }

        for parent_id in &parent_ids {
            state.children.entry(parent_id.clone()).or_default().push(id.clone());
            state.causal_frontier.remove(parent_id);
        }
        state.causal_frontier.insert(id.clone());

        state.by_time.push(id.clone());
        state.by_actor.entry(actor).or_default().push(id.clone());
        state.by_type.entry(event_type).or_default().push(id.clone());
        apply_transition(&event, &mut state.current);
        state.events_by_id.insert(id.clone(), event.clone());
        state.event_count += 1;

        if self.config.snapshot_interval > 0 && state.event_count % self.config.snapshot_interval == 0 {
            let snapshot = state.snapshot_now(timestamp);
            state.snapshots.push(snapshot);
        }

        Ok(event)
    }

    /// Checks `event` for consistency against the current log without
    /// mutating state.
    #[must_use]
    pub async fn validate(&self, event: &ConstitutionalEvent) -> (ConsistencyStatus, String) {
        let state = self.state.lock().await;
        for parent_id in &event.parent_ids {
            match state.events_by_id.get(parent_id) {
                None => return (ConsistencyStatus::MissingDependencies, format!("parent '{parent_id}' not found")),
                Some(parent) if !parent.timestamp.strictly_before(event.timestamp) => {
                    return (ConsistencyStatus::TemporallyInconsistent, format!("parent '{parent_id}' does not precede event"));
                }
                Some(_) => {}
            }
        }
        if would_introduce_cycle(&state.children, &event.parent_ids, &event.id) {
            return (ConsistencyStatus::CausallyInconsistent, "cycle detected".to_string());
        }
        (ConsistencyStatus::Consistent, String::new())
    }

    /// Returns events matching `filters`, most-recent-first, capped at
    /// `limit`.
    pub async fn query(&self, filters: &QueryFilters, limit: usize) -> Vec<ConstitutionalEvent> {
        let state = self.state.lock().await;
        state
            .by_time
            .iter()
            .rev()
            .filter_map(|id| state.events_by_id.get(id))
            .filter(|event| filters.event_type.is_none_or(|t| t == event.event_type))
            .filter(|event| filters.actor.as_ref().is_none_or(|a| *a == event.actor))
            .filter(|event| filters.time_range.is_none_or(|(start, end)| event.timestamp >= start && event.timestamp <= end))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Reconstructs engine state as of `timestamp` by replaying from the
    /// nearest snapshot at or before `timestamp`.
    pub async fn state_at(&self, timestamp: Timestamp) -> TemporalSnapshot {
        let state = self.state.lock().await;
        let base = state.snapshots.iter().rev().find(|snap| snap.timestamp <= timestamp).cloned().unwrap_or_else(|| TemporalSnapshot::genesis(Timestamp::default()));

        let mut replay = CurrentState {
            active_policies: base.active_policies.clone(),
            pending_decisions: base.pending_decisions.clone(),
            branch_state: base.branch_state.clone(),
        };
        let mut frontier = base.causal_frontier.clone();
        let mut event_count = base.event_count;

        for id in &state.by_time {
            let Some(event) = state.events_by_id.get(id) else {
                continue;
            };
            if event.timestamp <= base.timestamp {
                continue;
            }
            if event.timestamp > timestamp {
                break;
            }
            apply_transition(event, &mut replay);
            for parent_id in &event.parent_ids {
                frontier.remove(parent_id);
            }
            frontier.insert(event.id.clone());
            event_count += 1;
        }

        TemporalSnapshot {
            timestamp,
            event_count,
            active_policies: replay.active_policies,
            pending_decisions: replay.pending_decisions,
            branch_state: replay.branch_state,
            causal_frontier: frontier,
        }
    }

    /// Re-validates every recorded event against the fully assembled log.
    ///
    /// Returns `(true, [])` if every event is consistent, or `(false,
    /// messages)` describing each discrepancy found.
    pub async fn validate_all(&self) -> (bool, Vec<String>) {
        let state = self.state.lock().await;
        let mut errors = Vec::new();
        for id in &state.by_time {
            let Some(event) = state.events_by_id.get(id) else {
                continue;
            };
            for parent_id in &event.parent_ids {
                match state.events_by_id.get(parent_id) {
                    None => errors.push(format!("event '{id}' references missing parent '{parent_id}'")),
                    Some(parent) if !parent.timestamp.strictly_before(event.timestamp) => {
                        errors.push(format!("event '{id}' does not strictly follow parent '{parent_id}'"));
                    }
                    Some(_) => {}
                }
            }
            if event.constitutional_hash != self.config.constitutional_anchor {
                errors.push(format!("event '{id}' carries a mismatched constitutional anchor"));
            }
        }
        (errors.is_empty(), errors)
    }
}

/// Defensive DFS confirming `candidate_id` is not already reachable as a
/// descendant of any of `parent_ids` through the existing child adjacency.
/// Structurally unreachable via the public API (a parent cannot reference a
/// not-yet-created child), but retained as the safety net spec.md §4.B's
/// algorithm names explicitly.
fn would_introduce_cycle(children: &HashMap<EventId, Vec<EventId>>, parent_ids: &BTreeSet<EventId>, candidate_id: &EventId) -> bool {
    let mut stack: Vec<EventId> = parent_ids.iter().cloned().collect();
    let mut visited: BTreeSet<EventId> = BTreeSet::new();
    while let Some(current) = stack.pop() {
        if &current == candidate_id {
            return true;
        }
        if !visited.insert(current.clone()) {
            continue;
        }
        if let Some(descendants) = children.get(&current) {
            stack.extend(descendants.iter().cloned());
        }
    }
    false
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    reason = "Test-only assertions are permitted."
)]
mod tests {
    use super::ConsistencyStatus;
    use super::EngineConfig;
    use super::QueryFilters;
    use super::TemporalEngine;
    use cgr_core::event::EventType;
    use cgr_core::identifiers::ActorId;
    use cgr_core::identifiers::ConstitutionalHash;
    use cgr_providers::FixedClock;
    use cgr_core::time::Timestamp;
    use std::collections::BTreeMap;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    fn engine(clock: Arc<FixedClock>) -> TemporalEngine {
        TemporalEngine::new(
            EngineConfig {
                snapshot_interval: 2,
                constitutional_anchor: ConstitutionalHash::new("abcdef0123456789").unwrap(),
            },
            clock,
        )
    }

    #[tokio::test]
    async fn recording_with_unknown_parent_is_missing_dependency() {
        let clock = Arc::new(FixedClock::new(Timestamp::from_unix_millis(0)));
        let eng = engine(clock);
        let actor = ActorId::new("agent-1").unwrap();
        let mut parents = BTreeSet::new();
        parents.insert(cgr_core::identifiers::EventId::new("ghost").unwrap());
        let err = eng.record(EventType::DecisionMade, actor, BTreeMap::new(), parents).await.unwrap_err();
        assert!(matches!(err, super::TemporalError::MissingDependency(_)));
    }

    #[tokio::test]
    async fn chained_events_build_causal_frontier_and_snapshot_every_interval() {
        let clock = Arc::new(FixedClock::new(Timestamp::from_unix_millis(0)));
        let eng = engine(Arc::clone(&clock));
        let actor = ActorId::new("agent-1").unwrap();

        let a = eng.record(EventType::PolicyCreated, actor.clone(), BTreeMap::new(), BTreeSet::new()).await.unwrap();
        clock.advance_millis(10);
        let mut parents = BTreeSet::new();
        parents.insert(a.id.clone());
        let b = eng.record(EventType::DecisionMade, actor.clone(), BTreeMap::new(), parents).await.unwrap();

        let state = eng.state_at(Timestamp::from_unix_millis(10)).await;
        assert_eq!(state.event_count, 2);
        assert!(state.causal_frontier.contains(&b.id));
        assert!(!state.causal_frontier.contains(&a.id));
    }

    #[tokio::test]
    async fn query_returns_most_recent_first() {
        let clock = Arc::new(FixedClock::new(Timestamp::from_unix_millis(0)));
        let eng = engine(clock.clone());
        let actor = ActorId::new("agent-1").unwrap();
        eng.record(EventType::PolicyCreated, actor.clone(), BTreeMap::new(), BTreeSet::new()).await.unwrap();
        clock.advance_millis(5);
        let second = eng.record(EventType::DecisionMade, actor, BTreeMap::new(), BTreeSet::new()).await.unwrap();

        let results = eng.query(&QueryFilters::default(), 10).await;
        assert_eq!(results.first().unwrap().id, second.id);
    }

    #[tokio::test]
    async fn validate_all_reports_no_errors_for_a_healthy_log() {
        let clock = Arc::new(FixedClock::new(Timestamp::from_unix_millis(0)));
        let eng = engine(clock);
        let actor = ActorId::new("agent-1").unwrap();
        eng.record(EventType::PolicyCreated, actor, BTreeMap::new(), BTreeSet::new()).await.unwrap();
        let (ok, errors) = eng.validate_all().await;
        assert!(ok);
        assert!(errors.is_empty());
    }

    #[tokio::test]
    async fn validate_flags_temporally_inconsistent_candidate() {
        let clock = Arc::new(FixedClock::new(Timestamp::from_unix_millis(100)));
        let eng = engine(Arc::clone(&clock));
        let actor = ActorId::new("agent-1").unwrap();
        let parent = eng.record(EventType::PolicyCreated, actor.clone(), BTreeMap::new(), BTreeSet::new()).await.unwrap();

        let mut parents = BTreeSet::new();
        parents.insert(parent.id.clone());
        let mut bad_child = parent.clone();
        bad_child.id = cgr_core::identifiers::EventId::new("bad").unwrap();
        bad_child.timestamp = Timestamp::from_unix_millis(50);
        bad_child.parent_ids = parents;

        let (status, _) = eng.validate(&bad_child).await;
        assert_eq!(status, ConsistencyStatus::TemporallyInconsistent);
    }
}
