// crates/cgr-core/src/snapshot.rs
// ============================================================================
// Module: Constitutional Governance Runtime Temporal Snapshot
// Description: Point-in-time replayable state of the temporal event engine.
// Purpose: Accelerate historical queries without replaying the full event
//          log from genesis (spec.md §3 "Temporal Snapshot").
// Dependencies: crate::identifiers, crate::time
// ============================================================================

//! ## Overview
//! Snapshots are taken every `snapshot_interval` events (suggested 100) and
//! retained without expiry. `cgr-temporal` owns snapshot generation and
//! replay; this module fixes the shape so other components can reason about
//! "the causal frontier as of time t" without depending on the engine.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;

use crate::identifiers::EventId;
use crate::time::Timestamp;

// ============================================================================
// SECTION: Snapshot
// ============================================================================

/// A point-in-time view of temporal engine state.
///
/// # Invariants
/// - `causal_frontier` is the set of event ids with no recorded children as
///   of `timestamp`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemporalSnapshot {
    /// Snapshot timestamp.
    pub timestamp: Timestamp,
    /// Total number of events recorded at snapshot time.
    pub event_count: u64,
    /// Active policy identifiers at snapshot time.
    pub active_policies: BTreeSet<String>,
    /// Pending decision identifiers at snapshot time.
    pub pending_decisions: BTreeSet<String>,
    /// Per-branch state map at snapshot time.
    pub branch_state: BTreeMap<String, String>,
    /// Latest events with no recorded children at snapshot time.
    pub causal_frontier: BTreeSet<EventId>,
}

impl TemporalSnapshot {
    /// Returns an empty (genesis) snapshot at the given timestamp.
    #[must_use]
    pub fn genesis(timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            ..Self::default()
        }
    }
}
