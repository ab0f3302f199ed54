// crates/cgr-core/src/hitl.rs
// ============================================================================
// Module: Constitutional Governance Runtime HITL Types
// Description: Approval requests, chain definitions, escalation timers, and
//              the chain-local checksum-chained audit entry shape.
// Purpose: Shared vocabulary for `cgr-hitl`'s state machine, escalation
//          engine, and immutable audit trail (spec.md §3, §4.E).
// Dependencies: crate::hashing, crate::identifiers, crate::time
// ============================================================================

//! ## Overview
//! This module defines the data shapes consumed and produced by the HITL
//! approval chain. State-machine transitions, timer scheduling, and audit
//! chaining logic live in `cgr-hitl`; this crate only fixes the vocabulary so
//! every consumer (router, guardrail escalation path, notification fan-out)
//! agrees on field names and invariants.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::envelope::Priority;
use crate::hashing::HashDigest;
use crate::identifiers::ActorId;
use crate::identifiers::ApprovalRequestId;
use crate::identifiers::ChainDefinitionId;
use crate::identifiers::HitlEntryId;
use crate::identifiers::TenantId;
use crate::time::Timestamp;

// ============================================================================
// SECTION: Approval Status
// ============================================================================

/// Lifecycle status of an approval request.
///
/// # Invariants
/// - Terminal statuses (`Approved`, `Rejected`, `Expired`, `Cancelled`) are
///   final; no transitions exist out of them (spec.md §4.E.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    /// Awaiting approvals at the current step.
    Pending,
    /// All steps satisfied their quorum.
    Approved,
    /// A rejection was recorded at some step.
    Rejected,
    /// Escalation exhausted `max_escalations` without resolution.
    Expired,
    /// Cancelled by the requester or an administrator.
    Cancelled,
}

impl ApprovalStatus {
    /// Returns `true` when this status is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

// ============================================================================
// SECTION: Approval Chain Definition
// ============================================================================

/// A single step of an approval chain definition.
///
/// # Invariants
/// - `quorum` must be `>= 1` and `<= approvers.len()` (enforced at chain
///   construction in `cgr-hitl`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainStep {
    /// Required approver identifiers or role names for this step.
    pub approvers: Vec<String>,
    /// Minimum number of distinct approvals required to advance past this step.
    pub quorum: usize,
    /// Step-level timeout in minutes, overriding the priority default when set.
    pub timeout_minutes: Option<i64>,
}

/// A versioned, ordered approval chain definition.
///
/// # Invariants
/// - `steps` is non-empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalChainDefinition {
    /// Chain definition identifier.
    pub id: ChainDefinitionId,
    /// Version label for this chain revision.
    pub version: u32,
    /// Ordered steps.
    pub steps: Vec<ChainStep>,
}

// ============================================================================
// SECTION: Approval Decision
// ============================================================================

/// A single approver's decision at a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApproverDecision {
    /// Approve.
    Approve,
    /// Reject.
    Reject,
}

/// A recorded approver action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDecision {
    /// Approver identifier.
    pub approver: ActorId,
    /// Decision rendered.
    pub decision: ApproverDecision,
    /// Rationale text.
    pub rationale: String,
    /// Timestamp of the decision.
    pub timestamp: Timestamp,
}

// ============================================================================
// SECTION: Approval Request
// ============================================================================

/// A multi-step human-in-the-loop approval request.
///
/// # Invariants
/// - `current_step_index` never decreases (spec.md §8 P5).
/// - Terminal `status` values are final.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// Request identifier.
    pub id: ApprovalRequestId,
    /// Chain definition this request is driven by.
    pub chain_id: ChainDefinitionId,
    /// Tenant identifier.
    pub tenant_id: TenantId,
    /// Requester identifier.
    pub requester: ActorId,
    /// Short title.
    pub title: String,
    /// Long-form description.
    pub description: String,
    /// Priority, used for escalation timeout lookup.
    pub priority: Priority,
    /// Opaque context payload.
    pub context: BTreeMap<String, Value>,
    /// Lifecycle status.
    pub status: ApprovalStatus,
    /// Current step index (0-based).
    pub current_step_index: usize,
    /// Timestamp the current step began (creation time, or the time of the
    /// most recent step advance). Scopes quorum counting to decisions made
    /// at the current step rather than the whole request lifetime.
    pub step_started_at: Timestamp,
    /// Recorded decisions across all steps, in arrival order.
    pub decisions: Vec<StepDecision>,
    /// Creation timestamp.
    pub created_at: Timestamp,
    /// Last-updated timestamp.
    pub updated_at: Timestamp,
    /// Expiration deadline for the current step.
    pub expires_at: Timestamp,
    /// Escalation levels reached so far, most recent last.
    pub escalation_history: Vec<u32>,
}

// ============================================================================
// SECTION: Escalation Timer
// ============================================================================

/// Timer metadata for one in-flight approval request.
///
/// # Invariants
/// - Stored alongside a score-sorted index keyed by `expires_at`
///   (spec.md §3 "Escalation Timer").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationTimer {
    /// Request identifier this timer belongs to.
    pub request_id: ApprovalRequestId,
    /// Priority used to compute the default timeout.
    pub priority: Priority,
    /// Timeout in minutes applied when this timer was (re)armed.
    pub timeout_minutes: i64,
    /// Timer creation time.
    pub created_at: Timestamp,
    /// Expiration time.
    pub expires_at: Timestamp,
    /// Current escalation level (0 = not yet escalated).
    pub level: u32,
    /// Number of times this timer has escalated.
    pub escalation_count: u32,
    /// Opaque metadata.
    pub metadata: BTreeMap<String, Value>,
}

// ============================================================================
// SECTION: Chain-Local Audit Entry
// ============================================================================

/// Kind of HITL audit entry.
///
/// # Invariants
/// - Variants are stable for serialization and contract matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitlEntryType {
    /// An approval request was created.
    ApprovalCreated,
    /// An approval request was approved (possibly advancing a step).
    ApprovalApproved,
    /// An approval request was rejected.
    ApprovalRejected,
    /// An approval request was escalated.
    ApprovalEscalated,
    /// An approval request expired.
    ApprovalExpired,
    /// An approval request was cancelled.
    ApprovalCancelled,
}

/// Kind of actor that performed a HITL action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitlActorType {
    /// A human user.
    Human,
    /// An autonomous agent.
    Agent,
    /// The system itself (e.g. timer expiration).
    System,
}

/// Kind of entity a HITL audit entry targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitlTargetKind {
    /// An approval request.
    Request,
    /// A chain definition.
    Chain,
    /// A policy.
    Policy,
}

/// One entry in the HITL chain-local, checksum-chained audit trail.
///
/// # Invariants
/// - `checksum` is the SHA-256 over all other fields, sorted by key
///   (spec.md §3 "HITL Audit Entry").
/// - `parent_entry_id` references the most recently appended entry
///   process-wide, forming a single chain; `None` only for the genesis entry.
/// - Append-only: no update or delete operation exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HitlAuditEntry {
    /// Entry identifier (uuid).
    pub id: HitlEntryId,
    /// Entry type.
    pub entry_type: HitlEntryType,
    /// Entry timestamp.
    pub timestamp: Timestamp,
    /// Actor identifier that performed the action.
    pub actor_id: ActorId,
    /// Kind of actor.
    pub actor_type: HitlActorType,
    /// Actor's role at the time of the action, if applicable.
    pub actor_role: Option<String>,
    /// Kind of entity targeted by this entry.
    pub target_kind: HitlTargetKind,
    /// Target identifier.
    pub target_id: String,
    /// Previous state label, if applicable.
    pub previous_state: Option<String>,
    /// New state label.
    pub new_state: String,
    /// Structured action details.
    pub action_details: BTreeMap<String, Value>,
    /// Rationale text.
    pub rationale: Option<String>,
    /// Identifier of the most recently appended entry at the time this one
    /// was appended; `None` only for the chain genesis entry.
    pub parent_entry_id: Option<HitlEntryId>,
    /// SHA-256 checksum over every other field, sorted by key.
    pub checksum: HashDigest,
}
