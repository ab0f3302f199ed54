// crates/cgr-core/src/envelope.rs
// ============================================================================
// Module: Constitutional Governance Runtime Envelope
// Description: The in-flight unit of work traversing the whole runtime.
// Purpose: Carry a request/message through router, guardrail, and HITL
//          stages with monotonic status and a verified constitutional anchor.
// Dependencies: crate::identifiers, crate::time
// ============================================================================

//! ## Overview
//! Every request or message flowing through the runtime is wrapped in an
//! [`Envelope`] (spec.md §3 "Envelope"). Envelopes are immutable in `id`,
//! monotonic in `status`, and rejected outright when their constitutional
//! anchor does not match the process-wide configured value.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::identifiers::ActorId;
use crate::identifiers::ConstitutionalHash;
use crate::identifiers::EnvelopeId;
use crate::identifiers::TenantId;
use crate::time::Timestamp;

// ============================================================================
// SECTION: Message Type & Priority
// ============================================================================

/// Kind of message carried by an envelope.
///
/// # Invariants
/// - Variants are stable for serialization and contract matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// An imperative action request.
    Command,
    /// A read-only query.
    Query,
    /// A request that the governance engine itself be invoked.
    GovernanceRequest,
}

/// Envelope priority, used by routing, rate limiting, and HITL timeouts.
///
/// # Invariants
/// - Variants are stable for serialization and contract matching.
/// - Ordering is `Low < Standard < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Lowest priority.
    Low,
    /// Default priority.
    Standard,
    /// Elevated priority.
    High,
    /// Highest priority.
    Critical,
}

// ============================================================================
// SECTION: Envelope Status
// ============================================================================

/// Envelope lifecycle status.
///
/// # Invariants
/// - Transitions are monotonic within
///   `{pending -> delivered | queued -> approved | rejected | expired | cancelled}`
///   (spec.md §3 "Envelope" invariants).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeStatus {
    /// Newly created, not yet routed.
    Pending,
    /// Delivered via the fast lane.
    Delivered,
    /// Queued for deliberation.
    Queued,
    /// Approved via the HITL approval chain.
    Approved,
    /// Rejected via the HITL approval chain.
    Rejected,
    /// Expired after exhausting escalation.
    Expired,
    /// Cancelled by requester or administrator.
    Cancelled,
}

impl EnvelopeStatus {
    /// Returns `true` when `next` is a legal transition from `self`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Delivered)
                | (Self::Pending, Self::Queued)
                | (Self::Queued, Self::Approved)
                | (Self::Queued, Self::Rejected)
                | (Self::Queued, Self::Expired)
                | (Self::Queued, Self::Cancelled)
        )
    }

    /// Returns `true` when this status is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Approved | Self::Rejected | Self::Expired | Self::Cancelled)
    }
}

// ============================================================================
// SECTION: Envelope Errors
// ============================================================================

/// Errors raised constructing or mutating an envelope.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// The envelope's constitutional anchor did not match the process anchor.
    #[error("constitutional anchor mismatch: envelope carried {actual}, process requires {expected}")]
    AnchorMismatch {
        /// Expected anchor (process-wide configured value).
        expected: ConstitutionalHash,
        /// Anchor actually carried by the envelope.
        actual: ConstitutionalHash,
    },
    /// An illegal status transition was attempted.
    #[error("illegal envelope status transition: {from:?} -> {to:?}")]
    IllegalTransition {
        /// Status the envelope was in.
        from: EnvelopeStatus,
        /// Status the transition attempted to reach.
        to: EnvelopeStatus,
    },
}

// ============================================================================
// SECTION: Envelope
// ============================================================================

/// The in-flight unit of work traversing router, guardrail, and HITL stages.
///
/// # Invariants
/// - `id` is immutable once assigned.
/// - `status` only moves along [`EnvelopeStatus::can_transition_to`] edges.
/// - `constitutional_hash` must equal the process-wide configured value or
///   construction fails with [`EnvelopeError::AnchorMismatch`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Envelope identifier, immutable once assigned.
    pub id: EnvelopeId,
    /// Tenant identifier.
    pub tenant_id: TenantId,
    /// Actor identifier that originated the envelope.
    pub actor_id: ActorId,
    /// Destination descriptor (opaque to the core; interpreted by routing).
    pub to: String,
    /// Message type.
    pub message_type: MessageType,
    /// Priority.
    pub priority: Priority,
    /// Opaque free-form payload.
    pub payload: BTreeMap<String, Value>,
    /// Lifecycle status.
    pub status: EnvelopeStatus,
    /// Creation timestamp.
    pub created_at: Timestamp,
    /// Last-updated timestamp.
    pub updated_at: Timestamp,
    /// Impact score in `[0,1]`, absent until computed by the router.
    pub impact_score: Option<f64>,
    /// Constitutional anchor carried by this envelope.
    pub constitutional_hash: ConstitutionalHash,
}

impl Envelope {
    /// Constructs a new envelope in [`EnvelopeStatus::Pending`], verifying the
    /// constitutional anchor against the process-wide configured value.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::AnchorMismatch`] when `constitutional_hash`
    /// does not equal `expected_anchor`.
    #[allow(clippy::too_many_arguments, reason = "mirrors the wire schema field-for-field")]
    pub fn new(
        id: EnvelopeId,
        tenant_id: TenantId,
        actor_id: ActorId,
        to: String,
        message_type: MessageType,
        priority: Priority,
        payload: BTreeMap<String, Value>,
        created_at: Timestamp,
        constitutional_hash: ConstitutionalHash,
        expected_anchor: &ConstitutionalHash,
    ) -> Result<Self, EnvelopeError> {
        if &constitutional_hash != expected_anchor {
            return Err(EnvelopeError::AnchorMismatch {
                expected: expected_anchor.clone(),
                actual: constitutional_hash,
            });
        }
        Ok(Self {
            id,
            tenant_id,
            actor_id,
            to,
            message_type,
            priority,
            payload,
            status: EnvelopeStatus::Pending,
            created_at,
            updated_at: created_at,
            impact_score: None,
            constitutional_hash,
        })
    }

    /// Transitions the envelope's status, updating `updated_at`.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::IllegalTransition`] when the transition is
    /// not permitted by [`EnvelopeStatus::can_transition_to`].
    pub fn transition(&mut self, to: EnvelopeStatus, now: Timestamp) -> Result<(), EnvelopeError> {
        if !self.status.can_transition_to(to) {
            return Err(EnvelopeError::IllegalTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = now;
        Ok(())
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
    use std::collections::BTreeMap;

    use super::Envelope;
    use super::EnvelopeStatus;
    use super::MessageType;
    use super::Priority;
    use crate::identifiers::ActorId;
    use crate::identifiers::ConstitutionalHash;
    use crate::identifiers::EnvelopeId;
    use crate::identifiers::TenantId;
    use crate::time::Timestamp;

    fn anchor() -> ConstitutionalHash {
        ConstitutionalHash::new("abcdef0123456789").expect("valid anchor")
    }

    #[test]
    fn rejects_mismatched_anchor() {
        let other = ConstitutionalHash::new("1111111111111111").expect("valid anchor");
        let err = Envelope::new(
            EnvelopeId::new("e1").unwrap(),
            TenantId::new("t1").unwrap(),
            ActorId::new("a1").unwrap(),
            "agent".to_string(),
            MessageType::Query,
            Priority::Standard,
            BTreeMap::new(),
            Timestamp::from_unix_millis(0),
            other,
            &anchor(),
        )
        .unwrap_err();
        assert!(matches!(err, super::EnvelopeError::AnchorMismatch { .. }));
    }

    #[test]
    fn status_transitions_are_monotonic() {
        let mut envelope = Envelope::new(
            EnvelopeId::new("e1").unwrap(),
            TenantId::new("t1").unwrap(),
            ActorId::new("a1").unwrap(),
            "agent".to_string(),
            MessageType::Command,
            Priority::High,
            BTreeMap::new(),
            Timestamp::from_unix_millis(0),
            anchor(),
            &anchor(),
        )
        .unwrap();
        envelope.transition(EnvelopeStatus::Queued, Timestamp::from_unix_millis(1)).unwrap();
        envelope.transition(EnvelopeStatus::Approved, Timestamp::from_unix_millis(2)).unwrap();
        let err = envelope.transition(EnvelopeStatus::Delivered, Timestamp::from_unix_millis(3)).unwrap_err();
        assert!(matches!(err, super::EnvelopeError::IllegalTransition { .. }));
    }
}
