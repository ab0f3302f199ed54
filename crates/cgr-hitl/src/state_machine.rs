// crates/cgr-hitl/src/state_machine.rs
// ============================================================================
// Module: Approval State Machine
// Description: Pure transition logic over an in-memory ApprovalRequest.
// Purpose: Implement spec.md §4.E.1's exact transition table as a stateless,
//          table-driven component independent of storage or notification
//          concerns.
// Dependencies: cgr-core
// ============================================================================

//! ## Overview
//! [`ApprovalStateMachine`] mutates an [`ApprovalRequest`] in place and
//! returns a [`TransitionOutcome`] describing what happened, so callers
//! (the chain orchestrator) can decide what else to do — fire a timer, write
//! an audit entry, send a notification — without this module knowing about
//! any of those concerns.

use std::collections::BTreeSet;

use cgr_core::hitl::ApprovalChainDefinition;
use cgr_core::hitl::ApprovalRequest;
use cgr_core::hitl::ApprovalStatus;
use cgr_core::hitl::ApproverDecision;
use cgr_core::hitl::StepDecision;
use cgr_core::identifiers::ActorId;
use cgr_core::time::Timestamp;
use thiserror::Error;

/// Who requested a cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelledBy {
    /// The original requester.
    Requester,
    /// An administrator acting on the requester's behalf.
    Admin,
}

/// Errors raised applying a transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateMachineError {
    /// The request is already in a terminal status; no further transitions
    /// are possible.
    #[error("approval request {0} is already terminal")]
    AlreadyTerminal(String),
    /// A requester-only cancellation was attempted by someone other than the
    /// original requester.
    #[error("actor {actor} is not authorized to cancel request {request} as requester")]
    UnauthorizedCancel {
        /// Request identifier.
        request: String,
        /// Actor that attempted the cancellation.
        actor: String,
    },
    /// The chain definition has no steps, which cannot happen for a validly
    /// constructed chain but is rejected defensively.
    #[error("chain definition {0} has no steps")]
    EmptyChain(String),
}

/// What changed as a result of applying one state-machine event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionOutcome {
    /// Status before the transition.
    pub previous_status: ApprovalStatus,
    /// Status after the transition.
    pub new_status: ApprovalStatus,
    /// `true` when a step advance occurred without reaching a terminal
    /// status (quorum met at a non-final step).
    pub step_advanced: bool,
    /// `true` when an escalation occurred without reaching a terminal
    /// status (timer fired, level still under the configured maximum).
    pub escalated: bool,
}

impl TransitionOutcome {
    /// `true` when the new status is terminal.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.new_status.is_terminal()
    }
}

/// Stateless table-driven approval transition logic (spec.md §4.E.1).
#[derive(Debug, Default, Clone, Copy)]
pub struct ApprovalStateMachine;

impl ApprovalStateMachine {
    /// Records an approval from `approver` at the request's current step.
    ///
    /// Advances to the next step (or to `approved`, if this was the final
    /// step) once quorum at the current step is met by distinct approvers.
    ///
    /// # Errors
    ///
    /// Returns [`StateMachineError::AlreadyTerminal`] if `request` is
    /// terminal, or [`StateMachineError::EmptyChain`] if `chain` has no
    /// steps.
    pub fn approve(request: &mut ApprovalRequest, chain: &ApprovalChainDefinition, approver: ActorId, rationale: String, now: Timestamp) -> Result<TransitionOutcome, StateMachineError> {
        Self::require_pending(request)?;
        let step = chain.steps.get(request.current_step_index).ok_or_else(|| StateMachineError::EmptyChain(chain.id.to_string()))?;

        request.decisions.push(StepDecision {
            approver,
            decision: ApproverDecision::Approve,
            rationale,
            timestamp: now,
        });
        request.updated_at = now;

        let distinct_approvers: BTreeSet<&str> = request
            .decisions
            .iter()
            .filter(|decision| decision.timestamp >= request.step_started_at && matches!(decision.decision, ApproverDecision::Approve))
            .map(|decision| decision.approver.as_str())
            .collect();

        if distinct_approvers.len() < step.quorum {
            return Ok(TransitionOutcome {
                previous_status: ApprovalStatus::Pending,
                new_status: ApprovalStatus::Pending,
                step_advanced: false,
                escalated: false,
            });
        }

        if request.current_step_index + 1 >= chain.steps.len() {
            request.status = ApprovalStatus::Approved;
            Ok(TransitionOutcome {
                previous_status: ApprovalStatus::Pending,
                new_status: ApprovalStatus::Approved,
                step_advanced: false,
                escalated: false,
            })
        } else {
            request.current_step_index += 1;
            request.step_started_at = now;
            Ok(TransitionOutcome {
                previous_status: ApprovalStatus::Pending,
                new_status: ApprovalStatus::Pending,
                step_advanced: true,
                escalated: false,
            })
        }
    }

    /// Records a rejection from `approver`, ending the request regardless of
    /// which step it was at.
    ///
    /// # Errors
    ///
    /// Returns [`StateMachineError::AlreadyTerminal`] if `request` is
    /// terminal.
    pub fn reject(request: &mut ApprovalRequest, approver: ActorId, rationale: String, now: Timestamp) -> Result<TransitionOutcome, StateMachineError> {
        Self::require_pending(request)?;
        request.decisions.push(StepDecision {
            approver,
            decision: ApproverDecision::Reject,
            rationale,
            timestamp: now,
        });
        request.status = ApprovalStatus::Rejected;
        request.updated_at = now;
        Ok(TransitionOutcome {
            previous_status: ApprovalStatus::Pending,
            new_status: ApprovalStatus::Rejected,
            step_advanced: false,
            escalated: false,
        })
    }

    /// Cancels the request. A requester-initiated cancellation is only
    /// authorized when `actor` matches `request.requester`; an
    /// administrator-initiated cancellation is always authorized.
    ///
    /// # Errors
    ///
    /// Returns [`StateMachineError::AlreadyTerminal`] if `request` is
    /// terminal, or [`StateMachineError::UnauthorizedCancel`] if `by` is
    /// [`CancelledBy::Requester`] and `actor` does not match the original
    /// requester.
    pub fn cancel(request: &mut ApprovalRequest, by: CancelledBy, actor: &ActorId, now: Timestamp) -> Result<TransitionOutcome, StateMachineError> {
        Self::require_pending(request)?;
        if matches!(by, CancelledBy::Requester) && actor != &request.requester {
            return Err(StateMachineError::UnauthorizedCancel {
                request: request.id.to_string(),
                actor: actor.to_string(),
            });
        }
        request.status = ApprovalStatus::Cancelled;
        request.updated_at = now;
        Ok(TransitionOutcome {
            previous_status: ApprovalStatus::Pending,
            new_status: ApprovalStatus::Cancelled,
            step_advanced: false,
            escalated: false,
        })
    }

    /// Applies a timer-fire event: escalates (incrementing the escalation
    /// level) if `level + 1 < max_escalations`, otherwise expires the
    /// request.
    ///
    /// # Errors
    ///
    /// Returns [`StateMachineError::AlreadyTerminal`] if `request` is
    /// terminal.
    pub fn timer_fire(request: &mut ApprovalRequest, level: u32, max_escalations: u32, now: Timestamp) -> Result<TransitionOutcome, StateMachineError> {
        Self::require_pending(request)?;
        request.updated_at = now;
        if level < max_escalations {
            request.escalation_history.push(level);
            Ok(TransitionOutcome {
                previous_status: ApprovalStatus::Pending,
                new_status: ApprovalStatus::Pending,
                step_advanced: false,
                escalated: true,
            })
        } else {
            request.status = ApprovalStatus::Expired;
            Ok(TransitionOutcome {
                previous_status: ApprovalStatus::Pending,
                new_status: ApprovalStatus::Expired,
                step_advanced: false,
                escalated: false,
            })
        }
    }

    /// Rejects any transition attempt against a request that is already
    /// terminal (spec.md §4.E.1 "Terminal states ... no transitions from
    /// terminal").
    fn require_pending(request: &ApprovalRequest) -> Result<(), StateMachineError> {
        if request.status.is_terminal() {
            return Err(StateMachineError::AlreadyTerminal(request.id.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, reason = "Test-only assertions are permitted.")]
mod tests {
    use super::ApprovalStateMachine;
    use super::CancelledBy;
    use cgr_core::envelope::Priority;
    use cgr_core::hitl::ApprovalChainDefinition;
    use cgr_core::hitl::ApprovalRequest;
    use cgr_core::hitl::ApprovalStatus;
    use cgr_core::hitl::ChainStep;
    use cgr_core::identifiers::ActorId;
    use cgr_core::identifiers::ApprovalRequestId;
    use cgr_core::identifiers::ChainDefinitionId;
    use cgr_core::identifiers::TenantId;
    use cgr_core::time::Timestamp;
    use std::collections::BTreeMap;

    fn chain(steps: Vec<ChainStep>) -> ApprovalChainDefinition {
        ApprovalChainDefinition {
            id: ChainDefinitionId::new("chain-1").unwrap(),
            version: 1,
            steps,
        }
    }

    fn request() -> ApprovalRequest {
        ApprovalRequest {
            id: ApprovalRequestId::new("req-1").unwrap(),
            chain_id: ChainDefinitionId::new("chain-1").unwrap(),
            tenant_id: TenantId::new("tenant-1").unwrap(),
            requester: ActorId::new("requester-1").unwrap(),
            title: "title".to_string(),
            description: "description".to_string(),
            priority: Priority::High,
            context: BTreeMap::new(),
            status: ApprovalStatus::Pending,
            current_step_index: 0,
            step_started_at: Timestamp::from_unix_millis(0),
            decisions: Vec::new(),
            created_at: Timestamp::from_unix_millis(0),
            updated_at: Timestamp::from_unix_millis(0),
            expires_at: Timestamp::from_unix_millis(22 * 60_000),
            escalation_history: Vec::new(),
        }
    }

    #[test]
    fn single_step_quorum_one_approves_immediately() {
        let chain = chain(vec![ChainStep {
            approvers: vec!["any".to_string()],
            quorum: 1,
            timeout_minutes: None,
        }]);
        let mut req = request();
        let outcome = ApprovalStateMachine::approve(&mut req, &chain, ActorId::new("a1").unwrap(), "ok".to_string(), Timestamp::from_unix_millis(10)).unwrap();
        assert_eq!(outcome.new_status, ApprovalStatus::Approved);
        assert_eq!(req.status, ApprovalStatus::Approved);
    }

    #[test]
    fn two_step_chain_advances_before_approving() {
        let chain = chain(vec![
            ChainStep {
                approvers: vec!["any".to_string()],
                quorum: 1,
                timeout_minutes: None,
            },
            ChainStep {
                approvers: vec!["any".to_string()],
                quorum: 1,
                timeout_minutes: None,
            },
        ]);
        let mut req = request();
        let first = ApprovalStateMachine::approve(&mut req, &chain, ActorId::new("a1").unwrap(), "ok".to_string(), Timestamp::from_unix_millis(10)).unwrap();
        assert!(first.step_advanced);
        assert_eq!(req.current_step_index, 1);
        let second = ApprovalStateMachine::approve(&mut req, &chain, ActorId::new("a2").unwrap(), "ok".to_string(), Timestamp::from_unix_millis(20)).unwrap();
        assert_eq!(second.new_status, ApprovalStatus::Approved);
    }

    #[test]
    fn rejection_ends_request_at_any_step() {
        let _chain = chain(vec![ChainStep {
            approvers: vec!["any".to_string()],
            quorum: 2,
            timeout_minutes: None,
        }]);
        let mut req = request();
        let outcome = ApprovalStateMachine::reject(&mut req, ActorId::new("a1").unwrap(), "no".to_string(), Timestamp::from_unix_millis(10)).unwrap();
        assert_eq!(outcome.new_status, ApprovalStatus::Rejected);
    }

    #[test]
    fn requester_cancel_by_other_actor_is_unauthorized() {
        let mut req = request();
        let err = ApprovalStateMachine::cancel(&mut req, CancelledBy::Requester, &ActorId::new("someone-else").unwrap(), Timestamp::from_unix_millis(10)).unwrap_err();
        assert!(matches!(err, super::StateMachineError::UnauthorizedCancel { .. }));
    }

    #[test]
    fn admin_cancel_is_always_authorized() {
        let mut req = request();
        let outcome = ApprovalStateMachine::cancel(&mut req, CancelledBy::Admin, &ActorId::new("admin-1").unwrap(), Timestamp::from_unix_millis(10)).unwrap();
        assert_eq!(outcome.new_status, ApprovalStatus::Cancelled);
    }

    #[test]
    fn timer_fire_escalates_then_expires_at_max() {
        let mut req = request();
        let first = ApprovalStateMachine::timer_fire(&mut req, 0, 2, Timestamp::from_unix_millis(10)).unwrap();
        assert!(first.escalated);
        assert_eq!(req.status, ApprovalStatus::Pending);
        let second = ApprovalStateMachine::timer_fire(&mut req, 2, 2, Timestamp::from_unix_millis(20)).unwrap();
        assert_eq!(second.new_status, ApprovalStatus::Expired);
    }

    #[test]
    fn terminal_request_rejects_further_transitions() {
        let mut req = request();
        req.status = ApprovalStatus::Approved;
        let chain = chain(vec![ChainStep {
            approvers: vec!["any".to_string()],
            quorum: 1,
            timeout_minutes: None,
        }]);
        let err = ApprovalStateMachine::approve(&mut req, &chain, ActorId::new("a1").unwrap(), "ok".to_string(), Timestamp::from_unix_millis(10)).unwrap_err();
        assert!(matches!(err, super::StateMachineError::AlreadyTerminal(_)));
    }
}
