// crates/cgr-hitl/src/lib.rs
// ============================================================================
// Crate: cgr-hitl
// Description: Multi-step, timed, escalating human-in-the-loop approval
//              chain (component E).
// ============================================================================

//! # `cgr-hitl`
//!
//! Drives approval requests through a versioned, multi-step chain with
//! per-priority escalation timers, a checksum-chained local audit trail, and
//! priority-based notification fan-out. See [`ApprovalChain`] for the public
//! contract.

#![deny(missing_docs)]
#![deny(missing_docs_in_private_items)]
#![deny(unsafe_code)]

/// Append-only, checksum-chained local audit trail.
pub mod audit;
/// The top-level orchestrator composing the other modules.
pub mod chain;
/// Priority-keyed escalation timers and SLA tracking.
pub mod escalation;
/// Priority-based notification channel selection and dispatch.
pub mod fanout;
/// Pure approval transition logic.
pub mod state_machine;

pub use audit::AuditError;
pub use audit::HitlAuditLedger;
pub use audit::IntegrityError;
pub use chain::ApprovalChain;
pub use chain::ChainConfig;
pub use chain::HitlError;
pub use escalation::priority_timeout_minutes;
pub use escalation::EscalationConfig;
pub use escalation::EscalationError;
pub use escalation::EscalationTimerEngine;
pub use escalation::SlaBreach;
pub use escalation::SlaStats;
pub use fanout::has_unconfigured_channel;
pub use fanout::ChannelName;
pub use fanout::NotificationFanout;
pub use state_machine::ApprovalStateMachine;
pub use state_machine::CancelledBy;
pub use state_machine::StateMachineError;
pub use state_machine::TransitionOutcome;
