// crates/cgr-policy/src/rule.rs
// ============================================================================
// Module: Policy Rule Form
// Description: The minimal rule shape consumed by the governance engine.
// Purpose: Define spec.md §6's policy rule form exactly, with no additional
//          fields or operators.
// Dependencies: cgr-core, serde
// ============================================================================

//! ## Overview
//! Rules are intentionally minimal. This is the wire and storage shape the
//! governance stage of the guardrail pipeline loads; see [`crate::evaluator`]
//! for how `condition` strings are evaluated against an envelope.

use cgr_core::guardrail::Severity;
use serde::Deserialize;
use serde::Serialize;

/// Action a policy rule prescribes when its condition matches.
///
/// # Invariants
/// - Variants are stable for serialization and contract matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyAction {
    /// Allow the envelope.
    Allow,
    /// Deny the envelope outright.
    Deny,
    /// Require human approval before proceeding.
    RequireApproval,
    /// Route to deliberation.
    Escalate,
    /// Apply rate limiting.
    RateLimit,
    /// Allow but audit only.
    AuditOnly,
    /// Quarantine the envelope for manual review.
    Quarantine,
}

/// A single governance rule.
///
/// # Invariants
/// - `condition` must parse under [`crate::evaluator::ConditionEvaluator`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRule {
    /// Rule identifier.
    pub id: String,
    /// Human-readable rule name.
    pub name: String,
    /// Condition expression, e.g. `"action == 'delete'"`.
    pub condition: String,
    /// Action to take when the condition matches.
    pub action: PolicyAction,
    /// Severity to attach to a violation raised by this rule.
    pub severity: Severity,
    /// Message template, interpolated by the governance stage.
    pub message_template: String,
    /// Hint describing how an operator can remediate a denial.
    pub remediation_hint: Option<String>,
    /// Whether this rule is active.
    pub enabled: bool,
    /// Evaluation priority; lower values evaluate first.
    pub priority: i32,
}
