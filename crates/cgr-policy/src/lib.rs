// crates/cgr-policy/src/lib.rs
// ============================================================================
// Crate: cgr-policy
// Description: Minimal policy rule form and condition evaluator.
// Purpose: Consume the rule form defined in spec.md §6 without implementing
//          a general policy language (explicitly a Non-goal).
// Dependencies: cgr-core, serde, serde_json, thiserror
// ============================================================================

//! # `cgr-policy`
//!
//! The governance engine stage of the guardrail pipeline (spec.md §4.C)
//! consumes a minimal rule form: `{id, name, condition, action, severity,
//! message_template, remediation_hint, enabled, priority}`. The default
//! condition evaluator supports exactly three operators over envelope
//! fields: `X == 'v'`, `X != 'v'`, and `X in [list]`. A pluggable evaluator
//! may be substituted via the [`ConditionEvaluator`] trait; this crate does
//! not define a general policy language (spec.md §1 Non-goals).

pub mod evaluator;
pub mod rule;
pub mod tristate;

pub use evaluator::ConditionEvaluator;
pub use evaluator::DefaultConditionEvaluator;
pub use evaluator::EnvelopeFields;
pub use rule::PolicyAction;
pub use rule::PolicyRule;
pub use tristate::TriState;
