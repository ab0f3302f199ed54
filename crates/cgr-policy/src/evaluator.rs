// crates/cgr-policy/src/evaluator.rs
// ============================================================================
// Module: Condition Evaluator
// Description: Evaluates the three operators spec.md §6 defines over a
//              fixed set of envelope fields.
// Purpose: Keep condition evaluation pluggable while shipping a default
//          implementation that covers exactly what the spec asks for.
// Dependencies: cgr-core, thiserror
// ============================================================================

//! ## Overview
//! The default evaluator supports `X == 'v'`, `X != 'v'`, and
//! `X in [list]` where `X` ranges over `action`, `resource_type`,
//! `actor_id`, and `tenant_id`. A pluggable [`ConditionEvaluator`] may be
//! substituted for richer condition languages; this crate does not grow one
//! itself (spec.md §1 Non-goals: "does not define a general policy
//! language").

// ============================================================================
// SECTION: Imports
// ============================================================================

use crate::tristate::TriState;

// ============================================================================
// SECTION: Envelope Fields
// ============================================================================

/// The fixed set of envelope fields the default evaluator can reference.
///
/// # Invariants
/// - Any field left `None` resolves referencing conditions to
///   [`TriState::Unknown`].
#[derive(Debug, Clone, Default)]
pub struct EnvelopeFields {
    /// `action` field, e.g. `"delete"`.
    pub action: Option<String>,
    /// `resource_type` field, e.g. `"production_database"`.
    pub resource_type: Option<String>,
    /// `actor_id` field.
    pub actor_id: Option<String>,
    /// `tenant_id` field.
    pub tenant_id: Option<String>,
}

impl EnvelopeFields {
    /// Looks up a field by name, returning `None` for unknown field names or
    /// fields that were not populated.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&str> {
        match field {
            "action" => self.action.as_deref(),
            "resource_type" => self.resource_type.as_deref(),
            "actor_id" => self.actor_id.as_deref(),
            "tenant_id" => self.tenant_id.as_deref(),
            _ => None,
        }
    }
}

// ============================================================================
// SECTION: Evaluator Trait
// ============================================================================

/// Errors raised while evaluating a condition expression.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConditionError {
    /// The expression did not match any supported operator shape.
    #[error("unsupported condition expression: {0}")]
    Unsupported(String),
}

/// Evaluates a condition expression against envelope fields.
///
/// Implementations may substitute a richer condition language; the default
/// in this crate only supports the three operators named in spec.md §6.
pub trait ConditionEvaluator {
    /// Evaluates `condition` against `fields`.
    ///
    /// # Errors
    ///
    /// Returns [`ConditionError`] when `condition` cannot be parsed.
    fn evaluate(&self, condition: &str, fields: &EnvelopeFields) -> Result<TriState, ConditionError>;
}

// ============================================================================
// SECTION: Default Evaluator
// ============================================================================

/// The default, spec-minimal condition evaluator.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultConditionEvaluator;

impl ConditionEvaluator for DefaultConditionEvaluator {
    fn evaluate(&self, condition: &str, fields: &EnvelopeFields) -> Result<TriState, ConditionError> {
        let condition = condition.trim();
        if let Some((field, value)) = split_operator(condition, "==") {
            return Ok(eval_eq(fields, field, value));
        }
        if let Some((field, value)) = split_operator(condition, "!=") {
            return Ok(eval_ne(fields, field, value));
        }
        if let Some((field, list)) = split_in(condition) {
            return Ok(eval_in(fields, field, &list));
        }
        Err(ConditionError::Unsupported(condition.to_string()))
    }
}

/// Splits `"field OP 'value'"` on the first occurrence of `op`, returning the
/// trimmed field name and the unquoted value.
fn split_operator<'a>(condition: &'a str, op: &str) -> Option<(&'a str, String)> {
    let (field, rest) = condition.split_once(op)?;
    let field = field.trim();
    let value = unquote(rest.trim());
    Some((field, value))
}

/// Splits `"field in [a, b, c]"` into the field name and the unquoted values.
fn split_in(condition: &str) -> Option<(&str, Vec<String>)> {
    let (field, rest) = condition.split_once(" in ")?;
    let field = field.trim();
    let rest = rest.trim();
    let inner = rest.strip_prefix('[')?.strip_suffix(']')?;
    let values = inner
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(unquote)
        .collect();
    Some((field, values))
}

/// Strips a single layer of matching single or double quotes, if present.
fn unquote(value: &str) -> String {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'\'' && last == b'\'') || (first == b'"' && last == b'"') {
            return value[1..value.len() - 1].to_string();
        }
    }
    value.to_string()
}

fn eval_eq(fields: &EnvelopeFields, field: &str, value: String) -> TriState {
    match fields.get(field) {
        Some(actual) => TriState::from(actual == value),
        None => TriState::Unknown,
    }
}

fn eval_ne(fields: &EnvelopeFields, field: &str, value: String) -> TriState {
    match fields.get(field) {
        Some(actual) => TriState::from(actual != value),
        None => TriState::Unknown,
    }
}

fn eval_in(fields: &EnvelopeFields, field: &str, list: &[String]) -> TriState {
    match fields.get(field) {
        Some(actual) => TriState::from(list.iter().any(|candidate| candidate == actual)),
        None => TriState::Unknown,
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
    use super::ConditionEvaluator;
    use super::DefaultConditionEvaluator;
    use super::EnvelopeFields;
    use crate::tristate::TriState;

    fn fields() -> EnvelopeFields {
        EnvelopeFields {
            action: Some("delete".to_string()),
            resource_type: Some("production_database".to_string()),
            actor_id: Some("agent-1".to_string()),
            tenant_id: None,
        }
    }

    #[test]
    fn eq_operator_matches_quoted_value() {
        let result = DefaultConditionEvaluator.evaluate("action == 'delete'", &fields()).unwrap();
        assert_eq!(result, TriState::True);
    }

    #[test]
    fn ne_operator_rejects_matching_value() {
        let result = DefaultConditionEvaluator.evaluate("action != 'delete'", &fields()).unwrap();
        assert_eq!(result, TriState::False);
    }

    #[test]
    fn in_operator_checks_membership() {
        let result = DefaultConditionEvaluator
            .evaluate("resource_type in ['production_database', 'billing_ledger']", &fields())
            .unwrap();
        assert_eq!(result, TriState::True);
    }

    #[test]
    fn missing_field_is_unknown() {
        let result = DefaultConditionEvaluator.evaluate("tenant_id == 'acme'", &fields()).unwrap();
        assert_eq!(result, TriState::Unknown);
    }

    #[test]
    fn unsupported_expression_is_an_error() {
        let result = DefaultConditionEvaluator.evaluate("action contains 'del'", &fields());
        assert!(result.is_err());
    }
}
