// crates/cgr-core/src/guardrail.rs
// ============================================================================
// Module: Constitutional Governance Runtime Guardrail Types
// Description: Violations and per-stage results shared by the pipeline.
// Purpose: Give every guardrail stage a common vocabulary for findings and
//          outcomes so the composition algorithm in spec.md §4.C can reason
//          about them uniformly.
// Dependencies: crate::identifiers, crate::time
// ============================================================================

//! ## Overview
//! A [`GuardrailViolation`] is accumulated, never mutated, across the five
//! fixed pipeline stages (spec.md §3 "Guardrail Violation"). A
//! [`GuardrailResult`] is each stage's individual verdict; the pipeline
//! aggregates these into the outer decision using the precedence rules in
//! §4.C "Action semantics".

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::identifiers::EnvelopeId;
use crate::time::Timestamp;

// ============================================================================
// SECTION: Severity
// ============================================================================

/// Severity of a guardrail violation.
///
/// # Invariants
/// - Ordered `Info < Low < Medium < High < Critical` (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational finding with no enforcement action.
    Info,
    /// Low-severity finding.
    Low,
    /// Medium-severity finding.
    Medium,
    /// High-severity finding (e.g. constitutional non-compliance).
    High,
    /// Critical finding (e.g. injection attack, harmful output).
    Critical,
}

// ============================================================================
// SECTION: Violation
// ============================================================================

/// A single guardrail finding, accumulated across pipeline stages.
///
/// # Invariants
/// - Violations are never mutated once appended to a trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardrailViolation {
    /// Stage (layer) identifier that raised this violation.
    pub layer_id: String,
    /// Machine-stable violation kind, e.g. `"injection_attack"`, `"timeout"`.
    pub kind: String,
    /// Severity of the violation.
    pub severity: Severity,
    /// Human-readable message.
    pub message: String,
    /// Structured details for programmatic consumers.
    pub details: BTreeMap<String, Value>,
    /// Timestamp the violation was recorded.
    pub timestamp: Timestamp,
    /// Envelope identifier this violation pertains to.
    pub envelope_id: EnvelopeId,
}

impl GuardrailViolation {
    /// Constructs a violation with an empty details map.
    #[must_use]
    pub fn new(
        layer_id: impl Into<String>,
        kind: impl Into<String>,
        severity: Severity,
        message: impl Into<String>,
        timestamp: Timestamp,
        envelope_id: EnvelopeId,
    ) -> Self {
        Self {
            layer_id: layer_id.into(),
            kind: kind.into(),
            severity,
            message: message.into(),
            details: BTreeMap::new(),
            timestamp,
            envelope_id,
        }
    }

    /// Returns a copy of this violation with one detail key/value attached.
    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }
}

// ============================================================================
// SECTION: Stage Action & Result
// ============================================================================

/// The action a single guardrail stage recommends.
///
/// # Invariants
/// - Variants are stable for serialization and contract matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageAction {
    /// Allow the request to proceed unchanged.
    Allow,
    /// Allow the request to proceed with a modified payload.
    Modify,
    /// Allow the request but flag it for audit.
    Audit,
    /// Route the request to deliberation instead of blocking it outright.
    Escalate,
    /// Reject due to rate limiting.
    RateLimit,
    /// Route the request into the sandbox stage.
    Sandbox,
    /// Block the request outright.
    Block,
}

/// Result returned by a single guardrail stage.
///
/// # Invariants
/// - `allowed == false` whenever `action == Block` or `action == RateLimit`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailResult {
    /// Recommended action.
    pub action: StageAction,
    /// Whether the request is allowed to continue.
    pub allowed: bool,
    /// Violations discovered by this stage.
    pub violations: Vec<GuardrailViolation>,
    /// Modified payload, if this stage rewrote it.
    pub modified_payload: Option<BTreeMap<String, Value>>,
    /// Stage-specific metadata.
    pub metadata: BTreeMap<String, Value>,
    /// Wall-clock milliseconds this stage took to execute.
    pub elapsed_ms: u64,
    /// Envelope identifier this result pertains to.
    pub envelope_id: EnvelopeId,
}

impl GuardrailResult {
    /// Constructs an `allow` result with no violations or modifications.
    #[must_use]
    pub fn allow(envelope_id: EnvelopeId, elapsed_ms: u64) -> Self {
        Self {
            action: StageAction::Allow,
            allowed: true,
            violations: Vec::new(),
            modified_payload: None,
            metadata: BTreeMap::new(),
            elapsed_ms,
            envelope_id,
        }
    }

    /// Constructs a `block` result carrying the given violations.
    #[must_use]
    pub fn block(envelope_id: EnvelopeId, violations: Vec<GuardrailViolation>, elapsed_ms: u64) -> Self {
        Self {
            action: StageAction::Block,
            allowed: false,
            violations,
            modified_payload: None,
            metadata: BTreeMap::new(),
            elapsed_ms,
            envelope_id,
        }
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
    use super::GuardrailResult;
    use super::GuardrailViolation;
    use super::Severity;
    use crate::identifiers::EnvelopeId;
    use crate::time::Timestamp;

    #[test]
    fn block_result_is_never_allowed() {
        let violation = GuardrailViolation::new(
            "sanitize",
            "injection_attack",
            Severity::Critical,
            "script tag detected",
            Timestamp::from_unix_millis(0),
            EnvelopeId::new("e1").unwrap(),
        );
        let result = GuardrailResult::block(EnvelopeId::new("e1").unwrap(), vec![violation], 5);
        assert!(!result.allowed);
        assert_eq!(result.violations.len(), 1);
    }

    #[test]
    fn severity_orders_info_below_critical() {
        assert!(Severity::Info < Severity::Critical);
    }
}
