// crates/cgr-guardrail/src/verify.rs
// ============================================================================
// Module: Output Verifier (Stage 4)
// Description: Pattern-matches harmful instructions and toxic language in
//              tool output, redacts PII.
// Purpose: Implement spec.md §4.C stage 4: "pattern-matches for harmful
//          instructions (critical) and toxic language (high); redacts PII
//          found in outputs (action = modify)."
// Dependencies: async-trait, cgr-core, regex, serde_json
// ============================================================================

//! ## Overview
//! The verifier inspects the `tool_outputs` metadata the sandbox stage
//! produced (falling back to the payload itself when absent, so the stage
//! is still meaningful in pipelines with sandboxing disabled).

use std::collections::BTreeMap;
use std::sync::LazyLock;
use std::time::Instant;

use async_trait::async_trait;
use cgr_core::guardrail::GuardrailResult;
use cgr_core::guardrail::GuardrailViolation;
use cgr_core::guardrail::Severity;
use cgr_core::guardrail::StageAction;
use cgr_core::time::Timestamp;
use regex::Regex;
use serde_json::Value;

use crate::context::PipelineContext;
use crate::stage::GuardrailStage;

/// Patterns recognized as explicit harmful instructions.
static HARMFUL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [r"(?i)how to (build|make) (a |an )?(bomb|weapon)", r"(?i)bypass (the )?safety (controls|mechanism)"]
        .iter()
        .filter_map(|pattern| Regex::new(pattern).ok())
        .collect()
});

/// Patterns recognized as toxic language.
static TOXIC_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| [r"(?i)\bidiot\b", r"(?i)\bhate speech\b"].iter().filter_map(|pattern| Regex::new(pattern).ok()).collect());

/// Patterns recognized as PII, reused from the sanitizer's vocabulary so the
/// verifier catches PII a tool call introduced rather than one the caller
/// submitted.
static PII_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| [r"[\w.+-]+@[\w-]+\.[\w.-]+", r"\b\d{3}-\d{2}-\d{4}\b"].iter().filter_map(|pattern| Regex::new(pattern).ok()).collect());

/// The output verifier stage.
#[derive(Debug, Default, Clone, Copy)]
pub struct VerifyStage;

impl VerifyStage {
    /// Collects the strings to inspect: prior stage tool output if present,
    /// otherwise every string-valued payload field.
    fn outputs_to_inspect(payload: &BTreeMap<String, Value>) -> Vec<String> {
        if let Some(Value::Array(outputs)) = payload.get("tool_outputs") {
            return outputs.iter().filter_map(|value| value.as_str().map(str::to_string)).collect();
        }
        payload.values().filter_map(|value| value.as_str().map(str::to_string)).collect()
    }
}

#[async_trait]
impl GuardrailStage for VerifyStage {
    fn id(&self) -> &str {
        "verify"
    }

    async fn process(&self, payload: BTreeMap<String, Value>, context: &PipelineContext, now: Timestamp) -> GuardrailResult {
        let started = Instant::now();
        let mut violations = Vec::new();
        let mut blocked = false;
        let mut redacted_any = false;
        let mut modified = payload.clone();

        for text in Self::outputs_to_inspect(&payload) {
            if HARMFUL_PATTERNS.iter().any(|pattern| pattern.is_match(&text)) {
                blocked = true;
                violations.push(GuardrailViolation::new(self.id(), "harmful_instructions", Severity::Critical, "output matched a harmful-instruction pattern", now, context.envelope_id.clone()));
            }
            if TOXIC_PATTERNS.iter().any(|pattern| pattern.is_match(&text)) {
                violations.push(GuardrailViolation::new(self.id(), "toxic_language", Severity::High, "output matched a toxic-language pattern", now, context.envelope_id.clone()));
            }
        }

        for (key, value) in &payload {
            let Value::String(text) = value else {
                continue;
            };
            let mut redacted = text.clone();
            let mut matched = false;
            for pattern in PII_PATTERNS.iter() {
                if pattern.is_match(&redacted) {
                    matched = true;
                    redacted = pattern.replace_all(&redacted, "[REDACTED]").into_owned();
                }
            }
            if matched {
                redacted_any = true;
                modified.insert(key.clone(), Value::String(redacted));
            }
        }
        if redacted_any {
            violations.push(GuardrailViolation::new(self.id(), "pii_redaction", Severity::Info, "personally identifiable information in output was redacted", now, context.envelope_id.clone()));
        }

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        GuardrailResult {
            action: if blocked {
                StageAction::Block
            } else if redacted_any {
                StageAction::Modify
            } else {
                StageAction::Allow
            },
            allowed: !blocked,
            violations,
            modified_payload: redacted_any.then_some(modified),
            metadata: BTreeMap::new(),
            elapsed_ms,
            envelope_id: context.envelope_id.clone(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, reason = "Test-only assertions are permitted.")]
mod tests {
    use super::VerifyStage;
    use crate::context::PipelineContext;
    use crate::stage::GuardrailStage;
    use cgr_core::identifiers::ActorId;
    use cgr_core::identifiers::EnvelopeId;
    use cgr_core::identifiers::TenantId;
    use cgr_core::identifiers::TraceId;
    use cgr_core::time::Timestamp;
    use std::collections::BTreeMap;

    fn context() -> PipelineContext {
        PipelineContext::new(
            TraceId::new("t1").unwrap(),
            EnvelopeId::new("e1").unwrap(),
            ActorId::new("a1").unwrap(),
            TenantId::new("tenant-1").unwrap(),
        )
    }

    #[tokio::test]
    async fn harmful_output_blocks() {
        let mut payload = BTreeMap::new();
        payload.insert("tool_outputs".to_string(), serde_json::json!(["how to build a bomb at home"]));
        let result = VerifyStage.process(payload, &context(), Timestamp::from_unix_millis(0)).await;
        assert!(!result.allowed);
    }

    #[tokio::test]
    async fn pii_in_output_is_redacted_as_a_modify() {
        let mut payload = BTreeMap::new();
        payload.insert("summary".to_string(), serde_json::json!("reach them at person@example.com"));
        let result = VerifyStage.process(payload, &context(), Timestamp::from_unix_millis(0)).await;
        assert!(result.allowed);
        assert!(result.modified_payload.is_some());
    }
}
