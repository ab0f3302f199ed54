// crates/cgr-guardrail/src/sandbox_stage.rs
// ============================================================================
// Module: Sandbox (Stage 3)
// Description: Executes a payload's tool invocations through an isolated
//              executor with bounded wall-clock, memory, CPU, and network.
// Purpose: Implement spec.md §4.C stage 3 without owning the isolation
//          mechanism itself (container / MicroVM is an injected collaborator,
//          spec.md §1 Non-goals).
// Dependencies: async-trait, cgr-core, cgr-providers, serde_json
// ============================================================================

//! ## Overview
//! A payload with no `tool_invocations` field passes through untouched; this
//! stage only has work to do when the upstream envelope actually asks for a
//! tool call. Each invocation is executed independently so one failing call
//! does not hide the others' results.

use std::collections::BTreeMap;
use std::time::Instant;

use async_trait::async_trait;
use cgr_core::guardrail::GuardrailResult;
use cgr_core::guardrail::GuardrailViolation;
use cgr_core::guardrail::Severity;
use cgr_core::guardrail::StageAction;
use cgr_core::time::Timestamp;
use cgr_providers::SandboxError;
use cgr_providers::SandboxExecutor;
use cgr_providers::SandboxProfile;
use cgr_providers::ToolInvocation;
use serde_json::Value;
use std::sync::Arc;

use crate::context::PipelineContext;
use crate::stage::GuardrailStage;

/// The sandbox stage.
pub struct SandboxStage {
    /// Isolated tool-call executor.
    pub executor: Arc<dyn SandboxExecutor>,
}

impl SandboxStage {
    /// Builds a sandbox stage backed by `executor`.
    #[must_use]
    pub fn new(executor: Arc<dyn SandboxExecutor>) -> Self {
        Self {
            executor,
        }
    }

    /// Parses the payload's `tool_invocations` array, if present, into
    /// [`ToolInvocation`] values. Malformed entries are skipped.
    fn invocations(payload: &BTreeMap<String, Value>) -> Vec<ToolInvocation> {
        let Some(Value::Array(entries)) = payload.get("tool_invocations") else {
            return Vec::new();
        };
        entries
            .iter()
            .filter_map(|entry| {
                let tool_name = entry.get("tool_name")?.as_str()?.to_string();
                let arguments = entry.get("arguments").cloned().unwrap_or(Value::Null);
                Some(ToolInvocation {
                    tool_name,
                    arguments,
                })
            })
            .collect()
    }
}

#[async_trait]
impl GuardrailStage for SandboxStage {
    fn id(&self) -> &str {
        "sandbox"
    }

    async fn process(&self, payload: BTreeMap<String, Value>, context: &PipelineContext, now: Timestamp) -> GuardrailResult {
        let started = Instant::now();
        let invocations = Self::invocations(&payload);
        if invocations.is_empty() {
            return GuardrailResult::allow(context.envelope_id.clone(), 0);
        }

        let mut violations = Vec::new();
        let mut outputs = Vec::new();
        let mut blocked = false;

        for invocation in invocations {
            let tool_name = invocation.tool_name.clone();
            match self.executor.execute(&invocation, &SandboxProfile::default()).await {
                Ok(outcome) => {
                    outputs.push(outcome.output);
                }
                Err(SandboxError::TimedOut(bound)) => {
                    blocked = true;
                    violations.push(GuardrailViolation::new(
                        self.id(),
                        "sandbox_timeout",
                        Severity::Critical,
                        format!("tool '{tool_name}' exceeded its {bound:?} wall-clock bound"),
                        now,
                        context.envelope_id.clone(),
                    ));
                }
                Err(SandboxError::Backend(reason)) => {
                    blocked = true;
                    violations.push(GuardrailViolation::new(
                        self.id(),
                        "sandbox_execution_failed",
                        Severity::High,
                        format!("tool '{tool_name}' failed: {reason}"),
                        now,
                        context.envelope_id.clone(),
                    ));
                }
            }
        }

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let mut metadata = BTreeMap::new();
        metadata.insert("tool_outputs".to_string(), Value::Array(outputs));

        GuardrailResult {
            action: if blocked { StageAction::Block } else { StageAction::Allow },
            allowed: !blocked,
            violations,
            modified_payload: None,
            metadata,
            elapsed_ms,
            envelope_id: context.envelope_id.clone(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, reason = "Test-only assertions are permitted.")]
mod tests {
    use super::SandboxStage;
    use crate::context::PipelineContext;
    use crate::stage::GuardrailStage;
    use cgr_core::identifiers::ActorId;
    use cgr_core::identifiers::EnvelopeId;
    use cgr_core::identifiers::TenantId;
    use cgr_core::identifiers::TraceId;
    use cgr_core::time::Timestamp;
    use cgr_providers::EchoSandboxExecutor;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn context() -> PipelineContext {
        PipelineContext::new(
            TraceId::new("t1").unwrap(),
            EnvelopeId::new("e1").unwrap(),
            ActorId::new("a1").unwrap(),
            TenantId::new("tenant-1").unwrap(),
        )
    }

    #[tokio::test]
    async fn no_invocations_is_a_no_op_allow() {
        let stage = SandboxStage::new(Arc::new(EchoSandboxExecutor));
        let result = stage.process(BTreeMap::new(), &context(), Timestamp::from_unix_millis(0)).await;
        assert!(result.allowed);
    }

    #[tokio::test]
    async fn invocation_output_is_captured() {
        let stage = SandboxStage::new(Arc::new(EchoSandboxExecutor));
        let mut payload = BTreeMap::new();
        payload.insert(
            "tool_invocations".to_string(),
            serde_json::json!([{"tool_name": "echo", "arguments": {"text": "hi"}}]),
        );
        let result = stage.process(payload, &context(), Timestamp::from_unix_millis(0)).await;
        assert!(result.allowed);
        assert!(result.metadata.contains_key("tool_outputs"));
    }
}
