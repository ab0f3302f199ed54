// crates/cgr-guardrail/src/pipeline.rs
// ============================================================================
// Module: Guardrail Pipeline
// Description: Drives the five fixed stages per the composition algorithm.
// Purpose: Implement spec.md §4.C's composition algorithm, action-precedence
//          semantics, per-stage and pipeline-wide timeouts, and fail-closed
//          behavior on both timeout and stage panic.
// Dependencies: cgr-core, cgr-providers, tokio, tracing
// ============================================================================

//! ## Overview
//! [`GuardrailPipeline::process_request`] is the single entry point: it runs
//! the cross-cutting rate limiter, then sanitize, govern, sandbox, and
//! verify in order (each racing its own timeout), then unconditionally runs
//! the audit sink, and folds everything into one [`PipelineOutcome`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use cgr_core::envelope::Envelope;
use cgr_core::guardrail::GuardrailResult;
use cgr_core::guardrail::GuardrailViolation;
use cgr_core::guardrail::Severity;
use cgr_core::guardrail::StageAction;
use cgr_core::identifiers::ConstitutionalHash;
use cgr_core::identifiers::TraceId;
use cgr_providers::Clock;
use serde_json::Value;
use serde_json::json;

use crate::audit::AuditSink;
use crate::context::PipelineContext;
use crate::governance::GovernanceStage;
use crate::rate_limit::RateLimiter;
use crate::stage::GuardrailStage;

/// Per-stage timeout budgets (spec.md §4.C "Timeouts", recommended caps).
#[derive(Debug, Clone, Copy)]
pub struct StageTimeouts {
    /// Input sanitizer budget.
    pub sanitize: Duration,
    /// Governance engine budget.
    pub govern: Duration,
    /// Sandbox budget.
    pub sandbox: Duration,
    /// Output verifier budget.
    pub verify: Duration,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            sanitize: Duration::from_secs(1),
            govern: Duration::from_secs(5),
            sandbox: Duration::from_secs(10),
            verify: Duration::from_secs(2),
        }
    }
}

/// Pipeline-wide configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Overall cap across all four enabled stages (default ~15s).
    pub pipeline_timeout: Duration,
    /// Per-stage timeout budgets.
    pub stage_timeouts: StageTimeouts,
    /// Whether a disallowed stage halts the remaining stages. `false` is
    /// reserved for audit-only deployments (spec.md §4.C "Fail-closed
    /// semantics").
    pub fail_closed: bool,
    /// Whether the sanitize stage runs.
    pub sanitize_enabled: bool,
    /// Whether the governance stage runs.
    pub govern_enabled: bool,
    /// Whether the sandbox stage runs.
    pub sandbox_enabled: bool,
    /// Whether the verify stage runs.
    pub verify_enabled: bool,
    /// Constitutional anchor stamped onto every audit sink record
    /// (spec.md §4.C stage 5: "...the final decision, trace id, and
    /// constitutional anchor").
    pub constitutional_anchor: ConstitutionalHash,
}

impl PipelineConfig {
    /// Builds a pipeline configuration with the teacher's recommended
    /// timeout and enablement defaults, pinned to `constitutional_anchor`.
    #[must_use]
    pub fn new(constitutional_anchor: ConstitutionalHash) -> Self {
        Self {
            pipeline_timeout: Duration::from_secs(15),
            stage_timeouts: StageTimeouts::default(),
            fail_closed: true,
            sanitize_enabled: true,
            govern_enabled: true,
            sandbox_enabled: true,
            verify_enabled: true,
            constitutional_anchor,
        }
    }
}

/// Outcome of one full pipeline traversal.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    /// Whether the request is allowed to proceed.
    pub allowed: bool,
    /// The (possibly modified) payload after all stages ran.
    pub final_data: BTreeMap<String, Value>,
    /// Every violation raised by every stage that ran.
    pub violations: Vec<GuardrailViolation>,
    /// Each stage's individual result, in execution order.
    pub per_stage_results: Vec<(String, GuardrailResult)>,
    /// Trace id for this traversal.
    pub trace_id: TraceId,
    /// Outer decision per spec.md §4.C "Action semantics".
    pub action: StageAction,
}

/// Drives the five fixed guardrail stages for one request at a time.
pub struct GuardrailPipeline {
    /// Stage 1.
    sanitize: Arc<dyn GuardrailStage>,
    /// Stage 2 template; cloned per request with the envelope attached.
    governance_template: GovernanceStage,
    /// Stage 3.
    sandbox: Arc<dyn GuardrailStage>,
    /// Stage 4.
    verify: Arc<dyn GuardrailStage>,
    /// Stage 5, always runs.
    audit: Arc<dyn AuditSink>,
    /// Cross-cutting per-actor rate limiter.
    rate_limiter: RateLimiter,
    /// Pipeline configuration.
    config: PipelineConfig,
    /// Time source, injected for deterministic tests.
    clock: Arc<dyn Clock>,
}

impl GuardrailPipeline {
    /// Builds a pipeline from its five stage collaborators.
    #[must_use]
    pub fn new(
        sanitize: Arc<dyn GuardrailStage>,
        governance_template: GovernanceStage,
        sandbox: Arc<dyn GuardrailStage>,
        verify: Arc<dyn GuardrailStage>,
        audit: Arc<dyn AuditSink>,
        rate_limiter: RateLimiter,
        config: PipelineConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            sanitize,
            governance_template,
            sandbox,
            verify,
            audit,
            rate_limiter,
            config,
            clock,
        }
    }

    /// Runs `envelope` through the full pipeline.
    pub async fn process_request(&self, envelope: &Envelope) -> PipelineOutcome {
        let now = self.clock.now();
        let trace_id =
            TraceId::new(format!("trace-{}", envelope.id.as_str())).unwrap_or_else(|_| unreachable!("envelope id is non-empty, so the prefixed trace id cannot be empty"));
        let mut context = PipelineContext::new(trace_id.clone(), envelope.id.clone(), envelope.actor_id.clone(), envelope.tenant_id.clone());

        if !self.rate_limiter.check_and_record(&envelope.actor_id, envelope.tenant_id.as_str(), now) {
            let violation = GuardrailViolation::new("rate_limit", "rate_limit", Severity::Medium, "actor exceeded its configured request rate", now, envelope.id.clone());
            self.audit
                .record(json!({
                    "trace_id": trace_id.as_str(),
                    "envelope_id": envelope.id.as_str(),
                    "final_allowed": false,
                    "action": "rate_limit",
                    "violations": 1,
                    "constitutional_anchor": self.config.constitutional_anchor.as_str(),
                }))
                .await;
            return PipelineOutcome {
                allowed: false,
                final_data: envelope.payload.clone(),
                violations: vec![violation],
                per_stage_results: Vec::new(),
                trace_id,
                action: StageAction::RateLimit,
            };
        }

        let stages: Vec<(&str, Arc<dyn GuardrailStage>, bool, Duration)> = vec![
            ("sanitize", Arc::clone(&self.sanitize), self.config.sanitize_enabled, self.config.stage_timeouts.sanitize),
            (
                "govern",
                Arc::new(self.governance_template.for_envelope(envelope.clone())) as Arc<dyn GuardrailStage>,
                self.config.govern_enabled,
                self.config.stage_timeouts.govern,
            ),
            ("sandbox", Arc::clone(&self.sandbox), self.config.sandbox_enabled, self.config.stage_timeouts.sandbox),
            ("verify", Arc::clone(&self.verify), self.config.verify_enabled, self.config.stage_timeouts.verify),
        ];

        let pipeline_started = Instant::now();
        let mut current = envelope.payload.clone();
        let mut allowed = true;
        let mut saw_rate_limit = false;
        let mut per_stage_results = Vec::new();

        for (name, stage, enabled, stage_timeout) in stages {
            if !enabled {
                continue;
            }
            if pipeline_started.elapsed() >= self.config.pipeline_timeout {
                let result = Self::timeout_result(name, &envelope.id, now);
                context.accumulated_violations.extend(result.violations.clone());
                per_stage_results.push((name.to_string(), result));
                allowed = false;
                break;
            }

            context.current_layer = name.to_string();
            let remaining = self.config.pipeline_timeout.saturating_sub(pipeline_started.elapsed());
            let budget = stage_timeout.min(remaining);
            let payload = current.clone();
            let ctx_snapshot = context.clone();
            let handle = tokio::spawn(async move { stage.process(payload, &ctx_snapshot, now).await });

            let result = match tokio::time::timeout(budget, handle).await {
                Ok(Ok(result)) => result,
                Ok(Err(join_error)) => {
                    tracing::error!(stage = name, error = %join_error, "guardrail stage panicked");
                    Self::processing_error_result(name, &envelope.id, now)
                }
                Err(_elapsed) => Self::timeout_result(name, &envelope.id, now),
            };

            context.accumulated_violations.extend(result.violations.clone());
            if let Some(modified) = &result.modified_payload {
                current = modified.clone();
            }
            let stage_disallowed = !result.allowed;
            if stage_disallowed {
                allowed = false;
                saw_rate_limit = saw_rate_limit || matches!(result.action, StageAction::RateLimit);
            }
            per_stage_results.push((name.to_string(), result));
            if stage_disallowed && self.config.fail_closed {
                break;
            }
        }

        let violations = context.accumulated_violations.clone();
        let any_modified = per_stage_results.iter().any(|(_, result)| result.modified_payload.is_some());
        let action = if !allowed {
            if saw_rate_limit {
                StageAction::RateLimit
            } else {
                StageAction::Block
            }
        } else {
            Self::decide_action(&violations, any_modified)
        };

        self.audit
            .record(json!({
                "trace_id": trace_id.as_str(),
                "envelope_id": envelope.id.as_str(),
                "final_allowed": allowed,
                "action": format!("{action:?}"),
                "violations": violations.len(),
                "total_elapsed_ms": u64::try_from(pipeline_started.elapsed().as_millis()).unwrap_or(u64::MAX),
                "constitutional_anchor": self.config.constitutional_anchor.as_str(),
            }))
            .await;

        PipelineOutcome {
            allowed,
            final_data: current,
            violations,
            per_stage_results,
            trace_id,
            action,
        }
    }

    /// Outer action-precedence rule (spec.md §4.C "Action semantics"),
    /// applied when no stage already forced a disallow.
    fn decide_action(violations: &[GuardrailViolation], any_modified: bool) -> StageAction {
        if violations.iter().any(|violation| violation.severity == Severity::Critical) {
            return StageAction::Block;
        }
        if violations.iter().any(|violation| violation.layer_id == "govern" && violation.severity == Severity::High) {
            return StageAction::Escalate;
        }
        if any_modified {
            return StageAction::Modify;
        }
        if !violations.is_empty() {
            return StageAction::Audit;
        }
        StageAction::Allow
    }

    /// Builds the synthesized `timeout` critical violation and block result.
    fn timeout_result(stage: &str, envelope_id: &cgr_core::identifiers::EnvelopeId, now: cgr_core::time::Timestamp) -> GuardrailResult {
        let violation = GuardrailViolation::new(stage, "timeout", Severity::Critical, format!("stage '{stage}' exceeded its timeout budget"), now, envelope_id.clone());
        GuardrailResult::block(envelope_id.clone(), vec![violation], 0)
    }

    /// Builds the synthesized `processing_error` high-severity violation and
    /// block result for a stage that panicked (spec.md §4.C "Fail-closed
    /// semantics").
    fn processing_error_result(stage: &str, envelope_id: &cgr_core::identifiers::EnvelopeId, now: cgr_core::time::Timestamp) -> GuardrailResult {
        let violation = GuardrailViolation::new(stage, "processing_error", Severity::High, format!("stage '{stage}' raised an uncaught error"), now, envelope_id.clone());
        GuardrailResult::block(envelope_id.clone(), vec![violation], 0)
    }
}
