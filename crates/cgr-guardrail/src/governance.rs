// crates/cgr-guardrail/src/governance.rs
// ============================================================================
// Module: Governance Engine (Stage 2)
// Description: Rule evaluation, constitutional validation, impact scoring.
// Purpose: Implement spec.md §4.C stage 2: "constitutional validation
//          (checks anchor matches, returns compliance score from an injected
//          validator) and impact scoring... if impact exceeds the configured
//          deliberation threshold, action = escalate (not block)."
// Dependencies: async-trait, cgr-core, cgr-policy, cgr-providers, serde_json
// ============================================================================

//! ## Overview
//! Rules are evaluated in ascending `priority` order; the first enabled rule
//! whose condition is [`cgr_policy::TriState::True`] determines the rule
//! portion of the verdict. Constitutional compliance and impact scoring run
//! unconditionally, since both inform the outer decision regardless of
//! whether any rule matched.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use cgr_core::envelope::Envelope;
use cgr_core::guardrail::GuardrailResult;
use cgr_core::guardrail::GuardrailViolation;
use cgr_core::guardrail::Severity;
use cgr_core::guardrail::StageAction;
use cgr_core::time::Timestamp;
use cgr_policy::ConditionEvaluator;
use cgr_policy::EnvelopeFields;
use cgr_policy::PolicyAction;
use cgr_policy::PolicyRule;
use cgr_policy::TriState;
use cgr_providers::ConstitutionalValidator;
use cgr_providers::ImpactScorer;
use cgr_providers::DEFAULT_FALLBACK_SCORE;
use serde_json::Value;

use crate::context::PipelineContext;
use crate::stage::GuardrailStage;

/// Configuration for the governance engine stage.
#[derive(Debug, Clone)]
pub struct GovernanceConfig {
    /// Rules evaluated against every envelope, in ascending priority order.
    pub rules: Vec<PolicyRule>,
    /// Impact score at or above which the outer decision escalates.
    pub deliberation_threshold: f64,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            deliberation_threshold: 0.8,
        }
    }
}

/// The governance engine stage.
pub struct GovernanceStage {
    /// Stage configuration.
    pub config: GovernanceConfig,
    /// Condition evaluator applied to each rule.
    pub evaluator: Arc<dyn ConditionEvaluator + Send + Sync>,
    /// Constitutional compliance validator.
    pub validator: Arc<dyn ConstitutionalValidator>,
    /// Impact scorer.
    pub scorer: Arc<dyn ImpactScorer>,
    /// Envelope snapshot this stage reasons about; refreshed per request by
    /// [`GovernanceStage::for_envelope`].
    envelope: Option<Envelope>,
}

impl GovernanceStage {
    /// Builds a governance stage with the given collaborators.
    #[must_use]
    pub fn new(
        config: GovernanceConfig,
        evaluator: Arc<dyn ConditionEvaluator + Send + Sync>,
        validator: Arc<dyn ConstitutionalValidator>,
        scorer: Arc<dyn ImpactScorer>,
    ) -> Self {
        Self {
            config,
            evaluator,
            validator,
            scorer,
            envelope: None,
        }
    }

    /// Returns a copy of this stage scoped to `envelope`, so the constitutional
    /// validator sees the actual envelope under evaluation rather than a
    /// reconstruction from the payload alone.
    #[must_use]
    pub fn for_envelope(&self, envelope: Envelope) -> Self {
        Self {
            config: self.config.clone(),
            evaluator: Arc::clone(&self.evaluator),
            validator: Arc::clone(&self.validator),
            scorer: Arc::clone(&self.scorer),
            envelope: Some(envelope),
        }
    }

    /// Derives the fixed envelope fields the default evaluator understands
    /// from context and payload.
    fn fields(context: &PipelineContext, payload: &BTreeMap<String, Value>) -> EnvelopeFields {
        EnvelopeFields {
            action: payload.get("action").and_then(Value::as_str).map(str::to_string),
            resource_type: payload.get("resource_type").and_then(Value::as_str).map(str::to_string),
            actor_id: Some(context.actor_id.as_str().to_string()),
            tenant_id: Some(context.tenant_id.as_str().to_string()),
        }
    }

    /// Maps a matched rule's prescribed action to a stage-level action and
    /// severity.
    fn rule_outcome(action: PolicyAction) -> (StageAction, Severity) {
        match action {
            PolicyAction::Allow => (StageAction::Allow, Severity::Info),
            PolicyAction::Deny => (StageAction::Block, Severity::Critical),
            PolicyAction::RequireApproval | PolicyAction::Escalate | PolicyAction::Quarantine => (StageAction::Escalate, Severity::High),
            PolicyAction::RateLimit => (StageAction::RateLimit, Severity::Medium),
            PolicyAction::AuditOnly => (StageAction::Audit, Severity::Low),
        }
    }
}

#[async_trait]
impl GuardrailStage for GovernanceStage {
    fn id(&self) -> &str {
        "govern"
    }

    async fn process(&self, payload: BTreeMap<String, Value>, context: &PipelineContext, now: Timestamp) -> GuardrailResult {
        let started = Instant::now();
        let mut violations = Vec::new();
        let mut action = StageAction::Allow;
        let mut allowed = true;

        let fields = Self::fields(context, &payload);
        let mut rules: Vec<&PolicyRule> = self.config.rules.iter().collect();
        rules.sort_by_key(|rule| rule.priority);
        for rule in rules {
            if !rule.enabled {
                continue;
            }
            let matched = self.evaluator.evaluate(&rule.condition, &fields).unwrap_or(TriState::Unknown);
            if matched != TriState::True {
                continue;
            }
            let (rule_action, severity) = Self::rule_outcome(rule.action);
            let message = if rule.message_template.is_empty() { rule.name.clone() } else { rule.message_template.clone() };
            violations.push(
                GuardrailViolation::new(self.id(), "policy_rule_matched", severity, message, now, context.envelope_id.clone())
                    .with_detail("rule_id", Value::String(rule.id.clone())),
            );
            action = rule_action;
            allowed = !matches!(rule_action, StageAction::Block | StageAction::RateLimit);
            break;
        }

        let compliance = match &self.envelope {
            Some(envelope) => self.validator.validate(envelope).await.ok(),
            None => None,
        };
        if let Some(outcome) = compliance {
            if !outcome.compliant {
                violations.push(
                    GuardrailViolation::new(
                        self.id(),
                        "constitutional_non_compliance",
                        Severity::High,
                        format!("constitutional compliance score {:.3} below the compliant threshold", outcome.score),
                        now,
                        context.envelope_id.clone(),
                    )
                    .with_detail("score", Value::from(outcome.score)),
                );
                if matches!(action, StageAction::Allow) {
                    action = StageAction::Escalate;
                }
            }
        }

        let score = self.scorer.score(&payload).await.unwrap_or_else(|error| {
            tracing::warn!(error = %error, "impact scoring failed, substituting fallback score");
            DEFAULT_FALLBACK_SCORE
        });
        if score >= self.config.deliberation_threshold && matches!(action, StageAction::Allow) {
            action = StageAction::Escalate;
            violations.push(
                GuardrailViolation::new(
                    self.id(),
                    "impact_exceeds_threshold",
                    Severity::Medium,
                    format!("impact score {score:.3} meets or exceeds the deliberation threshold {:.3}", self.config.deliberation_threshold),
                    now,
                    context.envelope_id.clone(),
                )
                .with_detail("impact_score", Value::from(score)),
            );
        }

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let mut metadata = BTreeMap::new();
        metadata.insert("impact_score".to_string(), Value::from(score));

        GuardrailResult {
            action,
            allowed,
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
    use super::GovernanceConfig;
    use super::GovernanceStage;
    use crate::context::PipelineContext;
    use crate::stage::GuardrailStage;
    use cgr_core::guardrail::Severity;
    use cgr_core::guardrail::StageAction;
    use cgr_core::identifiers::ActorId;
    use cgr_core::identifiers::EnvelopeId;
    use cgr_core::identifiers::TenantId;
    use cgr_core::identifiers::TraceId;
    use cgr_core::time::Timestamp;
    use cgr_policy::DefaultConditionEvaluator;
    use cgr_policy::PolicyAction;
    use cgr_policy::PolicyRule;
    use cgr_providers::AllowAllConstitutionalValidator;
    use cgr_providers::StaticImpactScorer;
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
    async fn matching_deny_rule_blocks() {
        let rule = PolicyRule {
            id: "r1".to_string(),
            name: "deny deletes".to_string(),
            condition: "action == 'delete'".to_string(),
            action: PolicyAction::Deny,
            severity: Severity::Critical,
            message_template: "deletes are denied".to_string(),
            remediation_hint: None,
            enabled: true,
            priority: 0,
        };
        let stage = GovernanceStage::new(
            GovernanceConfig {
                rules: vec![rule],
                deliberation_threshold: 0.8,
            },
            Arc::new(DefaultConditionEvaluator),
            Arc::new(AllowAllConstitutionalValidator),
            Arc::new(StaticImpactScorer::default()),
        );
        let mut payload = BTreeMap::new();
        payload.insert("action".to_string(), serde_json::json!("delete"));
        let result = stage.process(payload, &context(), Timestamp::from_unix_millis(0)).await;
        assert!(!result.allowed);
        assert_eq!(result.action, StageAction::Block);
    }

    #[tokio::test]
    async fn lowest_priority_rule_wins_regardless_of_registration_order() {
        let low_priority_allow = PolicyRule {
            id: "r-low".to_string(),
            name: "allow reads".to_string(),
            condition: "action == 'delete'".to_string(),
            action: PolicyAction::Allow,
            severity: Severity::Info,
            message_template: String::new(),
            remediation_hint: None,
            enabled: true,
            priority: 0,
        };
        let high_priority_deny = PolicyRule {
            id: "r-high".to_string(),
            name: "deny deletes".to_string(),
            condition: "action == 'delete'".to_string(),
            action: PolicyAction::Deny,
            severity: Severity::Critical,
            message_template: String::new(),
            remediation_hint: None,
            enabled: true,
            priority: 10,
        };
        let stage = GovernanceStage::new(
            GovernanceConfig {
                // Registered out of priority order: the higher-priority-number
                // deny rule comes first in the vec, but the lower-priority-number
                // allow rule must still win the match.
                rules: vec![high_priority_deny, low_priority_allow],
                deliberation_threshold: 0.8,
            },
            Arc::new(DefaultConditionEvaluator),
            Arc::new(AllowAllConstitutionalValidator),
            Arc::new(StaticImpactScorer::default()),
        );
        let mut payload = BTreeMap::new();
        payload.insert("action".to_string(), serde_json::json!("delete"));
        let result = stage.process(payload, &context(), Timestamp::from_unix_millis(0)).await;
        assert!(result.allowed);
        assert_eq!(result.action, StageAction::Allow);
    }

    #[tokio::test]
    async fn high_impact_escalates_without_blocking() {
        let mut scores = BTreeMap::new();
        scores.insert("purge".to_string(), 0.95);
        let stage = GovernanceStage::new(
            GovernanceConfig::default(),
            Arc::new(DefaultConditionEvaluator),
            Arc::new(AllowAllConstitutionalValidator),
            Arc::new(StaticImpactScorer::new(scores)),
        );
        let mut payload = BTreeMap::new();
        payload.insert("action".to_string(), serde_json::json!("purge"));
        let result = stage.process(payload, &context(), Timestamp::from_unix_millis(0)).await;
        assert!(result.allowed);
        assert_eq!(result.action, StageAction::Escalate);
    }
}
