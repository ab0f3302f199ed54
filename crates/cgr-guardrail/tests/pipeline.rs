// crates/cgr-guardrail/tests/pipeline.rs
// ============================================================================
// Module: Guardrail Pipeline Integration Tests
// Description: Exercises the composed five-stage pipeline end to end.
// ============================================================================
//! ## Overview
//! Builds a full [`GuardrailPipeline`] from reference collaborators and
//! drives representative envelopes through it, checking the outer
//! action-precedence rules from spec.md §4.C and the rate limiter's
//! cross-cutting gate.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, reason = "Test-only assertions are permitted.")]

use std::collections::BTreeMap;
use std::sync::Arc;

use cgr_core::envelope::Envelope;
use cgr_core::envelope::MessageType;
use cgr_core::envelope::Priority;
use cgr_core::guardrail::StageAction;
use cgr_core::identifiers::ActorId;
use cgr_core::identifiers::ConstitutionalHash;
use cgr_core::identifiers::EnvelopeId;
use cgr_core::identifiers::TenantId;
use cgr_core::time::Timestamp;
use cgr_guardrail::GovernanceConfig;
use cgr_guardrail::GovernanceStage;
use cgr_guardrail::GuardrailPipeline;
use cgr_guardrail::LoggingAuditSink;
use cgr_guardrail::PipelineConfig;
use cgr_guardrail::RateLimitConfig;
use cgr_guardrail::RateLimitRule;
use cgr_guardrail::RateLimiter;
use cgr_guardrail::SanitizeConfig;
use cgr_guardrail::SanitizeStage;
use cgr_guardrail::SandboxStage;
use cgr_guardrail::VerifyStage;
use cgr_policy::DefaultConditionEvaluator;
use cgr_policy::PolicyAction;
use cgr_policy::PolicyRule;
use cgr_core::guardrail::Severity;
use cgr_providers::AllowAllConstitutionalValidator;
use cgr_providers::EchoSandboxExecutor;
use cgr_providers::FixedClock;
use cgr_providers::StaticImpactScorer;

fn anchor() -> ConstitutionalHash {
    ConstitutionalHash::new("abcdef0123456789").unwrap()
}

fn envelope(payload: BTreeMap<String, serde_json::Value>) -> Envelope {
    Envelope::new(
        EnvelopeId::new("e1").unwrap(),
        TenantId::new("tenant-1").unwrap(),
        ActorId::new("agent-1").unwrap(),
        "downstream-agent".to_string(),
        MessageType::Command,
        Priority::Standard,
        payload,
        Timestamp::from_unix_millis(0),
        anchor(),
        &anchor(),
    )
    .unwrap()
}

fn build_pipeline(rules: Vec<PolicyRule>, scores: BTreeMap<String, f64>) -> GuardrailPipeline {
    let governance = GovernanceStage::new(
        GovernanceConfig {
            rules,
            deliberation_threshold: 0.8,
        },
        Arc::new(DefaultConditionEvaluator),
        Arc::new(AllowAllConstitutionalValidator),
        Arc::new(StaticImpactScorer::new(scores)),
    );
    GuardrailPipeline::new(
        Arc::new(SanitizeStage::new(SanitizeConfig::default())),
        governance,
        Arc::new(SandboxStage::new(Arc::new(EchoSandboxExecutor))),
        Arc::new(VerifyStage),
        Arc::new(LoggingAuditSink),
        RateLimiter::new(RateLimitConfig {
            default_rule: RateLimitRule {
                window_millis: 60_000,
                max_requests: 2,
            },
            overrides: BTreeMap::new(),
        }),
        PipelineConfig::new(anchor()),
        Arc::new(FixedClock::new(Timestamp::from_unix_millis(0))),
    )
}

#[tokio::test]
async fn clean_request_is_allowed() {
    let pipeline = build_pipeline(Vec::new(), BTreeMap::new());
    let mut payload = BTreeMap::new();
    payload.insert("action".to_string(), serde_json::json!("read"));
    let outcome = pipeline.process_request(&envelope(payload)).await;
    assert!(outcome.allowed);
    assert_eq!(outcome.action, StageAction::Allow);
}

#[tokio::test]
async fn injection_in_payload_blocks_before_later_stages_add_anything() {
    let pipeline = build_pipeline(Vec::new(), BTreeMap::new());
    let mut payload = BTreeMap::new();
    payload.insert("body".to_string(), serde_json::json!("<script>evil()</script>"));
    let outcome = pipeline.process_request(&envelope(payload)).await;
    assert!(!outcome.allowed);
    assert_eq!(outcome.action, StageAction::Block);
    assert_eq!(outcome.per_stage_results.len(), 1);
}

#[tokio::test]
async fn deny_rule_in_governance_blocks() {
    let rule = PolicyRule {
        id: "r1".to_string(),
        name: "deny deletes".to_string(),
        condition: "action == 'delete'".to_string(),
        action: PolicyAction::Deny,
        severity: Severity::Critical,
        message_template: "deletes are denied".to_string(),
        remediation_hint: Some("use archive instead".to_string()),
        enabled: true,
        priority: 0,
    };
    let pipeline = build_pipeline(vec![rule], BTreeMap::new());
    let mut payload = BTreeMap::new();
    payload.insert("action".to_string(), serde_json::json!("delete"));
    let outcome = pipeline.process_request(&envelope(payload)).await;
    assert!(!outcome.allowed);
    assert_eq!(outcome.action, StageAction::Block);
}

#[tokio::test]
async fn third_request_in_window_is_rate_limited() {
    let pipeline = build_pipeline(Vec::new(), BTreeMap::new());
    for _ in 0..2 {
        let mut payload = BTreeMap::new();
        payload.insert("action".to_string(), serde_json::json!("read"));
        let outcome = pipeline.process_request(&envelope(payload)).await;
        assert!(outcome.allowed);
    }
    let mut payload = BTreeMap::new();
    payload.insert("action".to_string(), serde_json::json!("read"));
    let outcome = pipeline.process_request(&envelope(payload)).await;
    assert!(!outcome.allowed);
    assert_eq!(outcome.action, StageAction::RateLimit);
    assert!(outcome.per_stage_results.is_empty());
}
