// crates/cgr-hitl/tests/approval_chain.rs
// ============================================================================
// Module: Approval Chain Integration Tests
// Description: Exercises the full public contract of `ApprovalChain` across
//              multi-step quorum, cancellation authorization, and
//              notification fan-out.
// ============================================================================
//! ## Overview
//! Complements `chain.rs`'s inline tests (single-step approve, reject,
//! expiry-by-sweep) with scenarios that need a custom notification provider
//! or multi-step quorum across distinct approvers.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, reason = "Test-only assertions are permitted.")]

use std::collections::BTreeMap;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use cgr_core::envelope::Priority;
use cgr_core::hitl::ApprovalChainDefinition;
use cgr_core::hitl::ApprovalStatus;
use cgr_core::hitl::ChainStep;
use cgr_core::identifiers::ActorId;
use cgr_core::identifiers::ChainDefinitionId;
use cgr_core::identifiers::ConstitutionalHash;
use cgr_core::identifiers::TenantId;
use cgr_core::time::Timestamp;
use cgr_hitl::audit::HitlAuditLedger;
use cgr_hitl::chain::ApprovalChain;
use cgr_hitl::chain::ChainConfig;
use cgr_hitl::escalation::EscalationConfig;
use cgr_hitl::escalation::EscalationTimerEngine;
use cgr_hitl::fanout::NotificationFanout;
use cgr_hitl::state_machine::CancelledBy;
use cgr_providers::FixedClock;
use cgr_providers::InMemoryKvStore;
use cgr_providers::NotificationError;
use cgr_providers::NotificationMessage;
use cgr_providers::NotificationProvider;

#[derive(Default)]
struct CountingProvider {
    sent: AtomicUsize,
}

#[async_trait]
impl NotificationProvider for CountingProvider {
    fn is_configured(&self) -> bool {
        true
    }

    async fn send(&self, _message: &NotificationMessage) -> Result<(), NotificationError> {
        self.sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn two_step_chain() -> ApprovalChainDefinition {
    ApprovalChainDefinition {
        id: ChainDefinitionId::new("two-step").unwrap(),
        version: 1,
        steps: vec![
            ChainStep {
                approvers: vec!["any".to_string()],
                quorum: 1,
                timeout_minutes: Some(10),
            },
            ChainStep {
                approvers: vec!["any".to_string()],
                quorum: 1,
                timeout_minutes: Some(10),
            },
        ],
    }
}

fn build_chain(slack: Arc<CountingProvider>) -> ApprovalChain {
    let store = Arc::new(InMemoryKvStore::new());
    let escalation = EscalationTimerEngine::new(store.clone(), EscalationConfig::default());
    let audit = HitlAuditLedger::new(store);
    let fanout = NotificationFanout::new(1).register("slack", slack);
    let clock = Arc::new(FixedClock::new(Timestamp::from_unix_millis(0)));
    let config = ChainConfig {
        max_escalations: 2,
        constitutional_hash: ConstitutionalHash::new("abcdef0123456789").unwrap(),
    };
    ApprovalChain::new(escalation, audit, fanout, None, None, clock, config)
}

#[tokio::test]
async fn two_distinct_approvers_advance_through_both_steps() {
    let slack = Arc::new(CountingProvider::default());
    let chain = build_chain(Arc::clone(&slack));
    chain.register_chain(two_step_chain());

    let request = chain
        .create_request(ChainDefinitionId::new("two-step").unwrap(), TenantId::new("tenant-1").unwrap(), ActorId::new("requester-1").unwrap(), "roll out config".to_string(), "enable new guardrail stage".to_string(), Priority::Standard, BTreeMap::new())
        .await
        .unwrap();
    assert_eq!(request.status, ApprovalStatus::Pending);
    assert_eq!(request.current_step_index, 0);

    let after_first = chain.approve(&request.id, ActorId::new("approver-1").unwrap(), "step 1 looks fine".to_string()).await.unwrap();
    assert_eq!(after_first.status, ApprovalStatus::Pending);
    assert_eq!(after_first.current_step_index, 1);

    let after_second = chain.approve(&request.id, ActorId::new("approver-2").unwrap(), "step 2 looks fine".to_string()).await.unwrap();
    assert_eq!(after_second.status, ApprovalStatus::Approved);

    let (ok, errors) = chain.verify_audit_integrity(None).await.unwrap();
    assert!(ok, "{errors:?}");
    assert!(slack.sent.load(Ordering::SeqCst) >= 2, "expected creation and decision notifications");
}

#[tokio::test]
async fn requester_cancel_by_unrelated_actor_is_rejected() {
    let slack = Arc::new(CountingProvider::default());
    let chain = build_chain(Arc::clone(&slack));
    chain.register_chain(two_step_chain());

    let request = chain
        .create_request(ChainDefinitionId::new("two-step").unwrap(), TenantId::new("tenant-1").unwrap(), ActorId::new("requester-1").unwrap(), "title".to_string(), "description".to_string(), Priority::Low, BTreeMap::new())
        .await
        .unwrap();

    let err = chain.cancel(&request.id, CancelledBy::Requester, ActorId::new("someone-else").unwrap()).await.unwrap_err();
    assert!(matches!(err, cgr_hitl::chain::HitlError::Transition(_)));

    let cancelled = chain.cancel(&request.id, CancelledBy::Requester, ActorId::new("requester-1").unwrap()).await.unwrap();
    assert_eq!(cancelled.status, ApprovalStatus::Cancelled);
}

#[tokio::test]
async fn admin_cancel_always_succeeds() {
    let slack = Arc::new(CountingProvider::default());
    let chain = build_chain(Arc::clone(&slack));
    chain.register_chain(two_step_chain());

    let request = chain
        .create_request(ChainDefinitionId::new("two-step").unwrap(), TenantId::new("tenant-1").unwrap(), ActorId::new("requester-1").unwrap(), "title".to_string(), "description".to_string(), Priority::High, BTreeMap::new())
        .await
        .unwrap();

    let cancelled = chain.cancel(&request.id, CancelledBy::Admin, ActorId::new("admin-1").unwrap()).await.unwrap();
    assert_eq!(cancelled.status, ApprovalStatus::Cancelled);
    assert!(chain.get(&request.id).unwrap().status.is_terminal());
}
