// crates/cgr-router/tests/learning.rs
// ============================================================================
// Module: Deliberation Router Learning Tests
// Description: Exercises the optional feedback learner hook end to end.
// ============================================================================
//! ## Overview
//! Confirms that feedback is only forwarded to the learner hook when
//! learning is enabled (spec.md §4.D "Learning": "in absence of a learner
//! the stats still update but threshold is not automatically moved").

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, reason = "Test-only assertions are permitted.")]

use std::collections::BTreeMap;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use cgr_core::envelope::Envelope;
use cgr_core::envelope::MessageType;
use cgr_core::envelope::Priority;
use cgr_core::identifiers::ActorId;
use cgr_core::identifiers::ConstitutionalHash;
use cgr_core::identifiers::EnvelopeId;
use cgr_core::identifiers::TenantId;
use cgr_core::time::Timestamp;
use cgr_providers::FixedClock;
use cgr_providers::StaticImpactScorer;
use cgr_router::DeliberationRouter;
use cgr_router::EchoDeliberationQueue;
use cgr_router::FeedbackLearner;
use cgr_router::FeedbackOutcome;
use cgr_router::LearningRecord;

#[derive(Default)]
struct CountingLearner {
    observations: AtomicUsize,
}

impl FeedbackLearner for CountingLearner {
    fn observe(&self, _record: &LearningRecord) {
        self.observations.fetch_add(1, Ordering::SeqCst);
    }
}

fn anchor() -> ConstitutionalHash {
    ConstitutionalHash::new("abcdef0123456789").unwrap()
}

fn envelope(id: &str) -> Envelope {
    let mut payload = BTreeMap::new();
    payload.insert("action".to_string(), serde_json::json!("purge"));
    Envelope::new(
        EnvelopeId::new(id).unwrap(),
        TenantId::new("tenant-1").unwrap(),
        ActorId::new("agent-1").unwrap(),
        "downstream".to_string(),
        MessageType::Command,
        Priority::Standard,
        payload,
        Timestamp::from_unix_millis(0),
        anchor(),
        &anchor(),
    )
    .unwrap()
}

#[tokio::test]
async fn learner_is_invoked_when_learning_is_enabled() {
    let mut scores = BTreeMap::new();
    scores.insert("purge".to_string(), 0.95);
    let learner = Arc::new(CountingLearner::default());
    let router = DeliberationRouter::new(Arc::new(StaticImpactScorer::new(scores)), Arc::new(EchoDeliberationQueue), Some(Arc::clone(&learner) as Arc<dyn FeedbackLearner>), Arc::new(FixedClock::new(Timestamp::from_unix_millis(0))), true);

    let mut env = envelope("e1");
    router.route(&mut env).await.unwrap();
    router.update_feedback(&env.id, FeedbackOutcome::Approved, Duration::from_secs(12), None);

    assert_eq!(learner.observations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn learner_is_not_invoked_when_learning_is_disabled() {
    let mut scores = BTreeMap::new();
    scores.insert("purge".to_string(), 0.95);
    let learner = Arc::new(CountingLearner::default());
    let router = DeliberationRouter::new(Arc::new(StaticImpactScorer::new(scores)), Arc::new(EchoDeliberationQueue), Some(Arc::clone(&learner) as Arc<dyn FeedbackLearner>), Arc::new(FixedClock::new(Timestamp::from_unix_millis(0))), false);

    let mut env = envelope("e1");
    router.route(&mut env).await.unwrap();
    router.update_feedback(&env.id, FeedbackOutcome::Approved, Duration::from_secs(12), None);

    assert_eq!(learner.observations.load(Ordering::SeqCst), 0);
    assert_eq!(router.stats().approval_rate, 0.0);
}
