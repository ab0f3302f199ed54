// crates/cgr-router/src/router.rs
// ============================================================================
// Module: Deliberation Router
// Description: Fast-lane vs. deliberation-queue routing with bounded
//              learning history.
// Purpose: Implement spec.md §4.D's full public contract and algorithm.
// Dependencies: cgr-core, cgr-providers, thiserror, tokio
// ============================================================================

//! ## Overview
//! [`DeliberationRouter`] holds the one piece of shared mutable state this
//! component has: the current threshold, cumulative counters, and a bounded
//! rolling history used for the optional learner hook. Everything else is
//! read-only collaborators injected at construction.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use cgr_core::envelope::Envelope;
use cgr_core::envelope::EnvelopeError;
use cgr_core::envelope::EnvelopeStatus;
use cgr_core::identifiers::EnvelopeId;
use cgr_providers::Clock;
use cgr_providers::ImpactScorer;
use cgr_providers::DEFAULT_FALLBACK_SCORE;
use thiserror::Error;

use crate::learner::FeedbackLearner;
use crate::learner::LearningRecord;
use crate::queue::DeliberationQueue;
use crate::queue::QueueError;

/// Default impact threshold (spec.md §4.D "Algorithm").
pub const DEFAULT_THRESHOLD: f64 = 0.8;

/// Maximum number of learning-history entries retained (spec.md §4.D
/// "Learning").
pub const HISTORY_CAP: usize = 1000;

/// Lane a routing decision selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    /// Delivered immediately.
    Fast,
    /// Enqueued for deliberation.
    Deliberation,
}

/// Outcome reported back through [`DeliberationRouter::update_feedback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackOutcome {
    /// The deferred envelope was approved.
    Approved,
    /// The deferred envelope was rejected.
    Rejected,
    /// The deferred envelope's approval window timed out.
    Timeout,
}

/// Errors raised routing or updating feedback for an envelope.
#[derive(Debug, Error)]
pub enum RouterError {
    /// The deliberation queue rejected the envelope.
    #[error("deliberation queue failure: {0}")]
    Queue(#[from] QueueError),
    /// The envelope's status could not transition as the router required.
    #[error("envelope transition failure: {0}")]
    Envelope(#[from] EnvelopeError),
}

/// Decision returned by [`DeliberationRouter::route`].
#[derive(Debug, Clone)]
pub struct RouteDecision {
    /// Lane the envelope was routed to.
    pub lane: Lane,
    /// Impact score used for the decision.
    pub impact_score: f64,
    /// Deliberation queue item id, present only for the deliberation lane.
    pub item_id: Option<String>,
    /// Rough expected wait, derived from recent deliberation-lane history.
    pub estimated_wait: Option<Duration>,
    /// Whether this decision was produced by [`DeliberationRouter::force_deliberation`].
    pub forced: bool,
}

/// Aggregate router statistics.
#[derive(Debug, Clone, Copy)]
pub struct RouterStats {
    /// Total envelopes routed since construction.
    pub total: u64,
    /// Envelopes routed to the fast lane.
    pub fast_count: u64,
    /// Envelopes routed to deliberation.
    pub deliberation_count: u64,
    /// Fraction of resolved deliberation envelopes that were approved.
    pub approval_rate: f64,
    /// Fraction of all routed envelopes that took the fast lane.
    pub fast_lane_pct: f64,
    /// Current impact threshold.
    pub threshold: f64,
    /// Whether the learning history and learner hook are active.
    pub learning_enabled: bool,
}

/// Mutable router state, guarded by a single lock.
struct RouterState {
    /// Current impact threshold, bounded to `[0, 1]`.
    threshold: f64,
    /// Bounded rolling history of routed envelopes, oldest-first.
    history: VecDeque<LearningRecord>,
    /// Total envelopes routed.
    total: u64,
    /// Envelopes routed to the fast lane.
    fast_count: u64,
    /// Envelopes routed to deliberation.
    deliberation_count: u64,
    /// Deliberation envelopes that have received feedback.
    decided_count: u64,
    /// Deliberation envelopes approved.
    approved_count: u64,
}

/// Decides between fast-lane delivery and deliberation-queue enqueue for
/// every envelope, learning from feedback when enabled.
pub struct DeliberationRouter {
    /// External impact-scoring collaborator.
    scorer: Arc<dyn ImpactScorer>,
    /// Sink for envelopes routed to deliberation.
    queue: Arc<dyn DeliberationQueue>,
    /// Optional feedback learner hook.
    learner: Option<Arc<dyn FeedbackLearner>>,
    /// Time source, injected for deterministic tests.
    clock: Arc<dyn Clock>,
    /// Whether the rolling history and learner hook are active.
    learning_enabled: bool,
    /// Shared mutable state.
    state: Mutex<RouterState>,
}

impl DeliberationRouter {
    /// Builds a router with the given collaborators and initial threshold.
    #[must_use]
    pub fn new(scorer: Arc<dyn ImpactScorer>, queue: Arc<dyn DeliberationQueue>, learner: Option<Arc<dyn FeedbackLearner>>, clock: Arc<dyn Clock>, learning_enabled: bool) -> Self {
        Self {
            scorer,
            queue,
            learner,
            clock,
            learning_enabled,
            state: Mutex::new(RouterState {
                threshold: DEFAULT_THRESHOLD,
                history: VecDeque::new(),
                total: 0,
                fast_count: 0,
                deliberation_count: 0,
                decided_count: 0,
                approved_count: 0,
            }),
        }
    }

    /// Sets the impact threshold, clamped to `[0, 1]`. Always takes effect,
    /// regardless of whether learning is enabled.
    pub fn set_impact_threshold(&self, threshold: f64) {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.threshold = threshold.clamp(0.0, 1.0);
    }

    /// Routes `envelope`, scoring its impact if absent, and transitions its
    /// status to `queued` or `delivered` accordingly.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::Queue`] when the deliberation queue rejects the
    /// envelope, or [`RouterError::Envelope`] when the status transition is
    /// illegal (both indicate a programming error, not caller input).
    pub async fn route(&self, envelope: &mut Envelope) -> Result<RouteDecision, RouterError> {
        let impact = self.resolve_impact(envelope).await;
        envelope.impact_score = Some(impact);
        let threshold = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner).threshold;

        if impact >= threshold {
            let item_id = self.queue.enqueue(envelope).await?;
            envelope.transition(EnvelopeStatus::Queued, self.clock.now())?;
            let estimated_wait = self.estimated_wait();
            self.record_routed(envelope.id.clone(), impact, Lane::Deliberation);
            Ok(RouteDecision {
                lane: Lane::Deliberation,
                impact_score: impact,
                item_id: Some(item_id),
                estimated_wait,
                forced: false,
            })
        } else {
            envelope.transition(EnvelopeStatus::Delivered, self.clock.now())?;
            self.record_routed(envelope.id.clone(), impact, Lane::Fast);
            Ok(RouteDecision {
                lane: Lane::Fast,
                impact_score: impact,
                item_id: None,
                estimated_wait: None,
                forced: false,
            })
        }
    }

    /// Forces `envelope` into deliberation regardless of its impact score,
    /// restoring the envelope's original score once dispatched.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::Queue`] or [`RouterError::Envelope`] under the
    /// same conditions as [`DeliberationRouter::route`].
    pub async fn force_deliberation(&self, envelope: &mut Envelope, reason: impl Into<String>) -> Result<RouteDecision, RouterError> {
        let reason = reason.into();
        let original_score = envelope.impact_score;
        envelope.impact_score = Some(1.0);
        tracing::info!(envelope_id = %envelope.id, reason = %reason, "forcing envelope into deliberation");
        let item_id = self.queue.enqueue(envelope).await?;
        envelope.transition(EnvelopeStatus::Queued, self.clock.now())?;
        envelope.impact_score = original_score;
        self.record_routed(envelope.id.clone(), 1.0, Lane::Deliberation);
        Ok(RouteDecision {
            lane: Lane::Deliberation,
            impact_score: 1.0,
            item_id: Some(item_id),
            estimated_wait: self.estimated_wait(),
            forced: true,
        })
    }

    /// Records feedback for a previously routed envelope, updating the
    /// approval-rate counters and, if present, calling the learner hook.
    pub fn update_feedback(&self, envelope_id: &EnvelopeId, outcome: FeedbackOutcome, processing_time: Duration, feedback_score: Option<f64>) {
        let processing_time_ms = u64::try_from(processing_time.as_millis()).unwrap_or(u64::MAX);
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let record = state.history.iter_mut().rev().find(|record| &record.envelope_id == envelope_id && record.outcome.is_none());
        let Some(record) = record else {
            tracing::warn!(envelope_id = %envelope_id, "feedback received for an envelope with no pending routing record");
            return;
        };
        record.outcome = Some(outcome);
        record.processing_time_ms = Some(processing_time_ms);
        record.feedback_score = feedback_score;
        let observed = record.clone();

        state.decided_count += 1;
        if matches!(outcome, FeedbackOutcome::Approved) {
            state.approved_count += 1;
        }
        drop(state);

        if self.learning_enabled {
            if let Some(learner) = &self.learner {
                learner.observe(&observed);
            }
        }
    }

    /// Returns current aggregate statistics.
    #[must_use]
    pub fn stats(&self) -> RouterStats {
        let state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        #[allow(clippy::cast_precision_loss, reason = "counters are far below f64's exact-integer range in practice")]
        let approval_rate = if state.decided_count == 0 { 0.0 } else { state.approved_count as f64 / state.decided_count as f64 };
        #[allow(clippy::cast_precision_loss, reason = "counters are far below f64's exact-integer range in practice")]
        let fast_lane_pct = if state.total == 0 { 0.0 } else { state.fast_count as f64 / state.total as f64 };
        RouterStats {
            total: state.total,
            fast_count: state.fast_count,
            deliberation_count: state.deliberation_count,
            approval_rate,
            fast_lane_pct,
            threshold: state.threshold,
            learning_enabled: self.learning_enabled,
        }
    }

    /// Invokes the impact scorer, substituting the default fallback score
    /// and logging a warning on failure (spec.md §4.D "Failure semantics").
    async fn resolve_impact(&self, envelope: &Envelope) -> f64 {
        if let Some(score) = envelope.impact_score {
            return score;
        }
        self.scorer.score(&envelope.payload).await.unwrap_or_else(|error| {
            tracing::warn!(error = %error, "impact scoring failed, substituting fallback score");
            DEFAULT_FALLBACK_SCORE
        })
    }

    /// Pushes a new history entry (when learning is enabled) and updates
    /// cumulative counters.
    fn record_routed(&self, envelope_id: EnvelopeId, impact_score: f64, lane: Lane) {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        state.total += 1;
        match lane {
            Lane::Fast => state.fast_count += 1,
            Lane::Deliberation => state.deliberation_count += 1,
        }
        if self.learning_enabled {
            if state.history.len() >= HISTORY_CAP {
                state.history.pop_front();
            }
            state.history.push_back(LearningRecord {
                envelope_id,
                impact_score,
                lane,
                outcome: None,
                processing_time_ms: None,
                feedback_score: None,
            });
        }
    }

    /// Derives a rough expected wait from the mean processing time of the
    /// most recent resolved deliberation-lane history entries.
    fn estimated_wait(&self) -> Option<Duration> {
        let state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let samples: Vec<u64> = state
            .history
            .iter()
            .rev()
            .filter(|record| matches!(record.lane, Lane::Deliberation))
            .filter_map(|record| record.processing_time_ms)
            .take(20)
            .collect();
        if samples.is_empty() {
            return None;
        }
        let average = samples.iter().sum::<u64>() / u64::try_from(samples.len()).unwrap_or(1);
        Some(Duration::from_millis(average))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, reason = "Test-only assertions are permitted.")]
mod tests {
    use super::DeliberationRouter;
    use super::FeedbackOutcome;
    use super::Lane;
    use crate::queue::EchoDeliberationQueue;
    use cgr_core::envelope::Envelope;
    use cgr_core::envelope::EnvelopeStatus;
    use cgr_core::envelope::MessageType;
    use cgr_core::envelope::Priority;
    use cgr_core::identifiers::ActorId;
    use cgr_core::identifiers::ConstitutionalHash;
    use cgr_core::identifiers::EnvelopeId;
    use cgr_core::identifiers::TenantId;
    use cgr_core::time::Timestamp;
    use cgr_providers::FixedClock;
    use cgr_providers::StaticImpactScorer;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    fn anchor() -> ConstitutionalHash {
        ConstitutionalHash::new("abcdef0123456789").unwrap()
    }

    fn envelope(id: &str, payload: BTreeMap<String, serde_json::Value>) -> Envelope {
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
    async fn low_impact_envelope_is_delivered_fast() {
        let mut scores = BTreeMap::new();
        scores.insert("read".to_string(), 0.1);
        let router = DeliberationRouter::new(Arc::new(StaticImpactScorer::new(scores)), Arc::new(EchoDeliberationQueue), None, Arc::new(FixedClock::new(Timestamp::from_unix_millis(0))), true);
        let mut payload = BTreeMap::new();
        payload.insert("action".to_string(), serde_json::json!("read"));
        let mut env = envelope("e1", payload);
        let decision = router.route(&mut env).await.unwrap();
        assert_eq!(decision.lane, Lane::Fast);
        assert_eq!(env.status, EnvelopeStatus::Delivered);
    }

    #[tokio::test]
    async fn high_impact_envelope_is_queued_for_deliberation() {
        let mut scores = BTreeMap::new();
        scores.insert("purge".to_string(), 0.95);
        let router = DeliberationRouter::new(Arc::new(StaticImpactScorer::new(scores)), Arc::new(EchoDeliberationQueue), None, Arc::new(FixedClock::new(Timestamp::from_unix_millis(0))), true);
        let mut payload = BTreeMap::new();
        payload.insert("action".to_string(), serde_json::json!("purge"));
        let mut env = envelope("e2", payload);
        let decision = router.route(&mut env).await.unwrap();
        assert_eq!(decision.lane, Lane::Deliberation);
        assert_eq!(env.status, EnvelopeStatus::Queued);
        assert!(decision.item_id.is_some());
    }

    #[tokio::test]
    async fn feedback_updates_approval_rate() {
        let mut scores = BTreeMap::new();
        scores.insert("purge".to_string(), 0.95);
        let router = DeliberationRouter::new(Arc::new(StaticImpactScorer::new(scores)), Arc::new(EchoDeliberationQueue), None, Arc::new(FixedClock::new(Timestamp::from_unix_millis(0))), true);
        let mut payload = BTreeMap::new();
        payload.insert("action".to_string(), serde_json::json!("purge"));
        let mut env = envelope("e3", payload);
        router.route(&mut env).await.unwrap();
        router.update_feedback(&env.id, FeedbackOutcome::Approved, Duration::from_secs(30), Some(1.0));
        let stats = router.stats();
        assert!((stats.approval_rate - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn force_deliberation_restores_original_score_and_tags_forced() {
        let router = DeliberationRouter::new(Arc::new(StaticImpactScorer::default()), Arc::new(EchoDeliberationQueue), None, Arc::new(FixedClock::new(Timestamp::from_unix_millis(0))), true);
        let mut payload = BTreeMap::new();
        payload.insert("action".to_string(), serde_json::json!("read"));
        let mut env = envelope("e4", payload);
        env.impact_score = Some(0.1);
        let decision = router.force_deliberation(&mut env, "manual override").await.unwrap();
        assert!(decision.forced);
        assert_eq!(env.impact_score, Some(0.1));
        assert_eq!(env.status, EnvelopeStatus::Queued);
    }

    #[test]
    fn threshold_is_clamped_to_unit_interval() {
        let router = DeliberationRouter::new(Arc::new(StaticImpactScorer::default()), Arc::new(EchoDeliberationQueue), None, Arc::new(FixedClock::new(Timestamp::from_unix_millis(0))), true);
        router.set_impact_threshold(1.5);
        assert!((router.stats().threshold - 1.0).abs() < f64::EPSILON);
        router.set_impact_threshold(-0.5);
        assert!((router.stats().threshold - 0.0).abs() < f64::EPSILON);
    }
}
