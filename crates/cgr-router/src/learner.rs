// crates/cgr-router/src/learner.rs
// ============================================================================
// Module: Feedback Learner
// Description: Optional hook observing routed-then-resolved envelopes.
// Purpose: Implement spec.md §4.D "Learning": "feedback updates an external
//          learner hook (optional); in absence of a learner the stats still
//          update but threshold is not automatically moved."
// Dependencies: cgr-core
// ============================================================================

//! ## Overview
//! A learner never influences `route` directly; it only observes completed
//! [`LearningRecord`]s. Threshold adjustment, if any, happens out of band
//! through [`crate::router::DeliberationRouter::set_impact_threshold`].

use cgr_core::identifiers::EnvelopeId;

use crate::router::FeedbackOutcome;
use crate::router::Lane;

/// One routed-then-resolved envelope, retained in the router's bounded
/// rolling history and handed to the learner hook.
#[derive(Debug, Clone)]
pub struct LearningRecord {
    /// Envelope this record describes.
    pub envelope_id: EnvelopeId,
    /// Impact score the envelope was routed on.
    pub impact_score: f64,
    /// Lane the envelope was routed to.
    pub lane: Lane,
    /// Outcome, once feedback arrives.
    pub outcome: Option<FeedbackOutcome>,
    /// Processing time in milliseconds, once feedback arrives.
    pub processing_time_ms: Option<u64>,
    /// Optional human feedback score in `[0, 1]`.
    pub feedback_score: Option<f64>,
}

/// Observes completed routing records.
pub trait FeedbackLearner: Send + Sync {
    /// Called once per `update_feedback` call, after the router's own
    /// bookkeeping has been updated.
    fn observe(&self, record: &LearningRecord);
}

/// A learner that logs every observation via `tracing` and otherwise does
/// nothing.
///
/// Intended for tests and local development, not production use.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingFeedbackLearner;

impl FeedbackLearner for LoggingFeedbackLearner {
    fn observe(&self, record: &LearningRecord) {
        tracing::info!(envelope_id = %record.envelope_id, impact = record.impact_score, "feedback observed");
    }
}
