// crates/cgr-router/src/lib.rs
// ============================================================================
// Crate: cgr-router
// Description: Fast-lane vs. deliberation-queue routing (component D).
// ============================================================================

//! # `cgr-router`
//!
//! Decides, per envelope, between fast-lane delivery and deliberation-queue
//! enqueue, learning from feedback when enabled. See
//! [`DeliberationRouter`] for the public contract.

#![deny(missing_docs)]
#![deny(missing_docs_in_private_items)]
#![deny(unsafe_code)]

/// Optional hook observing routed-then-resolved envelopes.
pub mod learner;
/// Pluggable sink for envelopes routed to deliberation.
pub mod queue;
/// The router itself.
pub mod router;

pub use learner::FeedbackLearner;
pub use learner::LearningRecord;
pub use learner::LoggingFeedbackLearner;
pub use queue::DeliberationQueue;
pub use queue::EchoDeliberationQueue;
pub use queue::QueueError;
pub use router::DeliberationRouter;
pub use router::FeedbackOutcome;
pub use router::Lane;
pub use router::RouteDecision;
pub use router::RouterError;
pub use router::RouterStats;
pub use router::DEFAULT_THRESHOLD;
pub use router::HISTORY_CAP;
