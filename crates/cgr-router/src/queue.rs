// crates/cgr-router/src/queue.rs
// ============================================================================
// Module: Deliberation Queue
// Description: Pluggable sink for envelopes the router decides to defer.
// Purpose: Keep the HITL approval chain (spec.md §4.E, "component E's
//          input") out of this crate's dependency graph while giving
//          `route` something concrete to enqueue into.
// Dependencies: async-trait, cgr-core
// ============================================================================

//! ## Overview
//! The router does not know what happens to a deferred envelope once
//! enqueued; it only needs an opaque item id back to report in
//! [`crate::router::RouteDecision::item_id`]. A real deployment wires this to
//! the HITL approval chain's request-creation entry point.

use async_trait::async_trait;
use cgr_core::envelope::Envelope;
use thiserror::Error;

/// Errors raised enqueuing an envelope for deliberation.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The queue backend failed to accept the envelope.
    #[error("deliberation queue enqueue failed: {0}")]
    Backend(String),
}

/// Accepts envelopes the router has decided require deliberation.
#[async_trait]
pub trait DeliberationQueue: Send + Sync {
    /// Enqueues `envelope`, returning an opaque item id.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] when the backend cannot accept the envelope.
    async fn enqueue(&self, envelope: &Envelope) -> Result<String, QueueError>;
}

/// An in-memory queue that always succeeds, returning the envelope id as the
/// item id.
///
/// Intended for tests and local development, not production use.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoDeliberationQueue;

#[async_trait]
impl DeliberationQueue for EchoDeliberationQueue {
    async fn enqueue(&self, envelope: &Envelope) -> Result<String, QueueError> {
        Ok(envelope.id.as_str().to_string())
    }
}
