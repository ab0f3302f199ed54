// crates/cgr-providers/src/impact.rs
// ============================================================================
// Module: Impact Scorer
// Description: Pluggable interface to the external impact-scoring model.
// Purpose: Keep the LLM/impact-scoring model out of the core (spec.md §1
//          Non-goals) while giving the deliberation router a deterministic
//          contract to call against.
// Dependencies: async-trait, cgr-core
// ============================================================================

//! ## Overview
//! The impact scorer is a pure function over a message payload: given the
//! same payload it must return the same score, which is required for
//! testability (spec.md §4.D "Algorithm"). This crate does not implement a
//! scoring model; it defines the contract and ships a deterministic
//! reference implementation for tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Errors raised while scoring an envelope's impact.
#[derive(Debug, Error)]
pub enum ImpactScoringError {
    /// The scorer backend failed (e.g. model call errored).
    #[error("impact scoring failed: {0}")]
    Backend(String),
}

/// Default score substituted when scoring fails (spec.md §4.D "Failure
/// semantics").
pub const DEFAULT_FALLBACK_SCORE: f64 = 0.3;

/// Scores the impact of an envelope's payload in `[0, 1]`.
///
/// Implementations must be deterministic for a given payload so tests can
/// assert on routing decisions.
#[async_trait]
pub trait ImpactScorer: Send + Sync {
    /// Computes an impact score in `[0, 1]` for `payload`.
    ///
    /// # Errors
    ///
    /// Returns [`ImpactScoringError`] when the backend cannot produce a
    /// score; callers should substitute [`DEFAULT_FALLBACK_SCORE`].
    async fn score(&self, payload: &BTreeMap<String, Value>) -> Result<f64, ImpactScoringError>;
}

/// A deterministic reference scorer keyed by the `action` payload field.
///
/// Unknown actions score [`DEFAULT_FALLBACK_SCORE`]. Intended for tests and
/// local development, not production use.
#[derive(Debug, Default, Clone)]
pub struct StaticImpactScorer {
    /// Scores keyed by the payload's `action` field value.
    pub scores_by_action: BTreeMap<String, f64>,
}

impl StaticImpactScorer {
    /// Builds a scorer from an explicit `(action, score)` table.
    #[must_use]
    pub fn new(scores_by_action: BTreeMap<String, f64>) -> Self {
        Self {
            scores_by_action,
        }
    }
}

#[async_trait]
impl ImpactScorer for StaticImpactScorer {
    async fn score(&self, payload: &BTreeMap<String, Value>) -> Result<f64, ImpactScoringError> {
        let action = payload.get("action").and_then(Value::as_str);
        let score = action.and_then(|a| self.scores_by_action.get(a)).copied().unwrap_or(DEFAULT_FALLBACK_SCORE);
        Ok(score.clamp(0.0, 1.0))
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    reason = "Test-only assertions are permitted."
)]
mod tests {
    use super::ImpactScorer;
    use super::StaticImpactScorer;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn scores_known_action() {
        let mut table = BTreeMap::new();
        table.insert("delete".to_string(), 0.95);
        let scorer = StaticImpactScorer::new(table);
        let mut payload = BTreeMap::new();
        payload.insert("action".to_string(), serde_json::json!("delete"));
        let score = scorer.score(&payload).await.unwrap();
        assert!((score - 0.95).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn falls_back_for_unknown_action() {
        let scorer = StaticImpactScorer::default();
        let payload = BTreeMap::new();
        let score = scorer.score(&payload).await.unwrap();
        assert!((score - super::DEFAULT_FALLBACK_SCORE).abs() < f64::EPSILON);
    }
}
