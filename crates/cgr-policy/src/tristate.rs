// crates/cgr-policy/src/tristate.rs
// ============================================================================
// Module: Three-Valued Condition Logic
// Description: Kleene-style true/false/unknown outcome for rule conditions.
// Purpose: Let a condition evaluator report "cannot determine" distinctly
//          from "determined false" when a referenced field is absent.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Mirrors the three-valued outcome vocabulary used throughout the corpus
//! for condition evaluation: a condition is either definitely satisfied,
//! definitely unsatisfied, or unknown (for example, the envelope field the
//! condition references is absent from the payload).

use serde::Deserialize;
use serde::Serialize;

/// Three-valued outcome of evaluating a single policy condition.
///
/// # Invariants
/// - `Unknown` is only produced when the referenced field is absent; a
///   present field always resolves to `True` or `False`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriState {
    /// Condition is satisfied.
    True,
    /// Condition is not satisfied.
    False,
    /// Condition could not be determined.
    Unknown,
}

impl TriState {
    /// Returns `true` only for [`TriState::True`].
    #[must_use]
    pub const fn is_true(self) -> bool {
        matches!(self, Self::True)
    }
}

impl From<bool> for TriState {
    fn from(value: bool) -> Self {
        if value { Self::True } else { Self::False }
    }
}
