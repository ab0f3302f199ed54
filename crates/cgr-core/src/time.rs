// crates/cgr-core/src/time.rs
// ============================================================================
// Module: Constitutional Governance Runtime Time Model
// Description: Canonical timestamp representation shared by every component.
// Purpose: Keep causal ordering and SLA math deterministic and testable.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! A single `Timestamp` newtype over Unix milliseconds is used everywhere a
//! point in time is recorded: envelope creation, event ordering, escalation
//! timer expiry, SLA breach math. Components never read wall-clock time
//! directly; they receive it from a caller-supplied clock (see
//! `cgr_providers::Clock`) so tests can drive deterministic scenarios and the
//! HITL escalation engine can honor "server time, not local wall clock"
//! (spec §4.E.2).

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Timestamp
// ============================================================================

/// Canonical timestamp: milliseconds since the Unix epoch.
///
/// # Invariants
/// - No validation is performed; negative values are permitted for
///   pre-epoch test fixtures but never produced by a production clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp from Unix milliseconds.
    #[must_use]
    pub const fn from_unix_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as Unix milliseconds.
    #[must_use]
    pub const fn as_unix_millis(self) -> i64 {
        self.0
    }

    /// Returns the timestamp as whole Unix seconds, truncating toward zero.
    #[must_use]
    pub const fn as_unix_seconds(self) -> i64 {
        self.0 / 1000
    }

    /// Returns a timestamp offset by the given number of minutes.
    ///
    /// Saturates at `i64::MAX`/`i64::MIN` rather than overflowing, since this
    /// is used for escalation-timer math fed by configuration, not untrusted
    /// input.
    #[must_use]
    pub fn plus_minutes(self, minutes: i64) -> Self {
        Self(self.0.saturating_add(minutes.saturating_mul(60_000)))
    }

    /// Returns whole elapsed minutes between `self` and a later timestamp.
    #[must_use]
    pub fn minutes_until(self, later: Self) -> f64 {
        (later.0 - self.0) as f64 / 60_000.0
    }

    /// Returns `true` if `self` strictly precedes `other`.
    #[must_use]
    pub const fn strictly_before(self, other: Self) -> bool {
        self.0 < other.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
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
    use super::Timestamp;

    #[test]
    fn plus_minutes_offsets_correctly() {
        let t = Timestamp::from_unix_millis(0);
        assert_eq!(t.plus_minutes(15).as_unix_millis(), 15 * 60_000);
    }

    #[test]
    fn strictly_before_is_exclusive() {
        let a = Timestamp::from_unix_millis(10);
        let b = Timestamp::from_unix_millis(10);
        assert!(!a.strictly_before(b));
        assert!(a.strictly_before(Timestamp::from_unix_millis(11)));
    }

    #[test]
    fn minutes_until_computes_fractional_minutes() {
        let a = Timestamp::from_unix_millis(0);
        let b = Timestamp::from_unix_millis(90_000);
        assert!((a.minutes_until(b) - 1.5).abs() < f64::EPSILON);
    }
}
