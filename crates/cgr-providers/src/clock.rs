// crates/cgr-providers/src/clock.rs
// ============================================================================
// Module: Clock
// Description: Wall-clock time source, pluggable for deterministic tests.
// Purpose: Give the HITL escalation engine "server time" per spec.md §4.E.2
//          ("all timestamps are read via the external store's server time,
//          not local wall clock, to prevent drift in multi-instance
//          deployments") without hard-coding `SystemTime::now()` everywhere.
// Dependencies: cgr-core
// ============================================================================

//! ## Overview
//! Production code should prefer a clock backed by the external KV store's
//! own server-time command (see [`crate::kv_store::KvStore::server_time`])
//! over [`SystemClock`], which reads the local host clock. [`SystemClock`] is
//! provided as a reasonable default when no external store is configured and
//! is also what [`crate::kv_store::InMemoryKvStore`] uses internally.

use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use cgr_core::time::Timestamp;

/// A source of the current time.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> Timestamp;
}

/// A clock backed by the local host's wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let millis = SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_millis() as i64);
        Timestamp::from_unix_millis(millis)
    }
}

/// A clock that returns a fixed, externally advanced value.
///
/// Intended for deterministic tests of escalation timers and SLA math.
#[derive(Debug)]
pub struct FixedClock {
    millis: AtomicI64,
}

impl FixedClock {
    /// Creates a fixed clock starting at `initial`.
    #[must_use]
    pub fn new(initial: Timestamp) -> Self {
        Self {
            millis: AtomicI64::new(initial.as_unix_millis()),
        }
    }

    /// Advances the clock by `delta_ms` milliseconds.
    pub fn advance_millis(&self, delta_ms: i64) {
        self.millis.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_unix_millis(self.millis.load(Ordering::SeqCst))
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
    use super::Clock;
    use super::FixedClock;
    use cgr_core::time::Timestamp;

    #[test]
    fn fixed_clock_advances_on_demand() {
        let clock = FixedClock::new(Timestamp::from_unix_millis(1_000));
        assert_eq!(clock.now().as_unix_millis(), 1_000);
        clock.advance_millis(500);
        assert_eq!(clock.now().as_unix_millis(), 1_500);
    }
}
