// crates/cgr-guardrail/src/rate_limit.rs
// ============================================================================
// Module: Rate Limiter (Cross-cutting)
// Description: Per-actor sliding-window request counters.
// Purpose: Implement spec.md §4.C "Rate limiting (cross-cutting)": "per-actor
//          sliding-window counters; over-limit -> action = rate_limit,
//          allowed = false... Window and max are configurable per actor
//          class."
// Dependencies: cgr-core
// ============================================================================

//! ## Overview
//! This is the one piece of state the pipeline shares across requests
//! (spec.md §5: "no shared mutable state across requests besides rate-limit
//! counters, which are guarded"). Counters are stored per actor id as a
//! timestamp deque; entries older than the applicable window are evicted
//! before counting.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;

use cgr_core::identifiers::ActorId;
use cgr_core::time::Timestamp;

/// A sliding-window rule: at most `max_requests` within `window_millis`.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitRule {
    /// Window width in milliseconds.
    pub window_millis: i64,
    /// Maximum requests allowed within the window.
    pub max_requests: usize,
}

impl Default for RateLimitRule {
    fn default() -> Self {
        Self {
            window_millis: 60_000,
            max_requests: 120,
        }
    }
}

/// Per-actor-class rate limit configuration.
#[derive(Debug, Clone, Default)]
pub struct RateLimitConfig {
    /// Rule applied when no class-specific override matches.
    pub default_rule: RateLimitRule,
    /// Rules keyed by actor class (this runtime uses the tenant id as the
    /// class key, since the spec does not name a separate class concept).
    pub overrides: BTreeMap<String, RateLimitRule>,
}

/// Sliding-window, per-actor rate limiter.
///
/// # Invariants
/// - Access is guarded by an internal mutex (spec.md §5: "rate-limit
///   counters, which are guarded").
#[derive(Debug)]
pub struct RateLimiter {
    /// Configuration, keyed by actor class.
    config: RateLimitConfig,
    /// Recent request timestamps per actor, in arrival order.
    windows: Mutex<HashMap<ActorId, VecDeque<Timestamp>>>,
}

impl RateLimiter {
    /// Builds a limiter from `config`.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the rule that applies to `class`.
    fn rule_for(&self, class: &str) -> RateLimitRule {
        self.config.overrides.get(class).copied().unwrap_or(self.config.default_rule)
    }

    /// Records one request for `actor` under `class` at `now`, returning
    /// `true` if it is allowed under the applicable sliding window.
    pub fn check_and_record(&self, actor: &ActorId, class: &str, now: Timestamp) -> bool {
        let rule = self.rule_for(class);
        let mut windows = self.windows.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let entry = windows.entry(actor.clone()).or_default();
        let cutoff = now.as_unix_millis() - rule.window_millis;
        while let Some(front) = entry.front() {
            if front.as_unix_millis() <= cutoff {
                entry.pop_front();
            } else {
                break;
            }
        }
        if entry.len() >= rule.max_requests {
            return false;
        }
        entry.push_back(now);
        true
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, reason = "Test-only assertions are permitted.")]
mod tests {
    use super::RateLimitConfig;
    use super::RateLimitRule;
    use super::RateLimiter;
    use cgr_core::identifiers::ActorId;
    use cgr_core::time::Timestamp;

    #[test]
    fn allows_requests_under_the_limit_then_blocks() {
        let limiter = RateLimiter::new(RateLimitConfig {
            default_rule: RateLimitRule {
                window_millis: 1_000,
                max_requests: 2,
            },
            overrides: Default::default(),
        });
        let actor = ActorId::new("agent-1").unwrap();
        assert!(limiter.check_and_record(&actor, "tenant-a", Timestamp::from_unix_millis(0)));
        assert!(limiter.check_and_record(&actor, "tenant-a", Timestamp::from_unix_millis(10)));
        assert!(!limiter.check_and_record(&actor, "tenant-a", Timestamp::from_unix_millis(20)));
    }

    #[test]
    fn window_slides_and_admits_new_requests() {
        let limiter = RateLimiter::new(RateLimitConfig {
            default_rule: RateLimitRule {
                window_millis: 1_000,
                max_requests: 1,
            },
            overrides: Default::default(),
        });
        let actor = ActorId::new("agent-1").unwrap();
        assert!(limiter.check_and_record(&actor, "tenant-a", Timestamp::from_unix_millis(0)));
        assert!(!limiter.check_and_record(&actor, "tenant-a", Timestamp::from_unix_millis(500)));
        assert!(limiter.check_and_record(&actor, "tenant-a", Timestamp::from_unix_millis(1_100)));
    }
}
