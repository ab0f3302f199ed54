// crates/cgr-hitl/src/chain.rs
// ============================================================================
// Module: Approval Chain Orchestrator
// Description: Composes the state machine, escalation timer engine,
//              chain-local audit ledger, and notification fan-out into the
//              public HITL contract.
// Purpose: Implement spec.md §4.E's "Responsibility" paragraph: drive a
//          multi-step, timed, escalating approval workflow; fan notifications
//          out; retain an immutable, checksum-chained audit trail; and write
//          every transition to component B and component A as well.
// Dependencies: cgr-core, cgr-ledger, cgr-providers, cgr-temporal, tokio
// ============================================================================

//! ## Overview
//! [`ApprovalChain`] is the crate's single entry point. Internally it keeps
//! request and chain-definition state in process memory (the external store
//! backs only the escalation timers and the chain-local audit trail, per the
//! key layout spec.md §6 names), while [`EscalationTimerEngine`] and
//! [`HitlAuditLedger`] own the parts of the contract that spec.md pins to a
//! specific external shape. [`ApprovalChain::run_expiration_sweep`] is the
//! background task a deployment spawns once per process.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use cgr_core::envelope::Priority;
use cgr_core::hitl::ApprovalChainDefinition;
use cgr_core::hitl::ApprovalRequest;
use cgr_core::hitl::ApprovalStatus;
use cgr_core::hitl::HitlActorType;
use cgr_core::hitl::HitlEntryType;
use cgr_core::hitl::HitlTargetKind;
use cgr_core::identifiers::ActorId;
use cgr_core::identifiers::ApprovalRequestId;
use cgr_core::identifiers::ChainDefinitionId;
use cgr_core::identifiers::ConstitutionalHash;
use cgr_core::identifiers::EventId;
use cgr_core::identifiers::TenantId;
use cgr_core::time::Timestamp;
use cgr_core::EventType;
use cgr_ledger::AuditLedger;
use cgr_providers::Clock;
use cgr_providers::NotificationMessage;
use cgr_providers::NotificationReason;
use cgr_temporal::TemporalEngine;
use serde_json::Value;
use thiserror::Error;

use crate::audit::HitlAuditLedger;
use crate::audit::IntegrityError;
use crate::escalation::priority_timeout_minutes;
use crate::escalation::EscalationTimerEngine;
use crate::fanout::NotificationFanout;
use crate::state_machine::ApprovalStateMachine;
use crate::state_machine::CancelledBy;
use crate::state_machine::StateMachineError;

/// Errors raised driving the approval chain.
#[derive(Debug, Error)]
pub enum HitlError {
    /// No chain definition is registered under the given id.
    #[error("no approval chain definition registered for {0}")]
    UnknownChain(String),
    /// No approval request exists with the given id.
    #[error("no approval request {0}")]
    UnknownRequest(String),
    /// A state transition was rejected by the state machine.
    #[error("state machine rejected transition: {0}")]
    Transition(#[from] StateMachineError),
    /// The escalation timer engine failed.
    #[error("escalation timer engine error: {0}")]
    Escalation(#[from] crate::escalation::EscalationError),
    /// The chain-local audit ledger failed.
    #[error("chain-local audit ledger error: {0}")]
    Audit(#[from] crate::audit::AuditError),
}

/// Configuration for one [`ApprovalChain`] instance.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    /// Maximum escalation levels before a request expires.
    pub max_escalations: u32,
    /// Constitutional anchor every request and audit entry must carry.
    pub constitutional_hash: ConstitutionalHash,
}

/// Composes the approval state machine, escalation timer engine,
/// chain-local audit ledger, and notification fan-out (spec.md §4.E).
pub struct ApprovalChain {
    definitions: Mutex<HashMap<ChainDefinitionId, ApprovalChainDefinition>>,
    requests: Mutex<HashMap<ApprovalRequestId, ApprovalRequest>>,
    escalation: EscalationTimerEngine,
    audit: HitlAuditLedger,
    fanout: NotificationFanout,
    temporal: Option<Arc<TemporalEngine>>,
    ledger: Option<Arc<AuditLedger>>,
    clock: Arc<dyn Clock>,
    config: ChainConfig,
}

impl ApprovalChain {
    /// Builds an approval chain. `temporal` and `ledger` are optional: when
    /// present, every transition is also written to component B and
    /// component A (spec.md §4.E.1 "Each state transition is written both to
    /// component B ... and to component A ... and to the chain's own
    /// immutable audit trail").
    #[must_use]
    pub fn new(escalation: EscalationTimerEngine, audit: HitlAuditLedger, fanout: NotificationFanout, temporal: Option<Arc<TemporalEngine>>, ledger: Option<Arc<AuditLedger>>, clock: Arc<dyn Clock>, config: ChainConfig) -> Self {
        Self {
            definitions: Mutex::new(HashMap::new()),
            requests: Mutex::new(HashMap::new()),
            escalation,
            audit,
            fanout,
            temporal,
            ledger,
            clock,
            config,
        }
    }

    /// Registers (or replaces) a chain definition.
    pub fn register_chain(&self, definition: ApprovalChainDefinition) {
        self.definitions.lock().unwrap_or_else(std::sync::PoisonError::into_inner).insert(definition.id.clone(), definition);
    }

    /// Creates a new pending approval request, arming its first-step timer
    /// and fanning out a creation notification.
    ///
    /// # Errors
    ///
    /// Returns [`HitlError::UnknownChain`] if `chain_id` has no registered
    /// definition.
    #[allow(clippy::too_many_arguments, reason = "mirrors the approval request's full field set")]
    pub async fn create_request(&self, chain_id: ChainDefinitionId, tenant_id: TenantId, requester: ActorId, title: String, description: String, priority: Priority, context: BTreeMap<String, Value>) -> Result<ApprovalRequest, HitlError> {
        let chain = self
            .definitions
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&chain_id)
            .cloned()
            .ok_or_else(|| HitlError::UnknownChain(chain_id.to_string()))?;

        let now = self.clock.now();
        let first_step_timeout = chain.steps.first().and_then(|step| step.timeout_minutes);
        let timer = self.escalation.set_timer(ApprovalRequestId::new(uuid::Uuid::new_v4().to_string()).unwrap_or_else(|_| unreachable!("uuid strings are never empty")), priority, first_step_timeout, 0).await?;

        let request = ApprovalRequest {
            id: timer.request_id.clone(),
            chain_id: chain.id.clone(),
            tenant_id,
            requester: requester.clone(),
            title,
            description,
            priority,
            context,
            status: ApprovalStatus::Pending,
            current_step_index: 0,
            step_started_at: now,
            decisions: Vec::new(),
            created_at: now,
            updated_at: now,
            expires_at: timer.expires_at,
            escalation_history: Vec::new(),
        };

        self.requests.lock().unwrap_or_else(std::sync::PoisonError::into_inner).insert(request.id.clone(), request.clone());

        self.record_transition(HitlEntryType::ApprovalCreated, requester, HitlActorType::Human, None, "pending", &request, now).await?;
        self.notify(priority, &request.id, NotificationReason::RequestCreated, format!("approval request {} created", request.id)).await;

        Ok(request)
    }

    /// Records an approval from `approver` at the request's current step.
    ///
    /// # Errors
    ///
    /// Returns [`HitlError::UnknownRequest`], [`HitlError::UnknownChain`], or
    /// a wrapped [`StateMachineError`].
    pub async fn approve(&self, request_id: &ApprovalRequestId, approver: ActorId, rationale: String) -> Result<ApprovalRequest, HitlError> {
        let actor_for_audit = approver.clone();
        self.apply(request_id, move |request, chain, now| ApprovalStateMachine::approve(request, chain, approver, rationale, now), actor_for_audit).await
    }

    /// Records a rejection from `approver`, ending the request.
    ///
    /// # Errors
    ///
    /// Mirrors [`Self::approve`].
    pub async fn reject(&self, request_id: &ApprovalRequestId, approver: ActorId, rationale: String) -> Result<ApprovalRequest, HitlError> {
        let actor_for_audit = approver.clone();
        self.apply(request_id, move |request, _chain, now| ApprovalStateMachine::reject(request, approver, rationale, now), actor_for_audit).await
    }

    /// Cancels the request.
    ///
    /// # Errors
    ///
    /// Mirrors [`Self::approve`].
    pub async fn cancel(&self, request_id: &ApprovalRequestId, by: CancelledBy, actor: ActorId) -> Result<ApprovalRequest, HitlError> {
        let actor_for_audit = actor.clone();
        self.apply(request_id, move |request, _chain, now| ApprovalStateMachine::cancel(request, by, &actor, now), actor_for_audit).await
    }

    /// Polls the escalation engine once and drives every due timer through
    /// [`ApprovalStateMachine::timer_fire`]. Intended to be called on a loop
    /// by [`Self::run_expiration_sweep`], but exposed directly for tests and
    /// callers that drive their own scheduling.
    pub async fn process_expired_timers(&self) {
        for timer in self.escalation.poll_expired().await {
            if let Err(error) = self.handle_expired_timer(&timer).await {
                tracing::warn!(request_id = %timer.request_id, error = %error, "failed to process expired escalation timer, will retry next sweep");
                self.escalation.forget(&timer.request_id);
            }
        }
    }

    /// Runs [`Self::process_expired_timers`] on a loop at the configured
    /// poll interval until `shutdown` resolves. Intended to be spawned once
    /// per process (spec.md §4.E.2 "a background task per instance").
    pub async fn run_expiration_sweep(&self, poll_interval: std::time::Duration, mut shutdown: tokio::sync::oneshot::Receiver<()>) {
        let mut ticker = tokio::time::interval(poll_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.process_expired_timers().await,
                _ = &mut shutdown => break,
            }
        }
    }

    /// Returns a clone of the current state of `request_id`, if it exists.
    #[must_use]
    pub fn get(&self, request_id: &ApprovalRequestId) -> Option<ApprovalRequest> {
        self.requests.lock().unwrap_or_else(std::sync::PoisonError::into_inner).get(request_id).cloned()
    }

    /// Verifies the chain-local audit trail's integrity.
    ///
    /// # Errors
    ///
    /// Returns [`HitlError::Audit`] if the store cannot be read.
    pub async fn verify_audit_integrity(&self, limit: Option<usize>) -> Result<(bool, Vec<IntegrityError>), HitlError> {
        Ok(self.audit.verify_integrity(limit).await?)
    }

    /// Applies one state-machine event to `request_id`, persisting the
    /// result and writing the cross-component transition record.
    async fn apply<F>(&self, request_id: &ApprovalRequestId, transition: F, actor: ActorId) -> Result<ApprovalRequest, HitlError>
    where
        F: FnOnce(&mut ApprovalRequest, &ApprovalChainDefinition, Timestamp) -> Result<crate::state_machine::TransitionOutcome, StateMachineError>,
    {
        let now = self.clock.now();
        let chain = {
            let requests = self.requests.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let request = requests.get(request_id).ok_or_else(|| HitlError::UnknownRequest(request_id.to_string()))?;
            self.definitions
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .get(&request.chain_id)
                .cloned()
                .ok_or_else(|| HitlError::UnknownChain(request.chain_id.to_string()))?
        };

        let (previous_state, outcome, updated) = {
            let mut requests = self.requests.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let request = requests.get_mut(request_id).ok_or_else(|| HitlError::UnknownRequest(request_id.to_string()))?;
            let previous_state = format!("{:?}", request.status);
            let outcome = transition(request, &chain, now)?;
            (previous_state, outcome, request.clone())
        };

        if outcome.is_terminal() {
            self.escalation.cancel(request_id).await;
            if let Some(breach) = self.escalation.record_completion(updated.priority, updated.created_at, now, priority_timeout_minutes(updated.priority)) {
                tracing::warn!(request_id = %request_id, overage_minutes = breach.overage_minutes, "hitl approval breached sla");
            }
        } else if outcome.step_advanced {
            let step = chain.steps.get(updated.current_step_index);
            let timer = self.escalation.reset(request_id.clone(), updated.priority, step.and_then(|step| step.timeout_minutes), 0).await?;
            self.requests.lock().unwrap_or_else(std::sync::PoisonError::into_inner).entry(request_id.clone()).and_modify(|request| request.expires_at = timer.expires_at);
        }

        let entry_type = match updated.status {
            ApprovalStatus::Approved => HitlEntryType::ApprovalApproved,
            ApprovalStatus::Rejected => HitlEntryType::ApprovalRejected,
            ApprovalStatus::Cancelled => HitlEntryType::ApprovalCancelled,
            ApprovalStatus::Expired => HitlEntryType::ApprovalExpired,
            ApprovalStatus::Pending => HitlEntryType::ApprovalApproved,
        };
        self.record_transition(entry_type, actor, HitlActorType::Human, Some(previous_state), &format!("{:?}", updated.status), &updated, now).await?;

        if outcome.is_terminal() {
            self.notify(updated.priority, &updated.id, NotificationReason::Decided, format!("approval request {} {:?}", updated.id, updated.status)).await;
        }

        let final_request = self.requests.lock().unwrap_or_else(std::sync::PoisonError::into_inner).get(request_id).cloned().ok_or_else(|| HitlError::UnknownRequest(request_id.to_string()))?;
        Ok(final_request)
    }

    /// Handles one expired escalation timer, re-notifying and incrementing
    /// the level, or expiring the request outright.
    async fn handle_expired_timer(&self, timer: &cgr_core::hitl::EscalationTimer) -> Result<(), HitlError> {
        let now = self.clock.now();
        let (previous_state, outcome, updated) = {
            let mut requests = self.requests.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let request = requests.get_mut(&timer.request_id).ok_or_else(|| HitlError::UnknownRequest(timer.request_id.to_string()))?;
            let previous_state = format!("{:?}", request.status);
            let outcome = ApprovalStateMachine::timer_fire(request, timer.level, self.config.max_escalations, now)?;
            (previous_state, outcome, request.clone())
        };

        if outcome.escalated {
            let next_level = timer.level + 1;
            let rearmed = self.escalation.set_timer(timer.request_id.clone(), updated.priority, None, next_level).await?;
            self.requests.lock().unwrap_or_else(std::sync::PoisonError::into_inner).entry(timer.request_id.clone()).and_modify(|request| request.expires_at = rearmed.expires_at);
            self.record_transition(HitlEntryType::ApprovalEscalated, updated.requester.clone(), HitlActorType::System, Some(previous_state), &format!("{:?}", updated.status), &updated, now).await?;
            self.notify(updated.priority, &updated.id, NotificationReason::Escalated, format!("approval request {} escalated to level {next_level}", updated.id)).await;
        } else {
            if let Some(breach) = self.escalation.record_completion(updated.priority, updated.created_at, now, priority_timeout_minutes(updated.priority)) {
                tracing::warn!(request_id = %updated.id, overage_minutes = breach.overage_minutes, "hitl approval expired past sla");
            }
            self.record_transition(HitlEntryType::ApprovalExpired, updated.requester.clone(), HitlActorType::System, Some(previous_state), &format!("{:?}", updated.status), &updated, now).await?;
            self.notify(updated.priority, &updated.id, NotificationReason::Decided, format!("approval request {} expired", updated.id)).await;
        }
        Ok(())
    }

    /// Writes one transition to the chain-local audit ledger, and (when
    /// configured) to the temporal event log and the Merkle audit ledger.
    #[allow(clippy::too_many_arguments, reason = "mirrors the chain-local audit append contract plus the actor-type distinction between human and system-driven transitions")]
    async fn record_transition(&self, entry_type: HitlEntryType, actor: ActorId, actor_type: HitlActorType, previous_state: Option<String>, new_state: &str, request: &ApprovalRequest, now: Timestamp) -> Result<(), HitlError> {
        let mut details = BTreeMap::new();
        details.insert("priority".to_string(), serde_json::json!(format!("{:?}", request.priority)));
        details.insert("current_step_index".to_string(), serde_json::json!(request.current_step_index));
        details.insert("constitutional_hash".to_string(), serde_json::json!(self.config.constitutional_hash.to_string()));

        self.audit
            .append(
                entry_type,
                actor.clone(),
                actor_type,
                None,
                HitlTargetKind::Request,
                request.id.as_str().to_string(),
                previous_state,
                new_state.to_string(),
                details.clone(),
                None,
                now,
            )
            .await?;

        if let Some(temporal) = &self.temporal {
            let mut payload = details.clone();
            payload.insert("request_id".to_string(), serde_json::json!(request.id.as_str()));
            payload.insert("entry_type".to_string(), serde_json::json!(format!("{entry_type:?}")));
            if let Err(error) = temporal.record(EventType::DecisionMade, actor, payload, BTreeSet::<EventId>::new()).await {
                tracing::warn!(request_id = %request.id, error = %error, "failed to record hitl transition as a temporal event");
            }
        }

        if let Some(ledger) = &self.ledger {
            let mut payload = details;
            payload.insert("request_id".to_string(), serde_json::json!(request.id.as_str()));
            payload.insert("entry_type".to_string(), serde_json::json!(format!("{entry_type:?}")));
            if let Err(error) = ledger.submit(Value::Object(payload.into_iter().collect())).await {
                tracing::warn!(request_id = %request.id, error = %error, "failed to submit hitl transition to the audit ledger");
            }
        }

        Ok(())
    }

    /// Builds a [`NotificationMessage`] and dispatches it through the
    /// fan-out orchestrator, logging (but never propagating) delivery
    /// failures (spec.md §4.E.4).
    async fn notify(&self, priority: Priority, request_id: &ApprovalRequestId, reason: NotificationReason, summary: String) {
        let message = NotificationMessage {
            request_id: request_id.clone(),
            reason,
            summary,
        };
        let results = self.fanout.dispatch(priority, &message).await;
        tracing::info!(request_id = %request_id, ?results, "hitl notification fan-out complete");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, reason = "Test-only assertions are permitted.")]
mod tests {
    use super::ApprovalChain;
    use super::ChainConfig;
    use crate::audit::HitlAuditLedger;
    use crate::escalation::EscalationConfig;
    use crate::escalation::EscalationTimerEngine;
    use crate::fanout::NotificationFanout;
    use cgr_core::envelope::Priority;
    use cgr_core::hitl::ApprovalChainDefinition;
    use cgr_core::hitl::ApprovalStatus;
    use cgr_core::hitl::ChainStep;
    use cgr_core::identifiers::ActorId;
    use cgr_core::identifiers::ChainDefinitionId;
    use cgr_core::identifiers::ConstitutionalHash;
    use cgr_core::identifiers::TenantId;
    use cgr_core::time::Timestamp;
    use cgr_providers::FixedClock;
    use cgr_providers::InMemoryKvStore;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn build_chain() -> ApprovalChain {
        let store = Arc::new(InMemoryKvStore::new());
        let escalation = EscalationTimerEngine::new(store.clone(), EscalationConfig::default());
        let audit = HitlAuditLedger::new(store);
        let fanout = NotificationFanout::new(1);
        let clock = Arc::new(FixedClock::new(Timestamp::from_unix_millis(0)));
        let config = ChainConfig {
            max_escalations: 2,
            constitutional_hash: ConstitutionalHash::new("abcdef0123456789").unwrap(),
        };
        ApprovalChain::new(escalation, audit, fanout, None, None, clock, config)
    }

    fn single_step_chain() -> ApprovalChainDefinition {
        ApprovalChainDefinition {
            id: ChainDefinitionId::new("chain-1").unwrap(),
            version: 1,
            steps: vec![ChainStep {
                approvers: vec!["any".to_string()],
                quorum: 1,
                timeout_minutes: Some(5),
            }],
        }
    }

    /// A chain whose single step times out immediately, for exercising the
    /// expiration sweep without waiting on real wall-clock time (the
    /// escalation engine reads the store's `server_time`, not the injectable
    /// clock passed to `ApprovalChain`).
    fn immediately_due_chain() -> ApprovalChainDefinition {
        ApprovalChainDefinition {
            id: ChainDefinitionId::new("chain-1").unwrap(),
            version: 1,
            steps: vec![ChainStep {
                approvers: vec!["any".to_string()],
                quorum: 1,
                timeout_minutes: Some(0),
            }],
        }
    }

    #[tokio::test]
    async fn create_then_approve_reaches_approved() {
        let chain = build_chain();
        chain.register_chain(single_step_chain());
        let request = chain
            .create_request(ChainDefinitionId::new("chain-1").unwrap(), TenantId::new("tenant-1").unwrap(), ActorId::new("requester-1").unwrap(), "title".to_string(), "description".to_string(), Priority::High, BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(request.status, ApprovalStatus::Pending);
        let approved = chain.approve(&request.id, ActorId::new("approver-1").unwrap(), "looks fine".to_string()).await.unwrap();
        assert_eq!(approved.status, ApprovalStatus::Approved);
        let (ok, errors) = chain.verify_audit_integrity(None).await.unwrap();
        assert!(ok, "{errors:?}");
    }

    #[tokio::test]
    async fn reject_ends_request_immediately() {
        let chain = build_chain();
        chain.register_chain(single_step_chain());
        let request = chain
            .create_request(ChainDefinitionId::new("chain-1").unwrap(), TenantId::new("tenant-1").unwrap(), ActorId::new("requester-1").unwrap(), "title".to_string(), "description".to_string(), Priority::Standard, BTreeMap::new())
            .await
            .unwrap();
        let rejected = chain.reject(&request.id, ActorId::new("approver-1").unwrap(), "no".to_string()).await.unwrap();
        assert_eq!(rejected.status, ApprovalStatus::Rejected);
    }

    #[tokio::test]
    async fn expired_timer_sweep_expires_request_past_max_escalations() {
        let store = Arc::new(InMemoryKvStore::new());
        let escalation = EscalationTimerEngine::new(store.clone(), EscalationConfig::default());
        let audit = HitlAuditLedger::new(store);
        let fanout = NotificationFanout::new(1);
        let clock = Arc::new(FixedClock::new(Timestamp::from_unix_millis(0)));
        let config = ChainConfig {
            max_escalations: 0,
            constitutional_hash: ConstitutionalHash::new("abcdef0123456789").unwrap(),
        };
        let chain = ApprovalChain::new(escalation, audit, fanout, None, None, clock, config);
        chain.register_chain(immediately_due_chain());

        let request = chain
            .create_request(ChainDefinitionId::new("chain-1").unwrap(), TenantId::new("tenant-1").unwrap(), ActorId::new("requester-1").unwrap(), "title".to_string(), "description".to_string(), Priority::Critical, BTreeMap::new())
            .await
            .unwrap();

        chain.process_expired_timers().await;

        let final_request = chain.get(&request.id).unwrap();
        assert_eq!(final_request.status, ApprovalStatus::Expired);
    }
}
