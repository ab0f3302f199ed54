// crates/cgr-guardrail/src/context.rs
// ============================================================================
// Module: Pipeline Context
// Description: Per-request context threaded through every guardrail stage.
// Purpose: Carry the trace id, current layer, and accumulated decisions that
//          spec.md §4.C's stage contract requires ("context carries a trace
//          id... the current layer, and accumulated prior decisions").
// Dependencies: cgr-core
// ============================================================================

//! ## Overview
//! A [`PipelineContext`] is constructed once per request at pipeline entry
//! and threaded by reference through each stage. It is never shared across
//! requests (spec.md §5: "guardrail pipeline is per-request; no shared
//! mutable state across requests besides rate-limit counters").

use cgr_core::guardrail::GuardrailViolation;
use cgr_core::identifiers::ActorId;
use cgr_core::identifiers::EnvelopeId;
use cgr_core::identifiers::TenantId;
use cgr_core::identifiers::TraceId;

/// Context threaded through every stage of one pipeline traversal.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    /// Trace id for this traversal, generated at entry if the caller did not
    /// supply one.
    pub trace_id: TraceId,
    /// Envelope this traversal is processing.
    pub envelope_id: EnvelopeId,
    /// Actor that originated the envelope.
    pub actor_id: ActorId,
    /// Tenant scoping the envelope.
    pub tenant_id: TenantId,
    /// Identifier of the stage currently executing.
    pub current_layer: String,
    /// Violations accumulated by stages that have already run.
    pub accumulated_violations: Vec<GuardrailViolation>,
}

impl PipelineContext {
    /// Constructs a context at pipeline entry with no accumulated violations.
    #[must_use]
    pub fn new(trace_id: TraceId, envelope_id: EnvelopeId, actor_id: ActorId, tenant_id: TenantId) -> Self {
        Self {
            trace_id,
            envelope_id,
            actor_id,
            tenant_id,
            current_layer: String::new(),
            accumulated_violations: Vec::new(),
        }
    }
}
