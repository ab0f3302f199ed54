// crates/cgr-guardrail/src/stage.rs
// ============================================================================
// Module: Stage Contract
// Description: The `process(data, context) -> result` contract every fixed
//              pipeline stage implements.
// Purpose: Give the composition algorithm in spec.md §4.C a single shape to
//          drive regardless of what an individual stage does internally.
// Dependencies: async-trait, cgr-core
// ============================================================================

//! ## Overview
//! Every stage receives the current payload and a read-only
//! [`PipelineContext`], and returns a [`GuardrailResult`]. Stages never
//! mutate the context directly; the pipeline driver folds each result's
//! violations into the context between stages.

use std::collections::BTreeMap;

use async_trait::async_trait;
use cgr_core::guardrail::GuardrailResult;
use cgr_core::time::Timestamp;
use serde_json::Value;

use crate::context::PipelineContext;

/// One stage of the fixed five-stage pipeline.
#[async_trait]
pub trait GuardrailStage: Send + Sync {
    /// Stable identifier for this stage, used as `layer_id` on violations it
    /// raises and in the pipeline's per-stage trace.
    fn id(&self) -> &str;

    /// Processes `payload` under `context` at time `now`, returning this
    /// stage's verdict. `now` is supplied by the pipeline driver's injected
    /// clock rather than read from the wall clock directly, so stages stay
    /// deterministic under test.
    ///
    /// Implementations should not panic; an uncaught panic is indistinguishable
    /// from a hang to the pipeline driver and will be treated as a timeout.
    async fn process(&self, payload: BTreeMap<String, Value>, context: &PipelineContext, now: Timestamp) -> GuardrailResult;
}
