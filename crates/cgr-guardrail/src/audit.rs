// crates/cgr-guardrail/src/audit.rs
// ============================================================================
// Module: Audit Sink (Stage 5)
// Description: Records a structured summary of a completed traversal.
// Purpose: Implement spec.md §4.C stage 5: "appends a structured record of
//          the prior stages' outcomes plus the final decision, trace id, and
//          constitutional anchor. This stage always runs and always returns
//          allow; it is the observability boundary."
// Dependencies: async-trait, cgr-core, serde_json
// ============================================================================

//! ## Overview
//! The pipeline does not hard-wire an audit backend; [`AuditSink`] is a
//! narrow, pluggable interface so callers can route the record to
//! [`cgr_ledger`](../cgr_ledger/index.html), a log stream, or both without
//! this crate depending on the ledger crate directly.

use async_trait::async_trait;
use serde_json::Value;

/// Receives one structured record per completed pipeline traversal.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Records `record`. Implementations should not fail the pipeline;
    /// record failures are logged internally and do not affect the already
    /// final decision the record describes.
    async fn record(&self, record: Value);
}

/// An audit sink that writes each record through `tracing` at `info` level.
///
/// Intended for tests and local development, not production use.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingAuditSink;

#[async_trait]
impl AuditSink for LoggingAuditSink {
    async fn record(&self, record: Value) {
        tracing::info!(record = %record, "guardrail pipeline traversal recorded");
    }
}
