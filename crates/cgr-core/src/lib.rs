// crates/cgr-core/src/lib.rs
// ============================================================================
// Crate: cgr-core
// Description: Shared data model for the Constitutional Governance Runtime.
// Purpose: Define envelopes, guardrail findings, temporal events, ledger and
//          HITL record shapes, identifiers, hashing, and time once so every
//          other component agrees on wire and storage representations.
// Dependencies: serde, serde_json, serde_jcs, sha2, thiserror, time
// ============================================================================

//! # `cgr-core`
//!
//! Shared data model for the Constitutional Governance Runtime (CGR). Every
//! other crate in this workspace depends on `cgr-core` for:
//!
//! - [`envelope::Envelope`] — the in-flight unit of work.
//! - [`guardrail::GuardrailViolation`] / [`guardrail::GuardrailResult`] —
//!   pipeline findings and per-stage verdicts.
//! - [`event::ConstitutionalEvent`] — immutable, causally-ordered log entries.
//! - [`ledger::AuditLedgerEntry`] / [`ledger::MerkleBatch`] — Merkle ledger
//!   shapes.
//! - [`hitl`] — approval requests, chain definitions, escalation timers, and
//!   the chain-local checksum-chained audit entry.
//! - [`hashing`] — canonical JSON and SHA-256 primitives used everywhere a
//!   content hash is computed.
//! - [`identifiers`] — opaque, strongly typed ids.
//! - [`time::Timestamp`] — the one timestamp representation used across the
//!   runtime.
//!
//! None of these types enforce cross-component business rules by themselves;
//! those rules (pipeline composition, escalation scheduling, Merkle batching)
//! live in the component crates that consume this one.

pub mod envelope;
pub mod event;
pub mod guardrail;
pub mod hashing;
pub mod hitl;
pub mod identifiers;
pub mod ledger;
pub mod snapshot;
pub mod time;

pub use envelope::Envelope;
pub use envelope::EnvelopeError;
pub use envelope::EnvelopeStatus;
pub use envelope::MessageType;
pub use envelope::Priority;
pub use event::ConstitutionalEvent;
pub use event::EventType;
pub use guardrail::GuardrailResult;
pub use guardrail::GuardrailViolation;
pub use guardrail::Severity;
pub use guardrail::StageAction;
pub use hashing::HashDigest;
pub use identifiers::ConstitutionalHash;
pub use ledger::AuditLedgerEntry;
pub use ledger::MerkleBatch;
pub use snapshot::TemporalSnapshot;
pub use time::Timestamp;
