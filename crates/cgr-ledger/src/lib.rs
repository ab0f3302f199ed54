// crates/cgr-ledger/src/lib.rs
// ============================================================================
// Crate: cgr-ledger
// Description: Merkle-anchored audit ledger (component A).
// ============================================================================

//! # `cgr-ledger`
//!
//! A batched, queue-fed, Merkle-anchored audit ledger. A background worker
//! drains a bounded submit queue, builds a full binary Merkle tree over each
//! batch of canonicalized leaves (odd nodes self-pair), and persists the
//! commitment to a pluggable external store with a JSON-file fallback.
//!
//! See [`AuditLedger`] for the public contract.

#![deny(missing_docs)]
#![deny(missing_docs_in_private_items)]
#![deny(unsafe_code)]

/// Batched, queue-fed, Merkle-anchored ledger and its public contract.
pub mod ledger;
/// Pure Merkle tree construction and proof extraction.
pub mod merkle;
/// External-store and JSON-file backed commitment persistence.
pub mod persistence;

pub use ledger::AuditLedger;
pub use ledger::LedgerConfig;
pub use ledger::LedgerError;
pub use ledger::LedgerStats;
pub use persistence::PersistenceBackend;
pub use persistence::PersistenceError;
