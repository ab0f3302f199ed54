// crates/cgr-temporal/src/lib.rs
// ============================================================================
// Crate: cgr-temporal
// Description: Append-only, causally-ordered event log (component B).
// ============================================================================

//! # `cgr-temporal`
//!
//! An append-only, causally-ordered event log with snapshot-accelerated
//! historical queries and consistency validation. See [`TemporalEngine`] for
//! the public contract.

#![deny(missing_docs)]
#![deny(missing_docs_in_private_items)]
#![deny(unsafe_code)]

/// The append-only event log and its public contract.
pub mod engine;

pub use engine::ConsistencyStatus;
pub use engine::EngineConfig;
pub use engine::QueryFilters;
pub use engine::TemporalEngine;
pub use engine::TemporalError;
