// crates/cgr-providers/src/constitutional.rs
// ============================================================================
// Module: Constitutional Validator
// Description: Pluggable interface for constitutional compliance checks.
// Purpose: Let the governance engine stage (spec.md §4.C stage 2) check
//          anchor match and obtain a compliance score without this crate
//          implementing the constitutional policy model itself.
// Dependencies: async-trait, cgr-core
// ============================================================================

//! ## Overview
//! The governance engine checks that an envelope's constitutional anchor
//! equals the process-wide configured value (enforced structurally by
//! [`cgr_core::envelope::Envelope::new`]) and additionally calls an injected
//! validator for a compliance score. This crate ships an always-compliant
//! reference implementation for tests.

use async_trait::async_trait;
use cgr_core::envelope::Envelope;
use thiserror::Error;

/// Errors raised while validating constitutional compliance.
#[derive(Debug, Error)]
pub enum ConstitutionalValidationError {
    /// The validator backend failed.
    #[error("constitutional validation failed: {0}")]
    Backend(String),
}

/// Result of a constitutional compliance check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComplianceOutcome {
    /// Compliance score in `[0, 1]`; `1.0` is fully compliant.
    pub score: f64,
    /// Whether the envelope is considered compliant.
    pub compliant: bool,
}

/// Evaluates constitutional compliance for an envelope.
#[async_trait]
pub trait ConstitutionalValidator: Send + Sync {
    /// Evaluates compliance for `envelope`.
    ///
    /// # Errors
    ///
    /// Returns [`ConstitutionalValidationError`] when the backend fails.
    async fn validate(&self, envelope: &Envelope) -> Result<ComplianceOutcome, ConstitutionalValidationError>;
}

/// A reference validator that considers every envelope fully compliant.
///
/// Intended for tests and local development, not production use.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAllConstitutionalValidator;

#[async_trait]
impl ConstitutionalValidator for AllowAllConstitutionalValidator {
    async fn validate(&self, _envelope: &Envelope) -> Result<ComplianceOutcome, ConstitutionalValidationError> {
        Ok(ComplianceOutcome {
            score: 1.0,
            compliant: true,
        })
    }
}
