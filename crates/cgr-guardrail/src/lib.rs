// crates/cgr-guardrail/src/lib.rs
// ============================================================================
// Crate: cgr-guardrail
// Description: Five-stage layered guardrail pipeline (component C).
// ============================================================================

//! # `cgr-guardrail`
//!
//! Runs every envelope through a fixed ordered pipeline — sanitize, govern,
//! sandbox, verify, audit — aggregating per-stage verdicts into one outer
//! decision. See [`GuardrailPipeline`] for the public contract.

#![deny(missing_docs)]
#![deny(missing_docs_in_private_items)]
#![deny(unsafe_code)]

/// Structured findings accumulated by stages, re-exported for convenience
/// from [`cgr_core::guardrail`].
pub mod audit;
/// Per-request context threaded through every stage.
pub mod context;
/// Stage 2: rule evaluation, constitutional validation, impact scoring.
pub mod governance;
/// The pipeline driver and its configuration.
pub mod pipeline;
/// Cross-cutting per-actor sliding-window rate limiter.
pub mod rate_limit;
/// Stage 1: size/content-type checks, injection and PII detection.
pub mod sanitize;
/// Stage 3: isolated tool-call execution.
pub mod sandbox_stage;
/// The stage contract every fixed stage implements.
pub mod stage;
/// Stage 4: harmful-content and toxic-language detection, output redaction.
pub mod verify;

pub use audit::AuditSink;
pub use audit::LoggingAuditSink;
pub use context::PipelineContext;
pub use governance::GovernanceConfig;
pub use governance::GovernanceStage;
pub use pipeline::GuardrailPipeline;
pub use pipeline::PipelineConfig;
pub use pipeline::PipelineOutcome;
pub use pipeline::StageTimeouts;
pub use rate_limit::RateLimitConfig;
pub use rate_limit::RateLimitRule;
pub use rate_limit::RateLimiter;
pub use sanitize::SanitizeConfig;
pub use sanitize::SanitizeStage;
pub use sandbox_stage::SandboxStage;
pub use stage::GuardrailStage;
pub use verify::VerifyStage;
