// crates/cgr-providers/src/lib.rs
// ============================================================================
// Crate: cgr-providers
// Description: Pluggable external collaborator interfaces for the
//              Constitutional Governance Runtime.
// ============================================================================

//! Trait-based contracts for the external systems the runtime's core crates
//! depend on but do not implement themselves: impact scoring, constitutional
//! compliance validation, sandboxed tool execution, key-value storage, and
//! human-notification delivery. Each module ships one process-local reference
//! implementation suitable for tests and local development, never for
//! production deployment.

#![deny(missing_docs)]
#![deny(missing_docs_in_private_items)]
#![deny(unsafe_code)]

/// Wall-clock time source, pluggable for deterministic tests.
pub mod clock;
/// Constitutional compliance validation interface.
pub mod constitutional;
/// External impact-scoring model interface.
pub mod impact;
/// Redis-shaped key-value store interface.
pub mod kv_store;
/// Human-notification delivery interface.
pub mod notification;
/// Isolated tool-call execution interface.
pub mod sandbox;

pub use clock::Clock;
pub use clock::FixedClock;
pub use clock::SystemClock;
pub use constitutional::AllowAllConstitutionalValidator;
pub use constitutional::ComplianceOutcome;
pub use constitutional::ConstitutionalValidationError;
pub use constitutional::ConstitutionalValidator;
pub use impact::ImpactScorer;
pub use impact::ImpactScoringError;
pub use impact::StaticImpactScorer;
pub use impact::DEFAULT_FALLBACK_SCORE;
pub use kv_store::InMemoryKvStore;
pub use kv_store::KvStore;
pub use kv_store::KvStoreError;
pub use kv_store::ScoredMember;
pub use notification::send_with_retry;
pub use notification::LoggingNotificationProvider;
pub use notification::NotificationError;
pub use notification::NotificationMessage;
pub use notification::NotificationProvider;
pub use notification::NotificationReason;
pub use sandbox::EchoSandboxExecutor;
pub use sandbox::SandboxError;
pub use sandbox::SandboxExecutor;
pub use sandbox::SandboxOutcome;
pub use sandbox::SandboxProfile;
pub use sandbox::ToolInvocation;
