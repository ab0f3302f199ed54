// crates/cgr-config/src/lib.rs
// ============================================================================
// Crate: cgr-config
// Description: TOML-backed process configuration: constitutional anchor and
//              per-component tunables.
// ============================================================================

//! # `cgr-config`
//!
//! Loads a single TOML document into [`CgrConfig`], a typed aggregate of
//! per-component sub-configs. The constitutional anchor is mandatory and
//! validated at load time; every other field carries a conservative
//! default so a deployment can start from an empty or near-empty file. See
//! [`CgrConfig::load`] for the loading contract.

#![deny(missing_docs)]
#![deny(missing_docs_in_private_items)]
#![deny(unsafe_code)]

/// Configuration types, loading, and validation.
pub mod config;

pub use config::CgrConfig;
pub use config::ConfigError;
pub use config::HitlSettings;
pub use config::LedgerSettings;
pub use config::PipelineSettings;
pub use config::RateLimitSettings;
pub use config::RouterSettings;
pub use config::SanitizeSettings;
pub use config::TemporalSettings;
