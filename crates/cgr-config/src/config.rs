// crates/cgr-config/src/config.rs
// ============================================================================
// Module: Runtime Configuration
// Description: TOML-backed process configuration and component sub-configs.
// Purpose: Load a single TOML document into typed, `#[serde(default)]`
//          sub-structs and validate the constitutional anchor shape at load
//          time.
// Dependencies: cgr-core, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with a strict size limit.
//! Missing or invalid configuration fails closed: every field has a
//! conservative default, but the constitutional anchor itself is mandatory
//! and is validated against [`ConstitutionalHash`]'s 16-lowercase-hex shape
//! before [`CgrConfig::load`] returns.

use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use cgr_core::identifiers::ConstitutionalHash;
use cgr_core::identifiers::InvalidConstitutionalHash;
use serde::Deserialize;
use thiserror::Error;

/// Maximum accepted configuration file size, in bytes.
const MAX_CONFIG_FILE_SIZE: usize = 256 * 1024;

/// Maximum accepted length of a resolved configuration path.
const MAX_PATH_LENGTH: usize = 4096;

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "cgr.toml";

/// Environment variable used to override the config path.
const CONFIG_ENV_VAR: &str = "CGR_CONFIG_PATH";

/// Top-level process configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CgrConfig {
    /// The process-wide constitutional anchor every envelope, event, and
    /// audit entry is checked or stamped against.
    pub constitutional_anchor: String,
    /// Merkle audit ledger tunables.
    #[serde(default)]
    pub ledger: LedgerSettings,
    /// Temporal event engine tunables.
    #[serde(default)]
    pub temporal: TemporalSettings,
    /// Guardrail pipeline stage timeouts and enablement flags.
    #[serde(default)]
    pub pipeline: PipelineSettings,
    /// Per-tenant sliding-window rate limit defaults.
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    /// Input sanitizer limits.
    #[serde(default)]
    pub sanitize: SanitizeSettings,
    /// Deliberation router tunables.
    #[serde(default)]
    pub router: RouterSettings,
    /// HITL escalation timer and SLA tunables.
    #[serde(default)]
    pub hitl: HitlSettings,
}

impl CgrConfig {
    /// Loads configuration from disk using the default resolution rules: an
    /// explicit `path`, else the `CGR_CONFIG_PATH` environment variable,
    /// else `cgr.toml` in the current directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the path cannot be read, the file
    /// exceeds [`MAX_CONFIG_FILE_SIZE`], the TOML is malformed, or the
    /// parsed document fails [`CgrConfig::validate`].
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        let text = resolved.to_string_lossy();
        if text.len() > MAX_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes).map_err(|_err| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        let config: Self = toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the constitutional anchor is
    /// not 16 lowercase hex characters, or when any sub-config carries an
    /// out-of-range value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.anchor().map_err(|err| ConfigError::Invalid(err.to_string()))?;
        self.pipeline.validate()?;
        self.rate_limit.validate()?;
        self.sanitize.validate()?;
        self.router.validate()?;
        self.hitl.validate()?;
        self.ledger.validate()?;
        Ok(())
    }

    /// Parses the configured anchor string into a [`ConstitutionalHash`].
    ///
    /// # Errors
    ///
    /// Returns an error when `constitutional_anchor` is not 16 lowercase
    /// hex characters.
    pub fn anchor(&self) -> Result<ConstitutionalHash, InvalidConstitutionalHash> {
        ConstitutionalHash::new(self.constitutional_anchor.clone())
    }
}

/// Merkle audit ledger tunables (mirrors `cgr_ledger::LedgerConfig`).
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct LedgerSettings {
    /// Number of entries that triggers a batch commit.
    pub batch_size: usize,
    /// Maximum number of un-batched entries held in the submit queue.
    pub queue_bound: usize,
    /// Drain poll interval, in seconds.
    pub drain_interval_secs: u64,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            batch_size: 100,
            queue_bound: 10_000,
            drain_interval_secs: 5,
        }
    }
}

impl LedgerSettings {
    /// Validates the ledger tunables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when `batch_size` or `queue_bound`
    /// is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("ledger.batch_size must be positive".to_string()));
        }
        if self.queue_bound == 0 {
            return Err(ConfigError::Invalid("ledger.queue_bound must be positive".to_string()));
        }
        Ok(())
    }
}

/// Temporal event engine tunables (mirrors `cgr_temporal::EngineConfig`,
/// minus the constitutional anchor, which is supplied by
/// [`CgrConfig::constitutional_anchor`]).
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct TemporalSettings {
    /// A consistency snapshot is taken every `snapshot_interval` recorded
    /// events.
    pub snapshot_interval: u64,
}

impl Default for TemporalSettings {
    fn default() -> Self {
        Self { snapshot_interval: 50 }
    }
}

/// Guardrail pipeline stage timeouts and enablement flags (mirrors
/// `cgr_guardrail::PipelineConfig` and its nested `StageTimeouts`).
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Overall cap across all enabled stages, in seconds.
    pub pipeline_timeout_secs: u64,
    /// Input sanitizer budget, in seconds.
    pub sanitize_timeout_secs: u64,
    /// Governance engine budget, in seconds.
    pub govern_timeout_secs: u64,
    /// Sandbox budget, in seconds.
    pub sandbox_timeout_secs: u64,
    /// Output verifier budget, in seconds.
    pub verify_timeout_secs: u64,
    /// Whether a disallowed stage halts the remaining stages.
    pub fail_closed: bool,
    /// Whether the sanitize stage runs.
    pub sanitize_enabled: bool,
    /// Whether the governance stage runs.
    pub govern_enabled: bool,
    /// Whether the sandbox stage runs.
    pub sandbox_enabled: bool,
    /// Whether the verify stage runs.
    pub verify_enabled: bool,
    /// Impact score at or above which the governance stage escalates to
    /// deliberation.
    pub deliberation_threshold: f64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            pipeline_timeout_secs: 15,
            sanitize_timeout_secs: 1,
            govern_timeout_secs: 5,
            sandbox_timeout_secs: 10,
            verify_timeout_secs: 2,
            fail_closed: true,
            sanitize_enabled: true,
            govern_enabled: true,
            sandbox_enabled: true,
            verify_enabled: true,
            deliberation_threshold: 0.8,
        }
    }
}

impl PipelineSettings {
    /// Validates the pipeline tunables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when `pipeline_timeout_secs` is
    /// zero or `deliberation_threshold` is outside `[0.0, 1.0]`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline_timeout_secs == 0 {
            return Err(ConfigError::Invalid("pipeline.pipeline_timeout_secs must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&self.deliberation_threshold) {
            return Err(ConfigError::Invalid("pipeline.deliberation_threshold must be within [0.0, 1.0]".to_string()));
        }
        Ok(())
    }
}

/// Per-tenant sliding-window rate limit defaults (mirrors
/// `cgr_guardrail::RateLimitConfig`'s default rule; per-class overrides are
/// a deployment-time concern left to the caller).
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Window width, in milliseconds.
    pub window_millis: i64,
    /// Maximum requests allowed within the window.
    pub max_requests: usize,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            window_millis: 60_000,
            max_requests: 120,
        }
    }
}

impl RateLimitSettings {
    /// Validates the rate limit tunables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when `window_millis` or
    /// `max_requests` is non-positive.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_millis <= 0 {
            return Err(ConfigError::Invalid("rate_limit.window_millis must be positive".to_string()));
        }
        if self.max_requests == 0 {
            return Err(ConfigError::Invalid("rate_limit.max_requests must be positive".to_string()));
        }
        Ok(())
    }
}

/// Input sanitizer limits (mirrors `cgr_guardrail::SanitizeConfig`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SanitizeSettings {
    /// Maximum serialized payload size, in bytes.
    pub max_payload_bytes: usize,
    /// Content types accepted when the payload carries a `content_type`
    /// field.
    pub allowed_content_types: Vec<String>,
    /// Whether to replace matched PII substrings with `[REDACTED]`.
    pub redact_pii: bool,
}

impl Default for SanitizeSettings {
    fn default() -> Self {
        Self {
            max_payload_bytes: 256 * 1024,
            allowed_content_types: vec!["application/json".to_string(), "text/plain".to_string()],
            redact_pii: true,
        }
    }
}

impl SanitizeSettings {
    /// Validates the sanitizer tunables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when `max_payload_bytes` is zero or
    /// `allowed_content_types` is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_payload_bytes == 0 {
            return Err(ConfigError::Invalid("sanitize.max_payload_bytes must be positive".to_string()));
        }
        if self.allowed_content_types.is_empty() {
            return Err(ConfigError::Invalid("sanitize.allowed_content_types must be non-empty".to_string()));
        }
        Ok(())
    }
}

/// Deliberation router tunables (mirrors `cgr_router`'s
/// `DEFAULT_THRESHOLD`/`HISTORY_CAP` constants).
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct RouterSettings {
    /// Confidence threshold below which a decision routes to deliberation.
    pub confidence_threshold: f64,
    /// Maximum number of past decisions retained per tenant for learning.
    pub history_cap: usize,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.8,
            history_cap: 1000,
        }
    }
}

impl RouterSettings {
    /// Validates the router tunables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when `confidence_threshold` is
    /// outside `[0.0, 1.0]` or `history_cap` is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(ConfigError::Invalid("router.confidence_threshold must be within [0.0, 1.0]".to_string()));
        }
        if self.history_cap == 0 {
            return Err(ConfigError::Invalid("router.history_cap must be positive".to_string()));
        }
        Ok(())
    }
}

/// HITL escalation timer and SLA tunables (mirrors
/// `cgr_hitl::EscalationConfig` plus the chain-wide escalation ceiling).
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct HitlSettings {
    /// Background sweep poll interval, in seconds.
    pub poll_interval_secs: u64,
    /// Number of recently-fired request ids retained in the dedup set.
    pub dedup_capacity: usize,
    /// Fraction of the timeout elapsed at which a warning event fires.
    pub warning_percent: f64,
    /// Maximum escalation levels before a request expires.
    pub max_escalations: u32,
}

impl Default for HitlSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            dedup_capacity: 500,
            warning_percent: 0.75,
            max_escalations: 3,
        }
    }
}

impl HitlSettings {
    /// Validates the HITL tunables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when `warning_percent` is outside
    /// `[0.0, 1.0]`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.warning_percent) {
            return Err(ConfigError::Invalid("hitl.warning_percent must be within [0.0, 1.0]".to_string()));
        }
        Ok(())
    }
}

/// Configuration loading or validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Resolves the config path from the explicit argument, the
/// `CGR_CONFIG_PATH` environment variable, or the default filename.
fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(PathBuf::from(env_path));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, reason = "Test-only assertions are permitted.")]
mod tests {
    use super::CgrConfig;
    use super::ConfigError;
    use std::io::Write;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("create temp file");
        file.write_all(contents.as_bytes()).expect("write temp file");
        file
    }

    #[test]
    fn minimal_document_fills_in_defaults() {
        let file = write_temp("constitutional_anchor = \"abcdef0123456789\"\n");
        let config = CgrConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.ledger.batch_size, 100);
        assert_eq!(config.hitl.max_escalations, 3);
        assert!(config.anchor().is_ok());
    }

    #[test]
    fn invalid_anchor_shape_is_rejected() {
        let file = write_temp("constitutional_anchor = \"not-hex\"\n");
        let err = CgrConfig::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        let file = write_temp(
            "constitutional_anchor = \"abcdef0123456789\"\n\
             [pipeline]\n\
             deliberation_threshold = 1.5\n",
        );
        let err = CgrConfig::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn overridden_sub_config_values_round_trip() {
        let file = write_temp(
            "constitutional_anchor = \"abcdef0123456789\"\n\
             [ledger]\n\
             batch_size = 250\n\
             [hitl]\n\
             max_escalations = 5\n",
        );
        let config = CgrConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.ledger.batch_size, 250);
        assert_eq!(config.hitl.max_escalations, 5);
        assert_eq!(config.hitl.dedup_capacity, 500);
    }

    #[test]
    fn missing_file_surfaces_io_error() {
        let err = CgrConfig::load(Some(std::path::Path::new("/nonexistent/cgr.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
