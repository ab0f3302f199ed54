// crates/cgr-guardrail/src/sanitize.rs
// ============================================================================
// Module: Input Sanitizer (Stage 1)
// Description: Size limit, content-type whitelist, injection/PII detection,
//              dangerous-tag stripping, optional PII redaction.
// Purpose: Implement spec.md §4.C stage 1 exactly: "PII detection is
//          informational (action = audit), injection is critical
//          (action = block)."
// Dependencies: async-trait, cgr-core, regex, serde_json
// ============================================================================

//! ## Overview
//! The sanitizer never blocks on PII alone; it redacts and audits. Injection
//! patterns and oversized or disallowed-content-type payloads block outright,
//! since those are basic acceptance checks rather than judgment calls.

use std::collections::BTreeMap;
use std::sync::LazyLock;
use std::time::Instant;

use async_trait::async_trait;
use cgr_core::guardrail::GuardrailResult;
use cgr_core::guardrail::GuardrailViolation;
use cgr_core::guardrail::Severity;
use cgr_core::guardrail::StageAction;
use cgr_core::time::Timestamp;
use regex::Regex;
use serde_json::Value;

use crate::context::PipelineContext;
use crate::stage::GuardrailStage;

/// Regex patterns recognized as injection attempts.
static INJECTION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)<script",
        r"(?i)union\s+select",
        r"(?i);\s*drop\s+table",
        r"\.\./\.\./",
        r"(?i)\$\{jndi:",
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

/// Regex patterns recognized as personally identifiable information.
static PII_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"[\w.+-]+@[\w-]+\.[\w.-]+",
        r"\b\d{3}-\d{2}-\d{4}\b",
        r"\b\d{3}[- .]?\d{3}[- .]?\d{4}\b",
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

/// HTML tags stripped unconditionally as dangerous.
const DANGEROUS_TAGS: &[&str] = &["script", "iframe", "object", "embed"];

/// Configuration for the input sanitizer stage.
#[derive(Debug, Clone)]
pub struct SanitizeConfig {
    /// Maximum serialized payload size in bytes.
    pub max_payload_bytes: usize,
    /// Content types accepted when the payload carries a `content_type` field.
    pub allowed_content_types: Vec<String>,
    /// Whether to replace matched PII substrings with `[REDACTED]`.
    pub redact_pii: bool,
}

impl Default for SanitizeConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: 256 * 1024,
            allowed_content_types: vec!["application/json".to_string(), "text/plain".to_string()],
            redact_pii: true,
        }
    }
}

/// The input sanitizer stage.
#[derive(Debug, Clone)]
pub struct SanitizeStage {
    /// Stage configuration.
    pub config: SanitizeConfig,
}

impl SanitizeStage {
    /// Builds a sanitizer with the given configuration.
    #[must_use]
    pub fn new(config: SanitizeConfig) -> Self {
        Self {
            config,
        }
    }

    /// Strips dangerous HTML tags (open and close) from a string value.
    fn strip_dangerous_tags(value: &str) -> String {
        let mut text = value.to_string();
        for tag in DANGEROUS_TAGS {
            for pattern in [format!("<{tag}"), format!("</{tag}>")] {
                while let Some(start) = text.to_lowercase().find(&pattern) {
                    let Some(end_offset) = text[start..].find('>') else {
                        break;
                    };
                    text.replace_range(start..=start + end_offset, "");
                }
            }
        }
        text
    }

    /// Redacts every PII pattern match in `value` with `[REDACTED]`.
    fn redact_pii(value: &str) -> (String, bool) {
        let mut text = value.to_string();
        let mut matched = false;
        for pattern in PII_PATTERNS.iter() {
            if pattern.is_match(&text) {
                matched = true;
                text = pattern.replace_all(&text, "[REDACTED]").into_owned();
            }
        }
        (text, matched)
    }
}

#[async_trait]
impl GuardrailStage for SanitizeStage {
    fn id(&self) -> &str {
        "sanitize"
    }

    async fn process(&self, payload: BTreeMap<String, Value>, context: &PipelineContext, now: Timestamp) -> GuardrailResult {
        let started = Instant::now();
        let mut violations = Vec::new();

        let serialized_len = serde_json::to_vec(&payload).map(|bytes| bytes.len()).unwrap_or(usize::MAX);
        if serialized_len > self.config.max_payload_bytes {
            violations.push(GuardrailViolation::new(
                self.id(),
                "payload_too_large",
                Severity::High,
                format!("payload of {serialized_len} bytes exceeds the {}-byte limit", self.config.max_payload_bytes),
                now,
                context.envelope_id.clone(),
            ));
        }

        if let Some(Value::String(content_type)) = payload.get("content_type") {
            if !self.config.allowed_content_types.iter().any(|allowed| allowed == content_type) {
                violations.push(GuardrailViolation::new(
                    self.id(),
                    "disallowed_content_type",
                    Severity::High,
                    format!("content type '{content_type}' is not in the configured whitelist"),
                    now,
                    context.envelope_id.clone(),
                ));
            }
        }

        let mut modified = payload.clone();
        let mut any_modified = false;
        let mut injection_found = false;
        let mut pii_found = false;

        for (key, value) in &payload {
            let Value::String(text) = value else {
                continue;
            };
            if INJECTION_PATTERNS.iter().any(|pattern| pattern.is_match(text)) {
                injection_found = true;
            }
            let stripped = Self::strip_dangerous_tags(text);
            let (redacted, matched) = if self.config.redact_pii {
                Self::redact_pii(&stripped)
            } else {
                (stripped.clone(), PII_PATTERNS.iter().any(|pattern| pattern.is_match(&stripped)))
            };
            pii_found = pii_found || matched;
            if redacted != *text {
                any_modified = true;
                modified.insert(key.clone(), Value::String(redacted));
            }
        }

        if injection_found {
            violations.push(GuardrailViolation::new(
                self.id(),
                "injection_attack",
                Severity::Critical,
                "a known injection pattern was detected in the payload",
                now,
                context.envelope_id.clone(),
            ));
        }
        if pii_found {
            violations.push(
                GuardrailViolation::new(
                    self.id(),
                    "pii_detected",
                    Severity::Info,
                    "personally identifiable information was detected and redacted",
                    now,
                    context.envelope_id.clone(),
                )
                .with_detail("redacted", Value::Bool(self.config.redact_pii)),
            );
        }

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let blocking = violations.iter().any(|violation| violation.severity >= Severity::High);

        GuardrailResult {
            action: if blocking { StageAction::Block } else if pii_found { StageAction::Audit } else { StageAction::Allow },
            allowed: !blocking,
            violations,
            modified_payload: any_modified.then_some(modified),
            metadata: BTreeMap::new(),
            elapsed_ms,
            envelope_id: context.envelope_id.clone(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, reason = "Test-only assertions are permitted.")]
mod tests {
    use super::SanitizeConfig;
    use super::SanitizeStage;
    use crate::context::PipelineContext;
    use crate::stage::GuardrailStage;
    use cgr_core::identifiers::ActorId;
    use cgr_core::identifiers::EnvelopeId;
    use cgr_core::identifiers::TenantId;
    use cgr_core::identifiers::TraceId;
    use cgr_core::time::Timestamp;
    use std::collections::BTreeMap;

    fn context() -> PipelineContext {
        PipelineContext::new(
            TraceId::new("t1").unwrap(),
            EnvelopeId::new("e1").unwrap(),
            ActorId::new("a1").unwrap(),
            TenantId::new("tenant-1").unwrap(),
        )
    }

    #[tokio::test]
    async fn injection_pattern_blocks() {
        let stage = SanitizeStage::new(SanitizeConfig::default());
        let mut payload = BTreeMap::new();
        payload.insert("body".to_string(), serde_json::json!("<script>alert(1)</script>"));
        let result = stage.process(payload, &context(), Timestamp::from_unix_millis(0)).await;
        assert!(!result.allowed);
        assert!(result.violations.iter().any(|v| v.kind == "injection_attack"));
    }

    #[tokio::test]
    async fn pii_is_redacted_but_allowed() {
        let stage = SanitizeStage::new(SanitizeConfig::default());
        let mut payload = BTreeMap::new();
        payload.insert("body".to_string(), serde_json::json!("contact me at person@example.com"));
        let result = stage.process(payload, &context(), Timestamp::from_unix_millis(0)).await;
        assert!(result.allowed);
        let modified = result.modified_payload.expect("payload redacted");
        assert_eq!(modified.get("body").and_then(|v| v.as_str()), Some("contact me at [REDACTED]"));
    }

    #[tokio::test]
    async fn oversized_payload_blocks() {
        let stage = SanitizeStage::new(SanitizeConfig {
            max_payload_bytes: 8,
            ..SanitizeConfig::default()
        });
        let mut payload = BTreeMap::new();
        payload.insert("body".to_string(), serde_json::json!("this payload is far too long"));
        let result = stage.process(payload, &context(), Timestamp::from_unix_millis(0)).await;
        assert!(!result.allowed);
        assert!(result.violations.iter().any(|v| v.kind == "payload_too_large"));
    }
}
