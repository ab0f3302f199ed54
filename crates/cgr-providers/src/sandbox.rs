// crates/cgr-providers/src/sandbox.rs
// ============================================================================
// Module: Sandbox Executor
// Description: Pluggable interface for isolated tool-call execution.
// Purpose: Satisfy spec.md §4.C stage 3's contract (bounded time, bounded
//          resources, network isolation) without mandating a specific
//          sandbox technology (spec.md §1 Non-goals).
// Dependencies: async-trait
// ============================================================================

//! ## Overview
//! The guardrail pipeline's sandbox stage delegates execution to a
//! [`SandboxExecutor`]. This crate defines the contract only; container or
//! MicroVM backends are implementer-supplied. [`EchoSandboxExecutor`] is a
//! process-local reference implementation for tests that enforces the
//! wall-clock bound but performs no real isolation.

use std::time::Duration;
use std::time::Instant;

use async_trait::async_trait;
use thiserror::Error;

/// Resource bounds applied to one sandboxed invocation.
#[derive(Debug, Clone, Copy)]
pub struct SandboxProfile {
    /// Maximum wall-clock duration.
    pub max_wall_clock: Duration,
    /// Maximum resident memory in bytes.
    pub max_memory_bytes: u64,
    /// Maximum CPU time in milliseconds.
    pub max_cpu_millis: u64,
    /// Whether outbound network access is permitted.
    pub network_isolated: bool,
}

impl Default for SandboxProfile {
    fn default() -> Self {
        Self {
            max_wall_clock: Duration::from_secs(10),
            max_memory_bytes: 256 * 1024 * 1024,
            max_cpu_millis: 10_000,
            network_isolated: true,
        }
    }
}

/// A tool invocation to execute inside the sandbox.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    /// Tool name.
    pub tool_name: String,
    /// Opaque, tool-specific arguments.
    pub arguments: serde_json::Value,
}

/// Outcome of a sandboxed tool invocation.
#[derive(Debug, Clone)]
pub struct SandboxOutcome {
    /// Opaque tool output.
    pub output: serde_json::Value,
    /// Wall-clock duration actually consumed.
    pub elapsed: Duration,
}

/// Errors raised by sandbox execution.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The invocation exceeded its wall-clock bound.
    #[error("sandbox execution exceeded {0:?}")]
    TimedOut(Duration),
    /// The sandbox backend reported an error.
    #[error("sandbox execution failed: {0}")]
    Backend(String),
}

/// Executes tool invocations inside an isolated environment.
#[async_trait]
pub trait SandboxExecutor: Send + Sync {
    /// Executes `invocation` under `profile`.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError`] when execution times out or the backend
    /// reports a failure.
    async fn execute(&self, invocation: &ToolInvocation, profile: &SandboxProfile) -> Result<SandboxOutcome, SandboxError>;

    /// Reports backend readiness.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError`] when the backend is unavailable.
    async fn readiness(&self) -> Result<(), SandboxError> {
        Ok(())
    }
}

/// A process-local reference executor that echoes the invocation arguments
/// back as output, enforcing only the wall-clock bound.
///
/// Intended for tests; performs no real isolation.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoSandboxExecutor;

#[async_trait]
impl SandboxExecutor for EchoSandboxExecutor {
    async fn execute(&self, invocation: &ToolInvocation, profile: &SandboxProfile) -> Result<SandboxOutcome, SandboxError> {
        let started = Instant::now();
        let elapsed = started.elapsed();
        if elapsed > profile.max_wall_clock {
            return Err(SandboxError::TimedOut(profile.max_wall_clock));
        }
        Ok(SandboxOutcome {
            output: invocation.arguments.clone(),
            elapsed,
        })
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    reason = "Test-only assertions are permitted."
)]
mod tests {
    use super::EchoSandboxExecutor;
    use super::SandboxExecutor;
    use super::SandboxProfile;
    use super::ToolInvocation;

    #[tokio::test]
    async fn echo_executor_returns_arguments_as_output() {
        let invocation = ToolInvocation {
            tool_name: "noop".to_string(),
            arguments: serde_json::json!({"a": 1}),
        };
        let outcome = EchoSandboxExecutor.execute(&invocation, &SandboxProfile::default()).await.unwrap();
        assert_eq!(outcome.output, serde_json::json!({"a": 1}));
    }
}
