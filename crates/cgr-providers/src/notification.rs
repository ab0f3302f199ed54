// crates/cgr-providers/src/notification.rs
// ============================================================================
// Module: Notification Provider
// Description: Pluggable interface for fanning out HITL approval requests
//              and escalations to human approvers.
// Purpose: Satisfy spec.md §4.E.4's "notification fan-out on request
//          creation and on escalation" requirement without coupling the
//          HITL engine to a specific channel (email, Slack, webhook, ...).
// Dependencies: async-trait, cgr-core, reqwest, tokio
// ============================================================================

//! ## Overview
//! [`NotificationProvider`] is called by the HITL engine whenever an approval
//! request is created or escalated. [`LoggingNotificationProvider`] is a
//! reference implementation that records messages via `tracing` rather than
//! delivering them anywhere, useful for tests and for deployments that have
//! not yet wired a real channel.

use async_trait::async_trait;
use cgr_core::identifiers::ApprovalRequestId;
use thiserror::Error;

/// Errors raised while sending a notification.
#[derive(Debug, Error)]
pub enum NotificationError {
    /// The channel backend rejected or failed to deliver the message.
    #[error("notification delivery failed: {0}")]
    DeliveryFailed(String),
    /// The provider is not configured with a destination and cannot send.
    #[error("notification provider is not configured")]
    NotConfigured,
}

/// The reason a notification is being sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationReason {
    /// A new approval request was created.
    RequestCreated,
    /// An approval request escalated to the next chain step.
    Escalated,
    /// An approval request's final decision was recorded.
    Decided,
}

/// A message describing an approval-chain event to notify approvers about.
#[derive(Debug, Clone)]
pub struct NotificationMessage {
    /// The approval request this notification concerns.
    pub request_id: ApprovalRequestId,
    /// Why the notification is being sent.
    pub reason: NotificationReason,
    /// Human-readable summary for display in the destination channel.
    pub summary: String,
}

/// Delivers notifications about approval-chain events.
#[async_trait]
pub trait NotificationProvider: Send + Sync {
    /// Whether this provider has a destination configured and can send.
    fn is_configured(&self) -> bool;

    /// Sends `message`.
    ///
    /// # Errors
    ///
    /// Returns [`NotificationError::NotConfigured`] if [`Self::is_configured`]
    /// is `false`, or [`NotificationError::DeliveryFailed`] if the backend
    /// rejects the message.
    async fn send(&self, message: &NotificationMessage) -> Result<(), NotificationError>;
}

/// A reference provider that records messages via `tracing` instead of
/// delivering them to any external channel.
///
/// Always reports configured. Intended for tests and local development.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNotificationProvider;

#[async_trait]
impl NotificationProvider for LoggingNotificationProvider {
    fn is_configured(&self) -> bool {
        true
    }

    async fn send(&self, message: &NotificationMessage) -> Result<(), NotificationError> {
        tracing::info!(
            request_id = %message.request_id,
            reason = ?message.reason,
            summary = %message.summary,
            "hitl notification"
        );
        Ok(())
    }
}

/// Sends `message` through `provider`, retrying transient delivery failures
/// with exponential backoff up to `max_attempts` times.
///
/// # Errors
///
/// Returns the last [`NotificationError`] observed if all attempts fail, or
/// immediately if the provider is not configured.
pub async fn send_with_retry(provider: &dyn NotificationProvider, message: &NotificationMessage, max_attempts: u32) -> Result<(), NotificationError> {
    if !provider.is_configured() {
        return Err(NotificationError::NotConfigured);
    }
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match provider.send(message).await {
            Ok(()) => return Ok(()),
            Err(err) if attempt < max_attempts => {
                let backoff_ms = 100u64 * 2u64.pow(attempt - 1);
                tokio::time::sleep(std::time::Duration::from_millis(backoff_ms)).await;
                tracing::warn!(attempt, error = %err, "retrying notification delivery");
            }
            Err(err) => return Err(err),
        }
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
    use super::send_with_retry;
    use super::LoggingNotificationProvider;
    use super::NotificationMessage;
    use super::NotificationReason;
    use cgr_core::identifiers::ApprovalRequestId;

    #[tokio::test]
    async fn logging_provider_accepts_message() {
        let provider = LoggingNotificationProvider;
        let message = NotificationMessage {
            request_id: ApprovalRequestId::new("req-1").unwrap(),
            reason: NotificationReason::RequestCreated,
            summary: "new request".to_string(),
        };
        send_with_retry(&provider, &message, 3).await.unwrap();
    }
}
