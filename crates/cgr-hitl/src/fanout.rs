// crates/cgr-hitl/src/fanout.rs
// ============================================================================
// Module: Notification Fan-Out
// Description: Priority-based provider selection and concurrent dispatch.
// Purpose: Implement spec.md §4.E.4 exactly: non-critical requests notify
//          {slack, teams}; high/critical requests also notify {pagerduty}.
// Dependencies: cgr-core, cgr-providers, tokio
// ============================================================================

//! ## Overview
//! [`NotificationFanout`] holds one named [`NotificationProvider`] per
//! channel and dispatches concurrently on relevant transitions. Every
//! provider's outcome is collected into a result map for logging; a single
//! provider's failure never blocks or fails the others, and the aggregated
//! result is never surfaced back to the state machine (spec.md §4.E.4).

use std::collections::BTreeMap;

use cgr_core::envelope::Priority;
use cgr_providers::send_with_retry;
use cgr_providers::NotificationMessage;
use cgr_providers::NotificationProvider;

/// Channel name under which a provider was registered.
pub type ChannelName = String;

/// Holds one provider per channel and dispatches by priority.
pub struct NotificationFanout {
    providers: BTreeMap<ChannelName, std::sync::Arc<dyn NotificationProvider>>,
    max_attempts: u32,
}

impl NotificationFanout {
    /// Builds an empty fan-out orchestrator. Register channels with
    /// [`Self::register`] before dispatching.
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            providers: BTreeMap::new(),
            max_attempts,
        }
    }

    /// Registers `provider` under `channel` (e.g. `"slack"`, `"teams"`,
    /// `"pagerduty"`).
    #[must_use]
    pub fn register(mut self, channel: impl Into<ChannelName>, provider: std::sync::Arc<dyn NotificationProvider>) -> Self {
        self.providers.insert(channel.into(), provider);
        self
    }

    /// Returns the channel names selected for `priority` (spec.md §4.E.4
    /// "Resolution"): non-critical → `{slack, teams}`; high/critical →
    /// `{slack, teams, pagerduty}`.
    #[must_use]
    pub fn channels_for(priority: Priority) -> &'static [&'static str] {
        if matches!(priority, Priority::High | Priority::Critical) {
            &["slack", "teams", "pagerduty"]
        } else {
            &["slack", "teams"]
        }
    }

    /// Dispatches `message` concurrently to every channel selected for
    /// `priority` that has a registered provider. Each provider's outcome is
    /// retried with exponential backoff up to the configured attempt count.
    /// Returns a map from channel name to whether delivery ultimately
    /// succeeded; never errors, since per-provider failure is isolated
    /// (spec.md §4.E.4 "Failures of individual providers are isolated").
    pub async fn dispatch(&self, priority: Priority, message: &NotificationMessage) -> BTreeMap<ChannelName, bool> {
        let max_attempts = self.max_attempts_or_default();
        let mut tasks = tokio::task::JoinSet::new();
        for channel in Self::channels_for(priority) {
            let Some(provider) = self.providers.get(*channel) else {
                continue;
            };
            let provider = std::sync::Arc::clone(provider);
            let channel = (*channel).to_string();
            let message = message.clone();
            tasks.spawn(async move {
                let outcome = send_with_retry(provider.as_ref(), &message, max_attempts).await;
                (channel, outcome)
            });
        }

        let mut map = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            let Ok((channel, outcome)) = joined else {
                continue;
            };
            match outcome {
                Ok(()) => {
                    map.insert(channel, true);
                }
                Err(error) => {
                    tracing::warn!(channel = %channel, error = %error, "hitl notification delivery failed");
                    map.insert(channel, false);
                }
            }
        }
        map
    }

    /// Returns the configured attempt count, with a floor of one attempt.
    const fn max_attempts_or_default(&self) -> u32 {
        if self.max_attempts == 0 {
            1
        } else {
            self.max_attempts
        }
    }
}

/// Returns `true` if at least one channel for `priority` has no registered
/// provider (used to log a one-time configuration warning at startup).
#[must_use]
pub fn has_unconfigured_channel(fanout: &NotificationFanout, priority: Priority) -> bool {
    NotificationFanout::channels_for(priority).iter().any(|channel| !fanout.providers.contains_key(*channel))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, reason = "Test-only assertions are permitted.")]
mod tests {
    use super::NotificationFanout;
    use cgr_core::envelope::Priority;
    use cgr_core::identifiers::ApprovalRequestId;
    use cgr_providers::LoggingNotificationProvider;
    use cgr_providers::NotificationMessage;
    use cgr_providers::NotificationReason;
    use std::sync::Arc;

    fn message() -> NotificationMessage {
        NotificationMessage {
            request_id: ApprovalRequestId::new("req-1").unwrap(),
            reason: NotificationReason::RequestCreated,
            summary: "created".to_string(),
        }
    }

    #[test]
    fn standard_priority_does_not_select_pagerduty() {
        assert_eq!(NotificationFanout::channels_for(Priority::Standard), &["slack", "teams"]);
    }

    #[test]
    fn critical_priority_selects_pagerduty() {
        assert_eq!(NotificationFanout::channels_for(Priority::Critical), &["slack", "teams", "pagerduty"]);
    }

    #[tokio::test]
    async fn dispatch_only_reaches_registered_providers() {
        let fanout = NotificationFanout::new(2).register("slack", Arc::new(LoggingNotificationProvider));
        let results = fanout.dispatch(Priority::Standard, &message()).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results.get("slack"), Some(&true));
    }
}
