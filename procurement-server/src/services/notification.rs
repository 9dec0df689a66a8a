//! Outbound notifications
//!
//! Delivery (chat bot, email, ...) lives outside this crate. Services call the
//! port after their transaction commits; a failed delivery is logged and never
//! undoes the change that triggered it.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

#[async_trait]
pub trait NotificationPort: Send + Sync {
    async fn notify(&self, user_id: i64, message: &str) -> anyhow::Result<()>;
}

pub type SharedNotifier = Arc<dyn NotificationPort>;

/// Send and swallow: failures only reach the log
pub async fn notify_quietly(notifier: &dyn NotificationPort, user_id: i64, message: &str) {
    if let Err(e) = notifier.notify(user_id, message).await {
        tracing::warn!(user_id, error = %e, "Notification delivery failed");
    }
}

/// Default notifier: writes notifications to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

#[async_trait]
impl NotificationPort for TracingNotifier {
    async fn notify(&self, user_id: i64, message: &str) -> anyhow::Result<()> {
        tracing::info!(target: "notifications", user_id, "{message}");
        Ok(())
    }
}

/// Collects notifications in memory
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<(i64, String)>>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// A notifier whose every delivery fails
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<(i64, String)> {
        self.sent.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn sent_to(&self, user_id: i64) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|(id, _)| *id == user_id)
            .map(|(_, msg)| msg)
            .collect()
    }
}

#[async_trait]
impl NotificationPort for RecordingNotifier {
    async fn notify(&self, user_id: i64, message: &str) -> anyhow::Result<()> {
        if self.fail {
            anyhow::bail!("delivery refused for user {user_id}");
        }
        self.sent
            .lock()
            .map_err(|_| anyhow::anyhow!("notification log poisoned"))?
            .push((user_id, message.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recording_notifier() {
        let notifier = RecordingNotifier::new();
        notify_quietly(&notifier, 7, "Order 1 is now SENT").await;
        notify_quietly(&notifier, 8, "other").await;
        assert_eq!(notifier.sent_to(7), vec!["Order 1 is now SENT".to_string()]);
        assert_eq!(notifier.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_failures_are_swallowed() {
        let notifier = RecordingNotifier::failing();
        notify_quietly(&notifier, 7, "lost").await;
        assert!(notifier.sent().is_empty());
    }
}
