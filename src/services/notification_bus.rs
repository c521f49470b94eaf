//! Notification bus: sequence numbering, sink fan-out and in-process broadcast.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::domain::models::{Notification, NotificationSeverity};
use crate::domain::ports::NotificationChannel;

/// Configuration for the notification bus.
#[derive(Debug, Clone)]
pub struct NotificationBusConfig {
    /// Capacity of the broadcast channel.
    pub channel_capacity: usize,
}

impl Default for NotificationBusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
        }
    }
}

/// Delivers every terminal-transition notification to the configured
/// channels and to in-process subscribers.
///
/// Channel failures are logged and never propagate: a broken webhook must
/// not stall a target's state machine.
pub struct NotificationBus {
    sender: broadcast::Sender<Notification>,
    sequence: AtomicU64,
    channels: Vec<Arc<dyn NotificationChannel>>,
}

impl NotificationBus {
    pub fn new(config: NotificationBusConfig) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity);
        Self {
            sender,
            sequence: AtomicU64::new(0),
            channels: Vec::new(),
        }
    }

    /// Add a delivery channel.
    #[must_use]
    pub fn with_channel(mut self, channel: Arc<dyn NotificationChannel>) -> Self {
        self.channels.push(channel);
        self
    }

    /// Assign a sequence number, deliver to every channel, then broadcast.
    pub async fn publish(&self, mut notification: Notification) -> Notification {
        notification.sequence = self.sequence.fetch_add(1, Ordering::SeqCst);

        match notification.severity {
            NotificationSeverity::Critical => error!(
                target_id = %notification.target_id,
                kind = %notification.kind,
                reason = ?notification.reason,
                "ALERT: {}",
                notification.message
            ),
            NotificationSeverity::Error | NotificationSeverity::Warning => warn!(
                target_id = %notification.target_id,
                kind = %notification.kind,
                reason = ?notification.reason,
                "{}",
                notification.message
            ),
            NotificationSeverity::Info => info!(
                target_id = %notification.target_id,
                kind = %notification.kind,
                "{}",
                notification.message
            ),
        }

        for channel in &self.channels {
            if let Err(e) = channel.send(&notification).await {
                warn!(channel = channel.name(), error = %e, "Failed to deliver notification");
            }
        }

        // No subscribers is fine.
        let _ = self.sender.send(notification.clone());
        notification
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    /// Number of notifications published so far.
    pub fn current_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new(NotificationBusConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock::RecordingChannel;
    use crate::domain::models::NotificationKind;
    use chrono::Utc;

    fn notification(kind: NotificationKind) -> Notification {
        Notification::new(kind, "lap_time", "test", Utc::now())
    }

    #[tokio::test]
    async fn test_sequence_assignment() {
        let bus = NotificationBus::default();
        let mut rx = bus.subscribe();

        bus.publish(notification(NotificationKind::Promoted)).await;
        bus.publish(notification(NotificationKind::Rejected)).await;

        assert_eq!(rx.recv().await.unwrap().sequence, 0);
        assert_eq!(rx.recv().await.unwrap().sequence, 1);
        assert_eq!(bus.current_sequence(), 2);
    }

    #[tokio::test]
    async fn test_channel_failure_does_not_block_others() {
        let failing = Arc::new(RecordingChannel::failing());
        let recording = Arc::new(RecordingChannel::default());
        let bus = NotificationBus::default()
            .with_channel(failing.clone())
            .with_channel(recording.clone());

        let delivered = bus.publish(notification(NotificationKind::RolledBack)).await;
        assert_eq!(delivered.sequence, 0);
        assert_eq!(recording.kinds(), vec![NotificationKind::RolledBack]);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = NotificationBus::default();
        assert_eq!(bus.subscriber_count(), 0);
        bus.publish(notification(NotificationKind::Unfrozen)).await;
        assert_eq!(bus.current_sequence(), 1);
    }
}
