use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::Notification;

/// Destination for terminal-transition notifications.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Short name used in logs when delivery fails.
    fn name(&self) -> &'static str;

    async fn send(&self, notification: &Notification) -> DomainResult<()>;
}
